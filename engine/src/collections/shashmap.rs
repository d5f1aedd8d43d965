// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{fmt::Debug, panic::Location, ptr::NonNull};

use crate::allocators::{utils::align_forward, ArenaBox, MemoryArena};

use super::SArray;

/// Marks the end of a bucket's chain, and empty buckets.
pub const END_OF_LIST: u64 = u64::MAX;

/// Maps are considered full when this fraction of the buckets are in use.
pub const MAX_LOAD_FACTOR: f32 = 0.75;

/// The factor between the amount of entries a map is expected to hold and the
/// capacity it should be created with, so that it never hits
/// [`MAX_LOAD_FACTOR`].
pub const LOAD_FACTOR_MULTIPLIER: f32 = 1.5;

/// Returns the capacity an [`SHashMap`] should have to hold `entries` entries
/// without becoming full: `ceil(entries * 1.5)`.
pub const fn capacity_for(entries: usize) -> usize {
    (entries * 3).div_ceil(2)
}

#[derive(Debug, Clone, Default)]
#[repr(C)]
pub struct HashMapEntry<V> {
    pub key: u64,
    next: u64,
    pub value: V,
}

struct FindResult {
    bucket: usize,
    previous: u64,
    index: u64,
}

/// A fixed-capacity hash map from pre-hashed `u64` keys (see
/// [`crate::hash::string_id`]) to values. Collisions are chained through the
/// entries, which are stored densely in insertion order (until removals swap
/// the last entry into the removed one's place).
///
/// The map is stored in a single allocation: this header, followed by an
/// [`SArray`] of bucket heads and an [`SArray`] of entries, both with the
/// map's capacity.
///
/// Besides the regular map operations, the `multi_*` functions allow storing
/// multiple values per key.
#[repr(C)]
pub struct SHashMap<V> {
    capacity: usize,
    hash: NonNull<SArray<u64>>,
    data: NonNull<SArray<HashMapEntry<V>>>,
}

impl<V> SHashMap<V> {
    const fn buckets_offset() -> usize {
        align_forward(
            size_of::<SHashMap<V>>(),
            SArray::<u64>::placement_alignment(),
        )
    }

    const fn entries_offset(capacity: usize) -> usize {
        align_forward(
            Self::buckets_offset() + SArray::<u64>::memory_size(capacity),
            SArray::<HashMapEntry<V>>::placement_alignment(),
        )
    }

    /// The amount of bytes a map with the given capacity needs: the header,
    /// the bucket array and the entry array.
    pub const fn memory_size(capacity: usize) -> usize {
        Self::entries_offset(capacity) + SArray::<HashMapEntry<V>>::memory_size(capacity)
    }

    /// The alignment the memory passed to [`SHashMap::emplace`] needs.
    pub const fn placement_alignment() -> usize {
        let header = align_of::<SHashMap<V>>();
        let entries = SArray::<HashMapEntry<V>>::placement_alignment();
        if entries > header {
            entries
        } else {
            header
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The amount of entries in the map.
    pub fn size(&self) -> usize {
        self.entries().size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Returns true if the load factor has reached [`MAX_LOAD_FACTOR`], in
    /// which case new keys can't be inserted.
    pub fn is_full(&self) -> bool {
        // size >= capacity * 0.75, without the floats.
        self.size() * 4 >= self.capacity * 3
    }

    pub fn has(&self, key: u64) -> bool {
        self.find(key).index != END_OF_LIST
    }

    pub fn get(&self, key: u64) -> Option<&V> {
        let found = self.find(key);
        if found.index == END_OF_LIST {
            return None;
        }
        Some(&self.entries()[found.index as usize].value)
    }

    /// Returns a clone of the value for the key, or `default` if there isn't
    /// one.
    pub fn get_or(&self, key: u64, default: V) -> V
    where
        V: Clone,
    {
        self.get(key).cloned().unwrap_or(default)
    }

    pub fn get_mut(&mut self, key: u64) -> Option<&mut V> {
        let found = self.find(key);
        if found.index == END_OF_LIST {
            return None;
        }
        Some(&mut self.entries_mut()[found.index as usize].value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &V)> {
        self.entries().iter().map(|entry| (entry.key, &entry.value))
    }

    pub fn entries(&self) -> &SArray<HashMapEntry<V>> {
        // Safety: the entry array is initialized in emplace and owned by the
        // map.
        unsafe { self.data.as_ref() }
    }

    fn entries_mut(&mut self) -> &mut SArray<HashMapEntry<V>> {
        // Safety: see entries.
        unsafe { self.data.as_mut() }
    }

    fn buckets(&self) -> &SArray<u64> {
        // Safety: the bucket array is initialized in emplace and owned by the
        // map.
        unsafe { self.hash.as_ref() }
    }

    fn buckets_mut(&mut self) -> &mut SArray<u64> {
        // Safety: see buckets.
        unsafe { self.hash.as_mut() }
    }

    fn find(&self, key: u64) -> FindResult {
        let bucket = (key % self.capacity as u64) as usize;
        let entries = self.entries();
        let mut previous = END_OF_LIST;
        let mut index = self.buckets()[bucket];
        while index != END_OF_LIST {
            let entry = &entries[index as usize];
            if entry.key == key {
                break;
            }
            previous = index;
            index = entry.next;
        }
        FindResult {
            bucket,
            previous,
            index,
        }
    }

    /// Points the link in front of the found entry (the bucket head, or the
    /// previous entry in the chain) to `to`.
    fn relink(&mut self, found: &FindResult, to: u64) {
        if found.previous == END_OF_LIST {
            self.buckets_mut()[found.bucket] = to;
        } else {
            self.entries_mut()[found.previous as usize].next = to;
        }
    }

    /// Finds the chain link pointing at the entry at `target`.
    fn find_link_to(&self, target: u64) -> FindResult {
        let key = self.entries()[target as usize].key;
        let bucket = (key % self.capacity as u64) as usize;
        let mut previous = END_OF_LIST;
        let mut index = self.buckets()[bucket];
        while index != target && index != END_OF_LIST {
            previous = index;
            index = self.entries()[index as usize].next;
        }
        FindResult {
            bucket,
            previous,
            index,
        }
    }
}

impl<V: Default> SHashMap<V> {
    /// Constructs an empty map with the given capacity at `placement`.
    ///
    /// ### Safety
    ///
    /// `placement` must be valid for writes of [`SHashMap::memory_size`]
    /// bytes, aligned to [`SHashMap::placement_alignment`], and not used by
    /// anything else for as long as the returned map is used. The capacity
    /// must not be zero.
    pub unsafe fn emplace(placement: NonNull<u8>, capacity: usize) -> NonNull<SHashMap<V>> {
        debug_assert!(capacity > 0);
        debug_assert_eq!(0, placement.as_ptr() as usize % Self::placement_alignment());
        // Safety: the offsets are within the memory size, and aligned for the
        // arrays, see buckets_offset and entries_offset.
        let (mut hash, data) = unsafe {
            (
                SArray::<u64>::emplace(placement.add(Self::buckets_offset()), capacity),
                SArray::<HashMapEntry<V>>::emplace(
                    placement.add(Self::entries_offset(capacity)),
                    capacity,
                ),
            )
        };
        // Safety: just emplaced, nothing else refers to it.
        unsafe { hash.as_mut() }.fill(END_OF_LIST);

        let header = placement.cast::<SHashMap<V>>();
        // Safety: the placement is valid and aligned for the header.
        unsafe {
            header.write(SHashMap {
                capacity,
                hash,
                data,
            })
        };
        header
    }

    /// Allocates a map with the given capacity from the arena. Returns None
    /// if the arena can't fit it, or if the capacity is zero. See
    /// [`capacity_for`] for picking the capacity.
    #[track_caller]
    pub fn new_in(arena: &dyn MemoryArena, capacity: usize) -> Option<ArenaBox<'_, SHashMap<V>>> {
        if capacity == 0 {
            return None;
        }
        let placement = arena.allocate_raw(
            Self::memory_size(capacity),
            Self::placement_alignment(),
            core::any::type_name::<SHashMap<V>>(),
            Location::caller(),
        )?;
        // Safety: the allocation is memory_size bytes, aligned properly, and
        // owned by the box from here on.
        let map = unsafe { Self::emplace(placement, capacity) };
        Some(ArenaBox::from_raw_parts(map, arena, Location::caller()))
    }

    fn add_entry(&mut self, key: u64, value: V) -> u64 {
        let index = self.size() as u64;
        let pushed = self.entries_mut().push(HashMapEntry {
            key,
            next: END_OF_LIST,
            value,
        });
        // The callers check is_full first, and the load factor is below 1.
        debug_assert!(pushed.is_ok());
        index
    }

    /// Sets the value for the key. If the key isn't in the map yet and the
    /// map is full, the value is returned back.
    pub fn set(&mut self, key: u64, value: V) -> Result<(), V> {
        let found = self.find(key);
        if found.index != END_OF_LIST {
            self.entries_mut()[found.index as usize].value = value;
            return Ok(());
        }
        if self.is_full() {
            return Err(value);
        }
        let index = self.add_entry(key, value);
        self.relink(&found, index);
        Ok(())
    }

    /// Removes the key from the map, returning its value if it was there.
    pub fn remove(&mut self, key: u64) -> Option<V> {
        let found = self.find(key);
        if found.index == END_OF_LIST {
            return None;
        }
        Some(self.erase(found))
    }

    fn erase(&mut self, found: FindResult) -> V {
        let next = self.entries()[found.index as usize].next;
        self.relink(&found, next);

        let last = self.size() as u64 - 1;
        if found.index != last {
            // The last entry moves into the erased one's slot, so its link
            // needs to point there.
            let link_to_last = self.find_link_to(last);
            self.relink(&link_to_last, found.index);
        }
        self.entries_mut()
            .remove_and_swap_with_last_element(found.index as usize)
            .value
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.buckets_mut().fill(END_OF_LIST);
        self.entries_mut().clear();
    }

    /// Inserts the value without replacing existing values for the key. It's
    /// placed in front of the key's other values in the chain, so
    /// [`SHashMap::multi_find_first`] will return it first. If the map is
    /// full, returns the value back.
    pub fn multi_insert(&mut self, key: u64, value: V) -> Result<(), V> {
        if self.is_full() {
            return Err(value);
        }
        let found = self.find(key);
        let index = self.add_entry(key, value);
        self.relink(&found, index);
        self.entries_mut()[index as usize].next = found.index;
        Ok(())
    }

    /// Removes the first value found for the key.
    pub fn multi_remove(&mut self, key: u64) -> Option<V> {
        self.remove(key)
    }

    /// Removes every value for the key, returning how many were removed.
    pub fn multi_remove_all(&mut self, key: u64) -> usize {
        let mut removed = 0;
        while self.remove(key).is_some() {
            removed += 1;
        }
        removed
    }
}

impl<V> SHashMap<V> {
    /// Returns the first entry with the key, the rest can be found with
    /// [`SHashMap::multi_find_next`].
    pub fn multi_find_first(&self, key: u64) -> Option<&HashMapEntry<V>> {
        let found = self.find(key);
        if found.index == END_OF_LIST {
            return None;
        }
        Some(&self.entries()[found.index as usize])
    }

    /// Returns the next entry with the same key as `entry`.
    pub fn multi_find_next(&self, entry: &HashMapEntry<V>) -> Option<&HashMapEntry<V>> {
        let entries = self.entries();
        let mut index = entry.next;
        while index != END_OF_LIST {
            let next = &entries[index as usize];
            if next.key == entry.key {
                return Some(next);
            }
            index = next.next;
        }
        None
    }

    /// Returns all the values for the key.
    pub fn multi_get(&self, key: u64) -> impl Iterator<Item = &V> {
        let mut next = self.multi_find_first(key);
        core::iter::from_fn(move || {
            let entry = next?;
            next = self.multi_find_next(entry);
            Some(&entry.value)
        })
    }

    pub fn multi_count(&self, key: u64) -> usize {
        self.multi_get(key).count()
    }
}

impl<V> Drop for SHashMap<V> {
    fn drop(&mut self) {
        // Safety: the arrays were emplaced in the same allocation as the
        // header, and they're not used after this.
        unsafe {
            core::ptr::drop_in_place(self.hash.as_ptr());
            core::ptr::drop_in_place(self.data.as_ptr());
        }
    }
}

impl<V: Debug> Debug for SHashMap<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
