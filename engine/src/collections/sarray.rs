// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{
    fmt::Debug,
    marker::PhantomData,
    mem,
    ops::{Index, IndexMut},
    panic::Location,
    ptr::NonNull,
    slice,
};

use crate::allocators::{utils::align_forward, ArenaBox, MemoryArena};

/// A fixed-capacity array, stored in a single allocation: this header is
/// immediately followed by the storage for `capacity` elements.
///
/// Every slot up to the capacity always holds a valid `T` (they're
/// default-constructed on creation), so indexing is checked against the
/// capacity, like a raw array. The logical operations ([`SArray::push`],
/// [`SArray::get`], [`SArray::as_slice`] etc.) respect the size.
///
/// Created with [`SArray::new_in`] (backed by an arena allocation) or
/// [`SArray::emplace`] (backed by memory the caller has already allocated,
/// which is how the asset loaders lay out their assets).
#[repr(C)]
pub struct SArray<T> {
    size: usize,
    capacity: usize,
    data: NonNull<T>,
    _owned: PhantomData<T>,
}

impl<T> SArray<T> {
    /// The offset of the first element from the start of the header.
    const fn data_offset() -> usize {
        align_forward(size_of::<SArray<T>>(), align_of::<T>())
    }

    /// The amount of bytes an array with the given capacity needs: the header
    /// and the inline element storage.
    pub const fn memory_size(capacity: usize) -> usize {
        Self::data_offset() + capacity * size_of::<T>()
    }

    /// The alignment the memory passed to [`SArray::emplace`] needs.
    pub const fn placement_alignment() -> usize {
        if align_of::<T>() > align_of::<SArray<T>>() {
            align_of::<T>()
        } else {
            align_of::<SArray<T>>()
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size == self.capacity
    }

    /// Appends the value to the back of the array. If there's no capacity left,
    /// returns the given value back wrapped in a [`Result::Err`], without
    /// modifying the array.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        if self.size >= self.capacity {
            return Err(value);
        }
        let i = self.size;
        // Assigning drops the default value that was in the slot.
        self.all_slots_mut()[i] = value;
        self.size = i + 1;
        Ok(())
    }

    /// Appends clones of all the items, or nothing if they don't all fit.
    #[must_use]
    pub fn append(&mut self, items: &[T]) -> bool
    where
        T: Clone,
    {
        if self.capacity - self.size < items.len() {
            return false;
        }
        let start = self.size;
        self.all_slots_mut()[start..start + items.len()].clone_from_slice(items);
        self.size += items.len();
        true
    }

    /// Sets every slot up to the capacity to `value`, and the size to the
    /// capacity.
    pub fn fill(&mut self, value: T)
    where
        T: Clone,
    {
        self.all_slots_mut().fill(value);
        self.size = self.capacity;
    }

    /// Replaces the contents of this array with clones of `other`'s elements.
    /// Panics if they don't fit.
    pub fn copy_from(&mut self, other: &SArray<T>)
    where
        T: Clone,
    {
        assert!(
            other.size <= self.capacity,
            "can't copy {} elements into an SArray with capacity {}",
            other.size,
            self.capacity,
        );
        self.all_slots_mut()[..other.size].clone_from_slice(other.as_slice());
        self.size = other.size;
    }

    /// Returns a reference to the element at `index`, which must be less
    /// than the capacity (not the size).
    pub fn at(&self, index: usize) -> &T {
        assert!(
            index < self.capacity,
            "index {index} out of bounds for SArray with capacity {}",
            self.capacity,
        );
        &self.all_slots()[index]
    }

    pub fn at_mut(&mut self, index: usize) -> &mut T {
        assert!(
            index < self.capacity,
            "index {index} out of bounds for SArray with capacity {}",
            self.capacity,
        );
        &mut self.all_slots_mut()[index]
    }

    /// Returns the element at `index` if it's less than the size.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.as_slice().get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.as_mut_slice().get_mut(index)
    }

    pub fn first(&self) -> Option<&T> {
        self.as_slice().first()
    }

    pub fn last(&self) -> Option<&T> {
        self.as_slice().last()
    }

    pub fn last_mut(&mut self) -> Option<&mut T> {
        self.as_mut_slice().last_mut()
    }

    pub fn index_of(&self, value: &T) -> Option<usize>
    where
        T: PartialEq,
    {
        self.as_slice().iter().position(|item| item == value)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.all_slots()[..self.size]
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        let size = self.size;
        &mut self.all_slots_mut()[..size]
    }

    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    pub fn iter_mut(&mut self) -> slice::IterMut<'_, T> {
        self.as_mut_slice().iter_mut()
    }

    /// Swaps the elements at the two indices, which must be less than the
    /// capacity.
    pub fn swap(&mut self, a: usize, b: usize) {
        self.all_slots_mut().swap(a, b);
    }

    fn all_slots(&self) -> &[T] {
        // Safety: `data` points to `capacity` initialized T's (see emplace),
        // owned by this array.
        unsafe { slice::from_raw_parts(self.data.as_ptr(), self.capacity) }
    }

    fn all_slots_mut(&mut self) -> &mut [T] {
        // Safety: see all_slots, and the mutable borrow of self makes this the
        // only reference to the elements.
        unsafe { slice::from_raw_parts_mut(self.data.as_ptr(), self.capacity) }
    }
}

impl<T: Default> SArray<T> {
    /// Constructs an array with `capacity` default-valued slots at
    /// `placement`, with the element storage right after the header.
    ///
    /// ### Safety
    ///
    /// `placement` must be valid for writes of [`SArray::memory_size`] bytes,
    /// aligned to [`SArray::placement_alignment`], and not used by anything
    /// else for as long as the returned array is used.
    pub unsafe fn emplace(placement: NonNull<u8>, capacity: usize) -> NonNull<SArray<T>> {
        debug_assert_eq!(0, placement.as_ptr() as usize % Self::placement_alignment());
        // Safety: the data offset is within the memory size, which the caller
        // guarantees is valid.
        let data = unsafe { placement.add(Self::data_offset()) }.cast::<T>();
        for i in 0..capacity {
            // Safety: the storage has space for `capacity` T's, and the data
            // offset is aligned for T.
            unsafe { data.add(i).write(T::default()) };
        }
        let header = placement.cast::<SArray<T>>();
        // Safety: the placement is valid and aligned for the header.
        unsafe {
            header.write(SArray {
                size: 0,
                capacity,
                data,
                _owned: PhantomData,
            })
        };
        header
    }

    /// Allocates an array with room for `capacity` elements from the arena.
    /// Returns None if the arena can't fit it.
    #[track_caller]
    pub fn new_in(arena: &dyn MemoryArena, capacity: usize) -> Option<ArenaBox<'_, SArray<T>>> {
        let placement = arena.allocate_raw(
            Self::memory_size(capacity),
            Self::placement_alignment(),
            core::any::type_name::<SArray<T>>(),
            Location::caller(),
        )?;
        // Safety: the allocation is memory_size bytes, aligned properly, and
        // owned by the box from here on.
        let array = unsafe { Self::emplace(placement, capacity) };
        Some(ArenaBox::from_raw_parts(array, arena, Location::caller()))
    }

    /// Removes and returns the last element.
    pub fn pop(&mut self) -> Option<T> {
        if self.size == 0 {
            return None;
        }
        self.size -= 1;
        let i = self.size;
        Some(mem::take(&mut self.all_slots_mut()[i]))
    }

    /// Removes every element, leaving default values in their slots.
    pub fn clear(&mut self) {
        let size = self.size;
        if mem::needs_drop::<T>() {
            for slot in &mut self.all_slots_mut()[..size] {
                *slot = T::default();
            }
        }
        self.size = 0;
    }

    /// Removes the element at `index` by moving the last element in its
    /// place. O(1), but doesn't preserve the order of the elements.
    pub fn remove_and_swap_with_last_element(&mut self, index: usize) -> T {
        assert!(
            index < self.size,
            "removal index {index} out of bounds for SArray with size {}",
            self.size,
        );
        let last = self.size - 1;
        self.all_slots_mut().swap(index, last);
        self.size = last;
        mem::take(&mut self.all_slots_mut()[last])
    }

    /// Removes the element at `index` by shifting every element after it to
    /// the left. Preserves order, but O(n).
    pub fn remove_element_at_index_shift_left(&mut self, index: usize) -> T {
        assert!(
            index < self.size,
            "removal index {index} out of bounds for SArray with size {}",
            self.size,
        );
        let size = self.size;
        self.all_slots_mut()[index..size].rotate_left(1);
        self.size = size - 1;
        mem::take(&mut self.all_slots_mut()[size - 1])
    }
}

impl<T> Drop for SArray<T> {
    fn drop(&mut self) {
        if mem::needs_drop::<T>() {
            // Safety: all `capacity` slots are initialized, and they're not
            // used after this.
            unsafe {
                core::ptr::drop_in_place(core::ptr::slice_from_raw_parts_mut(
                    self.data.as_ptr(),
                    self.capacity,
                ))
            };
        }
    }
}

impl<T> Index<usize> for SArray<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        self.at(index)
    }
}

impl<T> IndexMut<usize> for SArray<T> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        self.at_mut(index)
    }
}

impl<'a, T> IntoIterator for &'a SArray<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Debug> Debug for SArray<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicI32, Ordering};

    use crate::{
        allocators::{
            Arena, ArenaBox, LinearAllocator, MemoryArea, MemoryArena, NoBoundsChecking,
            NoMemoryTracking,
        },
        test_platform::TestPlatform,
    };

    use super::SArray;

    type TestArena<'a> = Arena<LinearAllocator<'a>, NoBoundsChecking, NoMemoryTracking>;

    #[test]
    fn memory_size_is_header_plus_elements() {
        assert_eq!(size_of::<SArray<u64>>() + 10 * 8, SArray::<u64>::memory_size(10));
        assert_eq!(size_of::<SArray<u8>>() + 3, SArray::<u8>::memory_size(3));
    }

    #[test]
    fn push_respects_capacity() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 1024).unwrap();
        let mut arena: TestArena = Arena::new(LinearAllocator::new(area.add_sub_area(1024).unwrap()));
        {
            let mut array = SArray::<u32>::new_in(&arena, 3).unwrap();
            for i in 0..3 {
                assert!(array.push(i).is_ok());
                assert!(array.size() <= array.capacity());
            }
            assert_eq!(Err(3), array.push(3));
            assert_eq!(3, array.size());
            assert_eq!(&[0, 1, 2], array.as_slice());
            assert_eq!(Some(2), array.pop());
            assert_eq!(Some(&1), array.last());
        }
        assert_eq!(0, arena.num_allocations());
        arena.reset();
    }

    #[test]
    fn raw_indexing_is_checked_against_capacity() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 1024).unwrap();
        let mut arena: TestArena = Arena::new(LinearAllocator::new(area.add_sub_area(1024).unwrap()));
        {
            let mut array = SArray::<u32>::new_in(&arena, 4).unwrap();
            array[3] = 7;
            assert_eq!(7, array[3]);
            assert_eq!(0, array.size());
            assert_eq!(None, array.get(3));
        }
        arena.reset();
    }

    #[test]
    #[should_panic]
    fn indexing_past_capacity_panics() {
        let mut memory = [0u64; 16];
        let placement = core::ptr::NonNull::from(&mut memory).cast::<u8>();
        let array = unsafe { SArray::<u32>::emplace(placement, 4).as_ref() };
        let _ = array[4];
    }

    #[test]
    fn removals() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 1024).unwrap();
        let mut arena: TestArena = Arena::new(LinearAllocator::new(area.add_sub_area(1024).unwrap()));
        {
            let mut array = SArray::<u32>::new_in(&arena, 8).unwrap();
            assert!(array.append(&[10, 11, 12, 13, 14]));
            assert_eq!(10, array.remove_and_swap_with_last_element(0));
            assert_eq!(&[14, 11, 12, 13], array.as_slice());
            assert_eq!(11, array.remove_element_at_index_shift_left(1));
            assert_eq!(&[14, 12, 13], array.as_slice());
            assert_eq!(Some(2), array.index_of(&13));
            assert!(!array.append(&[0; 6]));
            array.clear();
            assert!(array.is_empty());
        }
        arena.reset();
    }

    #[test]
    fn does_not_leak() {
        const COUNT: usize = 20;
        static ELEMENT_COUNT: AtomicI32 = AtomicI32::new(0);

        struct Element;
        impl Default for Element {
            fn default() -> Self {
                ELEMENT_COUNT.fetch_add(1, Ordering::Relaxed);
                Element
            }
        }
        impl Drop for Element {
            fn drop(&mut self) {
                ELEMENT_COUNT.fetch_add(-1, Ordering::Relaxed);
            }
        }

        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 4096).unwrap();
        let mut arena: TestArena = Arena::new(LinearAllocator::new(area.add_sub_area(4096).unwrap()));
        {
            let mut array = SArray::<Element>::new_in(&arena, COUNT).unwrap();
            // Every slot is constructed up front.
            assert_eq!(COUNT as i32, ELEMENT_COUNT.load(Ordering::Relaxed));
            for _ in 0..COUNT / 2 {
                array.push(Element::default()).ok().unwrap();
            }
            array.clear();
            assert_eq!(COUNT as i32, ELEMENT_COUNT.load(Ordering::Relaxed));
            ArenaBox::free(array);
        }
        assert_eq!(0, ELEMENT_COUNT.load(Ordering::Relaxed));
        arena.reset();
    }
}
