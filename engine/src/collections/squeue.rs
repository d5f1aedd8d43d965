// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{
    fmt::Debug,
    mem,
    ops::{Index, IndexMut},
    panic::Location,
    ptr::NonNull,
};

use crate::allocators::{utils::align_forward, ArenaBox, MemoryArena};

use super::SArray;

/// A fixed-capacity double-ended queue, backed by a ring buffer in an
/// [`SArray`] placed right after this header.
///
/// Indexing is relative to the front of the queue.
#[repr(C)]
pub struct SQueue<T> {
    size: usize,
    offset: usize,
    data: NonNull<SArray<T>>,
}

impl<T> SQueue<T> {
    const fn buffer_offset() -> usize {
        align_forward(size_of::<SQueue<T>>(), SArray::<T>::placement_alignment())
    }

    /// The amount of bytes a queue with the given capacity needs.
    pub const fn memory_size(capacity: usize) -> usize {
        Self::buffer_offset() + SArray::<T>::memory_size(capacity)
    }

    /// The alignment the memory passed to [`SQueue::emplace`] needs.
    pub const fn placement_alignment() -> usize {
        let header = align_of::<SQueue<T>>();
        let buffer = SArray::<T>::placement_alignment();
        if buffer > header {
            buffer
        } else {
            header
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.buffer().capacity()
    }

    /// The amount of elements that can still be pushed.
    pub fn space(&self) -> usize {
        self.capacity() - self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size == self.capacity()
    }

    pub fn push_back(&mut self, value: T) -> Result<(), T> {
        if self.is_full() {
            return Err(value);
        }
        let i = self.physical_index(self.size);
        self.buffer_mut()[i] = value;
        self.size += 1;
        Ok(())
    }

    pub fn push_front(&mut self, value: T) -> Result<(), T> {
        if self.is_full() {
            return Err(value);
        }
        let capacity = self.capacity();
        self.offset = (self.offset + capacity - 1) % capacity;
        let i = self.offset;
        self.buffer_mut()[i] = value;
        self.size += 1;
        Ok(())
    }

    /// Pushes clones of all the items to the back of the queue, or nothing if
    /// they don't all fit.
    #[must_use]
    pub fn push(&mut self, items: &[T]) -> bool
    where
        T: Clone,
    {
        if self.space() < items.len() {
            return false;
        }
        for item in items {
            let i = self.physical_index(self.size);
            self.buffer_mut()[i] = item.clone();
            self.size += 1;
        }
        true
    }

    pub fn first(&self) -> Option<&T> {
        self.get(0)
    }

    pub fn last(&self) -> Option<&T> {
        self.get(self.size.checked_sub(1)?)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.size {
            return None;
        }
        Some(&self.buffer()[self.physical_index(index)])
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index >= self.size {
            return None;
        }
        let i = self.physical_index(index);
        Some(&mut self.buffer_mut()[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        (0..self.size).map(|i| &self.buffer()[self.physical_index(i)])
    }

    fn physical_index(&self, index: usize) -> usize {
        (self.offset + index) % self.capacity()
    }

    fn buffer(&self) -> &SArray<T> {
        // Safety: the buffer is initialized in emplace and owned by the queue.
        unsafe { self.data.as_ref() }
    }

    fn buffer_mut(&mut self) -> &mut SArray<T> {
        // Safety: see buffer.
        unsafe { self.data.as_mut() }
    }
}

impl<T: Default> SQueue<T> {
    /// Constructs an empty queue with the given capacity at `placement`.
    ///
    /// ### Safety
    ///
    /// `placement` must be valid for writes of [`SQueue::memory_size`] bytes,
    /// aligned to [`SQueue::placement_alignment`], and not used by anything
    /// else for as long as the returned queue is used. The capacity must not
    /// be zero.
    pub unsafe fn emplace(placement: NonNull<u8>, capacity: usize) -> NonNull<SQueue<T>> {
        debug_assert!(capacity > 0);
        // Safety: the buffer offset is within the memory size and aligned for
        // the array.
        let data = unsafe { SArray::<T>::emplace(placement.add(Self::buffer_offset()), capacity) };
        let header = placement.cast::<SQueue<T>>();
        // Safety: the placement is valid and aligned for the header.
        unsafe {
            header.write(SQueue {
                size: 0,
                offset: 0,
                data,
            })
        };
        header
    }

    /// Allocates a queue with the given capacity from the arena. Returns None
    /// if the arena can't fit it, or if the capacity is zero.
    #[track_caller]
    pub fn new_in(arena: &dyn MemoryArena, capacity: usize) -> Option<ArenaBox<'_, SQueue<T>>> {
        if capacity == 0 {
            return None;
        }
        let placement = arena.allocate_raw(
            Self::memory_size(capacity),
            Self::placement_alignment(),
            core::any::type_name::<SQueue<T>>(),
            Location::caller(),
        )?;
        // Safety: the allocation is memory_size bytes, aligned properly, and
        // owned by the box from here on.
        let queue = unsafe { Self::emplace(placement, capacity) };
        Some(ArenaBox::from_raw_parts(queue, arena, Location::caller()))
    }

    pub fn pop_front(&mut self) -> Option<T> {
        if self.size == 0 {
            return None;
        }
        let i = self.offset;
        let value = mem::take(&mut self.buffer_mut()[i]);
        self.offset = (self.offset + 1) % self.capacity();
        self.size -= 1;
        Some(value)
    }

    pub fn pop_back(&mut self) -> Option<T> {
        if self.size == 0 {
            return None;
        }
        self.size -= 1;
        let i = self.physical_index(self.size);
        Some(mem::take(&mut self.buffer_mut()[i]))
    }

    /// Removes `count` elements from the front of the queue.
    pub fn consume(&mut self, count: usize) {
        assert!(
            count <= self.size,
            "can't consume {count} elements from a queue of {}",
            self.size,
        );
        if mem::needs_drop::<T>() {
            for i in 0..count {
                let i = self.physical_index(i);
                self.buffer_mut()[i] = T::default();
            }
        }
        self.offset = (self.offset + count) % self.capacity();
        self.size -= count;
    }

    pub fn clear(&mut self) {
        self.consume(self.size);
        self.offset = 0;
    }
}

impl<T> Drop for SQueue<T> {
    fn drop(&mut self) {
        // Safety: the buffer was emplaced in the same allocation as the
        // header, and it's not used after this.
        unsafe { core::ptr::drop_in_place(self.data.as_ptr()) };
    }
}

impl<T> Index<usize> for SQueue<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        match self.get(index) {
            Some(value) => value,
            None => panic!("index {index} out of bounds for SQueue of size {}", self.size),
        }
    }
}

impl<T> IndexMut<usize> for SQueue<T> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        let size = self.size;
        match self.get_mut(index) {
            Some(value) => value,
            None => panic!("index {index} out of bounds for SQueue of size {size}"),
        }
    }
}

impl<T: Debug> Debug for SQueue<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
