// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{cell::Cell, fmt::Debug, ptr::NonNull};

use super::{
    check_no_outstanding_allocations,
    utils::{align_forward, read_at, write_at},
    Allocator, MemoryBoundary,
};

/// An allocator for fixed-size elements. The unused slots form a singly linked
/// list: each free slot stores the pointer to the next free slot in its first
/// bytes, so the pool needs no memory besides the slots themselves.
///
/// The element size, alignment and offset come from the boundary, see
/// [`MemoryBoundary::with_elements`]. Slots are laid out so that `slot +
/// offset` is aligned, which means allocations with a different offset than
/// the pool was created with are generally not aligned correctly.
pub struct PoolAllocator<'a> {
    boundary: MemoryBoundary<'a>,
    element_size: usize,
    /// The distance between two slots: the element size rounded up to the
    /// alignment.
    stride: usize,
    alignment: usize,
    offset: usize,
    first_slot_offset: usize,
    capacity: usize,
    free_head: Cell<Option<NonNull<u8>>>,
    live_allocations: Cell<usize>,
}

impl Debug for PoolAllocator<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("boundary", &self.boundary)
            .field("element_size", &self.element_size)
            .field("capacity", &self.capacity)
            .field("live_allocations", &self.live_allocations)
            .finish_non_exhaustive()
    }
}

impl Drop for PoolAllocator<'_> {
    fn drop(&mut self) {
        check_no_outstanding_allocations("PoolAllocator", self.live_allocations.get());
    }
}

impl<'a> PoolAllocator<'a> {
    /// Creates a pool over the boundary. Returns None if the element size is
    /// too small to hold the free list links or if not even one element fits.
    pub fn new(boundary: MemoryBoundary<'a>) -> Option<PoolAllocator<'a>> {
        let element_size = boundary.element_size;
        let alignment = boundary.alignment.max(1);
        let offset = boundary.offset;
        if element_size < size_of::<usize>() || !alignment.is_power_of_two() {
            return None;
        }

        let stride = align_forward(element_size, alignment);
        let base = boundary.location().as_ptr() as usize;
        let first_slot_offset = align_forward(base + offset, alignment) - offset - base;
        let capacity = boundary.size().checked_sub(first_slot_offset)? / stride;
        if capacity == 0 {
            return None;
        }

        let pool = PoolAllocator {
            boundary,
            element_size,
            stride,
            alignment,
            offset,
            first_slot_offset,
            capacity,
            free_head: Cell::new(None),
            live_allocations: Cell::new(0),
        };
        pool.thread_free_list();
        Some(pool)
    }

    /// The memory needed for a pool of `count` elements, assuming the
    /// boundary's start is aligned and the offset is zero.
    pub const fn memory_size(element_size: usize, alignment: usize, count: usize) -> usize {
        align_forward(element_size, alignment) * count
    }

    /// The amount of elements the pool can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    fn slot(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.capacity);
        // Safety: index < capacity, and capacity was computed so that every
        // slot fits within the boundary.
        unsafe { self.boundary.at(self.first_slot_offset + index * self.stride) }
    }

    fn thread_free_list(&self) {
        for i in 0..self.capacity {
            let next = if i + 1 < self.capacity {
                Some(self.slot(i + 1))
            } else {
                None
            };
            // Safety: the slot is within the boundary and at least
            // size_of::<usize>() bytes, checked in the constructor.
            unsafe { write_at(self.slot(i), next) };
        }
        self.free_head.set(Some(self.slot(0)));
    }
}

impl Allocator for PoolAllocator<'_> {
    fn allocate(&self, size: usize, alignment: usize, offset: usize) -> Option<NonNull<u8>> {
        assert!(
            size <= self.element_size,
            "pool elements are {} bytes, can't allocate {size} bytes",
            self.element_size,
        );
        assert!(
            alignment <= self.alignment,
            "pool is aligned to {}, can't allocate with alignment {alignment}",
            self.alignment,
        );

        let slot = self.free_head.get()?;
        debug_assert_eq!(
            0,
            (slot.as_ptr() as usize + offset) % alignment.max(1),
            "allocation offset {offset} doesn't match the pool's offset {}",
            self.offset,
        );

        // Safety: free slots always contain the link to the next free slot,
        // written in thread_free_list or free.
        let next: Option<NonNull<u8>> = unsafe { read_at(slot) };
        self.free_head.set(next);
        self.live_allocations.set(self.live_allocations.get() + 1);
        Some(slot)
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        assert!(
            self.boundary.contains(ptr),
            "trying to free a pointer that's not from this pool",
        );
        debug_assert_eq!(
            0,
            (self.boundary.offset_of(ptr) - self.first_slot_offset) % self.stride,
            "trying to free a pointer that's not the start of a pool slot",
        );
        // Safety: the caller guarantees that ptr is an allocated slot, which
        // is at least size_of::<usize>() bytes, and nobody uses it anymore.
        unsafe { write_at(ptr, self.free_head.get()) };
        self.free_head.set(Some(ptr));
        self.live_allocations.set(self.live_allocations.get() - 1);
    }

    unsafe fn allocation_size(&self, _ptr: NonNull<u8>) -> u32 {
        self.element_size as u32
    }

    fn total_bytes_allocated(&self) -> usize {
        self.live_allocations.get() * self.stride
    }

    fn total_memory(&self) -> usize {
        self.capacity * self.stride
    }

    fn header_size(&self) -> u32 {
        0
    }

    fn num_allocations(&self) -> usize {
        self.live_allocations.get()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        allocators::{Allocator, MemoryArea},
        test_platform::TestPlatform,
    };

    use super::PoolAllocator;

    #[test]
    fn pool_exhaustion_is_not_fatal() {
        const N: usize = 10;
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 4096).unwrap();
        let boundary = area
            .add_sub_area(PoolAllocator::memory_size(32, 16, N))
            .unwrap()
            .with_elements(32, 16, 0);
        let pool = PoolAllocator::new(boundary).unwrap();
        assert_eq!(N, pool.capacity());

        let mut allocations = [None; N];
        for allocation in &mut allocations {
            *allocation = Some(pool.allocate(32, 16, 0).unwrap());
        }
        assert!(pool.allocate(32, 16, 0).is_none());

        unsafe { pool.free(allocations[3].take().unwrap()) };
        let reused = pool.allocate(16, 8, 0);
        assert!(reused.is_some());
        allocations[3] = reused;

        for allocation in allocations.into_iter().flatten() {
            unsafe { pool.free(allocation) };
        }
        assert_eq!(0, pool.total_bytes_allocated());
    }

    #[test]
    fn slots_respect_alignment_and_offset() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 4096).unwrap();
        let boundary = area.add_sub_area(1000).unwrap().with_elements(40, 32, 8);
        let pool = PoolAllocator::new(boundary).unwrap();
        let a = pool.allocate(40, 32, 8).unwrap();
        let b = pool.allocate(40, 32, 8).unwrap();
        assert_eq!(0, (a.as_ptr() as usize + 8) % 32);
        assert_eq!(0, (b.as_ptr() as usize + 8) % 32);
        assert_eq!(40, unsafe { pool.allocation_size(a) });
        unsafe {
            pool.free(a);
            pool.free(b);
        }
    }

    #[test]
    fn too_small_elements_are_rejected() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 128).unwrap();
        let boundary = area.add_sub_area(128).unwrap().with_elements(4, 4, 0);
        assert!(PoolAllocator::new(boundary).is_none());
    }
}
