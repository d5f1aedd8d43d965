// SPDX-FileCopyrightText: 2024 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{cell::Cell, fmt::Debug, ptr::NonNull};

use super::{
    check_no_outstanding_allocations,
    utils::{align_forward, read_at, write_at, Header},
    Allocator, MemoryBoundary,
};

const HEADER_SIZE: usize = size_of::<Header>();

/// A linear allocator with a constant capacity. Can allocate memory regions
/// with any size or alignment (within the capacity) very fast, but individual
/// allocations can't be freed to make more space: [`Allocator::free`] is a
/// no-op, and the memory is reclaimed all at once with
/// [`LinearAllocator::reset`].
///
/// Each allocation is preceded by a [`Header`] holding the requested size, so
/// [`Allocator::allocation_size`] works like it does for the other
/// allocators.
pub struct LinearAllocator<'a> {
    boundary: MemoryBoundary<'a>,
    /// Offset from the start of the boundary to the first unallocated byte.
    /// Only grows until [`LinearAllocator::reset`], so allocations never
    /// overlap.
    current: Cell<usize>,
    live_allocations: Cell<usize>,
}

impl Debug for LinearAllocator<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LinearAllocator")
            .field("boundary", &self.boundary)
            .field("current", &self.current)
            .field("live_allocations", &self.live_allocations)
            .finish()
    }
}

impl Drop for LinearAllocator<'_> {
    fn drop(&mut self) {
        check_no_outstanding_allocations("LinearAllocator", self.live_allocations.get());
    }
}

impl<'a> LinearAllocator<'a> {
    pub fn new(boundary: MemoryBoundary<'a>) -> LinearAllocator<'a> {
        LinearAllocator {
            boundary,
            current: Cell::new(0),
            live_allocations: Cell::new(0),
        }
    }

    /// Resets the linear allocator, reclaiming all of the backing memory for
    /// future allocations.
    ///
    /// This takes `&mut self` like the other resets in the engine, but the
    /// allocations are raw pointers, so the borrow checker can't see them:
    /// anything still pointing into the allocator's memory must not be used
    /// after this.
    pub fn reset(&mut self) {
        self.current.set(0);
        self.live_allocations.set(0);
    }

    pub fn boundary(&self) -> &MemoryBoundary<'a> {
        &self.boundary
    }
}

impl Allocator for LinearAllocator<'_> {
    fn allocate(&self, size: usize, alignment: usize, offset: usize) -> Option<NonNull<u8>> {
        if size > u32::MAX as usize {
            return None;
        }
        let alignment = alignment.max(1);

        // The header goes right before the user pointer, and `user pointer +
        // offset` needs to be aligned, so the header's position is picked
        // backwards from the aligned address.
        let current_address = self.boundary.location().as_ptr() as usize + self.current.get();
        let aligned_address = align_forward(current_address + offset + HEADER_SIZE, alignment);
        let header_address = aligned_address - offset - HEADER_SIZE;
        let header_offset = header_address - self.boundary.location().as_ptr() as usize;

        let new_current = header_offset
            .checked_add(HEADER_SIZE)?
            .checked_add(size)?;
        if new_current > self.boundary.size() {
            return None;
        }
        self.current.set(new_current);
        self.live_allocations.set(self.live_allocations.get() + 1);

        // Safety: `header_offset + HEADER_SIZE + size` is within the boundary
        // (checked above), and the region between the old and new `current`
        // offsets has not been handed out before (`current` only grows).
        unsafe {
            let header_ptr = self.boundary.at(header_offset);
            write_at(header_ptr, Header { size: size as u32 });
            Some(header_ptr.add(HEADER_SIZE))
        }
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        debug_assert!(
            self.boundary.contains(ptr) || ptr.as_ptr() as usize == self.boundary.end_address(),
            "trying to free a pointer that's not from this linear allocator",
        );
        // The memory is only reclaimed on reset.
        self.live_allocations
            .set(self.live_allocations.get().saturating_sub(1));
    }

    unsafe fn allocation_size(&self, ptr: NonNull<u8>) -> u32 {
        // Safety: the caller guarantees ptr is a live allocation of this
        // allocator, and each of those has a header right before it.
        let header: Header = unsafe { read_at(ptr.sub(HEADER_SIZE)) };
        header.size
    }

    fn total_bytes_allocated(&self) -> usize {
        self.current.get()
    }

    fn total_memory(&self) -> usize {
        self.boundary.size()
    }

    fn header_size(&self) -> u32 {
        HEADER_SIZE as u32
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

    use super::LinearAllocator;

    #[test]
    fn allocations_respect_alignment_and_offset() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 4096).unwrap();
        let mut alloc = LinearAllocator::new(area.add_sub_area(4000).unwrap());
        for alignment in [1, 2, 4, 8, 16, 32, 64] {
            for offset in [0, 4, 8, 12, 32] {
                let ptr = alloc.allocate(7, alignment, offset).unwrap();
                assert_eq!(0, (ptr.as_ptr() as usize + offset) % alignment);
                assert_eq!(7, unsafe { alloc.allocation_size(ptr) });
                unsafe { alloc.free(ptr) };
            }
        }
        alloc.reset();
    }

    #[test]
    fn allocations_do_not_overlap() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 1024).unwrap();
        let mut alloc = LinearAllocator::new(area.add_sub_area(1024).unwrap());
        let a = alloc.allocate(100, 8, 0).unwrap();
        let b = alloc.allocate(100, 8, 0).unwrap();
        let (a, b) = (a.as_ptr() as usize, b.as_ptr() as usize);
        assert!(a + 100 <= b);
        alloc.reset();
    }

    #[test]
    fn reset_reclaims_everything() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 256).unwrap();
        let mut alloc = LinearAllocator::new(area.add_sub_area(256).unwrap());
        assert!(alloc.allocate(200, 8, 0).is_some());
        assert!(alloc.allocate(200, 8, 0).is_none());
        assert!(alloc.total_bytes_allocated() > 200);

        alloc.reset();
        assert_eq!(0, alloc.total_bytes_allocated());
        assert!(alloc.allocate(200, 8, 0).is_some());
        alloc.reset();
    }
}
