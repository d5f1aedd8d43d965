// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{cell::Cell, fmt::Debug, ptr::NonNull};

use super::{
    check_no_outstanding_allocations,
    utils::{align_forward, read_at, write_at},
    Allocator, MemoryBoundary,
};

/// Stored right before the pointer returned to the user.
#[derive(Clone, Copy)]
#[repr(C)]
struct StackHeader {
    /// The size requested by the user.
    size: u32,
    /// The top of the stack before this allocation, which is where the top
    /// goes back to when this allocation is freed.
    previous_top: u32,
    /// The amount of allocations below this one in the stack.
    allocation_id: u32,
}

const HEADER_SIZE: usize = size_of::<StackHeader>();

/// A linear allocator whose allocations can be freed, as long as they're
/// freed in the reverse order of allocation. Freeing moves the top of the
/// stack back to where it was before the freed allocation, so the memory is
/// immediately reusable.
///
/// Freeing out of order is a bug, and panics.
pub struct StackAllocator<'a> {
    boundary: MemoryBoundary<'a>,
    /// Offset from the start of the boundary to the first unallocated byte.
    top: Cell<usize>,
    live_allocations: Cell<usize>,
}

impl Debug for StackAllocator<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StackAllocator")
            .field("boundary", &self.boundary)
            .field("top", &self.top)
            .field("live_allocations", &self.live_allocations)
            .finish()
    }
}

impl Drop for StackAllocator<'_> {
    fn drop(&mut self) {
        check_no_outstanding_allocations("StackAllocator", self.live_allocations.get());
    }
}

impl<'a> StackAllocator<'a> {
    pub fn new(boundary: MemoryBoundary<'a>) -> StackAllocator<'a> {
        StackAllocator {
            boundary,
            top: Cell::new(0),
            live_allocations: Cell::new(0),
        }
    }

    pub fn boundary(&self) -> &MemoryBoundary<'a> {
        &self.boundary
    }
}

impl Allocator for StackAllocator<'_> {
    fn allocate(&self, size: usize, alignment: usize, offset: usize) -> Option<NonNull<u8>> {
        let size_u32 = u32::try_from(size).ok()?;
        let previous_top = self.top.get();
        let previous_top_u32 = u32::try_from(previous_top).ok()?;
        let allocation_id = u32::try_from(self.live_allocations.get()).ok()?;
        let alignment = alignment.max(1);

        let base = self.boundary.location().as_ptr() as usize;
        let aligned_address = align_forward(base + previous_top + offset + HEADER_SIZE, alignment);
        let header_offset = aligned_address - offset - HEADER_SIZE - base;
        let new_top = header_offset.checked_add(HEADER_SIZE)?.checked_add(size)?;
        if new_top > self.boundary.size() {
            return None;
        }
        self.top.set(new_top);
        self.live_allocations.set(self.live_allocations.get() + 1);

        // Safety: `header_offset + HEADER_SIZE + size` is within the boundary
        // (checked above), and everything past the old top is unallocated.
        unsafe {
            let header_ptr = self.boundary.at(header_offset);
            write_at(
                header_ptr,
                StackHeader {
                    size: size_u32,
                    previous_top: previous_top_u32,
                    allocation_id,
                },
            );
            Some(header_ptr.add(HEADER_SIZE))
        }
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        debug_assert!(
            self.boundary.contains(ptr) || ptr.as_ptr() as usize == self.boundary.end_address(),
            "trying to free a pointer that's not from this stack allocator",
        );
        // Safety: the caller guarantees ptr is a live allocation of this
        // allocator, and each of those has a header right before it.
        let header: StackHeader = unsafe { read_at(ptr.sub(HEADER_SIZE)) };
        let live = self.live_allocations.get();
        assert!(
            header.allocation_id as usize + 1 == live,
            "stack allocations must be freed in reverse order: freed {}, but the newest is {}",
            header.allocation_id,
            live.wrapping_sub(1),
        );
        self.top.set(header.previous_top as usize);
        self.live_allocations.set(live - 1);
    }

    unsafe fn allocation_size(&self, ptr: NonNull<u8>) -> u32 {
        // Safety: see free.
        let header: StackHeader = unsafe { read_at(ptr.sub(HEADER_SIZE)) };
        header.size
    }

    fn total_bytes_allocated(&self) -> usize {
        self.top.get()
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
        allocators::{
            Allocator, Arena, BasicBoundsChecking, BasicMemoryTracking, MemoryArea, MemoryArena,
        },
        test_platform::TestPlatform,
    };

    use super::StackAllocator;

    #[test]
    fn allocations_respect_alignment_and_offset() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 4096).unwrap();
        let stack = StackAllocator::new(area.add_sub_area(4000).unwrap());
        for alignment in [1, 2, 4, 8, 16, 32, 64] {
            for offset in [0, 4, 8, 12, 32] {
                let ptr = stack.allocate(7, alignment, offset).unwrap();
                assert_eq!(0, (ptr.as_ptr() as usize + offset) % alignment);
                assert_eq!(7, unsafe { stack.allocation_size(ptr) });
                unsafe { stack.free(ptr) };
                assert_eq!(0, stack.total_bytes_allocated());
            }
        }
    }

    #[test]
    fn frees_rewind_the_top() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 1024).unwrap();
        let stack = StackAllocator::new(area.add_sub_area(256).unwrap());
        let a = stack.allocate(100, 8, 0).unwrap();
        let after_a = stack.total_bytes_allocated();
        let b = stack.allocate(100, 8, 0).unwrap();
        assert!(a.as_ptr() as usize + 100 <= b.as_ptr() as usize);
        assert!(stack.allocate(100, 8, 0).is_none());

        unsafe { stack.free(b) };
        assert_eq!(after_a, stack.total_bytes_allocated());
        let c = stack.allocate(100, 8, 0).unwrap();
        assert_eq!(b, c);
        unsafe {
            stack.free(c);
            stack.free(a);
        }
        assert_eq!(0, stack.total_bytes_allocated());
        assert_eq!(0, stack.num_allocations());
    }

    #[test]
    #[should_panic(expected = "reverse order")]
    fn out_of_order_frees_are_detected() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 1024).unwrap();
        let stack = StackAllocator::new(area.add_sub_area(1024).unwrap());
        let a = stack.allocate(16, 8, 0).unwrap();
        let _b = stack.allocate(16, 8, 0).unwrap();
        unsafe { stack.free(a) };
    }

    #[test]
    fn arenas_free_in_stack_order() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 4096).unwrap();
        let arena: Arena<StackAllocator, BasicBoundsChecking, BasicMemoryTracking> =
            Arena::new(StackAllocator::new(area.add_sub_area(4096).unwrap()));
        assert_eq!(4 + 12, arena.header_size());
        {
            let outer = arena.alloc(1u64).unwrap();
            let inner = arena.alloc_slice_default::<u32>(10).unwrap();
            assert_eq!(2, arena.num_allocations());
            drop(inner);
            drop(outer);
        }
        assert_eq!(0, arena.total_bytes_allocated());
    }
}
