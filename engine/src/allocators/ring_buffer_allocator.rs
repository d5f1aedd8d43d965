// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{cell::Cell, fmt::Debug, ptr::NonNull};

use super::{
    check_no_outstanding_allocations,
    utils::{align_forward, read_at, write_at},
    Allocator, MemoryBoundary,
};

/// Set in [`BlockHeader::len`] when the block has been freed.
const FREED_BLOCK: u32 = 1 << 31;

/// Written at the start of each block.
#[derive(Clone, Copy)]
#[repr(C)]
struct BlockHeader {
    /// The distance to the next block, with [`FREED_BLOCK`] or'd in after
    /// the block is freed.
    len: u32,
    /// The size requested by the user.
    size: u32,
}

const BLOCK_HEADER_SIZE: usize = size_of::<BlockHeader>();
/// The offset of the block's start from the start of the boundary is stored
/// right before the user pointer, the alignment padding is between that and
/// the [`BlockHeader`].
const BACK_OFFSET_SIZE: usize = size_of::<u32>();
const HEADER_SIZE: usize = BLOCK_HEADER_SIZE + BACK_OFFSET_SIZE;

/// An allocator for short-lived allocations that are freed in roughly the
/// order they were made, like per-frame scratch data or streaming buffers.
///
/// Allocations are made from a moving "allocate" offset, wrapping back to the
/// start of the memory when the end is reached. Freed memory becomes
/// available again when the "free" offset passes it, which happens when
/// every allocation older than it has been freed too. Freeing out of order is
/// fine, but a long-lived allocation holds back the reuse of everything
/// allocated after it.
pub struct RingBufferAllocator<'a> {
    boundary: MemoryBoundary<'a>,
    /// Offset of the first byte after the newest block.
    allocate_offset: Cell<usize>,
    /// Offset of the oldest block that hasn't been freed.
    free_offset: Cell<usize>,
    /// When the allocations have wrapped around, this is where the blocks
    /// before the wrap end.
    wrap_offset: Cell<Option<usize>>,
    live_allocations: Cell<usize>,
}

impl Debug for RingBufferAllocator<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RingBufferAllocator")
            .field("boundary", &self.boundary)
            .field("allocate_offset", &self.allocate_offset)
            .field("free_offset", &self.free_offset)
            .field("wrap_offset", &self.wrap_offset)
            .field("live_allocations", &self.live_allocations)
            .finish()
    }
}

impl Drop for RingBufferAllocator<'_> {
    fn drop(&mut self) {
        check_no_outstanding_allocations("RingBufferAllocator", self.live_allocations.get());
    }
}

impl<'a> RingBufferAllocator<'a> {
    pub fn new(boundary: MemoryBoundary<'a>) -> RingBufferAllocator<'a> {
        RingBufferAllocator {
            boundary,
            allocate_offset: Cell::new(0),
            free_offset: Cell::new(0),
            wrap_offset: Cell::new(None),
            live_allocations: Cell::new(0),
        }
    }

    pub fn boundary(&self) -> &MemoryBoundary<'a> {
        &self.boundary
    }

    /// Returns the offsets of the user pointer and the end of a block
    /// starting at `block_start`.
    fn fit(
        &self,
        block_start: usize,
        size: usize,
        alignment: usize,
        offset: usize,
    ) -> Option<(usize, usize)> {
        let base = self.boundary.location().as_ptr() as usize;
        let aligned_address = align_forward(base + block_start + offset + HEADER_SIZE, alignment);
        let data_offset = aligned_address - offset - base;
        let block_end = data_offset.checked_add(size)?;
        Some((data_offset, block_end))
    }

    /// Moves the free offset over the freed blocks at the front of the ring.
    fn release_freed_blocks(&self) {
        if self.live_allocations.get() == 0 {
            self.allocate_offset.set(0);
            self.free_offset.set(0);
            self.wrap_offset.set(None);
            return;
        }
        loop {
            let free_offset = self.free_offset.get();
            if self.wrap_offset.get() == Some(free_offset) {
                self.free_offset.set(0);
                self.wrap_offset.set(None);
                continue;
            }
            // Safety: there's a live allocation between the free and
            // allocate offsets, so there's a block header at free_offset.
            let header: BlockHeader = unsafe { read_at(self.boundary.at(free_offset)) };
            if header.len & FREED_BLOCK == 0 {
                break;
            }
            self.free_offset
                .set(free_offset + (header.len & !FREED_BLOCK) as usize);
        }
    }
}

impl Allocator for RingBufferAllocator<'_> {
    fn allocate(&self, size: usize, alignment: usize, offset: usize) -> Option<NonNull<u8>> {
        let size_u32 = u32::try_from(size).ok()?;
        let alignment = alignment.max(1);
        let capacity = self.boundary.size();
        let allocate_offset = self.allocate_offset.get();
        let free_offset = self.free_offset.get();

        let (block_start, data_offset, block_end, wraps) = if self.live_allocations.get() == 0 {
            let (data_offset, block_end) = self.fit(0, size, alignment, offset)?;
            (0, data_offset, block_end, false)
        } else if self.wrap_offset.get().is_some() || allocate_offset == free_offset {
            // The free space is between the allocate and free offsets.
            let (data_offset, block_end) = self.fit(allocate_offset, size, alignment, offset)?;
            if block_end > free_offset {
                return None;
            }
            (allocate_offset, data_offset, block_end, false)
        } else {
            // The free space is after the allocate offset, and before the
            // free offset after wrapping around.
            let (data_offset, block_end) = self.fit(allocate_offset, size, alignment, offset)?;
            if block_end <= capacity {
                (allocate_offset, data_offset, block_end, false)
            } else {
                let (data_offset, block_end) = self.fit(0, size, alignment, offset)?;
                if block_end > free_offset {
                    return None;
                }
                (0, data_offset, block_end, true)
            }
        };
        if block_end > capacity {
            return None;
        }
        let block_len = u32::try_from(block_end - block_start).ok()?;
        if block_len & FREED_BLOCK != 0 {
            return None;
        }
        let block_start_u32 = u32::try_from(block_start).ok()?;

        if wraps {
            self.wrap_offset.set(Some(allocate_offset));
        }
        self.allocate_offset.set(block_end);
        self.live_allocations.set(self.live_allocations.get() + 1);

        // Safety: the block is within the boundary (checked above), and it's
        // between the allocate and free offsets, so no live allocation
        // overlaps it. The header and back offset fit before data_offset
        // because `fit` reserved HEADER_SIZE in front of it.
        unsafe {
            write_at(
                self.boundary.at(block_start),
                BlockHeader {
                    len: block_len,
                    size: size_u32,
                },
            );
            write_at(self.boundary.at(data_offset - BACK_OFFSET_SIZE), block_start_u32);
            Some(self.boundary.at(data_offset))
        }
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        debug_assert!(
            self.boundary.contains(ptr) || ptr.as_ptr() as usize == self.boundary.end_address(),
            "trying to free a pointer that's not from this ring buffer allocator",
        );
        // Safety: the caller guarantees ptr is a live allocation of this
        // allocator, and each of those has the block's offset right before
        // it and the block header at that offset.
        unsafe {
            let block_start: u32 = read_at(ptr.sub(BACK_OFFSET_SIZE));
            let header_ptr = self.boundary.at(block_start as usize);
            let mut header: BlockHeader = read_at(header_ptr);
            assert!(
                header.len & FREED_BLOCK == 0,
                "freeing an already freed ring buffer allocation at {ptr:p}",
            );
            header.len |= FREED_BLOCK;
            write_at(header_ptr, header);
        }
        self.live_allocations.set(self.live_allocations.get() - 1);
        self.release_freed_blocks();
    }

    unsafe fn allocation_size(&self, ptr: NonNull<u8>) -> u32 {
        // Safety: see free.
        unsafe {
            let block_start: u32 = read_at(ptr.sub(BACK_OFFSET_SIZE));
            let header: BlockHeader = read_at(self.boundary.at(block_start as usize));
            header.size
        }
    }

    /// Includes freed blocks the free offset hasn't passed yet.
    fn total_bytes_allocated(&self) -> usize {
        if self.live_allocations.get() == 0 {
            return 0;
        }
        let allocate_offset = self.allocate_offset.get();
        let free_offset = self.free_offset.get();
        match self.wrap_offset.get() {
            Some(wrap_offset) => wrap_offset - free_offset + allocate_offset,
            None => allocate_offset - free_offset,
        }
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

    use super::RingBufferAllocator;

    #[test]
    fn allocations_respect_alignment_and_offset() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 4096).unwrap();
        let ring = RingBufferAllocator::new(area.add_sub_area(4000).unwrap());
        for alignment in [1, 2, 4, 8, 16, 32, 64] {
            for offset in [0, 4, 8, 12, 32] {
                let ptr = ring.allocate(7, alignment, offset).unwrap();
                assert_eq!(0, (ptr.as_ptr() as usize + offset) % alignment);
                assert_eq!(7, unsafe { ring.allocation_size(ptr) });
                unsafe { ring.free(ptr) };
            }
        }
        assert_eq!(0, ring.total_bytes_allocated());
    }

    #[test]
    fn allocations_wrap_around_after_the_oldest_are_freed() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 256).unwrap();
        let ring = RingBufferAllocator::new(area.add_sub_area(256).unwrap());
        // Each block is 12 header bytes and 64 data bytes.
        let a = ring.allocate(64, 4, 0).unwrap();
        let b = ring.allocate(64, 4, 0).unwrap();
        let c = ring.allocate(64, 4, 0).unwrap();
        assert_eq!(3 * 76, ring.total_bytes_allocated());
        assert!(ring.allocate(64, 4, 0).is_none());

        unsafe { ring.free(a) };
        let d = ring.allocate(64, 4, 0).unwrap();
        assert_eq!(a, d);
        assert!(d < b && b < c);
        // The 28 bytes after c are skipped, and d is the only block after the
        // wrap.
        assert_eq!(3 * 76, ring.total_bytes_allocated());
        assert!(ring.allocate(1, 1, 0).is_none());

        unsafe {
            ring.free(b);
            ring.free(c);
        }
        assert_eq!(76, ring.total_bytes_allocated());
        let e = ring.allocate(64, 4, 0).unwrap();
        assert!(d < e);
        unsafe {
            ring.free(d);
            ring.free(e);
        }
        assert_eq!(0, ring.total_bytes_allocated());
        assert_eq!(0, ring.num_allocations());
    }

    #[test]
    fn out_of_order_frees_are_reclaimed_with_the_oldest() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 256).unwrap();
        let ring = RingBufferAllocator::new(area.add_sub_area(256).unwrap());
        let a = ring.allocate(64, 4, 0).unwrap();
        let b = ring.allocate(64, 4, 0).unwrap();
        let c = ring.allocate(64, 4, 0).unwrap();

        unsafe { ring.free(b) };
        assert_eq!(2, ring.num_allocations());
        assert_eq!(3 * 76, ring.total_bytes_allocated());
        assert!(ring.allocate(64, 4, 0).is_none());

        unsafe { ring.free(a) };
        assert_eq!(76, ring.total_bytes_allocated());
        let d = ring.allocate(64, 4, 0).unwrap();
        let e = ring.allocate(64, 4, 0).unwrap();
        assert!(d < e && e < c);
        unsafe {
            ring.free(c);
            ring.free(d);
            ring.free(e);
        }
        assert_eq!(0, ring.total_bytes_allocated());
    }

    #[test]
    #[should_panic(expected = "already freed")]
    fn double_frees_are_detected() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 256).unwrap();
        let ring = RingBufferAllocator::new(area.add_sub_area(256).unwrap());
        let a = ring.allocate(16, 4, 0).unwrap();
        let _b = ring.allocate(16, 4, 0).unwrap();
        unsafe {
            ring.free(a);
            ring.free(a);
        }
    }

    #[test]
    fn arenas_stream_through_the_ring() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 1024).unwrap();
        let arena: Arena<RingBufferAllocator, BasicBoundsChecking, BasicMemoryTracking> =
            Arena::new(RingBufferAllocator::new(area.add_sub_area(1024).unwrap()));
        assert_eq!(4 + 12, arena.header_size());
        let mut previous = arena.alloc_slice_default::<u32>(32).unwrap();
        for i in 0..100u32 {
            let mut next = arena.alloc_slice_default::<u32>(32).unwrap();
            next[0] = i;
            drop(previous);
            previous = next;
        }
        assert_eq!(99, previous[0]);
        drop(previous);
        assert_eq!(0, arena.num_allocations());
    }
}
