// SPDX-FileCopyrightText: 2024 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

mod arena;
mod boundary;
mod free_list_allocator;
mod linear_allocator;
mod malloc_allocator;
mod pool_allocator;
mod ring_buffer_allocator;
mod stack_allocator;
pub mod utils;

use core::ptr::NonNull;

pub use arena::{
    Arena, ArenaBox, BasicBoundsChecking, BasicMemoryTracking, BoundsChecking,
    DefaultBoundsChecking, DefaultMemoryTracking, FreeListArena, LinearArena, MallocArena,
    MemoryArena, MemoryTracking, NoBoundsChecking, NoMemoryTracking, PoolArena, RingBufferArena,
    StackArena,
};
pub use boundary::{MemoryArea, MemoryBoundary, PlacementPolicy, SUB_AREA_ALIGNMENT};
pub use utils::MemoryProperties;
pub use free_list_allocator::FreeListAllocator;
pub use linear_allocator::LinearAllocator;
pub use malloc_allocator::MallocAllocator;
pub use pool_allocator::PoolAllocator;
pub use ring_buffer_allocator::RingBufferAllocator;
pub use stack_allocator::StackAllocator;

/// The interface shared by all the allocators: serving
/// `allocate(size, alignment, offset)` requests out of some memory.
///
/// Allocation happens through a shared borrow, the allocators keep their
/// bookkeeping in [`Cell`](core::cell::Cell)s. They're meant to be owned and
/// used by one thread at a time, so none of them are [`Sync`].
pub trait Allocator {
    /// Allocates at least `size` bytes, such that `returned pointer + offset`
    /// is a multiple of `alignment`. Returns None if the allocator can't fit
    /// the allocation.
    ///
    /// The `offset` is for callers that write their own data in front of the
    /// allocation (like the bounds checking guards of [`Arena`]) and want the
    /// memory *after* that to be aligned.
    fn allocate(&self, size: usize, alignment: usize, offset: usize) -> Option<NonNull<u8>>;

    /// Releases an allocation. Does nothing for allocators which can only
    /// release everything at once.
    ///
    /// ### Safety
    ///
    /// `ptr` must have been returned by [`Allocator::allocate`] of this
    /// allocator, it must not have been freed already, and the memory must not
    /// be accessed after this call.
    unsafe fn free(&self, ptr: NonNull<u8>);

    /// Returns the size originally requested for the allocation, read from
    /// the allocation's header.
    ///
    /// ### Safety
    ///
    /// `ptr` must be a live allocation of this allocator.
    unsafe fn allocation_size(&self, ptr: NonNull<u8>) -> u32;

    /// The amount of bytes currently reserved by live allocations, including
    /// headers and padding.
    fn total_bytes_allocated(&self) -> usize;

    /// The total amount of memory this allocator manages.
    fn total_memory(&self) -> usize;

    /// The amount of bytes that are not reserved by anything.
    fn unallocated_bytes(&self) -> usize {
        self.total_memory() - self.total_bytes_allocated()
    }

    /// The size of the bookkeeping data the allocator stores with each
    /// allocation.
    fn header_size(&self) -> u32;

    /// The amount of allocations that haven't been freed yet.
    fn num_allocations(&self) -> usize;
}

/// Called from the allocators' Drop impls: dropping an allocator with live
/// allocations is a bug, as those allocations point to memory the allocator
/// (or its boundary) is about to give away.
fn check_no_outstanding_allocations(allocator_name: &str, live_allocations: usize) {
    #[cfg(any(test, feature = "std"))]
    if std::thread::panicking() {
        // Don't turn a failing test into an abort.
        return;
    }
    debug_assert!(
        live_allocations == 0,
        "{allocator_name} dropped with {live_allocations} allocations still live",
    );
    let _ = (allocator_name, live_allocations);
}
