// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{cell::Cell, fmt::Debug, ptr::NonNull};

use super::{
    check_no_outstanding_allocations,
    utils::{padding_for, read_at, write_at},
    Allocator, MemoryBoundary, PlacementPolicy,
};

/// Stored at the start of every free block. Blocks start at arbitrary
/// addresses, so these are always read and written unaligned.
#[derive(Clone, Copy)]
#[repr(C)]
struct FreeNode {
    block_size: usize,
    next: Option<NonNull<u8>>,
}

/// Stored right before the pointer returned to the user.
#[derive(Clone, Copy)]
#[repr(C)]
struct AllocationHeader {
    /// The size of the whole block, from the start of the free node it was
    /// carved from, to the end of the allocation.
    block_size: usize,
    /// The distance from the start of the block to the user pointer, i.e.
    /// alignment padding plus this header.
    padding: u32,
    /// The size requested by the user.
    size: u32,
}

const NODE_SIZE: usize = size_of::<FreeNode>();
const HEADER_SIZE: usize = size_of::<AllocationHeader>();

/// A general purpose allocator for variable-size allocations. The free blocks
/// are kept in an address-ordered singly linked list, and adjacent free blocks
/// are merged when memory is freed.
pub struct FreeListAllocator<'a> {
    boundary: MemoryBoundary<'a>,
    policy: PlacementPolicy,
    free_head: Cell<Option<NonNull<u8>>>,
    used: Cell<usize>,
    peak: Cell<usize>,
    live_allocations: Cell<usize>,
}

impl Debug for FreeListAllocator<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FreeListAllocator")
            .field("boundary", &self.boundary)
            .field("policy", &self.policy)
            .field("used", &self.used)
            .field("peak", &self.peak)
            .field("live_allocations", &self.live_allocations)
            .finish_non_exhaustive()
    }
}

impl Drop for FreeListAllocator<'_> {
    fn drop(&mut self) {
        check_no_outstanding_allocations("FreeListAllocator", self.live_allocations.get());
    }
}

/// A free block that an allocation fits in, and the node before it in the
/// list (for unlinking it).
struct Candidate {
    previous: Option<NonNull<u8>>,
    node: NonNull<u8>,
    block: FreeNode,
    padding: usize,
}

impl<'a> FreeListAllocator<'a> {
    /// Creates a free list allocator over the boundary, using the boundary's
    /// placement policy. Returns None if the boundary is too small to hold a
    /// single free block.
    pub fn new(boundary: MemoryBoundary<'a>) -> Option<FreeListAllocator<'a>> {
        if boundary.size() < NODE_SIZE + HEADER_SIZE {
            return None;
        }
        let policy = boundary.policy;
        let mut allocator = FreeListAllocator {
            boundary,
            policy,
            free_head: Cell::new(None),
            used: Cell::new(0),
            peak: Cell::new(0),
            live_allocations: Cell::new(0),
        };
        allocator.reset();
        Some(allocator)
    }

    /// Turns the whole boundary back into a single free block.
    ///
    /// The allocations are raw pointers, so the borrow checker can't see
    /// them: anything still pointing into the allocator's memory must not be
    /// used after this.
    pub fn reset(&mut self) {
        let start = self.boundary.location();
        let node = FreeNode {
            block_size: self.boundary.size(),
            next: None,
        };
        // Safety: the boundary is at least NODE_SIZE bytes, checked in new.
        unsafe { write_at(start, node) };
        self.free_head.set(Some(start));
        self.used.set(0);
        self.live_allocations.set(0);
    }

    /// The highest amount of bytes that has been in use at once.
    pub fn peak(&self) -> usize {
        self.peak.get()
    }

    pub fn policy(&self) -> PlacementPolicy {
        self.policy
    }

    /// Returns the free blocks as `(offset from boundary start, size)` pairs,
    /// in address order.
    pub fn free_blocks(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let mut current = self.free_head.get();
        core::iter::from_fn(move || {
            let node_ptr = current?;
            // Safety: every pointer in the free list points to a valid node.
            let node: FreeNode = unsafe { read_at(node_ptr) };
            current = node.next;
            Some((self.boundary.offset_of(node_ptr), node.block_size))
        })
    }

    fn padding_for_node(node: NonNull<u8>, alignment: usize, offset: usize) -> usize {
        padding_for(node, alignment, offset + HEADER_SIZE) + HEADER_SIZE
    }

    fn find_first(&self, size: usize, alignment: usize, offset: usize) -> Option<Candidate> {
        let mut previous = None;
        let mut current = self.free_head.get();
        while let Some(node) = current {
            // Safety: every pointer in the free list points to a valid node.
            let block: FreeNode = unsafe { read_at(node) };
            let padding = Self::padding_for_node(node, alignment, offset);
            if block.block_size >= size + padding {
                return Some(Candidate {
                    previous,
                    node,
                    block,
                    padding,
                });
            }
            previous = current;
            current = block.next;
        }
        None
    }

    fn find_best(&self, size: usize, alignment: usize, offset: usize) -> Option<Candidate> {
        let mut best: Option<Candidate> = None;
        let mut smallest_slack = usize::MAX;
        let mut previous = None;
        let mut current = self.free_head.get();
        while let Some(node) = current {
            // Safety: every pointer in the free list points to a valid node.
            let block: FreeNode = unsafe { read_at(node) };
            let padding = Self::padding_for_node(node, alignment, offset);
            let required = size + padding;
            if block.block_size >= required && block.block_size - required < smallest_slack {
                smallest_slack = block.block_size - required;
                // The node before the best candidate is needed to unlink it.
                best = Some(Candidate {
                    previous,
                    node,
                    block,
                    padding,
                });
            }
            previous = current;
            current = block.next;
        }
        best
    }

    /// Points `previous.next` (or the list head if there's no previous node)
    /// to `next`.
    ///
    /// ### Safety
    ///
    /// `previous` must be a node in the free list.
    unsafe fn link(&self, previous: Option<NonNull<u8>>, next: Option<NonNull<u8>>) {
        match previous {
            Some(previous) => {
                // Safety: guaranteed by the caller.
                let mut node: FreeNode = unsafe { read_at(previous) };
                node.next = next;
                unsafe { write_at(previous, node) };
            }
            None => self.free_head.set(next),
        }
    }

    fn is_adjacent(a: NonNull<u8>, a_size: usize, b: NonNull<u8>) -> bool {
        a.as_ptr() as usize + a_size == b.as_ptr() as usize
    }
}

impl Allocator for FreeListAllocator<'_> {
    fn allocate(&self, size: usize, alignment: usize, offset: usize) -> Option<NonNull<u8>> {
        if size > u32::MAX as usize {
            return None;
        }
        let alignment = alignment.max(1);

        let Candidate {
            previous,
            node,
            block,
            padding,
        } = match self.policy {
            PlacementPolicy::FindFirst => self.find_first(size, alignment, offset)?,
            PlacementPolicy::FindBest => self.find_best(size, alignment, offset)?,
        };

        let required = size + padding;
        let rest = block.block_size - required;
        let block_size = if rest >= NODE_SIZE {
            // Split: the rest of the block becomes a new free node in the
            // same position in the list.
            // Safety: `node + required + NODE_SIZE <= node + block_size`, all
            // within the free block.
            let rest_node = unsafe { node.add(required) };
            unsafe {
                write_at(
                    rest_node,
                    FreeNode {
                        block_size: rest,
                        next: block.next,
                    },
                );
                self.link(previous, Some(rest_node));
            }
            required
        } else {
            // The leftovers couldn't hold a free node, so they stay with this
            // allocation until it's freed.
            // Safety: `previous` is from the free list walk.
            unsafe { self.link(previous, block.next) };
            block.block_size
        };

        // Safety: `padding >= HEADER_SIZE`, and the header and the user data
        // fit within the block (`block_size >= size + padding`).
        let user_ptr = unsafe { node.add(padding) };
        unsafe {
            write_at(
                user_ptr.sub(HEADER_SIZE),
                AllocationHeader {
                    block_size,
                    padding: padding as u32,
                    size: size as u32,
                },
            )
        };

        let used = self.used.get() + block_size;
        self.used.set(used);
        self.peak.set(self.peak.get().max(used));
        self.live_allocations.set(self.live_allocations.get() + 1);

        Some(user_ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        assert!(
            self.boundary.contains(ptr),
            "trying to free a pointer that's not from this free list allocator",
        );

        // Safety: the caller guarantees ptr is a live allocation, and those
        // always have a header right before them.
        let header: AllocationHeader = unsafe { read_at(ptr.sub(HEADER_SIZE)) };
        let block_start = unsafe { ptr.sub(header.padding as usize) };
        let mut freed = FreeNode {
            block_size: header.block_size,
            next: None,
        };

        // Find the position in the address-ordered list.
        let mut previous: Option<NonNull<u8>> = None;
        let mut current = self.free_head.get();
        while let Some(node) = current {
            if node > block_start {
                break;
            }
            previous = current;
            // Safety: every pointer in the free list points to a valid node.
            current = unsafe { read_at::<FreeNode>(node) }.next;
        }

        // Coalesce with the next block.
        freed.next = current;
        if let Some(next) = current {
            if Self::is_adjacent(block_start, freed.block_size, next) {
                // Safety: next is a node in the free list.
                let next_node: FreeNode = unsafe { read_at(next) };
                freed.block_size += next_node.block_size;
                freed.next = next_node.next;
            }
        }

        // Coalesce with the previous block, or link the freed block in.
        // Safety: all the pointers are either the freed block (at least
        // NODE_SIZE bytes, since every block carved off a node is) or free
        // nodes.
        unsafe {
            match previous {
                Some(previous_ptr) => {
                    let mut previous_node: FreeNode = read_at(previous_ptr);
                    if Self::is_adjacent(previous_ptr, previous_node.block_size, block_start) {
                        previous_node.block_size += freed.block_size;
                        previous_node.next = freed.next;
                        write_at(previous_ptr, previous_node);
                    } else {
                        write_at(block_start, freed);
                        previous_node.next = Some(block_start);
                        write_at(previous_ptr, previous_node);
                    }
                }
                None => {
                    write_at(block_start, freed);
                    self.free_head.set(Some(block_start));
                }
            }
        }

        self.used.set(self.used.get() - header.block_size);
        self.live_allocations.set(self.live_allocations.get() - 1);
    }

    unsafe fn allocation_size(&self, ptr: NonNull<u8>) -> u32 {
        // Safety: the caller guarantees ptr is a live allocation.
        let header: AllocationHeader = unsafe { read_at(ptr.sub(HEADER_SIZE)) };
        header.size
    }

    fn total_bytes_allocated(&self) -> usize {
        self.used.get()
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
