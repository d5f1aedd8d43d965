// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{cell::Cell, fmt::Debug, marker::PhantomData, ptr::NonNull};

use platform_abstraction_layer::Pal;

use super::utils::align_forward;

/// Which free block [`FreeListAllocator`] picks for an allocation.
///
/// [`FreeListAllocator`]: super::FreeListAllocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlacementPolicy {
    /// The first block (in address order) that the allocation fits in.
    #[default]
    FindFirst,
    /// The block that leaves the least amount of unused space.
    FindBest,
}

/// A region of memory, not yet owned by any allocator. Allocators are
/// constructed over one of these, and borrow the region for `'a`.
///
/// Besides the location, the boundary carries the parameters some allocators
/// need: the element size, alignment and offset of a
/// [`PoolAllocator`](super::PoolAllocator), and the placement policy of a
/// [`FreeListAllocator`](super::FreeListAllocator).
///
/// A boundary is moved into the allocator constructed over it, so each
/// region backs at most one allocator:
///
/// ```compile_fail
/// use engine::allocators::{LinearAllocator, MemoryBoundary};
/// let mut memory = [0u8; 64];
/// let boundary = MemoryBoundary::from_slice(&mut memory);
/// let a = LinearAllocator::new(boundary);
/// let b = LinearAllocator::new(boundary);
/// ```
pub struct MemoryBoundary<'a> {
    location: NonNull<u8>,
    size: usize,
    pub alignment: usize,
    pub element_size: usize,
    pub offset: usize,
    pub policy: PlacementPolicy,
    _memory: PhantomData<&'a mut [u8]>,
}

impl Debug for MemoryBoundary<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryBoundary")
            .field("location", &self.location)
            .field("size", &self.size)
            .field("alignment", &self.alignment)
            .field("element_size", &self.element_size)
            .field("offset", &self.offset)
            .field("policy", &self.policy)
            .finish()
    }
}

impl<'a> MemoryBoundary<'a> {
    /// Creates a boundary over the given slice. The slice is borrowed for as
    /// long as the boundary (and anything constructed over it) lives.
    pub fn from_slice(memory: &'a mut [u8]) -> MemoryBoundary<'a> {
        let size = memory.len().min(isize::MAX as usize);
        assert!(size > 0, "memory boundaries can't be empty");
        // Safety: the slice is valid and exclusively borrowed for 'a.
        unsafe { MemoryBoundary::from_raw_parts(NonNull::from(memory).cast::<u8>(), size) }
    }

    /// Creates a boundary over `size` bytes starting at `location`.
    ///
    /// ### Safety
    ///
    /// The memory must be valid for reads and writes, and it must not be
    /// accessed through any other pointer, for `'a`.
    pub unsafe fn from_raw_parts(location: NonNull<u8>, size: usize) -> MemoryBoundary<'a> {
        assert!(size > 0, "memory boundaries can't be empty");
        assert!(size <= isize::MAX as usize);
        MemoryBoundary {
            location,
            size,
            alignment: 1,
            element_size: 0,
            offset: 0,
            policy: PlacementPolicy::FindFirst,
            _memory: PhantomData,
        }
    }

    /// Sets up the pool parameters of this boundary: `element_size` bytes per
    /// element, where every element pointer plus `offset` is a multiple of
    /// `alignment`.
    pub fn with_elements(self, element_size: usize, alignment: usize, offset: usize) -> Self {
        MemoryBoundary {
            element_size,
            alignment,
            offset,
            ..self
        }
    }

    pub fn with_policy(self, policy: PlacementPolicy) -> Self {
        MemoryBoundary { policy, ..self }
    }

    pub fn location(&self) -> NonNull<u8> {
        self.location
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns true if `ptr` points inside this boundary.
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        let start = self.location.as_ptr() as usize;
        let address = ptr.as_ptr() as usize;
        address >= start && address < start + self.size
    }

    /// The offset of `ptr` from the start of the boundary. `ptr` must be
    /// inside the boundary.
    pub(crate) fn offset_of(&self, ptr: NonNull<u8>) -> usize {
        debug_assert!(self.contains(ptr) || ptr.as_ptr() as usize == self.end_address());
        ptr.as_ptr() as usize - self.location.as_ptr() as usize
    }

    pub(crate) fn end_address(&self) -> usize {
        self.location.as_ptr() as usize + self.size
    }

    /// Returns the pointer `offset` bytes from the start of the boundary.
    ///
    /// ### Safety
    ///
    /// `offset` must be less or equal to the size of the boundary.
    pub(crate) unsafe fn at(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset <= self.size);
        // Safety: guaranteed by the caller, the resulting pointer is within
        // (or one past the end of) the region.
        unsafe { self.location.add(offset) }
    }
}

/// Alignment of the boundaries handed out by [`MemoryArea::add_sub_area`].
pub const SUB_AREA_ALIGNMENT: usize = 64;

/// One big chunk of memory from the platform, split up into sub-areas which
/// are handed out as [`MemoryBoundary`]s for allocators.
///
/// Sub-areas are never returned to the area individually: the whole chunk is
/// freed when the area is dropped, which can't happen while any of the
/// boundaries (and the allocators constructed over them) are alive.
pub struct MemoryArea<'platform> {
    platform: &'platform dyn Pal,
    backing_mem_ptr: NonNull<u8>,
    backing_mem_size: usize,
    allocated: Cell<usize>,
    sub_areas: Cell<usize>,
}

impl Debug for MemoryArea<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryArea")
            .field("backing_mem_ptr", &self.backing_mem_ptr)
            .field("backing_mem_size", &self.backing_mem_size)
            .field("allocated", &self.allocated)
            .field("sub_areas", &self.sub_areas)
            .finish_non_exhaustive()
    }
}

impl Drop for MemoryArea<'_> {
    fn drop(&mut self) {
        // Safety: the boundaries dealt out by this area borrow it, so since
        // we're in the Drop impl, there's no boundaries left, i.e. nobody is
        // using the memory anymore. The size matches the malloc call.
        unsafe {
            self.platform
                .free(self.backing_mem_ptr.as_ptr().cast(), self.backing_mem_size)
        };
    }
}

impl<'platform> MemoryArea<'platform> {
    /// Allocates `capacity` bytes from the platform for sub-areas. Returns
    /// None if allocating fails or if `capacity` overflows `isize`.
    pub fn new(platform: &'platform dyn Pal, capacity: usize) -> Option<MemoryArea<'platform>> {
        if capacity == 0 || capacity > isize::MAX as usize {
            return None;
        }
        let backing_mem_ptr = NonNull::new(platform.malloc(capacity).cast::<u8>())?;
        Some(MemoryArea {
            platform,
            backing_mem_ptr,
            backing_mem_size: capacity,
            allocated: Cell::new(0),
            sub_areas: Cell::new(0),
        })
    }

    /// Carves a new `size`-byte boundary out of the unallocated part of the
    /// area. Returns None if the area doesn't have enough space left.
    pub fn add_sub_area(&self, size: usize) -> Option<MemoryBoundary<'_>> {
        if size == 0 {
            return None;
        }
        let base = self.backing_mem_ptr.as_ptr() as usize;
        let start = align_forward(base + self.allocated.get(), SUB_AREA_ALIGNMENT) - base;
        let end = start.checked_add(size)?;
        if end > self.backing_mem_size {
            tracing::error!(
                "memory area out of space: requested {size} bytes, {} left",
                self.unallocated_bytes()
            );
            return None;
        }

        // The allocated offset only grows while the area is immutably
        // borrowed, so the regions dealt out never overlap.
        self.allocated.set(end);
        self.sub_areas.set(self.sub_areas.get() + 1);

        // Safety:
        // - `start..end` is within the malloc'd chunk, checked above.
        // - The region is not handed out again, since `allocated` was bumped
        //   past it, and the chunk is not freed before the returned boundary's
        //   borrow of self ends.
        unsafe {
            let location = self.backing_mem_ptr.add(start);
            Some(MemoryBoundary::from_raw_parts(location, size))
        }
    }

    /// The amount of bytes not yet handed out as sub-areas.
    pub fn unallocated_bytes(&self) -> usize {
        self.backing_mem_size - self.allocated.get()
    }

    pub fn total_bytes(&self) -> usize {
        self.backing_mem_size
    }

    pub fn num_sub_areas(&self) -> usize {
        self.sub_areas.get()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        allocators::{Allocator, LinearAllocator},
        test_platform::TestPlatform,
    };

    use super::{MemoryArea, MemoryBoundary, SUB_AREA_ALIGNMENT};

    #[test]
    fn sub_areas_do_not_overlap() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 1000).unwrap();
        let a = area.add_sub_area(100).unwrap();
        let b = area.add_sub_area(100).unwrap();
        assert_eq!(0, a.location().as_ptr() as usize % SUB_AREA_ALIGNMENT);
        assert_eq!(0, b.location().as_ptr() as usize % SUB_AREA_ALIGNMENT);
        assert!(!a.contains(b.location()));
        assert!(!b.contains(a.location()));
        assert_eq!(2, area.num_sub_areas());
    }

    #[test]
    fn running_out_of_area_fails_gracefully() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 256).unwrap();
        assert!(area.add_sub_area(200).is_some());
        assert!(area.add_sub_area(100).is_none());
        assert!(area.unallocated_bytes() < 100);
    }

    #[test]
    fn one_sub_area_backs_one_allocator() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 1024).unwrap();
        let first = LinearAllocator::new(area.add_sub_area(256).unwrap());
        let second = LinearAllocator::new(area.add_sub_area(256).unwrap());
        let a = first.allocate(8, 8, 0).unwrap();
        let b = second.allocate(8, 8, 0).unwrap();
        assert_ne!(a, b);
        assert!(!first.boundary().contains(b));
        assert!(!second.boundary().contains(a));
        unsafe {
            a.cast::<u64>().write(1);
            b.cast::<u64>().write(2);
            assert_eq!(1, a.cast::<u64>().read());
            first.free(a);
            second.free(b);
        }
    }

    #[test]
    fn boundary_from_slice_covers_the_slice() {
        let mut memory = [0u8; 32];
        let boundary = MemoryBoundary::from_slice(&mut memory);
        assert_eq!(32, boundary.size());
        assert!(boundary.contains(boundary.location()));
    }
}
