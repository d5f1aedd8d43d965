// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{alloc::Layout, cell::Cell, fmt::Debug, ptr::NonNull};

use super::{
    check_no_outstanding_allocations,
    utils::{align_forward, read_at, write_at},
    Allocator,
};

#[derive(Clone, Copy)]
#[repr(C)]
struct MallocHeader {
    size: usize,
    /// Distance from the start of the system allocation to the user pointer.
    front: usize,
    layout_size: usize,
    layout_align: usize,
}

const HEADER_SIZE: usize = size_of::<MallocHeader>();

/// An allocator which passes every allocation on to the global allocator,
/// keeping a header with each allocation for the size bookkeeping. Useful for
/// tools and for memory with no sensible upper bound.
pub struct MallocAllocator {
    used: Cell<usize>,
    peak: Cell<usize>,
    live_allocations: Cell<usize>,
}

impl Debug for MallocAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MallocAllocator")
            .field("used", &self.used)
            .field("peak", &self.peak)
            .field("live_allocations", &self.live_allocations)
            .finish()
    }
}

impl Drop for MallocAllocator {
    fn drop(&mut self) {
        check_no_outstanding_allocations("MallocAllocator", self.live_allocations.get());
    }
}

impl Default for MallocAllocator {
    fn default() -> Self {
        MallocAllocator::new()
    }
}

impl MallocAllocator {
    pub const fn new() -> MallocAllocator {
        MallocAllocator {
            used: Cell::new(0),
            peak: Cell::new(0),
            live_allocations: Cell::new(0),
        }
    }

    /// The highest amount of requested bytes live at once.
    pub fn peak(&self) -> usize {
        self.peak.get()
    }
}

impl Allocator for MallocAllocator {
    fn allocate(&self, size: usize, alignment: usize, offset: usize) -> Option<NonNull<u8>> {
        if size > u32::MAX as usize {
            return None;
        }
        let alignment = alignment.max(1);
        let layout_align = alignment.max(align_of::<MallocHeader>());
        let layout_size = HEADER_SIZE + offset + size + alignment;
        let layout = Layout::from_size_align(layout_size, layout_align).ok()?;

        // Safety: layout_size is never zero, it always includes the header.
        let base = NonNull::new(unsafe { alloc::alloc::alloc(layout) })?;

        let base_address = base.as_ptr() as usize;
        let user_address = align_forward(base_address + HEADER_SIZE + offset, alignment) - offset;
        let front = user_address - base_address;

        // Safety: `front <= HEADER_SIZE + alignment - 1`, so the user pointer
        // and `size` bytes after it fit in the layout, and the header fits
        // between the base and the user pointer.
        let user_ptr = unsafe { base.add(front) };
        unsafe {
            write_at(
                user_ptr.sub(HEADER_SIZE),
                MallocHeader {
                    size,
                    front,
                    layout_size,
                    layout_align,
                },
            )
        };

        let used = self.used.get() + size;
        self.used.set(used);
        self.peak.set(self.peak.get().max(used));
        self.live_allocations.set(self.live_allocations.get() + 1);

        Some(user_ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        // Safety: the caller guarantees ptr is from allocate, so the header
        // is right before it, and describes the system allocation.
        unsafe {
            let header: MallocHeader = read_at(ptr.sub(HEADER_SIZE));
            let layout = Layout::from_size_align_unchecked(header.layout_size, header.layout_align);
            alloc::alloc::dealloc(ptr.sub(header.front).as_ptr(), layout);
            self.used.set(self.used.get() - header.size);
        }
        self.live_allocations.set(self.live_allocations.get() - 1);
    }

    unsafe fn allocation_size(&self, ptr: NonNull<u8>) -> u32 {
        // Safety: the caller guarantees ptr is a live allocation.
        let header: MallocHeader = unsafe { read_at(ptr.sub(HEADER_SIZE)) };
        header.size as u32
    }

    fn total_bytes_allocated(&self) -> usize {
        self.used.get()
    }

    fn total_memory(&self) -> usize {
        isize::MAX as usize
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
    use crate::allocators::Allocator;

    use super::MallocAllocator;

    #[test]
    fn tracks_usage_and_peak() {
        let alloc = MallocAllocator::new();
        let a = alloc.allocate(100, 16, 0).unwrap();
        let b = alloc.allocate(50, 64, 8).unwrap();
        assert_eq!(0, a.as_ptr() as usize % 16);
        assert_eq!(0, (b.as_ptr() as usize + 8) % 64);
        assert_eq!(150, alloc.total_bytes_allocated());
        assert_eq!(50, unsafe { alloc.allocation_size(b) });

        unsafe { alloc.free(a) };
        assert_eq!(50, alloc.total_bytes_allocated());
        unsafe { alloc.free(b) };
        assert_eq!(0, alloc.total_bytes_allocated());
        assert_eq!(150, alloc.peak());
    }
}
