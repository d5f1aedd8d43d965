// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Alignment math shared by the allocators, the arenas and the asset loaders.

use core::ptr::NonNull;

/// The header written in front of every allocation by allocators which only
/// need to remember the requested size, e.g. [`LinearAllocator`].
///
/// [`LinearAllocator`]: super::LinearAllocator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Header {
    pub size: u32,
}

pub const fn kibibytes(n: usize) -> usize {
    n * 1024
}

pub const fn mebibytes(n: usize) -> usize {
    n * 1024 * 1024
}

/// Rounds `address` up to the next multiple of `alignment`, which must be a
/// power of two.
#[inline]
pub const fn align_forward(address: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (address + (alignment - 1)) & !(alignment - 1)
}

#[inline]
pub const fn is_aligned(address: usize, alignment: usize) -> bool {
    address & (alignment - 1) == 0
}

/// Rounds `value` up to the next multiple of `multiple`. Unlike
/// [`align_forward`], `multiple` does not need to be a power of two.
#[inline]
pub const fn round_up(value: u64, multiple: u64) -> u64 {
    if multiple == 0 {
        return value;
    }
    value.div_ceil(multiple) * multiple
}

/// The amount of arena memory a single allocation of `requested` bytes
/// actually occupies: the allocator's header and the arena's bounds checking
/// guards are added on top, and the sum is rounded up to the alignment.
///
/// Asset loaders sum this over every container they place to get the size of
/// the buffer they need.
#[inline]
pub const fn get_max_memory_for_allocation(
    requested: u64,
    alignment: u64,
    header_size: u32,
    bounds_checking: u32,
) -> u64 {
    round_up(
        requested + header_size as u64 + bounds_checking as u64,
        alignment,
    )
}

/// Describes the arena an asset will be placed in, so that the asset loaders
/// can compute how much memory their allocations take without allocating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryProperties {
    pub alignment: u64,
    /// Bytes the arena stores in front of each allocation.
    pub header_size: u32,
    /// Bytes the arena stores after each allocation.
    pub bounds_checking: u32,
}

impl MemoryProperties {
    pub const fn new(alignment: u64, header_size: u32, bounds_checking: u32) -> MemoryProperties {
        MemoryProperties {
            alignment,
            header_size,
            bounds_checking,
        }
    }

    /// The memory reserved for an allocation of `requested` bytes, see
    /// [`get_max_memory_for_allocation`].
    #[inline]
    pub const fn reservation(&self, requested: u64) -> u64 {
        get_max_memory_for_allocation(
            requested,
            self.alignment,
            self.header_size,
            self.bounds_checking,
        )
    }
}

/// Returns the amount of bytes between `ptr` and the next address where
/// `address + offset` is a multiple of `alignment`.
#[inline]
pub(crate) fn padding_for(ptr: NonNull<u8>, alignment: usize, offset: usize) -> usize {
    let address = ptr.as_ptr() as usize + offset;
    align_forward(address, alignment) - address
}

/// Reads a `T` from a possibly unaligned address.
///
/// ### Safety
///
/// `ptr` must be valid for reading `size_of::<T>()` bytes, and those bytes must
/// be a valid `T`.
#[inline]
pub(crate) unsafe fn read_at<T>(ptr: NonNull<u8>) -> T {
    // Safety: guaranteed by the caller.
    unsafe { ptr.as_ptr().cast::<T>().read_unaligned() }
}

/// Writes a `T` to a possibly unaligned address.
///
/// ### Safety
///
/// `ptr` must be valid for writing `size_of::<T>()` bytes.
#[inline]
pub(crate) unsafe fn write_at<T>(ptr: NonNull<u8>, value: T) {
    // Safety: guaranteed by the caller.
    unsafe { ptr.as_ptr().cast::<T>().write_unaligned(value) }
}

#[cfg(test)]
mod tests {
    use super::{align_forward, get_max_memory_for_allocation, is_aligned, round_up};

    #[test]
    fn align_forward_rounds_to_the_next_multiple() {
        assert_eq!(0, align_forward(0, 16));
        assert_eq!(16, align_forward(1, 16));
        assert_eq!(16, align_forward(16, 16));
        assert_eq!(24, align_forward(17, 8));
        assert!(is_aligned(align_forward(12345, 64), 64));
    }

    #[test]
    fn round_up_handles_non_power_of_two_multiples() {
        assert_eq!(12, round_up(10, 6));
        assert_eq!(12, round_up(12, 6));
        assert_eq!(7, round_up(7, 0));
    }

    #[test]
    fn max_memory_includes_headers_and_guards() {
        assert_eq!(32, get_max_memory_for_allocation(10, 16, 4, 8));
        assert_eq!(16, get_max_memory_for_allocation(8, 16, 0, 8));
        assert_eq!(24, get_max_memory_for_allocation(24, 8, 0, 0));
        assert_eq!(48, get_max_memory_for_allocation(24, 16, 4, 8));
    }
}
