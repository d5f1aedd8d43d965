// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! The two halves of every asset loader's memory layout: [`SizeEstimate`]
//! adds up what an asset will need, [`PlacementCursor`] carves exactly that
//! out of the asset's buffer. Both reserve each object with
//! [`MemoryProperties::reservation`], so as long as a loader makes the same
//! calls to both in the same order, the estimate matches the consumption.

use core::{marker::PhantomData, mem::MaybeUninit, ptr::NonNull};

use crate::{
    allocators::{utils::is_aligned, MemoryProperties},
    collections::{SArray, SHashMap},
};

use super::LoadError;

/// Sums up the memory an asset will take in its buffer.
#[derive(Debug, Clone, Copy)]
pub struct SizeEstimate {
    properties: MemoryProperties,
    total: u64,
}

impl SizeEstimate {
    pub fn new(properties: MemoryProperties) -> SizeEstimate {
        SizeEstimate {
            properties,
            total: 0,
        }
    }

    /// Counts in a `T`, the counterpart of [`PlacementCursor::reserve`].
    pub fn add<T>(&mut self) {
        self.add_bytes(size_of::<T>());
    }

    /// The counterpart of [`PlacementCursor::emplace_sarray`].
    pub fn add_sarray<T>(&mut self, capacity: usize) {
        self.add_bytes(SArray::<T>::memory_size(capacity));
    }

    /// The counterpart of [`PlacementCursor::emplace_shashmap`].
    pub fn add_shashmap<V>(&mut self, capacity: usize) {
        self.add_bytes(SHashMap::<V>::memory_size(capacity));
    }

    pub fn add_bytes(&mut self, size: usize) {
        self.total += self.properties.reservation(size as u64);
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

/// Constructs objects one after another in an asset's buffer. Each carve
/// advances the cursor by the same reservation [`SizeEstimate`] counted for
/// it, and [`PlacementCursor::finish`] checks that the whole buffer was used.
///
/// The references returned by the cursor point into disjoint parts of the
/// buffer, and live as long as the buffer's borrow.
pub struct PlacementCursor<'a> {
    base: NonNull<u8>,
    capacity: usize,
    offset: usize,
    properties: MemoryProperties,
    _buffer: PhantomData<&'a mut [u8]>,
}

impl<'a> PlacementCursor<'a> {
    pub fn new(buffer: &'a mut [u8], properties: MemoryProperties) -> PlacementCursor<'a> {
        PlacementCursor {
            capacity: buffer.len(),
            base: NonNull::from(buffer).cast::<u8>(),
            offset: 0,
            properties,
            _buffer: PhantomData,
        }
    }

    /// The amount of bytes carved so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.offset
    }

    fn carve(&mut self, size: usize, alignment: usize) -> Result<NonNull<u8>, LoadError> {
        let reserved = self.properties.reservation(size as u64) as usize;
        let end = self
            .offset
            .checked_add(reserved)
            .filter(|end| *end <= self.capacity)
            .ok_or(LoadError::OutOfSpace)?;
        // Safety: offset <= end <= capacity, so the pointer is within the
        // buffer (or one past its end for zero-sized carves at the end).
        let ptr = unsafe { self.base.add(self.offset) };
        if !is_aligned(ptr.as_ptr() as usize, alignment) {
            tracing::error!(
                "asset buffer offset {} is not aligned to {alignment}, the buffer alignment is too small",
                self.offset,
            );
            return Err(LoadError::Misaligned);
        }
        self.offset = end;
        Ok(ptr)
    }

    /// Reserves space for a `T` to be written later. Loaders use this for
    /// their root object, which can only be written once all the containers
    /// it refers to have been filled.
    pub fn reserve<T>(&mut self) -> Result<&'a mut MaybeUninit<T>, LoadError> {
        let ptr = self.carve(size_of::<T>(), align_of::<T>())?;
        // Safety: the carved region is aligned and big enough for a T, and is
        // never handed out again. MaybeUninit does not need initialization.
        Ok(unsafe { ptr.cast::<MaybeUninit<T>>().as_mut() })
    }

    /// Moves `value` into the buffer.
    pub fn place<T>(&mut self, value: T) -> Result<&'a mut T, LoadError> {
        Ok(self.reserve::<T>()?.write(value))
    }

    pub fn emplace_sarray<T: Default>(
        &mut self,
        capacity: usize,
    ) -> Result<&'a mut SArray<T>, LoadError> {
        let ptr = self.carve(
            SArray::<T>::memory_size(capacity),
            SArray::<T>::placement_alignment(),
        )?;
        // Safety: the carved region is memory_size bytes, aligned, and never
        // handed out again.
        Ok(unsafe { SArray::<T>::emplace(ptr, capacity).as_mut() })
    }

    pub fn emplace_shashmap<V: Default>(
        &mut self,
        capacity: usize,
    ) -> Result<&'a mut SHashMap<V>, LoadError> {
        if capacity == 0 {
            return Err(LoadError::Malformed("hash map with zero capacity"));
        }
        let ptr = self.carve(
            SHashMap::<V>::memory_size(capacity),
            SHashMap::<V>::placement_alignment(),
        )?;
        // Safety: the carved region is memory_size bytes, aligned, and never
        // handed out again. The capacity is not zero.
        Ok(unsafe { SHashMap::<V>::emplace(ptr, capacity).as_mut() })
    }

    /// Checks that the carves used up the buffer exactly, returning the
    /// amount of bytes used.
    pub fn finish(self) -> Result<usize, LoadError> {
        if self.offset != self.capacity {
            tracing::error!(
                "asset buffer was sized for {} bytes, but loading used {}",
                self.capacity,
                self.offset,
            );
            return Err(LoadError::SizeMismatch {
                estimated: self.capacity as u64,
                consumed: self.offset as u64,
            });
        }
        Ok(self.offset)
    }
}
