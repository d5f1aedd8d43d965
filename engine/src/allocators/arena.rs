// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{
    cell::Cell,
    fmt::Debug,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    panic::Location,
    ptr::NonNull,
};

use super::{
    utils::{read_at, write_at, MemoryProperties},
    Allocator, FreeListAllocator, LinearAllocator, MallocAllocator, PoolAllocator,
    RingBufferAllocator, StackAllocator,
};

/// Written in front of and after every allocation by
/// [`BasicBoundsChecking`].
pub const GUARD_PATTERN: u32 = 0xABADBABE;

/// Policy for detecting writes past the ends of allocations.
pub trait BoundsChecking: Default {
    /// Bytes reserved in front of every allocation.
    const SIZE_FRONT: usize;
    /// Bytes reserved after every allocation.
    const SIZE_BACK: usize;

    /// ### Safety
    ///
    /// `ptr` must be valid for writing [`BoundsChecking::SIZE_FRONT`] bytes.
    unsafe fn guard_front(&self, ptr: NonNull<u8>);
    /// ### Safety
    ///
    /// `ptr` must be valid for writing [`BoundsChecking::SIZE_BACK`] bytes.
    unsafe fn guard_back(&self, ptr: NonNull<u8>);
    /// ### Safety
    ///
    /// `ptr` must be valid for reading [`BoundsChecking::SIZE_FRONT`] bytes.
    unsafe fn check_front(&self, ptr: NonNull<u8>) -> bool;
    /// ### Safety
    ///
    /// `ptr` must be valid for reading [`BoundsChecking::SIZE_BACK`] bytes.
    unsafe fn check_back(&self, ptr: NonNull<u8>) -> bool;
}

#[derive(Debug, Default)]
pub struct NoBoundsChecking;

impl BoundsChecking for NoBoundsChecking {
    const SIZE_FRONT: usize = 0;
    const SIZE_BACK: usize = 0;
    unsafe fn guard_front(&self, _ptr: NonNull<u8>) {}
    unsafe fn guard_back(&self, _ptr: NonNull<u8>) {}
    unsafe fn check_front(&self, _ptr: NonNull<u8>) -> bool {
        true
    }
    unsafe fn check_back(&self, _ptr: NonNull<u8>) -> bool {
        true
    }
}

/// Surrounds every allocation with [`GUARD_PATTERN`], and checks that the
/// pattern is intact when the allocation is freed.
#[derive(Debug, Default)]
pub struct BasicBoundsChecking;

impl BoundsChecking for BasicBoundsChecking {
    const SIZE_FRONT: usize = size_of::<u32>();
    const SIZE_BACK: usize = size_of::<u32>();
    unsafe fn guard_front(&self, ptr: NonNull<u8>) {
        // Safety: guaranteed by the caller.
        unsafe { write_at(ptr, GUARD_PATTERN) };
    }
    unsafe fn guard_back(&self, ptr: NonNull<u8>) {
        // Safety: guaranteed by the caller.
        unsafe { write_at(ptr, GUARD_PATTERN) };
    }
    unsafe fn check_front(&self, ptr: NonNull<u8>) -> bool {
        // Safety: guaranteed by the caller.
        unsafe { read_at::<u32>(ptr) == GUARD_PATTERN }
    }
    unsafe fn check_back(&self, ptr: NonNull<u8>) -> bool {
        // Safety: guaranteed by the caller.
        unsafe { read_at::<u32>(ptr) == GUARD_PATTERN }
    }
}

/// Policy for keeping tabs on the allocations of an [`Arena`].
pub trait MemoryTracking: Default {
    fn on_allocation(
        &self,
        ptr: NonNull<u8>,
        size: usize,
        alignment: usize,
        description: &str,
        location: &'static Location<'static>,
    );
    fn on_deallocation(&self, ptr: NonNull<u8>, size: usize, location: &'static Location<'static>);
    /// Forgets all allocations, called when the arena is reset.
    fn reset(&self) {}
}

#[derive(Debug, Default)]
pub struct NoMemoryTracking;

impl MemoryTracking for NoMemoryTracking {
    fn on_allocation(&self, _: NonNull<u8>, _: usize, _: usize, _: &str, _: &'static Location<'static>) {}
    fn on_deallocation(&self, _: NonNull<u8>, _: usize, _: &'static Location<'static>) {}
}

/// Counts the live allocations and bytes, and traces every allocation and
/// free with the source location it happened at. Reports leaks when dropped.
#[derive(Debug, Default)]
pub struct BasicMemoryTracking {
    live_allocations: Cell<usize>,
    live_bytes: Cell<usize>,
}

impl BasicMemoryTracking {
    pub fn live_allocations(&self) -> usize {
        self.live_allocations.get()
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes.get()
    }
}

impl MemoryTracking for BasicMemoryTracking {
    fn on_allocation(
        &self,
        ptr: NonNull<u8>,
        size: usize,
        alignment: usize,
        description: &str,
        location: &'static Location<'static>,
    ) {
        self.live_allocations.set(self.live_allocations.get() + 1);
        self.live_bytes.set(self.live_bytes.get() + size);
        tracing::trace!("alloc {ptr:p} ({size} bytes, align {alignment}) \"{description}\" at {location}");
    }

    fn on_deallocation(&self, ptr: NonNull<u8>, size: usize, location: &'static Location<'static>) {
        self.live_allocations.set(self.live_allocations.get() - 1);
        self.live_bytes.set(self.live_bytes.get() - size);
        tracing::trace!("free {ptr:p} ({size} bytes) at {location}");
    }

    fn reset(&self) {
        self.live_allocations.set(0);
        self.live_bytes.set(0);
    }
}

impl Drop for BasicMemoryTracking {
    fn drop(&mut self) {
        if self.live_allocations.get() > 0 {
            tracing::error!(
                "arena dropped with {} live allocations ({} bytes)",
                self.live_allocations.get(),
                self.live_bytes.get(),
            );
        }
    }
}

#[cfg(debug_assertions)]
pub type DefaultBoundsChecking = BasicBoundsChecking;
#[cfg(not(debug_assertions))]
pub type DefaultBoundsChecking = NoBoundsChecking;

#[cfg(debug_assertions)]
pub type DefaultMemoryTracking = BasicMemoryTracking;
#[cfg(not(debug_assertions))]
pub type DefaultMemoryTracking = NoMemoryTracking;

pub type LinearArena<'a> = Arena<LinearAllocator<'a>>;
pub type PoolArena<'a> = Arena<PoolAllocator<'a>>;
pub type FreeListArena<'a> = Arena<FreeListAllocator<'a>>;
pub type MallocArena = Arena<MallocAllocator>;
pub type StackArena<'a> = Arena<StackAllocator<'a>>;
pub type RingBufferArena<'a> = Arena<RingBufferAllocator<'a>>;

/// The object-safe interface of [`Arena`], used by the containers and
/// [`ArenaBox`] so that they don't need to be generic over the arena's
/// policies.
pub trait MemoryArena {
    /// Allocates `size` bytes aligned to `alignment`. See [`Arena::allocate`].
    fn allocate_raw(
        &self,
        size: usize,
        alignment: usize,
        description: &str,
        location: &'static Location<'static>,
    ) -> Option<NonNull<u8>>;

    /// ### Safety
    ///
    /// `ptr` must be a live allocation from [`MemoryArena::allocate_raw`] of
    /// this arena, and it must not be used after this call.
    unsafe fn free_raw(&self, ptr: NonNull<u8>, location: &'static Location<'static>);

    /// Bytes in front of each allocation: the front guard plus the
    /// allocator's header.
    fn header_size(&self) -> u32;

    /// Bytes after each allocation: the back guard.
    fn footer_size(&self) -> u32;

    fn total_bytes_allocated(&self) -> usize;

    fn unallocated_bytes(&self) -> usize;

    fn num_allocations(&self) -> usize;

    /// The [`MemoryProperties`] for placing assets in this arena with the
    /// given alignment.
    fn memory_properties(&self, alignment: u64) -> MemoryProperties {
        MemoryProperties::new(alignment, self.header_size(), self.footer_size())
    }

    /// Allocates a `T` and moves `value` there.
    #[track_caller]
    fn alloc<T>(&self, value: T) -> Option<ArenaBox<'_, T>>
    where
        Self: Sized,
    {
        let ptr = self
            .allocate_raw(
                size_of::<T>(),
                align_of::<T>(),
                core::any::type_name::<T>(),
                Location::caller(),
            )?
            .cast::<T>();
        // Safety: the allocation is big enough and aligned for a T.
        unsafe { ptr.write(value) };
        Some(ArenaBox::from_raw_parts(ptr, self, Location::caller()))
    }

    /// Allocates a `T` with its default value.
    #[track_caller]
    fn alloc_default<T: Default>(&self) -> Option<ArenaBox<'_, T>>
    where
        Self: Sized,
    {
        self.alloc(T::default())
    }

    /// Allocates `len` default-valued `T`s.
    #[track_caller]
    fn alloc_slice_default<T: Default>(&self, len: usize) -> Option<ArenaBox<'_, [T]>>
    where
        Self: Sized,
    {
        let ptr = self
            .allocate_raw(
                size_of::<T>().checked_mul(len)?,
                align_of::<T>(),
                core::any::type_name::<[T]>(),
                Location::caller(),
            )?
            .cast::<T>();
        for i in 0..len {
            // Safety: the allocation has space for len T's.
            unsafe { ptr.add(i).write(T::default()) };
        }
        let slice = NonNull::slice_from_raw_parts(ptr, len);
        Some(ArenaBox::from_raw_parts(slice, self, Location::caller()))
    }

    /// Allocates `len` zeroed bytes, with the start aligned to `alignment`.
    /// Asset buffers are allocated with this.
    #[track_caller]
    fn alloc_bytes(&self, len: usize, alignment: usize) -> Option<ArenaBox<'_, [u8]>>
    where
        Self: Sized,
    {
        let ptr = self.allocate_raw(len, alignment, "bytes", Location::caller())?;
        // Safety: the allocation is len bytes.
        unsafe { ptr.write_bytes(0, len) };
        let slice = NonNull::slice_from_raw_parts(ptr, len);
        Some(ArenaBox::from_raw_parts(slice, self, Location::caller()))
    }
}

/// An [`Allocator`] bound to bounds checking and memory tracking policies. This
/// is the "where does this memory come from" type that the rest of the engine
/// deals with.
pub struct Arena<A, B = DefaultBoundsChecking, T = DefaultMemoryTracking>
where
    A: Allocator,
    B: BoundsChecking,
    T: MemoryTracking,
{
    allocator: A,
    bounds_checking: B,
    tracking: T,
}

impl<A: Allocator + Debug, B: BoundsChecking + Debug, T: MemoryTracking + Debug> Debug
    for Arena<A, B, T>
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Arena")
            .field("allocator", &self.allocator)
            .field("bounds_checking", &self.bounds_checking)
            .field("tracking", &self.tracking)
            .finish()
    }
}

impl<A: Allocator, B: BoundsChecking, T: MemoryTracking> Arena<A, B, T> {
    pub fn new(allocator: A) -> Arena<A, B, T> {
        Arena {
            allocator,
            bounds_checking: B::default(),
            tracking: T::default(),
        }
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn tracking(&self) -> &T {
        &self.tracking
    }

    /// Allocates `size` bytes aligned to `alignment`, surrounded by the bounds
    /// checking guards. The `description` and the caller's location are
    /// passed to the memory tracking policy.
    #[track_caller]
    pub fn allocate(&self, size: usize, alignment: usize, description: &str) -> Option<NonNull<u8>> {
        self.allocate_raw(size, alignment, description, Location::caller())
    }

    /// Frees an allocation made with [`Arena::allocate`], checking the bounds
    /// checking guards.
    ///
    /// ### Safety
    ///
    /// `ptr` must be a live allocation of this arena, and it must not be used
    /// after this call.
    #[track_caller]
    pub unsafe fn free(&self, ptr: NonNull<u8>) {
        // Safety: guaranteed by the caller.
        unsafe { self.free_raw(ptr, Location::caller()) };
    }
}

impl<'a, B: BoundsChecking, T: MemoryTracking> Arena<LinearAllocator<'a>, B, T> {
    /// Releases everything allocated from the arena. See
    /// [`LinearAllocator::reset`].
    pub fn reset(&mut self) {
        self.allocator.reset();
        self.tracking.reset();
    }
}

impl<'a, B: BoundsChecking, T: MemoryTracking> Arena<FreeListAllocator<'a>, B, T> {
    /// Releases everything allocated from the arena. See
    /// [`FreeListAllocator::reset`].
    pub fn reset(&mut self) {
        self.allocator.reset();
        self.tracking.reset();
    }
}

impl<A: Allocator, B: BoundsChecking, T: MemoryTracking> MemoryArena for Arena<A, B, T> {
    fn allocate_raw(
        &self,
        size: usize,
        alignment: usize,
        description: &str,
        location: &'static Location<'static>,
    ) -> Option<NonNull<u8>> {
        profiling::function_scope!();
        let padded_size = size.checked_add(B::SIZE_FRONT + B::SIZE_BACK)?;
        // The offset makes the memory after the front guard aligned.
        let Some(block) = self.allocator.allocate(padded_size, alignment, B::SIZE_FRONT) else {
            tracing::debug!("arena could not fit {size} bytes for \"{description}\" at {location}");
            return None;
        };

        // Safety:
        // - The block is at least `padded_size` bytes, so the front guard and
        //   the user pointer are within it.
        // - The block size reported by the allocator is at least
        //   `padded_size`, so the back guard is within the block too. It's
        //   read from the allocator (instead of using `padded_size`) so that
        //   `free_raw` finds the guard in the same place.
        let user_ptr = unsafe {
            let block_size = self.allocator.allocation_size(block) as usize;
            self.bounds_checking.guard_front(block);
            self.bounds_checking
                .guard_back(block.add(block_size - B::SIZE_BACK));
            block.add(B::SIZE_FRONT)
        };

        self.tracking
            .on_allocation(user_ptr, size, alignment, description, location);
        Some(user_ptr)
    }

    unsafe fn free_raw(&self, ptr: NonNull<u8>, location: &'static Location<'static>) {
        profiling::function_scope!();
        // Safety: the caller guarantees ptr is from allocate_raw, which
        // returned the allocator's block offset by SIZE_FRONT.
        let block = unsafe { ptr.sub(B::SIZE_FRONT) };
        let block_size = unsafe { self.allocator.allocation_size(block) } as usize;

        // Safety: the guards were written in allocate_raw at these positions.
        let (front_ok, back_ok) = unsafe {
            (
                self.bounds_checking.check_front(block),
                self.bounds_checking
                    .check_back(block.add(block_size - B::SIZE_BACK)),
            )
        };
        assert!(front_ok, "memory before the allocation at {ptr:p} was overwritten (freed at {location})");
        assert!(back_ok, "memory after the allocation at {ptr:p} was overwritten (freed at {location})");

        self.tracking.on_deallocation(
            ptr,
            block_size - B::SIZE_FRONT - B::SIZE_BACK,
            location,
        );
        // Safety: guaranteed by the caller.
        unsafe { self.allocator.free(block) };
    }

    fn header_size(&self) -> u32 {
        B::SIZE_FRONT as u32 + self.allocator.header_size()
    }

    fn footer_size(&self) -> u32 {
        B::SIZE_BACK as u32
    }

    fn total_bytes_allocated(&self) -> usize {
        self.allocator.total_bytes_allocated()
    }

    fn unallocated_bytes(&self) -> usize {
        self.allocator.unallocated_bytes()
    }

    fn num_allocations(&self) -> usize {
        self.allocator.num_allocations()
    }
}

/// A `T` allocated from a [`MemoryArena`]. Think of `Box`, but the memory is
/// returned to the arena when this is dropped.
pub struct ArenaBox<'a, T: ?Sized> {
    ptr: NonNull<T>,
    arena: &'a dyn MemoryArena,
    location: &'static Location<'static>,
    _owned: PhantomData<T>,
}

impl<'a, T: ?Sized> ArenaBox<'a, T> {
    /// Takes ownership of an initialized value allocated from `arena`.
    pub(crate) fn from_raw_parts(
        ptr: NonNull<T>,
        arena: &'a dyn MemoryArena,
        location: &'static Location<'static>,
    ) -> ArenaBox<'a, T> {
        ArenaBox {
            ptr,
            arena,
            location,
            _owned: PhantomData,
        }
    }

    /// Drops the value and returns the memory to the arena, tracking the
    /// caller as the location of the free. Dropping the box does the same,
    /// but tracks the allocation's location instead.
    #[track_caller]
    pub fn free(mut this: ArenaBox<'a, T>) {
        this.location = Location::caller();
        drop(this);
    }

    /// The location the value was allocated at.
    pub fn location(this: &ArenaBox<'a, T>) -> &'static Location<'static> {
        this.location
    }
}

impl<T: ?Sized> Deref for ArenaBox<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // Safety: the pointer is valid and initialized for as long as the box
        // exists, and the box has unique ownership of it.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: ?Sized> DerefMut for ArenaBox<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // Safety: see deref.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T: ?Sized + Debug> Debug for ArenaBox<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        (**self).fmt(f)
    }
}

impl<T: ?Sized> Drop for ArenaBox<'_, T> {
    fn drop(&mut self) {
        // Safety: the box owns the value, and it's not used after this.
        unsafe {
            core::ptr::drop_in_place(self.ptr.as_ptr());
            self.arena.free_raw(self.ptr.cast::<u8>(), self.location);
        }
    }
}
