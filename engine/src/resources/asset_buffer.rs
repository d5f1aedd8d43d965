// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{fmt::Debug, panic::Location, ptr::NonNull};

use crate::allocators::{ArenaBox, MemoryArena, MemoryProperties};

use super::{AssetType, PlacementCursor};

/// Identifies a loaded asset for whoever keeps track of them. The engine
/// doesn't interpret it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetHandle(pub u64);

/// The memory a single loaded asset lives in. Loaders place the asset's root
/// object at the start of the buffer, and the containers it refers to after
/// it, so the whole asset is freed by dropping the buffer.
///
/// Objects placed in the buffer are never dropped, so loaders only place
/// types which don't need dropping.
pub struct AssetBuffer<'a> {
    data: ArenaBox<'a, [u8]>,
    handle: AssetHandle,
    properties: MemoryProperties,
    loaded_type: Option<AssetType>,
}

impl Debug for AssetBuffer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AssetBuffer")
            .field("size", &self.data.len())
            .field("handle", &self.handle)
            .field("properties", &self.properties)
            .field("loaded_type", &self.loaded_type)
            .finish_non_exhaustive()
    }
}

impl<'a> AssetBuffer<'a> {
    /// Allocates a zeroed buffer of `size` bytes from the arena, aligned to
    /// `properties.alignment`. The properties should be the arena's, see
    /// [`MemoryArena::memory_properties`].
    #[track_caller]
    pub fn new_in(
        arena: &'a dyn MemoryArena,
        handle: AssetHandle,
        size: usize,
        properties: MemoryProperties,
    ) -> Option<AssetBuffer<'a>> {
        let alignment = usize::try_from(properties.alignment).ok()?;
        let ptr = arena.allocate_raw(size, alignment, "asset buffer", Location::caller())?;
        // Safety: the allocation is `size` bytes.
        unsafe { ptr.write_bytes(0, size) };
        let data = ArenaBox::from_raw_parts(
            NonNull::slice_from_raw_parts(ptr, size),
            arena,
            Location::caller(),
        );
        Some(AssetBuffer {
            data,
            handle,
            properties,
            loaded_type: None,
        })
    }

    pub fn handle(&self) -> AssetHandle {
        self.handle
    }

    pub fn properties(&self) -> MemoryProperties {
        self.properties
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// The type of the asset in the buffer, or None if nothing has been
    /// loaded into it (or loading failed).
    pub fn loaded_type(&self) -> Option<AssetType> {
        self.loaded_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the bytes. Forgets what was loaded in the buffer, as
    /// the bytes may no longer make up a valid asset.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.loaded_type = None;
        &mut self.data
    }

    /// Marks the buffer as no longer containing a usable asset, e.g. once the
    /// resources it refers to have been released.
    pub fn forget_loaded(&mut self) {
        self.loaded_type = None;
    }

    /// Starts placing an asset in the buffer. Forgets what was loaded in the
    /// buffer.
    pub fn cursor(&mut self) -> PlacementCursor<'_> {
        let properties = self.properties;
        PlacementCursor::new(self.data_mut(), properties)
    }

    /// Marks the buffer as containing an asset of the given type. Called by
    /// loaders once the asset is fully placed.
    ///
    /// Only the engine's loaders may do this: the typed accessors read
    /// pointers out of the placed objects, so marking arbitrary bytes as an
    /// asset would let them dereference garbage. Loaders outside the crate
    /// write through [`AssetBuffer::data_mut`] and are read back with
    /// [`AssetBuffer::data`].
    pub(crate) fn set_loaded(&mut self, asset_type: AssetType) {
        self.loaded_type = Some(asset_type);
    }

    /// Returns the root object of the loaded asset, if the buffer contains an
    /// asset of the given type.
    ///
    /// ### Safety
    ///
    /// The loader of `asset_type` must place a `T` as the first object of the
    /// buffer.
    pub(crate) unsafe fn root<T>(&self, asset_type: AssetType) -> Option<&T> {
        if self.loaded_type != Some(asset_type) || self.data.len() < size_of::<T>() {
            return None;
        }
        let ptr = self.data.as_ptr().cast::<T>();
        debug_assert!(ptr.is_aligned());
        // Safety: the loader placed an initialized T at the start of the
        // buffer (the cursor checks alignment), and it's valid as long as the
        // buffer isn't mutated, which the shared borrow guarantees.
        Some(unsafe { &*ptr })
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        allocators::{
            Arena, LinearAllocator, MemoryArea, MemoryArena, NoBoundsChecking, NoMemoryTracking,
        },
        resources::AssetType,
        test_platform::TestPlatform,
    };

    use super::{AssetBuffer, AssetHandle};

    #[test]
    fn roots_are_only_visible_once_loaded() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 1024).unwrap();
        let mut arena: Arena<LinearAllocator, NoBoundsChecking, NoMemoryTracking> =
            Arena::new(LinearAllocator::new(area.add_sub_area(1024).unwrap()));
        {
            let properties = arena.memory_properties(32);
            let mut buffer = AssetBuffer::new_in(&arena, AssetHandle(7), 64, properties).unwrap();
            assert_eq!(0, buffer.data().as_ptr() as usize % 32);
            assert!(buffer.data().iter().all(|b| *b == 0));

            let mut cursor = buffer.cursor();
            cursor.place(0xC0FFEEu64).unwrap();
            assert_eq!(None, unsafe { buffer.root::<u64>(AssetType::Raw) });

            buffer.set_loaded(AssetType::Raw);
            assert_eq!(Some(&0xC0FFEE), unsafe { buffer.root::<u64>(AssetType::Raw) });
            assert_eq!(None, unsafe { buffer.root::<u64>(AssetType::Texture) });

            buffer.data_mut()[0] = 0;
            assert_eq!(None, buffer.loaded_type());
            assert_eq!(AssetHandle(7), buffer.handle());
        }
        arena.reset();
    }

    #[test]
    fn touching_the_bytes_forgets_the_loaded_asset() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 1024).unwrap();
        let mut arena: Arena<LinearAllocator, NoBoundsChecking, NoMemoryTracking> =
            Arena::new(LinearAllocator::new(area.add_sub_area(1024).unwrap()));
        {
            let properties = arena.memory_properties(16);
            let mut buffer = AssetBuffer::new_in(&arena, AssetHandle(1), 64, properties).unwrap();

            buffer.set_loaded(AssetType::Texture);
            buffer.data_mut().fill(0x41);
            assert_eq!(None, buffer.loaded_type());
            assert!(buffer.texture().is_none());

            buffer.set_loaded(AssetType::Animation);
            let _ = buffer.cursor();
            assert_eq!(None, buffer.loaded_type());
            assert!(buffer.animation().is_none());
            assert!(buffer.model().is_none());
            assert!(buffer.anim_model().is_none());
        }
        arena.reset();
    }
}
