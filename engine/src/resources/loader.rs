// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use enum_map::{Enum, EnumMap};

use crate::allocators::{MemoryArena, MemoryProperties};

use super::{AssetBuffer, AssetHandle, BinaryAssetFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("expected a {:?} file, found {:?}", DisplayTag(*.expected), DisplayTag(*.found))]
    WrongFileType { expected: [u8; 4], found: [u8; 4] },
    #[error("unsupported asset file version {0}")]
    UnsupportedVersion(u32),
    #[error("the file ends before its contents do")]
    Truncated,
    #[error("malformed asset: {0}")]
    Malformed(&'static str),
    #[error("the asset does not fit in its buffer")]
    OutOfSpace,
    #[error("the asset buffer is not aligned enough for the asset's contents")]
    Misaligned,
    #[error("the asset was estimated to take {estimated} bytes, but loading it took {consumed}")]
    SizeMismatch { estimated: u64, consumed: u64 },
    #[error("could not decompress the asset's data")]
    Decompression,
    #[error("the model has no root node")]
    NoSceneRoot,
    #[error("the external system the asset is loaded into failed to load it")]
    ExternalResource,
}

/// Formats type tags as text when they're printable.
struct DisplayTag([u8; 4]);

impl core::fmt::Debug for DisplayTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match core::str::from_utf8(&self.0) {
            Ok(tag) => write!(f, "{tag:?}"),
            Err(_) => write!(f, "{:?}", self.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
pub enum AssetType {
    Animation,
    Model,
    AnimModel,
    Texture,
    Sound,
    /// Files which are used as they are, see [`DefaultLoader`].
    Raw,
}

/// Converts a packed asset file into its loaded form in an [`AssetBuffer`].
/// Loading happens in two steps: [`AssetLoader::loaded_asset_size`] reads the
/// file's meta-data to find out how big the buffer should be, and
/// [`AssetLoader::load_asset`] fills a buffer of that size.
pub trait AssetLoader {
    /// The type tag of the files this loader loads, or `"*"` for any file.
    fn pattern(&self) -> &'static str;

    fn asset_type(&self) -> AssetType;

    /// Returns false for loaders which don't transform the file at all.
    fn should_process(&self) -> bool {
        true
    }

    /// Returns the size of the buffer [`AssetLoader::load_asset`] needs for
    /// this file, when the buffer is allocated from an arena with the given
    /// properties. Allocates nothing.
    fn loaded_asset_size(
        &self,
        path: &str,
        raw: &[u8],
        properties: MemoryProperties,
    ) -> Result<u64, LoadError>;

    /// Loads the file into the buffer, which must be exactly the size
    /// returned by [`AssetLoader::loaded_asset_size`]. On failure, the buffer
    /// is left partially written and should not be used.
    fn load_asset(&self, path: &str, raw: &[u8], buffer: &mut AssetBuffer) -> Result<(), LoadError>;

    /// Releases resources the loaded asset holds outside of its buffer.
    /// Loaders that release something also forget the loaded asset (see
    /// [`AssetBuffer::forget_loaded`]), so freeing twice releases nothing the
    /// second time. The buffer's memory is freed by dropping it.
    fn free_asset(&self, _buffer: &mut AssetBuffer) -> bool {
        true
    }
}

/// Passes files through as they are: the loaded asset is a copy of the file.
#[derive(Debug, Default)]
pub struct DefaultLoader;

impl AssetLoader for DefaultLoader {
    fn pattern(&self) -> &'static str {
        "*"
    }

    fn asset_type(&self) -> AssetType {
        AssetType::Raw
    }

    fn should_process(&self) -> bool {
        false
    }

    fn loaded_asset_size(&self, _: &str, raw: &[u8], _: MemoryProperties) -> Result<u64, LoadError> {
        Ok(raw.len() as u64)
    }

    fn load_asset(&self, _: &str, raw: &[u8], buffer: &mut AssetBuffer) -> Result<(), LoadError> {
        let data = buffer.data_mut();
        if data.len() != raw.len() {
            return Err(LoadError::SizeMismatch {
                estimated: data.len() as u64,
                consumed: raw.len() as u64,
            });
        }
        data.copy_from_slice(raw);
        buffer.set_loaded(AssetType::Raw);
        Ok(())
    }
}

static DEFAULT_LOADER: DefaultLoader = DefaultLoader;

/// The loaders for each [`AssetType`], and the logic for picking one for a
/// file.
pub struct LoaderRegistry<'l> {
    loaders: EnumMap<AssetType, Option<&'l dyn AssetLoader>>,
}

impl Default for LoaderRegistry<'_> {
    fn default() -> Self {
        LoaderRegistry::new()
    }
}

impl<'l> LoaderRegistry<'l> {
    /// Creates a registry with only the [`DefaultLoader`] registered.
    pub fn new() -> LoaderRegistry<'l> {
        let mut loaders: EnumMap<AssetType, Option<&'l dyn AssetLoader>> = EnumMap::default();
        loaders[AssetType::Raw] = Some(&DEFAULT_LOADER);
        LoaderRegistry { loaders }
    }

    /// Registers the loader for its asset type, replacing the previous one.
    pub fn register(&mut self, loader: &'l dyn AssetLoader) {
        self.loaders[loader.asset_type()] = Some(loader);
    }

    pub fn loader(&self, asset_type: AssetType) -> Option<&'l dyn AssetLoader> {
        self.loaders[asset_type]
    }

    /// Returns the first registered loader whose pattern matches the file's
    /// type tag (in [`AssetType`] order), or the default loader.
    pub fn loader_for_file(&self, raw: &[u8]) -> &'l dyn AssetLoader {
        let tag = BinaryAssetFile::peek_type_tag(raw);
        self.loaders
            .values()
            .flatten()
            .find(|loader| tag.is_some_and(|tag| loader.pattern().as_bytes() == tag))
            .copied()
            .unwrap_or(&DEFAULT_LOADER)
    }

    /// Loads the file with the loader picked by [`LoaderRegistry::loader_for_file`].
    #[track_caller]
    pub fn load<'a>(
        &self,
        path: &str,
        raw: &[u8],
        arena: &'a dyn MemoryArena,
        alignment: usize,
        handle: AssetHandle,
    ) -> Result<AssetBuffer<'a>, LoadError> {
        load_with(self.loader_for_file(raw), path, raw, arena, alignment, handle)
    }

    /// Loads the file as the given asset type.
    #[track_caller]
    pub fn load_as<'a>(
        &self,
        asset_type: AssetType,
        path: &str,
        raw: &[u8],
        arena: &'a dyn MemoryArena,
        alignment: usize,
        handle: AssetHandle,
    ) -> Result<AssetBuffer<'a>, LoadError> {
        let Some(loader) = self.loader(asset_type) else {
            tracing::error!("no loader registered for {asset_type:?}, needed for {path:?}");
            return Err(LoadError::Malformed("no loader registered for the asset type"));
        };
        load_with(loader, path, raw, arena, alignment, handle)
    }
}

/// Runs both loading steps: sizes the asset, allocates its buffer from the
/// arena, and loads it.
#[track_caller]
pub fn load_with<'a>(
    loader: &dyn AssetLoader,
    path: &str,
    raw: &[u8],
    arena: &'a dyn MemoryArena,
    alignment: usize,
    handle: AssetHandle,
) -> Result<AssetBuffer<'a>, LoadError> {
    profiling::function_scope!();
    let properties = arena.memory_properties(alignment as u64);
    let size = loader.loaded_asset_size(path, raw, properties)?;
    tracing::debug!("{path:?} ({:?}) needs {size} bytes", loader.asset_type());
    let size = usize::try_from(size).map_err(|_| LoadError::OutOfSpace)?;
    let mut buffer = AssetBuffer::new_in(arena, handle, size, properties).ok_or_else(|| {
        tracing::error!("could not allocate {size} bytes for {path:?}");
        LoadError::OutOfSpace
    })?;
    loader.load_asset(path, raw, &mut buffer)?;
    tracing::debug!("loaded {path:?}");
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use crate::{
        allocators::{
            Arena, FreeListAllocator, MemoryArea, MemoryArena, NoBoundsChecking, NoMemoryTracking,
        },
        resources::{AssetHandle, AssetType},
        test_platform::TestPlatform,
    };

    use super::{LoadError, LoaderRegistry};

    #[test]
    fn unknown_files_pass_through() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 4096).unwrap();
        let arena: Arena<FreeListAllocator, NoBoundsChecking, NoMemoryTracking> =
            Arena::new(FreeListAllocator::new(area.add_sub_area(4096).unwrap()).unwrap());
        let registry = LoaderRegistry::new();

        let raw = b"just some text";
        let loader = registry.loader_for_file(raw);
        assert!(!loader.should_process());
        {
            let buffer = registry
                .load("notes.txt", raw, &arena, 16, AssetHandle(1))
                .unwrap();
            assert_eq!(Some(AssetType::Raw), buffer.loaded_type());
            assert_eq!(&raw[..], buffer.data());
            assert_eq!(1, arena.num_allocations());
        }
        assert_eq!(0, arena.num_allocations());

        assert!(matches!(
            registry.load_as(AssetType::Animation, "a.ranm", raw, &arena, 16, AssetHandle(2)),
            Err(LoadError::Malformed(_)),
        ));
    }
}
