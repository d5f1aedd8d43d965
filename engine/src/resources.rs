// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Loading packed asset files into [`AssetBuffer`]s.
//!
//! Every packed file starts with a [`FileHeader`], followed by the asset's
//! meta-data and a binary blob. An [`AssetLoader`] reads the meta-data to
//! size the asset's buffer, and then lays the asset out in it.

mod asset_buffer;
mod asset_file;
pub mod assets;
mod deserialize;
mod loader;
mod placement;
mod serialize;

pub use asset_buffer::{AssetBuffer, AssetHandle};
pub use asset_file::{
    read_asset_file, AssetFile, BinaryAssetFile, DiskFile, FileError, FileHeader,
    MemoryAssetFile, OpenMode, ASSET_FILE_VERSION, HEADER_SIZE,
};
pub use deserialize::{deserialize, try_deserialize, Deserialize};
pub use loader::{load_with, AssetLoader, AssetType, DefaultLoader, LoadError, LoaderRegistry};
pub use placement::{PlacementCursor, SizeEstimate};
pub use serialize::{serialize, Serialize};

#[cfg(any(test, feature = "asset-conditioning"))]
pub use asset_file::write_asset_file;
#[cfg(any(test, feature = "asset-conditioning"))]
pub use serialize::serialize_all;
