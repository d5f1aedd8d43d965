// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Textures with a full mip chain, each mip compressed separately with LZ4.
//!
//! Mips which LZ4 can't shrink below [`COMPRESSION_FALLBACK_RATIO`] of their
//! original size are stored as they are, even in textures whose compression
//! mode is [`CompressionMode::Lz4`]. Such mips have their compressed size
//! set to the original size, which is what the decoder checks.

use arrayvec::ArrayVec;

use crate::{
    allocators::MemoryProperties,
    collections::SArray,
    resources::{
        deserialize::{try_deserialize, Deserialize},
        AssetBuffer, AssetLoader, AssetType, BinaryAssetFile, LoadError, SizeEstimate,
    },
};

pub const TEXTURE_TYPE_TAG: [u8; 4] = *b"rtex";

/// The maximum amount of mip levels for a texture.
pub const MAX_MIPS: usize = 16;

/// Mips which compress to this fraction of their original size or more are
/// stored uncompressed.
pub const COMPRESSION_FALLBACK_RATIO: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TextureFormat {
    R8 = 0,
    Rg8 = 1,
    Rgb8 = 2,
    Rgba8 = 3,
}

impl TextureFormat {
    pub fn from_u8(value: u8) -> Option<TextureFormat> {
        match value {
            0 => Some(TextureFormat::R8),
            1 => Some(TextureFormat::Rg8),
            2 => Some(TextureFormat::Rgb8),
            3 => Some(TextureFormat::Rgba8),
            _ => None,
        }
    }

    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::R8 => 1,
            TextureFormat::Rg8 => 2,
            TextureFormat::Rgb8 => 3,
            TextureFormat::Rgba8 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionMode {
    None = 0,
    Lz4 = 1,
}

impl CompressionMode {
    pub fn from_u8(value: u8) -> Option<CompressionMode> {
        match value {
            0 => Some(CompressionMode::None),
            1 => Some(CompressionMode::Lz4),
            _ => None,
        }
    }
}

/// The first record of a texture file's meta-data, followed by `mip_count`
/// [`MipInfo`]s. The binary blob contains the mips one after the other,
/// largest first, each taking `compressed_size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureMetaHeader {
    pub width: u32,
    pub height: u32,
    /// A [`TextureFormat`].
    pub format: u8,
    /// A [`CompressionMode`].
    pub compression_mode: u8,
    pub mip_count: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MipInfo {
    pub width: u32,
    pub height: u32,
    pub original_size: u32,
    /// Equal to `original_size` if the mip is stored uncompressed.
    pub compressed_size: u32,
}

impl MipInfo {
    pub fn is_compressed(&self) -> bool {
        self.compressed_size != self.original_size
    }
}

/// The validated meta-data of a texture file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureMetaData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub compression_mode: CompressionMode,
    pub mips: ArrayVec<MipInfo, MAX_MIPS>,
}

impl TextureMetaData {
    pub fn parse(meta: &[u8]) -> Result<TextureMetaData, LoadError> {
        let mut cursor = 0;
        let header = try_deserialize::<TextureMetaHeader>(meta, &mut cursor)?;
        let format = TextureFormat::from_u8(header.format)
            .ok_or(LoadError::Malformed("unknown texture format"))?;
        let compression_mode = CompressionMode::from_u8(header.compression_mode)
            .ok_or(LoadError::Malformed("unknown texture compression mode"))?;
        if header.mip_count as usize > MAX_MIPS {
            return Err(LoadError::Malformed("too many mip levels"));
        }
        if meta.len() != cursor + header.mip_count as usize * MipInfo::SERIALIZED_SIZE {
            return Err(LoadError::Malformed("mip count does not match the meta-data size"));
        }

        let mut mips = ArrayVec::new();
        for _ in 0..header.mip_count {
            let mip = try_deserialize::<MipInfo>(meta, &mut cursor)?;
            let pixels_size = mip.width as u64 * mip.height as u64 * format.bytes_per_pixel() as u64;
            if mip.original_size as u64 != pixels_size {
                return Err(LoadError::Malformed("mip size does not match its dimensions"));
            }
            if mip.compressed_size > mip.original_size
                || (compression_mode == CompressionMode::None && mip.is_compressed())
            {
                return Err(LoadError::Malformed("mip compressed size is invalid"));
            }
            mips.push(mip);
        }

        Ok(TextureMetaData {
            width: header.width,
            height: header.height,
            format,
            compression_mode,
            mips,
        })
    }

    pub fn original_size(&self) -> usize {
        self.mips.iter().map(|mip| mip.original_size as usize).sum()
    }

    pub fn compressed_size(&self) -> usize {
        self.mips.iter().map(|mip| mip.compressed_size as usize).sum()
    }
}

/// Decodes one mip into `dst`, which must be the mip's original size.
/// `src` is the mip's bytes in the binary blob.
fn unpack_mip(mip: &MipInfo, src: &[u8], dst: &mut [u8]) -> Result<(), LoadError> {
    if src.len() != mip.compressed_size as usize || dst.len() != mip.original_size as usize {
        return Err(LoadError::Truncated);
    }
    if !mip.is_compressed() {
        dst.copy_from_slice(src);
        return Ok(());
    }
    match lz4_flex::block::decompress_into(src, dst) {
        Ok(written) if written == dst.len() => Ok(()),
        Ok(_) | Err(_) => {
            tracing::error!("could not decompress a {}x{} mip", mip.width, mip.height);
            Err(LoadError::Decompression)
        }
    }
}

/// Decodes every mip into `dst`, one after the other.
pub fn unpack_texture(meta: &TextureMetaData, blob: &[u8], dst: &mut [u8]) -> Result<(), LoadError> {
    profiling::function_scope!();
    if blob.len() != meta.compressed_size() || dst.len() != meta.original_size() {
        return Err(LoadError::Truncated);
    }
    let mut src_offset = 0;
    let mut dst_offset = 0;
    for mip in &meta.mips {
        let src_end = src_offset + mip.compressed_size as usize;
        let dst_end = dst_offset + mip.original_size as usize;
        unpack_mip(mip, &blob[src_offset..src_end], &mut dst[dst_offset..dst_end])?;
        src_offset = src_end;
        dst_offset = dst_end;
    }
    Ok(())
}

/// Decodes a single mip into `dst`.
pub fn unpack_texture_page(
    meta: &TextureMetaData,
    page: usize,
    blob: &[u8],
    dst: &mut [u8],
) -> Result<(), LoadError> {
    let mip = meta
        .mips
        .get(page)
        .ok_or(LoadError::Malformed("mip level out of bounds"))?;
    let start = meta.mips[..page]
        .iter()
        .map(|mip| mip.compressed_size as usize)
        .sum::<usize>();
    let src = blob
        .get(start..start + mip.compressed_size as usize)
        .ok_or(LoadError::Truncated)?;
    unpack_mip(mip, src, dst)
}

/// A loaded texture, with each mip level decompressed into its own array.
#[derive(Debug)]
pub struct Texture<'a> {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub mips: ArrayVec<&'a SArray<u8>, MAX_MIPS>,
}

impl Texture<'_> {
    pub fn mip(&self, level: usize) -> Option<&[u8]> {
        self.mips.get(level).map(|mip| mip.as_slice())
    }
}

impl AssetBuffer<'_> {
    pub fn texture(&self) -> Option<&Texture<'_>> {
        // Safety: TextureLoader places the Texture first.
        unsafe { self.root::<Texture>(AssetType::Texture) }
    }
}

/// Loads `rtex` files into [`Texture`]s.
#[derive(Debug, Default)]
pub struct TextureLoader;

impl TextureLoader {
    fn read_meta(raw: &[u8]) -> Result<(TextureMetaData, &[u8]), LoadError> {
        let mut file = BinaryAssetFile::new(raw);
        let meta = TextureMetaData::parse(file.load_meta_data(&TEXTURE_TYPE_TAG)?)?;
        let blob = file.load_binary_data()?;
        if blob.len() != meta.compressed_size() {
            return Err(LoadError::Malformed("binary blob size does not match the mips"));
        }
        Ok((meta, blob))
    }
}

impl AssetLoader for TextureLoader {
    fn pattern(&self) -> &'static str {
        "rtex"
    }

    fn asset_type(&self) -> AssetType {
        AssetType::Texture
    }

    fn loaded_asset_size(
        &self,
        _path: &str,
        raw: &[u8],
        properties: MemoryProperties,
    ) -> Result<u64, LoadError> {
        let (meta, _) = TextureLoader::read_meta(raw)?;
        let mut estimate = SizeEstimate::new(properties);
        estimate.add::<Texture>();
        for mip in &meta.mips {
            estimate.add_sarray::<u8>(mip.original_size as usize);
        }
        Ok(estimate.total())
    }

    fn load_asset(&self, _path: &str, raw: &[u8], buffer: &mut AssetBuffer) -> Result<(), LoadError> {
        profiling::function_scope!();
        let (meta, blob) = TextureLoader::read_meta(raw)?;
        let mut cursor = buffer.cursor();
        let root = cursor.reserve::<Texture>()?;
        let mut mips = ArrayVec::new();
        let mut src_offset = 0;
        for mip in &meta.mips {
            let pixels = cursor.emplace_sarray::<u8>(mip.original_size as usize)?;
            pixels.fill(0);
            let src_end = src_offset + mip.compressed_size as usize;
            unpack_mip(mip, &blob[src_offset..src_end], pixels.as_mut_slice())?;
            src_offset = src_end;
            mips.push(&*pixels);
        }
        root.write(Texture {
            width: meta.width,
            height: meta.height,
            format: meta.format,
            mips,
        });
        cursor.finish()?;
        buffer.set_loaded(AssetType::Texture);
        Ok(())
    }
}

#[cfg(any(test, feature = "asset-conditioning"))]
pub use packing::{pack_texture, MipImage, PackError};

#[cfg(any(test, feature = "asset-conditioning"))]
mod packing {
    use alloc::vec::Vec;

    use crate::resources::{serialize::serialize_all, write_asset_file};

    use super::{
        CompressionMode, MipInfo, TextureFormat, TextureMetaHeader, MAX_MIPS, TEXTURE_TYPE_TAG,
    };

    #[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
    pub enum PackError {
        #[error("mip {level} should have {expected} bytes of pixels, but has {found}")]
        MipSizeMismatch {
            level: usize,
            expected: u64,
            found: usize,
        },
        #[error("could not compress mip {0}")]
        Compression(usize),
        #[error("textures can have at most {MAX_MIPS} mips, this one has {0}")]
        TooManyMips(usize),
    }

    /// The pixels of one mip level, in the texture's format.
    #[derive(Debug, Clone, Copy)]
    pub struct MipImage<'p> {
        pub width: u32,
        pub height: u32,
        pub pixels: &'p [u8],
    }

    /// Writes a complete `rtex` file. The texture's size is the size of the
    /// first mip.
    pub fn pack_texture(
        format: TextureFormat,
        compression_mode: CompressionMode,
        mips: &[MipImage],
    ) -> Result<Vec<u8>, PackError> {
        profiling::function_scope!();
        if mips.len() > MAX_MIPS {
            return Err(PackError::TooManyMips(mips.len()));
        }

        let mut infos = Vec::with_capacity(mips.len());
        let mut blob = Vec::new();
        let mut scratch = Vec::new();
        for (level, mip) in mips.iter().enumerate() {
            let expected = mip.width as u64 * mip.height as u64 * format.bytes_per_pixel() as u64;
            if mip.pixels.len() as u64 != expected {
                return Err(PackError::MipSizeMismatch {
                    level,
                    expected,
                    found: mip.pixels.len(),
                });
            }
            let original_size = mip.pixels.len() as u32;

            let compressed = match compression_mode {
                CompressionMode::None => None,
                CompressionMode::Lz4 => {
                    scratch.resize(lz4_flex::block::get_maximum_output_size(mip.pixels.len()), 0);
                    let size = lz4_flex::block::compress_into(mip.pixels, &mut scratch)
                        .map_err(|_| PackError::Compression(level))?;
                    // Only keep the compressed bytes if they're smaller than
                    // the fallback ratio.
                    if (size as u64) * 5 < (original_size as u64) * 4 {
                        Some(&scratch[..size])
                    } else {
                        tracing::debug!(
                            "mip {level} ({}x{}) compressed to {size}/{original_size} bytes, storing it raw",
                            mip.width,
                            mip.height,
                        );
                        None
                    }
                }
            };
            let stored = compressed.unwrap_or(mip.pixels);
            blob.extend_from_slice(stored);
            infos.push(MipInfo {
                width: mip.width,
                height: mip.height,
                original_size,
                compressed_size: stored.len() as u32,
            });
        }

        let (width, height) = mips.first().map_or((0, 0), |mip| (mip.width, mip.height));
        let mut meta = Vec::new();
        serialize_all(
            &[TextureMetaHeader {
                width,
                height,
                format: format as u8,
                compression_mode: compression_mode as u8,
                mip_count: mips.len() as u8,
            }],
            &mut meta,
        );
        serialize_all(&infos, &mut meta);
        Ok(write_asset_file(TEXTURE_TYPE_TAG, &meta, &blob))
    }
}
