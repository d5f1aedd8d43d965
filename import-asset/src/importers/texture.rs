// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, path::Path};

use anyhow::Context;
use engine::resources::assets::{pack_texture, CompressionMode, MipImage, TextureFormat, MAX_MIPS};
use image::{imageops::FilterType, load_from_memory, DynamicImage};
use tracing::debug;

pub fn import(
    image_path: &Path,
    format: TextureFormat,
    compression: CompressionMode,
    mipmaps: bool,
) -> anyhow::Result<Vec<u8>> {
    let image_bytes = fs::read(image_path).context("Failed to open texture file for importing")?;
    let image = load_from_memory(&image_bytes)
        .context("Failed to read image file as an image (unsupported format?)")?;
    pack_image(&image, format, compression, mipmaps)
}

/// Packs the image and, if `mipmaps` is set, its downscaled versions down to
/// 1x1 pixels (or as many as fit in [`MAX_MIPS`]).
pub fn pack_image(
    image: &DynamicImage,
    format: TextureFormat,
    compression: CompressionMode,
    mipmaps: bool,
) -> anyhow::Result<Vec<u8>> {
    let mut levels = vec![(image.width(), image.height(), pixels(image, format))];
    let (mut width, mut height) = (image.width(), image.height());
    while mipmaps && (width > 1 || height > 1) && levels.len() < MAX_MIPS {
        width = (width / 2).max(1);
        height = (height / 2).max(1);
        let mip = image.resize_exact(width, height, FilterType::CatmullRom);
        debug!("Generated a {width}x{height} mip.");
        levels.push((width, height, pixels(&mip, format)));
    }

    let mips = levels
        .iter()
        .map(|(width, height, pixels)| MipImage {
            width: *width,
            height: *height,
            pixels,
        })
        .collect::<Vec<_>>();
    pack_texture(format, compression, &mips).context("Failed to pack the texture")
}

fn pixels(image: &DynamicImage, format: TextureFormat) -> Vec<u8> {
    match format {
        TextureFormat::R8 => image.to_luma8().into_raw(),
        TextureFormat::Rg8 => image.to_luma_alpha8().into_raw(),
        TextureFormat::Rgb8 => image.to_rgb8().into_raw(),
        TextureFormat::Rgba8 => image.to_rgba8().into_raw(),
    }
}

#[cfg(test)]
mod tests {
    use engine::resources::{
        assets::{unpack_texture, CompressionMode, TextureFormat, TextureMetaData, TEXTURE_TYPE_TAG},
        BinaryAssetFile,
    };
    use image::{DynamicImage, Rgba, RgbaImage};

    use super::pack_image;

    fn checkerboard() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(8, 4, |x, y| {
            if (x / 2 + y / 2) % 2 == 0 {
                Rgba([0xFF, 0x00, 0xFF, 0xFF])
            } else {
                Rgba([0x00, 0x00, 0x00, 0xFF])
            }
        }))
    }

    #[test]
    fn mip_chains_go_down_to_one_pixel() {
        let packed = pack_image(&checkerboard(), TextureFormat::Rgb8, CompressionMode::Lz4, true).unwrap();
        let mut file = BinaryAssetFile::new(&packed);
        let meta = TextureMetaData::parse(file.load_meta_data(&TEXTURE_TYPE_TAG).unwrap()).unwrap();
        let sizes = meta.mips.iter().map(|mip| (mip.width, mip.height)).collect::<Vec<_>>();
        assert_eq!(vec![(8, 4), (4, 2), (2, 1), (1, 1)], sizes);

        let mut pixels = vec![0; meta.original_size()];
        unpack_texture(&meta, file.load_binary_data().unwrap(), &mut pixels).unwrap();
        assert_eq!(&[0xFF, 0x00, 0xFF, 0xFF, 0x00, 0xFF], &pixels[..6]);
    }

    #[test]
    fn single_mip_textures() {
        let packed = pack_image(&checkerboard(), TextureFormat::R8, CompressionMode::None, false).unwrap();
        let mut file = BinaryAssetFile::new(&packed);
        let meta = TextureMetaData::parse(file.load_meta_data(&TEXTURE_TYPE_TAG).unwrap()).unwrap();
        assert_eq!(1, meta.mips.len());
        assert_eq!(8 * 4, meta.original_size());
        assert_eq!(meta.original_size(), meta.compressed_size());
    }
}
