// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod animation;
pub mod model;
pub mod texture;
pub mod verify;

use std::{fs, path::Path};

use anyhow::Context;
use engine::resources::assets::CompressionMode;
use tracing::info;

use crate::cli::Command;

/// Runs an import command, writing the packed asset file.
pub fn import(command: &Command) -> anyhow::Result<()> {
    let (source, output, packed) = match command {
        Command::Texture {
            image,
            output,
            format,
            uncompressed,
            mipmaps,
        } => {
            let compression = if *uncompressed {
                CompressionMode::None
            } else {
                CompressionMode::Lz4
            };
            let packed = texture::import(image, (*format).into(), compression, *mipmaps)?;
            (image, output, packed)
        }
        Command::Animation {
            description,
            output,
        } => (description, output, animation::import(description)?),
        Command::Model {
            description,
            output,
        } => (description, output, model::import(description)?),
        Command::Verify { .. } | Command::Reimport => {
            anyhow::bail!("{command:?} is not an import command")
        }
    };
    write_asset(output, &packed)?;
    info!(
        "Packed {} into {} ({} bytes).",
        source.display(),
        output.display(),
        packed.len(),
    );
    Ok(())
}

fn write_asset(output: &Path, packed: &[u8]) -> anyhow::Result<()> {
    if let Some(dir) = output.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).context("Failed to create the output directory")?;
    }
    fs::write(output, packed).context("Failed to write the asset file")
}
