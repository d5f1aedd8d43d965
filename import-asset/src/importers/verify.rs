// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, path::Path};

use anyhow::Context;
use engine::{
    allocators::{MallocAllocator, MallocArena},
    resources::{
        assets::{AnimModelLoader, AnimationLoader, ModelLoader, TextureLoader},
        AssetBuffer, AssetHandle, AssetType, LoaderRegistry,
    },
};
use tracing::info;

/// The alignment the engine allocates asset buffers with.
const ASSET_ALIGNMENT: usize = 16;

pub fn verify(path: &Path, skinned: bool) -> anyhow::Result<()> {
    let raw = fs::read(path).context("Failed to open the asset file for verifying")?;
    let summary = verify_bytes(&path.to_string_lossy(), &raw, skinned)?;
    info!("{}: {summary}", path.display());
    Ok(())
}

/// Sizes and loads the asset like the engine would, returning a short
/// description of the loaded asset.
pub fn verify_bytes(path: &str, raw: &[u8], skinned: bool) -> anyhow::Result<String> {
    let arena = MallocArena::new(MallocAllocator::new());
    let mut registry = LoaderRegistry::new();
    registry.register(&AnimationLoader);
    registry.register(&TextureLoader);
    registry.register(&ModelLoader);
    registry.register(&AnimModelLoader);

    let loader = registry.loader_for_file(raw);
    let asset_type = match loader.asset_type() {
        AssetType::Model if skinned => AssetType::AnimModel,
        asset_type => asset_type,
    };
    let buffer = registry
        .load_as(asset_type, path, raw, &arena, ASSET_ALIGNMENT, AssetHandle(0))
        .with_context(|| format!("Failed to load the file as {asset_type:?}"))?;
    let summary = describe(&buffer).context("The loaded asset is not of the expected type")?;
    Ok(format!("{summary}, {} bytes when loaded", buffer.size()))
}

fn describe(buffer: &AssetBuffer) -> Option<String> {
    Some(match buffer.loaded_type()? {
        AssetType::Animation => {
            let animation = buffer.animation()?;
            format!(
                "animation of {} ticks at {} ticks per second, {} channels",
                animation.duration,
                animation.ticks_per_second,
                animation.channels.size(),
            )
        }
        AssetType::Model => {
            let model = buffer.model()?;
            let vertices: usize = model.meshes.iter().map(|mesh| mesh.vertices.len()).sum();
            format!("model of {} meshes, {vertices} vertices", model.meshes.size())
        }
        AssetType::AnimModel => {
            let model = buffer.anim_model()?;
            format!(
                "animated model of {} meshes, {} bones, {} skeleton nodes",
                model.meshes.size(),
                model.bone_info.size(),
                model.skeleton.size(),
            )
        }
        AssetType::Texture => {
            let texture = buffer.texture()?;
            format!(
                "{}x{} {:?} texture with {} mips",
                texture.width,
                texture.height,
                texture.format,
                texture.mips.len(),
            )
        }
        AssetType::Sound => "sound bank".to_string(),
        AssetType::Raw => format!("unprocessed file of {} bytes", buffer.data().len()),
    })
}
