// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Packs animations described in JSON:
//!
//! ```json
//! {
//!     "name": "walk",
//!     "duration": 24.0,
//!     "ticks_per_second": 24.0,
//!     "channels": [{
//!         "node": "hips",
//!         "positions": [{ "time": 0.0, "value": [0.0, 1.0, 0.0] }],
//!         "rotations": [{ "time": 0.0, "value": [0.0, 0.0, 0.0, 1.0] }]
//!     }]
//! }
//! ```
//!
//! Channels are keyed by the hash of their node's name, the same hash model
//! files use for their nodes.

use std::{fs, path::Path};

use anyhow::Context;
use engine::{
    geom::{Quat, Vec3},
    hash::string_id,
    resources::assets::{pack_animation, ChannelKeys, RotationKey, VectorKey},
};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnimationDescription {
    pub name: String,
    pub duration: f32,
    pub ticks_per_second: f32,
    pub channels: Vec<ChannelDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelDescription {
    pub node: String,
    #[serde(default)]
    pub positions: Vec<KeyDescription<[f32; 3]>>,
    #[serde(default)]
    pub scales: Vec<KeyDescription<[f32; 3]>>,
    #[serde(default)]
    pub rotations: Vec<KeyDescription<[f32; 4]>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyDescription<V> {
    pub time: f32,
    pub value: V,
}

pub fn import(description_path: &Path) -> anyhow::Result<Vec<u8>> {
    let json = fs::read_to_string(description_path)
        .context("Failed to open the animation description for importing")?;
    let description: AnimationDescription =
        serde_json::from_str(&json).context("Failed to parse the animation description")?;
    pack(&description)
}

pub fn pack(description: &AnimationDescription) -> anyhow::Result<Vec<u8>> {
    anyhow::ensure!(
        description.ticks_per_second > 0.0,
        "Animation {:?} has a non-positive tick rate",
        description.name,
    );

    let mut channels = Vec::with_capacity(description.channels.len());
    for channel in &description.channels {
        check_key_times(&channel.node, "position", &channel.positions)?;
        check_key_times(&channel.node, "scale", &channel.scales)?;
        check_key_times(&channel.node, "rotation", &channel.rotations)?;
        debug!(
            "Channel {:?}: {} position, {} scale and {} rotation keys.",
            channel.node,
            channel.positions.len(),
            channel.scales.len(),
            channel.rotations.len(),
        );
        channels.push(ChannelKeys {
            name_hash: string_id(&channel.node),
            positions: channel.positions.iter().map(vector_key).collect(),
            scales: channel.scales.iter().map(vector_key).collect(),
            rotations: channel
                .rotations
                .iter()
                .map(|&KeyDescription { time, value: [x, y, z, w] }| RotationKey {
                    time,
                    value: Quat::new(x, y, z, w),
                })
                .collect(),
        });
    }

    Ok(pack_animation(
        string_id(&description.name),
        description.duration,
        description.ticks_per_second,
        &channels,
    ))
}

fn vector_key(&KeyDescription { time, value: [x, y, z] }: &KeyDescription<[f32; 3]>) -> VectorKey {
    VectorKey {
        time,
        value: Vec3::new(x, y, z),
    }
}

fn check_key_times<V>(node: &str, kind: &str, keys: &[KeyDescription<V>]) -> anyhow::Result<()> {
    for (i, pair) in keys.windows(2).enumerate() {
        anyhow::ensure!(
            pair[0].time <= pair[1].time,
            "The {kind} keys of {node:?} are out of order at key {}",
            i + 1,
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use engine::{
        allocators::MemoryProperties,
        hash::string_id,
        resources::{
            assets::{AnimationLoader, ANIMATION_TYPE_TAG},
            AssetLoader, BinaryAssetFile,
        },
    };

    use super::{pack, AnimationDescription};

    const WALK: &str = r#"{
        "name": "walk",
        "duration": 2.0,
        "ticks_per_second": 30.0,
        "channels": [
            {
                "node": "hips",
                "positions": [
                    { "time": 0.0, "value": [0.0, 1.0, 0.0] },
                    { "time": 1.0, "value": [0.0, 1.1, 0.0] }
                ],
                "rotations": [{ "time": 0.0, "value": [0.0, 0.0, 0.0, 1.0] }]
            },
            { "node": "spine", "scales": [{ "time": 0.5, "value": [1.0, 1.0, 1.0] }] }
        ]
    }"#;

    #[test]
    fn descriptions_pack_into_animation_files() {
        let description: AnimationDescription = serde_json::from_str(WALK).unwrap();
        let packed = pack(&description).unwrap();
        assert_eq!(Some(ANIMATION_TYPE_TAG), BinaryAssetFile::peek_type_tag(&packed));
        assert!(AnimationLoader
            .loaded_asset_size("walk.ranm", &packed, MemoryProperties::new(16, 0, 0))
            .is_ok());
        assert_ne!(string_id("hips"), string_id("spine"));
    }

    #[test]
    fn unordered_keys_are_rejected() {
        let mut description: AnimationDescription = serde_json::from_str(WALK).unwrap();
        description.channels[0].positions.reverse();
        assert!(pack(&description).is_err());
    }
}
