// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::{
    allocators::MemoryProperties,
    collections::{capacity_for, SArray, SHashMap},
    geom::{Quat, Vec3},
    resources::{
        deserialize::{try_deserialize, Deserialize},
        AssetBuffer, AssetLoader, AssetType, BinaryAssetFile, LoadError, PlacementCursor,
        SizeEstimate,
    },
};

pub const ANIMATION_TYPE_TAG: [u8; 4] = *b"ranm";

/// The first record of an animation file's meta-data, followed by
/// `channel_count` [`ChannelMetaData`]s.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AnimationMetaData {
    pub name_hash: u64,
    pub duration: f32,
    pub ticks_per_second: f32,
    pub channel_count: u32,
}

/// Describes one channel's keys in the binary blob. The blob contains, for
/// each channel in order, the position keys, then the scale keys, then the
/// rotation keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelMetaData {
    pub name_hash: u64,
    pub position_keys: u32,
    pub scale_keys: u32,
    pub rotation_keys: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VectorKey {
    pub time: f32,
    pub value: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RotationKey {
    pub time: f32,
    pub value: Quat,
}

/// The keyframes of one animated node. Key arrays are only placed for the
/// kinds of keys the channel has.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnimationChannel<'a> {
    pub name_hash: u64,
    pub positions: Option<&'a SArray<VectorKey>>,
    pub scales: Option<&'a SArray<VectorKey>>,
    pub rotations: Option<&'a SArray<RotationKey>>,
}

impl AnimationChannel<'_> {
    pub fn position_keys(&self) -> &[VectorKey] {
        self.positions.map(SArray::as_slice).unwrap_or_default()
    }

    pub fn scale_keys(&self) -> &[VectorKey] {
        self.scales.map(SArray::as_slice).unwrap_or_default()
    }

    pub fn rotation_keys(&self) -> &[RotationKey] {
        self.rotations.map(SArray::as_slice).unwrap_or_default()
    }
}

/// A loaded animation. Lives at the start of its [`AssetBuffer`], with the
/// channel map and key arrays after it.
#[derive(Debug)]
pub struct Animation<'a> {
    pub name_hash: u64,
    pub duration: f32,
    pub ticks_per_second: f32,
    /// The channels, keyed by the hashed name of the node they animate.
    pub channels: &'a SHashMap<AnimationChannel<'a>>,
}

impl<'a> Animation<'a> {
    pub fn channel(&self, name_hash: u64) -> Option<&AnimationChannel<'a>> {
        self.channels.get(name_hash)
    }
}

impl AssetBuffer<'_> {
    /// The animation in this buffer, if it contains one.
    pub fn animation(&self) -> Option<&Animation<'_>> {
        // Safety: AnimationLoader places the Animation first.
        unsafe { self.root::<Animation>(AssetType::Animation) }
    }
}

/// Loads `ranm` files into [`Animation`]s.
#[derive(Debug, Default)]
pub struct AnimationLoader;

impl AnimationLoader {
    fn channel_map_capacity(channel_count: u32) -> usize {
        capacity_for(channel_count as usize).max(1)
    }

    fn read_channels(
        meta: &[u8],
    ) -> Result<(AnimationMetaData, impl Iterator<Item = Result<ChannelMetaData, LoadError>> + '_), LoadError> {
        let mut cursor = 0;
        let animation = try_deserialize::<AnimationMetaData>(meta, &mut cursor)?;
        let expected_len = AnimationMetaData::SERIALIZED_SIZE
            + animation.channel_count as usize * ChannelMetaData::SERIALIZED_SIZE;
        if meta.len() != expected_len {
            return Err(LoadError::Malformed("channel count does not match the meta-data size"));
        }
        let channels = (0..animation.channel_count)
            .map(move |_| try_deserialize::<ChannelMetaData>(meta, &mut cursor));
        Ok((animation, channels))
    }
}

impl AssetLoader for AnimationLoader {
    fn pattern(&self) -> &'static str {
        "ranm"
    }

    fn asset_type(&self) -> AssetType {
        AssetType::Animation
    }

    fn loaded_asset_size(
        &self,
        _path: &str,
        raw: &[u8],
        properties: MemoryProperties,
    ) -> Result<u64, LoadError> {
        profiling::function_scope!();
        let mut file = BinaryAssetFile::new(raw);
        let meta = file.load_meta_data(&ANIMATION_TYPE_TAG)?;
        let blob_size = file.load_binary_data()?.len() as u64;
        let (animation, channels) = AnimationLoader::read_channels(meta)?;

        let mut estimate = SizeEstimate::new(properties);
        estimate.add::<Animation>();
        estimate.add_shashmap::<AnimationChannel>(AnimationLoader::channel_map_capacity(
            animation.channel_count,
        ));
        // The keys are all in the blob, so their sizes can't add up to more
        // than it, which also keeps the key counts from overflowing anything.
        let mut key_bytes = 0u64;
        for channel in channels {
            let channel = channel?;
            key_bytes += channel.position_keys as u64 * VectorKey::SERIALIZED_SIZE as u64
                + channel.scale_keys as u64 * VectorKey::SERIALIZED_SIZE as u64
                + channel.rotation_keys as u64 * RotationKey::SERIALIZED_SIZE as u64;
            if key_bytes > blob_size {
                return Err(LoadError::Truncated);
            }
            estimate_keys::<VectorKey>(&mut estimate, channel.position_keys);
            estimate_keys::<VectorKey>(&mut estimate, channel.scale_keys);
            estimate_keys::<RotationKey>(&mut estimate, channel.rotation_keys);
        }
        Ok(estimate.total())
    }

    fn load_asset(&self, path: &str, raw: &[u8], buffer: &mut AssetBuffer) -> Result<(), LoadError> {
        profiling::function_scope!();
        let mut file = BinaryAssetFile::new(raw);
        let meta = file.load_meta_data(&ANIMATION_TYPE_TAG)?;
        let blob = file.load_binary_data()?;
        let (animation, channel_metas) = AnimationLoader::read_channels(meta)?;

        let mut cursor = buffer.cursor();
        let root = cursor.reserve::<Animation>()?;
        let channels = cursor.emplace_shashmap::<AnimationChannel>(
            AnimationLoader::channel_map_capacity(animation.channel_count),
        )?;

        let mut blob_cursor = 0;
        for channel in channel_metas {
            let channel = channel?;
            let positions = place_keys(&mut cursor, blob, &mut blob_cursor, channel.position_keys)?;
            let scales = place_keys(&mut cursor, blob, &mut blob_cursor, channel.scale_keys)?;
            let rotations = place_keys(&mut cursor, blob, &mut blob_cursor, channel.rotation_keys)?;
            let loaded = AnimationChannel {
                name_hash: channel.name_hash,
                positions,
                scales,
                rotations,
            };
            if channels.has(channel.name_hash) {
                tracing::warn!("{path:?} has multiple channels for the node {:x}", channel.name_hash);
            }
            if channels.set(channel.name_hash, loaded).is_err() {
                return Err(LoadError::Malformed("more channels than the channel count"));
            }
        }
        if blob_cursor != blob.len() {
            return Err(LoadError::Malformed("binary blob has bytes not used by any channel"));
        }

        root.write(Animation {
            name_hash: animation.name_hash,
            duration: animation.duration,
            ticks_per_second: animation.ticks_per_second,
            channels,
        });
        cursor.finish()?;
        buffer.set_loaded(AssetType::Animation);
        Ok(())
    }
}

fn estimate_keys<K>(estimate: &mut SizeEstimate, count: u32) {
    if count > 0 {
        estimate.add_sarray::<K>(count as usize);
    }
}

fn place_keys<'a, K: Deserialize + Default>(
    cursor: &mut PlacementCursor<'a>,
    blob: &[u8],
    blob_cursor: &mut usize,
    count: u32,
) -> Result<Option<&'a SArray<K>>, LoadError> {
    if count == 0 {
        return Ok(None);
    }
    let keys = cursor.emplace_sarray::<K>(count as usize)?;
    for _ in 0..count {
        let key = try_deserialize::<K>(blob, blob_cursor)?;
        if keys.push(key).is_err() {
            return Err(LoadError::OutOfSpace);
        }
    }
    Ok(Some(keys))
}

/// The keyframes of one channel, for [`pack_animation`].
#[cfg(any(test, feature = "asset-conditioning"))]
#[derive(Debug, Clone, Default)]
pub struct ChannelKeys {
    pub name_hash: u64,
    pub positions: alloc::vec::Vec<VectorKey>,
    pub scales: alloc::vec::Vec<VectorKey>,
    pub rotations: alloc::vec::Vec<RotationKey>,
}

/// Writes a complete `ranm` file.
#[cfg(any(test, feature = "asset-conditioning"))]
pub fn pack_animation(
    name_hash: u64,
    duration: f32,
    ticks_per_second: f32,
    channels: &[ChannelKeys],
) -> alloc::vec::Vec<u8> {
    use alloc::vec::Vec;

    use crate::resources::{serialize::serialize_all, write_asset_file};

    let mut meta = Vec::new();
    serialize_all(
        &[AnimationMetaData {
            name_hash,
            duration,
            ticks_per_second,
            channel_count: channels.len() as u32,
        }],
        &mut meta,
    );
    let channel_metas = channels
        .iter()
        .map(|channel| ChannelMetaData {
            name_hash: channel.name_hash,
            position_keys: channel.positions.len() as u32,
            scale_keys: channel.scales.len() as u32,
            rotation_keys: channel.rotations.len() as u32,
        })
        .collect::<Vec<_>>();
    serialize_all(&channel_metas, &mut meta);

    let mut blob = Vec::new();
    for channel in channels {
        serialize_all(&channel.positions, &mut blob);
        serialize_all(&channel.scales, &mut blob);
        serialize_all(&channel.rotations, &mut blob);
    }
    write_asset_file(ANIMATION_TYPE_TAG, &meta, &blob)
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use crate::{
        allocators::{
            Arena, BasicBoundsChecking, BasicMemoryTracking, FreeListAllocator, MemoryArea,
            MemoryArena,
        },
        collections::{SArray, SHashMap},
        geom::{Quat, Vec3},
        hash::string_id,
        resources::{load_with, AssetHandle, AssetLoader, LoadError},
        test_platform::TestPlatform,
    };

    use super::{
        pack_animation, Animation, AnimationChannel, AnimationLoader, ChannelKeys, RotationKey,
        VectorKey,
    };

    fn key(time: f32, x: f32) -> VectorKey {
        VectorKey {
            time,
            value: Vec3::new(x, 0.0, 0.0),
        }
    }

    #[test]
    fn two_channel_animation_round_trip() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 16 * 1024).unwrap();
        let arena: Arena<FreeListAllocator, BasicBoundsChecking, BasicMemoryTracking> =
            Arena::new(FreeListAllocator::new(area.add_sub_area(16 * 1024).unwrap()).unwrap());

        let hips = string_id("hips");
        let head = string_id("head");
        let turn = RotationKey {
            time: 0.25,
            value: Quat::new(0.0, 1.0, 0.0, 0.0),
        };
        let file = pack_animation(
            string_id("wave"),
            2.0,
            30.0,
            &[
                ChannelKeys {
                    name_hash: hips,
                    positions: vec![key(0.0, 1.0), key(0.5, 2.0), key(1.0, 3.0)],
                    ..Default::default()
                },
                ChannelKeys {
                    name_hash: head,
                    rotations: vec![turn],
                    ..Default::default()
                },
            ],
        );

        let properties = arena.memory_properties(16);
        let expected = properties.reservation(size_of::<Animation>() as u64)
            + properties.reservation(SHashMap::<AnimationChannel>::memory_size(3) as u64)
            + properties.reservation(SArray::<VectorKey>::memory_size(3) as u64)
            + properties.reservation(SArray::<RotationKey>::memory_size(1) as u64);
        let loader = AnimationLoader;
        assert_eq!(
            Ok(expected),
            loader.loaded_asset_size("wave.ranm", &file, properties),
        );

        {
            let buffer = load_with(&loader, "wave.ranm", &file, &arena, 16, AssetHandle(0)).unwrap();
            assert_eq!(expected as usize, buffer.size());
            let animation = buffer.animation().unwrap();
            assert_eq!(string_id("wave"), animation.name_hash);
            assert_eq!(30.0, animation.ticks_per_second);
            assert_eq!(2, animation.channels.size());
            assert_eq!(3, animation.channels.capacity());

            let hips_channel = animation.channel(hips).unwrap();
            assert_eq!(hips, hips_channel.name_hash);
            assert_eq!(&[key(0.0, 1.0), key(0.5, 2.0), key(1.0, 3.0)], hips_channel.position_keys());
            assert!(hips_channel.rotations.is_none());
            assert!(hips_channel.scales.is_none());

            let head_channel = animation.channel(head).unwrap();
            assert_eq!(&[turn], head_channel.rotation_keys());
            assert!(head_channel.position_keys().is_empty());

            assert!(animation.channel(string_id("tail")).is_none());
            assert!(buffer.model().is_none());
        }
        assert_eq!(0, arena.tracking().live_allocations());
    }

    #[test]
    fn estimate_matches_consumption() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 64 * 1024).unwrap();
        let arena: Arena<FreeListAllocator, BasicBoundsChecking, BasicMemoryTracking> =
            Arena::new(FreeListAllocator::new(area.add_sub_area(64 * 1024).unwrap()).unwrap());

        for alignment in [8, 16, 32, 64] {
            for channel_count in 0..6u32 {
                let channels = (0..channel_count)
                    .map(|i| ChannelKeys {
                        name_hash: i as u64 * 7919,
                        positions: (0..i % 3).map(|k| key(k as f32, i as f32)).collect(),
                        scales: (0..(i + 1) % 2).map(|k| key(k as f32, 1.0)).collect(),
                        rotations: (0..i)
                            .map(|k| RotationKey {
                                time: k as f32,
                                value: Quat::IDENTITY,
                            })
                            .collect(),
                    })
                    .collect::<alloc::vec::Vec<_>>();
                let file = pack_animation(1, 1.0, 24.0, &channels);
                let buffer = load_with(&AnimationLoader, "a.ranm", &file, &arena, alignment, AssetHandle(1))
                    .unwrap();
                let animation = buffer.animation().unwrap();
                assert_eq!(channel_count as usize, animation.channels.size());
                for channel in &channels {
                    let loaded = animation.channel(channel.name_hash).unwrap();
                    assert_eq!(&channel.positions[..], loaded.position_keys());
                    assert_eq!(&channel.scales[..], loaded.scale_keys());
                    assert_eq!(&channel.rotations[..], loaded.rotation_keys());
                }
            }
        }
        assert_eq!(0, arena.tracking().live_allocations());
    }

    #[test]
    fn bad_files_are_rejected() {
        let properties = crate::allocators::MemoryProperties::new(16, 0, 0);
        let mut file = pack_animation(
            1,
            1.0,
            24.0,
            &[ChannelKeys {
                name_hash: 5,
                positions: vec![key(0.0, 0.0)],
                ..Default::default()
            }],
        );

        let mut texture = file.clone();
        texture[0..4].copy_from_slice(b"rtex");
        assert!(matches!(
            AnimationLoader.loaded_asset_size("a", &texture, properties),
            Err(LoadError::WrongFileType { .. }),
        ));

        // Claim far more position keys than the blob has.
        let mut greedy = file.clone();
        greedy[16 + 20 + 8..16 + 20 + 12].copy_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(
            Err(LoadError::Truncated),
            AnimationLoader.loaded_asset_size("a", &greedy, properties),
        );

        // Claim a second channel without adding its meta-data.
        file[16 + 16] = 2;
        assert_eq!(
            Err(LoadError::Malformed("channel count does not match the meta-data size")),
            AnimationLoader.loaded_asset_size("a", &file, properties),
        );
    }
}
