// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::geom::{Mat4, Quat, Vec2, Vec3};

use super::{
    assets::{
        AnimationMetaData, BoneMetaData, ChannelMetaData, MeshMetaData, MipInfo, ModelMetaData,
        NodeMetaData, RotationKey, TextureMetaHeader, VectorKey, Vertex, VertexWeight,
    },
    FileHeader, LoadError,
};

pub trait Deserialize {
    /// The length of the buffer passed into [`Deserialize::deserialize`].
    const SERIALIZED_SIZE: usize;
    /// Deserializes the byte buffer into the struct. The length of `src` must
    /// match the same type's [`Deserialize::SERIALIZED_SIZE`] constant.
    fn deserialize(src: &[u8]) -> Self;
}

impl Deserialize for FileHeader {
    const SERIALIZED_SIZE: usize = 4 + u32::SERIALIZED_SIZE * 3;
    fn deserialize(src: &[u8]) -> Self {
        assert_eq!(Self::SERIALIZED_SIZE, src.len());
        let mut cursor = 0;
        FileHeader {
            type_tag: deserialize::<[u8; 4]>(src, &mut cursor),
            version: deserialize::<u32>(src, &mut cursor),
            meta_data_size: deserialize::<u32>(src, &mut cursor),
            binary_blob_size: deserialize::<u32>(src, &mut cursor),
        }
    }
}

impl Deserialize for AnimationMetaData {
    const SERIALIZED_SIZE: usize =
        u64::SERIALIZED_SIZE + f32::SERIALIZED_SIZE * 2 + u32::SERIALIZED_SIZE;
    fn deserialize(src: &[u8]) -> Self {
        assert_eq!(Self::SERIALIZED_SIZE, src.len());
        let mut cursor = 0;
        AnimationMetaData {
            name_hash: deserialize::<u64>(src, &mut cursor),
            duration: deserialize::<f32>(src, &mut cursor),
            ticks_per_second: deserialize::<f32>(src, &mut cursor),
            channel_count: deserialize::<u32>(src, &mut cursor),
        }
    }
}

impl Deserialize for ChannelMetaData {
    const SERIALIZED_SIZE: usize = u64::SERIALIZED_SIZE + u32::SERIALIZED_SIZE * 3;
    fn deserialize(src: &[u8]) -> Self {
        assert_eq!(Self::SERIALIZED_SIZE, src.len());
        let mut cursor = 0;
        ChannelMetaData {
            name_hash: deserialize::<u64>(src, &mut cursor),
            position_keys: deserialize::<u32>(src, &mut cursor),
            scale_keys: deserialize::<u32>(src, &mut cursor),
            rotation_keys: deserialize::<u32>(src, &mut cursor),
        }
    }
}

impl Deserialize for VectorKey {
    const SERIALIZED_SIZE: usize = f32::SERIALIZED_SIZE + Vec3::SERIALIZED_SIZE;
    fn deserialize(src: &[u8]) -> Self {
        assert_eq!(Self::SERIALIZED_SIZE, src.len());
        let mut cursor = 0;
        VectorKey {
            time: deserialize::<f32>(src, &mut cursor),
            value: deserialize::<Vec3>(src, &mut cursor),
        }
    }
}

impl Deserialize for RotationKey {
    const SERIALIZED_SIZE: usize = f32::SERIALIZED_SIZE + Quat::SERIALIZED_SIZE;
    fn deserialize(src: &[u8]) -> Self {
        assert_eq!(Self::SERIALIZED_SIZE, src.len());
        let mut cursor = 0;
        RotationKey {
            time: deserialize::<f32>(src, &mut cursor),
            value: deserialize::<Quat>(src, &mut cursor),
        }
    }
}

impl Deserialize for ModelMetaData {
    const SERIALIZED_SIZE: usize = u32::SERIALIZED_SIZE * 4;
    fn deserialize(src: &[u8]) -> Self {
        assert_eq!(Self::SERIALIZED_SIZE, src.len());
        let mut cursor = 0;
        ModelMetaData {
            node_count: deserialize::<u32>(src, &mut cursor),
            mesh_ref_count: deserialize::<u32>(src, &mut cursor),
            mesh_count: deserialize::<u32>(src, &mut cursor),
            bone_count: deserialize::<u32>(src, &mut cursor),
        }
    }
}

impl Deserialize for NodeMetaData {
    const SERIALIZED_SIZE: usize =
        u64::SERIALIZED_SIZE + Mat4::SERIALIZED_SIZE + u32::SERIALIZED_SIZE * 3;
    fn deserialize(src: &[u8]) -> Self {
        assert_eq!(Self::SERIALIZED_SIZE, src.len());
        let mut cursor = 0;
        NodeMetaData {
            name_hash: deserialize::<u64>(src, &mut cursor),
            transform: deserialize::<Mat4>(src, &mut cursor),
            child_count: deserialize::<u32>(src, &mut cursor),
            first_mesh_ref: deserialize::<u32>(src, &mut cursor),
            mesh_ref_count: deserialize::<u32>(src, &mut cursor),
        }
    }
}

impl Deserialize for MeshMetaData {
    const SERIALIZED_SIZE: usize = u32::SERIALIZED_SIZE * 5;
    fn deserialize(src: &[u8]) -> Self {
        assert_eq!(Self::SERIALIZED_SIZE, src.len());
        let mut cursor = 0;
        MeshMetaData {
            vertex_count: deserialize::<u32>(src, &mut cursor),
            index_count: deserialize::<u32>(src, &mut cursor),
            bone_count: deserialize::<u32>(src, &mut cursor),
            data_offset: deserialize::<u32>(src, &mut cursor),
            first_bone: deserialize::<u32>(src, &mut cursor),
        }
    }
}

impl Deserialize for BoneMetaData {
    const SERIALIZED_SIZE: usize =
        u64::SERIALIZED_SIZE + Mat4::SERIALIZED_SIZE + u32::SERIALIZED_SIZE * 2;
    fn deserialize(src: &[u8]) -> Self {
        assert_eq!(Self::SERIALIZED_SIZE, src.len());
        let mut cursor = 0;
        BoneMetaData {
            name_hash: deserialize::<u64>(src, &mut cursor),
            offset_matrix: deserialize::<Mat4>(src, &mut cursor),
            weight_count: deserialize::<u32>(src, &mut cursor),
            weights_offset: deserialize::<u32>(src, &mut cursor),
        }
    }
}

impl Deserialize for Vertex {
    const SERIALIZED_SIZE: usize = Vec3::SERIALIZED_SIZE * 2 + Vec2::SERIALIZED_SIZE;
    fn deserialize(src: &[u8]) -> Self {
        assert_eq!(Self::SERIALIZED_SIZE, src.len());
        let mut cursor = 0;
        Vertex {
            position: deserialize::<Vec3>(src, &mut cursor),
            normal: deserialize::<Vec3>(src, &mut cursor),
            uv: deserialize::<Vec2>(src, &mut cursor),
        }
    }
}

impl Deserialize for VertexWeight {
    const SERIALIZED_SIZE: usize = u32::SERIALIZED_SIZE + f32::SERIALIZED_SIZE;
    fn deserialize(src: &[u8]) -> Self {
        assert_eq!(Self::SERIALIZED_SIZE, src.len());
        let mut cursor = 0;
        VertexWeight {
            vertex: deserialize::<u32>(src, &mut cursor),
            weight: deserialize::<f32>(src, &mut cursor),
        }
    }
}

impl Deserialize for TextureMetaHeader {
    const SERIALIZED_SIZE: usize = u32::SERIALIZED_SIZE * 2 + u8::SERIALIZED_SIZE * 3;
    fn deserialize(src: &[u8]) -> Self {
        assert_eq!(Self::SERIALIZED_SIZE, src.len());
        let mut cursor = 0;
        TextureMetaHeader {
            width: deserialize::<u32>(src, &mut cursor),
            height: deserialize::<u32>(src, &mut cursor),
            format: deserialize::<u8>(src, &mut cursor),
            compression_mode: deserialize::<u8>(src, &mut cursor),
            mip_count: deserialize::<u8>(src, &mut cursor),
        }
    }
}

impl Deserialize for MipInfo {
    const SERIALIZED_SIZE: usize = u32::SERIALIZED_SIZE * 4;
    fn deserialize(src: &[u8]) -> Self {
        assert_eq!(Self::SERIALIZED_SIZE, src.len());
        let mut cursor = 0;
        MipInfo {
            width: deserialize::<u32>(src, &mut cursor),
            height: deserialize::<u32>(src, &mut cursor),
            original_size: deserialize::<u32>(src, &mut cursor),
            compressed_size: deserialize::<u32>(src, &mut cursor),
        }
    }
}

// Serialization helpers, at the bottom because they're very long, just so they
// compile to something sane in debug builds.

#[inline(always)]
pub fn deserialize<D: Deserialize>(src: &[u8], cursor: &mut usize) -> D {
    let value = D::deserialize(&src[*cursor..(*cursor + D::SERIALIZED_SIZE)]);
    *cursor += D::SERIALIZED_SIZE;
    value
}

/// Like [`deserialize`], but for reading untrusted files: fails with
/// [`LoadError::Truncated`] instead of panicking if `src` ends before the
/// value does.
#[inline(always)]
pub fn try_deserialize<D: Deserialize>(src: &[u8], cursor: &mut usize) -> Result<D, LoadError> {
    let end = cursor
        .checked_add(D::SERIALIZED_SIZE)
        .filter(|end| *end <= src.len())
        .ok_or(LoadError::Truncated)?;
    let value = D::deserialize(&src[*cursor..end]);
    *cursor = end;
    Ok(value)
}

impl Deserialize for Vec2 {
    const SERIALIZED_SIZE: usize = f32::SERIALIZED_SIZE * 2;
    #[inline]
    fn deserialize(src: &[u8]) -> Self {
        assert_eq!(Self::SERIALIZED_SIZE, src.len());
        Vec2 {
            x: f32::deserialize(&src[0..4]),
            y: f32::deserialize(&src[4..8]),
        }
    }
}

impl Deserialize for Vec3 {
    const SERIALIZED_SIZE: usize = f32::SERIALIZED_SIZE * 3;
    #[inline]
    fn deserialize(src: &[u8]) -> Self {
        assert_eq!(Self::SERIALIZED_SIZE, src.len());
        Vec3 {
            x: f32::deserialize(&src[0..4]),
            y: f32::deserialize(&src[4..8]),
            z: f32::deserialize(&src[8..12]),
        }
    }
}

impl Deserialize for Quat {
    const SERIALIZED_SIZE: usize = f32::SERIALIZED_SIZE * 4;
    #[inline]
    fn deserialize(src: &[u8]) -> Self {
        assert_eq!(Self::SERIALIZED_SIZE, src.len());
        Quat {
            x: f32::deserialize(&src[0..4]),
            y: f32::deserialize(&src[4..8]),
            z: f32::deserialize(&src[8..12]),
            w: f32::deserialize(&src[12..16]),
        }
    }
}

impl Deserialize for Mat4 {
    const SERIALIZED_SIZE: usize = f32::SERIALIZED_SIZE * 16;
    #[inline]
    fn deserialize(src: &[u8]) -> Self {
        assert_eq!(Self::SERIALIZED_SIZE, src.len());
        let mut cols = [[0.0; 4]; 4];
        for (i, value) in cols.iter_mut().flatten().enumerate() {
            *value = f32::deserialize(&src[i * 4..i * 4 + 4]);
        }
        Mat4 { cols }
    }
}

impl Deserialize for [u8; 4] {
    const SERIALIZED_SIZE: usize = 4;
    #[inline]
    fn deserialize(src: &[u8]) -> Self {
        assert_eq!(Self::SERIALIZED_SIZE, src.len());
        // Safety: all the indexes are covered by the assert above.
        unsafe {
            [
                *src.get_unchecked(0),
                *src.get_unchecked(1),
                *src.get_unchecked(2),
                *src.get_unchecked(3),
            ]
        }
    }
}

impl Deserialize for u8 {
    const SERIALIZED_SIZE: usize = 1;
    #[inline]
    fn deserialize(src: &[u8]) -> Self {
        assert_eq!(Self::SERIALIZED_SIZE, src.len());
        // Safety: the the index is checked by the assert above.
        unsafe { *src.get_unchecked(0) }
    }
}

impl Deserialize for u32 {
    const SERIALIZED_SIZE: usize = 4;
    #[inline]
    fn deserialize(src: &[u8]) -> Self {
        u32::from_le_bytes(<[u8; 4]>::deserialize(src))
    }
}

impl Deserialize for f32 {
    const SERIALIZED_SIZE: usize = 4;
    #[inline]
    fn deserialize(src: &[u8]) -> Self {
        f32::from_bits(u32::deserialize(src))
    }
}

impl Deserialize for u64 {
    const SERIALIZED_SIZE: usize = 8;
    #[inline]
    fn deserialize(src: &[u8]) -> Self {
        assert_eq!(Self::SERIALIZED_SIZE, src.len());
        // Safety: all the indexes are covered by the assert above.
        let bytes = unsafe {
            [
                *src.get_unchecked(0),
                *src.get_unchecked(1),
                *src.get_unchecked(2),
                *src.get_unchecked(3),
                *src.get_unchecked(4),
                *src.get_unchecked(5),
                *src.get_unchecked(6),
                *src.get_unchecked(7),
            ]
        };
        u64::from_le_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        geom::{Mat4, Quat, Vec3},
        resources::{
            assets::{RotationKey, VectorKey},
            serialize::{serialize, Serialize},
            FileHeader, LoadError,
        },
    };

    use super::{deserialize, try_deserialize};

    #[test]
    fn header_layout_is_little_endian() {
        let header = FileHeader {
            type_tag: *b"ranm",
            version: 1,
            meta_data_size: 0x0102,
            binary_blob_size: 7,
        };
        let mut bytes = [0; FileHeader::SERIALIZED_SIZE];
        serialize(&header, &mut bytes, &mut 0);
        assert_eq!(
            [b'r', b'a', b'n', b'm', 1, 0, 0, 0, 2, 1, 0, 0, 7, 0, 0, 0],
            bytes,
        );
        assert_eq!(header, deserialize::<FileHeader>(&bytes, &mut 0));
    }

    #[test]
    fn keys_and_matrices_survive_serialization() {
        let mut bytes = [0u8; 128];
        let mut cursor = 0;
        let position = VectorKey {
            time: 0.5,
            value: Vec3::new(1.0, -2.0, 3.5),
        };
        let rotation = RotationKey {
            time: 1.0,
            value: Quat::new(0.0, 0.7071, 0.0, 0.7071),
        };
        let transform = Mat4::from_translation(Vec3::new(4.0, 5.0, 6.0));
        serialize(&position, &mut bytes, &mut cursor);
        serialize(&rotation, &mut bytes, &mut cursor);
        serialize(&transform, &mut bytes, &mut cursor);
        assert_eq!(16 + 20 + 64, cursor);

        let mut cursor = 0;
        assert_eq!(position, deserialize::<VectorKey>(&bytes, &mut cursor));
        assert_eq!(rotation, deserialize::<RotationKey>(&bytes, &mut cursor));
        assert_eq!(transform, deserialize::<Mat4>(&bytes, &mut cursor));
    }

    #[test]
    fn short_input_is_truncated_not_a_panic() {
        let bytes = [0u8; 10];
        let mut cursor = 4;
        assert_eq!(Ok(0), try_deserialize::<u32>(&bytes, &mut cursor));
        assert_eq!(
            Err(LoadError::Truncated),
            try_deserialize::<u32>(&bytes, &mut cursor),
        );
        assert_eq!(8, cursor);
    }
}
