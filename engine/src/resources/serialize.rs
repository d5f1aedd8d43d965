// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::geom::{Mat4, Quat, Vec2, Vec3};

use super::{
    assets::{
        AnimationMetaData, BoneMetaData, ChannelMetaData, MeshMetaData, MipInfo, ModelMetaData,
        NodeMetaData, RotationKey, TextureMetaHeader, VectorKey, Vertex, VertexWeight,
    },
    FileHeader,
};

pub trait Serialize {
    /// The length of the buffer passed into [`Serialize::serialize`].
    const SERIALIZED_SIZE: usize;
    /// Serializes the struct into the byte buffer. The length of `dst` must
    /// match the same type's [`Serialize::SERIALIZED_SIZE`] constant.
    fn serialize(&self, dst: &mut [u8]);
}

impl Serialize for FileHeader {
    const SERIALIZED_SIZE: usize = 4 + u32::SERIALIZED_SIZE * 3;
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(Self::SERIALIZED_SIZE, dst.len());
        let mut cursor = 0;
        let FileHeader {
            type_tag,
            version,
            meta_data_size,
            binary_blob_size,
        } = self;
        serialize::<[u8; 4]>(type_tag, dst, &mut cursor);
        serialize::<u32>(version, dst, &mut cursor);
        serialize::<u32>(meta_data_size, dst, &mut cursor);
        serialize::<u32>(binary_blob_size, dst, &mut cursor);
    }
}

impl Serialize for AnimationMetaData {
    const SERIALIZED_SIZE: usize =
        u64::SERIALIZED_SIZE + f32::SERIALIZED_SIZE * 2 + u32::SERIALIZED_SIZE;
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(Self::SERIALIZED_SIZE, dst.len());
        let mut cursor = 0;
        let AnimationMetaData {
            name_hash,
            duration,
            ticks_per_second,
            channel_count,
        } = self;
        serialize::<u64>(name_hash, dst, &mut cursor);
        serialize::<f32>(duration, dst, &mut cursor);
        serialize::<f32>(ticks_per_second, dst, &mut cursor);
        serialize::<u32>(channel_count, dst, &mut cursor);
    }
}

impl Serialize for ChannelMetaData {
    const SERIALIZED_SIZE: usize = u64::SERIALIZED_SIZE + u32::SERIALIZED_SIZE * 3;
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(Self::SERIALIZED_SIZE, dst.len());
        let mut cursor = 0;
        let ChannelMetaData {
            name_hash,
            position_keys,
            scale_keys,
            rotation_keys,
        } = self;
        serialize::<u64>(name_hash, dst, &mut cursor);
        serialize::<u32>(position_keys, dst, &mut cursor);
        serialize::<u32>(scale_keys, dst, &mut cursor);
        serialize::<u32>(rotation_keys, dst, &mut cursor);
    }
}

impl Serialize for VectorKey {
    const SERIALIZED_SIZE: usize = f32::SERIALIZED_SIZE + Vec3::SERIALIZED_SIZE;
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(Self::SERIALIZED_SIZE, dst.len());
        let mut cursor = 0;
        let VectorKey { time, value } = self;
        serialize::<f32>(time, dst, &mut cursor);
        serialize::<Vec3>(value, dst, &mut cursor);
    }
}

impl Serialize for RotationKey {
    const SERIALIZED_SIZE: usize = f32::SERIALIZED_SIZE + Quat::SERIALIZED_SIZE;
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(Self::SERIALIZED_SIZE, dst.len());
        let mut cursor = 0;
        let RotationKey { time, value } = self;
        serialize::<f32>(time, dst, &mut cursor);
        serialize::<Quat>(value, dst, &mut cursor);
    }
}

impl Serialize for ModelMetaData {
    const SERIALIZED_SIZE: usize = u32::SERIALIZED_SIZE * 4;
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(Self::SERIALIZED_SIZE, dst.len());
        let mut cursor = 0;
        let ModelMetaData {
            node_count,
            mesh_ref_count,
            mesh_count,
            bone_count,
        } = self;
        serialize::<u32>(node_count, dst, &mut cursor);
        serialize::<u32>(mesh_ref_count, dst, &mut cursor);
        serialize::<u32>(mesh_count, dst, &mut cursor);
        serialize::<u32>(bone_count, dst, &mut cursor);
    }
}

impl Serialize for NodeMetaData {
    const SERIALIZED_SIZE: usize =
        u64::SERIALIZED_SIZE + Mat4::SERIALIZED_SIZE + u32::SERIALIZED_SIZE * 3;
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(Self::SERIALIZED_SIZE, dst.len());
        let mut cursor = 0;
        let NodeMetaData {
            name_hash,
            transform,
            child_count,
            first_mesh_ref,
            mesh_ref_count,
        } = self;
        serialize::<u64>(name_hash, dst, &mut cursor);
        serialize::<Mat4>(transform, dst, &mut cursor);
        serialize::<u32>(child_count, dst, &mut cursor);
        serialize::<u32>(first_mesh_ref, dst, &mut cursor);
        serialize::<u32>(mesh_ref_count, dst, &mut cursor);
    }
}

impl Serialize for MeshMetaData {
    const SERIALIZED_SIZE: usize = u32::SERIALIZED_SIZE * 5;
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(Self::SERIALIZED_SIZE, dst.len());
        let mut cursor = 0;
        let MeshMetaData {
            vertex_count,
            index_count,
            bone_count,
            data_offset,
            first_bone,
        } = self;
        serialize::<u32>(vertex_count, dst, &mut cursor);
        serialize::<u32>(index_count, dst, &mut cursor);
        serialize::<u32>(bone_count, dst, &mut cursor);
        serialize::<u32>(data_offset, dst, &mut cursor);
        serialize::<u32>(first_bone, dst, &mut cursor);
    }
}

impl Serialize for BoneMetaData {
    const SERIALIZED_SIZE: usize =
        u64::SERIALIZED_SIZE + Mat4::SERIALIZED_SIZE + u32::SERIALIZED_SIZE * 2;
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(Self::SERIALIZED_SIZE, dst.len());
        let mut cursor = 0;
        let BoneMetaData {
            name_hash,
            offset_matrix,
            weight_count,
            weights_offset,
        } = self;
        serialize::<u64>(name_hash, dst, &mut cursor);
        serialize::<Mat4>(offset_matrix, dst, &mut cursor);
        serialize::<u32>(weight_count, dst, &mut cursor);
        serialize::<u32>(weights_offset, dst, &mut cursor);
    }
}

impl Serialize for Vertex {
    const SERIALIZED_SIZE: usize = Vec3::SERIALIZED_SIZE * 2 + Vec2::SERIALIZED_SIZE;
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(Self::SERIALIZED_SIZE, dst.len());
        let mut cursor = 0;
        let Vertex {
            position,
            normal,
            uv,
        } = self;
        serialize::<Vec3>(position, dst, &mut cursor);
        serialize::<Vec3>(normal, dst, &mut cursor);
        serialize::<Vec2>(uv, dst, &mut cursor);
    }
}

impl Serialize for VertexWeight {
    const SERIALIZED_SIZE: usize = u32::SERIALIZED_SIZE + f32::SERIALIZED_SIZE;
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(Self::SERIALIZED_SIZE, dst.len());
        let mut cursor = 0;
        let VertexWeight { vertex, weight } = self;
        serialize::<u32>(vertex, dst, &mut cursor);
        serialize::<f32>(weight, dst, &mut cursor);
    }
}

impl Serialize for TextureMetaHeader {
    const SERIALIZED_SIZE: usize = u32::SERIALIZED_SIZE * 2 + u8::SERIALIZED_SIZE * 3;
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(Self::SERIALIZED_SIZE, dst.len());
        let mut cursor = 0;
        let TextureMetaHeader {
            width,
            height,
            format,
            compression_mode,
            mip_count,
        } = self;
        serialize::<u32>(width, dst, &mut cursor);
        serialize::<u32>(height, dst, &mut cursor);
        serialize::<u8>(format, dst, &mut cursor);
        serialize::<u8>(compression_mode, dst, &mut cursor);
        serialize::<u8>(mip_count, dst, &mut cursor);
    }
}

impl Serialize for MipInfo {
    const SERIALIZED_SIZE: usize = u32::SERIALIZED_SIZE * 4;
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(Self::SERIALIZED_SIZE, dst.len());
        let mut cursor = 0;
        let MipInfo {
            width,
            height,
            original_size,
            compressed_size,
        } = self;
        serialize::<u32>(width, dst, &mut cursor);
        serialize::<u32>(height, dst, &mut cursor);
        serialize::<u32>(original_size, dst, &mut cursor);
        serialize::<u32>(compressed_size, dst, &mut cursor);
    }
}

// Serialization helpers, at the bottom because they're very long, just so they
// compile to something sane in debug builds.

#[inline(always)]
pub fn serialize<S: Serialize>(value: &S, dst: &mut [u8], cursor: &mut usize) {
    value.serialize(&mut dst[*cursor..(*cursor + S::SERIALIZED_SIZE)]);
    *cursor += S::SERIALIZED_SIZE;
}

/// Appends the values to `dst`, serialized one after the other.
#[cfg(any(test, feature = "asset-conditioning"))]
pub fn serialize_all<S: Serialize>(values: &[S], dst: &mut alloc::vec::Vec<u8>) {
    let start = dst.len();
    dst.resize(start + values.len() * S::SERIALIZED_SIZE, 0);
    let mut cursor = start;
    for value in values {
        serialize::<S>(value, dst, &mut cursor);
    }
}

impl Serialize for Vec2 {
    const SERIALIZED_SIZE: usize = f32::SERIALIZED_SIZE * 2;
    #[inline]
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(Self::SERIALIZED_SIZE, dst.len());
        self.x.serialize(&mut dst[0..4]);
        self.y.serialize(&mut dst[4..8]);
    }
}

impl Serialize for Vec3 {
    const SERIALIZED_SIZE: usize = f32::SERIALIZED_SIZE * 3;
    #[inline]
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(Self::SERIALIZED_SIZE, dst.len());
        self.x.serialize(&mut dst[0..4]);
        self.y.serialize(&mut dst[4..8]);
        self.z.serialize(&mut dst[8..12]);
    }
}

impl Serialize for Quat {
    const SERIALIZED_SIZE: usize = f32::SERIALIZED_SIZE * 4;
    #[inline]
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(Self::SERIALIZED_SIZE, dst.len());
        self.x.serialize(&mut dst[0..4]);
        self.y.serialize(&mut dst[4..8]);
        self.z.serialize(&mut dst[8..12]);
        self.w.serialize(&mut dst[12..16]);
    }
}

impl Serialize for Mat4 {
    const SERIALIZED_SIZE: usize = f32::SERIALIZED_SIZE * 16;
    #[inline]
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(Self::SERIALIZED_SIZE, dst.len());
        for (i, value) in self.cols.iter().flatten().enumerate() {
            value.serialize(&mut dst[i * 4..i * 4 + 4]);
        }
    }
}

impl Serialize for [u8; 4] {
    const SERIALIZED_SIZE: usize = 4;
    #[inline]
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(Self::SERIALIZED_SIZE, dst.len());
        dst.copy_from_slice(self);
    }
}

impl Serialize for u8 {
    const SERIALIZED_SIZE: usize = 1;
    #[inline]
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(Self::SERIALIZED_SIZE, dst.len());
        // Safety: all the indexes are covered by the assert above.
        unsafe { *dst.get_unchecked_mut(0) = *self };
    }
}

impl Serialize for u32 {
    const SERIALIZED_SIZE: usize = 4;
    #[inline]
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(Self::SERIALIZED_SIZE, dst.len());
        let [a, b, c, d] = self.to_le_bytes();
        // Safety: all the indexes are covered by the assert above.
        unsafe {
            *dst.get_unchecked_mut(0) = a;
            *dst.get_unchecked_mut(1) = b;
            *dst.get_unchecked_mut(2) = c;
            *dst.get_unchecked_mut(3) = d;
        }
    }
}

impl Serialize for f32 {
    const SERIALIZED_SIZE: usize = 4;
    #[inline]
    fn serialize(&self, dst: &mut [u8]) {
        self.to_bits().serialize(dst);
    }
}

impl Serialize for u64 {
    const SERIALIZED_SIZE: usize = 8;
    #[inline]
    fn serialize(&self, dst: &mut [u8]) {
        assert_eq!(Self::SERIALIZED_SIZE, dst.len());
        let [a, b, c, d, e, f, g, h] = self.to_le_bytes();
        // Safety: all the indexes are covered by the assert above.
        unsafe {
            *dst.get_unchecked_mut(0) = a;
            *dst.get_unchecked_mut(1) = b;
            *dst.get_unchecked_mut(2) = c;
            *dst.get_unchecked_mut(3) = d;
            *dst.get_unchecked_mut(4) = e;
            *dst.get_unchecked_mut(5) = f;
            *dst.get_unchecked_mut(6) = g;
            *dst.get_unchecked_mut(7) = h;
        }
    }
}
