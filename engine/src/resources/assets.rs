// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! The loaders for each asset type, along with the records their files are
//! made of and the types they load the files into.

mod animation;
mod model;
mod sound;
mod texture;

pub use animation::{
    Animation, AnimationChannel, AnimationLoader, AnimationMetaData, ChannelMetaData, RotationKey,
    VectorKey, ANIMATION_TYPE_TAG,
};
pub use model::{
    AnimModel, AnimModelLoader, BoneData, BoneInfo, BoneMetaData, Mesh, MeshMetaData, Model,
    ModelLoader, ModelMetaData, NodeMetaData, SkeletonNode, Vertex, VertexWeight,
    MAX_BONE_WEIGHTS, MAX_NODE_DEPTH, MODEL_TYPE_TAG, NO_PARENT,
};
pub use sound::{BankHandle, SoundBank, SoundBanks, SoundLoader, SOUND_BANK_TYPE_TAG};
pub use texture::{
    unpack_texture, unpack_texture_page, CompressionMode, MipInfo, Texture, TextureFormat,
    TextureLoader, TextureMetaData, TextureMetaHeader, COMPRESSION_FALLBACK_RATIO, MAX_MIPS,
    TEXTURE_TYPE_TAG,
};

#[cfg(any(test, feature = "asset-conditioning"))]
pub use animation::{pack_animation, ChannelKeys};
#[cfg(any(test, feature = "asset-conditioning"))]
pub use model::{pack_model, SceneBone, SceneMesh, SceneNode};
#[cfg(any(test, feature = "asset-conditioning"))]
pub use texture::{pack_texture, MipImage, PackError};
