// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use bytemuck::{Pod, Zeroable};

use crate::{
    allocators::MemoryProperties,
    collections::{capacity_for, SArray, SHashMap},
    geom::{Mat4, Vec2, Vec3},
    resources::{
        deserialize::{try_deserialize, Deserialize},
        AssetBuffer, AssetLoader, AssetType, BinaryAssetFile, LoadError, PlacementCursor,
        SizeEstimate,
    },
};

pub const MODEL_TYPE_TAG: [u8; 4] = *b"rmdl";

/// How many bones can influence a single vertex.
pub const MAX_BONE_WEIGHTS: usize = 4;

/// The parent index of the skeleton's root node.
pub const NO_PARENT: u32 = u32::MAX;

/// Scene trees deeper than this are rejected instead of recursing further.
pub const MAX_NODE_DEPTH: u32 = 256;

/// The first record of a model file's meta-data. It's followed by
/// `node_count` [`NodeMetaData`]s (the scene tree in preorder, root first),
/// `mesh_ref_count` `u32` mesh indices, `mesh_count` [`MeshMetaData`]s, and
/// `bone_count` [`BoneMetaData`]s, grouped by mesh.
///
/// The binary blob contains, for each mesh, its [`Vertex`]es and `u32`
/// indices, followed by the [`VertexWeight`]s of every bone in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelMetaData {
    pub node_count: u32,
    pub mesh_ref_count: u32,
    pub mesh_count: u32,
    pub bone_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NodeMetaData {
    pub name_hash: u64,
    pub transform: Mat4,
    /// The amount of direct children. Each child's subtree follows the node
    /// (or its previous sibling's subtree) in the node list.
    pub child_count: u32,
    /// The node's meshes are the mesh refs `first_mesh_ref..first_mesh_ref
    /// + mesh_ref_count`.
    pub first_mesh_ref: u32,
    pub mesh_ref_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeshMetaData {
    pub vertex_count: u32,
    pub index_count: u32,
    pub bone_count: u32,
    /// Where the mesh's vertices start in the binary blob.
    pub data_offset: u32,
    /// The index of the mesh's first [`BoneMetaData`].
    pub first_bone: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoneMetaData {
    pub name_hash: u64,
    pub offset_matrix: Mat4,
    pub weight_count: u32,
    /// Where the bone's weights start in the binary blob.
    pub weights_offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VertexWeight {
    pub vertex: u32,
    pub weight: f32,
}

/// The bones influencing one vertex. Slots with a zero weight are free.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoneData {
    pub bone_ids: [u32; MAX_BONE_WEIGHTS],
    pub weights: [f32; MAX_BONE_WEIGHTS],
}

impl BoneData {
    /// Puts the influence in the first free slot. Returns false if all the
    /// slots are taken.
    pub fn try_add_influence(&mut self, bone: u32, weight: f32) -> bool {
        let Some(slot) = self.weights.iter().position(|w| *w == 0.0) else {
            return false;
        };
        self.bone_ids[slot] = bone;
        self.weights[slot] = weight;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoneInfo {
    pub offset_matrix: Mat4,
    pub name_hash: u64,
}

/// A node of an [`AnimModel`]'s skeleton. Nodes refer to each other with
/// indices into [`AnimModel::skeleton`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SkeletonNode<'a> {
    pub name_hash: u64,
    /// [`NO_PARENT`] for the root.
    pub parent: u32,
    pub transform: Mat4,
    pub children: &'a [u32],
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Mesh<'a> {
    pub vertices: &'a [Vertex],
    /// Three per triangle.
    pub indices: &'a [u32],
    /// One per vertex for meshes of an [`AnimModel`], empty otherwise.
    pub bones: &'a [BoneData],
}

impl Mesh<'_> {
    /// The vertices as they'd be uploaded into a vertex buffer.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.vertices)
    }
}

/// A loaded static model. Meshes are in scene walk order: each node's
/// children's meshes come before the node's own.
#[derive(Debug)]
pub struct Model<'a> {
    pub meshes: &'a SArray<Mesh<'a>>,
}

/// A loaded skinned model.
#[derive(Debug)]
pub struct AnimModel<'a> {
    pub meshes: &'a SArray<Mesh<'a>>,
    /// Bone name hash to an index into `bone_info`. The ids in each
    /// [`BoneData`] are the same indices.
    pub bone_map: &'a SHashMap<u32>,
    pub bone_info: &'a SArray<BoneInfo>,
    /// The scene tree, in preorder. The root is the first node.
    pub skeleton: &'a SArray<SkeletonNode<'a>>,
}

impl AnimModel<'_> {
    pub fn bone_index(&self, name_hash: u64) -> Option<u32> {
        self.bone_map.get(name_hash).copied()
    }

    pub fn root(&self) -> Option<&SkeletonNode<'_>> {
        self.skeleton.first()
    }
}

impl AssetBuffer<'_> {
    pub fn model(&self) -> Option<&Model<'_>> {
        // Safety: ModelLoader places the Model first.
        unsafe { self.root::<Model>(AssetType::Model) }
    }

    pub fn anim_model(&self) -> Option<&AnimModel<'_>> {
        // Safety: AnimModelLoader places the AnimModel first.
        unsafe { self.root::<AnimModel>(AssetType::AnimModel) }
    }
}

/// The meta-data of a model file, split into its regions.
struct Scene<'m> {
    header: ModelMetaData,
    nodes: &'m [u8],
    mesh_refs: &'m [u8],
    meshes: &'m [u8],
    bones: &'m [u8],
}

struct SceneCounts {
    meshes: usize,
    bones: usize,
}

impl<'m> Scene<'m> {
    fn parse(file: &mut BinaryAssetFile<'m>) -> Result<Scene<'m>, LoadError> {
        let meta = file.load_meta_data(&MODEL_TYPE_TAG)?;
        let blob_size = file.header().map_or(0, |header| header.binary_blob_size);

        let mut cursor = 0;
        let header = try_deserialize::<ModelMetaData>(meta, &mut cursor)?;
        if header.node_count == 0 {
            return Err(LoadError::NoSceneRoot);
        }
        let (nodes, rest) = split_region::<NodeMetaData>(&meta[cursor..], header.node_count)?;
        let (mesh_refs, rest) = split_region::<u32>(rest, header.mesh_ref_count)?;
        let (meshes, rest) = split_region::<MeshMetaData>(rest, header.mesh_count)?;
        let (bones, rest) = split_region::<BoneMetaData>(rest, header.bone_count)?;
        if !rest.is_empty() {
            return Err(LoadError::Malformed("model meta-data has trailing bytes"));
        }
        let scene = Scene {
            header,
            nodes,
            mesh_refs,
            meshes,
            bones,
        };

        // The stored offsets must match the running sums, after which placing
        // a mesh can use them as they are.
        let mut data_offset = 0u64;
        let mut bone_sum = 0u64;
        for i in 0..header.mesh_count {
            let mesh = scene.mesh(i)?;
            if mesh.data_offset as u64 != data_offset || mesh.first_bone as u64 != bone_sum {
                return Err(LoadError::Malformed("mesh offsets don't match the preceding meshes"));
            }
            data_offset += mesh_data_size(&mesh);
            bone_sum += mesh.bone_count as u64;
        }
        if bone_sum != header.bone_count as u64 {
            return Err(LoadError::Malformed("mesh bone counts don't add up to the bone count"));
        }
        let mut blob_sum = data_offset;
        for i in 0..header.bone_count {
            let bone = scene.bone(i)?;
            if bone.weights_offset as u64 != blob_sum {
                return Err(LoadError::Malformed("bone offsets don't match the preceding bones"));
            }
            blob_sum += bone.weight_count as u64 * VertexWeight::SERIALIZED_SIZE as u64;
        }
        if blob_sum != blob_size as u64 {
            return Err(LoadError::Malformed("binary blob size doesn't match the meshes and bones"));
        }
        Ok(scene)
    }

    fn node(&self, index: u32) -> Result<NodeMetaData, LoadError> {
        record(self.nodes, index)
    }

    fn mesh(&self, index: u32) -> Result<MeshMetaData, LoadError> {
        record(self.meshes, index)
    }

    fn bone(&self, index: u32) -> Result<BoneMetaData, LoadError> {
        record(self.bones, index)
    }

    /// Calls `visit` with the index of each mesh referenced by the scene
    /// tree, visiting each node's children before the node's own meshes.
    fn for_each_mesh(
        &self,
        visit: &mut dyn FnMut(u32) -> Result<(), LoadError>,
    ) -> Result<(), LoadError> {
        let end = self.walk_meshes(0, 0, visit)?;
        if end != self.header.node_count {
            return Err(LoadError::Malformed("some nodes are not part of the scene tree"));
        }
        Ok(())
    }

    /// Returns the index of the node after the subtree.
    fn walk_meshes(
        &self,
        node: u32,
        depth: u32,
        visit: &mut dyn FnMut(u32) -> Result<(), LoadError>,
    ) -> Result<u32, LoadError> {
        if depth > MAX_NODE_DEPTH {
            return Err(LoadError::Malformed("scene tree is too deep"));
        }
        let meta = self.node(node)?;
        let mut next = node + 1;
        for _ in 0..meta.child_count {
            next = self.walk_meshes(next, depth + 1, visit)?;
        }
        for i in 0..meta.mesh_ref_count {
            let mesh_ref = meta
                .first_mesh_ref
                .checked_add(i)
                .ok_or(LoadError::Malformed("mesh ref out of bounds"))?;
            visit(record::<u32>(self.mesh_refs, mesh_ref)?)?;
        }
        Ok(next)
    }

    fn count(&self) -> Result<SceneCounts, LoadError> {
        let mut counts = SceneCounts { meshes: 0, bones: 0 };
        self.for_each_mesh(&mut |mesh| {
            counts.meshes += 1;
            counts.bones += self.mesh(mesh)?.bone_count as usize;
            Ok(())
        })?;
        Ok(counts)
    }

    fn estimate(&self, properties: MemoryProperties, skinned: bool) -> Result<u64, LoadError> {
        let counts = self.count()?;
        let mut estimate = SizeEstimate::new(properties);
        if skinned {
            estimate.add::<AnimModel>();
        } else {
            estimate.add::<Model>();
        }
        estimate.add_sarray::<Mesh>(counts.meshes);
        if skinned {
            estimate.add_shashmap::<u32>(bone_map_capacity(counts.bones));
            estimate.add_sarray::<BoneInfo>(counts.bones);
            estimate.add_sarray::<SkeletonNode>(self.header.node_count as usize);
        }
        self.for_each_mesh(&mut |mesh| {
            let mesh = self.mesh(mesh)?;
            estimate.add_sarray::<Vertex>(mesh.vertex_count as usize);
            estimate.add_sarray::<u32>(mesh.index_count as usize);
            if skinned {
                estimate.add_sarray::<BoneData>(mesh.vertex_count as usize);
            }
            Ok(())
        })?;
        if skinned {
            for node in 0..self.header.node_count {
                let child_count = self.node(node)?.child_count as usize;
                if child_count > 0 {
                    estimate.add_sarray::<u32>(child_count);
                }
            }
        }
        Ok(estimate.total())
    }
}

fn split_region<D: Deserialize>(src: &[u8], count: u32) -> Result<(&[u8], &[u8]), LoadError> {
    let len = (count as usize)
        .checked_mul(D::SERIALIZED_SIZE)
        .ok_or(LoadError::Truncated)?;
    if src.len() < len {
        return Err(LoadError::Truncated);
    }
    Ok(src.split_at(len))
}

fn record<D: Deserialize>(region: &[u8], index: u32) -> Result<D, LoadError> {
    let mut cursor = (index as usize)
        .checked_mul(D::SERIALIZED_SIZE)
        .ok_or(LoadError::Malformed("record index out of bounds"))?;
    try_deserialize::<D>(region, &mut cursor)
        .map_err(|_| LoadError::Malformed("record index out of bounds"))
}

fn mesh_data_size(mesh: &MeshMetaData) -> u64 {
    mesh.vertex_count as u64 * Vertex::SERIALIZED_SIZE as u64
        + mesh.index_count as u64 * u32::SERIALIZED_SIZE as u64
}

fn bone_map_capacity(bones: usize) -> usize {
    capacity_for(bones).max(1)
}

/// The bone tables of an [`AnimModel`] being loaded.
struct Skinning<'a> {
    bone_map: &'a mut SHashMap<u32>,
    bone_info: &'a mut SArray<BoneInfo>,
}

/// Places the meshes of a model in scene walk order.
struct MeshPlacer<'s, 'm, 'a> {
    scene: &'s Scene<'m>,
    blob: &'m [u8],
    cursor: &'s mut PlacementCursor<'a>,
    meshes: &'a mut SArray<Mesh<'a>>,
    skinning: Option<&'s mut Skinning<'a>>,
    dropped_influences: usize,
}

impl<'a> MeshPlacer<'_, '_, 'a> {
    fn place(&mut self, mesh_index: u32) -> Result<(), LoadError> {
        let mesh = self.scene.mesh(mesh_index)?;
        let vertex_count = mesh.vertex_count as usize;
        let mut blob_cursor = mesh.data_offset as usize;

        let vertices = self.cursor.emplace_sarray::<Vertex>(vertex_count)?;
        for _ in 0..vertex_count {
            push(vertices, try_deserialize::<Vertex>(self.blob, &mut blob_cursor)?)?;
        }
        let indices = self.cursor.emplace_sarray::<u32>(mesh.index_count as usize)?;
        for _ in 0..mesh.index_count {
            let index = try_deserialize::<u32>(self.blob, &mut blob_cursor)?;
            if index >= mesh.vertex_count {
                return Err(LoadError::Malformed("vertex index out of bounds"));
            }
            push(indices, index)?;
        }

        let bones: &'a [BoneData] = match &mut self.skinning {
            Some(skinning) => {
                let bone_data = self.cursor.emplace_sarray::<BoneData>(vertex_count)?;
                bone_data.fill(BoneData::default());
                for bone in mesh.first_bone..mesh.first_bone + mesh.bone_count {
                    let meta = self.scene.bone(bone)?;
                    let existing = skinning.bone_map.get(meta.name_hash).copied();
                    let bone_id = match existing {
                        Some(id) => id,
                        None => {
                            let id = skinning.bone_info.size() as u32;
                            push(
                                skinning.bone_info,
                                BoneInfo {
                                    offset_matrix: meta.offset_matrix,
                                    name_hash: meta.name_hash,
                                },
                            )?;
                            if skinning.bone_map.set(meta.name_hash, id).is_err() {
                                return Err(LoadError::OutOfSpace);
                            }
                            id
                        }
                    };

                    let mut weight_cursor = meta.weights_offset as usize;
                    for _ in 0..meta.weight_count {
                        let weight = try_deserialize::<VertexWeight>(self.blob, &mut weight_cursor)?;
                        let Some(influences) = bone_data.get_mut(weight.vertex as usize) else {
                            return Err(LoadError::Malformed("bone weight for a vertex out of bounds"));
                        };
                        if !influences.try_add_influence(bone_id, weight.weight) {
                            self.dropped_influences += 1;
                        }
                    }
                }
                let bone_data: &'a SArray<BoneData> = bone_data;
                bone_data.as_slice()
            }
            None => &[],
        };

        let vertices: &'a SArray<Vertex> = vertices;
        let indices: &'a SArray<u32> = indices;
        push(
            self.meshes,
            Mesh {
                vertices: vertices.as_slice(),
                indices: indices.as_slice(),
                bones,
            },
        )
    }
}

fn push<T>(array: &mut SArray<T>, value: T) -> Result<(), LoadError> {
    array.push(value).map_err(|_| LoadError::OutOfSpace)
}

/// Places the skeleton node and its subtree, returning the index of the node
/// after the subtree.
fn place_skeleton<'a>(
    scene: &Scene,
    cursor: &mut PlacementCursor<'a>,
    skeleton: &mut SArray<SkeletonNode<'a>>,
    node: u32,
    parent: u32,
    depth: u32,
) -> Result<u32, LoadError> {
    if depth > MAX_NODE_DEPTH {
        return Err(LoadError::Malformed("scene tree is too deep"));
    }
    let meta = scene.node(node)?;
    debug_assert_eq!(node as usize, skeleton.size());
    push(
        skeleton,
        SkeletonNode {
            name_hash: meta.name_hash,
            parent,
            transform: meta.transform,
            children: &[],
        },
    )?;

    let mut next = node + 1;
    if meta.child_count > 0 {
        let children = cursor.emplace_sarray::<u32>(meta.child_count as usize)?;
        for _ in 0..meta.child_count {
            push(children, next)?;
            next = place_skeleton(scene, cursor, skeleton, next, node, depth + 1)?;
        }
        let children: &'a SArray<u32> = children;
        skeleton.at_mut(node as usize).children = children.as_slice();
    }
    Ok(next)
}

fn load_model(path: &str, raw: &[u8], buffer: &mut AssetBuffer, skinned: bool) -> Result<(), LoadError> {
    profiling::function_scope!();
    let mut file = BinaryAssetFile::new(raw);
    let scene = Scene::parse(&mut file)?;
    let blob = file.load_binary_data()?;
    let counts = scene.count()?;

    let mut cursor = buffer.cursor();
    let dropped_influences;
    if skinned {
        let root = cursor.reserve::<AnimModel>()?;
        let meshes = cursor.emplace_sarray::<Mesh>(counts.meshes)?;
        let bone_map = cursor.emplace_shashmap::<u32>(bone_map_capacity(counts.bones))?;
        let bone_info = cursor.emplace_sarray::<BoneInfo>(counts.bones)?;
        let skeleton = cursor.emplace_sarray::<SkeletonNode>(scene.header.node_count as usize)?;

        let mut skinning = Skinning {
            bone_map,
            bone_info,
        };
        let mut placer = MeshPlacer {
            scene: &scene,
            blob,
            cursor: &mut cursor,
            meshes,
            skinning: Some(&mut skinning),
            dropped_influences: 0,
        };
        scene.for_each_mesh(&mut |mesh| placer.place(mesh))?;
        dropped_influences = placer.dropped_influences;
        let meshes = placer.meshes;

        place_skeleton(&scene, &mut cursor, skeleton, 0, NO_PARENT, 0)?;
        root.write(AnimModel {
            meshes,
            bone_map: skinning.bone_map,
            bone_info: skinning.bone_info,
            skeleton,
        });
    } else {
        let root = cursor.reserve::<Model>()?;
        let meshes = cursor.emplace_sarray::<Mesh>(counts.meshes)?;
        let mut placer = MeshPlacer {
            scene: &scene,
            blob,
            cursor: &mut cursor,
            meshes,
            skinning: None,
            dropped_influences: 0,
        };
        scene.for_each_mesh(&mut |mesh| placer.place(mesh))?;
        dropped_influences = 0;
        root.write(Model {
            meshes: placer.meshes,
        });
    }
    cursor.finish()?;

    if dropped_influences > 0 {
        tracing::warn!(
            "{path:?} has vertices with more than {MAX_BONE_WEIGHTS} bone weights, {dropped_influences} weights were ignored",
        );
    }
    buffer.set_loaded(if skinned {
        AssetType::AnimModel
    } else {
        AssetType::Model
    });
    Ok(())
}

/// Loads `rmdl` files into static [`Model`]s.
#[derive(Debug, Default)]
pub struct ModelLoader;

impl AssetLoader for ModelLoader {
    fn pattern(&self) -> &'static str {
        "rmdl"
    }

    fn asset_type(&self) -> AssetType {
        AssetType::Model
    }

    fn loaded_asset_size(
        &self,
        _path: &str,
        raw: &[u8],
        properties: MemoryProperties,
    ) -> Result<u64, LoadError> {
        Scene::parse(&mut BinaryAssetFile::new(raw))?.estimate(properties, false)
    }

    fn load_asset(&self, path: &str, raw: &[u8], buffer: &mut AssetBuffer) -> Result<(), LoadError> {
        load_model(path, raw, buffer, false)
    }
}

/// Loads `rmdl` files into skinned [`AnimModel`]s. Shares the file type
/// with [`ModelLoader`], so these are loaded with
/// [`LoaderRegistry::load_as`](crate::resources::LoaderRegistry::load_as).
#[derive(Debug, Default)]
pub struct AnimModelLoader;

impl AssetLoader for AnimModelLoader {
    fn pattern(&self) -> &'static str {
        "rmdl"
    }

    fn asset_type(&self) -> AssetType {
        AssetType::AnimModel
    }

    fn loaded_asset_size(
        &self,
        _path: &str,
        raw: &[u8],
        properties: MemoryProperties,
    ) -> Result<u64, LoadError> {
        Scene::parse(&mut BinaryAssetFile::new(raw))?.estimate(properties, true)
    }

    fn load_asset(&self, path: &str, raw: &[u8], buffer: &mut AssetBuffer) -> Result<(), LoadError> {
        load_model(path, raw, buffer, true)
    }
}

#[cfg(any(test, feature = "asset-conditioning"))]
pub use packing::{pack_model, SceneBone, SceneMesh, SceneNode};

#[cfg(any(test, feature = "asset-conditioning"))]
mod packing {
    use alloc::vec::Vec;

    use crate::{
        geom::Mat4,
        resources::{
            serialize::{serialize_all, Serialize},
            write_asset_file,
        },
    };

    use super::{
        BoneMetaData, MeshMetaData, ModelMetaData, NodeMetaData, Vertex, VertexWeight,
        MODEL_TYPE_TAG,
    };

    #[derive(Debug, Clone, Default)]
    pub struct SceneNode {
        pub name_hash: u64,
        pub transform: Mat4,
        /// Indices into the mesh list passed to [`pack_model`].
        pub meshes: Vec<u32>,
        pub children: Vec<SceneNode>,
    }

    #[derive(Debug, Clone, Default)]
    pub struct SceneMesh {
        pub vertices: Vec<Vertex>,
        pub indices: Vec<u32>,
        pub bones: Vec<SceneBone>,
    }

    #[derive(Debug, Clone, Default)]
    pub struct SceneBone {
        pub name_hash: u64,
        pub offset_matrix: Mat4,
        pub weights: Vec<VertexWeight>,
    }

    /// Writes a complete `rmdl` file. A scene without a root is written as
    /// one without nodes.
    pub fn pack_model(root: Option<&SceneNode>, meshes: &[SceneMesh]) -> Vec<u8> {
        let mut nodes = Vec::new();
        let mut mesh_refs = Vec::new();
        if let Some(root) = root {
            flatten(root, &mut nodes, &mut mesh_refs);
        }
        let mut data_offset = 0;
        let mut first_bone = 0;
        let mut mesh_metas = Vec::with_capacity(meshes.len());
        for mesh in meshes {
            let meta = MeshMetaData {
                vertex_count: mesh.vertices.len() as u32,
                index_count: mesh.indices.len() as u32,
                bone_count: mesh.bones.len() as u32,
                data_offset,
                first_bone,
            };
            data_offset += (mesh.vertices.len() * Vertex::SERIALIZED_SIZE
                + mesh.indices.len() * u32::SERIALIZED_SIZE) as u32;
            first_bone += meta.bone_count;
            mesh_metas.push(meta);
        }
        let bones = meshes.iter().flat_map(|mesh| &mesh.bones);
        let mut weights_offset = data_offset;
        let mut bone_metas = Vec::with_capacity(first_bone as usize);
        for bone in bones.clone() {
            bone_metas.push(BoneMetaData {
                name_hash: bone.name_hash,
                offset_matrix: bone.offset_matrix,
                weight_count: bone.weights.len() as u32,
                weights_offset,
            });
            weights_offset += (bone.weights.len() * VertexWeight::SERIALIZED_SIZE) as u32;
        }

        let mut meta = Vec::new();
        serialize_all(
            &[ModelMetaData {
                node_count: nodes.len() as u32,
                mesh_ref_count: mesh_refs.len() as u32,
                mesh_count: mesh_metas.len() as u32,
                bone_count: bone_metas.len() as u32,
            }],
            &mut meta,
        );
        serialize_all(&nodes, &mut meta);
        serialize_all(&mesh_refs, &mut meta);
        serialize_all(&mesh_metas, &mut meta);
        serialize_all(&bone_metas, &mut meta);

        let mut blob = Vec::new();
        for mesh in meshes {
            serialize_all(&mesh.vertices, &mut blob);
            serialize_all(&mesh.indices, &mut blob);
        }
        for bone in bones {
            serialize_all(&bone.weights, &mut blob);
        }
        write_asset_file(MODEL_TYPE_TAG, &meta, &blob)
    }

    fn flatten(node: &SceneNode, nodes: &mut Vec<NodeMetaData>, mesh_refs: &mut Vec<u32>) {
        nodes.push(NodeMetaData {
            name_hash: node.name_hash,
            transform: node.transform,
            child_count: node.children.len() as u32,
            first_mesh_ref: mesh_refs.len() as u32,
            mesh_ref_count: node.meshes.len() as u32,
        });
        mesh_refs.extend_from_slice(&node.meshes);
        for child in &node.children {
            flatten(child, nodes, mesh_refs);
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::{vec, vec::Vec};

    use crate::{
        allocators::{
            Arena, BasicBoundsChecking, BasicMemoryTracking, FreeListAllocator, MemoryArea,
            MemoryArena, MemoryProperties,
        },
        geom::{Mat4, Vec2, Vec3},
        hash::string_id,
        resources::{
            load_with, serialize::Serialize, AssetHandle, AssetLoader, LoadError, LoaderRegistry,
            HEADER_SIZE,
        },
        test_platform::TestPlatform,
    };

    use super::{
        pack_model, AnimModelLoader, BoneData, BoneMetaData, MeshMetaData, ModelLoader,
        ModelMetaData, NodeMetaData, SceneBone, SceneMesh, SceneNode, Vertex, VertexWeight,
        NO_PARENT,
    };

    type TestArena<'a> = Arena<FreeListAllocator<'a>, BasicBoundsChecking, BasicMemoryTracking>;

    fn vertex(x: f32) -> Vertex {
        Vertex {
            position: Vec3::new(x, 0.0, 0.0),
            normal: Vec3::new(0.0, 1.0, 0.0),
            uv: Vec2::new(x, x),
        }
    }

    fn triangle(x: f32, bones: Vec<SceneBone>) -> SceneMesh {
        SceneMesh {
            vertices: vec![vertex(x), vertex(x + 1.0), vertex(x + 2.0)],
            indices: vec![0, 1, 2],
            bones,
        }
    }

    fn bone(name: &str, weights: &[(u32, f32)]) -> SceneBone {
        SceneBone {
            name_hash: string_id(name),
            offset_matrix: Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0)),
            weights: weights
                .iter()
                .map(|&(vertex, weight)| VertexWeight { vertex, weight })
                .collect(),
        }
    }

    /// root (mesh 1)
    /// ├── arm (mesh 0)
    /// │   └── hand
    /// └── leg
    fn scene() -> (SceneNode, Vec<SceneMesh>) {
        let root = SceneNode {
            name_hash: string_id("root"),
            transform: Mat4::IDENTITY,
            meshes: vec![1],
            children: vec![
                SceneNode {
                    name_hash: string_id("arm"),
                    meshes: vec![0],
                    children: vec![SceneNode {
                        name_hash: string_id("hand"),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
                SceneNode {
                    name_hash: string_id("leg"),
                    ..Default::default()
                },
            ],
        };
        let meshes = vec![
            triangle(10.0, vec![bone("arm", &[(0, 1.0), (1, 0.5)]), bone("hand", &[(1, 0.5)])]),
            triangle(20.0, vec![bone("arm", &[(2, 1.0)])]),
        ];
        (root, meshes)
    }

    #[test]
    fn influences_fill_the_first_free_slot() {
        let mut bones = BoneData::default();
        assert!(bones.try_add_influence(3, 0.5));
        assert!(bones.try_add_influence(1, 0.25));
        assert!(bones.try_add_influence(7, 0.125));
        assert!(bones.try_add_influence(2, 0.125));
        assert!(!bones.try_add_influence(9, 0.1));
        assert_eq!([3, 1, 7, 2], bones.bone_ids);
        assert_eq!([0.5, 0.25, 0.125, 0.125], bones.weights);
    }

    #[test]
    fn static_model_meshes_are_in_walk_order() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 16 * 1024).unwrap();
        let arena: TestArena = Arena::new(FreeListAllocator::new(area.add_sub_area(16 * 1024).unwrap()).unwrap());
        let (root, meshes) = scene();
        let file = pack_model(Some(&root), &meshes);

        let loader = ModelLoader;
        let registry = {
            let mut registry = LoaderRegistry::new();
            registry.register(&loader);
            registry
        };
        let buffer = registry.load("body.rmdl", &file, &arena, 16, AssetHandle(3)).unwrap();
        let model = buffer.model().unwrap();
        assert!(buffer.anim_model().is_none());
        assert_eq!(2, model.meshes.size());
        // The arm is a child of the root, so its mesh comes first.
        assert_eq!(&meshes[0].vertices[..], model.meshes[0].vertices);
        assert_eq!(&meshes[1].vertices[..], model.meshes[1].vertices);
        assert_eq!(&[0, 1, 2], model.meshes[1].indices);
        assert!(model.meshes[0].bones.is_empty());
        assert_eq!(3 * size_of::<Vertex>(), model.meshes[0].vertex_bytes().len());
    }

    #[test]
    fn anim_model_shares_bones_between_meshes() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 16 * 1024).unwrap();
        let arena: TestArena = Arena::new(FreeListAllocator::new(area.add_sub_area(16 * 1024).unwrap()).unwrap());
        let (root, meshes) = scene();
        let file = pack_model(Some(&root), &meshes);

        {
            let buffer = load_with(&AnimModelLoader, "body.rmdl", &file, &arena, 16, AssetHandle(4)).unwrap();
            let model = buffer.anim_model().unwrap();
            assert_eq!(2, model.bone_info.size());
            assert_eq!(2, model.bone_map.size());
            let arm = model.bone_index(string_id("arm")).unwrap();
            let hand = model.bone_index(string_id("hand")).unwrap();
            assert_eq!(0, arm);
            assert_eq!(1, hand);
            assert_eq!(string_id("hand"), model.bone_info[1].name_hash);

            let arm_mesh = &model.meshes[0];
            assert_eq!(3, arm_mesh.bones.len());
            assert_eq!([arm, 0, 0, 0], arm_mesh.bones[0].bone_ids);
            assert_eq!([1.0, 0.0, 0.0, 0.0], arm_mesh.bones[0].weights);
            assert_eq!([arm, hand, 0, 0], arm_mesh.bones[1].bone_ids);
            assert_eq!([0.5, 0.5, 0.0, 0.0], arm_mesh.bones[1].weights);
            assert_eq!([arm, 0, 0, 0], model.meshes[1].bones[2].bone_ids);

            let skeleton = model.skeleton.as_slice();
            assert_eq!(4, skeleton.len());
            let root = model.root().unwrap();
            assert_eq!(NO_PARENT, root.parent);
            assert_eq!(&[1, 3], root.children);
            assert_eq!(string_id("arm"), skeleton[1].name_hash);
            assert_eq!(0, skeleton[1].parent);
            assert_eq!(&[2], skeleton[1].children);
            assert_eq!(1, skeleton[2].parent);
            assert!(skeleton[2].children.is_empty());
            assert_eq!(string_id("leg"), skeleton[3].name_hash);
            assert_eq!(0, skeleton[3].parent);
        }
        assert_eq!(0, arena.tracking().live_allocations());
    }

    #[test]
    fn extra_influences_are_dropped() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 16 * 1024).unwrap();
        let arena: TestArena = Arena::new(FreeListAllocator::new(area.add_sub_area(16 * 1024).unwrap()).unwrap());
        let bones = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|name| bone(name, &[(0, 0.2)]))
            .collect();
        let root = SceneNode {
            meshes: vec![0],
            ..Default::default()
        };
        let file = pack_model(Some(&root), &[triangle(0.0, bones)]);
        let buffer = load_with(&AnimModelLoader, "crowded.rmdl", &file, &arena, 16, AssetHandle(5)).unwrap();
        let model = buffer.anim_model().unwrap();
        assert_eq!(5, model.bone_info.size());
        assert_eq!([0, 1, 2, 3], model.meshes[0].bones[0].bone_ids);
        assert_eq!(BoneData::default(), model.meshes[0].bones[1]);
    }

    #[test]
    fn estimate_matches_consumption() {
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 256 * 1024).unwrap();
        let arena: TestArena = Arena::new(FreeListAllocator::new(area.add_sub_area(256 * 1024).unwrap()).unwrap());

        for alignment in [8, 16, 32, 64] {
            for mesh_count in 0..4u32 {
                for vertex_count in [1, 4, 7] {
                    let meshes = (0..mesh_count)
                        .map(|m| SceneMesh {
                            vertices: (0..vertex_count).map(|v| vertex(v as f32)).collect(),
                            indices: (0..vertex_count * m).map(|i| i % vertex_count).collect(),
                            bones: (0..m)
                                .map(|b| bone(["x", "y", "z"][b as usize], &[(b % vertex_count, 0.5)]))
                                .collect(),
                        })
                        .collect::<Vec<_>>();
                    let root = SceneNode {
                        meshes: (0..mesh_count).rev().collect(),
                        children: (0..mesh_count)
                            .map(|m| SceneNode {
                                meshes: vec![m],
                                children: vec![SceneNode::default(); m as usize],
                                ..Default::default()
                            })
                            .collect(),
                        ..Default::default()
                    };
                    let file = pack_model(Some(&root), &meshes);

                    let properties = arena.memory_properties(alignment as u64);
                    for loader in [&ModelLoader as &dyn AssetLoader, &AnimModelLoader] {
                        let size = loader.loaded_asset_size("m.rmdl", &file, properties).unwrap();
                        let buffer = load_with(loader, "m.rmdl", &file, &arena, alignment, AssetHandle(6)).unwrap();
                        assert_eq!(size as usize, buffer.size());
                    }
                }
            }
        }
        assert_eq!(0, arena.tracking().live_allocations());
    }

    #[test]
    fn malformed_scenes_are_rejected() {
        let properties = MemoryProperties::new(16, 0, 0);
        let empty = pack_model(None, &[]);
        assert_eq!(
            Err(LoadError::NoSceneRoot),
            ModelLoader.loaded_asset_size("empty.rmdl", &empty, properties),
        );

        let root = SceneNode {
            meshes: vec![3],
            ..Default::default()
        };
        let dangling = pack_model(Some(&root), &[triangle(0.0, Vec::new())]);
        assert_eq!(
            Err(LoadError::Malformed("record index out of bounds")),
            AnimModelLoader.loaded_asset_size("dangling.rmdl", &dangling, properties),
        );

        let mut out_of_bounds = triangle(0.0, Vec::new());
        out_of_bounds.indices[2] = 3;
        let root = SceneNode {
            meshes: vec![0],
            ..Default::default()
        };
        let file = pack_model(Some(&root), &[out_of_bounds]);
        let platform = TestPlatform::new();
        let area = MemoryArea::new(&platform, 4096).unwrap();
        let arena: TestArena = Arena::new(FreeListAllocator::new(area.add_sub_area(4096).unwrap()).unwrap());
        assert_eq!(
            LoadError::Malformed("vertex index out of bounds"),
            load_with(&ModelLoader, "bad.rmdl", &file, &arena, 16, AssetHandle(7)).unwrap_err(),
        );
    }

    #[test]
    fn stored_offsets_must_match_the_records_before_them() {
        let properties = MemoryProperties::new(16, 0, 0);
        let (root, meshes) = scene();
        let file = pack_model(Some(&root), &meshes);
        assert!(AnimModelLoader.loaded_asset_size("body.rmdl", &file, properties).is_ok());

        // Four nodes and two mesh refs precede the mesh records.
        let meshes_start = HEADER_SIZE
            + ModelMetaData::SERIALIZED_SIZE
            + 4 * NodeMetaData::SERIALIZED_SIZE
            + 2 * u32::SERIALIZED_SIZE;
        let second_mesh = meshes_start + MeshMetaData::SERIALIZED_SIZE;
        // data_offset follows the three counts.
        let data_offset = second_mesh + 3 * u32::SERIALIZED_SIZE;
        let mut tampered = file.clone();
        tampered[data_offset..data_offset + 4].copy_from_slice(&0u32.to_le_bytes());
        assert_eq!(
            Err(LoadError::Malformed("mesh offsets don't match the preceding meshes")),
            ModelLoader.loaded_asset_size("body.rmdl", &tampered, properties),
        );

        let first_bone = meshes_start + 2 * MeshMetaData::SERIALIZED_SIZE;
        let weights_offset = first_bone + BoneMetaData::SERIALIZED_SIZE - u32::SERIALIZED_SIZE;
        let mut tampered = file;
        tampered[weights_offset..weights_offset + 4].copy_from_slice(&1u32.to_le_bytes());
        assert_eq!(
            Err(LoadError::Malformed("bone offsets don't match the preceding bones")),
            AnimModelLoader.loaded_asset_size("body.rmdl", &tampered, properties),
        );
    }
}
