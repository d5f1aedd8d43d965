// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Packs scenes described in JSON into model files. The description mirrors
//! the packed format: a tree of nodes referring to meshes by index, and
//! meshes with their vertices, triangle indices and bones.
//!
//! ```json
//! {
//!     "root": { "name": "root", "meshes": [0], "children": [] },
//!     "meshes": [{
//!         "vertices": [{ "position": [0, 0, 0] }, { "position": [1, 0, 0] }, { "position": [0, 1, 0] }],
//!         "indices": [0, 1, 2],
//!         "bones": [{ "name": "hips", "weights": [{ "vertex": 0, "weight": 1.0 }] }]
//!     }]
//! }
//! ```
//!
//! Matrices are given as four columns.

use std::{fs, path::Path};

use anyhow::Context;
use engine::{
    geom::{Mat4, Vec2, Vec3},
    hash::string_id,
    resources::assets::{
        pack_model, SceneBone, SceneMesh, SceneNode, Vertex, VertexWeight, MAX_NODE_DEPTH,
    },
};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelDescription {
    pub root: Option<NodeDescription>,
    pub meshes: Vec<MeshDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeDescription {
    pub name: String,
    #[serde(default = "identity")]
    pub transform: [[f32; 4]; 4],
    #[serde(default)]
    pub meshes: Vec<u32>,
    #[serde(default)]
    pub children: Vec<NodeDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeshDescription {
    pub vertices: Vec<VertexDescription>,
    pub indices: Vec<u32>,
    #[serde(default)]
    pub bones: Vec<BoneDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VertexDescription {
    pub position: [f32; 3],
    #[serde(default)]
    pub normal: [f32; 3],
    #[serde(default)]
    pub uv: [f32; 2],
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoneDescription {
    pub name: String,
    #[serde(default = "identity")]
    pub offset_matrix: [[f32; 4]; 4],
    pub weights: Vec<WeightDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeightDescription {
    pub vertex: u32,
    pub weight: f32,
}

fn identity() -> [[f32; 4]; 4] {
    Mat4::IDENTITY.cols
}

pub fn import(description_path: &Path) -> anyhow::Result<Vec<u8>> {
    let json = fs::read_to_string(description_path)
        .context("Failed to open the model description for importing")?;
    let description: ModelDescription =
        serde_json::from_str(&json).context("Failed to parse the model description")?;
    pack(&description)
}

pub fn pack(description: &ModelDescription) -> anyhow::Result<Vec<u8>> {
    let root = description
        .root
        .as_ref()
        .context("The model has no root node")?;

    let mut meshes = Vec::with_capacity(description.meshes.len());
    for (i, mesh) in description.meshes.iter().enumerate() {
        meshes.push(convert_mesh(mesh).with_context(|| format!("Mesh {i} is invalid"))?);
    }
    let mut referenced = vec![false; meshes.len()];
    let root = convert_node(root, &mut referenced, 0)?;
    for (i, _) in referenced.iter().enumerate().filter(|(_, referenced)| !**referenced) {
        warn!("Mesh {i} is not referenced by any node, it won't be loaded.");
    }

    Ok(pack_model(Some(&root), &meshes))
}

fn convert_node(
    node: &NodeDescription,
    referenced: &mut [bool],
    depth: u32,
) -> anyhow::Result<SceneNode> {
    anyhow::ensure!(
        depth <= MAX_NODE_DEPTH,
        "The node tree is deeper than the engine loads",
    );
    for &mesh in &node.meshes {
        let seen = referenced
            .get_mut(mesh as usize)
            .with_context(|| format!("Node {:?} refers to a missing mesh {mesh}", node.name))?;
        *seen = true;
    }
    let children = node
        .children
        .iter()
        .map(|child| convert_node(child, referenced, depth + 1))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(SceneNode {
        name_hash: string_id(&node.name),
        transform: Mat4 {
            cols: node.transform,
        },
        meshes: node.meshes.clone(),
        children,
    })
}

fn convert_mesh(mesh: &MeshDescription) -> anyhow::Result<SceneMesh> {
    let vertex_count = mesh.vertices.len() as u32;
    anyhow::ensure!(
        mesh.indices.len() % 3 == 0,
        "{} indices don't make up whole triangles",
        mesh.indices.len(),
    );
    if let Some(index) = mesh.indices.iter().find(|&&i| i >= vertex_count) {
        anyhow::bail!("Index {index} is out of bounds for {vertex_count} vertices");
    }

    let mut bones = Vec::with_capacity(mesh.bones.len());
    for bone in &mesh.bones {
        if let Some(weight) = bone.weights.iter().find(|w| w.vertex >= vertex_count) {
            anyhow::bail!(
                "Bone {:?} weighs vertex {}, which is out of bounds for {vertex_count} vertices",
                bone.name,
                weight.vertex,
            );
        }
        bones.push(SceneBone {
            name_hash: string_id(&bone.name),
            offset_matrix: Mat4 {
                cols: bone.offset_matrix,
            },
            weights: bone
                .weights
                .iter()
                .map(|w| VertexWeight {
                    vertex: w.vertex,
                    weight: w.weight,
                })
                .collect(),
        });
    }
    debug!(
        "Mesh with {vertex_count} vertices, {} triangles and {} bones.",
        mesh.indices.len() / 3,
        bones.len(),
    );

    Ok(SceneMesh {
        vertices: mesh
            .vertices
            .iter()
            .map(|v| Vertex {
                position: Vec3::new(v.position[0], v.position[1], v.position[2]),
                normal: Vec3::new(v.normal[0], v.normal[1], v.normal[2]),
                uv: Vec2::new(v.uv[0], v.uv[1]),
            })
            .collect(),
        indices: mesh.indices.clone(),
        bones,
    })
}

#[cfg(test)]
mod tests {
    use super::{pack, ModelDescription};

    const QUAD: &str = r#"{
        "root": {
            "name": "root",
            "children": [{ "name": "quad", "meshes": [0] }]
        },
        "meshes": [{
            "vertices": [
                { "position": [0.0, 0.0, 0.0], "uv": [0.0, 0.0] },
                { "position": [1.0, 0.0, 0.0], "uv": [1.0, 0.0] },
                { "position": [1.0, 1.0, 0.0], "uv": [1.0, 1.0] },
                { "position": [0.0, 1.0, 0.0], "uv": [0.0, 1.0] }
            ],
            "indices": [0, 1, 2, 0, 2, 3],
            "bones": [
                { "name": "left", "weights": [{ "vertex": 0, "weight": 1.0 }, { "vertex": 3, "weight": 1.0 }] },
                { "name": "right", "weights": [{ "vertex": 1, "weight": 1.0 }, { "vertex": 2, "weight": 1.0 }] }
            ]
        }]
    }"#;

    #[test]
    fn descriptions_are_validated() {
        let description: ModelDescription = serde_json::from_str(QUAD).unwrap();
        assert!(pack(&description).is_ok());

        let mut broken: ModelDescription = serde_json::from_str(QUAD).unwrap();
        broken.meshes[0].indices.push(0);
        assert!(pack(&broken).is_err());

        let mut broken: ModelDescription = serde_json::from_str(QUAD).unwrap();
        broken.meshes[0].indices[5] = 4;
        assert!(pack(&broken).is_err());

        let mut broken: ModelDescription = serde_json::from_str(QUAD).unwrap();
        broken.meshes[0].bones[1].weights[0].vertex = 9;
        assert!(pack(&broken).is_err());

        let mut broken: ModelDescription = serde_json::from_str(QUAD).unwrap();
        broken.root.as_mut().unwrap().children[0].meshes.push(1);
        assert!(pack(&broken).is_err());

        let mut broken: ModelDescription = serde_json::from_str(QUAD).unwrap();
        broken.root = None;
        assert!(pack(&broken).is_err());
    }
}
