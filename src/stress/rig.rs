//! Poseable copy of a rigged character.
//!
//! The validator re-imports the exported artifact instead of reusing the
//! rigger's in-memory state, so it sees exactly what a downstream consumer
//! would. Everything is held in the Z-up working frame.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use gltf::{
    Semantic,
    accessor::{DataType, Dimensions},
};
use nalgebra::{Matrix4, UnitQuaternion, Vector3, Vector4};
use rayon::prelude::*;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    error::{RigError, Stage},
    mesh::{
        Aabb, Mesh,
        gltf_utils::{
            JOINT_TYPES, WEIGHT_TYPES, collect_parent_index_map, compute_node_world_matrices, gltf_error,
            read_triangle_primitive, readable_accessor,
        },
        import::y_up_to_z_up,
    },
    rig::{
        export::load_project,
        skeleton::{BoneId, Skeleton},
        weights::{Influence, VertexWeightSet, normalize_influences},
    },
};

const PROJECT_SUFFIX: &str = ".autorig.json";

/// Mesh, skeleton and weights of one rig plus the current pose rotations.
#[derive(Debug, Clone)]
pub struct PoseRig {
    source: PathBuf,
    mesh: Mesh,
    skeleton: Skeleton,
    weights: VertexWeightSet,
    inverse_binds: Vec<Matrix4<f32>>,
    rest_locals: Vec<Matrix4<f32>>,
    rotations: Vec<UnitQuaternion<f32>>,
}

impl PoseRig {
    /// Build from rest geometry. `rest_worlds` holds one bind frame per bone;
    /// bones must be ordered parents first.
    pub fn new(
        source: impl Into<PathBuf>,
        mesh: Mesh,
        skeleton: Skeleton,
        weights: VertexWeightSet,
        rest_worlds: Vec<Matrix4<f32>>,
    ) -> Result<Self, RigError> {
        let source = source.into();
        if skeleton.is_empty() {
            return Err(RigError::NoSkeleton {
                stage: Stage::StressTest,
                path: source,
            });
        }
        if mesh.is_empty() {
            return Err(RigError::EmptyMesh { stage: Stage::StressTest });
        }
        let malformed = |message: String| RigError::Malformed {
            stage: Stage::StressTest,
            format: "rig",
            path: source.clone(),
            message,
        };
        if weights.vertex_count() != mesh.vertex_count() {
            return Err(malformed(format!(
                "{} weight entries for {} vertices",
                weights.vertex_count(),
                mesh.vertex_count()
            )));
        }
        if rest_worlds.len() != skeleton.len() {
            return Err(malformed(format!(
                "{} bind frames for {} bones",
                rest_worlds.len(),
                skeleton.len()
            )));
        }
        for (id, bone) in skeleton.bones().iter().enumerate() {
            if bone.parent.is_some_and(|parent| parent >= id) {
                return Err(malformed(format!("bone '{}' is stored before its parent", bone.name)));
            }
        }

        let mut inverse_binds = Vec::with_capacity(rest_worlds.len());
        for (world, bone) in rest_worlds.iter().zip(skeleton.bones()) {
            let inverse = world
                .try_inverse()
                .ok_or_else(|| malformed(format!("bind frame of bone '{}' is singular", bone.name)))?;
            inverse_binds.push(inverse);
        }
        let rest_locals = skeleton
            .bones()
            .iter()
            .enumerate()
            .map(|(id, bone)| match bone.parent {
                Some(parent) => inverse_binds[parent] * rest_worlds[id],
                None => rest_worlds[id],
            })
            .collect();

        let rotations = vec![UnitQuaternion::identity(); skeleton.len()];
        Ok(Self {
            source,
            mesh,
            skeleton,
            weights,
            inverse_binds,
            rest_locals,
            rotations,
        })
    }

    /// Load a skinned `.glb`/`.gltf` or an `.autorig.json` project.
    pub fn load(path: &Path) -> Result<Self, RigError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let rig = if file_name.ends_with(PROJECT_SUFFIX) {
            let project = load_project(path)?;
            let rest_worlds = project.skeleton.rest_worlds();
            Self::new(path, project.mesh, project.skeleton, project.weights, rest_worlds)?
        } else if file_name.ends_with(".glb") || file_name.ends_with(".gltf") {
            load_skinned_gltf(path)?
        } else {
            return Err(RigError::UnsupportedFormat {
                stage: Stage::StressTest,
                extension: path
                    .extension()
                    .and_then(|extension| extension.to_str())
                    .unwrap_or("")
                    .to_string(),
                path: path.to_path_buf(),
            });
        };
        info!(
            path = %path.display(),
            bones = rig.skeleton.len(),
            vertices = rig.mesh.vertex_count(),
            "rig loaded for stress test"
        );
        Ok(rig)
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Character name guessed from the file name.
    pub fn name(&self) -> String {
        let file_name = self
            .source
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("character");
        let lowered = file_name.to_ascii_lowercase();
        let stem_len = [PROJECT_SUFFIX, ".glb", ".gltf"]
            .iter()
            .find(|suffix| lowered.ends_with(*suffix))
            .map_or(file_name.len(), |suffix| file_name.len() - suffix.len());
        file_name[..stem_len].to_string()
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    pub fn weights(&self) -> &VertexWeightSet {
        &self.weights
    }

    pub fn rest_bounds(&self) -> Option<Aabb> {
        self.mesh.bounds()
    }

    pub fn rotation(&self, bone: BoneId) -> Option<&UnitQuaternion<f32>> {
        self.rotations.get(bone)
    }

    /// Set a bone-local pose rotation. Returns false for an unknown bone.
    pub fn set_rotation(&mut self, bone: BoneId, rotation: UnitQuaternion<f32>) -> bool {
        match self.rotations.get_mut(bone) {
            Some(slot) => {
                *slot = rotation;
                true
            }
            None => false,
        }
    }

    pub fn reset(&mut self) {
        self.rotations.fill(UnitQuaternion::identity());
    }

    pub fn is_at_rest(&self) -> bool {
        self.rotations.iter().all(|rotation| *rotation == UnitQuaternion::identity())
    }

    /// Posed world frame of every bone.
    pub fn pose_worlds(&self) -> Vec<Matrix4<f32>> {
        let mut worlds: Vec<Matrix4<f32>> = Vec::with_capacity(self.rest_locals.len());
        for (id, bone) in self.skeleton.bones().iter().enumerate() {
            let local = self.rest_locals[id] * self.rotations[id].to_homogeneous();
            let world = match bone.parent {
                Some(parent) => worlds[parent] * local,
                None => local,
            };
            worlds.push(world);
        }
        worlds
    }

    /// Skinning matrix per bone: posed world times inverse bind.
    pub fn skin_matrices(&self) -> Vec<Matrix4<f32>> {
        self.pose_worlds()
            .iter()
            .zip(&self.inverse_binds)
            .map(|(world, inverse_bind)| world * inverse_bind)
            .collect()
    }

    /// Forward kinematics then linear blend skinning of every vertex.
    pub fn skin(&self) -> Vec<Vector3<f32>> {
        let skin = self.skin_matrices();
        self.mesh
            .positions
            .par_iter()
            .enumerate()
            .map(|(vertex, position)| {
                let influences = self.weights.influences(vertex);
                if influences.is_empty() {
                    return *position;
                }
                let rest = position.push(1.0);
                let mut blended = Vector4::zeros();
                for influence in influences {
                    if let Some(matrix) = skin.get(influence.bone) {
                        blended += (matrix * rest) * influence.weight;
                    }
                }
                blended.xyz()
            })
            .collect()
    }
}

/// Exporter-written node extras; `tail` is the bone tail in the working frame.
#[derive(Debug, Default, Deserialize)]
struct JointExtras {
    tail: Option<[f32; 3]>,
}

fn load_skinned_gltf(path: &Path) -> Result<PoseRig, RigError> {
    let bytes = fs::read(path).map_err(|source| RigError::io(Stage::StressTest, path, source))?;
    let gltf::Gltf { document, blob } =
        gltf::Gltf::from_slice(&bytes).map_err(|error| gltf_error(Stage::StressTest, path, error))?;
    let buffers = gltf::import_buffers(&document, path.parent(), blob)
        .map_err(|error| gltf_error(Stage::StressTest, path, error))?;

    let skinned = document.nodes().find_map(|node| {
        let skin = node.skin()?;
        let mesh = node.mesh()?;
        Some((node, skin, mesh))
    });
    let Some((skin_node, skin, source_mesh)) = skinned else {
        return Err(RigError::NoSkeleton {
            stage: Stage::StressTest,
            path: path.to_path_buf(),
        });
    };
    let joints: Vec<usize> = skin.joints().map(|node| node.index()).collect();
    if joints.is_empty() {
        return Err(RigError::NoSkeleton {
            stage: Stage::StressTest,
            path: path.to_path_buf(),
        });
    }

    let to_working_frame = y_up_to_z_up();
    let nodes: Vec<gltf::Node> = document.nodes().collect();
    let locals: Vec<Matrix4<f32>> = nodes
        .iter()
        .map(|node| Matrix4::from(node.transform().matrix()))
        .collect();
    let parent_map = collect_parent_index_map(&document);
    let node_worlds = compute_node_world_matrices(&locals, &parent_map);

    let inverse_binds: Vec<Matrix4<f32>> =
        if readable_accessor(skin.inverse_bind_matrices(), &[DataType::F32], Dimensions::Mat4) {
            skin.reader(|buffer| buffers.get(buffer.index()).map(|data| &data.0[..]))
                .read_inverse_bind_matrices()
                .map(|matrices| matrices.map(Matrix4::from).collect())
                .unwrap_or_default()
        } else {
            Vec::new()
        };
    let joint_worlds: Vec<Matrix4<f32>> = joints.iter().map(|node| to_working_frame * node_worlds[*node]).collect();
    let joint_binds: Vec<Matrix4<f32>> = joints
        .iter()
        .enumerate()
        .map(|(slot, node)| {
            inverse_binds
                .get(slot)
                .copied()
                .unwrap_or_else(|| node_worlds[*node].try_inverse().unwrap_or_else(Matrix4::identity))
        })
        .collect();
    // Bind-pose skin matrices; identity for a rig exported at rest.
    let bind_skin: Vec<Matrix4<f32>> = joint_worlds
        .iter()
        .zip(&joint_binds)
        .map(|(world, inverse_bind)| world * inverse_bind)
        .collect();

    let mesh_name = skin_node
        .name()
        .or_else(|| source_mesh.name())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| format!("mesh_{}", source_mesh.index()));
    let mesh_world = to_working_frame * node_worlds[skin_node.index()];
    let (mut mesh, joint_influences) =
        read_skinned_primitives(&source_mesh, &buffers, &mesh_name, &bind_skin, &mesh_world);
    if mesh.is_empty() {
        return Err(RigError::NoMesh {
            path: path.to_path_buf(),
        });
    }

    // Parents first, so forward kinematics is a single pass.
    let joint_slot: HashMap<usize, usize> = joints.iter().enumerate().map(|(slot, node)| (*node, slot)).collect();
    let joint_parent: Vec<Option<usize>> = joints
        .iter()
        .map(|node| {
            let mut current = *node;
            let mut steps = 0;
            while let Some(parent) = parent_map.get(&current) {
                if let Some(slot) = joint_slot.get(parent) {
                    return Some(*slot);
                }
                current = *parent;
                steps += 1;
                if steps > nodes.len() {
                    break;
                }
            }
            None
        })
        .collect();
    let depth = |mut slot: usize| {
        let mut depth = 0;
        while let Some(parent) = joint_parent[slot] {
            slot = parent;
            depth += 1;
            if depth > joints.len() {
                break;
            }
        }
        depth
    };
    let mut order: Vec<usize> = (0..joints.len()).collect();
    order.sort_by_key(|slot| depth(*slot));
    let mut bone_of_slot = vec![0usize; joints.len()];
    for (bone, slot) in order.iter().enumerate() {
        bone_of_slot[*slot] = bone;
    }

    let joint_name = |slot: usize| {
        nodes[joints[slot]]
            .name()
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("joint_{}", joints[slot]))
    };
    let mut skeleton = Skeleton::new();
    let mut rest_worlds = Vec::with_capacity(joints.len());
    for slot in &order {
        let world = joint_worlds[*slot];
        let head = world.fixed_view::<3, 1>(0, 3).into_owned();
        let tail = extras_tail(&nodes[joints[*slot]])
            .unwrap_or_else(|| derived_tail(&world, &head, *slot, &joint_parent, &joint_worlds));
        let parent = joint_parent[*slot].map(joint_name);
        skeleton
            .add_bone(joint_name(*slot), head, tail, parent.as_deref())
            .map_err(|error| RigError::InvalidSkeleton {
                stage: Stage::StressTest,
                message: error.to_string(),
            })?;
        rest_worlds.push(world);
    }

    let influences = joint_influences
        .into_iter()
        .map(|lanes| {
            let mut influences: Vec<Influence> = lanes
                .into_iter()
                .filter(|(slot, weight)| *slot < joints.len() && *weight > 0.0)
                .map(|(slot, weight)| Influence::new(bone_of_slot[slot], weight))
                .collect();
            if !normalize_influences(&mut influences) {
                influences.clear();
            }
            influences
        })
        .collect();
    mesh.name = mesh_name;
    debug!(
        joints = joints.len(),
        buffers = buffers.len(),
        vertices = mesh.vertex_count(),
        "skinned glTF parsed"
    );
    PoseRig::new(path, mesh, skeleton, VertexWeightSet::from_influences(influences), rest_worlds)
}

fn extras_tail(node: &gltf::Node) -> Option<Vector3<f32>> {
    let raw = node.extras().as_ref()?;
    let extras: JointExtras = serde_json::from_str(raw.get()).ok()?;
    extras.tail.map(Vector3::from)
}

/// First child joint's head, else a short stub along the bone's local +Y.
fn derived_tail(
    world: &Matrix4<f32>,
    head: &Vector3<f32>,
    slot: usize,
    joint_parent: &[Option<usize>],
    joint_worlds: &[Matrix4<f32>],
) -> Vector3<f32> {
    if let Some(child) = joint_parent.iter().position(|parent| *parent == Some(slot)) {
        let child_head = joint_worlds[child].fixed_view::<3, 1>(0, 3).into_owned();
        if (child_head - head).norm() > 1e-6 {
            return child_head;
        }
    }
    let stub = joint_parent[slot]
        .map(|parent| (head - joint_worlds[parent].fixed_view::<3, 1>(0, 3).into_owned()).norm() * 0.5)
        .filter(|length| *length > 1e-6)
        .unwrap_or(1.0);
    let axis = world.fixed_view::<3, 1>(0, 1).into_owned();
    head + axis.try_normalize(1e-9).unwrap_or_else(Vector3::z) * stub
}

/// Triangles plus per-vertex `(joint slot, weight)` lanes of every primitive
/// of `source`. Positions are moved into the bind pose of the working frame.
/// Normalized integer weights are widened to floats by the reader.
fn read_skinned_primitives(
    source: &gltf::Mesh,
    buffers: &[gltf::buffer::Data],
    name: &str,
    bind_skin: &[Matrix4<f32>],
    mesh_world: &Matrix4<f32>,
) -> (Mesh, Vec<Vec<(usize, f32)>>) {
    let mut mesh = Mesh::new(name);
    let mut lanes_per_vertex = Vec::new();

    for primitive in source.primitives() {
        let Some((positions, triangles)) = read_triangle_primitive(&primitive, buffers) else {
            continue;
        };
        let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| &data.0[..]));
        let skinned = readable_accessor(primitive.get(&Semantic::Joints(0)), JOINT_TYPES, Dimensions::Vec4)
            && readable_accessor(primitive.get(&Semantic::Weights(0)), WEIGHT_TYPES, Dimensions::Vec4);
        let (joints, weights): (Vec<[u16; 4]>, Vec<[f32; 4]>) = if skinned {
            (
                reader
                    .read_joints(0)
                    .map(|joints| joints.into_u16().collect())
                    .unwrap_or_default(),
                reader
                    .read_weights(0)
                    .map(|weights| weights.into_f32().collect())
                    .unwrap_or_default(),
            )
        } else {
            warn!(mesh = source.index(), primitive = primitive.index(), "primitive has no readable skin weights");
            (Vec::new(), Vec::new())
        };

        let base = mesh.positions.len() as u32;
        for (vertex, position) in positions.iter().enumerate() {
            let lanes: Vec<(usize, f32)> = match (joints.get(vertex), weights.get(vertex)) {
                (Some(joints), Some(weights)) => joints
                    .iter()
                    .zip(weights)
                    .filter(|(_, weight)| **weight > 0.0)
                    .map(|(joint, weight)| (usize::from(*joint), *weight))
                    .collect(),
                _ => Vec::new(),
            };
            mesh.positions.push(bind_position(position, &lanes, bind_skin, mesh_world));
            lanes_per_vertex.push(lanes);
        }
        mesh.faces
            .extend(triangles.iter().map(|[a, b, c]| [base + a, base + b, base + c]));
    }
    (mesh, lanes_per_vertex)
}

fn bind_position(
    position: &Vector3<f32>,
    lanes: &[(usize, f32)],
    bind_skin: &[Matrix4<f32>],
    mesh_world: &Matrix4<f32>,
) -> Vector3<f32> {
    let point = position.push(1.0);
    let total: f32 = lanes
        .iter()
        .filter(|(slot, _)| *slot < bind_skin.len())
        .map(|(_, weight)| weight)
        .sum();
    if !(total > 1e-7) {
        return (mesh_world * point).xyz();
    }
    let mut blended = Vector4::zeros();
    for (slot, weight) in lanes {
        if let Some(matrix) = bind_skin.get(*slot) {
            blended += (matrix * point) * (*weight / total);
        }
    }
    blended.xyz()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::{
        export::{PROJECT_FORMAT_VERSION, RigProject, export_rig, write_project},
        solver::WeightTier,
    };
    use crate::test_support::closed_box;
    use serde_json::json;

    fn column_rig() -> (Mesh, Skeleton, VertexWeightSet) {
        let mesh = closed_box(Vector3::zeros(), Vector3::new(10.0, 10.0, 20.0), 2);
        let mut skeleton = Skeleton::new();
        skeleton
            .add_bone("mixamorig:Hips", Vector3::new(5.0, 5.0, 0.0), Vector3::new(5.0, 5.0, 10.0), None)
            .expect("hips");
        skeleton
            .add_bone("mixamorig:Spine", Vector3::new(5.0, 5.0, 10.0), Vector3::new(5.0, 5.0, 20.0), Some("mixamorig:Hips"))
            .expect("spine");
        let weights = VertexWeightSet::from_influences(
            mesh.positions
                .iter()
                .map(|p| vec![Influence::new(usize::from(p.z > 10.0), 1.0)])
                .collect(),
        );
        (mesh, skeleton, weights)
    }

    fn pose_rig() -> PoseRig {
        let (mesh, skeleton, weights) = column_rig();
        let rest_worlds = skeleton.rest_worlds();
        PoseRig::new("column.glb", mesh, skeleton, weights, rest_worlds).expect("rig")
    }

    fn max_distance(a: &[Vector3<f32>], b: &[Vector3<f32>]) -> f32 {
        a.iter().zip(b).map(|(a, b)| (a - b).norm()).fold(0.0, f32::max)
    }

    #[test]
    fn given_rest_rig_when_skinned_then_positions_match_the_mesh() {
        let rig = pose_rig();

        let skinned = rig.skin();

        assert!(max_distance(&skinned, &rig.mesh().positions) < 1e-4);
        assert!(rig.is_at_rest());
    }

    #[test]
    fn given_rotated_child_bone_when_skinned_then_only_its_vertices_move() {
        let mut rig = pose_rig();
        assert!(rig.set_rotation(1, UnitQuaternion::from_euler_angles(90f32.to_radians(), 0.0, 0.0)));

        let skinned = rig.skin();

        for (vertex, (posed, rest)) in skinned.iter().zip(&rig.mesh().positions).enumerate() {
            if rest.z > 10.0 {
                assert!((posed - rest).norm() > 1e-3, "vertex {vertex} should move");
            } else {
                assert!((posed - rest).norm() < 1e-4, "vertex {vertex} should stay");
            }
        }
        assert!(!rig.set_rotation(7, UnitQuaternion::identity()));
    }

    #[test]
    fn given_posed_rig_when_reset_then_rotations_return_to_identity() {
        let mut rig = pose_rig();
        rig.set_rotation(0, UnitQuaternion::from_euler_angles(0.3, 0.2, 0.1));

        rig.reset();

        assert!(rig.is_at_rest());
        assert!(max_distance(&rig.skin(), &rig.mesh().positions) < 1e-4);
    }

    #[test]
    fn given_exported_glb_when_loaded_then_rest_geometry_and_bones_round_trip() {
        let (mesh, skeleton, weights) = column_rig();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("column.glb");
        export_rig(&path, &mesh, &skeleton, &weights).expect("export");

        let rig = PoseRig::load(&path).expect("load");

        assert_eq!(rig.name(), "column");
        assert_eq!(rig.skeleton().len(), 2);
        assert_eq!(rig.skeleton().find("mixamorig:Spine"), Some(1));
        assert_eq!(rig.skeleton().bones()[1].parent, Some(0));
        assert!((rig.skeleton().bones()[1].tail - Vector3::new(5.0, 5.0, 20.0)).norm() < 1e-4);
        assert_eq!(rig.mesh().vertex_count(), mesh.vertex_count());
        assert!(max_distance(&rig.mesh().positions, &mesh.positions) < 1e-3);
        assert!(max_distance(&rig.skin(), &mesh.positions) < 1e-3);
        assert_eq!(rig.weights().coverage(1e-4), 1.0);
    }

    #[test]
    fn given_gltf_with_normalized_u8_weights_when_loaded_then_every_vertex_is_bound() {
        let dir = tempfile::tempdir().expect("tempdir");
        let positions: Vec<u8> = [[-0.5f32, 0.0, 0.0], [0.5, 0.0, 0.0], [0.0, 2.0, 0.0]]
            .iter()
            .flatten()
            .flat_map(|component| component.to_le_bytes())
            .collect();
        fs::write(dir.path().join("fin.bin"), &positions).expect("write bin");
        // Joints [0], [0], [1] then weights [255, 0, 0, 0] for all three vertices.
        let skin_buffer = "data:application/octet-stream;base64,AAAAAAAAAAABAAAA/wAAAP8AAAD/AAAA";
        let document = json!({
            "asset": { "version": "2.0" },
            "scene": 0,
            "scenes": [{ "nodes": [0, 1] }],
            "nodes": [
                { "name": "fin", "mesh": 0, "skin": 0 },
                { "name": "Root", "children": [2] },
                { "name": "Tip", "translation": [0.0, 1.0, 0.0] },
            ],
            "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0, "JOINTS_0": 1, "WEIGHTS_0": 2 } }] }],
            "skins": [{ "joints": [1, 2] }],
            "buffers": [
                { "uri": "fin.bin", "byteLength": 36 },
                { "uri": skin_buffer, "byteLength": 24 },
            ],
            "bufferViews": [
                { "buffer": 0, "byteLength": 36 },
                { "buffer": 1, "byteLength": 12 },
                { "buffer": 1, "byteOffset": 12, "byteLength": 12 },
            ],
            "accessors": [
                { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                  "min": [-0.5, 0.0, 0.0], "max": [0.5, 2.0, 0.0] },
                { "bufferView": 1, "componentType": 5121, "count": 3, "type": "VEC4" },
                { "bufferView": 2, "componentType": 5121, "normalized": true, "count": 3, "type": "VEC4" },
            ],
        });
        let path = dir.path().join("fin.gltf");
        fs::write(&path, serde_json::to_vec(&document).expect("json")).expect("write gltf");

        let mut rig = PoseRig::load(&path).expect("load");

        assert_eq!(rig.weights().coverage(1e-4), 1.0);
        let tip = rig.skeleton().find("Tip").expect("tip bone");
        assert_eq!(rig.skeleton().bones()[tip].parent, Some(0));
        assert!((rig.skeleton().bones()[tip].head - Vector3::new(0.0, 0.0, 1.0)).norm() < 1e-5);
        let influences = rig.weights().influences(2);
        assert_eq!(influences.len(), 1);
        assert_eq!(influences[0].bone, tip);
        assert!((influences[0].weight - 1.0).abs() < 1e-6);
        assert_eq!(rig.mesh().faces, vec![[0, 1, 2]]);
        assert!((rig.mesh().positions[2] - Vector3::new(0.0, 0.0, 2.0)).norm() < 1e-5);

        assert!(rig.set_rotation(tip, UnitQuaternion::from_euler_angles(90f32.to_radians(), 0.0, 0.0)));
        let skinned = rig.skin();

        assert!((skinned[2] - rig.mesh().positions[2]).norm() > 0.5);
        assert!((skinned[0] - rig.mesh().positions[0]).norm() < 1e-5);
    }

    #[test]
    fn given_project_file_when_loaded_then_rig_uses_stored_skeleton() {
        let (mesh, skeleton, weights) = column_rig();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("column.autorig.json");
        let project = RigProject {
            format_version: PROJECT_FORMAT_VERSION,
            character: "column".to_string(),
            preset: "default".to_string(),
            mesh: mesh.clone(),
            skeleton,
            weights,
            tier: WeightTier::CapsuleFallback,
        };
        write_project(&path, &project).expect("write");

        let rig = PoseRig::load(&path).expect("load");

        assert_eq!(rig.name(), "column");
        assert_eq!(rig.mesh(), &mesh);
        assert_eq!(rig.skeleton(), &project.skeleton);
    }

    #[test]
    fn given_unrigged_gltf_when_loaded_then_no_skeleton_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("static.gltf");
        fs::write(&path, r#"{"asset":{"version":"2.0"},"nodes":[{"name":"box"}]}"#).expect("write");

        let error = PoseRig::load(&path).expect_err("no skin");

        assert!(matches!(error, RigError::NoSkeleton { stage: Stage::StressTest, .. }));
    }

    #[test]
    fn given_unknown_extension_when_loaded_then_format_is_rejected() {
        let error = PoseRig::load(Path::new("rig.fbx")).expect_err("unsupported");

        assert!(matches!(error, RigError::UnsupportedFormat { .. }));
    }
}
