use std::{
    borrow::Cow,
    fs,
    io::BufWriter,
    path::{Path, PathBuf},
};

use gltf::binary::{Glb, Header};
use nalgebra::{Matrix4, Vector3};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use super::{skeleton::Skeleton, solver::WeightTier, weights::VertexWeightSet};
use crate::{
    error::{RigError, Stage},
    mesh::{
        Mesh,
        gltf_utils::{BufferBuilder, set_node_local_matrix},
        import::{MeshFormat, detect_format},
        obj::write_obj,
        ply::write_ply,
    },
};

/// Rotation of the `Armature` root node: −90° about X, Z-up to glTF Y-up.
pub const ARMATURE_ROTATION: [f32; 4] = [-0.707_106_8, 0.0, 0.0, 0.707_106_8];

/// Name of the root node that carries the working-frame conversion.
pub const ARMATURE_NODE: &str = "Armature";

/// First glTF node index used for joints; 0 is the armature, 1 the mesh.
pub(crate) const FIRST_JOINT_NODE: usize = 2;

/// Version written into project files.
pub const PROJECT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub format: MeshFormat,
    pub bones: usize,
    pub vertices: usize,
    pub faces: usize,
    /// Sidecar files written next to the main output, such as a `.bin` buffer.
    pub extra_files: Vec<PathBuf>,
}

/// Write the rigged character to `path` in the format its extension names.
/// Mesh-only formats drop the skeleton and weights.
pub fn export_rig(
    path: &Path,
    mesh: &Mesh,
    skeleton: &Skeleton,
    weights: &VertexWeightSet,
) -> Result<ExportSummary, RigError> {
    let format = detect_format(path, Stage::Export)?;
    let mut extra_files = Vec::new();
    match format {
        MeshFormat::Glb => {
            let (document, bin) = build_gltf_document(mesh, skeleton, weights, None);
            let json_bytes = serialize_json(&document, path)?;
            let glb = Glb {
                header: Header {
                    magic: *b"glTF",
                    version: 2,
                    length: 0,
                },
                json: Cow::Owned(json_bytes),
                bin: Some(Cow::Owned(bin)),
            };
            let mut out = Vec::new();
            glb.to_writer(&mut out).map_err(|error| RigError::Malformed {
                stage: Stage::Export,
                format: "GLB",
                path: path.to_path_buf(),
                message: error.to_string(),
            })?;
            fs::write(path, out).map_err(|source| RigError::io(Stage::Export, path, source))?;
        }
        MeshFormat::Gltf => {
            let bin_path = path.with_extension("bin");
            let bin_uri = bin_path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("buffer.bin")
                .to_string();
            let (document, bin) = build_gltf_document(mesh, skeleton, weights, Some(&bin_uri));
            let json_bytes = serialize_json(&document, path)?;
            fs::write(&bin_path, bin).map_err(|source| RigError::io(Stage::Export, &bin_path, source))?;
            fs::write(path, json_bytes).map_err(|source| RigError::io(Stage::Export, path, source))?;
            extra_files.push(bin_path);
        }
        MeshFormat::Obj => {
            let file = fs::File::create(path).map_err(|source| RigError::io(Stage::Export, path, source))?;
            write_obj(mesh, BufWriter::new(file)).map_err(|source| RigError::io(Stage::Export, path, source))?;
        }
        MeshFormat::Ply => {
            let file = fs::File::create(path).map_err(|source| RigError::io(Stage::Export, path, source))?;
            write_ply(mesh, BufWriter::new(file)).map_err(|source| RigError::io(Stage::Export, path, source))?;
        }
    }
    info!(path = %path.display(), %format, bones = skeleton.len(), "rig exported");
    Ok(ExportSummary {
        path: path.to_path_buf(),
        format,
        bones: if format.carries_rig() { skeleton.len() } else { 0 },
        vertices: mesh.vertex_count(),
        faces: mesh.face_count(),
        extra_files,
    })
}

fn serialize_json(document: &Value, path: &Path) -> Result<Vec<u8>, RigError> {
    serde_json::to_vec(document).map_err(|error| RigError::Malformed {
        stage: Stage::Export,
        format: "glTF",
        path: path.to_path_buf(),
        message: error.to_string(),
    })
}

/// Build a skinned glTF 2.0 document and its binary buffer.
///
/// Positions, joint frames and inverse bind matrices stay in the Z-up working
/// frame; the `Armature` root rotates the whole hierarchy to Y-up. When
/// `bin_uri` is `None` the buffer is left uri-less for a GLB container.
pub fn build_gltf_document(
    mesh: &Mesh,
    skeleton: &Skeleton,
    weights: &VertexWeightSet,
    bin_uri: Option<&str>,
) -> (Value, Vec<u8>) {
    let mut builder = BufferBuilder::default();
    let position_accessor = builder.push_vec3(&mesh.positions);
    let normal_accessor = builder.push_vec3(&mesh.vertex_normals());
    let (joints, lanes): (Vec<[u16; 4]>, Vec<[f32; 4]>) =
        (0..mesh.vertex_count()).map(|vertex| weights.gltf_lanes(vertex)).unzip();
    let joints_accessor = builder.push_joints_u16(&joints);
    let weights_accessor = builder.push_vec4(&lanes);
    let indices: Vec<u32> = mesh.faces.iter().flatten().copied().collect();
    let indices_accessor = builder.push_indices(&indices);

    let rest_worlds = skeleton.rest_worlds();
    let inverse_binds: Vec<Matrix4<f32>> = rest_worlds
        .iter()
        .map(|world| world.try_inverse().unwrap_or_else(Matrix4::identity))
        .collect();
    let ibm_accessor = builder.push_mat4(&inverse_binds);

    let mut nodes = vec![
        json!({
            "name": ARMATURE_NODE,
            "rotation": ARMATURE_ROTATION,
            "children": [],
        }),
        json!({
            "name": mesh.name,
            "mesh": 0,
            "skin": 0,
        }),
    ];
    let mut armature_children = vec![json!(1)];
    for (id, bone) in skeleton.bones().iter().enumerate() {
        let local = match bone.parent {
            Some(parent) => {
                let parent_inverse = inverse_binds.get(parent).copied().unwrap_or_else(Matrix4::identity);
                parent_inverse * rest_worlds[id]
            }
            None => rest_worlds[id],
        };
        let mut node = json!({
            "name": bone.name,
            "extras": { "tail": tail_array(&bone.tail) },
        });
        set_node_local_matrix(&mut node, &local);
        let children: Vec<usize> = skeleton
            .children(id)
            .into_iter()
            .map(|child| child + FIRST_JOINT_NODE)
            .collect();
        if !children.is_empty() {
            node["children"] = json!(children);
        }
        nodes.push(node);
        if bone.parent.is_none() {
            armature_children.push(json!(id + FIRST_JOINT_NODE));
        }
    }
    nodes[0]["children"] = Value::Array(armature_children);

    let root_joint = skeleton.roots().first().map(|root| root + FIRST_JOINT_NODE);
    let mut skin = json!({
        "name": ARMATURE_NODE,
        "joints": (0..skeleton.len()).map(|id| id + FIRST_JOINT_NODE).collect::<Vec<_>>(),
        "inverseBindMatrices": ibm_accessor,
    });
    if let Some(root_joint) = root_joint {
        skin["skeleton"] = json!(root_joint);
    }

    let (bin, buffer_views, accessors) = builder.finish();
    let mut buffer = json!({ "byteLength": bin.len() });
    if let Some(uri) = bin_uri {
        buffer["uri"] = json!(uri);
    }

    let document = json!({
        "asset": { "version": "2.0", "generator": concat!("autorig ", env!("CARGO_PKG_VERSION")) },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": nodes,
        "meshes": [{
            "name": mesh.name,
            "primitives": [{
                "attributes": {
                    "POSITION": position_accessor,
                    "NORMAL": normal_accessor,
                    "JOINTS_0": joints_accessor,
                    "WEIGHTS_0": weights_accessor,
                },
                "indices": indices_accessor,
                "mode": 4,
            }],
        }],
        "skins": [skin],
        "accessors": accessors,
        "bufferViews": buffer_views,
        "buffers": [buffer],
    });
    (document, bin)
}

fn tail_array(tail: &Vector3<f32>) -> [f32; 3] {
    [tail.x, tail.y, tail.z]
}

// ─── Native project file ──────────────────────────────────────────────────────

/// Everything needed to reload a rig without re-running the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigProject {
    pub format_version: u32,
    pub character: String,
    pub preset: String,
    pub mesh: Mesh,
    pub skeleton: Skeleton,
    pub weights: VertexWeightSet,
    pub tier: WeightTier,
}

/// `{stem}.autorig.json` next to `output`.
pub fn project_path_for_output(output: &Path) -> PathBuf {
    output.with_extension("autorig.json")
}

pub fn write_project(path: &Path, project: &RigProject) -> Result<(), RigError> {
    let content = serde_json::to_vec_pretty(project).map_err(|error| RigError::Malformed {
        stage: Stage::Export,
        format: "project",
        path: path.to_path_buf(),
        message: error.to_string(),
    })?;
    fs::write(path, content).map_err(|source| RigError::io(Stage::Export, path, source))?;
    info!(path = %path.display(), "project saved");
    Ok(())
}

/// Read a project back, checking the skeleton tree and that weights match
/// the mesh.
pub fn load_project(path: &Path) -> Result<RigProject, RigError> {
    let bytes = fs::read(path).map_err(|source| RigError::io(Stage::StressTest, path, source))?;
    let malformed = |message: String| RigError::Malformed {
        stage: Stage::StressTest,
        format: "project",
        path: path.to_path_buf(),
        message,
    };
    let project: RigProject = serde_json::from_slice(&bytes).map_err(|error| malformed(error.to_string()))?;
    if project.skeleton.is_empty() {
        return Err(RigError::NoSkeleton {
            stage: Stage::StressTest,
            path: path.to_path_buf(),
        });
    }
    project
        .skeleton
        .validate_tree()
        .map_err(|error| RigError::InvalidSkeleton {
            stage: Stage::StressTest,
            message: error.to_string(),
        })?;
    if project.weights.vertex_count() != project.mesh.vertex_count() {
        return Err(malformed(format!(
            "{} weight entries for {} vertices",
            project.weights.vertex_count(),
            project.mesh.vertex_count()
        )));
    }
    Ok(project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::gltf_utils::{collect_parent_index_map, compute_node_world_matrices};
    use crate::rig::weights::Influence;
    use crate::test_support::closed_box;

    fn sample() -> (Mesh, Skeleton, VertexWeightSet) {
        let mesh = closed_box(Vector3::zeros(), Vector3::new(10.0, 10.0, 20.0), 1);
        let mut skeleton = Skeleton::new();
        skeleton
            .add_bone("mixamorig:Hips", Vector3::new(5.0, 5.0, 1.0), Vector3::new(5.0, 5.0, 10.0), None)
            .expect("hips");
        skeleton
            .add_bone("mixamorig:Spine", Vector3::new(5.0, 5.0, 10.0), Vector3::new(8.0, 5.0, 19.0), Some("mixamorig:Hips"))
            .expect("spine");
        let weights = VertexWeightSet::from_influences(
            mesh.positions
                .iter()
                .map(|p| vec![Influence::new(usize::from(p.z > 10.0), 1.0)])
                .collect(),
        );
        (mesh, skeleton, weights)
    }

    #[test]
    fn given_rig_when_exported_then_joint_worlds_match_bone_heads() {
        let (mesh, skeleton, weights) = sample();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hero.glb");

        export_rig(&path, &mesh, &skeleton, &weights).expect("export");

        let (document, buffers, _) = gltf::import(&path).expect("valid glb");
        let locals: Vec<Matrix4<f32>> = document
            .nodes()
            .map(|node| Matrix4::from(node.transform().matrix()))
            .collect();
        let worlds = compute_node_world_matrices(&locals, &collect_parent_index_map(&document));
        let to_working = crate::mesh::import::y_up_to_z_up();
        for (id, bone) in skeleton.bones().iter().enumerate() {
            let head = (to_working * worlds[id + FIRST_JOINT_NODE]).column(3).xyz();
            assert!((head - bone.head).norm() < 1e-3, "{}: {head:?}", bone.name);
        }
        let skin = document.skins().next().expect("skin");
        let ibm = skin
            .reader(|buffer| buffers.get(buffer.index()).map(|data| &data.0[..]))
            .read_inverse_bind_matrices()
            .expect("inverse binds")
            .nth(1)
            .map(Matrix4::from)
            .expect("spine ibm");
        assert!((ibm * skeleton.rest_worlds()[1] - Matrix4::identity()).norm() < 1e-4);
        assert_eq!(document.nodes().next().and_then(|node| node.name()), Some(ARMATURE_NODE));
        assert_eq!(skin.skeleton().map(|node| node.index()), Some(FIRST_JOINT_NODE));
    }

    #[test]
    fn given_glb_output_when_exported_then_gltf_crate_reads_skin_back() {
        let (mesh, skeleton, weights) = sample();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hero.glb");

        let summary = export_rig(&path, &mesh, &skeleton, &weights).expect("export");

        assert_eq!(summary.bones, 2);
        let (document, buffers, _) = gltf::import(&path).expect("valid glb");
        let skin = document.skins().next().expect("skin");
        assert_eq!(skin.joints().count(), 2);
        let primitive = document.meshes().next().expect("mesh").primitives().next().expect("primitive");
        let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| &data.0[..]));
        assert_eq!(reader.read_positions().expect("positions").count(), mesh.vertex_count());
        assert!(reader.read_joints(0).is_some());
        assert!(reader.read_weights(0).is_some());
    }

    #[test]
    fn given_gltf_output_when_exported_then_sidecar_buffer_is_written() {
        let (mesh, skeleton, weights) = sample();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hero.gltf");

        let summary = export_rig(&path, &mesh, &skeleton, &weights).expect("export");

        assert_eq!(summary.extra_files, vec![dir.path().join("hero.bin")]);
        let (document, _, _) = gltf::import(&path).expect("valid gltf");
        assert_eq!(document.nodes().count(), 4);
    }

    #[test]
    fn given_mesh_only_format_when_exported_then_rig_is_not_counted() {
        let (mesh, skeleton, weights) = sample();
        let dir = tempfile::tempdir().expect("tempdir");

        let summary = export_rig(&dir.path().join("hero.obj"), &mesh, &skeleton, &weights).expect("export");

        assert_eq!(summary.bones, 0);
        assert_eq!(summary.faces, mesh.face_count());
        let error = export_rig(&dir.path().join("hero.fbx"), &mesh, &skeleton, &weights).expect_err("fbx");
        assert!(matches!(error, RigError::UnsupportedFormat { stage: Stage::Export, .. }));
    }

    #[test]
    fn given_saved_project_when_loaded_then_contents_round_trip() {
        let (mesh, skeleton, weights) = sample();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = project_path_for_output(&dir.path().join("hero.glb"));
        let project = RigProject {
            format_version: PROJECT_FORMAT_VERSION,
            character: "hero".to_string(),
            preset: "default".to_string(),
            mesh,
            skeleton,
            weights,
            tier: WeightTier::HeatDiffusion,
        };

        write_project(&path, &project).expect("save");
        let loaded = load_project(&path).expect("load");

        assert_eq!(path.file_name().and_then(|name| name.to_str()), Some("hero.autorig.json"));
        assert_eq!(loaded, project);
    }
}
