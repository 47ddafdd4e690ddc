use std::{
    fmt, fs,
    io::BufReader,
    path::{Path, PathBuf},
};

use nalgebra::Matrix4;
use serde::Serialize;
use tracing::{info, warn};

use super::{
    Mesh,
    gltf_utils::{collect_parent_index_map, gltf_error, read_triangle_primitive},
    obj::read_obj_objects,
    ply::read_ply,
    repair::weld_vertices,
};
use crate::error::{RigError, Stage};

/// Mesh container formats, selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshFormat {
    Glb,
    Gltf,
    Ply,
    Obj,
}

impl MeshFormat {
    /// Format for `path`, matching the extension case-insensitively.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "glb" => Some(MeshFormat::Glb),
            "gltf" => Some(MeshFormat::Gltf),
            "ply" => Some(MeshFormat::Ply),
            "obj" => Some(MeshFormat::Obj),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            MeshFormat::Glb => "glb",
            MeshFormat::Gltf => "gltf",
            MeshFormat::Ply => "ply",
            MeshFormat::Obj => "obj",
        }
    }

    /// True for formats that carry a skeleton and skin weights.
    pub fn carries_rig(&self) -> bool {
        matches!(self, MeshFormat::Glb | MeshFormat::Gltf)
    }
}

impl fmt::Display for MeshFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Resolve the format of `path` or fail with `UnsupportedFormat` for `stage`.
pub fn detect_format(path: &Path, stage: Stage) -> Result<MeshFormat, RigError> {
    MeshFormat::from_path(path).ok_or_else(|| RigError::UnsupportedFormat {
        stage,
        extension: path
            .extension()
            .and_then(|extension| extension.to_str())
            .unwrap_or("")
            .to_string(),
        path: path.to_path_buf(),
    })
}

/// glTF Y-up to working-frame Z-up: `(x, y, z) → (x, −z, y)`.
pub fn y_up_to_z_up() -> Matrix4<f32> {
    #[rustfmt::skip]
    let matrix = Matrix4::new(
        1.0, 0.0, 0.0, 0.0,
        0.0, 0.0, -1.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    );
    matrix
}

/// What the importer read and what it dropped.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImportSummary {
    pub path: PathBuf,
    pub format: MeshFormat,
    pub object_count: usize,
    pub kept_object: String,
    pub discarded_objects: Vec<String>,
    pub discarded_skins: usize,
    pub discarded_animations: usize,
    pub merged_vertices: usize,
}

/// Read `path` and return its largest object in the Z-up working frame,
/// with split seams re-joined at `fine_weld_distance`.
pub fn import_mesh(path: &Path, fine_weld_distance: f32) -> Result<(Mesh, ImportSummary), RigError> {
    let format = detect_format(path, Stage::Import)?;
    info!(path = %path.display(), %format, "importing mesh");

    let mut discarded_skins = 0;
    let mut discarded_animations = 0;
    let objects = match format {
        MeshFormat::Glb | MeshFormat::Gltf => {
            let scene = read_gltf_objects(path)?;
            discarded_skins = scene.skins;
            discarded_animations = scene.animations;
            scene.objects
        }
        MeshFormat::Obj => {
            let file = fs::File::open(path).map_err(|source| RigError::io(Stage::Import, path, source))?;
            read_obj_objects(BufReader::new(file), path)?
        }
        MeshFormat::Ply => {
            let bytes = fs::read(path).map_err(|source| RigError::io(Stage::Import, path, source))?;
            vec![read_ply(&bytes, path)?]
        }
    };

    let object_count = objects.len();
    let mut largest: Option<usize> = None;
    for (index, object) in objects.iter().enumerate() {
        let larger = largest.is_none_or(|best| object.face_count() > objects[best].face_count());
        if !object.is_empty() && larger {
            largest = Some(index);
        }
    }
    let Some(largest) = largest else {
        return Err(RigError::NoMesh {
            path: path.to_path_buf(),
        });
    };

    let discarded_objects: Vec<String> = objects
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != largest)
        .map(|(_, object)| object.name.clone())
        .collect();
    if !discarded_objects.is_empty() {
        info!(kept = %objects[largest].name, discarded = ?discarded_objects, "keeping largest mesh object");
    }
    if discarded_skins > 0 || discarded_animations > 0 {
        warn!(
            skins = discarded_skins,
            animations = discarded_animations,
            "input rig data is discarded; a new skeleton will be synthesized"
        );
    }

    let mut mesh = objects.into_iter().nth(largest).unwrap_or_default();
    let merged_vertices = weld_vertices(&mut mesh, fine_weld_distance);
    info!(
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        merged_vertices,
        "mesh imported"
    );

    let summary = ImportSummary {
        path: path.to_path_buf(),
        format,
        object_count,
        kept_object: mesh.name.clone(),
        discarded_objects,
        discarded_skins,
        discarded_animations,
        merged_vertices,
    };
    Ok((mesh, summary))
}

struct GltfScene {
    objects: Vec<Mesh>,
    skins: usize,
    animations: usize,
}

/// Walk the default scene and bake every mesh node's world transform.
fn read_gltf_objects(path: &Path) -> Result<GltfScene, RigError> {
    let (document, buffers, _images) =
        gltf::import(path).map_err(|error| gltf_error(Stage::Import, path, error))?;

    let to_working_frame = y_up_to_z_up();
    let mut objects = Vec::new();
    let roots: Vec<gltf::Node> = match document.default_scene().or_else(|| document.scenes().next()) {
        Some(scene) => scene.nodes().collect(),
        None => {
            let parents = collect_parent_index_map(&document);
            document
                .nodes()
                .filter(|node| !parents.contains_key(&node.index()))
                .collect()
        }
    };

    let mut stack: Vec<(gltf::Node, Matrix4<f32>)> = roots
        .into_iter()
        .map(|node| (node, to_working_frame))
        .collect();
    while let Some((node, parent_world)) = stack.pop() {
        let world = parent_world * Matrix4::from(node.transform().matrix());
        if let Some(mesh) = node.mesh() {
            let name = node
                .name()
                .or_else(|| mesh.name())
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| format!("mesh_{}", mesh.index()));
            let mut object = Mesh::new(name);
            for primitive in mesh.primitives() {
                let Some((positions, triangles)) = read_triangle_primitive(&primitive, &buffers) else {
                    continue;
                };
                let base = object.positions.len() as u32;
                object.positions.extend(positions);
                object
                    .faces
                    .extend(triangles.iter().map(|[a, b, c]| [base + a, base + b, base + c]));
            }
            object.transform(&world);
            objects.push(object);
        }
        for child in node.children() {
            stack.push((child, world));
        }
    }

    Ok(GltfScene {
        objects,
        skins: document.skins().count(),
        animations: document.animations().count(),
    })
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use gltf::binary::{Glb, Header};
    use nalgebra::Vector3;
    use serde_json::{Value, json};

    use super::*;
    use crate::{
        mesh::{gltf_utils::BufferBuilder, repair::signed_volume},
        rig::{
            export::export_rig,
            skeleton::Skeleton,
            weights::{Influence, VertexWeightSet},
        },
        test_support::{closed_box, tetrahedron},
    };

    /// GLB with one indexed mesh per entry of `meshes`. Without `roots` the
    /// file has no scene.
    fn write_glb(path: &Path, meshes: &[&Mesh], nodes: Value, roots: Option<&[usize]>) {
        let mut builder = BufferBuilder::default();
        let gltf_meshes: Vec<Value> = meshes
            .iter()
            .map(|mesh| {
                let positions = builder.push_vec3(&mesh.positions);
                let indices: Vec<u32> = mesh.faces.iter().flatten().copied().collect();
                let indices = builder.push_indices(&indices);
                json!({ "primitives": [{ "attributes": { "POSITION": positions }, "indices": indices }] })
            })
            .collect();
        let (bin, views, accessors) = builder.finish();
        let mut document = json!({
            "asset": { "version": "2.0" },
            "nodes": nodes,
            "meshes": gltf_meshes,
            "buffers": [{ "byteLength": bin.len() }],
            "bufferViews": views,
            "accessors": accessors,
        });
        if let Some(roots) = roots {
            document["scene"] = json!(0);
            document["scenes"] = json!([{ "nodes": roots }]);
        }
        let glb = Glb {
            header: Header {
                magic: *b"glTF",
                version: 2,
                length: 0,
            },
            json: Cow::Owned(serde_json::to_vec(&document).expect("json")),
            bin: Some(Cow::Owned(bin)),
        };
        fs::write(path, glb.to_vec().expect("glb")).expect("write glb");
    }

    fn triangle() -> Mesh {
        let mut mesh = Mesh::new("triangle");
        mesh.positions = vec![Vector3::zeros(), Vector3::x(), Vector3::y()];
        mesh.faces = vec![[0, 1, 2]];
        mesh
    }

    fn assert_has_point(mesh: &Mesh, expected: Vector3<f32>) {
        assert!(
            mesh.positions.iter().any(|position| (position - expected).norm() < 1e-4),
            "{expected:?} not in {:?}",
            mesh.positions
        );
    }

    #[test]
    fn given_glb_with_nested_transform_when_imported_then_world_positions_are_z_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested.glb");
        let nodes = json!([
            { "name": "Pivot", "translation": [0.0, 10.0, 0.0], "rotation": [0.0, 0.707_106_8, 0.0, 0.707_106_8], "children": [1] },
            { "name": "Blade", "translation": [1.0, 0.0, 0.0], "mesh": 0 },
        ]);
        write_glb(&path, &[&triangle()], nodes, Some(&[0]));

        let (mesh, summary) = import_mesh(&path, 1e-4).expect("import");

        assert_eq!(summary.format, MeshFormat::Glb);
        assert_eq!(summary.kept_object, "Blade");
        assert_eq!(summary.object_count, 1);
        assert_eq!(mesh.face_count(), 1);
        // Pivot turns +X into −Z, then Y-up becomes Z-up.
        assert_has_point(&mesh, Vector3::new(0.0, 1.0, 10.0));
        assert_has_point(&mesh, Vector3::new(0.0, 2.0, 10.0));
        assert_has_point(&mesh, Vector3::new(0.0, 1.0, 11.0));
    }

    #[test]
    fn given_mirrored_node_when_imported_then_winding_stays_outward() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mirrored.glb");
        let solid = tetrahedron();
        let nodes = json!([{ "name": "Left", "scale": [-1.0, 1.0, 1.0], "mesh": 0 }]);
        write_glb(&path, &[&solid], nodes, Some(&[0]));

        let (mesh, _) = import_mesh(&path, 1e-4).expect("import");

        let volume = signed_volume(&mesh, None);
        assert!(volume > 0.0, "inverted winding: {volume}");
        assert!((volume - signed_volume(&solid, None)).abs() < 1e-4);
    }

    #[test]
    fn given_scene_less_glb_with_several_meshes_when_imported_then_largest_is_kept_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("props.glb");
        let body = closed_box(Vector3::zeros(), Vector3::new(1.0, 1.0, 2.0), 2);
        let nodes = json!([
            { "name": "Body", "mesh": 1, "children": [1] },
            { "name": "Prop", "mesh": 0 },
        ]);
        write_glb(&path, &[&triangle(), &body], nodes, None);

        let (mesh, summary) = import_mesh(&path, 1e-4).expect("import");

        assert_eq!(summary.object_count, 2);
        assert_eq!(summary.kept_object, "Body");
        assert_eq!(summary.discarded_objects, vec!["Prop".to_string()]);
        assert_eq!(mesh.face_count(), body.face_count());
    }

    #[test]
    fn given_exported_rig_when_imported_then_skin_is_discarded_and_geometry_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rigged.glb");
        let body = closed_box(Vector3::zeros(), Vector3::new(10.0, 10.0, 20.0), 1);
        let mut skeleton = Skeleton::new();
        skeleton
            .add_bone("Hips", Vector3::new(5.0, 5.0, 0.0), Vector3::new(5.0, 5.0, 10.0), None)
            .expect("hips");
        let weights = VertexWeightSet::from_influences(vec![vec![Influence::new(0, 1.0)]; body.vertex_count()]);
        export_rig(&path, &body, &skeleton, &weights).expect("export");

        let (mesh, summary) = import_mesh(&path, 1e-4).expect("import");

        assert_eq!(summary.discarded_skins, 1);
        assert_eq!(summary.discarded_animations, 0);
        assert_eq!(mesh.face_count(), 12);
        let bounds = mesh.bounds().expect("bounds");
        assert!((bounds.max - Vector3::new(10.0, 10.0, 20.0)).norm() < 1e-4);
        assert!(bounds.min.norm() < 1e-4);
    }

    #[test]
    fn given_unknown_extension_when_importing_then_unsupported_format_is_fatal() {
        let error = import_mesh(Path::new("character.fbx"), 1e-4).expect_err("unsupported");

        assert!(matches!(
            error,
            RigError::UnsupportedFormat { stage: Stage::Import, ref extension, .. } if extension == "fbx"
        ));
    }

    #[test]
    fn given_uppercase_extension_when_detecting_then_format_is_recognised() {
        assert_eq!(MeshFormat::from_path(Path::new("HERO.GLB")), Some(MeshFormat::Glb));
        assert_eq!(MeshFormat::from_path(Path::new("scan.Ply")), Some(MeshFormat::Ply));
        assert_eq!(MeshFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn given_obj_with_several_objects_when_imported_then_largest_is_kept() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("scene.obj");
        fs::write(
            &path,
            "o Small\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n\
             o Body\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nv 0 0 0.00001\nf 4 5 6 7\nf 8 5 4\n",
        )
        .expect("write obj");

        let (mesh, summary) = import_mesh(&path, 1e-4).expect("import");

        assert_eq!(mesh.name, "Body");
        assert_eq!(summary.object_count, 2);
        assert_eq!(summary.discarded_objects, vec!["Small".to_string()]);
        assert_eq!(summary.merged_vertices, 1);
        assert_eq!(mesh.face_count(), 2);
    }

    #[test]
    fn given_obj_without_faces_when_imported_then_no_mesh_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("points.obj");
        fs::write(&path, "v 0 0 0\nv 1 0 0\n").expect("write obj");

        let error = import_mesh(&path, 1e-4).expect_err("no mesh");

        assert!(matches!(error, RigError::NoMesh { .. }));
    }

    #[test]
    fn given_missing_file_when_importing_then_io_error_names_the_path() {
        let error = import_mesh(Path::new("/nonexistent/hero.ply"), 1e-4).expect_err("missing");

        assert!(matches!(error, RigError::Io { stage: Stage::Import, .. }));
        assert!(error.to_string().contains("hero.ply"));
    }

    #[test]
    fn given_y_up_point_when_converted_then_up_becomes_z() {
        let converted = y_up_to_z_up().transform_vector(&Vector3::new(1.0, 2.0, 3.0));

        assert_eq!(converted, Vector3::new(1.0, -3.0, 2.0));
    }
}
