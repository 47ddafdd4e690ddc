use std::{collections::HashMap, path::Path};

use gltf::{
    Accessor, Document, Primitive, Semantic, buffer,
    accessor::{DataType, Dimensions},
    mesh::Mode,
};
use nalgebra::{Matrix3, Matrix4, UnitQuaternion, Vector3};
use serde_json::{Value, json};
use tracing::warn;

use crate::error::{RigError, Stage};

const COMPONENT_UNSIGNED_SHORT: u64 = 5123;
const COMPONENT_UNSIGNED_INT: u64 = 5125;
const COMPONENT_FLOAT: u64 = 5126;

/// Component types the `gltf` readers accept per attribute.
pub(crate) const INDEX_TYPES: &[DataType] = &[DataType::U8, DataType::U16, DataType::U32];
pub(crate) const JOINT_TYPES: &[DataType] = &[DataType::U8, DataType::U16];
pub(crate) const WEIGHT_TYPES: &[DataType] = &[DataType::U8, DataType::U16, DataType::F32];

const TARGET_ARRAY_BUFFER: u64 = 34962;
const TARGET_ELEMENT_ARRAY_BUFFER: u64 = 34963;

// ─── Reading through the gltf crate ───────────────────────────────────────────

/// Map a `gltf` crate failure to the pipeline error for `stage`.
pub(crate) fn gltf_error(stage: Stage, path: &Path, error: gltf::Error) -> RigError {
    match error {
        gltf::Error::Io(source) => RigError::io(stage, path, source),
        other => RigError::Malformed {
            stage,
            format: "glTF",
            path: path.to_path_buf(),
            message: other.to_string(),
        },
    }
}

/// True when `accessor` exists, is non-empty and stores `dimensions` of one
/// of `types`. The `gltf` readers panic on other layouts.
pub(crate) fn readable_accessor(accessor: Option<Accessor>, types: &[DataType], dimensions: Dimensions) -> bool {
    accessor.is_some_and(|accessor| {
        accessor.count() > 0
            && accessor.dimensions() == dimensions
            && types.contains(&accessor.data_type())
            && accessor.sparse().is_none_or(|sparse| sparse.count() > 0)
    })
}

/// Positions and in-range triangles of one primitive, or `None` when it is
/// not a readable triangle list.
pub(crate) fn read_triangle_primitive(
    primitive: &Primitive,
    buffers: &[buffer::Data],
) -> Option<(Vec<Vector3<f32>>, Vec<[u32; 3]>)> {
    if primitive.mode() != Mode::Triangles {
        warn!(primitive = primitive.index(), mode = ?primitive.mode(), "skipping non-triangle primitive");
        return None;
    }
    let indexed = primitive.indices().is_some();
    if !readable_accessor(primitive.get(&Semantic::Positions), &[DataType::F32], Dimensions::Vec3)
        || (indexed && !readable_accessor(primitive.indices(), INDEX_TYPES, Dimensions::Scalar))
    {
        warn!(primitive = primitive.index(), "skipping primitive with unreadable accessors");
        return None;
    }

    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| &data.0[..]));
    let positions: Vec<Vector3<f32>> = reader.read_positions()?.map(Vector3::from).collect();
    let count = positions.len() as u32;
    let indices: Vec<u32> = match reader.read_indices() {
        Some(indices) => indices.into_u32().collect(),
        None if indexed => return None,
        None => (0..count).collect(),
    };
    let triangles = indices
        .chunks_exact(3)
        .filter(|triangle| triangle.iter().all(|index| *index < count))
        .map(|triangle| [triangle[0], triangle[1], triangle[2]])
        .collect();
    Some((positions, triangles))
}

/// Write a MAT4 (column-major) to binary as little-endian f32 sequence.
fn write_mat4_f32_le(bin: &mut [u8], offset: usize, matrix: &Matrix4<f32>) {
    let mut cursor = offset;
    for value in matrix.as_slice() {
        let end = cursor + 4;
        if end > bin.len() {
            return;
        }
        bin[cursor..end].copy_from_slice(&value.to_le_bytes());
        cursor = end;
    }
}

// ─── Buffer builder ───────────────────────────────────────────────────────────

/// Accumulates one binary buffer plus the bufferViews and accessors that
/// describe it. Every view starts on a 4-byte boundary.
#[derive(Debug, Default)]
pub(crate) struct BufferBuilder {
    bin: Vec<u8>,
    views: Vec<Value>,
    accessors: Vec<Value>,
}

impl BufferBuilder {
    fn push_view(&mut self, bytes: &[u8], target: Option<u64>) -> usize {
        while self.bin.len() % 4 != 0 {
            self.bin.push(0);
        }
        let mut view = json!({
            "buffer": 0,
            "byteOffset": self.bin.len(),
            "byteLength": bytes.len(),
        });
        if let Some(target) = target {
            view["target"] = json!(target);
        }
        self.bin.extend_from_slice(bytes);
        self.views.push(view);
        self.views.len() - 1
    }

    fn push_accessor(&mut self, accessor: Value) -> usize {
        self.accessors.push(accessor);
        self.accessors.len() - 1
    }

    /// VEC3 float accessor with min/max bounds, as POSITION requires.
    pub(crate) fn push_vec3(&mut self, values: &[Vector3<f32>]) -> usize {
        let bytes: Vec<u8> = values
            .iter()
            .flat_map(|value| value.iter().flat_map(|component| component.to_le_bytes()).collect::<Vec<_>>())
            .collect();
        let view = self.push_view(&bytes, Some(TARGET_ARRAY_BUFFER));
        let mut min = Vector3::repeat(f32::MAX);
        let mut max = Vector3::repeat(f32::MIN);
        for value in values {
            min = min.inf(value);
            max = max.sup(value);
        }
        if values.is_empty() {
            min = Vector3::zeros();
            max = Vector3::zeros();
        }
        self.push_accessor(json!({
            "bufferView": view,
            "componentType": COMPONENT_FLOAT,
            "count": values.len(),
            "type": "VEC3",
            "min": [min.x, min.y, min.z],
            "max": [max.x, max.y, max.z],
        }))
    }

    pub(crate) fn push_joints_u16(&mut self, values: &[[u16; 4]]) -> usize {
        let bytes: Vec<u8> = values
            .iter()
            .flat_map(|lanes| lanes.iter().flat_map(|lane| lane.to_le_bytes()).collect::<Vec<_>>())
            .collect();
        let view = self.push_view(&bytes, Some(TARGET_ARRAY_BUFFER));
        self.push_accessor(json!({
            "bufferView": view,
            "componentType": COMPONENT_UNSIGNED_SHORT,
            "count": values.len(),
            "type": "VEC4",
        }))
    }

    pub(crate) fn push_vec4(&mut self, values: &[[f32; 4]]) -> usize {
        let bytes: Vec<u8> = values
            .iter()
            .flat_map(|lanes| lanes.iter().flat_map(|lane| lane.to_le_bytes()).collect::<Vec<_>>())
            .collect();
        let view = self.push_view(&bytes, Some(TARGET_ARRAY_BUFFER));
        self.push_accessor(json!({
            "bufferView": view,
            "componentType": COMPONENT_FLOAT,
            "count": values.len(),
            "type": "VEC4",
        }))
    }

    pub(crate) fn push_indices(&mut self, values: &[u32]) -> usize {
        let bytes: Vec<u8> = values.iter().flat_map(|value| value.to_le_bytes()).collect();
        let view = self.push_view(&bytes, Some(TARGET_ELEMENT_ARRAY_BUFFER));
        self.push_accessor(json!({
            "bufferView": view,
            "componentType": COMPONENT_UNSIGNED_INT,
            "count": values.len(),
            "type": "SCALAR",
        }))
    }

    pub(crate) fn push_mat4(&mut self, values: &[Matrix4<f32>]) -> usize {
        let mut bytes = vec![0u8; values.len() * 64];
        for (index, matrix) in values.iter().enumerate() {
            write_mat4_f32_le(&mut bytes, index * 64, matrix);
        }
        let view = self.push_view(&bytes, None);
        self.push_accessor(json!({
            "bufferView": view,
            "componentType": COMPONENT_FLOAT,
            "count": values.len(),
            "type": "MAT4",
        }))
    }

    /// Binary payload padded to 4 bytes, bufferViews, accessors.
    pub(crate) fn finish(mut self) -> (Vec<u8>, Vec<Value>, Vec<Value>) {
        while self.bin.len() % 4 != 0 {
            self.bin.push(0);
        }
        (self.bin, self.views, self.accessors)
    }
}

// ─── Node hierarchy helpers ───────────────────────────────────────────────────

/// Collect child→parent node index mapping.
pub(crate) fn collect_parent_index_map(document: &Document) -> HashMap<usize, usize> {
    document
        .nodes()
        .flat_map(|parent| parent.children().map(move |child| (child.index(), parent.index())))
        .collect()
}

/// Compute world matrices from local transforms and parent links.
pub(crate) fn compute_node_world_matrices(
    local_matrices: &[Matrix4<f32>],
    parent_map: &HashMap<usize, usize>,
) -> Vec<Matrix4<f32>> {
    let mut worlds = vec![Matrix4::<f32>::identity(); local_matrices.len()];
    let mut resolved = vec![false; local_matrices.len()];

    for index in 0..local_matrices.len() {
        resolve_world_matrix(index, local_matrices, parent_map, &mut worlds, &mut resolved, 0);
    }

    worlds
}

fn resolve_world_matrix(
    index: usize,
    local_matrices: &[Matrix4<f32>],
    parent_map: &HashMap<usize, usize>,
    worlds: &mut [Matrix4<f32>],
    resolved: &mut [bool],
    depth: usize,
) {
    if resolved[index] {
        return;
    }

    // Cyclic parent links end at the node itself instead of recursing forever.
    let parent = parent_map
        .get(&index)
        .copied()
        .filter(|parent| *parent < local_matrices.len() && depth < local_matrices.len());
    let world = if let Some(parent_index) = parent {
        resolve_world_matrix(parent_index, local_matrices, parent_map, worlds, resolved, depth + 1);
        worlds[parent_index] * local_matrices[index]
    } else {
        local_matrices[index]
    };

    worlds[index] = world;
    resolved[index] = true;
}

// ─── Node TRS write ───────────────────────────────────────────────────────────

/// Decompose and write a local transform matrix back into a glTF node as TRS.
pub(crate) fn set_node_local_matrix(node: &mut Value, matrix: &Matrix4<f32>) {
    let Some(object) = node.as_object_mut() else {
        return;
    };

    let translation = Vector3::new(matrix[(0, 3)], matrix[(1, 3)], matrix[(2, 3)]);

    let basis_x = Vector3::new(matrix[(0, 0)], matrix[(1, 0)], matrix[(2, 0)]);
    let basis_y = Vector3::new(matrix[(0, 1)], matrix[(1, 1)], matrix[(2, 1)]);
    let basis_z = Vector3::new(matrix[(0, 2)], matrix[(1, 2)], matrix[(2, 2)]);

    let mut scale_x = basis_x.norm();
    let scale_y = basis_y.norm();
    let scale_z = basis_z.norm();

    let mut rot_x = if scale_x > 1e-8 { basis_x / scale_x } else { Vector3::x() };
    let rot_y = if scale_y > 1e-8 { basis_y / scale_y } else { Vector3::y() };
    let rot_z = if scale_z > 1e-8 { basis_z / scale_z } else { Vector3::z() };

    if rot_x.cross(&rot_y).dot(&rot_z) < 0.0 {
        scale_x = -scale_x;
        rot_x = -rot_x;
    }

    let rotation = UnitQuaternion::from_matrix(&Matrix3::from_columns(&[rot_x, rot_y, rot_z]));

    object.remove("matrix");
    object.insert(
        "translation".to_string(),
        json!([translation.x, translation.y, translation.z]),
    );
    object.insert(
        "rotation".to_string(),
        json!([rotation.coords.x, rotation.coords.y, rotation.coords.z, rotation.coords.w]),
    );
    // Unit scale is the glTF default and is left implicit.
    if (scale_x - 1.0).abs() > 1e-5 || (scale_y - 1.0).abs() > 1e-5 || (scale_z - 1.0).abs() > 1e-5 {
        object.insert("scale".to_string(), json!([scale_x, scale_y, scale_z]));
    } else {
        object.remove("scale");
    }
}
