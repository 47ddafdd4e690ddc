use std::{io::Write, path::Path};

use nalgebra::Vector3;
use ply_rs::{
    parser::Parser,
    ply::{
        Addable, DefaultElement, ElementDef, Encoding, Header, Ply, Property, PropertyDef, PropertyType,
        ScalarType,
    },
    writer::Writer,
};
use thiserror::Error;

use super::Mesh;
use crate::error::{RigError, Stage};

const INDEX_KEYS: [&str; 2] = ["vertex_indices", "vertex_index"];

/// Payload sizes that disagree with the bytes actually present.
#[derive(Debug, Error, PartialEq, Eq)]
enum PayloadError {
    #[error("element '{element}' declares {count} entries but only {available} bytes follow the header")]
    TooManyEntries {
        element: String,
        count: usize,
        available: usize,
    },
    #[error("bad list length in '{element}' entry {entry}")]
    BadListLength { element: String, entry: usize },
    #[error("'{element}' entry {entry} runs past the end of the file")]
    Truncated { element: String, entry: usize },
}

fn scalar_size(scalar: &ScalarType) -> usize {
    match scalar {
        ScalarType::Char | ScalarType::UChar => 1,
        ScalarType::Short | ScalarType::UShort => 2,
        ScalarType::Int | ScalarType::UInt | ScalarType::Float => 4,
        ScalarType::Double => 8,
    }
}

/// Smallest number of payload bytes one entry of `element` can occupy.
fn min_entry_size(element: &ElementDef, encoding: &Encoding) -> usize {
    match encoding {
        Encoding::Ascii => 1,
        Encoding::BinaryLittleEndian | Encoding::BinaryBigEndian => element
            .properties
            .values()
            .map(|property| match &property.data_type {
                PropertyType::Scalar(scalar) => scalar_size(scalar),
                PropertyType::List(count, _) => scalar_size(count),
            })
            .sum::<usize>()
            .max(1),
    }
}

/// Reject headers that declare more entries than the payload can hold.
fn check_element_counts(header: &Header, payload_len: usize) -> Result<(), PayloadError> {
    for element in header.elements.values() {
        let needed = element.count.checked_mul(min_entry_size(element, &header.encoding));
        if needed.is_none_or(|needed| needed > payload_len) {
            return Err(PayloadError::TooManyEntries {
                element: element.name.clone(),
                count: element.count,
                available: payload_len,
            });
        }
    }
    Ok(())
}

fn read_list_count(bytes: &[u8], scalar: &ScalarType, big_endian: bool) -> Option<usize> {
    if matches!(scalar, ScalarType::Float | ScalarType::Double) {
        return None;
    }
    let size = scalar_size(scalar);
    let mut buffer = [0u8; 4];
    buffer[..size].copy_from_slice(bytes.get(..size)?);
    if big_endian {
        buffer[..size].reverse();
    }
    match scalar {
        ScalarType::Char => usize::try_from(buffer[0] as i8).ok(),
        ScalarType::UChar => Some(buffer[0] as usize),
        ScalarType::Short => usize::try_from(i16::from_le_bytes([buffer[0], buffer[1]])).ok(),
        ScalarType::UShort => Some(u16::from_le_bytes([buffer[0], buffer[1]]) as usize),
        ScalarType::Int => usize::try_from(i32::from_le_bytes(buffer)).ok(),
        ScalarType::UInt => usize::try_from(u32::from_le_bytes(buffer)).ok(),
        ScalarType::Float | ScalarType::Double => None,
    }
}

/// Walk a binary payload and check every list length against the bytes left.
fn check_binary_lists(header: &Header, payload: &[u8]) -> Result<(), PayloadError> {
    let big_endian = matches!(header.encoding, Encoding::BinaryBigEndian);
    let mut offset = 0usize;
    for element in header.elements.values() {
        for entry in 0..element.count {
            for property in element.properties.values() {
                match &property.data_type {
                    PropertyType::Scalar(scalar) => offset += scalar_size(scalar),
                    PropertyType::List(count_type, item) => {
                        let rest = payload.get(offset..).unwrap_or_default();
                        let count = read_list_count(rest, count_type, big_endian).ok_or_else(|| {
                            PayloadError::BadListLength {
                                element: element.name.clone(),
                                entry,
                            }
                        })?;
                        offset += scalar_size(count_type);
                        let needed = count.checked_mul(scalar_size(item));
                        match needed.and_then(|needed| offset.checked_add(needed)) {
                            Some(end) if end <= payload.len() => offset = end,
                            _ => {
                                return Err(PayloadError::Truncated {
                                    element: element.name.clone(),
                                    entry,
                                });
                            }
                        }
                    }
                }
            }
            if offset > payload.len() {
                return Err(PayloadError::Truncated {
                    element: element.name.clone(),
                    entry,
                });
            }
        }
    }
    Ok(())
}

fn float_property(element: &DefaultElement, key: &str) -> Option<f32> {
    Some(match element.get(key)? {
        Property::Float(value) => *value,
        Property::Double(value) => *value as f32,
        Property::Char(value) => *value as f32,
        Property::UChar(value) => *value as f32,
        Property::Short(value) => *value as f32,
        Property::UShort(value) => *value as f32,
        Property::Int(value) => *value as f32,
        Property::UInt(value) => *value as f32,
        _ => return None,
    })
}

/// Face corners, or `None` when an index is negative or not an integer list.
fn index_list(element: &DefaultElement) -> Option<Vec<u32>> {
    let property = INDEX_KEYS.iter().find_map(|key| element.get(*key))?;
    match property {
        Property::ListChar(values) => values.iter().map(|value| u32::try_from(*value).ok()).collect(),
        Property::ListUChar(values) => Some(values.iter().map(|value| u32::from(*value)).collect()),
        Property::ListShort(values) => values.iter().map(|value| u32::try_from(*value).ok()).collect(),
        Property::ListUShort(values) => Some(values.iter().map(|value| u32::from(*value)).collect()),
        Property::ListInt(values) => values.iter().map(|value| u32::try_from(*value).ok()).collect(),
        Property::ListUInt(values) => Some(values.clone()),
        _ => None,
    }
}

/// Parse a PLY file (ASCII, binary little- or big-endian). Only `vertex`
/// positions and `face` index lists are kept; other elements are skipped.
pub fn read_ply(bytes: &[u8], path: &Path) -> Result<Mesh, RigError> {
    let malformed = |message: String| RigError::Malformed {
        stage: Stage::Import,
        format: "PLY",
        path: path.to_path_buf(),
        message,
    };

    let mut reader = bytes;
    let parser = Parser::<DefaultElement>::new();
    let header = parser
        .read_header(&mut reader)
        .map_err(|error| malformed(format!("failed to parse header: {error}")))?;
    if !header.elements.contains_key("vertex") {
        return Err(malformed("no 'vertex' element".to_string()));
    }
    check_element_counts(&header, reader.len()).map_err(|error| malformed(error.to_string()))?;
    if !matches!(header.encoding, Encoding::Ascii) {
        check_binary_lists(&header, reader).map_err(|error| malformed(error.to_string()))?;
    }
    let payload = parser
        .read_payload(&mut reader, &header)
        .map_err(|error| malformed(format!("failed to read payload: {error}")))?;

    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("ply")
        .to_string();
    let mut mesh = Mesh::new(name);

    if let Some(vertices) = payload.get("vertex") {
        mesh.positions.reserve(vertices.len());
        for vertex in vertices {
            mesh.positions.push(Vector3::new(
                float_property(vertex, "x").unwrap_or(0.0),
                float_property(vertex, "y").unwrap_or(0.0),
                float_property(vertex, "z").unwrap_or(0.0),
            ));
        }
    }

    if let Some(faces) = payload.get("face") {
        for (index, face) in faces.iter().enumerate() {
            let corners = index_list(face).ok_or_else(|| malformed(format!("face {index} has no usable index list")))?;
            if corners.len() >= 3 {
                for i in 1..corners.len() - 1 {
                    mesh.faces.push([corners[0], corners[i], corners[i + 1]]);
                }
            }
        }
    }

    let vertex_count = mesh.positions.len() as u32;
    if let Some(face) = mesh.faces.iter().find(|face| face.iter().any(|index| *index >= vertex_count)) {
        return Err(malformed(format!(
            "face {face:?} references a vertex beyond {vertex_count}"
        )));
    }
    Ok(mesh)
}

fn scalar_def(name: &str, scalar: ScalarType) -> PropertyDef {
    PropertyDef::new(name.to_string(), PropertyType::Scalar(scalar))
}

/// Write `mesh` as ASCII PLY.
pub fn write_ply<W: Write>(mesh: &Mesh, mut writer: W) -> std::io::Result<()> {
    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::Ascii;
    ply.header.comments.push(mesh.name.clone());

    let mut vertex_def = ElementDef::new("vertex".to_string());
    for axis in ["x", "y", "z"] {
        vertex_def.properties.add(scalar_def(axis, ScalarType::Float));
    }
    vertex_def.count = mesh.positions.len();
    ply.header.elements.add(vertex_def);

    let mut face_def = ElementDef::new("face".to_string());
    face_def.properties.add(PropertyDef::new(
        INDEX_KEYS[0].to_string(),
        PropertyType::List(ScalarType::UChar, ScalarType::Int),
    ));
    face_def.count = mesh.faces.len();
    ply.header.elements.add(face_def);

    let vertices = mesh
        .positions
        .iter()
        .map(|position| {
            let mut element = DefaultElement::new();
            element.insert("x".to_string(), Property::Float(position.x));
            element.insert("y".to_string(), Property::Float(position.y));
            element.insert("z".to_string(), Property::Float(position.z));
            element
        })
        .collect();
    ply.payload.insert("vertex".to_string(), vertices);

    let faces = mesh
        .faces
        .iter()
        .map(|face| {
            let mut element = DefaultElement::new();
            let corners = face.iter().map(|index| *index as i32).collect();
            element.insert(INDEX_KEYS[0].to_string(), Property::ListInt(corners));
            element
        })
        .collect();
    ply.payload.insert("face".to_string(), faces);

    Writer::<DefaultElement>::new().write_ply(&mut writer, &mut ply)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASCII_QUAD: &str = "ply
format ascii 1.0
comment quad with colors
element vertex 4
property float x
property float y
property float z
property uchar red
element face 1
property list uchar int vertex_indices
element edge 1
property int vertex1
property int vertex2
end_header
0 0 0 255
1 0 0 255
1 1 0 255
0 1 0 255
4 0 1 2 3
0 1
";

    fn binary_header(big_endian: bool, count_type: &str) -> Vec<u8> {
        let format = if big_endian { "binary_big_endian" } else { "binary_little_endian" };
        format!(
            "ply\nformat {format} 1.0\nelement vertex 3\nproperty float x\nproperty float y\nproperty float z\nelement face 1\nproperty list {count_type} uint vertex_index\nend_header\n"
        )
        .into_bytes()
    }

    fn push_u32(bytes: &mut Vec<u8>, value: u32, big_endian: bool) {
        if big_endian {
            bytes.extend_from_slice(&value.to_be_bytes());
        } else {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }

    fn push_positions(bytes: &mut Vec<u8>, big_endian: bool) {
        let floats = [0.0f32, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 3.0, 0.5];
        for value in floats {
            push_u32(bytes, value.to_bits(), big_endian);
        }
    }

    fn binary_triangle(big_endian: bool) -> Vec<u8> {
        let mut bytes = binary_header(big_endian, "uchar");
        push_positions(&mut bytes, big_endian);
        bytes.push(3);
        for index in [0u32, 1, 2] {
            push_u32(&mut bytes, index, big_endian);
        }
        bytes
    }

    #[test]
    fn given_ascii_ply_with_extra_properties_when_parsed_then_quad_is_triangulated() {
        let mesh = read_ply(ASCII_QUAD.as_bytes(), Path::new("quad.ply")).expect("parse");

        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.faces, vec![[0, 1, 2], [0, 2, 3]]);
        assert_eq!(mesh.positions[2], Vector3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn given_binary_ply_in_either_byte_order_when_parsed_then_values_match() {
        for big_endian in [false, true] {
            let mesh = read_ply(&binary_triangle(big_endian), Path::new("tri.ply")).expect("parse");

            assert_eq!(mesh.faces, vec![[0, 1, 2]]);
            assert_eq!(mesh.positions[2], Vector3::new(0.0, 3.0, 0.5));
        }
    }

    #[test]
    fn given_truncated_body_when_parsed_then_malformed_error_is_returned() {
        let mut bytes = binary_triangle(false);
        bytes.truncate(bytes.len() - 3);

        let error = read_ply(&bytes, Path::new("short.ply")).expect_err("truncated");

        assert!(matches!(error, RigError::Malformed { format: "PLY", .. }));
    }

    #[test]
    fn given_corrupt_list_count_when_parsed_then_malformed_error_is_returned() {
        let mut bytes = binary_header(false, "uint");
        push_positions(&mut bytes, false);
        push_u32(&mut bytes, u32::MAX, false);
        for index in [0u32, 1, 2] {
            push_u32(&mut bytes, index, false);
        }

        let error = read_ply(&bytes, Path::new("corrupt.ply")).expect_err("corrupt list");

        assert!(matches!(error, RigError::Malformed { stage: Stage::Import, format: "PLY", .. }));
    }

    #[test]
    fn given_element_count_beyond_payload_when_parsed_then_malformed_error_is_returned() {
        let bytes = b"ply\nformat binary_little_endian 1.0\nelement vertex 4000000000\nproperty float x\nproperty float y\nproperty float z\nend_header\n\0\0\0\0";

        let error = read_ply(bytes, Path::new("huge.ply")).expect_err("oversized header");

        match error {
            RigError::Malformed { message, .. } => assert!(message.contains("4000000000")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn given_mesh_when_written_then_it_parses_back() {
        let mut mesh = Mesh::new("tri");
        mesh.positions = vec![Vector3::zeros(), Vector3::new(0.5, 0.0, 0.0), Vector3::y()];
        mesh.faces = vec![[0, 1, 2]];
        let mut buffer = Vec::new();

        write_ply(&mesh, &mut buffer).expect("write");
        let parsed = read_ply(&buffer, Path::new("tri.ply")).expect("parse");

        assert_eq!(parsed.positions, mesh.positions);
        assert_eq!(parsed.faces, mesh.faces);
    }
}
