use std::{
    io::{BufRead, Write},
    path::Path,
};

use nalgebra::Vector3;

use super::Mesh;
use crate::error::{RigError, Stage};

/// Parse a Wavefront OBJ stream into one mesh per `o` object.
///
/// Vertices are global to the file, so each object is compacted to the
/// vertices it references. Polygons are fan-triangulated; texture and
/// normal references are ignored.
pub fn read_obj_objects<R: BufRead>(reader: R, path: &Path) -> Result<Vec<Mesh>, RigError> {
    let malformed = |line: usize, message: String| RigError::Malformed {
        stage: Stage::Import,
        format: "OBJ",
        path: path.to_path_buf(),
        message: format!("line {line}: {message}"),
    };

    let mut vertices: Vec<Vector3<f32>> = Vec::new();
    let mut objects: Vec<(String, Vec<[u32; 3]>)> = Vec::new();
    let default_name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("object")
        .to_string();

    for (line_index, line) in reader.lines().enumerate() {
        let line_number = line_index + 1;
        let line = line.map_err(|source| RigError::io(Stage::Import, path, source))?;
        let line = line.trim();
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("v") => {
                let coords: Vec<f32> = tokens
                    .take(3)
                    .map(str::parse::<f32>)
                    .collect::<Result<_, _>>()
                    .map_err(|error| malformed(line_number, format!("bad vertex: {error}")))?;
                if coords.len() != 3 {
                    return Err(malformed(line_number, "vertex needs three coordinates".to_string()));
                }
                vertices.push(Vector3::new(coords[0], coords[1], coords[2]));
            }
            Some("o") => {
                let name = tokens.collect::<Vec<_>>().join(" ");
                objects.push((name, Vec::new()));
            }
            Some("f") => {
                let corners = tokens
                    .map(|token| resolve_index(token, vertices.len()))
                    .collect::<Result<Vec<u32>, String>>()
                    .map_err(|message| malformed(line_number, message))?;
                if corners.len() < 3 {
                    return Err(malformed(line_number, "face needs at least three vertices".to_string()));
                }
                if objects.is_empty() {
                    objects.push((default_name.clone(), Vec::new()));
                }
                if let Some((_, faces)) = objects.last_mut() {
                    for i in 1..corners.len() - 1 {
                        faces.push([corners[0], corners[i], corners[i + 1]]);
                    }
                }
            }
            _ => {}
        }
    }

    Ok(objects
        .into_iter()
        .filter(|(_, faces)| !faces.is_empty())
        .map(|(name, faces)| compact_object(name, &vertices, &faces))
        .collect())
}

/// Resolve an `f` token (`7`, `7/1`, `7//3`, `-1/...`) to a zero-based index.
fn resolve_index(token: &str, vertex_count: usize) -> Result<u32, String> {
    let head = token.split('/').next().unwrap_or(token);
    let value: i64 = head
        .parse()
        .map_err(|_| format!("bad face index '{token}'"))?;
    let resolved = match value {
        0 => return Err("face index 0 is not valid".to_string()),
        positive if positive > 0 => positive - 1,
        negative => vertex_count as i64 + negative,
    };
    if resolved < 0 || resolved as usize >= vertex_count {
        return Err(format!("face index {value} out of range ({vertex_count} vertices)"));
    }
    Ok(resolved as u32)
}

fn compact_object(name: String, vertices: &[Vector3<f32>], faces: &[[u32; 3]]) -> Mesh {
    let mut remap = std::collections::HashMap::new();
    let mut mesh = Mesh::new(name);
    for face in faces {
        let mapped = face.map(|index| {
            *remap.entry(index).or_insert_with(|| {
                mesh.positions.push(vertices[index as usize]);
                (mesh.positions.len() - 1) as u32
            })
        });
        mesh.faces.push(mapped);
    }
    mesh
}

/// Write `mesh` as a single-object OBJ.
pub fn write_obj<W: Write>(mesh: &Mesh, mut writer: W) -> std::io::Result<()> {
    writeln!(writer, "o {}", mesh.name)?;
    for position in &mesh.positions {
        writeln!(writer, "v {} {} {}", position.x, position.y, position.z)?;
    }
    for face in &mesh.faces {
        writeln!(writer, "f {} {} {}", face[0] + 1, face[1] + 1, face[2] + 1)?;
    }
    writer.flush()
}
