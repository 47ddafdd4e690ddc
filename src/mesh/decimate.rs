use std::collections::{HashMap, HashSet};

use nalgebra::Vector3;
use tracing::debug;

use super::{Mesh, repair::RepairError};

const BISECTION_STEPS: usize = 24;

/// Reduce `mesh` to at most `budget` faces by vertex clustering.
///
/// The cluster cell size is bisected until the face count lands as close
/// under the budget as the clustering allows. The result never has more
/// faces than the input; the exact count is not guaranteed.
pub fn decimate_to_budget(mesh: &Mesh, budget: usize) -> Result<Mesh, RepairError> {
    if mesh.faces.is_empty() {
        return Err(RepairError::EmptyMesh);
    }
    if mesh.face_count() <= budget {
        return Ok(mesh.clone());
    }
    let Some(bounds) = mesh.bounds() else {
        return Err(RepairError::EmptyMesh);
    };

    let diagonal = bounds.diagonal().max(f32::EPSILON);
    let mut low = diagonal * 1e-6;
    let mut high = diagonal;
    let mut best: Option<Mesh> = None;

    for _ in 0..BISECTION_STEPS {
        let cell = 0.5 * (low + high);
        let candidate = cluster_vertices(mesh, cell);
        let faces = candidate.face_count();
        debug!(cell, faces, budget, "decimation attempt");
        if faces > budget {
            low = cell;
            continue;
        }
        high = cell;
        if faces == 0 {
            continue;
        }
        if best.as_ref().is_none_or(|kept| faces > kept.face_count()) {
            best = Some(candidate);
        }
    }

    best.ok_or(RepairError::DecimationCollapsed)
}

/// Snap every vertex to the mean of its grid cell and drop the faces that
/// collapse or duplicate another face.
fn cluster_vertices(mesh: &Mesh, cell: f32) -> Mesh {
    let Some(bounds) = mesh.bounds() else {
        return Mesh::new(mesh.name.clone());
    };
    let mut cells: HashMap<(i64, i64, i64), u32> = HashMap::new();
    let mut sums: Vec<(Vector3<f32>, u32)> = Vec::new();
    let remap: Vec<u32> = mesh
        .positions
        .iter()
        .map(|position| {
            let offset = (position - bounds.min) / cell;
            let key = (
                offset.x.floor() as i64,
                offset.y.floor() as i64,
                offset.z.floor() as i64,
            );
            let index = *cells.entry(key).or_insert_with(|| {
                sums.push((Vector3::zeros(), 0));
                (sums.len() - 1) as u32
            });
            let slot = &mut sums[index as usize];
            slot.0 += position;
            slot.1 += 1;
            index
        })
        .collect();

    let mut seen = HashSet::new();
    let faces = mesh
        .faces
        .iter()
        .map(|face| face.map(|index| remap[index as usize]))
        .filter(|face| face[0] != face[1] && face[1] != face[2] && face[0] != face[2])
        .filter(|face| {
            let mut key = *face;
            key.sort_unstable();
            seen.insert(key)
        })
        .collect();

    Mesh {
        name: mesh.name.clone(),
        positions: sums.into_iter().map(|(sum, count)| sum / count as f32).collect(),
        faces,
    }
}
