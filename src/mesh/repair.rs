use std::collections::{HashMap, HashSet, VecDeque};

use nalgebra::Vector3;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{Mesh, decimate::decimate_to_budget, edge_key, remesh::laplacian_smooth, remesh::voxel_remesh};
use crate::{
    logging::ResultExt,
    rig::types::{Severity, ValidationIssue},
    settings::{RemeshSettings, RepairSettings},
};

/// Output above `face_budget` times this is reported; the remesh does not
/// aim for the face budget.
pub const FACE_BUDGET_SLACK: f32 = 1.25;

/// Failure of a single best-effort repair step.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepairError {
    #[error("mesh has no faces")]
    EmptyMesh,

    #[error("filled {filled} hole(s) but {skipped} could not be filled")]
    UnfilledHoles { filled: usize, skipped: usize },

    #[error("decimation collapsed the mesh to zero faces")]
    DecimationCollapsed,

    #[error("voxel size {0} is not a positive finite number")]
    InvalidVoxelSize(f32),

    #[error("voxel grid of {cells} cells exceeds the limit of {limit}")]
    GridTooLarge { cells: usize, limit: usize },

    #[error("voxel remesh produced no surface")]
    EmptyRemesh,

    #[error("voxel remesh still has {vertices} vertices after {attempts} attempts (budget {budget})")]
    OverBudget {
        vertices: usize,
        budget: usize,
        attempts: usize,
    },
}

/// Outcome of one repair step, kept in order of execution.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RepairStepOutcome {
    pub name: String,
    pub succeeded: bool,
    pub detail: String,
}

/// Summary of what the topology repairer changed.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RepairReport {
    pub faces_in: usize,
    pub vertices_in: usize,
    pub faces_after_decimation: usize,
    pub welded_vertices: usize,
    pub degenerate_faces: usize,
    pub duplicate_faces: usize,
    pub loose_vertices: usize,
    pub holes_filled: usize,
    pub winding_flipped: usize,
    pub remeshed: bool,
    pub voxel_size_used: Option<f32>,
    pub remesh_attempts: usize,
    pub faces_out: usize,
    pub vertices_out: usize,
    pub boundary_edges: usize,
    pub non_manifold_edges: usize,
    pub manifold: bool,
    pub over_face_budget: bool,
    pub steps: Vec<RepairStepOutcome>,
}

impl RepairReport {
    fn succeeded(&mut self, step: &str, detail: String) {
        debug!(step, %detail, "repair step finished");
        self.steps.push(RepairStepOutcome {
            name: step.to_string(),
            succeeded: true,
            detail,
        });
    }

    /// Record a fallible step. Failures become an issue of the given severity
    /// and the chain continues with `None`.
    fn record<T>(
        &mut self,
        issues: &mut Vec<ValidationIssue>,
        step: &str,
        severity: Severity,
        result: Result<T, RepairError>,
        detail: impl FnOnce(&T) -> String,
    ) -> Option<T> {
        match &result {
            Ok(value) => self.succeeded(step, detail(value)),
            Err(error) => {
                issues.push(ValidationIssue::new(
                    severity,
                    format!("REPAIR_{}", step.to_ascii_uppercase()),
                    format!("{step} failed: {error}"),
                ));
                self.steps.push(RepairStepOutcome {
                    name: step.to_string(),
                    succeeded: false,
                    detail: error.to_string(),
                });
            }
        }
        result.warn_and_continue(step)
    }
}

/// Run the repair chain: decimate, weld, clean, fill holes, unify winding,
/// voxel remesh and smooth. Every step is best-effort; failures are logged,
/// reported and skipped.
pub fn repair_topology(
    mut mesh: Mesh,
    settings: &RepairSettings,
    remesh: &RemeshSettings,
    issues: &mut Vec<ValidationIssue>,
) -> (Mesh, RepairReport) {
    let mut report = RepairReport {
        faces_in: mesh.face_count(),
        vertices_in: mesh.vertex_count(),
        ..RepairReport::default()
    };
    info!(
        faces = mesh.face_count(),
        vertices = mesh.vertex_count(),
        budget = settings.face_budget,
        "repairing topology"
    );

    if mesh.face_count() > settings.face_budget {
        let result = decimate_to_budget(&mesh, settings.face_budget);
        let faces_before = mesh.face_count();
        if let Some(decimated) = report.record(issues, "decimate", Severity::Warning, result, |m| {
            format!("{faces_before} -> {} faces", m.face_count())
        }) {
            mesh = decimated;
        }
    }
    report.faces_after_decimation = mesh.face_count();

    report.welded_vertices = weld_vertices(&mut mesh, settings.weld_distance);
    report.succeeded("weld", format!("{} vertices merged", report.welded_vertices));

    report.degenerate_faces = remove_degenerate_faces(&mut mesh);
    report.duplicate_faces = remove_duplicate_faces(&mut mesh);
    report.succeeded(
        "clean_faces",
        format!(
            "{} degenerate, {} duplicate faces removed",
            report.degenerate_faces, report.duplicate_faces
        ),
    );

    report.loose_vertices = remove_loose_vertices(&mut mesh);
    report.succeeded("remove_loose", format!("{} vertices removed", report.loose_vertices));

    let holes = fill_holes(&mut mesh, settings.max_hole_edges);
    if let Err(RepairError::UnfilledHoles { filled, .. }) = &holes {
        report.holes_filled = *filled;
    }
    if let Some(filled) = report.record(issues, "fill_holes", Severity::Warning, holes, |filled| {
        format!("{filled} holes filled")
    }) {
        report.holes_filled = filled;
    }

    let winding = unify_winding(&mut mesh);
    if let Some(flipped) = report.record(issues, "unify_winding", Severity::Warning, winding, |flipped| {
        format!("{flipped} faces flipped")
    }) {
        report.winding_flipped = flipped;
    }

    if settings.remesh_enabled {
        let result = voxel_remesh(&mesh, remesh);
        if let Some(outcome) = report.record(issues, "voxel_remesh", Severity::Error, result, |outcome| {
            format!(
                "voxel size {:.4}, {} vertices, {} faces",
                outcome.voxel_size,
                outcome.mesh.vertex_count(),
                outcome.mesh.face_count()
            )
        }) {
            report.remeshed = true;
            report.voxel_size_used = Some(outcome.voxel_size);
            report.remesh_attempts = outcome.attempts;
            mesh = outcome.mesh;

            laplacian_smooth(&mut mesh, remesh.smooth_iterations, remesh.smooth_factor);
            report.succeeded(
                "smooth",
                format!("{} iterations at factor {}", remesh.smooth_iterations, remesh.smooth_factor),
            );
        }
    }

    let (boundary, non_manifold) = mesh.edge_defects();
    report.faces_out = mesh.face_count();
    report.vertices_out = mesh.vertex_count();
    report.boundary_edges = boundary;
    report.non_manifold_edges = non_manifold;
    report.manifold = mesh.is_manifold();
    report.over_face_budget = report.faces_out as f32 > settings.face_budget as f32 * FACE_BUDGET_SLACK;

    if report.over_face_budget {
        warn!(
            faces = report.faces_out,
            budget = settings.face_budget,
            "repaired mesh is well over the face budget"
        );
        issues.push(ValidationIssue::new(
            Severity::Warning,
            "REPAIR_OVER_FACE_BUDGET",
            format!(
                "{} faces after repair against a budget of {}",
                report.faces_out, settings.face_budget
            ),
        ));
    }
    if report.manifold {
        info!(
            faces = report.faces_out,
            vertices = report.vertices_out,
            "topology repaired: mesh is manifold"
        );
    } else {
        warn!(
            boundary,
            non_manifold,
            "topology repair left open or non-manifold edges"
        );
        issues.push(ValidationIssue::new(
            Severity::Warning,
            "REPAIR_NOT_MANIFOLD",
            format!("{boundary} boundary and {non_manifold} non-manifold edges remain"),
        ));
    }

    (mesh, report)
}

// ─── Welding ──────────────────────────────────────────────────────────────────

type CellKey = (i64, i64, i64);

fn cell_of(point: &Vector3<f32>, cell: f32) -> CellKey {
    (
        (point.x / cell).floor() as i64,
        (point.y / cell).floor() as i64,
        (point.z / cell).floor() as i64,
    )
}

/// Merge vertices closer than `distance`, keeping the first of each cluster.
/// Faces that collapse are dropped. Returns the number of vertices removed.
pub fn weld_vertices(mesh: &mut Mesh, distance: f32) -> usize {
    let cell = if distance.is_finite() && distance > 0.0 {
        distance
    } else {
        f32::EPSILON
    };
    let limit = distance.max(0.0).powi(2);

    let mut grid: HashMap<CellKey, Vec<u32>> = HashMap::new();
    let mut kept: Vec<Vector3<f32>> = Vec::with_capacity(mesh.positions.len());
    let mut remap = Vec::with_capacity(mesh.positions.len());

    for position in &mesh.positions {
        let (cx, cy, cz) = cell_of(position, cell);
        let mut found = None;
        'search: for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let Some(candidates) = grid.get(&(cx + dx, cy + dy, cz + dz)) else {
                        continue;
                    };
                    for &candidate in candidates {
                        if (kept[candidate as usize] - position).norm_squared() <= limit {
                            found = Some(candidate);
                            break 'search;
                        }
                    }
                }
            }
        }
        let index = match found {
            Some(index) => index,
            None => {
                let index = kept.len() as u32;
                kept.push(*position);
                grid.entry((cx, cy, cz)).or_default().push(index);
                index
            }
        };
        remap.push(index);
    }

    let removed = mesh.positions.len() - kept.len();
    mesh.positions = kept;
    mesh.faces = mesh
        .faces
        .iter()
        .map(|face| face.map(|index| remap[index as usize]))
        .filter(|face| face[0] != face[1] && face[1] != face[2] && face[0] != face[2])
        .collect();
    removed
}

// ─── Face and vertex cleanup ──────────────────────────────────────────────────

/// Drop faces with repeated corners or (near) zero area.
pub fn remove_degenerate_faces(mesh: &mut Mesh) -> usize {
    let scale = mesh.bounds().map(|bounds| bounds.diagonal()).unwrap_or(1.0).max(1e-6);
    let min_double_area = scale * scale * 1e-12;
    let before = mesh.faces.len();
    let positions = &mesh.positions;
    mesh.faces.retain(|face| {
        if face[0] == face[1] || face[1] == face[2] || face[0] == face[2] {
            return false;
        }
        let a = positions[face[0] as usize];
        let b = positions[face[1] as usize];
        let c = positions[face[2] as usize];
        (b - a).cross(&(c - a)).norm() > min_double_area
    });
    before - mesh.faces.len()
}

/// Drop faces using the same three vertices as an earlier face, regardless of winding.
pub fn remove_duplicate_faces(mesh: &mut Mesh) -> usize {
    let before = mesh.faces.len();
    let mut seen = HashSet::with_capacity(mesh.faces.len());
    mesh.faces.retain(|face| {
        let mut key = *face;
        key.sort_unstable();
        seen.insert(key)
    });
    before - mesh.faces.len()
}

/// Drop vertices no face references and compact the index space.
pub fn remove_loose_vertices(mesh: &mut Mesh) -> usize {
    let mut used = vec![false; mesh.positions.len()];
    for face in &mesh.faces {
        for &index in face {
            used[index as usize] = true;
        }
    }
    let mut remap = vec![u32::MAX; mesh.positions.len()];
    let mut positions = Vec::with_capacity(mesh.positions.len());
    for (index, position) in mesh.positions.iter().enumerate() {
        if used[index] {
            remap[index] = positions.len() as u32;
            positions.push(*position);
        }
    }
    let removed = mesh.positions.len() - positions.len();
    mesh.positions = positions;
    for face in &mut mesh.faces {
        *face = face.map(|index| remap[index as usize]);
    }
    removed
}

// ─── Hole filling ─────────────────────────────────────────────────────────────

/// Close boundary loops of at most `max_edges` edges with a fan around the
/// loop centroid. Loops running through vertices where several boundaries meet
/// are left open. Filled loops are kept even when others fail.
pub fn fill_holes(mesh: &mut Mesh, max_edges: usize) -> Result<usize, RepairError> {
    if mesh.faces.is_empty() {
        return Err(RepairError::EmptyMesh);
    }

    let edge_counts = mesh.edge_face_counts();
    // A hole edge runs opposite to its single bordering face.
    let mut hole_edges: Vec<(u32, u32)> = Vec::new();
    let mut next: HashMap<u32, Vec<u32>> = HashMap::new();
    for face in &mesh.faces {
        for corner in 0..3 {
            let a = face[corner];
            let b = face[(corner + 1) % 3];
            if edge_counts.get(&edge_key(a, b)) == Some(&1) {
                hole_edges.push((b, a));
                next.entry(b).or_default().push(a);
            }
        }
    }
    if hole_edges.is_empty() {
        return Ok(0);
    }

    let mut visited: HashSet<(u32, u32)> = HashSet::with_capacity(hole_edges.len());
    let mut loops: Vec<Vec<u32>> = Vec::new();
    let mut skipped = 0usize;

    for &(start, second) in &hole_edges {
        if visited.contains(&(start, second)) {
            continue;
        }
        let mut chain = vec![start];
        let mut ambiguous = false;
        let mut closed = false;
        let (mut from, mut to) = (start, second);
        loop {
            visited.insert((from, to));
            if to == start {
                closed = true;
                break;
            }
            if chain.len() > hole_edges.len() {
                break;
            }
            chain.push(to);
            match next.get(&to).map(Vec::as_slice) {
                Some([only]) => {
                    from = to;
                    to = *only;
                    if visited.contains(&(from, to)) && to != start {
                        break;
                    }
                }
                _ => {
                    ambiguous = true;
                    break;
                }
            }
        }
        if !closed || ambiguous || next.get(&start).map_or(0, Vec::len) != 1 {
            skipped += 1;
            continue;
        }
        if chain.len() < 3 || chain.len() > max_edges {
            skipped += 1;
            continue;
        }
        loops.push(chain);
    }

    let filled = loops.len();
    for chain in loops {
        if chain.len() == 3 {
            mesh.faces.push([chain[0], chain[1], chain[2]]);
            continue;
        }
        let centroid = chain
            .iter()
            .map(|&index| mesh.positions[index as usize])
            .sum::<Vector3<f32>>()
            / chain.len() as f32;
        let center = mesh.positions.len() as u32;
        mesh.positions.push(centroid);
        for (i, &vertex) in chain.iter().enumerate() {
            let following = chain[(i + 1) % chain.len()];
            mesh.faces.push([vertex, following, center]);
        }
    }

    debug!(filled, skipped, "hole fill finished");
    if skipped > 0 {
        Err(RepairError::UnfilledHoles { filled, skipped })
    } else {
        Ok(filled)
    }
}

// ─── Orientation ──────────────────────────────────────────────────────────────

/// Signed volume of the closed surface formed by `faces` (or the whole mesh).
/// Positive when normals point outwards.
pub fn signed_volume(mesh: &Mesh, faces: Option<&[usize]>) -> f32 {
    let volume_of = |face: &[u32; 3]| -> f64 {
        let [a, b, c] = mesh.triangle(face).map(|p| p.cast::<f64>());
        a.dot(&b.cross(&c)) / 6.0
    };
    let total: f64 = match faces {
        Some(selection) => selection.iter().map(|&index| volume_of(&mesh.faces[index])).sum(),
        None => mesh.faces.iter().map(volume_of).sum(),
    };
    total as f32
}

/// Make face orientation consistent across manifold edges, then flip each
/// connected patch whose signed volume is negative. Returns the number of
/// faces whose winding changed.
pub fn unify_winding(mesh: &mut Mesh) -> Result<usize, RepairError> {
    if mesh.faces.is_empty() {
        return Err(RepairError::EmptyMesh);
    }

    // Undirected edge → (face, traverses low→high).
    let mut edge_faces: HashMap<(u32, u32), Vec<(usize, bool)>> = HashMap::new();
    for (face_index, face) in mesh.faces.iter().enumerate() {
        for corner in 0..3 {
            let a = face[corner];
            let b = face[(corner + 1) % 3];
            edge_faces.entry(edge_key(a, b)).or_default().push((face_index, a < b));
        }
    }

    let face_count = mesh.faces.len();
    let mut flip = vec![false; face_count];
    let mut component = vec![usize::MAX; face_count];
    let mut components: Vec<Vec<usize>> = Vec::new();
    let mut queue = VecDeque::new();

    for seed in 0..face_count {
        if component[seed] != usize::MAX {
            continue;
        }
        let id = components.len();
        let mut members = vec![seed];
        component[seed] = id;
        queue.push_back(seed);
        while let Some(face_index) = queue.pop_front() {
            let face = mesh.faces[face_index];
            for corner in 0..3 {
                let key = edge_key(face[corner], face[(corner + 1) % 3]);
                let Some(sharing) = edge_faces.get(&key) else {
                    continue;
                };
                let [(first, first_forward), (second, second_forward)] = sharing.as_slice() else {
                    continue;
                };
                let (own_forward, other, other_forward) = if *first == face_index {
                    (*first_forward, *second, *second_forward)
                } else {
                    (*second_forward, *first, *first_forward)
                };
                if component[other] != usize::MAX {
                    continue;
                }
                let effective = own_forward ^ flip[face_index];
                flip[other] = other_forward == effective;
                component[other] = id;
                members.push(other);
                queue.push_back(other);
            }
        }
        components.push(members);
    }

    for (face, flipped) in mesh.faces.iter_mut().zip(&flip) {
        if *flipped {
            face.swap(1, 2);
        }
    }

    for members in &components {
        if signed_volume(mesh, Some(members)) < 0.0 {
            for &face_index in members {
                mesh.faces[face_index].swap(1, 2);
                flip[face_index] = !flip[face_index];
            }
        }
    }

    Ok(flip.iter().filter(|flipped| **flipped).count())
}
