//! Heat-diffusion skin weights.
//!
//! Each vertex that can "see" its nearest bone through the solid volume of
//! the mesh becomes a heat source for that bone. Weights for one bone are the
//! equilibrium of `(L + H) w = H p` over the mesh edge graph, where `L` is the
//! uniform graph Laplacian, `H` the diagonal source strengths and `p` marks
//! the vertices whose nearest visible bone is this one.

use nalgebra::Vector3;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, trace};

use super::{
    capsule::nearest_bone,
    skeleton::{Skeleton, closest_point_on_segment},
    weights::{Influence, VertexWeightSet, keep_strongest, normalize_influences},
};
use crate::{
    mesh::{Mesh, repair::RepairError, voxel::VoxelGrid},
    settings::HeatSettings,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HeatError {
    #[error("mesh has no edges to diffuse along")]
    NoEdges,

    #[error("skeleton has no bones")]
    NoBones,

    #[error("no vertex can see a bone from inside the mesh")]
    NoVisibleBone,

    #[error("diffusion diverged for bone {bone}")]
    Diverged { bone: usize },

    #[error("visibility grid: {0}")]
    Visibility(#[from] RepairError),
}

/// A vertex's heat source: the bone it sees and the source strength.
#[derive(Debug, Clone, Copy, PartialEq)]
struct HeatSource {
    bone: usize,
    strength: f32,
}

/// Diffuse bone heat over the mesh surface and keep the strongest
/// `max_influences` per vertex. Vertices on components without a visible
/// bone stay empty.
pub fn solve_heat_weights(
    mesh: &Mesh,
    skeleton: &Skeleton,
    settings: &HeatSettings,
    max_influences: usize,
) -> Result<VertexWeightSet, HeatError> {
    if skeleton.is_empty() {
        return Err(HeatError::NoBones);
    }
    let neighbors = mesh.vertex_neighbors();
    let mean_edge = mean_edge_length(mesh, &neighbors).ok_or(HeatError::NoEdges)?;

    let longest = mesh.bounds().map(|bounds| bounds.longest_extent()).unwrap_or(0.0);
    let voxel_size = longest / settings.visibility_resolution.max(1) as f32;
    let grid = VoxelGrid::from_mesh(mesh, voxel_size)?;

    let sources: Vec<Option<HeatSource>> = mesh
        .positions
        .par_iter()
        .map(|point| visible_source(point, skeleton, &grid, mean_edge, settings.heat_scale))
        .collect();
    let source_count = sources.iter().flatten().count();
    if source_count == 0 {
        return Err(HeatError::NoVisibleBone);
    }
    debug!(
        sources = source_count,
        vertices = mesh.vertex_count(),
        mean_edge,
        "heat sources placed"
    );

    let columns = (0..skeleton.len())
        .into_par_iter()
        .map(|bone| diffuse_bone(bone, &neighbors, &sources, settings))
        .collect::<Result<Vec<Vec<f32>>, HeatError>>()?;

    let influences = (0..mesh.vertex_count())
        .map(|vertex| {
            let mut influences: Vec<Influence> = columns
                .iter()
                .enumerate()
                .filter(|(_, column)| column[vertex] > settings.min_influence)
                .map(|(bone, column)| Influence::new(bone, column[vertex]))
                .collect();
            keep_strongest(&mut influences, max_influences);
            normalize_influences(&mut influences);
            influences
        })
        .collect();
    Ok(VertexWeightSet::from_influences(influences))
}

fn mean_edge_length(mesh: &Mesh, neighbors: &[Vec<u32>]) -> Option<f32> {
    let mut total = 0.0f64;
    let mut count = 0usize;
    for (vertex, ring) in neighbors.iter().enumerate() {
        for &other in ring.iter().filter(|other| **other as usize > vertex) {
            total += (mesh.positions[other as usize] - mesh.positions[vertex]).norm() as f64;
            count += 1;
        }
    }
    (count > 0 && total > 0.0).then(|| (total / count as f64) as f32)
}

fn visible_source(
    point: &Vector3<f32>,
    skeleton: &Skeleton,
    grid: &VoxelGrid,
    mean_edge: f32,
    heat_scale: f32,
) -> Option<HeatSource> {
    let bone = nearest_bone(point, skeleton)?;
    let segment = skeleton.bone(bone)?;
    let (target, _) = closest_point_on_segment(point, &segment.head, &segment.tail);
    if !segment_inside(point, &target, grid) {
        return None;
    }
    let distance = (target - point).norm().max(mean_edge * 0.25);
    let ratio = mean_edge / distance;
    Some(HeatSource {
        bone,
        strength: heat_scale * ratio * ratio,
    })
}

/// True when every sample along `from`→`to`, spaced half a voxel apart,
/// falls in a solid voxel.
fn segment_inside(from: &Vector3<f32>, to: &Vector3<f32>, grid: &VoxelGrid) -> bool {
    let length = (to - from).norm();
    let steps = (length / (grid.voxel_size() * 0.5)).ceil().max(1.0) as usize;
    (0..=steps).all(|step| {
        let t = step as f32 / steps as f32;
        grid.contains_point(&from.lerp(to, t))
    })
}

/// Gauss–Seidel sweeps of `(deg + H) w_v = Σ w_u + H p_v` for one bone.
fn diffuse_bone(
    bone: usize,
    neighbors: &[Vec<u32>],
    sources: &[Option<HeatSource>],
    settings: &HeatSettings,
) -> Result<Vec<f32>, HeatError> {
    let mut weights: Vec<f32> = sources
        .iter()
        .map(|source| match source {
            Some(source) if source.bone == bone => 1.0,
            _ => 0.0,
        })
        .collect();

    for iteration in 0..settings.max_iterations {
        let mut max_change = 0.0f32;
        for vertex in 0..weights.len() {
            let (strength, target) = match sources[vertex] {
                Some(source) => (source.strength, if source.bone == bone { source.strength } else { 0.0 }),
                None => (0.0, 0.0),
            };
            let ring = &neighbors[vertex];
            let diagonal = ring.len() as f32 + strength;
            if diagonal <= 0.0 {
                continue;
            }
            let sum: f32 = ring.iter().map(|other| weights[*other as usize]).sum();
            let updated = (sum + target) / diagonal;
            if !updated.is_finite() {
                return Err(HeatError::Diverged { bone });
            }
            max_change = max_change.max((updated - weights[vertex]).abs());
            weights[vertex] = updated;
        }
        trace!(bone, iteration, max_change, "heat diffusion step");
        if max_change < settings.tolerance {
            debug!(bone, iterations = iteration + 1, "heat diffusion converged");
            break;
        }
    }
    Ok(weights)
}
