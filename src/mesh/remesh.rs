use std::collections::HashMap;

use nalgebra::Vector3;
use tracing::{debug, info};

use super::{Mesh, repair::RepairError, voxel::VoxelGrid};
use crate::settings::RemeshSettings;

/// Growth factor applied to the voxel size when a remesh exceeds the vertex budget.
pub const COARSEN_FACTOR: f32 = 1.25;

/// Remesh attempts before giving up on the vertex budget.
pub const MAX_REMESH_ATTEMPTS: usize = 8;

/// Neighbour offset and quad corner offsets for each of the six voxel faces,
/// wound so the quad normal points away from the solid voxel.
const FACE_QUADS: [([i64; 3], [[usize; 3]; 4]); 6] = [
    ([1, 0, 0], [[1, 0, 0], [1, 1, 0], [1, 1, 1], [1, 0, 1]]),
    ([-1, 0, 0], [[0, 0, 0], [0, 0, 1], [0, 1, 1], [0, 1, 0]]),
    ([0, 1, 0], [[0, 1, 0], [0, 1, 1], [1, 1, 1], [1, 1, 0]]),
    ([0, -1, 0], [[0, 0, 0], [1, 0, 0], [1, 0, 1], [0, 0, 1]]),
    ([0, 0, 1], [[0, 0, 1], [1, 0, 1], [1, 1, 1], [0, 1, 1]]),
    ([0, 0, -1], [[0, 0, 0], [0, 1, 0], [1, 1, 0], [1, 0, 0]]),
];

/// A successful voxel remesh.
#[derive(Debug, Clone)]
pub struct RemeshOutcome {
    pub mesh: Mesh,
    pub voxel_size: f32,
    pub attempts: usize,
}

/// Rebuild `mesh` as the closed boundary of its voxelized volume.
///
/// The voxel size is clamped so the longest axis spans between
/// `min_resolution` and `max_resolution` voxels, then grown until the
/// surface fits the vertex budget.
pub fn voxel_remesh(mesh: &Mesh, settings: &RemeshSettings) -> Result<RemeshOutcome, RepairError> {
    if mesh.faces.is_empty() {
        return Err(RepairError::EmptyMesh);
    }
    let Some(bounds) = mesh.bounds() else {
        return Err(RepairError::EmptyMesh);
    };

    let mut voxel_size = clamp_voxel_size(settings, bounds.longest_extent());
    let mut vertices = 0;
    for attempt in 1..=MAX_REMESH_ATTEMPTS {
        let mut grid = match VoxelGrid::from_mesh(mesh, voxel_size) {
            Ok(grid) => grid,
            Err(RepairError::GridTooLarge { cells, limit }) if attempt < MAX_REMESH_ATTEMPTS => {
                debug!(cells, limit, voxel_size, "voxel grid too large; coarsening");
                voxel_size *= COARSEN_FACTOR;
                continue;
            }
            Err(error) => return Err(error),
        };
        grid.make_well_composed();

        let surface = extract_surface(&grid, &mesh.name);
        if surface.is_empty() {
            return Err(RepairError::EmptyRemesh);
        }
        vertices = surface.vertex_count();
        if vertices <= settings.vertex_budget {
            info!(
                voxel_size,
                vertices,
                faces = surface.face_count(),
                attempt,
                "voxel remesh complete"
            );
            return Ok(RemeshOutcome {
                mesh: surface,
                voxel_size,
                attempts: attempt,
            });
        }
        debug!(
            vertices,
            budget = settings.vertex_budget,
            voxel_size,
            "remesh over vertex budget; coarsening"
        );
        voxel_size *= COARSEN_FACTOR;
    }

    Err(RepairError::OverBudget {
        vertices,
        budget: settings.vertex_budget,
        attempts: MAX_REMESH_ATTEMPTS,
    })
}

fn clamp_voxel_size(settings: &RemeshSettings, longest_extent: f32) -> f32 {
    if !longest_extent.is_finite() || longest_extent <= 0.0 {
        return settings.voxel_size;
    }
    let coarsest = longest_extent / settings.min_resolution.max(1) as f32;
    let finest = longest_extent / settings.max_resolution.max(1) as f32;
    let (low, high) = (finest.min(coarsest), finest.max(coarsest));
    settings.voxel_size.clamp(low, high)
}

/// Emit one quad, split into two triangles, for every face between a solid
/// voxel and an empty one. Lattice corners are shared, so a well-composed
/// grid yields a closed 2-manifold.
pub fn extract_surface(grid: &VoxelGrid, name: &str) -> Mesh {
    let [nx, ny, nz] = grid.dims();
    let corner_key = |x: usize, y: usize, z: usize| (z * (ny + 1) + y) * (nx + 1) + x;

    let mut mesh = Mesh::new(name);
    let mut corners: HashMap<usize, u32> = HashMap::new();
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let (xi, yi, zi) = (x as i64, y as i64, z as i64);
                if !grid.is_solid(xi, yi, zi) {
                    continue;
                }
                for (step, quad) in &FACE_QUADS {
                    if grid.is_solid(xi + step[0], yi + step[1], zi + step[2]) {
                        continue;
                    }
                    let [a, b, c, d] = quad.map(|offset| {
                        let (cx, cy, cz) = (x + offset[0], y + offset[1], z + offset[2]);
                        *corners.entry(corner_key(cx, cy, cz)).or_insert_with(|| {
                            mesh.positions.push(grid.corner_position(cx, cy, cz));
                            (mesh.positions.len() - 1) as u32
                        })
                    });
                    mesh.faces.push([a, b, c]);
                    mesh.faces.push([a, c, d]);
                }
            }
        }
    }
    mesh
}

/// Damped Laplacian smoothing: each pass moves every vertex `factor` of the
/// way towards the mean of its neighbours. Topology is untouched.
pub fn laplacian_smooth(mesh: &mut Mesh, iterations: usize, factor: f32) {
    if iterations == 0 || factor == 0.0 {
        return;
    }
    let neighbors = mesh.vertex_neighbors();
    for _ in 0..iterations {
        let smoothed: Vec<Vector3<f32>> = mesh
            .positions
            .iter()
            .zip(&neighbors)
            .map(|(position, ring)| {
                if ring.is_empty() {
                    return *position;
                }
                let mean = ring
                    .iter()
                    .map(|&index| mesh.positions[index as usize])
                    .sum::<Vector3<f32>>()
                    / ring.len() as f32;
                position + (mean - position) * factor
            })
            .collect();
        mesh.positions = smoothed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::repair::signed_volume;
    use crate::test_support::{closed_box, humanoid_soup};

    #[test]
    fn given_single_voxel_when_extracting_surface_then_cube_is_closed() {
        let grid = VoxelGrid::from_occupancy(2.0, [3, 3, 3], &[(1, 1, 1)]);

        let cube = extract_surface(&grid, "cube");

        assert_eq!(cube.vertex_count(), 8);
        assert_eq!(cube.face_count(), 12);
        assert!(cube.is_manifold());
        assert!((signed_volume(&cube, None) - 8.0).abs() < 1e-4);
    }

    #[test]
    fn given_closed_box_when_remeshed_then_surface_is_manifold_with_matching_volume() {
        let mesh = closed_box(Vector3::zeros(), Vector3::new(20.0, 10.0, 10.0), 3);
        let settings = RemeshSettings {
            voxel_size: 1.0,
            ..RemeshSettings::default()
        };

        let outcome = voxel_remesh(&mesh, &settings).expect("remesh");

        assert!(outcome.mesh.is_manifold());
        let volume = signed_volume(&outcome.mesh, None);
        assert!(volume >= 2000.0, "volume {volume}");
        assert!(volume < 2000.0 * 1.6, "volume {volume}");
        assert_eq!(outcome.attempts, 1);
    }

    #[test]
    fn given_small_vertex_budget_when_remeshed_then_voxel_size_is_coarsened() {
        let mesh = closed_box(Vector3::zeros(), Vector3::repeat(10.0), 2);
        let settings = RemeshSettings {
            voxel_size: 0.1,
            min_resolution: 4,
            max_resolution: 64,
            vertex_budget: 6_000,
            ..RemeshSettings::default()
        };

        let outcome = voxel_remesh(&mesh, &settings).expect("remesh");

        assert!(outcome.attempts > 1);
        assert!(outcome.voxel_size > 10.0 / 64.0);
        assert!(outcome.mesh.vertex_count() <= 6_000);
        assert!(outcome.mesh.is_manifold());
    }

    #[test]
    fn given_voxel_size_outside_resolution_limits_when_clamping_then_limits_apply() {
        let settings = RemeshSettings::default();

        assert_eq!(clamp_voxel_size(&settings, 170.0), 1.2);
        assert_eq!(clamp_voxel_size(&settings, 20.0), 20.0 / 48.0);
        assert_eq!(clamp_voxel_size(&settings, 1000.0), 1000.0 / 192.0);
    }

    #[test]
    fn given_humanoid_soup_when_remeshed_then_limbs_survive_as_manifold_surface() {
        let mesh = humanoid_soup(4);

        let outcome = voxel_remesh(&mesh, &RemeshSettings::default()).expect("remesh");

        assert!(outcome.mesh.is_manifold());
        let bounds = outcome.mesh.bounds().expect("bounds");
        assert!(bounds.max.z > 165.0);
        assert!(bounds.max.x > 45.0);
    }

    #[test]
    fn given_remeshed_box_when_smoothed_then_vertices_move_but_topology_is_kept() {
        let grid = VoxelGrid::from_occupancy(1.0, [5, 5, 5], &[(1, 1, 1), (2, 1, 1), (1, 2, 1), (2, 2, 1)]);
        let mut mesh = extract_surface(&grid, "slab");
        let faces = mesh.faces.clone();
        let before = signed_volume(&mesh, None);

        laplacian_smooth(&mut mesh, 5, 0.5);

        assert_eq!(mesh.faces, faces);
        assert!(signed_volume(&mesh, None) < before);
        assert!(mesh.positions.iter().all(|p| p.iter().all(|v| v.is_finite())));
    }

    #[test]
    fn given_empty_mesh_when_remeshed_then_error_is_returned() {
        let error = voxel_remesh(&Mesh::new("empty"), &RemeshSettings::default()).expect_err("empty");

        assert_eq!(error, RepairError::EmptyMesh);
    }
}
