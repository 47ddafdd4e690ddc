use std::collections::VecDeque;

use nalgebra::Vector3;
use tracing::debug;

use super::{Mesh, repair::RepairError};

/// Empty voxels kept around the mesh so the exterior flood reaches every side.
pub const PAD: usize = 2;

/// Hard limit on grid cells to keep memory bounded.
pub const MAX_CELLS: usize = 48 * 1024 * 1024;

/// Solid occupancy of a closed volume, sampled on a regular grid.
#[derive(Debug, Clone)]
pub struct VoxelGrid {
    origin: Vector3<f32>,
    voxel_size: f32,
    dims: [usize; 3],
    solid: Vec<bool>,
}

impl VoxelGrid {
    /// Voxelize `mesh`: mark every voxel a triangle touches, flood the
    /// exterior from the padded corner, and treat everything else as solid.
    /// Open or self-intersecting input still yields a closed volume.
    pub fn from_mesh(mesh: &Mesh, voxel_size: f32) -> Result<Self, RepairError> {
        if !voxel_size.is_finite() || voxel_size <= 0.0 {
            return Err(RepairError::InvalidVoxelSize(voxel_size));
        }
        if mesh.faces.is_empty() {
            return Err(RepairError::EmptyMesh);
        }
        let Some(bounds) = mesh.bounds() else {
            return Err(RepairError::EmptyMesh);
        };

        let extent = bounds.extent();
        let dims = [0, 1, 2].map(|axis| (extent[axis] / voxel_size).ceil() as usize + 1 + 2 * PAD);
        let cells = dims[0].saturating_mul(dims[1]).saturating_mul(dims[2]);
        if cells > MAX_CELLS {
            return Err(RepairError::GridTooLarge {
                cells,
                limit: MAX_CELLS,
            });
        }

        let mut grid = VoxelGrid {
            origin: bounds.min - Vector3::repeat(PAD as f32 * voxel_size),
            voxel_size,
            dims,
            solid: vec![false; cells],
        };

        let surface = grid.rasterize_surface(mesh);
        let exterior = grid.flood_exterior(&surface);
        for (cell, outside) in grid.solid.iter_mut().zip(exterior) {
            *cell = !outside;
        }
        debug!(
            dims = ?grid.dims,
            voxel_size,
            solid = grid.solid_count(),
            "voxelized mesh"
        );
        Ok(grid)
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn origin(&self) -> Vector3<f32> {
        self.origin
    }

    pub fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    pub fn solid_count(&self) -> usize {
        self.solid.iter().filter(|cell| **cell).count()
    }

    fn index(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.dims[1] + y) * self.dims[0] + x
    }

    /// Occupancy at integer coordinates; anything outside the grid is empty.
    pub fn is_solid(&self, x: i64, y: i64, z: i64) -> bool {
        if x < 0 || y < 0 || z < 0 {
            return false;
        }
        let (x, y, z) = (x as usize, y as usize, z as usize);
        if x >= self.dims[0] || y >= self.dims[1] || z >= self.dims[2] {
            return false;
        }
        self.solid[self.index(x, y, z)]
    }

    fn set_solid(&mut self, x: usize, y: usize, z: usize) {
        let index = self.index(x, y, z);
        self.solid[index] = true;
    }

    /// Integer voxel coordinates containing `point`.
    pub fn voxel_of(&self, point: &Vector3<f32>) -> (i64, i64, i64) {
        let local = (point - self.origin) / self.voxel_size;
        (
            local.x.floor() as i64,
            local.y.floor() as i64,
            local.z.floor() as i64,
        )
    }

    pub fn contains_point(&self, point: &Vector3<f32>) -> bool {
        let (x, y, z) = self.voxel_of(point);
        self.is_solid(x, y, z)
    }

    /// World-space position of the voxel lattice corner `(x, y, z)`.
    pub fn corner_position(&self, x: usize, y: usize, z: usize) -> Vector3<f32> {
        self.origin + Vector3::new(x as f32, y as f32, z as f32) * self.voxel_size
    }

    fn rasterize_surface(&self, mesh: &Mesh) -> Vec<bool> {
        let mut surface = vec![false; self.solid.len()];
        // Slightly enlarged half extent keeps the overlap test conservative.
        let half = 0.5 * self.voxel_size * (1.0 + 1e-3);
        let clamp = |value: i64, axis: usize| value.clamp(0, self.dims[axis] as i64 - 1) as usize;

        for face in &mesh.faces {
            let triangle = mesh.triangle(face);
            let low = triangle[0].inf(&triangle[1]).inf(&triangle[2]);
            let high = triangle[0].sup(&triangle[1]).sup(&triangle[2]);
            let (lx, ly, lz) = self.voxel_of(&low);
            let (hx, hy, hz) = self.voxel_of(&high);
            for z in clamp(lz, 2)..=clamp(hz, 2) {
                for y in clamp(ly, 1)..=clamp(hy, 1) {
                    for x in clamp(lx, 0)..=clamp(hx, 0) {
                        let index = self.index(x, y, z);
                        if surface[index] {
                            continue;
                        }
                        let center = self.corner_position(x, y, z) + Vector3::repeat(0.5 * self.voxel_size);
                        if triangle_overlaps_box(&center, half, &triangle) {
                            surface[index] = true;
                        }
                    }
                }
            }
        }
        surface
    }

    fn flood_exterior(&self, surface: &[bool]) -> Vec<bool> {
        let mut exterior = vec![false; self.solid.len()];
        let mut queue = VecDeque::new();
        exterior[0] = true;
        queue.push_back((0usize, 0usize, 0usize));
        while let Some((x, y, z)) = queue.pop_front() {
            let neighbors = [
                (x.wrapping_sub(1), y, z),
                (x + 1, y, z),
                (x, y.wrapping_sub(1), z),
                (x, y + 1, z),
                (x, y, z.wrapping_sub(1)),
                (x, y, z + 1),
            ];
            for (nx, ny, nz) in neighbors {
                if nx >= self.dims[0] || ny >= self.dims[1] || nz >= self.dims[2] {
                    continue;
                }
                let index = self.index(nx, ny, nz);
                if exterior[index] || surface[index] {
                    continue;
                }
                exterior[index] = true;
                queue.push_back((nx, ny, nz));
            }
        }
        exterior
    }

    /// Fill voxels until no edge-only or vertex-only contacts remain, so the
    /// boundary surface is a 2-manifold. Returns the number of voxels added.
    pub fn make_well_composed(&mut self) -> usize {
        let mut added = 0;
        loop {
            let mut changed = 0;
            for z in 0..self.dims[2].saturating_sub(1) {
                for y in 0..self.dims[1].saturating_sub(1) {
                    for x in 0..self.dims[0].saturating_sub(1) {
                        if let Some(corner) = self.critical_corner(x, y, z) {
                            let (dx, dy, dz) = corner_offset(corner);
                            self.set_solid(x + dx, y + dy, z + dz);
                            changed += 1;
                        }
                    }
                }
            }
            added += changed;
            if changed == 0 {
                break;
            }
        }
        if added > 0 {
            debug!(added, "filled critical voxel configurations");
        }
        added
    }

    /// Corner of the 2×2×2 block at `(x, y, z)` to fill, if the block holds
    /// an edge-critical or vertex-critical configuration.
    fn critical_corner(&self, x: usize, y: usize, z: usize) -> Option<usize> {
        let occupied: [bool; 8] = std::array::from_fn(|corner| {
            let (dx, dy, dz) = corner_offset(corner);
            self.solid[self.index(x + dx, y + dy, z + dz)]
        });

        // Edge-critical: a 2×2 face with one diagonal solid and the other empty.
        for axis in 0..3 {
            let others: Vec<usize> = (0..3).filter(|other| *other != axis).collect();
            for side in 0..2 {
                let corner = |u: usize, v: usize| (side << axis) | (u << others[0]) | (v << others[1]);
                let (c00, c10, c01, c11) = (corner(0, 0), corner(1, 0), corner(0, 1), corner(1, 1));
                if occupied[c00] == occupied[c11]
                    && occupied[c10] == occupied[c01]
                    && occupied[c00] != occupied[c10]
                {
                    return Some(if occupied[c00] { c10 } else { c00 });
                }
            }
        }

        // Vertex-critical: two antipodal corners, or its complement.
        let count = occupied.iter().filter(|cell| **cell).count();
        match count {
            2 => (0..4)
                .find(|corner| occupied[*corner] && occupied[7 - corner])
                .map(|corner| corner ^ 1),
            6 => (0..4).find(|corner| !occupied[*corner] && !occupied[7 - corner]),
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_occupancy(voxel_size: f32, dims: [usize; 3], solid: &[(usize, usize, usize)]) -> Self {
        let mut grid = VoxelGrid {
            origin: Vector3::zeros(),
            voxel_size,
            dims,
            solid: vec![false; dims[0] * dims[1] * dims[2]],
        };
        for &(x, y, z) in solid {
            grid.set_solid(x, y, z);
        }
        grid
    }

    #[cfg(test)]
    fn has_critical_configuration(&self) -> bool {
        (0..self.dims[2] - 1).any(|z| {
            (0..self.dims[1] - 1)
                .any(|y| (0..self.dims[0] - 1).any(|x| self.critical_corner(x, y, z).is_some()))
        })
    }
}

fn corner_offset(corner: usize) -> (usize, usize, usize) {
    (corner & 1, (corner >> 1) & 1, (corner >> 2) & 1)
}

/// Separating-axis test between a triangle and an axis-aligned cube.
fn triangle_overlaps_box(center: &Vector3<f32>, half: f32, triangle: &[Vector3<f32>; 3]) -> bool {
    let v = triangle.map(|point| point - center);
    let edges = [v[1] - v[0], v[2] - v[1], v[0] - v[2]];
    let separated = |axis: Vector3<f32>| {
        if axis.norm_squared() < 1e-20 {
            return false;
        }
        let projected = [v[0].dot(&axis), v[1].dot(&axis), v[2].dot(&axis)];
        let min = projected[0].min(projected[1]).min(projected[2]);
        let max = projected[0].max(projected[1]).max(projected[2]);
        let radius = half * (axis.x.abs() + axis.y.abs() + axis.z.abs());
        min > radius || max < -radius
    };

    let units = [Vector3::x(), Vector3::y(), Vector3::z()];
    for edge in &edges {
        for unit in &units {
            if separated(edge.cross(unit)) {
                return false;
            }
        }
    }
    for unit in units {
        if separated(unit) {
            return false;
        }
    }
    !separated(edges[0].cross(&edges[1]))
}
