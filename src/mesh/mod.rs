//! Triangle mesh container, topology queries, and the repair stages that turn
//! untrusted geometry into a closed manifold surface.

pub mod decimate;
pub mod gltf_utils;
pub mod import;
pub mod obj;
pub mod ply;
pub mod remesh;
pub mod repair;
pub mod voxel;

use std::collections::{HashMap, VecDeque};

use nalgebra::{Matrix4, Point3, Vector3};
use serde::{Deserialize, Serialize};

pub use import::{ImportSummary, MeshFormat, import_mesh};
pub use repair::{RepairReport, repair_topology};

// ─── Bounding box ─────────────────────────────────────────────────────────────

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

impl Aabb {
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vector3<f32>>) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        let mut bounds = Aabb {
            min: *first,
            max: *first,
        };
        for point in points {
            bounds.include(point);
        }
        Some(bounds)
    }

    pub fn include(&mut self, point: &Vector3<f32>) {
        self.min = self.min.inf(point);
        self.max = self.max.sup(point);
    }

    pub fn extent(&self) -> Vector3<f32> {
        self.max - self.min
    }

    pub fn center(&self) -> Vector3<f32> {
        (self.min + self.max) * 0.5
    }

    pub fn diagonal(&self) -> f32 {
        self.extent().norm()
    }

    pub fn longest_extent(&self) -> f32 {
        self.extent().max()
    }

    /// Grow every side by `margin`.
    pub fn inflated(&self, margin: f32) -> Self {
        let pad = Vector3::repeat(margin);
        Aabb {
            min: self.min - pad,
            max: self.max + pad,
        }
    }

    pub fn contains(&self, point: &Vector3<f32>) -> bool {
        (0..3).all(|axis| point[axis] >= self.min[axis] && point[axis] <= self.max[axis])
    }
}

// ─── Mesh ─────────────────────────────────────────────────────────────────────

/// Indexed triangle mesh in the Z-up working frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub name: String,
    pub positions: Vec<Vector3<f32>>,
    pub faces: Vec<[u32; 3]>,
}

impl Mesh {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_points(&self.positions)
    }

    pub fn triangle(&self, face: &[u32; 3]) -> [Vector3<f32>; 3] {
        [
            self.positions[face[0] as usize],
            self.positions[face[1] as usize],
            self.positions[face[2] as usize],
        ]
    }

    /// Unnormalized face normal; its length is twice the triangle area.
    pub fn face_normal(&self, face: &[u32; 3]) -> Vector3<f32> {
        let [a, b, c] = self.triangle(face);
        (b - a).cross(&(c - a))
    }

    pub fn surface_area(&self) -> f32 {
        self.faces
            .iter()
            .map(|face| self.face_normal(face).norm() * 0.5)
            .sum()
    }

    /// Area-weighted vertex normals. Isolated vertices get +Z.
    pub fn vertex_normals(&self) -> Vec<Vector3<f32>> {
        let mut normals = vec![Vector3::zeros(); self.positions.len()];
        for face in &self.faces {
            let normal = self.face_normal(face);
            for &index in face {
                normals[index as usize] += normal;
            }
        }
        normals
            .into_iter()
            .map(|normal| normal.try_normalize(1e-12).unwrap_or_else(Vector3::z))
            .collect()
    }

    /// Sorted, deduplicated one-ring neighbours for every vertex.
    pub fn vertex_neighbors(&self) -> Vec<Vec<u32>> {
        let mut neighbors = vec![Vec::<u32>::new(); self.positions.len()];
        for face in &self.faces {
            for corner in 0..3 {
                let a = face[corner];
                let b = face[(corner + 1) % 3];
                neighbors[a as usize].push(b);
                neighbors[b as usize].push(a);
            }
        }
        for list in &mut neighbors {
            list.sort_unstable();
            list.dedup();
        }
        neighbors
    }

    /// Number of faces bordering each undirected edge.
    pub fn edge_face_counts(&self) -> HashMap<(u32, u32), u32> {
        let mut counts = HashMap::with_capacity(self.faces.len() * 3 / 2);
        for face in &self.faces {
            for corner in 0..3 {
                let key = edge_key(face[corner], face[(corner + 1) % 3]);
                *counts.entry(key).or_insert(0) += 1;
            }
        }
        counts
    }

    /// True when the mesh has faces and every edge borders exactly two of them.
    pub fn is_manifold(&self) -> bool {
        !self.faces.is_empty() && self.edge_face_counts().values().all(|count| *count == 2)
    }

    /// Count of edges bordering one face (open) and more than two (non-manifold).
    pub fn edge_defects(&self) -> (usize, usize) {
        let counts = self.edge_face_counts();
        let boundary = counts.values().filter(|count| **count == 1).count();
        let non_manifold = counts.values().filter(|count| **count > 2).count();
        (boundary, non_manifold)
    }

    /// Connected component id per vertex, following face edges.
    pub fn vertex_components(&self) -> (Vec<usize>, usize) {
        let neighbors = self.vertex_neighbors();
        let mut component = vec![usize::MAX; self.positions.len()];
        let mut count = 0;
        let mut queue = VecDeque::new();
        for start in 0..self.positions.len() {
            if component[start] != usize::MAX {
                continue;
            }
            component[start] = count;
            queue.push_back(start);
            while let Some(vertex) = queue.pop_front() {
                for &next in &neighbors[vertex] {
                    let next = next as usize;
                    if component[next] == usize::MAX {
                        component[next] = count;
                        queue.push_back(next);
                    }
                }
            }
            count += 1;
        }
        (component, count)
    }

    /// Append another mesh, offsetting its indices.
    pub fn append(&mut self, other: &Mesh) {
        let base = self.positions.len() as u32;
        self.positions.extend_from_slice(&other.positions);
        self.faces.extend(
            other
                .faces
                .iter()
                .map(|face| [face[0] + base, face[1] + base, face[2] + base]),
        );
    }

    /// Bake an affine transform into the positions, flipping winding when
    /// the transform mirrors.
    pub fn transform(&mut self, matrix: &Matrix4<f32>) {
        for position in &mut self.positions {
            *position = matrix.transform_point(&Point3::from(*position)).coords;
        }
        if matrix.fixed_view::<3, 3>(0, 0).clone_owned().determinant() < 0.0 {
            for face in &mut self.faces {
                face.swap(1, 2);
            }
        }
    }
}

pub(crate) fn edge_key(a: u32, b: u32) -> (u32, u32) {
    if a < b { (a, b) } else { (b, a) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{closed_box, tetrahedron};

    #[test]
    fn given_closed_box_when_checking_topology_then_mesh_is_manifold() {
        let mesh = closed_box(Vector3::zeros(), Vector3::new(2.0, 1.0, 3.0), 2);

        assert!(mesh.is_manifold());
        assert_eq!(mesh.edge_defects(), (0, 0));
        let (_, components) = mesh.vertex_components();
        assert_eq!(components, 1);
    }

    #[test]
    fn given_open_triangle_when_checking_topology_then_boundary_edges_are_reported() {
        let mut mesh = Mesh::new("tri");
        mesh.positions = vec![Vector3::zeros(), Vector3::x(), Vector3::y()];
        mesh.faces = vec![[0, 1, 2]];

        assert!(!mesh.is_manifold());
        assert_eq!(mesh.edge_defects(), (3, 0));
    }

    #[test]
    fn given_mirror_transform_when_applied_then_winding_is_flipped() {
        let mut mesh = tetrahedron();
        let volume_before = crate::mesh::repair::signed_volume(&mesh, None);
        mesh.transform(&Matrix4::new_nonuniform_scaling(&Vector3::new(-1.0, 1.0, 1.0)));
        let volume_after = crate::mesh::repair::signed_volume(&mesh, None);

        assert!(volume_before > 0.0);
        assert!(volume_after > 0.0);
    }

    #[test]
    fn given_points_when_building_bounds_then_extent_and_center_match() {
        let points = [Vector3::new(-1.0, 0.0, 0.0), Vector3::new(1.0, 2.0, 4.0)];
        let bounds = Aabb::from_points(&points).expect("bounds");

        assert_eq!(bounds.extent(), Vector3::new(2.0, 2.0, 4.0));
        assert_eq!(bounds.center(), Vector3::new(0.0, 1.0, 2.0));
        assert_eq!(bounds.longest_extent(), 4.0);
        assert!(bounds.contains(&Vector3::new(0.0, 1.0, 1.0)));
    }
}
