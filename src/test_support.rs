//! Synthetic meshes for tests.

use nalgebra::{Matrix4, Vector3};

use crate::mesh::{Mesh, repair::weld_vertices};

/// Axis-aligned box with each side split into an `n`×`n` grid of quads.
/// Sides do not share vertices, so the seams are open until welded.
pub fn box_soup(min: Vector3<f32>, max: Vector3<f32>, n: usize) -> Mesh {
    let n = n.max(1);
    let mut mesh = Mesh::new("box");
    // (fixed axis, side, u axis, v axis) with u × v pointing outwards.
    let sides: [(usize, bool, usize, usize); 6] = [
        (0, true, 1, 2),
        (0, false, 2, 1),
        (1, true, 2, 0),
        (1, false, 0, 2),
        (2, true, 0, 1),
        (2, false, 1, 0),
    ];
    for (axis, positive, u_axis, v_axis) in sides {
        let base = mesh.positions.len() as u32;
        for j in 0..=n {
            for i in 0..=n {
                let mut point = Vector3::zeros();
                point[axis] = if positive { max[axis] } else { min[axis] };
                point[u_axis] = min[u_axis] + (max[u_axis] - min[u_axis]) * i as f32 / n as f32;
                point[v_axis] = min[v_axis] + (max[v_axis] - min[v_axis]) * j as f32 / n as f32;
                mesh.positions.push(point);
            }
        }
        let row = (n + 1) as u32;
        for j in 0..n as u32 {
            for i in 0..n as u32 {
                let a = base + j * row + i;
                let b = a + 1;
                let c = a + row + 1;
                let d = a + row;
                mesh.faces.push([a, b, c]);
                mesh.faces.push([a, c, d]);
            }
        }
    }
    mesh
}

/// Closed, welded box.
pub fn closed_box(min: Vector3<f32>, max: Vector3<f32>, n: usize) -> Mesh {
    let mut mesh = box_soup(min, max, n);
    weld_vertices(&mut mesh, 1e-5);
    mesh
}

/// Box soup stretched along the segment `a`→`b` with a square cross-section.
pub fn limb_soup(a: Vector3<f32>, b: Vector3<f32>, half_width: f32, n: usize) -> Mesh {
    let axis = b - a;
    let length = axis.norm();
    let dir = axis / length;
    let helper = if dir.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
    let side = dir.cross(&helper).normalize();
    let up = dir.cross(&side);
    let mut mesh = box_soup(
        Vector3::new(-half_width, -half_width, 0.0),
        Vector3::new(half_width, half_width, length),
        n,
    );
    #[rustfmt::skip]
    let basis = Matrix4::new(
        side.x, up.x, dir.x, a.x,
        side.y, up.y, dir.y, a.y,
        side.z, up.z, dir.z, a.z,
        0.0, 0.0, 0.0, 1.0,
    );
    mesh.transform(&basis);
    mesh
}

/// Overlapping box-assembly humanoid, 170 units tall, centered on X=0 and
/// Y=0 and standing on Z=0. Parts intersect and seams stay open, so the
/// result is a non-manifold soup.
pub fn humanoid_soup(n: usize) -> Mesh {
    let mut mesh = Mesh::new("humanoid");
    let parts = [
        box_soup(Vector3::new(-16.0, -10.0, 80.0), Vector3::new(16.0, 10.0, 132.0), n),
        box_soup(Vector3::new(-10.0, -10.0, 130.0), Vector3::new(10.0, 10.0, 170.0), n),
        box_soup(Vector3::new(3.0, -7.0, 44.0), Vector3::new(17.0, 7.0, 86.0), n),
        box_soup(Vector3::new(-17.0, -7.0, 44.0), Vector3::new(-3.0, 7.0, 86.0), n),
        box_soup(Vector3::new(4.0, -6.0, 0.0), Vector3::new(16.0, 6.0, 46.0), n),
        box_soup(Vector3::new(-16.0, -6.0, 0.0), Vector3::new(-4.0, 6.0, 46.0), n),
        limb_soup(Vector3::new(14.0, 0.0, 128.0), Vector3::new(35.0, 0.0, 98.0), 5.0, n),
        limb_soup(Vector3::new(-14.0, 0.0, 128.0), Vector3::new(-35.0, 0.0, 98.0), 5.0, n),
        limb_soup(Vector3::new(35.0, 0.0, 98.0), Vector3::new(50.0, 0.0, 64.0), 4.5, n),
        limb_soup(Vector3::new(-35.0, 0.0, 98.0), Vector3::new(-50.0, 0.0, 64.0), 4.5, n),
    ];
    for part in &parts {
        mesh.append(part);
    }
    mesh
}

/// Positively oriented tetrahedron.
pub fn tetrahedron() -> Mesh {
    let mut mesh = Mesh::new("tetra");
    mesh.positions = vec![
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(1.0, 0.0, 0.0),
        Vector3::new(0.0, 1.0, 0.0),
        Vector3::new(0.0, 0.0, 1.0),
    ];
    mesh.faces = vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]];
    mesh
}
