use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::mesh::{Aabb, Mesh};

/// Overall body measurements in the Z-up working frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BodyProportions {
    pub bounds: Aabb,
    pub height: f32,
    pub width: f32,
    pub depth: f32,
    pub center_x: f32,
    pub center_y: f32,
    pub base_z: f32,
}

impl BodyProportions {
    /// Point on the vertical axis at `fraction` of the body height.
    pub fn axis_point(&self, fraction: f32) -> Vector3<f32> {
        Vector3::new(self.center_x, self.center_y, self.height_at(fraction))
    }

    pub fn height_at(&self, fraction: f32) -> f32 {
        self.base_z + self.height * fraction
    }
}

/// Measure the bounding box of `mesh`. Returns `None` when it has no vertices.
pub fn analyze_proportions(mesh: &Mesh) -> Option<BodyProportions> {
    let bounds = mesh.bounds()?;
    let extent = bounds.extent();
    let center = bounds.center();
    Some(BodyProportions {
        bounds,
        height: extent.z,
        width: extent.x,
        depth: extent.y,
        center_x: center.x,
        center_y: center.y,
        base_z: bounds.min.z,
    })
}
