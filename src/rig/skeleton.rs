use std::collections::{HashMap, VecDeque};
use std::f32::consts::PI;

use nalgebra::{Matrix4, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::{
    preset::CharacterPreset,
    proportion::BodyProportions,
    types::{ARM_CHAIN, LEG_CHAIN, ROOT_BONE, SPINE_CHAIN, Side, bone_name, sided_bone_name},
};

/// Index of a bone inside its `Skeleton`.
pub type BoneId = usize;

/// One bone in rest position, in the Z-up working frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bone {
    pub name: String,
    pub head: Vector3<f32>,
    pub tail: Vector3<f32>,
    pub parent: Option<BoneId>,
}

impl Bone {
    pub fn length(&self) -> f32 {
        (self.tail - self.head).norm()
    }

    /// World rest frame: origin at the head, local +Y along head→tail, zero roll.
    pub fn rest_world(&self) -> Matrix4<f32> {
        Translation3::from(self.head).to_homogeneous()
            * bone_rest_rotation(&(self.tail - self.head)).to_homogeneous()
    }
}

/// Structural problems in a bone hierarchy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkeletonError {
    #[error("duplicate bone name '{0}'")]
    DuplicateName(String),

    #[error("bone '{bone}' references unknown parent '{parent}'")]
    UnknownParent { bone: String, parent: String },

    #[error("skeleton has no root bone")]
    NoRoot,

    #[error("skeleton has several root bones: {0:?}")]
    MultipleRoots(Vec<String>),

    #[error("bone '{0}' is part of a parent cycle")]
    Cycle(String),

    #[error("bone '{0}' is not reachable from the root")]
    Unreachable(String),
}

/// Arena of bones; parents are stored before their children.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Skeleton {
    bones: Vec<Bone>,
}

impl Skeleton {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a skeleton from stored bones, checking the tree invariants.
    pub fn from_bones(bones: Vec<Bone>) -> Result<Self, SkeletonError> {
        let skeleton = Self { bones };
        skeleton.validate_tree()?;
        Ok(skeleton)
    }

    /// Append a bone. The parent, if any, must already exist.
    pub fn add_bone(
        &mut self,
        name: impl Into<String>,
        head: Vector3<f32>,
        tail: Vector3<f32>,
        parent: Option<&str>,
    ) -> Result<BoneId, SkeletonError> {
        let name = name.into();
        if self.find(&name).is_some() {
            return Err(SkeletonError::DuplicateName(name));
        }
        let parent = match parent {
            Some(parent_name) => Some(self.find(parent_name).ok_or_else(|| SkeletonError::UnknownParent {
                bone: name.clone(),
                parent: parent_name.to_string(),
            })?),
            None => None,
        };
        self.bones.push(Bone {
            name,
            head,
            tail,
            parent,
        });
        Ok(self.bones.len() - 1)
    }

    pub fn find(&self, name: &str) -> Option<BoneId> {
        self.bones.iter().position(|bone| bone.name == name)
    }

    pub fn bone(&self, id: BoneId) -> Option<&Bone> {
        self.bones.get(id)
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn roots(&self) -> Vec<BoneId> {
        (0..self.bones.len())
            .filter(|id| self.bones[*id].parent.is_none())
            .collect()
    }

    pub fn children(&self, id: BoneId) -> Vec<BoneId> {
        (0..self.bones.len())
            .filter(|child| self.bones[*child].parent == Some(id))
            .collect()
    }

    /// Unique names, exactly one root, no cycles, every bone reachable.
    pub fn validate_tree(&self) -> Result<(), SkeletonError> {
        let mut seen = HashMap::with_capacity(self.bones.len());
        for (id, bone) in self.bones.iter().enumerate() {
            if seen.insert(bone.name.as_str(), id).is_some() {
                return Err(SkeletonError::DuplicateName(bone.name.clone()));
            }
            if let Some(parent) = bone.parent
                && (parent >= self.bones.len() || parent == id)
            {
                return Err(SkeletonError::UnknownParent {
                    bone: bone.name.clone(),
                    parent: format!("#{parent}"),
                });
            }
        }

        let roots = self.roots();
        let root = match roots.as_slice() {
            [] => return Err(SkeletonError::NoRoot),
            [root] => *root,
            _ => {
                return Err(SkeletonError::MultipleRoots(
                    roots.iter().map(|id| self.bones[*id].name.clone()).collect(),
                ));
            }
        };

        for (id, bone) in self.bones.iter().enumerate() {
            let mut current = id;
            let mut steps = 0;
            while let Some(parent) = self.bones[current].parent {
                current = parent;
                steps += 1;
                if steps > self.bones.len() {
                    return Err(SkeletonError::Cycle(bone.name.clone()));
                }
            }
        }

        let mut reached = vec![false; self.bones.len()];
        let mut queue = VecDeque::from([root]);
        reached[root] = true;
        while let Some(id) = queue.pop_front() {
            for child in self.children(id) {
                if !reached[child] {
                    reached[child] = true;
                    queue.push_back(child);
                }
            }
        }
        if let Some(id) = reached.iter().position(|reached| !reached) {
            return Err(SkeletonError::Unreachable(self.bones[id].name.clone()));
        }
        Ok(())
    }

    /// Left/right bone pairs, matched by swapping `Left` for `Right` in the name.
    pub fn mirror_pairs(&self) -> Vec<(BoneId, BoneId)> {
        self.bones
            .iter()
            .enumerate()
            .filter(|(_, bone)| bone.name.contains(Side::Left.as_str()))
            .filter_map(|(left, bone)| {
                let mirrored = bone.name.replacen(Side::Left.as_str(), Side::Right.as_str(), 1);
                self.find(&mirrored).map(|right| (left, right))
            })
            .collect()
    }

    /// Largest distance between a right-side joint and its mirrored left
    /// partner across the plane `x = center_x`.
    pub fn max_mirror_deviation(&self, center_x: f32) -> f32 {
        self.mirror_pairs()
            .into_iter()
            .flat_map(|(left, right)| {
                let (left, right) = (&self.bones[left], &self.bones[right]);
                [
                    (mirror_x(&left.head, center_x) - right.head).norm(),
                    (mirror_x(&left.tail, center_x) - right.tail).norm(),
                ]
            })
            .fold(0.0, f32::max)
    }

    /// World rest frames, one per bone in skeleton order.
    pub fn rest_worlds(&self) -> Vec<Matrix4<f32>> {
        self.bones.iter().map(Bone::rest_world).collect()
    }
}

/// Rotation taking local +Y onto `direction` with zero roll.
pub fn bone_rest_rotation(direction: &Vector3<f32>) -> UnitQuaternion<f32> {
    if direction.norm_squared() < 1e-16 {
        return UnitQuaternion::identity();
    }
    UnitQuaternion::rotation_between(&Vector3::y(), direction)
        .unwrap_or_else(|| UnitQuaternion::from_axis_angle(&Vector3::z_axis(), PI))
}

/// Closest point to `point` on segment `a`→`b`, with its parameter in `[0, 1]`.
pub fn closest_point_on_segment(
    point: &Vector3<f32>,
    a: &Vector3<f32>,
    b: &Vector3<f32>,
) -> (Vector3<f32>, f32) {
    let axis = b - a;
    let t = ((point - a).dot(&axis) / axis.norm_squared().max(1e-10)).clamp(0.0, 1.0);
    (a + axis * t, t)
}

pub fn distance_to_segment(point: &Vector3<f32>, a: &Vector3<f32>, b: &Vector3<f32>) -> f32 {
    (point - closest_point_on_segment(point, a, b).0).norm()
}

/// Reflect across the sagittal plane `x = center_x`.
pub fn mirror_x(point: &Vector3<f32>, center_x: f32) -> Vector3<f32> {
    Vector3::new(2.0 * center_x - point.x, point.y, point.z)
}

/// Tail that extends the `previous`→`head` direction by half its length.
fn extended_tail(previous: &Vector3<f32>, head: &Vector3<f32>) -> Vector3<f32> {
    let segment = head - previous;
    match segment.try_normalize(1e-8) {
        Some(direction) => head + direction * (segment.norm() * 0.5),
        None => head + Vector3::z() * 0.01,
    }
}

/// Build the 22-bone humanoid skeleton for the measured body and preset.
///
/// Only left-side landmarks are computed; the right side is their mirror
/// image, so the pair symmetry is exact up to float rounding.
pub fn synthesize_skeleton(
    body: &BodyProportions,
    preset: &CharacterPreset,
) -> Result<Skeleton, SkeletonError> {
    let mut skeleton = Skeleton::new();

    let spine_landmarks = [
        preset.hips_height,
        preset.spine_heights[0],
        preset.spine_heights[1],
        preset.spine_heights[2],
        preset.neck_height,
        preset.head_height,
        preset.head_top_height,
    ]
    .map(|fraction| body.axis_point(fraction));
    for (index, base) in SPINE_CHAIN.iter().enumerate() {
        let parent = index.checked_sub(1).map(|previous| bone_name(SPINE_CHAIN[previous]));
        skeleton.add_bone(
            bone_name(base),
            spine_landmarks[index],
            spine_landmarks[index + 1],
            parent.as_deref(),
        )?;
    }

    let lateral = |fraction: f32| body.center_x + body.width * fraction;
    let elbow_shift = Vector3::y() * body.depth * preset.elbow_offset;
    let knee_shift = -Vector3::y() * body.depth * preset.knee_offset;

    let shoulder = Vector3::new(lateral(preset.shoulder_width), body.center_y, body.height_at(preset.shoulder_height));
    let arm_joint = |slot: usize| {
        Vector3::new(lateral(preset.arm_widths[slot]), body.center_y, body.height_at(preset.arm_heights[slot]))
    };
    let (upper_arm, elbow, wrist) = (arm_joint(0), arm_joint(1) + elbow_shift, arm_joint(2));
    let arm_points = [shoulder, upper_arm, elbow, wrist, extended_tail(&elbow, &wrist)];

    let leg_x = lateral(preset.leg_width);
    let hip = Vector3::new(leg_x, body.center_y, body.height_at(preset.leg_heights[0]));
    let knee = Vector3::new(leg_x, body.center_y, body.height_at(preset.leg_heights[1])) + knee_shift;
    let ankle = Vector3::new(leg_x, body.center_y, body.height_at(preset.leg_heights[2]));
    let toe = Vector3::new(leg_x, body.center_y - body.depth * preset.toe_forward, body.base_z);
    let leg_points = [hip, knee, ankle, toe, extended_tail(&ankle, &toe)];

    let chains = [
        (&ARM_CHAIN, &arm_points, SPINE_CHAIN[3]),
        (&LEG_CHAIN, &leg_points, ROOT_BONE),
    ];
    for side in [Side::Left, Side::Right] {
        for &(chain, &points, attach) in &chains {
            let points = points.map(|point| match side {
                Side::Left => point,
                Side::Right => mirror_x(&point, body.center_x),
            });
            for (index, base) in chain.iter().enumerate() {
                let parent = match index {
                    0 => bone_name(attach),
                    _ => sided_bone_name(side, chain[index - 1]),
                };
                skeleton.add_bone(
                    sided_bone_name(side, base),
                    points[index],
                    points[index + 1],
                    Some(&parent),
                )?;
            }
        }
    }

    skeleton.validate_tree()?;
    debug!(bones = skeleton.len(), "skeleton synthesized");
    Ok(skeleton)
}
