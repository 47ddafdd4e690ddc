use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{Context, Result};
use nalgebra::UnitQuaternion;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::rig::skeleton::{BoneId, Skeleton};

/// Selection keyword for the whole pose library.
pub const ALL_POSES: &str = "all";

/// Semantic joints a stress pose can rotate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Joint {
    Hips,
    Spine,
    Spine1,
    Spine2,
    Neck,
    Head,
    LeftUpperArm,
    RightUpperArm,
    LeftForearm,
    RightForearm,
    LeftUpperLeg,
    RightUpperLeg,
    LeftLowerLeg,
    RightLowerLeg,
}

impl Joint {
    pub const ALL: [Joint; 14] = [
        Joint::Hips,
        Joint::Spine,
        Joint::Spine1,
        Joint::Spine2,
        Joint::Neck,
        Joint::Head,
        Joint::LeftUpperArm,
        Joint::RightUpperArm,
        Joint::LeftForearm,
        Joint::RightForearm,
        Joint::LeftUpperLeg,
        Joint::RightUpperLeg,
        Joint::LeftLowerLeg,
        Joint::RightLowerLeg,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Joint::Hips => "hips",
            Joint::Spine => "spine",
            Joint::Spine1 => "spine1",
            Joint::Spine2 => "spine2",
            Joint::Neck => "neck",
            Joint::Head => "head",
            Joint::LeftUpperArm => "left_upper_arm",
            Joint::RightUpperArm => "right_upper_arm",
            Joint::LeftForearm => "left_forearm",
            Joint::RightForearm => "right_forearm",
            Joint::LeftUpperLeg => "left_upper_leg",
            Joint::RightUpperLeg => "right_upper_leg",
            Joint::LeftLowerLeg => "left_lower_leg",
            Joint::RightLowerLeg => "right_lower_leg",
        }
    }

    /// Bone names tried for this joint, most specific first.
    fn default_aliases(&self) -> &'static [&'static str] {
        match self {
            Joint::Hips => &["hips", "Hips", "mixamorig:Hips", "DEF-spine", "root", "Root"],
            Joint::Spine => &["spine", "Spine", "mixamorig:Spine", "DEF-spine.001"],
            Joint::Spine1 => &["spine1", "Spine1", "mixamorig:Spine1", "DEF-spine.002"],
            Joint::Spine2 => &["spine2", "Spine2", "mixamorig:Spine2", "DEF-spine.003"],
            Joint::Neck => &["neck", "Neck", "mixamorig:Neck", "DEF-spine.004"],
            Joint::Head => &["head", "Head", "mixamorig:Head", "DEF-spine.005"],
            Joint::LeftUpperArm => &[
                "leftshoulder",
                "LeftArm",
                "mixamorig:LeftArm",
                "DEF-upper_arm.L",
                "Left arm",
                "LeftUpperArm",
                "upper_arm.L",
            ],
            Joint::RightUpperArm => &[
                "rightshoulder",
                "RightArm",
                "mixamorig:RightArm",
                "DEF-upper_arm.R",
                "Right arm",
                "RightUpperArm",
                "upper_arm.R",
            ],
            Joint::LeftForearm => &[
                "leftforearm",
                "LeftForeArm",
                "mixamorig:LeftForeArm",
                "DEF-forearm.L",
                "Left forearm",
                "forearm.L",
            ],
            Joint::RightForearm => &[
                "rightforearm",
                "RightForeArm",
                "mixamorig:RightForeArm",
                "DEF-forearm.R",
                "Right forearm",
                "forearm.R",
            ],
            Joint::LeftUpperLeg => &[
                "leftupleg",
                "LeftUpLeg",
                "mixamorig:LeftUpLeg",
                "DEF-thigh.L",
                "Left thigh",
                "thigh.L",
            ],
            Joint::RightUpperLeg => &[
                "rightupleg",
                "RightUpLeg",
                "mixamorig:RightUpLeg",
                "DEF-thigh.R",
                "Right thigh",
                "thigh.R",
            ],
            Joint::LeftLowerLeg => &["leftleg", "LeftLeg", "mixamorig:LeftLeg", "DEF-shin.L", "Left shin", "shin.L"],
            Joint::RightLowerLeg => &[
                "rightleg",
                "RightLeg",
                "mixamorig:RightLeg",
                "DEF-shin.R",
                "Right shin",
                "shin.R",
            ],
        }
    }
}

/// Ordered bone-name aliases per semantic joint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoneAliasTable {
    aliases: BTreeMap<Joint, Vec<String>>,
}

impl Default for BoneAliasTable {
    fn default() -> Self {
        let aliases = Joint::ALL
            .iter()
            .map(|joint| {
                let names = joint.default_aliases().iter().map(|name| name.to_string()).collect();
                (*joint, names)
            })
            .collect();
        Self { aliases }
    }
}

impl BoneAliasTable {
    pub fn aliases(&self, joint: Joint) -> &[String] {
        self.aliases.get(&joint).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Prepend extra aliases for `joint`; they are tried before the existing ones.
    pub fn extend(&mut self, joint: Joint, names: Vec<String>) {
        let entry = self.aliases.entry(joint).or_default();
        let existing = std::mem::take(entry);
        *entry = names;
        for name in existing {
            if !entry.contains(&name) {
                entry.push(name);
            }
        }
    }

    /// Bone for `joint`: the first alias with an exact name match, otherwise
    /// the first bone whose name matches any alias ignoring case.
    pub fn resolve(&self, skeleton: &Skeleton, joint: Joint) -> Option<BoneId> {
        let aliases = self.aliases(joint);
        if let Some(bone) = aliases.iter().find_map(|alias| skeleton.find(alias)) {
            return Some(bone);
        }
        let lowered: Vec<String> = aliases.iter().map(|alias| alias.to_lowercase()).collect();
        skeleton
            .bones()
            .iter()
            .position(|bone| lowered.contains(&bone.name.to_lowercase()))
    }
}

/// XYZ Euler rotation in degrees, applied in bone-local space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EulerDegrees {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl EulerDegrees {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn to_rotation(&self) -> UnitQuaternion<f32> {
        UnitQuaternion::from_euler_angles(self.x.to_radians(), self.y.to_radians(), self.z.to_radians())
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressPose {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Rigging problem areas the pose exposes.
    #[serde(default)]
    pub targets: String,
    #[serde(default)]
    pub rotations: BTreeMap<Joint, EulerDegrees>,
}

impl StressPose {
    fn new(name: &str, description: &str, targets: &str, rotations: &[(Joint, EulerDegrees)]) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            targets: targets.to_string(),
            rotations: rotations.iter().copied().collect(),
        }
    }
}

/// On-disk pose library: extra poses plus extra bone aliases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseLibraryFile {
    pub poses: Vec<StressPose>,
    pub aliases: BTreeMap<Joint, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoseLibrary {
    poses: Vec<StressPose>,
    aliases: BoneAliasTable,
}

impl Default for PoseLibrary {
    fn default() -> Self {
        standard_pose_library()
    }
}

impl PoseLibrary {
    pub fn poses(&self) -> &[StressPose] {
        &self.poses
    }

    pub fn aliases(&self) -> &BoneAliasTable {
        &self.aliases
    }

    pub fn get(&self, name: &str) -> Option<&StressPose> {
        self.poses.iter().find(|pose| pose.name == name)
    }

    /// Add the file's poses, replacing same-named ones in place. Returns the
    /// number of poses read.
    pub fn merge(&mut self, file: PoseLibraryFile) -> usize {
        let count = file.poses.len();
        for pose in file.poses {
            match self.poses.iter_mut().find(|existing| existing.name == pose.name) {
                Some(existing) => *existing = pose,
                None => self.poses.push(pose),
            }
        }
        for (joint, names) in file.aliases {
            self.aliases.extend(joint, names);
        }
        count
    }

    /// Poses for `all` or a comma-separated list of names, in library order.
    /// Unknown names are logged and skipped.
    pub fn select(&self, selection: &str) -> Vec<&StressPose> {
        if selection.trim() == ALL_POSES {
            return self.poses.iter().collect();
        }
        let names: Vec<&str> = selection
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect();
        for name in &names {
            if self.get(name).is_none() {
                warn!(pose = %name, "unknown stress pose");
            }
        }
        self.poses
            .iter()
            .filter(|pose| names.contains(&pose.name.as_str()))
            .collect()
    }
}

/// Built-in poses, each aimed at a common weight-painting defect.
pub fn standard_pose_library() -> PoseLibrary {
    use Joint::*;
    let x = |degrees| EulerDegrees::new(degrees, 0.0, 0.0);
    let y = |degrees| EulerDegrees::new(0.0, degrees, 0.0);
    let z = |degrees| EulerDegrees::new(0.0, 0.0, degrees);

    let poses = vec![
        StressPose::new(
            "t_pose",
            "T-Pose (baseline) - default rest position, arms straight out",
            "Baseline mesh quality, overall proportions",
            &[],
        ),
        StressPose::new(
            "deep_squat",
            "Deep squat - knees bent 120deg, hips dropped",
            "Hip/thigh weight painting, knee deformation, groin area",
            &[
                (LeftUpperLeg, x(100.0)),
                (RightUpperLeg, x(100.0)),
                (LeftLowerLeg, x(-120.0)),
                (RightLowerLeg, x(-120.0)),
            ],
        ),
        StressPose::new(
            "arms_overhead",
            "Both arms raised overhead",
            "Shoulder weight painting, armpit deformation, torso stretch",
            &[(LeftUpperArm, z(170.0)), (RightUpperArm, z(-170.0))],
        ),
        StressPose::new(
            "arms_behind_back",
            "Arms pulled behind the back",
            "Shoulder/chest clipping, back deformation",
            &[
                (LeftUpperArm, EulerDegrees::new(-30.0, 0.0, -45.0)),
                (RightUpperArm, EulerDegrees::new(-30.0, 0.0, 45.0)),
            ],
        ),
        StressPose::new(
            "spine_twist",
            "Torso twisted 90 degrees",
            "Spine weight distribution, torso deformation, waist twisting",
            &[(Spine, y(30.0)), (Spine1, y(30.0)), (Spine2, y(30.0))],
        ),
        StressPose::new(
            "extreme_head_turn",
            "Head turned 90 degrees to the side",
            "Neck weights, jaw/chin area, hair deformation",
            &[(Neck, y(30.0)), (Head, y(60.0))],
        ),
        StressPose::new(
            "walk_extreme",
            "Extreme walk pose - one leg forward, one back, arms swinging",
            "Overall deformation during locomotion, hip rotation",
            &[
                (LeftUpperLeg, x(60.0)),
                (RightUpperLeg, x(-40.0)),
                (LeftLowerLeg, x(-30.0)),
                (RightLowerLeg, x(-60.0)),
                (LeftUpperArm, x(-30.0)),
                (RightUpperArm, x(30.0)),
                (LeftForearm, x(-20.0)),
                (RightForearm, x(-40.0)),
            ],
        ),
        StressPose::new(
            "full_bend_forward",
            "Bending forward at the waist, touching toes",
            "Spine chain, belly/waist area, back stretching",
            &[(Spine, x(30.0)), (Spine1, x(30.0)), (Spine2, x(30.0))],
        ),
    ];

    PoseLibrary {
        poses,
        aliases: BoneAliasTable::default(),
    }
}

/// Standard library extended with the poses and aliases in `path`.
pub fn load_pose_library(path: &Path) -> Result<PoseLibrary> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read pose library: {}", path.display()))?;
    let file: PoseLibraryFile = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse pose library: {}", path.display()))?;
    let mut library = standard_pose_library();
    library.merge(file);
    Ok(library)
}
