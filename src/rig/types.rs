use serde::{Deserialize, Serialize};

// ─── Bone name constants ──────────────────────────────────────────────────────

/// Prefix every synthesized bone carries. Downstream retargeting tools key on it.
pub const BONE_PREFIX: &str = "mixamorig:";

/// Root bone of the synthesized skeleton, without prefix.
pub(crate) const ROOT_BONE: &str = "Hips";

/// Spine chain from pelvis to skull, without prefix.
pub(crate) const SPINE_CHAIN: [&str; 6] = ["Hips", "Spine", "Spine1", "Spine2", "Neck", "Head"];

/// Arm chain per side, without side or prefix.
pub(crate) const ARM_CHAIN: [&str; 4] = ["Shoulder", "Arm", "ForeArm", "Hand"];

/// Leg chain per side, without side or prefix.
pub(crate) const LEG_CHAIN: [&str; 4] = ["UpLeg", "Leg", "Foot", "ToeBase"];

/// Parent → child edges of the synthesized skeleton, without prefix.
pub(crate) const SKELETON_HIERARCHY: [(&str, &str); 21] = [
    ("Hips", "Spine"),
    ("Spine", "Spine1"),
    ("Spine1", "Spine2"),
    ("Spine2", "Neck"),
    ("Neck", "Head"),
    ("Spine2", "LeftShoulder"),
    ("LeftShoulder", "LeftArm"),
    ("LeftArm", "LeftForeArm"),
    ("LeftForeArm", "LeftHand"),
    ("Spine2", "RightShoulder"),
    ("RightShoulder", "RightArm"),
    ("RightArm", "RightForeArm"),
    ("RightForeArm", "RightHand"),
    ("Hips", "LeftUpLeg"),
    ("LeftUpLeg", "LeftLeg"),
    ("LeftLeg", "LeftFoot"),
    ("LeftFoot", "LeftToeBase"),
    ("Hips", "RightUpLeg"),
    ("RightUpLeg", "RightLeg"),
    ("RightLeg", "RightFoot"),
    ("RightFoot", "RightToeBase"),
];

/// Number of bones `synthesize_skeleton` produces.
pub const SYNTHESIZED_BONE_COUNT: usize = SKELETON_HIERARCHY.len() + 1;

/// Prefixed bone name, e.g. `mixamorig:LeftForeArm`.
pub fn bone_name(base: &str) -> String {
    format!("{BONE_PREFIX}{base}")
}

/// Body side of a limb chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "Left",
            Side::Right => "Right",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Prefixed, sided bone name, e.g. `mixamorig:RightUpLeg`.
pub fn sided_bone_name(side: Side, base: &str) -> String {
    format!("{BONE_PREFIX}{}{base}", side.as_str())
}

// ─── Issues ───────────────────────────────────────────────────────────────────

/// Severity level used by validation issues.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A recovered problem found while rigging. Fatal problems are `RigError`s instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(severity: Severity, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.into(),
            message: message.into(),
        }
    }
}
