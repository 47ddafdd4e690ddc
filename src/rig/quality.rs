//! Production-readiness checks for a finished rig.

use serde::{Deserialize, Serialize};

use super::{
    skeleton::Skeleton,
    weights::VertexWeightSet,
};
use crate::{mesh::Aabb, settings::QualitySettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckResult {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "WARNING")]
    Warn,
    #[serde(rename = "FAIL")]
    Fail,
    #[serde(rename = "SKIPPED")]
    Skip,
}

impl CheckResult {
    fn score(&self) -> f32 {
        match self {
            CheckResult::Pass => 1.0,
            CheckResult::Warn | CheckResult::Skip => 0.5,
            CheckResult::Fail => 0.0,
        }
    }

    fn icon(&self) -> &'static str {
        match self {
            CheckResult::Pass => "[OK]",
            CheckResult::Warn => "[!!]",
            CheckResult::Fail => "[XX]",
            CheckResult::Skip => "[--]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCheck {
    pub name: String,
    pub result: CheckResult,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl QualityCheck {
    fn new(name: &str, result: CheckResult, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            result,
            message: message.into(),
            details: Vec::new(),
        }
    }

    fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }
}

/// Rigging tool inferred from bone naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTool {
    Mixamo,
    AccuRig,
    Rigify,
    Unknown,
}

impl SourceTool {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTool::Mixamo => "mixamo",
            SourceTool::AccuRig => "accurig",
            SourceTool::Rigify => "rigify",
            SourceTool::Unknown => "unknown",
        }
    }
}

pub fn detect_source_tool<'a>(bone_names: impl IntoIterator<Item = &'a str>) -> SourceTool {
    let names: Vec<&str> = bone_names.into_iter().collect();
    if names.iter().any(|name| name.contains("mixamorig:")) {
        SourceTool::Mixamo
    } else if names.iter().any(|name| name.contains("CC_Base_")) {
        SourceTool::AccuRig
    } else if names.iter().any(|name| {
        name.starts_with("DEF-") || name.starts_with("MCH-") || *name == "ORG-spine" || *name == "ORG-spine.001"
    }) {
        SourceTool::Rigify
    } else {
        SourceTool::Unknown
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub character_name: String,
    pub source_tool: SourceTool,
    pub bone_count: usize,
    pub vertex_count: usize,
    pub checks: Vec<QualityCheck>,
    /// 0–100.
    pub overall_score: f32,
    pub production_ready: bool,
}

impl QualityReport {
    pub fn failures(&self) -> impl Iterator<Item = &QualityCheck> {
        self.checks.iter().filter(|check| check.result == CheckResult::Fail)
    }

    /// Human-readable multi-line summary.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("=== Rig Quality Report: {} ===", self.character_name),
            format!("Source tool: {}", self.source_tool.as_str()),
            format!("Bones: {}", self.bone_count),
            format!("Vertices: {}", self.vertex_count),
            String::new(),
        ];
        for check in &self.checks {
            lines.push(format!("  {} {}: {}", check.result.icon(), check.name, check.message));
            lines.extend(check.details.iter().map(|detail| format!("       - {detail}")));
        }
        lines.push(String::new());
        lines.push(format!("Overall Score: {:.1}%", self.overall_score));
        lines.push(format!(
            "Production Ready: {}",
            if self.production_ready { "YES" } else { "NO" }
        ));
        lines.join("\n")
    }
}

/// Run every check against the skeleton and, when given, its skin weights.
pub fn assess_rig(
    character_name: &str,
    skeleton: &Skeleton,
    weights: Option<&VertexWeightSet>,
    settings: &QualitySettings,
) -> QualityReport {
    let mut checks = vec![
        check_bone_count(skeleton),
        check_hierarchy(skeleton),
        check_required_bones(skeleton),
        check_naming(skeleton),
        check_symmetry(skeleton, settings.symmetry_tolerance),
    ];
    if let Some(weights) = weights {
        checks.push(check_weight_coverage(weights, settings.min_weight_coverage));
        checks.push(check_max_influences(weights, settings.max_influences));
    }
    checks.push(check_rest_pose(skeleton));

    let overall_score = checks.iter().map(|check| check.result.score()).sum::<f32>() / checks.len() as f32 * 100.0;
    let production_ready = checks.iter().all(|check| check.result != CheckResult::Fail) && overall_score >= 80.0;
    QualityReport {
        character_name: character_name.to_string(),
        source_tool: detect_source_tool(skeleton.bones().iter().map(|bone| bone.name.as_str())),
        bone_count: skeleton.len(),
        vertex_count: weights.map_or(0, VertexWeightSet::vertex_count),
        checks,
        overall_score,
        production_ready,
    }
}

fn check_bone_count(skeleton: &Skeleton) -> QualityCheck {
    let count = skeleton.len();
    if count < 10 {
        QualityCheck::new("Bone Count", CheckResult::Warn, format!("{count} bones - very simple rig, may lack control"))
    } else if count > 400 {
        QualityCheck::new(
            "Bone Count",
            CheckResult::Warn,
            format!("{count} bones - very complex, may impact performance"),
        )
    } else {
        QualityCheck::new("Bone Count", CheckResult::Pass, format!("{count} bones"))
    }
}

fn check_hierarchy(skeleton: &Skeleton) -> QualityCheck {
    let roots: Vec<String> = skeleton
        .roots()
        .into_iter()
        .filter_map(|id| skeleton.bone(id).map(|bone| bone.name.clone()))
        .collect();
    match roots.as_slice() {
        [] => QualityCheck::new("Bone Hierarchy", CheckResult::Warn, "No root bone found"),
        [root] => QualityCheck::new("Bone Hierarchy", CheckResult::Pass, format!("Single root bone: {root}")),
        _ => QualityCheck::new(
            "Bone Hierarchy",
            CheckResult::Warn,
            format!("Multiple root bones: {}", roots.len()),
        )
        .with_details(roots.into_iter().take(10).collect()),
    }
}

const CORE_BONE_GROUPS: [&str; 6] = ["hips", "hip", "pelvis", "spine", "head", "neck"];

fn check_required_bones(skeleton: &Skeleton) -> QualityCheck {
    let names: Vec<String> = skeleton
        .bones()
        .iter()
        .map(|bone| bone.name.to_lowercase().replace("mixamorig:", "").replace("cc_base_", ""))
        .collect();
    let found = CORE_BONE_GROUPS
        .iter()
        .filter(|group| names.iter().any(|name| name.contains(*group)))
        .count();
    let looking_for = vec![format!("Looking for: {}", CORE_BONE_GROUPS.join(", "))];
    if found >= 4 {
        QualityCheck::new("Required Bones", CheckResult::Pass, format!("Found {found}/6 core bone groups"))
    } else if found >= 2 {
        QualityCheck::new("Required Bones", CheckResult::Warn, format!("Found only {found}/6 core bone groups"))
            .with_details(looking_for)
    } else {
        QualityCheck::new(
            "Required Bones",
            CheckResult::Fail,
            format!("Missing most core bones ({found}/6 found)"),
        )
        .with_details(looking_for)
    }
}

fn is_left(name: &str) -> bool {
    name.contains(".L") || name.contains("Left") || name.contains("_L")
}

fn is_right(name: &str) -> bool {
    name.contains(".R") || name.contains("Right") || name.contains("_R")
}

fn check_naming(skeleton: &Skeleton) -> QualityCheck {
    let names: Vec<&str> = skeleton.bones().iter().map(|bone| bone.name.as_str()).collect();
    let conventions = [
        names.iter().any(|name| name.contains(".L") || name.contains(".R")),
        names.iter().any(|name| name.contains("Left") || name.contains("Right")),
        names.iter().any(|name| name.contains("_L") || name.contains("_R")),
    ]
    .into_iter()
    .filter(|used| *used)
    .count();
    match conventions {
        1 => QualityCheck::new("Naming Convention", CheckResult::Pass, "Consistent naming convention detected"),
        0 => QualityCheck::new(
            "Naming Convention",
            CheckResult::Warn,
            "No standard L/R naming convention detected",
        ),
        _ => QualityCheck::new("Naming Convention", CheckResult::Warn, "Mixed naming conventions detected"),
    }
}

fn check_symmetry(skeleton: &Skeleton, tolerance: f32) -> QualityCheck {
    let left = skeleton.bones().iter().filter(|bone| is_left(&bone.name)).count();
    let right = skeleton.bones().iter().filter(|bone| is_right(&bone.name)).count();
    if left == 0 && right == 0 {
        return QualityCheck::new("Symmetry", CheckResult::Skip, "No L/R bones detected, cannot check symmetry");
    }
    if left != right {
        return QualityCheck::new("Symmetry", CheckResult::Warn, format!("Asymmetric: {left} left, {right} right"));
    }

    let Some(bounds) = Aabb::from_points(skeleton.bones().iter().flat_map(|bone| [&bone.head, &bone.tail])) else {
        return QualityCheck::new("Symmetry", CheckResult::Skip, "Skeleton has no joints");
    };
    let limit = tolerance * bounds.extent().z.max(f32::EPSILON);
    let deviation = skeleton.max_mirror_deviation(bounds.center().x);
    if deviation <= limit {
        QualityCheck::new("Symmetry", CheckResult::Pass, format!("Symmetric: {left} bones per side"))
    } else {
        QualityCheck::new(
            "Symmetry",
            CheckResult::Warn,
            format!("{left} bones per side, but mirrored joints deviate by {deviation:.3} (limit {limit:.3})"),
        )
    }
}

fn check_weight_coverage(weights: &VertexWeightSet, min_coverage: f32) -> QualityCheck {
    let total = weights.vertex_count();
    if total == 0 {
        return QualityCheck::new("Weight Coverage", CheckResult::Fail, "Mesh has no vertices");
    }
    let unweighted = weights.uncovered(0.0).len();
    let coverage = (total - unweighted) as f32 / total as f32;
    let message = format!("{:.1}% of vertices weighted ({unweighted} unweighted)", coverage * 100.0);
    let result = if coverage >= min_coverage {
        CheckResult::Pass
    } else if coverage >= 0.95 {
        CheckResult::Warn
    } else {
        CheckResult::Fail
    };
    QualityCheck::new("Weight Coverage", result, message)
}

fn check_max_influences(weights: &VertexWeightSet, limit: usize) -> QualityCheck {
    let max = weights.max_influence_count();
    let over = weights.iter().filter(|influences| influences.len() > limit).count();
    if max <= limit {
        QualityCheck::new("Max Influences", CheckResult::Pass, format!("Max {max} influences per vertex"))
    } else {
        QualityCheck::new(
            "Max Influences",
            CheckResult::Warn,
            format!("{over} vertices exceed {limit} influences (max {max})"),
        )
    }
}

fn check_rest_pose(skeleton: &Skeleton) -> QualityCheck {
    let upper_arms: Vec<_> = skeleton
        .bones()
        .iter()
        .filter(|bone| {
            let name = bone.name.to_lowercase();
            name.contains("upper_arm") || name.contains("upperarm") || name.contains("shoulder")
        })
        .collect();
    if upper_arms.is_empty() {
        return QualityCheck::new(
            "Rest Pose",
            CheckResult::Skip,
            "Cannot detect rest pose - no upper arm bones found",
        );
    }
    for bone in upper_arms {
        let dx = (bone.tail.x - bone.head.x).abs();
        let dz = (bone.tail.z - bone.head.z).abs();
        let angle = if dx > 0.0 { dz.atan2(dx).to_degrees() } else { 90.0 };
        if angle < 15.0 {
            return QualityCheck::new("Rest Pose", CheckResult::Pass, "T-pose detected (arms horizontal)");
        }
        if angle < 60.0 {
            return QualityCheck::new("Rest Pose", CheckResult::Pass, "A-pose detected (arms at ~45 degrees)");
        }
    }
    QualityCheck::new(
        "Rest Pose",
        CheckResult::Warn,
        "Rest pose unclear - arms may not be in standard T/A-pose",
    )
}
