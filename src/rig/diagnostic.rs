use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Serialize;

use super::{
    quality::{CheckResult, QualityReport},
    skeleton::Skeleton,
    solver::WeightReport,
    types::ValidationIssue,
    weights::VertexWeightSet,
};
use crate::mesh::Mesh;

// ─── Diagnostic structs ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct BoneDiagnostic {
    index: usize,
    name: String,
    parent_name: Option<String>,
    head: [f32; 3],
    tail: [f32; 3],
    length: f32,
    /// Vertices with any weight on this bone.
    influenced_vertices: usize,
    /// Vertices whose strongest weight is this bone.
    dominant_vertices: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RigDiagnosticLog {
    output_path: String,
    vertex_count: usize,
    face_count: usize,
    bone_count: usize,
    bones: Vec<BoneDiagnostic>,
    weights: WeightReport,
}

// ─── Path helpers ──────────────────────────────────────────────────────────────

pub fn diagnostic_log_path_for_output(output_path: &Path) -> PathBuf {
    output_path.with_extension("diagnostic.json")
}

// ─── Diagnostic writer ────────────────────────────────────────────────────────

pub fn build_rig_diagnostic(
    output_path: &Path,
    mesh: &Mesh,
    skeleton: &Skeleton,
    weights: &VertexWeightSet,
    report: &WeightReport,
) -> RigDiagnosticLog {
    let mut influenced = vec![0usize; skeleton.len()];
    let mut dominant = vec![0usize; skeleton.len()];
    for (vertex, influences) in weights.iter().enumerate() {
        for influence in influences {
            if let Some(count) = influenced.get_mut(influence.bone) {
                *count += 1;
            }
        }
        if let Some(count) = weights.dominant_bone(vertex).and_then(|bone| dominant.get_mut(bone)) {
            *count += 1;
        }
    }

    let bones = skeleton
        .bones()
        .iter()
        .enumerate()
        .map(|(index, bone)| BoneDiagnostic {
            index,
            name: bone.name.clone(),
            parent_name: bone
                .parent
                .and_then(|parent| skeleton.bone(parent))
                .map(|parent| parent.name.clone()),
            head: [bone.head.x, bone.head.y, bone.head.z],
            tail: [bone.tail.x, bone.tail.y, bone.tail.z],
            length: bone.length(),
            influenced_vertices: influenced[index],
            dominant_vertices: dominant[index],
        })
        .collect();

    RigDiagnosticLog {
        output_path: output_path.display().to_string(),
        vertex_count: mesh.vertex_count(),
        face_count: mesh.face_count(),
        bone_count: skeleton.len(),
        bones,
        weights: report.clone(),
    }
}

pub fn write_rig_diagnostic_log(diagnostic_path: &Path, log: &RigDiagnosticLog) -> Result<()> {
    let content = serde_json::to_string_pretty(log).context("failed to serialize rig diagnostic")?;
    fs::write(diagnostic_path, content)
        .with_context(|| format!("failed to write diagnostic log: {}", diagnostic_path.display()))?;
    Ok(())
}

// ─── Manual review checklist ──────────────────────────────────────────────────

/// Markdown checklist. Items the quality checks already passed are ticked;
/// the deformation items need a human looking at the stress renders.
pub fn render_rig_checklist(
    quality: &QualityReport,
    weights: &WeightReport,
    issues: &[ValidationIssue],
) -> String {
    let passed = |name: &str| {
        quality
            .checks
            .iter()
            .any(|check| check.name == name && check.result == CheckResult::Pass)
    };
    let item = |done: bool, text: &str| format!("- [{}] {text}\n", if done { "x" } else { " " });

    let mut content = String::new();
    content.push_str(&format!("# Rig Review Checklist: {}\n\n", quality.character_name));
    content.push_str("## Rig Summary\n\n");
    content.push_str(&format!("- Source tool: `{}`\n", quality.source_tool.as_str()));
    content.push_str(&format!(
        "- Bones/Vertices: `{}` / `{}`\n",
        quality.bone_count, quality.vertex_count
    ));
    content.push_str(&format!("- Weight solver: `{}`\n", weights.tier.as_str()));
    content.push_str(&format!(
        "- Score: `{:.1}%` ({})\n\n",
        quality.overall_score,
        if quality.production_ready { "production ready" } else { "needs work" }
    ));

    content.push_str("## Must Have\n\n");
    content.push_str(&item(passed("Weight Coverage"), "All vertices weighted (>99% coverage)"));
    content.push_str(&item(false, "No clipping in rest pose (T-pose or A-pose)"));
    content.push_str(&item(false, "Proper deformation at shoulders (arms forward + up)"));
    content.push_str(&item(false, "Proper deformation at hips (squat pose)"));
    content.push_str(&item(false, "Proper deformation at elbows/knees (full bend)"));
    content.push_str(&item(false, "No candy-wrapper twist at forearms/shins"));
    content.push_str(&item(passed("Naming Convention"), "Consistent bone naming convention"));
    content.push_str(&item(passed("Bone Hierarchy"), "Single root bone"));
    content.push_str(&item(true, "Clean export to target format"));
    content.push_str("\n## Should Have\n\n");
    content.push_str(&item(passed("Symmetry"), "Symmetry (left/right bones match)"));
    content.push_str(&item(passed("Max Influences"), "Max 4 bone influences per vertex"));

    content.push_str("\n## Issues from Rigging\n\n");
    if issues.is_empty() {
        content.push_str("- None\n");
    } else {
        for issue in issues {
            content.push_str(&format!("- [{:?}] {}\n", issue.severity, issue.message));
        }
    }
    content
}

pub fn write_rig_checklist(
    checklist_path: &Path,
    quality: &QualityReport,
    weights: &WeightReport,
    issues: &[ValidationIssue],
) -> Result<()> {
    fs::write(checklist_path, render_rig_checklist(quality, weights, issues))
        .with_context(|| format!("failed to write rig checklist: {}", checklist_path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use nalgebra::Vector3;

    use super::*;
    use crate::rig::{
        quality::assess_rig,
        solver::WeightTier,
        types::Severity,
        weights::Influence,
    };
    use crate::settings::QualitySettings;
    use crate::test_support::tetrahedron;

    fn report() -> WeightReport {
        WeightReport {
            tier: WeightTier::CapsuleFallback,
            primary_coverage: 0.2,
            primary_error: None,
            gap_filled: 0,
            rescued: 1,
            cleaned: 0,
            truncated: 0,
            final_coverage: 1.0,
            max_influences: 2,
        }
    }

    fn rig() -> (Mesh, Skeleton, VertexWeightSet) {
        let mut skeleton = Skeleton::new();
        skeleton.add_bone("Hips", Vector3::zeros(), Vector3::z(), None).expect("hips");
        skeleton.add_bone("Spine", Vector3::z(), Vector3::z() * 2.0, Some("Hips")).expect("spine");
        let weights = VertexWeightSet::from_influences(vec![
            vec![Influence::new(0, 1.0)],
            vec![Influence::new(0, 0.7), Influence::new(1, 0.3)],
            vec![Influence::new(1, 1.0)],
            vec![Influence::new(1, 0.6), Influence::new(0, 0.4)],
        ]);
        (tetrahedron(), skeleton, weights)
    }

    #[test]
    fn given_weighted_rig_when_diagnosed_then_per_bone_counts_are_listed() {
        let (mesh, skeleton, weights) = rig();

        let log = build_rig_diagnostic(Path::new("out/hero.glb"), &mesh, &skeleton, &weights, &report());

        assert_eq!(log.bone_count, 2);
        assert_eq!(log.bones[0].influenced_vertices, 3);
        assert_eq!(log.bones[0].dominant_vertices, 2);
        assert_eq!(log.bones[1].parent_name.as_deref(), Some("Hips"));
        assert_eq!(log.bones[1].dominant_vertices, 2);
        assert_eq!(
            diagnostic_log_path_for_output(Path::new("out/hero.glb")),
            PathBuf::from("out/hero.diagnostic.json")
        );
    }

    #[test]
    fn given_quality_report_when_rendering_checklist_then_passed_items_are_ticked() {
        let (_, skeleton, weights) = rig();
        let quality = assess_rig("hero", &skeleton, Some(&weights), &QualitySettings::default());

        let issues = vec![ValidationIssue::new(Severity::Warning, "WEIGHTS_FALLBACK", "capsule weights used")];

        let checklist = render_rig_checklist(&quality, &report(), &issues);

        assert!(checklist.starts_with("# Rig Review Checklist: hero"));
        assert!(checklist.contains("- [Warning] capsule weights used"));
        assert!(checklist.contains("- [x] All vertices weighted (>99% coverage)"));
        assert!(checklist.contains("- [x] Single root bone"));
        assert!(checklist.contains("- [ ] Proper deformation at hips (squat pose)"));
        assert!(checklist.contains("capsule_fallback"));
    }

    #[test]
    fn given_diagnostic_when_written_then_json_file_parses() {
        let (mesh, skeleton, weights) = rig();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hero.diagnostic.json");
        let log = build_rig_diagnostic(&dir.path().join("hero.glb"), &mesh, &skeleton, &weights, &report());

        write_rig_diagnostic_log(&path, &log).expect("write");

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(value["bones"][0]["name"], "Hips");
        assert_eq!(value["weights"]["tier"], "capsule_fallback");
    }
}
