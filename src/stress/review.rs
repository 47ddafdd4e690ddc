use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use super::{PoseFlag, StressReport};
use crate::rig::quality::CheckResult;

pub const REVIEW_MANIFEST_FILE: &str = "manifest.json";

/// A batch of renders plus the metadata a reviewer needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewSubmission {
    pub character_name: String,
    pub rigging_tool: String,
    pub notes: String,
    /// Render file stems, sorted like `images`.
    pub pose_names: Vec<String>,
    #[serde(skip)]
    pub images: Vec<PathBuf>,
}

impl ReviewSubmission {
    /// Every rendered image of `report`, sorted by file name.
    pub fn from_report(report: &StressReport) -> Self {
        let mut images: Vec<PathBuf> = report
            .poses
            .iter()
            .flat_map(|outcome| outcome.images.iter().cloned())
            .collect();
        images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        let pose_names = images
            .iter()
            .filter_map(|path| path.file_stem().and_then(|stem| stem.to_str()))
            .map(ToOwned::to_owned)
            .collect();
        Self {
            character_name: report.character_name.clone(),
            rigging_tool: report.rigging_tool.clone(),
            notes: report.notes.clone(),
            pose_names,
            images,
        }
    }
}

/// Destination for stress-test renders.
pub trait ReviewSink {
    /// Deliver the submission. Returns where its manifest ended up.
    fn submit(&self, submission: &ReviewSubmission) -> Result<PathBuf>;
}

/// Review "upload" into a plain directory: the renders are copied next to a
/// `manifest.json`.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[derive(Serialize)]
struct ReviewManifest<'a> {
    #[serde(flatten)]
    submission: &'a ReviewSubmission,
    images: Vec<String>,
}

impl ReviewSink for DirectorySink {
    fn submit(&self, submission: &ReviewSubmission) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create review directory: {}", self.root.display()))?;
        let mut images = Vec::with_capacity(submission.images.len());
        for image in &submission.images {
            let file_name = image
                .file_name()
                .with_context(|| format!("render path has no file name: {}", image.display()))?;
            let target = self.root.join(file_name);
            if image != &target {
                fs::copy(image, &target)
                    .with_context(|| format!("failed to copy render: {}", image.display()))?;
            }
            images.push(file_name.to_string_lossy().into_owned());
        }

        let manifest_path = self.root.join(REVIEW_MANIFEST_FILE);
        let manifest = ReviewManifest { submission, images };
        let content = serde_json::to_string_pretty(&manifest).context("failed to serialize review manifest")?;
        fs::write(&manifest_path, content)
            .with_context(|| format!("failed to write review manifest: {}", manifest_path.display()))?;
        info!(
            renders = submission.images.len(),
            destination = %self.root.display(),
            "renders submitted for review"
        );
        Ok(manifest_path)
    }
}

fn flag_label(flag: PoseFlag) -> &'static str {
    match flag {
        PoseFlag::NoBonesFound => "no bones found",
        PoseFlag::RenderFailed => "render failed",
        PoseFlag::StaleEvaluation => "stale evaluation",
        PoseFlag::Exploded => "exploded vertices",
        PoseFlag::NonFinite => "non-finite vertices",
        PoseFlag::FrozenBones => "frozen bones",
        PoseFlag::CoverageHoles => "unweighted vertices",
    }
}

/// Markdown review sheet: one section per pose with its renders and flags,
/// followed by the manual deformation checks.
pub fn render_stress_checklist(report: &StressReport) -> String {
    let mut content = String::new();
    content.push_str(&format!("# Stress Test Review: {}\n\n", report.character_name));
    content.push_str(&format!("- Source: `{}`\n", report.input.display()));
    content.push_str(&format!("- Rigging tool: `{}`\n", report.rigging_tool));
    content.push_str(&format!(
        "- Bones/Vertices: `{}` / `{}`\n",
        report.bone_count, report.vertex_count
    ));
    content.push_str(&format!(
        "- Quality score: `{:.1}%` ({})\n",
        report.quality.overall_score,
        if report.quality.production_ready { "production ready" } else { "needs work" }
    ));
    if !report.notes.is_empty() {
        content.push_str(&format!("- Notes: {}\n", report.notes));
    }
    content.push('\n');

    for outcome in &report.poses {
        content.push_str(&format!("## {}\n\n", outcome.pose));
        if !outcome.description.is_empty() {
            content.push_str(&format!("{}\n\n", outcome.description));
        }
        content.push_str(&format!(
            "- Height: `{:.2}` (rest `{:.2}`)\n",
            outcome.height, outcome.rest_height
        ));
        if outcome.flags.is_empty() {
            content.push_str("- Flags: none\n");
        } else {
            let labels: Vec<&str> = outcome.flags.iter().map(|flag| flag_label(*flag)).collect();
            content.push_str(&format!("- Flags: **{}**\n", labels.join(", ")));
        }
        if !outcome.missing.is_empty() {
            let missing: Vec<&str> = outcome.missing.iter().map(|joint| joint.as_str()).collect();
            content.push_str(&format!("- Missing bones: {}\n", missing.join(", ")));
        }
        if !outcome.frozen_bones.is_empty() {
            content.push_str(&format!("- Frozen bones: {}\n", outcome.frozen_bones.join(", ")));
        }
        if let Some(error) = &outcome.error {
            content.push_str(&format!("- Error: {error}\n"));
        }
        for image in &outcome.images {
            if let Some(file_name) = image.file_name().and_then(|name| name.to_str()) {
                content.push_str(&format!("\n![{file_name}]({file_name})\n"));
            }
        }
        content.push('\n');
    }

    content.push_str("## Manual Checks\n\n");
    content.push_str("- [ ] No clipping in rest pose\n");
    content.push_str("- [ ] Shoulders hold volume with arms overhead\n");
    content.push_str("- [ ] Hips and groin hold shape in the deep squat\n");
    content.push_str("- [ ] No candy-wrapper twist in the spine twist\n");
    content.push_str("- [ ] Neck and jaw deform cleanly in the head turn\n");
    let failed: Vec<&str> = report
        .quality
        .checks
        .iter()
        .filter(|check| check.result == CheckResult::Fail)
        .map(|check| check.name.as_str())
        .collect();
    if !failed.is_empty() {
        content.push_str(&format!("\nFailed quality checks: {}\n", failed.join(", ")));
    }
    content
}

pub fn write_stress_checklist(path: &Path, report: &StressReport) -> Result<()> {
    fs::write(path, render_stress_checklist(report))
        .with_context(|| format!("failed to write stress checklist: {}", path.display()))?;
    Ok(())
}
