//! Skeleton synthesis, skin binding and export.

pub mod capsule;
pub mod diagnostic;
pub mod export;
pub mod heat;
pub mod preset;
pub mod proportion;
pub mod quality;
pub mod skeleton;
pub mod solver;
pub mod types;
pub mod weights;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::{
    error::{RigError, Stage},
    logging::ResultExt,
    mesh::{ImportSummary, Mesh, RepairReport, import::detect_format, import_mesh, repair_topology},
    settings::RigSettings,
};
use diagnostic::{build_rig_diagnostic, diagnostic_log_path_for_output, write_rig_checklist, write_rig_diagnostic_log};
use export::{ExportSummary, PROJECT_FORMAT_VERSION, RigProject, export_rig, project_path_for_output, write_project};
use preset::{CharacterPreset, PresetLibrary};
use proportion::{BodyProportions, analyze_proportions};
use quality::{QualityReport, assess_rig};
use skeleton::{Skeleton, synthesize_skeleton};
use solver::{WeightReport, WeightSolution, solve_weights};
use types::ValidationIssue;
use weights::VertexWeightSet;

// ─── Options & reports ────────────────────────────────────────────────────────

/// Inputs for one `rig_character` run.
#[derive(Debug, Clone)]
pub struct RigOptions {
    /// Character name, used to pick a preset.
    pub character: String,
    pub settings: RigSettings,
    pub presets: PresetLibrary,
    /// Write `{stem}.autorig.json` next to the output.
    pub write_project: bool,
    /// Write `{stem}.diagnostic.json` next to the output.
    pub write_diagnostic: bool,
    /// Markdown review checklist destination, if wanted.
    pub checklist_path: Option<PathBuf>,
}

impl Default for RigOptions {
    fn default() -> Self {
        Self {
            character: preset::DEFAULT_PRESET_NAME.to_string(),
            settings: RigSettings::default(),
            presets: PresetLibrary::builtin(),
            write_project: true,
            write_diagnostic: true,
            checklist_path: None,
        }
    }
}

/// Outcome of one rig run.
#[derive(Debug, Clone, Serialize)]
pub struct RigReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub character: String,
    pub preset: String,
    pub import: ImportSummary,
    pub repair: RepairReport,
    pub proportions: BodyProportions,
    pub bone_count: usize,
    pub weights: WeightReport,
    pub quality: QualityReport,
    pub export: ExportSummary,
    pub project_path: Option<PathBuf>,
    pub diagnostic_path: Option<PathBuf>,
    pub checklist_path: Option<PathBuf>,
    pub issues: Vec<ValidationIssue>,
}

/// In-memory result of rigging a mesh.
#[derive(Debug, Clone)]
pub struct RiggedCharacter {
    pub mesh: Mesh,
    pub skeleton: Skeleton,
    pub weights: VertexWeightSet,
    pub proportions: BodyProportions,
    pub preset: String,
    pub repair: RepairReport,
    pub weight_report: WeightReport,
    pub quality: QualityReport,
    pub issues: Vec<ValidationIssue>,
}

// ─── Per-job context ──────────────────────────────────────────────────────────

/// State for one rig run: settings, the chosen preset and the issues
/// collected along the way. Each stage takes and returns explicit values.
pub struct RigJob<'a> {
    character: String,
    settings: &'a RigSettings,
    preset_name: String,
    preset: CharacterPreset,
    issues: Vec<ValidationIssue>,
}

impl<'a> RigJob<'a> {
    pub fn new(character: &str, settings: &'a RigSettings, presets: &PresetLibrary) -> Self {
        let (preset_name, preset) = presets.resolve(character);
        Self {
            character: character.to_string(),
            settings,
            preset_name,
            preset,
            issues: Vec::new(),
        }
    }

    pub fn preset_name(&self) -> &str {
        &self.preset_name
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn repair(&mut self, mesh: Mesh) -> (Mesh, RepairReport) {
        repair_topology(mesh, &self.settings.repair, &self.settings.remesh, &mut self.issues)
    }

    pub fn measure(&self, mesh: &Mesh) -> Result<BodyProportions, RigError> {
        analyze_proportions(mesh)
            .filter(|body| body.height > f32::EPSILON)
            .ok_or(RigError::EmptyMesh {
                stage: Stage::Proportion,
            })
    }

    pub fn synthesize(&self, body: &BodyProportions) -> Result<Skeleton, RigError> {
        synthesize_skeleton(body, &self.preset).map_err(|error| RigError::InvalidSkeleton {
            stage: Stage::Skeleton,
            message: error.to_string(),
        })
    }

    pub fn bind(&mut self, mesh: &Mesh, skeleton: &Skeleton) -> Result<WeightSolution, RigError> {
        solve_weights(mesh, skeleton, &self.settings.weights, &mut self.issues)
    }

    pub fn assess(&self, skeleton: &Skeleton, weights: &VertexWeightSet) -> QualityReport {
        assess_rig(&self.character, skeleton, Some(weights), &self.settings.quality)
    }

    /// Repair, measure, build the skeleton, bind and assess.
    pub fn run(mut self, mesh: Mesh) -> Result<RiggedCharacter, RigError> {
        let (mesh, repair) = self.repair(mesh);
        if mesh.is_empty() {
            return Err(RigError::EmptyMesh { stage: Stage::Repair });
        }
        let proportions = self.measure(&mesh)?;
        info!(
            height = proportions.height,
            width = proportions.width,
            depth = proportions.depth,
            "body measured"
        );
        let skeleton = self.synthesize(&proportions)?;
        info!(bones = skeleton.len(), preset = %self.preset_name, "skeleton synthesized");
        let WeightSolution { weights, report } = self.bind(&mesh, &skeleton)?;
        let quality = self.assess(&skeleton, &weights);
        info!(
            score = quality.overall_score,
            production_ready = quality.production_ready,
            "rig quality assessed"
        );
        Ok(RiggedCharacter {
            mesh,
            skeleton,
            weights,
            proportions,
            preset: self.preset_name,
            repair,
            weight_report: report,
            quality,
            issues: self.issues,
        })
    }
}

// ─── Public API ───────────────────────────────────────────────────────────────

/// Rig an already-imported mesh in memory.
pub fn rig_mesh(
    mesh: Mesh,
    character: &str,
    settings: &RigSettings,
    presets: &PresetLibrary,
) -> Result<RiggedCharacter, RigError> {
    RigJob::new(character, settings, presets).run(mesh)
}

/// Import `input`, rig it, and write the result to `output` plus any
/// requested sidecar files.
pub fn rig_character(input: &Path, output: &Path, options: &RigOptions) -> Result<RigReport> {
    // Reject an unusable output path before doing any work.
    detect_format(output, Stage::Export)?;

    let (mesh, import) = import_mesh(input, options.settings.repair.fine_weld_distance)
        .with_context(|| format!("failed to import mesh: {}", input.display()))?;
    let rigged = rig_mesh(mesh, &options.character, &options.settings, &options.presets)
        .with_context(|| format!("failed to rig character '{}'", options.character))?;

    let export = export_rig(output, &rigged.mesh, &rigged.skeleton, &rigged.weights)
        .with_context(|| format!("failed to export rig: {}", output.display()))?;

    let project_path = if options.write_project {
        let path = project_path_for_output(output);
        let project = RigProject {
            format_version: PROJECT_FORMAT_VERSION,
            character: options.character.clone(),
            preset: rigged.preset.clone(),
            mesh: rigged.mesh.clone(),
            skeleton: rigged.skeleton.clone(),
            weights: rigged.weights.clone(),
            tier: rigged.weight_report.tier,
        };
        write_project(&path, &project).with_context(|| format!("failed to write project: {}", path.display()))?;
        Some(path)
    } else {
        None
    };

    let diagnostic_path = if options.write_diagnostic {
        let path = diagnostic_log_path_for_output(output);
        let log = build_rig_diagnostic(output, &rigged.mesh, &rigged.skeleton, &rigged.weights, &rigged.weight_report);
        write_rig_diagnostic_log(&path, &log)
            .warn_and_continue("diagnostic log")
            .map(|()| path)
    } else {
        None
    };

    if let Some(path) = &options.checklist_path {
        write_rig_checklist(path, &rigged.quality, &rigged.weight_report, &rigged.issues)?;
    }

    info!(output = %output.display(), "rigging complete");
    Ok(RigReport {
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        character: options.character.clone(),
        preset: rigged.preset,
        import,
        repair: rigged.repair,
        proportions: rigged.proportions,
        bone_count: rigged.skeleton.len(),
        weights: rigged.weight_report,
        quality: rigged.quality,
        export,
        project_path,
        diagnostic_path,
        checklist_path: options.checklist_path.clone(),
        issues: rigged.issues,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use nalgebra::Vector3;

    use super::*;
    use crate::mesh::obj::write_obj;
    use crate::rig::{
        solver::WeightTier,
        types::SYNTHESIZED_BONE_COUNT,
        weights::MAX_INFLUENCES,
    };
    use crate::test_support::{closed_box, humanoid_soup};

    fn humanoid_settings() -> RigSettings {
        let mut settings = RigSettings::default();
        settings.repair.face_budget = 20_000;
        settings.remesh.voxel_size = 4.0;
        settings.remesh.min_resolution = 24;
        settings
    }

    #[test]
    fn given_noisy_humanoid_when_rigged_as_child_then_rig_is_complete() {
        let settings = humanoid_settings();

        let rigged = rig_mesh(humanoid_soup(21), "child", &settings, &PresetLibrary::builtin()).expect("rig");

        assert!(rigged.mesh.is_manifold());
        assert!(rigged.repair.remeshed);
        assert_eq!(rigged.preset, "child");
        assert_eq!(rigged.skeleton.len(), SYNTHESIZED_BONE_COUNT);
        assert_eq!(rigged.weights.vertex_count(), rigged.mesh.vertex_count());
        assert!(rigged.weights.invalid_vertices(MAX_INFLUENCES).is_empty());
        assert_eq!(rigged.weight_report.final_coverage, 1.0);
        assert!(rigged.skeleton.max_mirror_deviation(rigged.proportions.center_x) < 1e-3);
    }

    #[test]
    fn given_unknown_character_when_rigged_then_default_preset_is_used() {
        let mut settings = RigSettings::default();
        settings.remesh.voxel_size = 0.5;

        let rigged = rig_mesh(
            closed_box(Vector3::new(-5.0, -3.0, 0.0), Vector3::new(5.0, 3.0, 20.0), 3),
            "stranger",
            &settings,
            &PresetLibrary::builtin(),
        )
        .expect("rig");

        assert_eq!(rigged.preset, "default");
        assert_eq!(rigged.weight_report.final_coverage, 1.0);
    }

    #[test]
    fn given_empty_mesh_when_rigged_then_error_is_fatal() {
        let error = rig_mesh(Mesh::new("empty"), "hero", &RigSettings::default(), &PresetLibrary::builtin())
            .expect_err("empty");

        assert!(matches!(error, RigError::EmptyMesh { .. }));
    }

    #[test]
    fn given_unsupported_output_when_rigging_then_nothing_is_imported() {
        let error = rig_character(Path::new("/nonexistent/in.obj"), Path::new("out.fbx"), &RigOptions::default())
            .expect_err("unsupported");

        let rig_error = error.downcast_ref::<RigError>().expect("typed error");
        assert!(matches!(rig_error, RigError::UnsupportedFormat { stage: Stage::Export, .. }));
    }

    #[test]
    fn given_obj_input_when_rigged_to_glb_then_sidecars_are_written() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("hero.obj");
        let output = dir.path().join("hero.glb");
        let checklist = dir.path().join("hero_checklist.md");
        let file = fs::File::create(&input).expect("create obj");
        write_obj(&humanoid_soup(4), file).expect("write obj");
        let options = RigOptions {
            character: "leo".to_string(),
            settings: humanoid_settings(),
            checklist_path: Some(checklist.clone()),
            ..RigOptions::default()
        };

        let report = rig_character(&input, &output, &options).expect("rig");

        assert!(output.exists());
        assert!(checklist.exists());
        assert_eq!(report.project_path, Some(dir.path().join("hero.autorig.json")));
        assert_eq!(report.diagnostic_path, Some(dir.path().join("hero.diagnostic.json")));
        assert_eq!(report.bone_count, SYNTHESIZED_BONE_COUNT);
        assert_eq!(report.export.bones, SYNTHESIZED_BONE_COUNT);
        assert!(matches!(report.weights.tier, WeightTier::HeatDiffusion | WeightTier::CapsuleFallback));
        let project = export::load_project(&dir.path().join("hero.autorig.json")).expect("project");
        assert_eq!(project.preset, "leo");
    }
}
