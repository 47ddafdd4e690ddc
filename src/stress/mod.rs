//! Stress-pose validation of a rigged character.
//!
//! A `PoseSession` drives one rig through `REST → POSED → EVALUATED →
//! RENDERED` per pose; `run_stress_test` batches the pose library, measures
//! each deformation, and writes renders plus a JSON report.

pub mod pose;
pub mod render;
pub mod review;
pub mod rig;

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use nalgebra::Vector3;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, trace, warn};

use self::{
    pose::{BoneAliasTable, Joint, StressPose, load_pose_library, standard_pose_library},
    render::{RenderError, Renderer},
    review::{DirectorySink, ReviewSink, ReviewSubmission, write_stress_checklist},
    rig::PoseRig,
};
use crate::{
    logging::ResultExt,
    mesh::Aabb,
    rig::{
        quality::{QualityReport, assess_rig},
        skeleton::BoneId,
    },
    settings::RigSettings,
};

pub const STRESS_REPORT_FILE: &str = "stress_report.json";
pub const STRESS_CHECKLIST_FILE: &str = "stress_review.md";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidatorState {
    Rest,
    Posed,
    Evaluated,
    Rendered,
}

impl fmt::Display for ValidatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValidatorState::Rest => "REST",
            ValidatorState::Posed => "POSED",
            ValidatorState::Evaluated => "EVALUATED",
            ValidatorState::Rendered => "RENDERED",
        })
    }
}

/// Per-pose failures; the batch records them and moves on.
#[derive(Error, Debug)]
pub enum StressError {
    #[error("cannot {operation} in state {state}")]
    InvalidTransition {
        operation: &'static str,
        state: ValidatorState,
    },

    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Which joints of a pose were found on the rig.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoseApplication {
    /// Joint and the bone it resolved to.
    pub applied: Vec<(Joint, String)>,
    pub missing: Vec<Joint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub positions: Vec<Vector3<f32>>,
    /// The second evaluation disagreed with the first.
    pub stale: bool,
}

/// Drives one rig through the validator states.
pub struct PoseSession<'a> {
    rig: &'a mut PoseRig,
    aliases: &'a BoneAliasTable,
    state: ValidatorState,
    evaluation: Option<Evaluation>,
}

impl<'a> PoseSession<'a> {
    pub fn new(rig: &'a mut PoseRig, aliases: &'a BoneAliasTable) -> Self {
        rig.reset();
        Self {
            rig,
            aliases,
            state: ValidatorState::Rest,
            evaluation: None,
        }
    }

    pub fn state(&self) -> ValidatorState {
        self.state
    }

    pub fn rig(&self) -> &PoseRig {
        self.rig
    }

    /// Back to the rest pose from any state.
    pub fn reset(&mut self) {
        self.rig.reset();
        self.evaluation = None;
        self.state = ValidatorState::Rest;
    }

    fn expect_state(&self, expected: ValidatorState, operation: &'static str) -> Result<(), StressError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(StressError::InvalidTransition {
                operation,
                state: self.state,
            })
        }
    }

    /// Apply `pose` on top of a clean rest pose. Joints with no matching bone
    /// are reported, not fatal.
    pub fn apply_pose(&mut self, pose: &StressPose) -> Result<PoseApplication, StressError> {
        self.expect_state(ValidatorState::Rest, "apply a pose")?;
        self.rig.reset();
        let mut application = PoseApplication::default();
        for (joint, rotation) in &pose.rotations {
            match self.aliases.resolve(self.rig.skeleton(), *joint) {
                Some(bone) => {
                    self.rig.set_rotation(bone, rotation.to_rotation());
                    let name = bone_name(self.rig, bone);
                    trace!(pose = %pose.name, ?joint, bone = %name, "joint rotated");
                    application.applied.push((*joint, name));
                }
                None => application.missing.push(*joint),
            }
        }
        if !application.missing.is_empty() {
            let missing: Vec<&str> = application.missing.iter().map(Joint::as_str).collect();
            warn!(pose = %pose.name, missing = ?missing, "could not find bones");
        }
        self.state = ValidatorState::Posed;
        Ok(application)
    }

    /// Forward kinematics and skinning, run twice; a mismatch marks the
    /// result stale.
    pub fn evaluate(&mut self) -> Result<&Evaluation, StressError> {
        self.expect_state(ValidatorState::Posed, "evaluate")?;
        let positions = self.rig.skin();
        let again = self.rig.skin();
        let stale = positions != again;
        if stale {
            warn!("pose evaluation is not stable between passes");
        }
        self.state = ValidatorState::Evaluated;
        Ok(self.evaluation.insert(Evaluation { positions, stale }))
    }

    /// Render the evaluated pose from every configured angle.
    pub fn render(
        &mut self,
        renderer: &Renderer,
        output_dir: &Path,
        pose_name: &str,
        framing: &Aabb,
        flagged: bool,
    ) -> Result<Vec<PathBuf>, StressError> {
        self.expect_state(ValidatorState::Evaluated, "render")?;
        let Some(evaluation) = &self.evaluation else {
            return Err(StressError::InvalidTransition {
                operation: "render",
                state: self.state,
            });
        };
        if let Some(bounds) = finite_bounds(&evaluation.positions) {
            info!(
                pose = pose_name,
                min = ?[bounds.min.x, bounds.min.y, bounds.min.z],
                max = ?[bounds.max.x, bounds.max.y, bounds.max.z],
                "posed world bounds"
            );
        }
        let paths = renderer.render_views(
            output_dir,
            pose_name,
            &evaluation.positions,
            &self.rig.mesh().faces,
            framing,
            flagged,
        )?;
        self.state = ValidatorState::Rendered;
        Ok(paths)
    }
}

fn bone_name(rig: &PoseRig, bone: BoneId) -> String {
    rig.skeleton()
        .bone(bone)
        .map(|bone| bone.name.clone())
        .unwrap_or_default()
}

fn finite_bounds(positions: &[Vector3<f32>]) -> Option<Aabb> {
    Aabb::from_points(positions.iter().filter(|position| position.iter().all(|value| value.is_finite())))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseFlag {
    /// The pose rotates joints but none resolved to a bone.
    NoBonesFound,
    RenderFailed,
    StaleEvaluation,
    /// Vertices left the inflated rest bounds.
    Exploded,
    NonFinite,
    /// A rotated bone's own vertices did not move.
    FrozenBones,
    CoverageHoles,
}

/// Measurements and artifacts of one stress pose.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoseOutcome {
    pub pose: String,
    pub description: String,
    pub applied: Vec<(Joint, String)>,
    pub missing: Vec<Joint>,
    pub bounds: Option<Aabb>,
    pub height: f32,
    pub rest_height: f32,
    pub non_finite_vertices: usize,
    pub exploded_vertices: usize,
    pub frozen_bones: Vec<String>,
    pub coverage_holes: usize,
    pub images: Vec<PathBuf>,
    pub flags: Vec<PoseFlag>,
    pub error: Option<String>,
}

impl PoseOutcome {
    fn new(pose: &StressPose, rest_height: f32) -> Self {
        Self {
            pose: pose.name.clone(),
            description: pose.description.clone(),
            applied: Vec::new(),
            missing: Vec::new(),
            bounds: None,
            height: 0.0,
            rest_height,
            non_finite_vertices: 0,
            exploded_vertices: 0,
            frozen_bones: Vec::new(),
            coverage_holes: 0,
            images: Vec::new(),
            flags: Vec::new(),
            error: None,
        }
    }

    pub fn is_flagged(&self) -> bool {
        !self.flags.is_empty()
    }
}

/// Inputs shared by every pose of one batch.
struct PoseContext<'a> {
    renderer: &'a Renderer,
    output_dir: &'a Path,
    rest_bounds: Aabb,
    explode_margin: f32,
    coverage_holes: usize,
}

impl PoseContext<'_> {
    fn rest_height(&self) -> f32 {
        self.rest_bounds.extent().z
    }
}

/// Fill in the measurements of an evaluated pose and set its flags.
fn measure_pose(
    rig: &PoseRig,
    application: &PoseApplication,
    pose: &StressPose,
    evaluation: &Evaluation,
    context: &PoseContext<'_>,
    outcome: &mut PoseOutcome,
) {
    let rest_height = context.rest_height();
    let positions = &evaluation.positions;
    outcome.bounds = finite_bounds(positions);
    outcome.height = outcome.bounds.map_or(0.0, |bounds| bounds.extent().z);
    outcome.non_finite_vertices = positions
        .iter()
        .filter(|position| !position.iter().all(|value| value.is_finite()))
        .count();
    let limit = context.rest_bounds.inflated(context.explode_margin * rest_height);
    outcome.exploded_vertices = positions
        .iter()
        .filter(|position| position.iter().all(|value| value.is_finite()) && !limit.contains(position))
        .count();
    outcome.coverage_holes = context.coverage_holes;

    // A rotated bone is frozen when none of the vertices it dominates moved.
    let still = (rest_height * 1e-4).max(1e-6);
    let weights = rig.weights();
    for (joint, name) in &application.applied {
        let Some(rotation) = pose.rotations.get(joint) else {
            continue;
        };
        let Some(bone) = rig.skeleton().find(name) else {
            continue;
        };
        if rotation.is_zero() {
            continue;
        }
        let mut dominated = 0;
        let mut moved = 0.0f32;
        for (vertex, (posed, rest)) in positions.iter().zip(&rig.mesh().positions).enumerate() {
            if weights.dominant_bone(vertex) == Some(bone) {
                dominated += 1;
                moved = moved.max((posed - rest).norm());
            }
        }
        if dominated > 0 && moved <= still && !outcome.frozen_bones.contains(name) {
            outcome.frozen_bones.push(name.clone());
        }
    }

    let mut flags = Vec::new();
    if !pose.rotations.is_empty() && application.applied.is_empty() {
        flags.push(PoseFlag::NoBonesFound);
    }
    if evaluation.stale {
        flags.push(PoseFlag::StaleEvaluation);
    }
    if outcome.non_finite_vertices > 0 {
        flags.push(PoseFlag::NonFinite);
    }
    if outcome.exploded_vertices > 0 {
        flags.push(PoseFlag::Exploded);
    }
    if !outcome.frozen_bones.is_empty() {
        flags.push(PoseFlag::FrozenBones);
    }
    if outcome.coverage_holes > 0 {
        flags.push(PoseFlag::CoverageHoles);
    }
    outcome.flags = flags;
}

fn run_pose_cycle(
    session: &mut PoseSession<'_>,
    pose: &StressPose,
    context: &PoseContext<'_>,
    outcome: &mut PoseOutcome,
) -> Result<(), StressError> {
    let application = session.apply_pose(pose)?;
    outcome.applied = application.applied.clone();
    outcome.missing = application.missing.clone();
    let evaluation = session.evaluate()?.clone();
    measure_pose(session.rig(), &application, pose, &evaluation, context, outcome);
    let flagged = outcome.is_flagged();
    outcome.images = session.render(context.renderer, context.output_dir, &pose.name, &context.rest_bounds, flagged)?;
    Ok(())
}

/// One full pose cycle. Errors are recorded on the outcome and the session
/// always ends back at rest.
fn stress_pose(session: &mut PoseSession<'_>, pose: &StressPose, context: &PoseContext<'_>) -> PoseOutcome {
    info!(pose = %pose.name, description = %pose.description, "stress pose");
    let mut outcome = PoseOutcome::new(pose, context.rest_height());
    if let Err(error) = run_pose_cycle(session, pose, context, &mut outcome) {
        warn!(pose = %pose.name, %error, "stress pose failed");
        outcome.flags.push(PoseFlag::RenderFailed);
        outcome.error = Some(error.to_string());
    }
    session.reset();
    if outcome.is_flagged() {
        warn!(pose = %pose.name, flags = ?outcome.flags, "stress pose flagged");
    }
    outcome
}

#[derive(Debug, Clone)]
pub struct StressTestOptions {
    pub output_dir: PathBuf,
    /// `all` or a comma-separated list of pose names.
    pub poses: String,
    pub character: Option<String>,
    /// Rigging tool reported to the review sink; detected from bone names when unset.
    pub rigging_tool: Option<String>,
    pub notes: String,
    pub pose_file: Option<PathBuf>,
    pub review_dir: Option<PathBuf>,
    pub settings: RigSettings,
}

impl Default for StressTestOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("stress_test_renders"),
            poses: pose::ALL_POSES.to_string(),
            character: None,
            rigging_tool: None,
            notes: String::new(),
            pose_file: None,
            review_dir: None,
            settings: RigSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StressReport {
    pub input: PathBuf,
    pub character_name: String,
    pub rigging_tool: String,
    pub notes: String,
    pub device: String,
    pub output_dir: PathBuf,
    pub bone_count: usize,
    pub vertex_count: usize,
    pub rest_height: f32,
    pub poses: Vec<PoseOutcome>,
    pub flagged_poses: Vec<String>,
    pub rendered_images: usize,
    pub quality: QualityReport,
    pub review_manifest: Option<PathBuf>,
    pub checklist_path: PathBuf,
    pub report_path: PathBuf,
}

/// Load a rigged character and run the selected stress poses against it.
pub fn run_stress_test(rigged_path: &Path, options: &StressTestOptions) -> Result<StressReport> {
    let mut rig = PoseRig::load(rigged_path)?;
    let library = match &options.pose_file {
        Some(path) => load_pose_library(path)?,
        None => standard_pose_library(),
    };
    let poses: Vec<StressPose> = library.select(&options.poses).into_iter().cloned().collect();
    if poses.is_empty() {
        bail!("no stress poses selected by '{}'", options.poses);
    }

    fs::create_dir_all(&options.output_dir)
        .with_context(|| format!("failed to create output directory: {}", options.output_dir.display()))?;
    let renderer = Renderer::new(&options.settings.stress).context("failed to set up the renderer")?;
    let rest_bounds = rig.rest_bounds().ok_or(RenderError::NoFraming)?;

    let character_name = options.character.clone().unwrap_or_else(|| rig.name());
    let quality = assess_rig(
        &character_name,
        rig.skeleton(),
        Some(rig.weights()),
        &options.settings.quality,
    );
    let rigging_tool = options
        .rigging_tool
        .clone()
        .unwrap_or_else(|| quality.source_tool.as_str().to_string());
    let min_influence = options.settings.weights.heat.min_influence;
    let coverage_holes = rig.weights().uncovered(min_influence).len();
    if coverage_holes > 0 {
        warn!(vertices = coverage_holes, "rig has unweighted vertices");
    }
    info!(
        character = %character_name,
        bones = rig.skeleton().len(),
        device = renderer.device().as_str(),
        poses = poses.len(),
        "starting stress test"
    );

    let (bone_count, vertex_count) = (rig.skeleton().len(), rig.mesh().vertex_count());
    let context = PoseContext {
        renderer: &renderer,
        output_dir: &options.output_dir,
        rest_bounds,
        explode_margin: options.settings.stress.explode_margin,
        coverage_holes,
    };
    let outcomes: Vec<PoseOutcome> = {
        let mut session = PoseSession::new(&mut rig, library.aliases());
        let outcomes = poses
            .iter()
            .map(|pose| stress_pose(&mut session, pose, &context))
            .collect();
        session.reset();
        outcomes
    };

    let flagged_poses: Vec<String> = outcomes
        .iter()
        .filter(|outcome| outcome.is_flagged())
        .map(|outcome| outcome.pose.clone())
        .collect();
    let rendered_images = outcomes.iter().map(|outcome| outcome.images.len()).sum();
    info!(
        rendered_images,
        flagged = flagged_poses.len(),
        output = %options.output_dir.display(),
        "stress test finished"
    );

    let mut report = StressReport {
        input: rigged_path.to_path_buf(),
        character_name,
        rigging_tool,
        notes: options.notes.clone(),
        device: renderer.device().as_str().to_string(),
        output_dir: options.output_dir.clone(),
        bone_count,
        vertex_count,
        rest_height: context.rest_height(),
        poses: outcomes,
        flagged_poses,
        rendered_images,
        quality,
        review_manifest: None,
        checklist_path: options.output_dir.join(STRESS_CHECKLIST_FILE),
        report_path: options.output_dir.join(STRESS_REPORT_FILE),
    };

    write_stress_checklist(&report.checklist_path, &report)?;
    if let Some(review_dir) = &options.review_dir {
        let submission = ReviewSubmission::from_report(&report);
        report.review_manifest = DirectorySink::new(review_dir)
            .submit(&submission)
            .warn_and_continue("review upload");
    }
    let content = serde_json::to_string_pretty(&report).context("failed to serialize stress report")?;
    fs::write(&report.report_path, content)
        .with_context(|| format!("failed to write stress report: {}", report.report_path.display()))?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::{
        capsule::solve_capsule_weights,
        export::export_rig,
        preset::DEFAULT_PRESET,
        proportion::analyze_proportions,
        skeleton::{Skeleton, synthesize_skeleton},
    };
    use crate::settings::CapsuleSettings;
    use crate::test_support::humanoid_soup;

    fn humanoid_rig() -> PoseRig {
        let mesh = humanoid_soup(3);
        let proportions = analyze_proportions(&mesh).expect("proportions");
        let skeleton = synthesize_skeleton(&proportions, &DEFAULT_PRESET).expect("skeleton");
        let weights = solve_capsule_weights(&mesh.positions, &skeleton, &CapsuleSettings::default(), 4);
        let rest_worlds = skeleton.rest_worlds();
        PoseRig::new("hero.glb", mesh, skeleton, weights, rest_worlds).expect("rig")
    }

    fn small_options(output_dir: &Path) -> StressTestOptions {
        let mut settings = RigSettings::default();
        settings.stress.width = 48;
        settings.stress.height = 36;
        settings.stress.supersample = 1;
        StressTestOptions {
            output_dir: output_dir.to_path_buf(),
            settings,
            ..StressTestOptions::default()
        }
    }

    #[test]
    fn given_deep_squat_when_evaluated_then_height_drops_and_positions_stay_finite() {
        let mut rig = humanoid_rig();
        let rest_height = rig.rest_bounds().expect("bounds").extent().z;
        let library = standard_pose_library();
        let mut session = PoseSession::new(&mut rig, library.aliases());

        let application = session
            .apply_pose(library.get("deep_squat").expect("pose"))
            .expect("apply");
        let evaluation = session.evaluate().expect("evaluate");

        assert_eq!(application.applied.len(), 4);
        assert!(application.missing.is_empty());
        assert!(!evaluation.stale);
        assert!(evaluation.positions.iter().all(|p| p.iter().all(|v| v.is_finite())));
        let height = finite_bounds(&evaluation.positions).expect("bounds").extent().z;
        assert!(height < rest_height * 0.95, "height {height} vs rest {rest_height}");
    }

    #[test]
    fn given_arms_overhead_then_reset_when_spine_twist_applied_then_result_matches_fresh_twist() {
        let library = standard_pose_library();
        let twist = library.get("spine_twist").expect("twist");

        let mut fresh_rig = humanoid_rig();
        let expected = {
            let mut session = PoseSession::new(&mut fresh_rig, library.aliases());
            session.apply_pose(twist).expect("apply");
            session.evaluate().expect("evaluate").positions.clone()
        };

        let mut rig = humanoid_rig();
        let mut session = PoseSession::new(&mut rig, library.aliases());
        session.apply_pose(library.get("arms_overhead").expect("overhead")).expect("apply");
        session.evaluate().expect("evaluate");
        session.reset();
        assert!(session.rig().is_at_rest());
        session.apply_pose(twist).expect("apply twist");
        let actual = session.evaluate().expect("evaluate").positions.clone();

        assert_eq!(actual, expected);
    }

    #[test]
    fn given_wrong_state_when_operating_then_invalid_transition_is_returned() {
        let mut rig = humanoid_rig();
        let library = standard_pose_library();
        let mut session = PoseSession::new(&mut rig, library.aliases());

        let error = session.evaluate().expect_err("not posed");
        assert!(matches!(
            error,
            StressError::InvalidTransition { state: ValidatorState::Rest, .. }
        ));

        session.apply_pose(library.get("t_pose").expect("pose")).expect("apply");
        let error = session
            .apply_pose(library.get("t_pose").expect("pose"))
            .expect_err("already posed");
        assert!(matches!(
            error,
            StressError::InvalidTransition { state: ValidatorState::Posed, .. }
        ));
    }

    #[test]
    fn given_rig_without_matching_bones_when_posed_then_no_bones_found_is_flagged_and_rendered() {
        let mut skeleton = Skeleton::new();
        skeleton
            .add_bone("pelvis", Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 10.0), None)
            .expect("bone");
        let mesh = crate::test_support::closed_box(Vector3::new(-2.0, -2.0, 0.0), Vector3::new(2.0, 2.0, 10.0), 1);
        let weights = solve_capsule_weights(&mesh.positions, &skeleton, &CapsuleSettings::default(), 4);
        let rest_worlds = skeleton.rest_worlds();
        let mut rig = PoseRig::new("blob.glb", mesh, skeleton, weights, rest_worlds).expect("rig");
        let dir = tempfile::tempdir().expect("tempdir");
        let options = small_options(dir.path());
        let renderer = Renderer::new(&options.settings.stress).expect("renderer");
        let context = PoseContext {
            renderer: &renderer,
            output_dir: dir.path(),
            rest_bounds: rig.rest_bounds().expect("bounds"),
            explode_margin: 0.5,
            coverage_holes: 0,
        };
        let library = standard_pose_library();
        let mut session = PoseSession::new(&mut rig, library.aliases());

        let outcome = stress_pose(&mut session, library.get("deep_squat").expect("pose"), &context);

        assert_eq!(outcome.flags, vec![PoseFlag::NoBonesFound]);
        assert_eq!(outcome.missing.len(), 4);
        assert_eq!(outcome.images.len(), 2);
        assert!(outcome.images.iter().all(|path| path.exists()));
        assert_eq!(session.state(), ValidatorState::Rest);
    }

    #[test]
    fn given_exported_character_when_stress_tested_then_renders_and_report_are_written() {
        let rig = humanoid_rig();
        let dir = tempfile::tempdir().expect("tempdir");
        let rigged = dir.path().join("hero.glb");
        export_rig(&rigged, rig.mesh(), rig.skeleton(), rig.weights()).expect("export");
        let review_dir = dir.path().join("review");
        let mut options = small_options(&dir.path().join("renders"));
        options.poses = "t_pose,deep_squat".to_string();
        options.notes = "first pass".to_string();
        options.review_dir = Some(review_dir.clone());

        let report = run_stress_test(&rigged, &options).expect("stress test");

        assert_eq!(report.character_name, "hero");
        assert_eq!(report.rigging_tool, "mixamo");
        assert_eq!(report.poses.len(), 2);
        assert_eq!(report.rendered_images, 4);
        assert!(options.output_dir.join("deep_squat_front.png").exists());
        assert!(options.output_dir.join("t_pose_quarter.png").exists());
        assert!(report.report_path.exists());
        assert!(report.checklist_path.exists());
        let squat = &report.poses[1];
        assert!(squat.height < squat.rest_height);
        assert_eq!(squat.non_finite_vertices, 0);
        assert!(!squat.flags.contains(&PoseFlag::FrozenBones));
        let manifest = report.review_manifest.expect("manifest");
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(manifest).expect("read")).expect("json");
        assert_eq!(value["character_name"], "hero");
        assert_eq!(value["notes"], "first pass");
        assert!(review_dir.join("t_pose_front.png").exists());
    }

    #[test]
    fn given_unknown_pose_selection_when_stress_tested_then_error_names_the_selection() {
        let rig = humanoid_rig();
        let dir = tempfile::tempdir().expect("tempdir");
        let rigged = dir.path().join("hero.glb");
        export_rig(&rigged, rig.mesh(), rig.skeleton(), rig.weights()).expect("export");
        let mut options = small_options(dir.path());
        options.poses = "moonwalk".to_string();

        let error = run_stress_test(&rigged, &options).expect_err("nothing selected");

        assert!(error.to_string().contains("moonwalk"));
    }
}
