use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{
    capsule::{capsule_influences, nearest_bone, solve_capsule_weights},
    heat::solve_heat_weights,
    skeleton::Skeleton,
    types::{Severity, ValidationIssue},
    weights::{Influence, VertexWeightSet, postprocess_weights},
};
use crate::{
    error::{RigError, Stage},
    mesh::Mesh,
    settings::WeightSettings,
};

/// Which solver produced the accepted weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightTier {
    HeatDiffusion,
    CapsuleFallback,
}

impl WeightTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeightTier::HeatDiffusion => "heat_diffusion",
            WeightTier::CapsuleFallback => "capsule_fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightReport {
    pub tier: WeightTier,
    /// Share of vertices the heat pass covered; 0 when it failed or was disabled.
    pub primary_coverage: f32,
    pub primary_error: Option<String>,
    pub gap_filled: usize,
    pub rescued: usize,
    pub cleaned: usize,
    pub truncated: usize,
    pub final_coverage: f32,
    pub max_influences: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightSolution {
    pub weights: VertexWeightSet,
    pub report: WeightReport,
}

/// Bind every vertex to the skeleton.
///
/// Heat diffusion runs first. When it fails or covers less than
/// `coverage_threshold` of the vertices, capsule distance weights replace it.
/// Either way, vertices still unweighted get capsule weights and then their
/// nearest bone, so every vertex ends up bound.
pub fn solve_weights(
    mesh: &Mesh,
    skeleton: &Skeleton,
    settings: &WeightSettings,
    issues: &mut Vec<ValidationIssue>,
) -> Result<WeightSolution, RigError> {
    if mesh.positions.is_empty() {
        return Err(RigError::EmptyMesh { stage: Stage::Weights });
    }
    if skeleton.is_empty() {
        return Err(RigError::InvalidSkeleton {
            stage: Stage::Weights,
            message: "no bones to bind to".to_string(),
        });
    }
    let min_influence = settings.heat.min_influence;
    let total = mesh.vertex_count();

    let (primary, primary_error) = if settings.heat.enabled {
        match solve_heat_weights(mesh, skeleton, &settings.heat, settings.max_influences) {
            Ok(weights) => (Some(weights), None),
            Err(error) => {
                warn!(%error, "heat diffusion failed");
                issues.push(ValidationIssue::new(
                    Severity::Warning,
                    "WEIGHTS_HEAT_FAILED",
                    format!("heat diffusion failed: {error}"),
                ));
                (None, Some(error.to_string()))
            }
        }
    } else {
        info!("heat diffusion disabled");
        (None, Some("heat diffusion disabled".to_string()))
    };

    let primary_coverage = primary.as_ref().map_or(0.0, |weights| weights.coverage(min_influence));
    if let Some(weights) = &primary {
        let covered = total - weights.uncovered(min_influence).len();
        info!(
            "heat diffusion coverage: {covered}/{total} ({:.1}%)",
            primary_coverage * 100.0
        );
    }

    let mut gap_filled = 0;
    let (tier, mut weights) = match primary {
        Some(mut weights) if primary_coverage >= settings.coverage_threshold => {
            for vertex in weights.uncovered(min_influence) {
                let influences =
                    capsule_influences(&mesh.positions[vertex], skeleton, &settings.capsule, settings.max_influences);
                if !influences.is_empty() {
                    weights.set(vertex, influences);
                    gap_filled += 1;
                }
            }
            if gap_filled > 0 {
                warn!(vertices = gap_filled, "filled heat diffusion gaps with distance weights");
                issues.push(ValidationIssue::new(
                    Severity::Warning,
                    "WEIGHTS_GAP_FILLED",
                    format!("{gap_filled} vertices unreached by heat diffusion received distance weights"),
                ));
            }
            (WeightTier::HeatDiffusion, weights)
        }
        _ => {
            let percent = primary_coverage * 100.0;
            warn!("heat diffusion coverage: {percent:.0}% - falling back to distance weights");
            issues.push(ValidationIssue::new(
                Severity::Warning,
                "WEIGHTS_FALLBACK",
                format!("heat diffusion coverage {percent:.1}% below threshold; capsule weights used"),
            ));
            let weights = solve_capsule_weights(&mesh.positions, skeleton, &settings.capsule, settings.max_influences);
            (WeightTier::CapsuleFallback, weights)
        }
    };

    let mut rescued = 0;
    for vertex in weights.uncovered(min_influence) {
        if let Some(bone) = nearest_bone(&mesh.positions[vertex], skeleton) {
            weights.set(vertex, vec![Influence::new(bone, 1.0)]);
            rescued += 1;
        }
    }
    if rescued > 0 {
        warn!(vertices = rescued, "bound orphan vertices to their nearest bone");
        issues.push(ValidationIssue::new(
            Severity::Warning,
            "WEIGHTS_ORPHANS_RESCUED",
            format!("{rescued} vertices had no influence and were bound to their nearest bone"),
        ));
    }

    let stats = postprocess_weights(&mut weights, settings.cleanup_threshold, settings.max_influences);
    let report = WeightReport {
        tier,
        primary_coverage,
        primary_error,
        gap_filled,
        rescued,
        cleaned: stats.cleaned,
        truncated: stats.truncated,
        final_coverage: weights.coverage(min_influence),
        max_influences: weights.max_influence_count(),
    };
    info!(
        tier = tier.as_str(),
        coverage = report.final_coverage,
        cleaned = report.cleaned,
        truncated = report.truncated,
        "skin weights solved"
    );
    Ok(WeightSolution { weights, report })
}

#[cfg(test)]
mod tests {
    use nalgebra::Vector3;

    use super::*;
    use crate::rig::weights::MAX_INFLUENCES;
    use crate::test_support::closed_box;

    fn column_skeleton() -> Skeleton {
        let mut skeleton = Skeleton::new();
        skeleton
            .add_bone("lower", Vector3::new(5.0, 5.0, 1.0), Vector3::new(5.0, 5.0, 10.0), None)
            .expect("lower");
        skeleton
            .add_bone("upper", Vector3::new(5.0, 5.0, 10.0), Vector3::new(5.0, 5.0, 19.0), Some("lower"))
            .expect("upper");
        skeleton
    }

    fn column() -> Mesh {
        closed_box(Vector3::zeros(), Vector3::new(10.0, 10.0, 20.0), 4)
    }

    #[test]
    fn given_enclosed_skeleton_when_solved_then_heat_tier_is_used() {
        let mut issues = Vec::new();

        let solution =
            solve_weights(&column(), &column_skeleton(), &WeightSettings::default(), &mut issues).expect("solve");

        assert_eq!(solution.report.tier, WeightTier::HeatDiffusion);
        assert_eq!(solution.report.primary_coverage, 1.0);
        assert_eq!(solution.report.final_coverage, 1.0);
        assert!(solution.weights.invalid_vertices(MAX_INFLUENCES).is_empty());
        assert!(issues.is_empty());
    }

    #[test]
    fn given_same_input_when_solved_twice_then_tier_and_weights_match() {
        let (mesh, skeleton, settings) = (column(), column_skeleton(), WeightSettings::default());

        let first = solve_weights(&mesh, &skeleton, &settings, &mut Vec::new()).expect("first");
        let second = solve_weights(&mesh, &skeleton, &settings, &mut Vec::new()).expect("second");

        assert_eq!(first, second);
    }

    #[test]
    fn given_large_unreachable_island_when_solved_then_fallback_and_rescue_cover_everything() {
        let mut mesh = column();
        let island = closed_box(Vector3::new(40.0, 0.0, 0.0), Vector3::new(50.0, 10.0, 10.0), 6);
        mesh.append(&island);
        let mut issues = Vec::new();

        let solution = solve_weights(&mesh, &column_skeleton(), &WeightSettings::default(), &mut issues).expect("solve");

        assert_eq!(solution.report.tier, WeightTier::CapsuleFallback);
        assert!(solution.report.primary_coverage < 0.5);
        assert_eq!(solution.report.rescued, island.vertex_count());
        assert_eq!(solution.report.final_coverage, 1.0);
        assert!(solution.weights.invalid_vertices(MAX_INFLUENCES).is_empty());
        let codes: Vec<&str> = issues.iter().map(|issue| issue.code.as_str()).collect();
        assert_eq!(codes, vec!["WEIGHTS_FALLBACK", "WEIGHTS_ORPHANS_RESCUED"]);
    }

    #[test]
    fn given_small_nearby_island_when_solved_then_heat_is_kept_and_gaps_filled() {
        let mut mesh = column();
        let island = closed_box(Vector3::new(12.0, 0.0, 0.0), Vector3::new(14.0, 10.0, 10.0), 2);
        mesh.append(&island);

        let solution =
            solve_weights(&mesh, &column_skeleton(), &WeightSettings::default(), &mut Vec::new()).expect("solve");

        assert_eq!(solution.report.tier, WeightTier::HeatDiffusion);
        assert_eq!(solution.report.gap_filled, island.vertex_count());
        assert_eq!(solution.report.rescued, 0);
        assert_eq!(solution.report.final_coverage, 1.0);
    }

    #[test]
    fn given_heat_disabled_when_solved_then_capsule_tier_reports_reason() {
        let mut settings = WeightSettings::default();
        settings.heat.enabled = false;

        let solution = solve_weights(&column(), &column_skeleton(), &settings, &mut Vec::new()).expect("solve");

        assert_eq!(solution.report.tier, WeightTier::CapsuleFallback);
        assert_eq!(solution.report.primary_error.as_deref(), Some("heat diffusion disabled"));
        assert_eq!(solution.report.final_coverage, 1.0);
    }

    #[test]
    fn given_empty_skeleton_when_solved_then_error_names_weights_stage() {
        let error = solve_weights(&column(), &Skeleton::new(), &WeightSettings::default(), &mut Vec::new())
            .expect_err("no bones");

        assert_eq!(error.stage(), Stage::Weights);
    }
}
