use nalgebra::Vector3;
use rayon::prelude::*;

use super::{
    skeleton::{Skeleton, distance_to_segment},
    weights::{Influence, VertexWeightSet, keep_strongest, normalize_influences},
};
use crate::settings::CapsuleSettings;

/// Capsule falloff weights for one vertex against every bone, strongest
/// `max_influences` kept and normalized. Empty when no capsule reaches it.
pub fn capsule_influences(
    point: &Vector3<f32>,
    skeleton: &Skeleton,
    settings: &CapsuleSettings,
    max_influences: usize,
) -> Vec<Influence> {
    let mut influences: Vec<Influence> = skeleton
        .bones()
        .iter()
        .enumerate()
        .filter_map(|(bone_id, bone)| {
            let radius = (bone.length() * settings.radius_factor).max(settings.min_radius);
            let distance = distance_to_segment(point, &bone.head, &bone.tail);
            if distance >= radius {
                return None;
            }
            let falloff = 1.0 - distance / radius;
            let weight = falloff * falloff;
            (weight >= settings.min_weight).then_some(Influence::new(bone_id, weight))
        })
        .collect();
    keep_strongest(&mut influences, max_influences);
    normalize_influences(&mut influences);
    influences
}

/// Distance-based skin weights from each bone's capsule, one vertex per task.
pub fn solve_capsule_weights(
    positions: &[Vector3<f32>],
    skeleton: &Skeleton,
    settings: &CapsuleSettings,
    max_influences: usize,
) -> VertexWeightSet {
    let influences = positions
        .par_iter()
        .map(|point| capsule_influences(point, skeleton, settings, max_influences))
        .collect();
    VertexWeightSet::from_influences(influences)
}

/// Bone whose segment is closest to `point`, lower id on ties.
pub fn nearest_bone(point: &Vector3<f32>, skeleton: &Skeleton) -> Option<usize> {
    skeleton
        .bones()
        .iter()
        .enumerate()
        .map(|(bone_id, bone)| (bone_id, distance_to_segment(point, &bone.head, &bone.tail)))
        .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
        .map(|(bone_id, _)| bone_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::weights::MAX_INFLUENCES;

    fn two_bone_chain() -> Skeleton {
        let mut skeleton = Skeleton::new();
        skeleton
            .add_bone("upper", Vector3::zeros(), Vector3::new(0.0, 0.0, 10.0), None)
            .expect("upper");
        skeleton
            .add_bone("lower", Vector3::new(0.0, 0.0, 10.0), Vector3::new(0.0, 0.0, 20.0), Some("upper"))
            .expect("lower");
        skeleton
    }

    #[test]
    fn given_vertex_near_one_bone_when_weighted_then_that_bone_dominates() {
        let skeleton = two_bone_chain();
        let positions = [Vector3::new(1.0, 0.0, 2.0), Vector3::new(1.0, 0.0, 10.0)];

        let weights = solve_capsule_weights(&positions, &skeleton, &CapsuleSettings::default(), MAX_INFLUENCES);

        assert_eq!(weights.dominant_bone(0), Some(0));
        assert!(weights.invalid_vertices(MAX_INFLUENCES).is_empty());
        let middle = weights.influences(1);
        assert_eq!(middle.len(), 2);
        assert!((middle[0].weight - 0.5).abs() < 1e-5);
        assert_eq!(middle[0].bone, 0);
    }

    #[test]
    fn given_vertex_outside_every_capsule_when_weighted_then_it_stays_uncovered() {
        let skeleton = two_bone_chain();
        let far = [Vector3::new(500.0, 0.0, 0.0)];

        let weights = solve_capsule_weights(&far, &skeleton, &CapsuleSettings::default(), MAX_INFLUENCES);

        assert!(weights.influences(0).is_empty());
        assert_eq!(nearest_bone(&far[0], &skeleton), Some(0));
    }

    #[test]
    fn given_short_bone_when_weighted_then_min_radius_still_reaches() {
        let mut skeleton = Skeleton::new();
        skeleton
            .add_bone("toe", Vector3::zeros(), Vector3::new(0.0, -1.0, 0.0), None)
            .expect("toe");
        let settings = CapsuleSettings::default();

        let influences = capsule_influences(&Vector3::new(0.0, 0.0, 6.0), &skeleton, &settings, MAX_INFLUENCES);

        assert_eq!(influences, vec![Influence::new(0, 1.0)]);
    }
}
