use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::skeleton::BoneId;

/// Largest number of bones that may influence one vertex.
pub const MAX_INFLUENCES: usize = 4;

/// Allowed drift of a vertex weight sum from 1.
pub const WEIGHT_SUM_TOLERANCE: f32 = 1e-4;

/// One bone's contribution to a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Influence {
    pub bone: BoneId,
    pub weight: f32,
}

impl Influence {
    pub fn new(bone: BoneId, weight: f32) -> Self {
        Self { bone, weight }
    }
}

/// Per-vertex skin influences, indexed like the mesh vertices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VertexWeightSet {
    influences: Vec<Vec<Influence>>,
}

impl VertexWeightSet {
    pub fn new(vertex_count: usize) -> Self {
        Self {
            influences: vec![Vec::new(); vertex_count],
        }
    }

    pub fn from_influences(influences: Vec<Vec<Influence>>) -> Self {
        Self { influences }
    }

    pub fn vertex_count(&self) -> usize {
        self.influences.len()
    }

    pub fn influences(&self, vertex: usize) -> &[Influence] {
        self.influences.get(vertex).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &[Influence]> {
        self.influences.iter().map(Vec::as_slice)
    }

    pub fn set(&mut self, vertex: usize, influences: Vec<Influence>) {
        if let Some(slot) = self.influences.get_mut(vertex) {
            *slot = influences;
        }
    }

    /// True when some influence on `vertex` exceeds `min_weight`.
    pub fn is_covered(&self, vertex: usize, min_weight: f32) -> bool {
        self.influences(vertex).iter().any(|influence| influence.weight > min_weight)
    }

    /// Vertices with no influence above `min_weight`.
    pub fn uncovered(&self, min_weight: f32) -> Vec<usize> {
        (0..self.influences.len())
            .filter(|vertex| !self.is_covered(*vertex, min_weight))
            .collect()
    }

    /// Fraction of vertices with an influence above `min_weight`. An empty set
    /// counts as fully covered.
    pub fn coverage(&self, min_weight: f32) -> f32 {
        if self.influences.is_empty() {
            return 1.0;
        }
        let covered = self.influences.len() - self.uncovered(min_weight).len();
        covered as f32 / self.influences.len() as f32
    }

    /// Strongest bone on `vertex`, lower bone id on ties.
    pub fn dominant_bone(&self, vertex: usize) -> Option<BoneId> {
        self.influences(vertex)
            .iter()
            .min_by(|a, b| strongest_first(a, b))
            .map(|influence| influence.bone)
    }

    pub fn max_influence_count(&self) -> usize {
        self.influences.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Vertices breaking the skinning invariants: no influence, a negative
    /// weight, more than `max_influences` entries, or a sum away from 1.
    pub fn invalid_vertices(&self, max_influences: usize) -> Vec<usize> {
        self.influences
            .iter()
            .enumerate()
            .filter(|(_, influences)| {
                let sum: f32 = influences.iter().map(|influence| influence.weight).sum();
                influences.is_empty()
                    || influences.len() > max_influences
                    || influences.iter().any(|influence| !(influence.weight >= 0.0))
                    || (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE
            })
            .map(|(vertex, _)| vertex)
            .collect()
    }

    /// Fixed four-lane joint and weight arrays for glTF `JOINTS_0`/`WEIGHTS_0`.
    pub fn gltf_lanes(&self, vertex: usize) -> ([u16; 4], [f32; 4]) {
        let mut joints = [0u16; 4];
        let mut weights = [0.0f32; 4];
        for (lane, influence) in self.influences(vertex).iter().take(4).enumerate() {
            joints[lane] = influence.bone as u16;
            weights[lane] = influence.weight;
        }
        (joints, weights)
    }
}

/// Descending weight, then ascending bone id.
fn strongest_first(a: &Influence, b: &Influence) -> Ordering {
    b.weight
        .partial_cmp(&a.weight)
        .unwrap_or(Ordering::Equal)
        .then(a.bone.cmp(&b.bone))
}

/// Sort strongest first and keep at most `k` entries. Returns how many were dropped.
pub fn keep_strongest(influences: &mut Vec<Influence>, k: usize) -> usize {
    influences.sort_by(strongest_first);
    let dropped = influences.len().saturating_sub(k);
    influences.truncate(k);
    dropped
}

/// Scale weights to sum to 1. Returns false, leaving the entries untouched,
/// when the sum is not positive.
pub fn normalize_influences(influences: &mut [Influence]) -> bool {
    let sum: f32 = influences.iter().map(|influence| influence.weight).sum();
    if !(sum > 1e-7) {
        return false;
    }
    for influence in influences.iter_mut() {
        influence.weight /= sum;
    }
    true
}

/// What `postprocess_weights` removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostprocessStats {
    /// Entries dropped below the cleanup threshold.
    pub cleaned: usize,
    /// Entries dropped by the influence cap.
    pub truncated: usize,
}

/// Normalize, drop small weights (keeping each vertex's strongest), cap to
/// `max_influences`, and normalize again.
pub fn postprocess_weights(
    weights: &mut VertexWeightSet,
    cleanup_threshold: f32,
    max_influences: usize,
) -> PostprocessStats {
    let max_influences = max_influences.max(1);
    let mut stats = PostprocessStats::default();
    for influences in weights.influences.iter_mut() {
        influences.retain(|influence| influence.weight.is_finite() && influence.weight > 0.0);
        if influences.is_empty() {
            continue;
        }
        normalize_influences(influences);
        influences.sort_by(strongest_first);

        let before = influences.len();
        let strongest = influences[0];
        influences.retain(|influence| influence.weight >= cleanup_threshold);
        if influences.is_empty() {
            influences.push(strongest);
        }
        stats.cleaned += before - influences.len();

        stats.truncated += keep_strongest(influences, max_influences);
        normalize_influences(influences);
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn influences(pairs: &[(BoneId, f32)]) -> Vec<Influence> {
        pairs.iter().map(|(bone, weight)| Influence::new(*bone, *weight)).collect()
    }

    #[test]
    fn given_many_small_weights_when_postprocessed_then_invariants_hold() {
        let mut weights = VertexWeightSet::from_influences(vec![
            influences(&[(0, 5.0), (1, 3.0), (2, 1.0), (3, 0.5), (4, 0.4), (5, 0.01)]),
            influences(&[(7, 0.2)]),
            influences(&[(2, 0.004), (3, 0.003)]),
        ]);

        let stats = postprocess_weights(&mut weights, 0.01, MAX_INFLUENCES);

        assert!(weights.invalid_vertices(MAX_INFLUENCES).is_empty());
        assert_eq!(weights.influences(0).len(), 4);
        assert_eq!(weights.influences(0)[0].bone, 0);
        assert_eq!(stats.cleaned, 1);
        assert_eq!(stats.truncated, 1);
        assert_eq!(weights.influences(1), &[Influence::new(7, 1.0)]);
        assert_eq!(weights.influences(2).len(), 2);
    }

    #[test]
    fn given_weights_below_threshold_everywhere_when_cleaned_then_strongest_survives() {
        let mut weights = VertexWeightSet::from_influences(vec![influences(&[
            (3, 0.001),
            (1, 0.002),
            (2, 0.001),
        ])]);

        postprocess_weights(&mut weights, 0.9, MAX_INFLUENCES);

        assert_eq!(weights.influences(0), &[Influence::new(1, 1.0)]);
    }

    #[test]
    fn given_equal_weights_when_keeping_strongest_then_lower_bone_id_wins() {
        let mut entries = influences(&[(9, 0.25), (2, 0.25), (5, 0.25), (1, 0.25), (4, 0.25)]);

        let dropped = keep_strongest(&mut entries, 4);

        assert_eq!(dropped, 1);
        assert_eq!(entries.iter().map(|entry| entry.bone).collect::<Vec<_>>(), vec![1, 2, 4, 5]);
    }

    #[test]
    fn given_unweighted_vertex_when_measuring_coverage_then_it_is_reported() {
        let weights = VertexWeightSet::from_influences(vec![
            influences(&[(0, 1.0)]),
            Vec::new(),
            influences(&[(1, 0.00001)]),
            influences(&[(1, 0.4), (2, 0.6)]),
        ]);

        assert_eq!(weights.uncovered(1e-4), vec![1, 2]);
        assert_eq!(weights.coverage(1e-4), 0.5);
        assert_eq!(weights.dominant_bone(3), Some(2));
        assert_eq!(weights.dominant_bone(1), None);
        assert_eq!(weights.invalid_vertices(MAX_INFLUENCES), vec![1, 2]);
    }

    #[test]
    fn given_vertex_weights_when_packing_lanes_then_unused_lanes_are_zero() {
        let weights = VertexWeightSet::from_influences(vec![influences(&[(3, 0.75), (8, 0.25)])]);

        let (joints, lanes) = weights.gltf_lanes(0);

        assert_eq!(joints, [3, 8, 0, 0]);
        assert_eq!(lanes, [0.75, 0.25, 0.0, 0.0]);
    }
}
