use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::stress::render::{CameraAngle, DEFAULT_DEVICE_PREFERENCE, RenderDevice, ResizeInterpolation};

/// Cleanup and decimation settings for the topology repairer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairSettings {
    /// Face budget; meshes above it are decimated towards it.
    pub face_budget: usize,
    /// Merge distance for the cleanup pass.
    pub weld_distance: f32,
    /// Merge distance used right after import to re-join split seams.
    pub fine_weld_distance: f32,
    /// Longest boundary loop the hole filler will close.
    pub max_hole_edges: usize,
    pub remesh_enabled: bool,
}

impl Default for RepairSettings {
    fn default() -> Self {
        Self {
            face_budget: 50_000,
            weld_distance: 0.1,
            fine_weld_distance: 0.0001,
            max_hole_edges: 512,
            remesh_enabled: true,
        }
    }
}

/// Voxel remesh and smoothing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemeshSettings {
    /// Edge length of one voxel, in mesh units.
    pub voxel_size: f32,
    /// Minimum voxel count along the longest axis.
    pub min_resolution: usize,
    /// Maximum voxel count along the longest axis.
    pub max_resolution: usize,
    /// Upper bound on remeshed vertex count; the voxel size grows until it fits.
    pub vertex_budget: usize,
    pub smooth_factor: f32,
    pub smooth_iterations: usize,
}

impl Default for RemeshSettings {
    fn default() -> Self {
        Self {
            voxel_size: 1.2,
            min_resolution: 48,
            max_resolution: 192,
            vertex_budget: 60_000,
            smooth_factor: 0.5,
            smooth_iterations: 5,
        }
    }
}

/// Heat-diffusion (primary) weighting settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatSettings {
    pub enabled: bool,
    pub max_iterations: usize,
    /// Stop once no vertex weight changes by more than this in one sweep.
    pub tolerance: f32,
    pub heat_scale: f32,
    /// Voxel count along the longest axis of the visibility grid.
    pub visibility_resolution: usize,
    /// Diffused weights at or below this count as no influence.
    pub min_influence: f32,
}

impl Default for HeatSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_iterations: 200,
            tolerance: 1e-5,
            heat_scale: 1.0,
            visibility_resolution: 64,
            min_influence: 1e-4,
        }
    }
}

/// Capsule-distance (fallback) weighting settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapsuleSettings {
    /// Influence radius as a multiple of bone length.
    pub radius_factor: f32,
    /// Radius floor in mesh units; keeps short bones (hands, toes) reaching their vertices.
    pub min_radius: f32,
    pub min_weight: f32,
}

impl Default for CapsuleSettings {
    fn default() -> Self {
        Self {
            radius_factor: 2.5,
            min_radius: 8.0,
            min_weight: 0.01,
        }
    }
}

/// Weight solver settings shared by both tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightSettings {
    /// Minimum primary-pass coverage accepted without falling back.
    pub coverage_threshold: f32,
    pub cleanup_threshold: f32,
    pub max_influences: usize,
    pub heat: HeatSettings,
    pub capsule: CapsuleSettings,
}

impl Default for WeightSettings {
    fn default() -> Self {
        Self {
            coverage_threshold: 0.5,
            cleanup_threshold: 0.01,
            max_influences: 4,
            heat: HeatSettings::default(),
            capsule: CapsuleSettings::default(),
        }
    }
}

/// Thresholds for the rig quality assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    pub min_weight_coverage: f32,
    pub max_influences: usize,
    /// Mirror tolerance as a fraction of skeleton height.
    pub symmetry_tolerance: f32,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            min_weight_coverage: 0.99,
            max_influences: 4,
            symmetry_tolerance: 0.01,
        }
    }
}

/// Stress-test render and measurement settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StressSettings {
    pub width: u32,
    pub height: u32,
    /// Render scale factor before downsampling to the output size.
    pub supersample: u32,
    pub angles: Vec<CameraAngle>,
    pub device_preference: Vec<RenderDevice>,
    /// Vertices further than this fraction of rest height outside the rest
    /// bounds count as exploded.
    pub explode_margin: f32,
    pub resize: ResizeInterpolation,
}

impl Default for StressSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 960,
            supersample: 2,
            angles: vec![CameraAngle::Front, CameraAngle::Quarter],
            device_preference: DEFAULT_DEVICE_PREFERENCE.to_vec(),
            explode_margin: 0.5,
            resize: ResizeInterpolation::Bilinear,
        }
    }
}

/// Persisted rig settings used by CLI workflows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigSettings {
    pub repair: RepairSettings,
    pub remesh: RemeshSettings,
    pub weights: WeightSettings,
    pub quality: QualitySettings,
    pub stress: StressSettings,
}

/// Save rig settings to a JSON file.
pub fn save_settings(path: &Path, settings: &RigSettings) -> Result<()> {
    let content =
        serde_json::to_string_pretty(settings).context("failed to serialize rig settings as JSON")?;
    fs::write(path, content)
        .with_context(|| format!("failed to save rig settings: {}", path.display()))?;
    Ok(())
}

/// Load rig settings from a JSON file. Missing fields take their defaults.
pub fn load_settings(path: &Path) -> Result<RigSettings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to load rig settings: {}", path.display()))?;
    let settings: RigSettings =
        serde_json::from_str(&content).context("failed to parse rig settings JSON")?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_default_settings_when_serialize_then_json_contains_face_budget() {
        let settings = RigSettings::default();
        let json = serde_json::to_string(&settings).expect("serialize settings");
        assert!(json.contains("face_budget"));
        assert!(json.contains("coverage_threshold"));
    }

    #[test]
    fn given_partial_json_when_parsed_then_missing_fields_use_defaults() {
        let settings: RigSettings =
            serde_json::from_str(r#"{ "repair": { "face_budget": 20000 } }"#).expect("parse");

        assert_eq!(settings.repair.face_budget, 20_000);
        assert_eq!(settings.repair.weld_distance, 0.1);
        assert_eq!(settings.weights.capsule.min_radius, 8.0);
        assert_eq!(settings.remesh.smooth_iterations, 5);
    }

    #[test]
    fn given_saved_settings_when_loaded_then_values_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        let mut settings = RigSettings::default();
        settings.remesh.voxel_size = 2.5;
        settings.stress.angles = vec![CameraAngle::Front];

        save_settings(&path, &settings).expect("save");
        let loaded = load_settings(&path).expect("load");

        assert_eq!(loaded, settings);
    }
}
