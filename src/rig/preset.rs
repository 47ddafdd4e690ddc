use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Preset used when a character name is unknown.
pub const DEFAULT_PRESET_NAME: &str = "default";

/// Landmark placement for one body type.
///
/// Heights are fractions of total mesh height measured from the feet.
/// Widths are fractions of total mesh width measured from the center line.
/// Elbow and knee offsets are fractions of mesh depth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CharacterPreset {
    pub hips_height: f32,
    pub spine_heights: [f32; 3],
    pub neck_height: f32,
    pub head_height: f32,
    #[serde(default = "default_head_top")]
    pub head_top_height: f32,
    pub shoulder_width: f32,
    pub shoulder_height: f32,
    pub arm_widths: [f32; 3],
    pub arm_heights: [f32; 3],
    pub leg_width: f32,
    pub leg_heights: [f32; 3],
    #[serde(default = "default_pole_offset")]
    pub elbow_offset: f32,
    #[serde(default = "default_pole_offset")]
    pub knee_offset: f32,
    #[serde(default = "default_toe_forward")]
    pub toe_forward: f32,
}

fn default_head_top() -> f32 {
    1.0
}

fn default_pole_offset() -> f32 {
    0.05
}

fn default_toe_forward() -> f32 {
    0.25
}

/// Adult proportions.
pub const DEFAULT_PRESET: CharacterPreset = CharacterPreset {
    hips_height: 0.50,
    spine_heights: [0.55, 0.62, 0.69],
    neck_height: 0.78,
    head_height: 0.82,
    head_top_height: 1.0,
    shoulder_width: 0.10,
    shoulder_height: 0.76,
    arm_widths: [0.22, 0.35, 0.45],
    arm_heights: [0.74, 0.58, 0.45],
    leg_width: 0.10,
    leg_heights: [0.48, 0.26, 0.05],
    elbow_offset: 0.05,
    knee_offset: 0.05,
    toe_forward: 0.25,
};

/// Older child, about eight.
pub const MIA_PRESET: CharacterPreset = CharacterPreset {
    hips_height: 0.45,
    spine_heights: [0.50, 0.57, 0.64],
    neck_height: 0.72,
    head_height: 0.77,
    head_top_height: 1.0,
    shoulder_width: 0.08,
    shoulder_height: 0.70,
    arm_widths: [0.20, 0.32, 0.42],
    arm_heights: [0.68, 0.55, 0.43],
    leg_width: 0.10,
    leg_heights: [0.43, 0.24, 0.04],
    elbow_offset: 0.05,
    knee_offset: 0.05,
    toe_forward: 0.25,
};

/// Young child, about five: the largest head and shortest legs.
pub const LEO_PRESET: CharacterPreset = CharacterPreset {
    hips_height: 0.42,
    spine_heights: [0.47, 0.54, 0.61],
    neck_height: 0.69,
    head_height: 0.74,
    head_top_height: 1.0,
    shoulder_width: 0.07,
    shoulder_height: 0.67,
    arm_widths: [0.18, 0.28, 0.38],
    arm_heights: [0.65, 0.52, 0.40],
    leg_width: 0.10,
    leg_heights: [0.40, 0.22, 0.04],
    elbow_offset: 0.05,
    knee_offset: 0.05,
    toe_forward: 0.25,
};

/// Invalid preset data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PresetError {
    #[error("preset '{preset}': {field} = {value} is outside [0, 1]")]
    OutOfRange {
        preset: String,
        field: String,
        value: f32,
    },

    #[error("alias '{alias}' points to unknown preset '{target}'")]
    UnknownAliasTarget { alias: String, target: String },
}

impl CharacterPreset {
    /// Check that every landmark fraction lies in `[0, 1]`.
    pub fn validate(&self, name: &str) -> Result<(), PresetError> {
        let mut fields: Vec<(String, f32)> = vec![
            ("hips_height".to_string(), self.hips_height),
            ("neck_height".to_string(), self.neck_height),
            ("head_height".to_string(), self.head_height),
            ("head_top_height".to_string(), self.head_top_height),
            ("shoulder_width".to_string(), self.shoulder_width),
            ("shoulder_height".to_string(), self.shoulder_height),
            ("leg_width".to_string(), self.leg_width),
            ("elbow_offset".to_string(), self.elbow_offset),
            ("knee_offset".to_string(), self.knee_offset),
            ("toe_forward".to_string(), self.toe_forward),
        ];
        for (group, values) in [
            ("spine_heights", self.spine_heights),
            ("arm_widths", self.arm_widths),
            ("arm_heights", self.arm_heights),
            ("leg_heights", self.leg_heights),
        ] {
            fields.extend(
                values
                    .iter()
                    .enumerate()
                    .map(|(index, value)| (format!("{group}[{index}]"), *value)),
            );
        }

        match fields
            .into_iter()
            .find(|(_, value)| !(0.0..=1.0).contains(value))
        {
            Some((field, value)) => Err(PresetError::OutOfRange {
                preset: name.to_string(),
                field,
                value,
            }),
            None => Ok(()),
        }
    }
}

/// On-disk preset file: extra presets plus alias → preset names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetFile {
    pub presets: BTreeMap<String, CharacterPreset>,
    pub aliases: BTreeMap<String, String>,
}

/// Named character presets with case-insensitive lookup.
#[derive(Debug, Clone)]
pub struct PresetLibrary {
    presets: BTreeMap<String, CharacterPreset>,
    aliases: BTreeMap<String, String>,
}

impl Default for PresetLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PresetLibrary {
    /// Built-in presets and aliases.
    pub fn builtin() -> Self {
        let presets = BTreeMap::from([
            (DEFAULT_PRESET_NAME.to_string(), DEFAULT_PRESET),
            ("child".to_string(), MIA_PRESET),
            ("mia".to_string(), MIA_PRESET),
            ("leo".to_string(), LEO_PRESET),
        ]);
        let aliases = ["adult", "gabe", "nina", "ruben"]
            .into_iter()
            .map(|alias| (alias.to_string(), DEFAULT_PRESET_NAME.to_string()))
            .collect();
        Self { presets, aliases }
    }

    /// Merge presets and aliases from a JSON file over the current ones.
    /// Returns the number of presets added or replaced.
    pub fn load_file(&mut self, path: &Path) -> Result<usize> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read preset file: {}", path.display()))?;
        let file: PresetFile = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse preset file: {}", path.display()))?;
        self.merge(file)
            .with_context(|| format!("invalid preset file: {}", path.display()))
    }

    pub fn merge(&mut self, file: PresetFile) -> Result<usize, PresetError> {
        for (name, preset) in &file.presets {
            preset.validate(name)?;
        }
        let added = file.presets.len();
        for (name, preset) in file.presets {
            self.presets.insert(name.to_ascii_lowercase(), preset);
        }
        for (alias, target) in file.aliases {
            let target = target.to_ascii_lowercase();
            if !self.presets.contains_key(&target) {
                return Err(PresetError::UnknownAliasTarget { alias, target });
            }
            self.aliases.insert(alias.to_ascii_lowercase(), target);
        }
        info!(added, total = self.presets.len(), "character presets loaded");
        Ok(added)
    }

    /// Preset registered under `name` or one of its aliases.
    pub fn get(&self, name: &str) -> Option<&CharacterPreset> {
        let key = name.to_ascii_lowercase();
        self.presets.get(&key).or_else(|| {
            self.aliases
                .get(&key)
                .and_then(|target| self.presets.get(target))
        })
    }

    /// Preset for `name`, falling back to the default preset when the name is unknown.
    /// Returns the name of the preset actually used.
    pub fn resolve(&self, name: &str) -> (String, CharacterPreset) {
        let key = name.to_ascii_lowercase();
        if let Some(preset) = self.presets.get(&key) {
            return (key, *preset);
        }
        if let Some(target) = self.aliases.get(&key)
            && let Some(preset) = self.presets.get(target)
        {
            return (target.clone(), *preset);
        }
        info!(character = name, "unknown character preset; using default");
        let preset = self
            .presets
            .get(DEFAULT_PRESET_NAME)
            .copied()
            .unwrap_or(DEFAULT_PRESET);
        (DEFAULT_PRESET_NAME.to_string(), preset)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases
            .iter()
            .map(|(alias, target)| (alias.as_str(), target.as_str()))
    }
}
