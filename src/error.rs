use std::{fmt, path::PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Pipeline stage a fatal error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Import,
    Repair,
    Proportion,
    Skeleton,
    Weights,
    Export,
    StressTest,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Import => "import",
            Stage::Repair => "repair",
            Stage::Proportion => "proportion",
            Stage::Skeleton => "skeleton",
            Stage::Weights => "weights",
            Stage::Export => "export",
            Stage::StressTest => "stress-test",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fatal, user-visible failures. Every variant names the stage and input.
#[derive(Error, Debug)]
pub enum RigError {
    #[error("[{stage}] unsupported file extension '{extension}' for {} (use .glb, .gltf, .ply or .obj)", path.display())]
    UnsupportedFormat {
        stage: Stage,
        extension: String,
        path: PathBuf,
    },

    #[error("[import] no mesh objects found in {}", path.display())]
    NoMesh { path: PathBuf },

    #[error("[{stage}] mesh has no usable geometry")]
    EmptyMesh { stage: Stage },

    #[error("[{stage}] no armature found in {}", path.display())]
    NoSkeleton { stage: Stage, path: PathBuf },

    #[error("[{stage}] skeleton is invalid: {message}")]
    InvalidSkeleton { stage: Stage, message: String },

    #[error("[{stage}] filesystem error on {}: {source}", path.display())]
    Io {
        stage: Stage,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[{stage}] malformed {format} data in {}: {message}", path.display())]
    Malformed {
        stage: Stage,
        format: &'static str,
        path: PathBuf,
        message: String,
    },
}

impl RigError {
    pub fn stage(&self) -> Stage {
        match self {
            RigError::UnsupportedFormat { stage, .. }
            | RigError::EmptyMesh { stage }
            | RigError::NoSkeleton { stage, .. }
            | RigError::InvalidSkeleton { stage, .. }
            | RigError::Io { stage, .. }
            | RigError::Malformed { stage, .. } => *stage,
            RigError::NoMesh { .. } => Stage::Import,
        }
    }

    pub(crate) fn io(stage: Stage, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RigError::Io {
            stage,
            path: path.into(),
            source,
        }
    }
}
