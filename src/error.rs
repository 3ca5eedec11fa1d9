//! Error types for scene generation.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ChangeType;

/// Errors raised by the external renderer collaborator.
#[derive(Debug, Clone, Error)]
pub enum RendererError {
    /// Recoverable; the same call may succeed when retried.
    #[error("transient renderer error: {0}")]
    Transient(String),

    #[error("renderer error: {0}")]
    Fatal(String),
}

/// The camera orientation cannot produce a ground-plane direction frame.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DirectionError {
    #[error("camera {axis} axis is parallel to the ground normal")]
    Degenerate { axis: &'static str },
}

/// Why a semantic edit could not be applied.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MutationError {
    #[error("cannot apply '{0}' to a scene with no objects")]
    EmptyScene(ChangeType),

    #[error("no valid position for an added object after {attempts} attempts")]
    Infeasible { attempts: u32 },

    #[error("no alternative {attribute} available for '{current}'")]
    NoAlternative {
        attribute: &'static str,
        current: String,
    },

    #[error("change type '{0}' is not implemented")]
    Unsupported(ChangeType),
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum GenError {
    #[error("scene placement exhausted after {attempts} scene attempts")]
    PlacementExhausted { attempts: u32 },

    #[error("semantic change failed: {0}")]
    Mutation(#[from] MutationError),

    #[error("{failing} of {objects} objects below {min_pixels} visible pixels ({colors} distinct colors)")]
    VisibilityFailed {
        objects: usize,
        colors: usize,
        failing: usize,
        min_pixels: u32,
    },

    #[error(transparent)]
    Renderer(#[from] RendererError),

    #[error("render failed after {attempts} attempts: {last}")]
    RendererExhausted { attempts: u32, last: String },

    #[error(transparent)]
    Direction(#[from] DirectionError),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("index {index} abandoned after {attempts} rejected attempts")]
    IndexExhausted { index: u32, attempts: u32 },

    #[error("caption input error: {0}")]
    Captions(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GenError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GenError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for failures that reject the current attempt but leave the
    /// run healthy; the orchestrator retries the index with fresh jitter.
    /// Transient renderer errors outside `render` land here too.
    pub fn is_recoverable(&self) -> bool {
        match self {
            GenError::PlacementExhausted { .. }
            | GenError::VisibilityFailed { .. }
            | GenError::Renderer(RendererError::Transient(_)) => true,
            GenError::Mutation(e) => !matches!(e, MutationError::Unsupported(_)),
            _ => false,
        }
    }
}

/// Result type for generation operations.
pub type GenResult<T> = Result<T, GenError>;
