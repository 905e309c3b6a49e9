//! The engine error taxonomy.
//!
//! One closed sum type covers every failure the engine can surface plus the
//! two control-flow signals, so the driver's per-step handling is a total
//! match. All variants implement `thiserror::Error` and convert to
//! `anyhow::Error` via the `?` operator at the binary edge.

use std::path::PathBuf;

use thiserror::Error;

/// Every error kind the engine propagates across components.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Transport failure or non-2xx response.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Filesystem I/O failure raised from a primitive.
    #[error("local file error: {path}: {source}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Schema or shape violation detected at load or definition time.
    #[error("configuration error: {0}")]
    Config(String),

    /// Produced by the validator; accumulated in `--validate` mode.
    #[error("configuration validation error: {0}")]
    Validation(String),

    /// A step explicitly rejected the current safe-mode state.
    #[error("safe mode violation: {0}")]
    SafeMode(String),

    /// Control signal: the step's `validate_config` block has run and the
    /// rest of the step body must be skipped. Not an error.
    #[error("validation pass complete")]
    ValidationComplete,

    /// Control signal: render the step's documentation instead of running
    /// it. Not an error.
    #[error("step help requested")]
    StepHelp,
}

impl EngineError {
    /// Build a [`EngineError::LocalFile`] for `path`.
    pub fn local(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::LocalFile {
            path: path.into(),
            source,
        }
    }

    /// True for the control-flow variants that must not count as failures.
    pub fn is_signal(&self) -> bool {
        matches!(self, Self::ValidationComplete | Self::StepHelp)
    }
}

/// Shorthand used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;
