//! Error types for scheme construction, restore and checkpoint I/O.
//!
//! Dispatch and resolution never fail: a render failure is an
//! [`Outcome::Error`](crate::scheme::Outcome) counted in the statistics,
//! not an error value.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building, restoring or persisting a scheme.
#[derive(Debug, Error)]
pub enum SchemeError {
    /// File scheme configured without a manifest path
    #[error("File scheme requires a manifest path")]
    MissingManifest,

    /// Configuration values out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Scheme type not in the registry
    #[error("Unknown scheme type '{0}' (expected file, pyramid or scanline)")]
    UnknownScheme(String),

    /// Manifest could not be read
    #[error("Failed to read manifest {path}: {source}")]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Manifest line does not match the detected format
    #[error("Malformed manifest line '{line}': {reason}")]
    ManifestParse { line: String, reason: String },

    /// Manifest differs from the one the checkpoint was taken against
    #[error("Manifest {path} changed since checkpoint (expected {expected} bytes, found {actual})")]
    ManifestChanged {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// Checkpoint record is malformed or missing fields
    #[error("Invalid checkpoint: {0}")]
    Checkpoint(#[from] serde_json::Error),

    /// Checkpoint record parsed but holds values no scheme could produce
    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    /// Checkpoint file could not be read or written
    #[error("Checkpoint I/O error at {path}: {source}")]
    CheckpointIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Upstream source metadata could not be loaded
    #[error("Source info unavailable from {path}: {reason}")]
    SourceInfoUnavailable { path: PathBuf, reason: String },
}

/// Result type for scheme operations.
pub type SchemeResult<T> = Result<T, SchemeError>;

impl From<crate::coord::CoordError> for SchemeError {
    fn from(e: crate::coord::CoordError) -> Self {
        SchemeError::InvalidConfig(e.to_string())
    }
}
