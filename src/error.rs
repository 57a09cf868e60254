use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the pyramid core.
///
/// `Cancelled` from `spec.md` is deliberately **not** a variant here: a cancelled build is
/// a [`crate::builder::BuildOutcome`], not a failure.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid input directory {path}: {reason}")]
    InvalidInputDir { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shape mismatch: expected {expected_w}x{expected_h}, got {actual_w}x{actual_h}")]
    ShapeMismatch {
        expected_w: usize,
        expected_h: usize,
        actual_w: usize,
        actual_h: usize,
    },

    #[error("failed to decode {path}: {reason}")]
    DecodeError { path: PathBuf, reason: String },

    #[error("consistency error: level {level} expected {expected} outputs, found {found} on disk")]
    ConsistencyError {
        level: usize,
        expected: usize,
        found: usize,
    },

    #[error("build failed: level {level} exceeded failure policy ({failed}/{total} units failed)")]
    BuildFailed {
        level: usize,
        failed: usize,
        total: usize,
    },

    #[error("invalid crop request: {reason}")]
    InvalidCrop { reason: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
