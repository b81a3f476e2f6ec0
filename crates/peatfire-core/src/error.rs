//! Error taxonomy shared by every pipeline component.
//!
//! Only `ShapeMismatch`, `Io` and `InvalidParameter` are fatal to an epoch.
//! `MissingInput` on a cold start means "initialise to the default",
//! `InsufficientTrainingData` turns a retraining step into a no-op, and
//! `CorruptArtifact` on the threshold path is recovered by falling back to the
//! documented default threshold.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeatError {
    #[error("required input is missing: {path:?}")]
    MissingInput { path: PathBuf },

    #[error("grid shape mismatch: expected {expected_width}x{expected_height}, got {actual_width}x{actual_height}")]
    ShapeMismatch {
        expected_width: usize,
        expected_height: usize,
        actual_width: usize,
        actual_height: usize,
    },

    #[error("insufficient training data: {rows} rows, at least {required} required")]
    InsufficientTrainingData { rows: usize, required: usize },

    #[error("corrupt artifact at {path:?}: {reason}")]
    CorruptArtifact { path: PathBuf, reason: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("i/o failure at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PeatError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PeatError::Io { path: path.into(), source }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PeatError::CorruptArtifact { path: path.into(), reason: reason.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, PeatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_mismatch_message_names_both_shapes() {
        let err = PeatError::ShapeMismatch {
            expected_width: 200,
            expected_height: 200,
            actual_width: 100,
            actual_height: 50,
        };
        let msg = err.to_string();
        assert!(msg.contains("200x200") && msg.contains("100x50"), "{msg}");
    }

    #[test]
    fn corrupt_keeps_path_and_reason() {
        let msg = PeatError::corrupt("x.json", "bad").to_string();
        assert!(msg.contains("x.json") && msg.contains("bad"), "{msg}");
    }
}
