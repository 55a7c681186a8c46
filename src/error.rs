//! Error types shared by the factories, the data collaborator and the
//! checkpoint manager.

use std::path::PathBuf;
use thiserror::Error;

/// Harness errors
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Unknown model kind: {0}")]
    UnknownModelKind(String),

    #[error("Unknown optimizer kind: {0}")]
    UnknownOptimizerKind(String),

    #[error("I/O failure at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Batch is missing field `{0}` required by the model")]
    MissingBatchField(&'static str),

    #[error("Invalid sample {index}: {reason}")]
    InvalidSample { index: usize, reason: String },
}

impl HarnessError {
    /// Wrap an I/O error with the path it happened on
    pub fn io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a burn recorder failure as an I/O failure
    pub fn record<P: Into<PathBuf>, E: std::fmt::Display>(path: P, err: E) -> Self {
        Self::io(path, std::io::Error::other(err.to_string()))
    }
}

/// Result type for harness operations
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HarnessError::UnknownModelKind("NOPE".to_string());
        assert!(err.to_string().contains("Unknown model kind"));
        assert!(err.to_string().contains("NOPE"));

        let err = HarnessError::UnknownOptimizerKind("Lion".to_string());
        assert!(err.to_string().contains("Lion"));

        let err = HarnessError::MissingBatchField("ty_infos");
        assert!(err.to_string().contains("ty_infos"));
    }

    #[test]
    fn test_record_error_is_io() {
        let err = HarnessError::record("/tmp/params_10", "permission denied");
        match err {
            HarnessError::Io { path, source } => {
                assert_eq!(path, PathBuf::from("/tmp/params_10"));
                assert!(source.to_string().contains("permission denied"));
            }
            other => panic!("Expected Io error, got {other:?}"),
        }
    }
}
