use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by the binning and dispatch components.
///
/// Configuration and input errors are raised before any read is processed.
/// Process and timeout errors are scoped to a single classifier job.
#[derive(Debug, Error)]
pub enum BinError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("{program} exited with status {code:?}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}")]
    ExternalProcess {
        program: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("{program} did not finish within {limit:?} and was killed")]
    Timeout { program: String, limit: Duration },

    #[error("feature extraction failed: {0}")]
    Feature(#[from] FeatureError),

    #[error("I/O error during {operation} on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse reads from '{}': {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}

/// Why a single read could not be turned into a feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FeatureError {
    /// No window of length k made only of A/C/G/T.
    #[error("no valid {k}-mer window in a sequence of length {len}")]
    Degenerate { k: usize, len: usize },

    /// Non-canonical base met while ambiguous windows are not skipped.
    #[error("ambiguous base '{base}' at position {position}")]
    AmbiguousBase { base: char, position: usize },
}

impl BinError {
    pub fn io(path: impl Into<PathBuf>, operation: &'static str, source: std::io::Error) -> Self {
        BinError::Io {
            path: path.into(),
            operation,
            source,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        BinError::Configuration(message.into())
    }
}

pub type Result<T> = std::result::Result<T, BinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_error_surfaces_output() {
        let err = BinError::ExternalProcess {
            program: "kraken2".to_string(),
            code: Some(2),
            stdout: String::new(),
            stderr: "database not found".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("kraken2 exited with status Some(2)"));
        assert!(msg.contains("database not found"));
    }

    #[test]
    fn test_feature_error_display() {
        let err = FeatureError::AmbiguousBase { base: 'N', position: 3 };
        assert_eq!(err.to_string(), "ambiguous base 'N' at position 3");
        let err = BinError::from(FeatureError::Degenerate { k: 4, len: 2 });
        assert!(err.to_string().contains("no valid 4-mer window"));
    }
}
