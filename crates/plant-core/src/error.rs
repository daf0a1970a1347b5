//! Error types for the plant disease classifier.
//!
//! Every failure aborts the operation that raised it; nothing in the
//! workspace retries on these errors.

use thiserror::Error;

/// Main error type for the plant disease classifier.
#[derive(Error, Debug)]
pub enum Error {
    /// Dataset or model path missing, unreadable, or holding unusable content
    #[error("Input error: {0}")]
    Input(String),

    /// External converter missing or failing
    #[error("Toolchain error: {0}")]
    Toolchain(String),

    /// Checkpoint, artifact or document write/read failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Parameter transplant between incompatible layers
    #[error("Shape mismatch for `{layer}`: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        layer: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// Non-finite loss observed during training
    #[error("Convergence anomaly in {phase} epoch {epoch}: {metric} is {value}")]
    ConvergenceAnomaly {
        phase: String,
        epoch: usize,
        metric: String,
        value: f64,
    },

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding error
    #[error("Image processing error: {0}")]
    Image(String),

    /// Model construction error
    #[error("Model error: {0}")]
    Model(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Input error for a missing path.
    pub fn missing_path(what: &str, path: &std::path::Path) -> Self {
        Error::Input(format!("{what} not found: {}", path.display()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err.to_string())
    }
}

impl From<burn::record::RecorderError> for Error {
    fn from(err: burn::record::RecorderError) -> Self {
        Error::Serialization(format!("{err:?}"))
    }
}

/// Specialized Result type for plant classifier operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Toolchain("converter exited with status 1".to_string());
        assert_eq!(
            err.to_string(),
            "Toolchain error: converter exited with status 1"
        );
    }

    #[test]
    fn test_shape_mismatch_display() {
        let err = Error::ShapeMismatch {
            layer: "predictions.weight".to_string(),
            expected: vec![256, 38],
            found: vec![256, 10],
        };
        assert_eq!(
            err.to_string(),
            "Shape mismatch for `predictions.weight`: expected [256, 38], found [256, 10]"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_missing_path() {
        let err = Error::missing_path("Model", std::path::Path::new("saved_model/x.mpk"));
        assert!(matches!(err, Error::Input(_)));
        assert!(err.to_string().contains("saved_model/x.mpk"));
    }
}
