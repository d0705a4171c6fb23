//! Unified error types for Vigil.
//!
//! Vigil separates two kinds of failure. Infrastructure errors (a detector
//! that crashed, a calibration store that is unreachable, a slow expert
//! directory) degrade gracefully: they are logged and replaced by a safe
//! fallback. Input errors (a malformed reasoning trace) are fatal for the
//! assessment, because a confidence score computed over garbage means nothing.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for Vigil operations.
#[derive(Error, Debug)]
pub enum VigilError {
    /// A single uncertainty or safety sub-detector failed or timed out.
    #[error("detector '{detector}' failed: {message}")]
    DetectorFailure { detector: String, message: String },

    /// The calibration store could not be read in time.
    #[error("calibration unavailable: {message}")]
    CalibrationUnavailable { message: String },

    /// No human expert could be reached within the urgency window.
    #[error("escalation unavailable: {message}")]
    EscalationUnavailable { message: String },

    /// The upstream pipeline produced a malformed or contradictory trace.
    #[error("inconsistent trace input: {message}")]
    InconsistentTrace { message: String },

    /// The interaction was cancelled by the upstream pipeline.
    #[error("interaction cancelled: {interaction_id}")]
    Cancelled { interaction_id: String },

    /// The external reasoning collaborator failed.
    #[error("reasoner error: {message}")]
    Reasoner { message: String },

    /// I/O errors from calibration or log files.
    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// JSON or TOML parsing/serialization errors.
    #[error("serialization error: {message}")]
    Serde { message: String },

    /// Configuration loading errors.
    #[error("config error: {message}")]
    Config { message: String },

    /// Lifecycle violations (invalid transitions).
    #[error("invalid state: {message}")]
    InvalidState { message: String },
}

/// A specialized Result type for Vigil operations.
pub type Result<T> = std::result::Result<T, VigilError>;

impl VigilError {
    /// Create a detector failure.
    pub fn detector(detector: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DetectorFailure {
            detector: detector.into(),
            message: message.into(),
        }
    }

    /// Create a calibration unavailable error.
    pub fn calibration_unavailable(message: impl Into<String>) -> Self {
        Self::CalibrationUnavailable {
            message: message.into(),
        }
    }

    /// Create an escalation unavailable error.
    pub fn escalation_unavailable(message: impl Into<String>) -> Self {
        Self::EscalationUnavailable {
            message: message.into(),
        }
    }

    /// Create an inconsistent trace error.
    pub fn inconsistent_trace(message: impl Into<String>) -> Self {
        Self::InconsistentTrace {
            message: message.into(),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(interaction_id: impl Into<String>) -> Self {
        Self::Cancelled {
            interaction_id: interaction_id.into(),
        }
    }

    /// Create a reasoner error.
    pub fn reasoner(message: impl Into<String>) -> Self {
        Self::Reasoner {
            message: message.into(),
        }
    }

    /// Create a storage error from an I/O error.
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Create a serialization error.
    pub fn serde(message: impl Into<String>) -> Self {
        Self::Serde {
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Check if this error should trigger fail-open behavior.
    ///
    /// Malformed input and lifecycle violations are fatal for the current
    /// assessment. Everything else is infrastructure and degrades.
    pub fn is_fail_open(&self) -> bool {
        !matches!(
            self,
            Self::InconsistentTrace { .. } | Self::InvalidState { .. } | Self::Cancelled { .. }
        )
    }
}

impl From<io::Error> for VigilError {
    fn from(err: io::Error) -> Self {
        Self::Storage {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for VigilError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde {
            message: err.to_string(),
        }
    }
}

/// Trait for fail-open error handling.
///
/// Log the error and return a safe default instead of propagating it.
pub trait FailOpen<T> {
    /// Handle an error by logging a warning and returning the default value.
    fn fail_open_default(self, context: &str) -> T
    where
        T: Default;

    /// Handle an error by logging a warning and returning the provided fallback.
    fn fail_open_with(self, context: &str, fallback: T) -> T;
}

impl<T> FailOpen<T> for Result<T> {
    fn fail_open_default(self, context: &str) -> T
    where
        T: Default,
    {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("{}: {} (fail-open: using default)", context, err);
                T::default()
            }
        }
    }

    fn fail_open_with(self, context: &str, fallback: T) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("{}: {} (fail-open: using fallback)", context, err);
                fallback
            }
        }
    }
}

/// Exit codes for the Vigil CLI.
pub mod exit_codes {
    /// The response may be delivered.
    pub const DELIVER: i32 = 0;

    /// The command failed (bad input, unreadable files).
    pub const ERROR: i32 = 1;

    /// The interaction was escalated or is blocked pending review.
    pub const ESCALATE: i32 = 2;

    /// The process panicked.
    pub const CRASH: i32 = 3;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let err = VigilError::storage(
            "/tmp/calibration/general.json",
            io::Error::new(io::ErrorKind::NotFound, "file not found"),
        );
        assert!(err.to_string().contains("storage error"));
        assert!(err.to_string().contains("/tmp/calibration/general.json"));
    }

    #[test]
    fn test_detector_failure_display() {
        let err = VigilError::detector("semantic", "lexicon missing");
        assert_eq!(
            err.to_string(),
            "detector 'semantic' failed: lexicon missing"
        );
    }

    #[test]
    fn test_calibration_unavailable_display() {
        let err = VigilError::calibration_unavailable("lookup timed out after 250ms");
        assert_eq!(
            err.to_string(),
            "calibration unavailable: lookup timed out after 250ms"
        );
    }

    #[test]
    fn test_inconsistent_trace_display() {
        let err = VigilError::inconsistent_trace("trace has no steps");
        assert_eq!(
            err.to_string(),
            "inconsistent trace input: trace has no steps"
        );
    }

    #[test]
    fn test_cancelled_display() {
        let err = VigilError::cancelled("int-7");
        assert_eq!(err.to_string(), "interaction cancelled: int-7");
    }

    #[test]
    fn test_fail_open_classification() {
        let recoverable = vec![
            VigilError::detector("logical", "boom"),
            VigilError::calibration_unavailable("down"),
            VigilError::escalation_unavailable("nobody on call"),
            VigilError::reasoner("timeout"),
            VigilError::serde("bad json"),
            VigilError::config("bad toml"),
        ];
        for err in recoverable {
            assert!(err.is_fail_open(), "{} should be fail-open", err);
        }

        let fatal = vec![
            VigilError::inconsistent_trace("empty"),
            VigilError::invalid_state("completed -> correcting"),
            VigilError::cancelled("int-1"),
        ];
        for err in fatal {
            assert!(!err.is_fail_open(), "{} should be fatal", err);
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: VigilError = io_err.into();
        assert!(matches!(err, VigilError::Storage { .. }));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: VigilError = json_err.into();
        assert!(matches!(err, VigilError::Serde { .. }));
    }

    #[test]
    fn test_fail_open_default() {
        let result: Result<Vec<String>> = Err(VigilError::calibration_unavailable("test"));
        let value = result.fail_open_default("test context");
        assert!(value.is_empty());
    }

    #[test]
    fn test_fail_open_with() {
        let result: Result<f64> = Err(VigilError::calibration_unavailable("test"));
        let value = result.fail_open_with("test context", 0.5);
        assert!((value - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fail_open_success() {
        let result: Result<i32> = Ok(100);
        assert_eq!(result.fail_open_default("test context"), 100);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_codes::DELIVER, 0);
        assert_eq!(exit_codes::ERROR, 1);
        assert_eq!(exit_codes::ESCALATE, 2);
        assert_eq!(exit_codes::CRASH, 3);
    }
}
