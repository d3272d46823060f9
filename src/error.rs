//! Unified error type hierarchy for slotbench
//!
//! Provides structured error handling with HardwareError, ConfigError,
//! SequenceError and AppError.

use std::io;
use thiserror::Error;

/// Failure of a single fixture or programmer capability call.
///
/// These never escape a stage: they are recorded against the device and
/// logged, and the stage moves on to the next socket.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("{call} failed: {reason}")]
    CallFailed { call: String, reason: String },

    #[error("{call} timed out after {timeout_ms} ms")]
    Timeout { call: String, timeout_ms: u64 },

    #[error("{0} returned an empty response")]
    EmptyResponse(String),

    #[error("Programmer {0} is unreachable")]
    Unreachable(String),
}

impl HardwareError {
    /// Shorthand used by capability implementations.
    pub fn failed(call: impl Into<String>, reason: impl Into<String>) -> Self {
        HardwareError::CallFailed {
            call: call.into(),
            reason: reason.into(),
        }
    }
}

/// Configuration file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in config: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Conflicting settings detected: {0}")]
    ConflictDetected(String),

    #[error("Fixture/programmer pairing mismatch: {fixtures} fixtures, {programmers} programmers")]
    PairingMismatch { fixtures: usize, programmers: usize },

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Run-level errors of the sequence runner.
///
/// Per-device failures are not represented here; only an explicit abort or a
/// misuse of the runner ends a run early.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    #[error("Sequence cancelled by operator before stage '{0}'")]
    Cancelled(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

/// Global error type for the operator-facing surface.
#[derive(Error, Debug, Clone)]
pub enum AppError {
    /// Settings could not be loaded or were rejected
    #[error("Settings error: {0}")]
    Settings(String),

    /// Session could not be started
    #[error("Session error: {0}")]
    Session(String),

    /// Sequence aborted or misused
    #[error("Sequence error: {0}")]
    Sequence(#[from] SequenceError),

    /// File I/O error (read/write/delete)
    #[error("I/O error: {0}")]
    Io(String),
}

impl AppError {
    /// Get a user-facing error message suitable for the operator console
    pub fn user_message(&self) -> String {
        match self {
            AppError::Settings(msg) => format!("Bench settings are invalid: {}", msg),
            AppError::Session(msg) => format!("Cannot start test session: {}", msg),
            AppError::Sequence(SequenceError::Cancelled(stage)) => {
                format!("Testing was stopped before '{}'", stage)
            }
            AppError::Sequence(err) => format!("Testing command failed: {}", err),
            AppError::Io(msg) => format!("File operation failed: {}", msg),
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::Settings(e.to_string())
    }
}

impl From<io::Error> for AppError {
    fn from(e: io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

/// Top-level result type for operations that may fail.
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_error_display() {
        let err = HardwareError::failed("connect", "no target voltage");
        assert_eq!(err.to_string(), "connect failed: no target voltage");

        let err = HardwareError::Timeout {
            call: "download_file".to_string(),
            timeout_ms: 10_000,
        };
        assert_eq!(err.to_string(), "download_file timed out after 10000 ms");
    }

    #[test]
    fn test_pairing_mismatch_display() {
        let err = ConfigError::PairingMismatch {
            fixtures: 3,
            programmers: 2,
        };
        assert_eq!(
            err.to_string(),
            "Fixture/programmer pairing mismatch: 3 fixtures, 2 programmers"
        );
    }

    #[test]
    fn test_cancelled_user_message() {
        let err = AppError::from(SequenceError::Cancelled("identification".to_string()));
        assert_eq!(err.user_message(), "Testing was stopped before 'identification'");
    }

    #[test]
    fn test_io_error_user_message() {
        let err = AppError::from(io::Error::new(io::ErrorKind::PermissionDenied, "read-only medium"));
        assert_eq!(err.user_message(), "File operation failed: read-only medium");
    }

    #[test]
    fn test_result_type_err() {
        let result: Result<i32> = Err("test error".into());
        assert!(result.is_err());
    }
}
