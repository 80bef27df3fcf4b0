//! Unified error handling for the run-continuity library.
//!
//! Every failure the core can observe maps onto one of these variants. Most of
//! them never leave the crate: the lifecycle coordinator logs them and degrades
//! to a safe default (absent snapshot, skipped write, empty introspection list).

use thiserror::Error;

/// Unified error type for run-continuity operations.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    /// Location fix with out-of-range or out-of-order data
    #[error("Invalid sample at {timestamp}: {message}")]
    InvalidSample { timestamp: i64, message: String },

    /// Persisted snapshot could not be decoded
    #[error("Corrupted snapshot: {message}")]
    CorruptedSnapshot { message: String },

    /// A registered restore callback reported failure or panicked
    #[error("Callback {callback_id} failed: {message}")]
    CallbackFailure { callback_id: u64, message: String },

    /// Durable key-value store could not be read or written
    #[error("Storage unavailable: {message}")]
    StorageUnavailable { message: String },

    /// OS background-task facility rejected a query or registration
    #[error("Background task registration failed for '{task_name}': {message}")]
    RegistrationFailure { task_name: String, message: String },

    /// External run-record store rejected an update or query
    #[error("Run store error for run {run_id:?}: {message}")]
    RunStore {
        run_id: Option<String>,
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl RunError {
    pub fn storage(message: impl Into<String>) -> Self {
        RunError::StorageUnavailable {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        RunError::Config {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for RunError {
    fn from(err: serde_json::Error) -> Self {
        RunError::CorruptedSnapshot {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for RunError {
    fn from(err: rusqlite::Error) -> Self {
        RunError::StorageUnavailable {
            message: err.to_string(),
        }
    }
}

/// Result type alias for run-continuity operations.
pub type Result<T> = std::result::Result<T, RunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RunError::RegistrationFailure {
            task_name: "bg".to_string(),
            message: "denied".to_string(),
        };
        assert!(err.to_string().contains("'bg'"));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_json_error_maps_to_corruption() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: RunError = parse.unwrap_err().into();
        assert!(matches!(err, RunError::CorruptedSnapshot { .. }));
    }
}
