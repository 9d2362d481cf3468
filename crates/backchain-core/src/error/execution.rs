//! Execution errors from the engine, storage, leases and the filesystem.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::Error as CoreError;

/// How the engine reported a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum EngineFailure {
    /// Network, login timeout, disk full: worth retrying
    Transient,
    /// Permission denied, invalid database, corruption: surfaced immediately
    Logical,
}

/// Failures while carrying out an operation.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// Engine command failed
    #[error("Engine error ({kind}): {message}")]
    Engine { kind: EngineFailure, message: String },

    /// Artifact storage failed
    #[error("Storage error: {message}")]
    Storage { transient: bool, message: String },

    /// Local IO failed
    #[error("IO error: {0}")]
    Io(String),

    /// Another operation holds the database
    #[error("Database '{database}' is busy: lease held by {holder} until {}", .expires_at.to_rfc3339())]
    LeaseHeld {
        database: String,
        holder: String,
        expires_at: DateTime<Utc>,
    },

    /// Artifact content does not match the cataloged checksum
    #[error("Checksum mismatch for {location}: expected {expected}, found {actual}")]
    ChecksumMismatch {
        location: String,
        expected: String,
        actual: String,
    },

    /// Operation was cancelled between steps
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Transient failure persisted past the retry budget
    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: Box<CoreError>,
    },
}

impl ExecutionError {
    /// Whether a retry could succeed.
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Engine { kind, .. } => matches!(kind, EngineFailure::Transient),
            Self::Storage { transient, .. } => *transient,
            Self::Io(_) | Self::LeaseHeld { .. } => true,
            Self::ChecksumMismatch { .. } | Self::Cancelled(_) | Self::RetriesExhausted { .. } => {
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        let err = ExecutionError::Engine {
            kind: EngineFailure::Transient,
            message: "login timeout expired".into(),
        };
        assert_eq!(
            err.to_string(),
            "Engine error (transient): login timeout expired"
        );
    }

    #[test]
    fn test_retries_exhausted_is_terminal() {
        let err = ExecutionError::RetriesExhausted {
            operation: "backup".into(),
            attempts: 4,
            last: Box::new(CoreError::engine_transient("network")),
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("after 4 attempts"));
    }
}
