//! Error types for backchain with categorization:
//!
//! - **Input errors**: rejected before any engine call (exit code 1)
//! - **Resolution errors**: no restore path or broken log chain (exit code 2)
//! - **Catalog / execution errors**: persistence, engine, storage, leases (exit code 3)
//! - **Partial restore**: target left in a non-recovered state (exit code 4)
//!
//! Component errors travel unchanged to the caller; [`Error::tagged`] adds the
//! originating component and chain step without altering the classification.

pub mod catalog;
pub mod execution;
pub mod input;
pub mod resolution;

pub use catalog::CatalogError;
pub use execution::{EngineFailure, ExecutionError};
pub use input::InputError;
pub use resolution::ResolutionError;

use serde::Serialize;
use thiserror::Error;

/// The component an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Catalog,
    Executor,
    Resolver,
    Orchestrator,
    Verification,
    Engine,
    Storage,
    Lease,
    Config,
}

/// Top-level error type for every backchain operation.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Invalid input, configuration or precondition
    #[error(transparent)]
    Input(#[from] InputError),

    /// No usable restore chain
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Catalog persistence failure
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Engine, storage, lease or I/O failure
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// A restore stopped mid-chain and left the target database restoring
    #[error("{}", partial_restore_message(.database, .failed_step, .total_steps, .artifact, .cause))]
    PartialRestore {
        database: String,
        /// Zero-based index of the step that did not complete
        failed_step: usize,
        total_steps: usize,
        artifact: String,
        cause: Box<Error>,
    },

    /// Programming invariant violated; never retried
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// An error annotated with where it happened
    #[error("[{component}{}] {source}", step_suffix(.step))]
    Tagged {
        component: Component,
        step: Option<usize>,
        source: Box<Error>,
    },
}

/// Result type alias for backchain operations
pub type Result<T> = std::result::Result<T, Error>;

fn step_suffix(step: &Option<usize>) -> String {
    step.map_or_else(String::new, |s| format!(" step {}", s + 1))
}

fn partial_restore_message(
    database: &str,
    failed_step: &usize,
    total_steps: &usize,
    artifact: &str,
    cause: &Error,
) -> String {
    format!(
        "Partial restore: '{database}' stopped at step {step} of {total_steps} ({artifact})\n\
         Cause: {cause}\n\n\
         The database is left in the RESTORING state and cannot be used.\n\
         To fix this, either:\n\
         \x20 1. Continue manually from step {step}: apply the remaining backups WITH NORECOVERY\n\
         \x20    and finish the last one WITH RECOVERY, or\n\
         \x20 2. Drop the database explicitly: DROP DATABASE [{database}];\n\n\
         backchain never drops a restore target on its own.",
        step = failed_step + 1,
    )
}

// Convenience constructors
impl Error {
    /// Create an input error for a bad argument.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::Input(InputError::InvalidArgument(msg.into()))
    }

    /// Create an input error for bad configuration.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::Input(InputError::InvalidConfig(msg.into()))
    }

    /// Create an input error for unparsable data.
    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::Input(InputError::Parse(msg.into()))
    }

    /// Create a catalog error from a database failure.
    pub fn database_error(msg: impl Into<String>) -> Self {
        Self::Catalog(CatalogError::Database(msg.into()))
    }

    /// Create a catalog error for a missing record or job.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::Catalog(CatalogError::NotFound(msg.into()))
    }

    /// Create an engine error that is safe to retry.
    pub fn engine_transient(msg: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::Engine {
            kind: EngineFailure::Transient,
            message: msg.into(),
        })
    }

    /// Create an engine error that must not be retried.
    pub fn engine_logical(msg: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::Engine {
            kind: EngineFailure::Logical,
            message: msg.into(),
        })
    }

    /// Create a storage error.
    pub fn storage(transient: bool, msg: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::Storage {
            transient,
            message: msg.into(),
        })
    }

    /// Create an IO error.
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::Io(msg.into()))
    }

    /// Create a cancellation error.
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::Cancelled(msg.into()))
    }

    /// Create an invariant violation.
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    /// Annotate this error with its originating component and chain step.
    ///
    /// Already-tagged errors keep their innermost origin.
    #[must_use]
    pub fn tagged(self, component: Component, step: Option<usize>) -> Self {
        match self {
            tagged @ Self::Tagged { .. } => tagged,
            other => Self::Tagged {
                component,
                step,
                source: Box::new(other),
            },
        }
    }

    /// Strip any [`Error::Tagged`] wrappers.
    pub fn root(&self) -> &Self {
        match self {
            Self::Tagged { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self.root() {
            Self::Execution(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Returns the process exit code for this error.
    ///
    /// Exit code scheme:
    /// - 1: invalid input
    /// - 2: chain resolution failure (no path / broken chain)
    /// - 3: engine, storage or catalog execution failure
    /// - 4: partial restore requiring manual intervention
    pub fn exit_code(&self) -> i32 {
        match self.root() {
            Self::Input(_) => 1,
            Self::Resolution(_) => 2,
            Self::PartialRestore { .. } => 4,
            Self::Catalog(_) | Self::Execution(_) | Self::Invariant(_) | Self::Tagged { .. } => 3,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::io_error(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::parse_error(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::parse_error(format!("Failed to parse config: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Lsn;

    #[test]
    fn test_exit_codes_by_category() {
        assert_eq!(Error::invalid_argument("bad").exit_code(), 1);
        assert_eq!(
            Error::Resolution(ResolutionError::BrokenChain {
                database: "sales".into(),
                expected: Lsn::new(200),
                found: Lsn::new(250),
            })
            .exit_code(),
            2
        );
        assert_eq!(Error::engine_logical("permission denied").exit_code(), 3);
        assert_eq!(Error::not_found("record").exit_code(), 3);
        assert_eq!(Error::invariant("mismatch").exit_code(), 3);
    }

    #[test]
    fn test_partial_restore_exit_code_survives_tagging() {
        let err = Error::PartialRestore {
            database: "sales".into(),
            failed_step: 1,
            total_steps: 3,
            artifact: "/backups/sales.trn".into(),
            cause: Box::new(Error::engine_logical("media failure")),
        }
        .tagged(Component::Orchestrator, Some(1));

        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_partial_restore_message_has_remediation() {
        let err = Error::PartialRestore {
            database: "sales".into(),
            failed_step: 1,
            total_steps: 3,
            artifact: "/backups/sales.trn".into(),
            cause: Box::new(Error::engine_logical("media failure")),
        };
        let text = err.to_string();
        assert!(text.contains("step 2 of 3"));
        assert!(text.contains("RESTORING"));
        assert!(text.contains("DROP DATABASE [sales]"));
        assert!(text.contains("media failure"));
    }

    #[test]
    fn test_tagged_display_includes_component_and_step() {
        let err = Error::engine_logical("boom").tagged(Component::Orchestrator, Some(0));
        assert_eq!(
            err.to_string(),
            "[orchestrator step 1] Engine error (logical): boom"
        );
    }

    #[test]
    fn test_tagging_keeps_innermost_origin() {
        let err = Error::engine_transient("timeout")
            .tagged(Component::Engine, None)
            .tagged(Component::Executor, None);
        assert!(matches!(
            err,
            Error::Tagged {
                component: Component::Engine,
                ..
            }
        ));
        assert!(err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::engine_transient("login timeout").is_transient());
        assert!(Error::storage(true, "unreachable").is_transient());
        assert!(!Error::storage(false, "access denied").is_transient());
        assert!(!Error::engine_logical("corruption").is_transient());
        assert!(!Error::invalid_argument("x").is_transient());
    }
}
