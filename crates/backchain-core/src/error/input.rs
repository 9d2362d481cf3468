//! Input errors: rejected immediately, never retried.

use thiserror::Error;

use crate::record::RecoveryModel;

/// Problems with what the caller asked for.
#[derive(Debug, Clone, Error)]
pub enum InputError {
    /// Database name failed validation
    #[error("Invalid database name '{name}': {reason}")]
    InvalidDatabaseName { name: String, reason: String },

    /// Log backup requested on a database that cannot take one
    #[error(
        "Cannot back up the log of '{database}': recovery model is {model}\n\n\
         Log backups need the FULL or BULK_LOGGED recovery model."
    )]
    InvalidRecoveryModel {
        database: String,
        model: RecoveryModel,
    },

    /// Differential requested with no full backup to anchor it
    #[error(
        "No eligible full backup to anchor a differential for '{database}'\n\n\
         Copy-only full backups do not count. Take one first:\n\
         \x20 backchain backup {database} full"
    )]
    NoBaseBackup { database: String },

    /// Generic bad argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not parse input data
    #[error("Parse error: {0}")]
    Parse(String),
}
