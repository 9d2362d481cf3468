//! Catalog persistence errors.

use thiserror::Error;

use crate::record::BackupStatus;

/// Failures reading or writing the backup catalog.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// A record with the same identity is already cataloged
    #[error("Duplicate backup record for '{database}': {detail}")]
    DuplicateRecord { database: String, detail: String },

    /// Requested record or job does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Status may only move forward
    #[error("Invalid status transition for record {id}: {from} -> {to}")]
    InvalidStatusTransition {
        id: String,
        from: BackupStatus,
        to: BackupStatus,
    },

    /// Underlying store failed
    #[error("Database error: {0}")]
    Database(String),
}
