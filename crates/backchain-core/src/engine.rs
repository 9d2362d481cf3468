//! The database engine seam.
//!
//! Implementations classify their failures: anything retry might fix is
//! reported via [`Error::engine_transient`](crate::Error::engine_transient),
//! everything else via [`Error::engine_logical`](crate::Error::engine_logical).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    command::{BackupCommand, RestoreCommand},
    record::{BackupLsns, DatabaseName, RecoveryModel},
    Result,
};

/// What the engine reports after writing a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub lsns: BackupLsns,
    pub size_bytes: u64,
}

/// A logical file inside a backup artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub logical_name: String,
    pub physical_name: String,
    /// `D` for data, `L` for log
    pub file_type: String,
}

/// Outcome of a consistency check.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub clean: bool,
    pub messages: Vec<String>,
}

impl ConsistencyReport {
    #[must_use]
    pub const fn clean() -> Self {
        Self {
            clean: true,
            messages: Vec::new(),
        }
    }

    #[must_use]
    pub fn corrupt(messages: Vec<String>) -> Self {
        Self {
            clean: false,
            messages,
        }
    }
}

/// Operations backchain issues against a database server.
#[async_trait]
pub trait DatabaseEngine: Send + Sync {
    /// Recovery model of `database`.
    ///
    /// # Errors
    ///
    /// Returns an input error if the database does not exist.
    async fn recovery_model(&self, database: &DatabaseName) -> Result<RecoveryModel>;

    /// Write a backup to `command.target` and report its LSN metadata.
    async fn backup(&self, command: &BackupCommand) -> Result<BackupArtifact>;

    /// Apply one restore step.
    async fn restore(&self, command: &RestoreCommand) -> Result<()>;

    /// Read an artifact end to end, checking page checksums.
    ///
    /// `Ok(false)` means the artifact is readable but damaged.
    async fn verify_artifact(&self, path: &Path) -> Result<bool>;

    /// Logical files contained in an artifact.
    async fn list_files(&self, path: &Path) -> Result<Vec<ArtifactFile>>;

    /// Run a consistency check against an online database.
    async fn check_consistency(&self, database: &DatabaseName) -> Result<ConsistencyReport>;

    /// Drop a database, whatever state it is in.
    async fn drop_database(&self, database: &DatabaseName) -> Result<()>;
}
