//! Typed engine commands.
//!
//! Commands are plain values. Rendering to engine text lives in [`crate::tsql`],
//! so callers never concatenate identifiers or paths into command strings.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    record::{BackupType, DatabaseName},
    Error, Result,
};

/// How a restore step leaves the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "stop_at", rename_all = "snake_case")]
pub enum RestoreMode {
    /// Leave the database restoring so further backups can be applied
    NoRecovery,
    /// Bring the database online
    Recovery,
    /// Replay the log up to a timestamp, then bring the database online
    RecoveryStopAt(DateTime<Utc>),
}

impl RestoreMode {
    #[must_use]
    pub const fn recovers(self) -> bool {
        !matches!(self, Self::NoRecovery)
    }
}

/// Relocate a database file during restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMove {
    pub logical_name: String,
    pub physical_path: PathBuf,
}

impl FileMove {
    /// Parse `logical=path` as given on the command line.
    ///
    /// # Errors
    ///
    /// Returns an input error if either side is empty.
    pub fn parse(text: &str) -> Result<Self> {
        let (logical, path) = text
            .split_once('=')
            .ok_or_else(|| Error::invalid_argument(format!("Expected logical=path, got '{text}'")))?;
        let logical = logical.trim();
        let path = path.trim();
        if logical.is_empty() || path.is_empty() {
            return Err(Error::invalid_argument(format!(
                "Both logical name and path are required in '{text}'"
            )));
        }
        Ok(Self {
            logical_name: logical.to_string(),
            physical_path: PathBuf::from(path),
        })
    }
}

/// A backup to issue against the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupCommand {
    pub database: DatabaseName,
    pub backup_type: BackupType,
    /// Where the engine writes the artifact (staging, not the final destination)
    pub target: PathBuf,
    pub copy_only: bool,
    pub compression: bool,
}

impl BackupCommand {
    #[must_use]
    pub fn new(database: DatabaseName, backup_type: BackupType, target: impl Into<PathBuf>) -> Self {
        Self {
            database,
            backup_type,
            target: target.into(),
            copy_only: false,
            compression: false,
        }
    }

    #[must_use]
    pub const fn with_copy_only(mut self, copy_only: bool) -> Self {
        self.copy_only = copy_only;
        self
    }

    #[must_use]
    pub const fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }
}

/// One restore step to issue against the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreCommand {
    pub database: DatabaseName,
    pub backup_type: BackupType,
    pub source: PathBuf,
    pub mode: RestoreMode,
    pub relocations: Vec<FileMove>,
    pub replace: bool,
}

impl RestoreCommand {
    #[must_use]
    pub fn new(
        database: DatabaseName,
        backup_type: BackupType,
        source: impl Into<PathBuf>,
        mode: RestoreMode,
    ) -> Self {
        Self {
            database,
            backup_type,
            source: source.into(),
            mode,
            relocations: Vec::new(),
            replace: false,
        }
    }

    #[must_use]
    pub fn with_relocations(mut self, relocations: Vec<FileMove>) -> Self {
        self.relocations = relocations;
        self
    }

    #[must_use]
    pub const fn with_replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }
}
