//! Backup catalog rows and their vocabulary.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{error::InputError, lsn::Lsn, Error, Result};

// ═══════════════════════════════════════════════════════════════════════════
// DATABASE NAME
// ═══════════════════════════════════════════════════════════════════════════

/// Longest identifier the engine accepts.
const MAX_DATABASE_NAME_LEN: usize = 128;

/// Names that are never valid backup or restore targets.
const RESERVED_NAMES: &[&str] = &["master", "model", "msdb", "tempdb", "resource"];

/// A validated database name.
///
/// Validation rejects names the engine would reject, plus system databases,
/// which are never restore targets. Quoting for commands happens in [`crate::tsql`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatabaseName(String);

impl DatabaseName {
    /// Parse and validate a database name.
    ///
    /// # Errors
    ///
    /// Returns `InputError::InvalidDatabaseName` if the name is empty, too long,
    /// contains control characters, or names a system database.
    pub fn parse(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let trimmed = name.trim();
        let reject = |reason: &str| {
            Err(Error::Input(InputError::InvalidDatabaseName {
                name: name.clone(),
                reason: reason.to_string(),
            }))
        };

        if trimmed.is_empty() {
            return reject("name cannot be empty or whitespace-only");
        }
        if trimmed.chars().count() > MAX_DATABASE_NAME_LEN {
            return reject("name exceeds 128 characters");
        }
        if trimmed.chars().any(char::is_control) {
            return reject("name contains control characters");
        }
        let lower = trimmed.to_lowercase();
        if RESERVED_NAMES.iter().any(|&reserved| reserved == lower) {
            return reject("system databases are not managed by backchain");
        }

        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for DatabaseName {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<DatabaseName> for String {
    fn from(name: DatabaseName) -> Self {
        name.0
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RECORD IDENTIFIER
// ═══════════════════════════════════════════════════════════════════════════

/// Opaque catalog record identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for scratch names and log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ENUMS
// ═══════════════════════════════════════════════════════════════════════════

/// Kind of backup.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupType {
    #[strum(to_string = "FULL")]
    Full,
    #[strum(to_string = "DIFFERENTIAL", serialize = "DIFF")]
    Differential,
    #[strum(to_string = "LOG")]
    Log,
}

impl BackupType {
    /// File extension conventionally used for the artifact.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Full | Self::Differential => "bak",
            Self::Log => "trn",
        }
    }
}

/// Lifecycle of a catalog record.
///
/// Transitions only move forward:
/// `IN_PROGRESS -> {SUCCEEDED, FAILED}`,
/// `SUCCEEDED -> {VERIFIED, VERIFICATION_FAILED}`, and the two verification
/// outcomes can be re-verified into either outcome.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupStatus {
    InProgress,
    Succeeded,
    Failed,
    Verified,
    VerificationFailed,
}

impl BackupStatus {
    /// Whether `self -> next` is an allowed transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::InProgress => matches!(next, Self::Succeeded | Self::Failed),
            Self::Succeeded | Self::Verified | Self::VerificationFailed => {
                matches!(next, Self::Verified | Self::VerificationFailed)
            }
            Self::Failed => false,
        }
    }

    /// Statuses that may transition into `next`.
    #[must_use]
    pub fn predecessors(next: Self) -> Vec<Self> {
        [
            Self::InProgress,
            Self::Succeeded,
            Self::Failed,
            Self::Verified,
            Self::VerificationFailed,
        ]
        .into_iter()
        .filter(|s| s.can_transition_to(next))
        .collect()
    }

    /// Whether the artifact exists and can be verified.
    #[must_use]
    pub const fn is_completed(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Verified | Self::VerificationFailed
        )
    }
}

/// Database recovery model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryModel {
    Full,
    BulkLogged,
    Simple,
}

impl RecoveryModel {
    #[must_use]
    pub const fn supports_log_backups(self) -> bool {
        matches!(self, Self::Full | Self::BulkLogged)
    }
}

/// Which verification outcomes make a record eligible for a restore chain.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum VerificationPolicy {
    /// `SUCCEEDED` and `VERIFIED` records; failed verification is excluded
    #[default]
    ExcludeFailed,
    /// Only `VERIFIED` records
    RequireVerified,
    /// Also accept `VERIFICATION_FAILED` records
    AllowFailed,
}

impl VerificationPolicy {
    /// Statuses eligible under this policy.
    #[must_use]
    pub fn eligible_statuses(self) -> Vec<BackupStatus> {
        match self {
            Self::ExcludeFailed => vec![BackupStatus::Succeeded, BackupStatus::Verified],
            Self::RequireVerified => vec![BackupStatus::Verified],
            Self::AllowFailed => vec![
                BackupStatus::Succeeded,
                BackupStatus::Verified,
                BackupStatus::VerificationFailed,
            ],
        }
    }

    #[must_use]
    pub fn admits(self, status: BackupStatus) -> bool {
        self.eligible_statuses().contains(&status)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BACKUP RECORD
// ═══════════════════════════════════════════════════════════════════════════

/// Sequence markers reported by the engine for a completed backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupLsns {
    pub first: Lsn,
    pub last: Lsn,
    pub checkpoint: Lsn,
    /// For differentials: the `last` LSN of the full backup it is anchored to
    pub database_backup: Lsn,
}

/// One row per attempted backup.
///
/// `lsns` and `finished_at` are unset while the backup is `IN_PROGRESS` and
/// for records that failed before the engine reported them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: RecordId,
    pub database_name: DatabaseName,
    pub backup_type: BackupType,
    pub lsns: Option<BackupLsns>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub location: String,
    pub size_bytes: u64,
    pub status: BackupStatus,
    pub checksum: Option<String>,
    pub is_copy_only: bool,
    /// Caller-supplied key that makes retried invocations land on one row
    pub idempotency_token: String,
    pub error_detail: Option<String>,
}

impl BackupRecord {
    /// Start a new `IN_PROGRESS` record.
    #[must_use]
    pub fn in_progress(
        database_name: DatabaseName,
        backup_type: BackupType,
        location: impl Into<String>,
        is_copy_only: bool,
        idempotency_token: impl Into<String>,
    ) -> Self {
        Self {
            id: RecordId::generate(),
            database_name,
            backup_type,
            lsns: None,
            started_at: Utc::now(),
            finished_at: None,
            location: location.into(),
            size_bytes: 0,
            status: BackupStatus::InProgress,
            checksum: None,
            is_copy_only,
            idempotency_token: idempotency_token.into(),
            error_detail: None,
        }
    }

    #[must_use]
    pub fn first_lsn(&self) -> Option<Lsn> {
        self.lsns.map(|l| l.first)
    }

    #[must_use]
    pub fn last_lsn(&self) -> Option<Lsn> {
        self.lsns.map(|l| l.last)
    }

    /// Whether this record may take part in a restore chain under `policy`.
    #[must_use]
    pub fn is_eligible(&self, policy: VerificationPolicy) -> bool {
        self.lsns.is_some() && self.finished_at.is_some() && policy.admits(self.status)
    }

    /// Whether this record may anchor later differential backups.
    ///
    /// The engine bases a differential on the last full it completed, so a
    /// full that failed verification still anchors.
    #[must_use]
    pub fn can_anchor_differentials(&self) -> bool {
        self.backup_type == BackupType::Full
            && !self.is_copy_only
            && self.lsns.is_some()
            && self.status.is_completed()
    }

    /// `id (TYPE lsn first-last, finished)` for log lines and CLI output.
    #[must_use]
    pub fn describe(&self) -> String {
        let range = self.lsns.map_or_else(
            || "no lsn".to_string(),
            |l| format!("lsn {}-{}", l.first, l.last),
        );
        let finished = self
            .finished_at
            .map_or_else(|| "unfinished".to_string(), |t| t.to_rfc3339());
        format!(
            "{} ({} {range}, {finished})",
            self.id.short(),
            self.backup_type
        )
    }
}
