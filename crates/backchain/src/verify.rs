//! Backup verification.
//!
//! Checksum mode re-reads the artifact and compares it with the cataloged
//! SHA-256; the executor runs it after every backup. Full-restore mode
//! restores the chain ending at the record into a disposable scratch
//! database, runs the engine's consistency check, and drops the scratch
//! database whatever the outcome.
//!
//! Either way the verdict is written back as `VERIFIED` or
//! `VERIFICATION_FAILED`. The artifact itself is never modified.

use std::{path::PathBuf, sync::Arc};

use backchain_core::{
    checksum::{checksum_file, sha256_hex},
    error::{EngineFailure, ExecutionError},
    BackupRecord, BackupStatus, BackupType, BlobStore, Component, DatabaseEngine, DatabaseName,
    Error, FileMove, RecordId, Result,
};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::{
    catalog::Catalog,
    engine::relocation_path,
    resolver::ChainResolver,
    restore::{RestoreOrchestrator, RestoreRequest},
};

/// SQL Server identifier limit.
const MAX_DATABASE_NAME: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VerificationMode {
    /// Recompute and compare the artifact checksum
    Checksum,
    /// Restore into a scratch database and run a consistency check
    FullRestore,
}

/// Verdict for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationResult {
    Passed,
    Failed { reason: String },
}

impl VerificationResult {
    #[must_use]
    pub const fn passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    const fn status(&self) -> BackupStatus {
        match self {
            Self::Passed => BackupStatus::Verified,
            Self::Failed { .. } => BackupStatus::VerificationFailed,
        }
    }
}

/// What was verified and how it went.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub record_id: RecordId,
    pub database: DatabaseName,
    pub backup_type: BackupType,
    pub location: String,
    pub mode: VerificationMode,
    #[serde(flatten)]
    pub result: VerificationResult,
    pub status: BackupStatus,
}

/// Compare an artifact's content with its cataloged checksum.
///
/// Missing artifacts and mismatches are verdicts, not errors.
///
/// # Errors
///
/// Returns storage or IO errors when the artifact exists but cannot be read.
pub async fn checksum_verdict(
    store: &dyn BlobStore,
    record: &BackupRecord,
) -> Result<VerificationResult> {
    let Some(expected) = record.checksum.as_deref() else {
        return Ok(VerificationResult::Failed {
            reason: format!("No checksum cataloged for {}", record.location),
        });
    };
    if !store.exists(&record.location).await? {
        return Ok(VerificationResult::Failed {
            reason: format!("Artifact {} is missing", record.location),
        });
    }

    let actual = match store.local_path(&record.location) {
        Some(path) => checksum_file(&path).await?,
        None => sha256_hex(&store.get(&record.location).await?),
    };

    if actual.eq_ignore_ascii_case(expected) {
        Ok(VerificationResult::Passed)
    } else {
        Ok(VerificationResult::Failed {
            reason: ExecutionError::ChecksumMismatch {
                location: record.location.clone(),
                expected: expected.to_string(),
                actual,
            }
            .to_string(),
        })
    }
}

/// Scratch database name `<prefix><db>_<shortid>`, kept within the identifier limit.
#[must_use]
pub fn scratch_database_name(prefix: &str, database: &DatabaseName, record: &RecordId) -> String {
    let suffix = format!("_{}", record.short());
    let room = MAX_DATABASE_NAME.saturating_sub(prefix.chars().count() + suffix.chars().count());
    let db: String = database.as_str().chars().take(room).collect();
    format!("{prefix}{db}{suffix}")
}

/// Whether a failed restore says something about the artifact rather than the environment.
fn is_artifact_fault(error: &Error) -> bool {
    matches!(
        error.root(),
        Error::PartialRestore { .. }
            | Error::Execution(
                ExecutionError::Engine {
                    kind: EngineFailure::Logical,
                    ..
                } | ExecutionError::ChecksumMismatch { .. }
            )
    )
}

/// Whether a failed chain lookup is a verdict on the record's lineage.
fn is_chain_fault(error: &Error) -> bool {
    matches!(error.root(), Error::Resolution(_) | Error::Input(_))
}

/// Verifies cataloged backups and records the verdict.
#[derive(Clone)]
pub struct VerificationService {
    catalog: Arc<dyn Catalog>,
    engine: Arc<dyn DatabaseEngine>,
    store: Arc<dyn BlobStore>,
    resolver: ChainResolver,
    orchestrator: RestoreOrchestrator,
    scratch_dir: PathBuf,
    scratch_prefix: String,
}

impl VerificationService {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn Catalog>,
        engine: Arc<dyn DatabaseEngine>,
        store: Arc<dyn BlobStore>,
        resolver: ChainResolver,
        orchestrator: RestoreOrchestrator,
    ) -> Self {
        Self {
            catalog,
            engine,
            store,
            resolver,
            orchestrator,
            scratch_dir: PathBuf::from(".backchain/scratch"),
            scratch_prefix: "backchain_verify_".to_string(),
        }
    }

    #[must_use]
    pub fn with_scratch(mut self, dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        self.scratch_dir = dir.into();
        self.scratch_prefix = prefix.into();
        self
    }

    /// Verify one record and write the verdict to the catalog.
    ///
    /// # Errors
    ///
    /// Returns an input error for records that never completed, and
    /// environment failures (catalog, unreachable storage or engine) that
    /// prevent reaching a verdict.
    #[instrument(skip(self, record), fields(record = %record.id, database = %record.database_name))]
    pub async fn verify(
        &self,
        record: &BackupRecord,
        mode: VerificationMode,
    ) -> Result<VerificationReport> {
        if !record.status.is_completed() {
            return Err(Error::invalid_argument(format!(
                "Backup {} is {} and has no artifact to verify",
                record.id, record.status
            )));
        }

        let mut result = checksum_verdict(self.store.as_ref(), record)
            .await
            .map_err(|e| e.tagged(Component::Verification, None))?;
        if mode == VerificationMode::FullRestore && result.passed() {
            result = self.restore_and_check(record).await?;
        }

        let status = result.status();
        let detail = match &result {
            VerificationResult::Passed => None,
            VerificationResult::Failed { reason } => Some(reason.as_str()),
        };
        self.catalog
            .update_status(&record.id, status, detail)
            .await
            .map_err(|e| e.tagged(Component::Catalog, None))?;

        match &result {
            VerificationResult::Passed => info!(%mode, "Backup verified"),
            VerificationResult::Failed { reason } => {
                warn!(%mode, reason = %reason, "Backup failed verification");
            }
        }

        Ok(VerificationReport {
            record_id: record.id.clone(),
            database: record.database_name.clone(),
            backup_type: record.backup_type,
            location: record.location.clone(),
            mode,
            result,
            status,
        })
    }

    /// Verify the newest completed record of each backup type.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if the database has no completed backups.
    pub async fn verify_latest(
        &self,
        database: &DatabaseName,
        mode: VerificationMode,
    ) -> Result<Vec<VerificationReport>> {
        let mut reports = Vec::new();
        for backup_type in [BackupType::Full, BackupType::Differential, BackupType::Log] {
            if let Some(record) = self.catalog.latest(database, backup_type).await? {
                reports.push(self.verify(&record, mode).await?);
            }
        }
        if reports.is_empty() {
            return Err(Error::not_found(format!(
                "No completed backups cataloged for '{database}'"
            )));
        }
        Ok(reports)
    }

    async fn restore_and_check(&self, record: &BackupRecord) -> Result<VerificationResult> {
        if let Some(path) = self.store.local_path(&record.location) {
            let readable = self
                .engine
                .verify_artifact(&path)
                .await
                .map_err(|e| e.tagged(Component::Engine, None))?;
            if !readable {
                return Ok(VerificationResult::Failed {
                    reason: format!("Engine could not read {}", record.location),
                });
            }
        }

        let chain = match self.resolver.resolve_through(record).await {
            Ok(chain) => chain,
            Err(e) if is_chain_fault(&e) => {
                return Ok(VerificationResult::Failed {
                    reason: format!("No restorable chain ends at this backup: {e}"),
                })
            }
            Err(e) => return Err(e),
        };

        let scratch = DatabaseName::parse(scratch_database_name(
            &self.scratch_prefix,
            &record.database_name,
            &record.id,
        ))?;
        let relocations = self.relocations(chain.full(), &scratch).await?;

        info!(scratch = %scratch, steps = chain.len(), "Restoring into scratch database");
        let request = RestoreRequest::new(scratch.clone()).with_relocations(relocations);
        let restored = match self.orchestrator.start(chain, request).await {
            Ok(handle) => handle.wait().await,
            Err(e) => Err(e),
        };

        let verdict = match restored {
            Ok(_) => match self.engine.check_consistency(&scratch).await {
                Ok(report) if report.clean => Ok(VerificationResult::Passed),
                Ok(report) => Ok(VerificationResult::Failed {
                    reason: format!("Consistency check failed: {}", report.messages.join("; ")),
                }),
                Err(e) => Err(e.tagged(Component::Engine, None)),
            },
            Err(e) if is_artifact_fault(&e) => Ok(VerificationResult::Failed {
                reason: format!("Restore failed: {}", e.root()),
            }),
            Err(e) => {
                if !matches!(e.root(), Error::Execution(ExecutionError::LeaseHeld { .. })) {
                    self.discard_scratch(&scratch).await;
                }
                return Err(e);
            }
        };

        self.discard_scratch(&scratch).await;
        verdict
    }

    async fn relocations(
        &self,
        full: Option<&BackupRecord>,
        scratch: &DatabaseName,
    ) -> Result<Vec<FileMove>> {
        let Some(full) = full else {
            return Ok(Vec::new());
        };
        let Some(path) = self.store.local_path(&full.location) else {
            return Err(Error::invalid_config(format!(
                "Full verification needs a locally reachable artifact, got {}",
                full.location
            )));
        };
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| {
                Error::io_error(format!(
                    "Failed to create scratch directory {}: {e}",
                    self.scratch_dir.display()
                ))
            })?;

        let files = self
            .engine
            .list_files(&path)
            .await
            .map_err(|e| e.tagged(Component::Engine, None))?;
        Ok(files
            .iter()
            .map(|file| FileMove {
                logical_name: file.logical_name.clone(),
                physical_path: relocation_path(&self.scratch_dir, scratch, file),
            })
            .collect())
    }

    async fn discard_scratch(&self, scratch: &DatabaseName) {
        match self.engine.drop_database(scratch).await {
            Ok(()) => info!(scratch = %scratch, "Dropped scratch database"),
            Err(e) => warn!(scratch = %scratch, error = %e, "Failed to drop scratch database"),
        }
    }
}
