//! Backup executor.
//!
//! One invocation produces exactly one catalog record:
//!
//! 1. validate preconditions (no record is written for rejected input)
//! 2. take the database lease
//! 3. insert an `IN_PROGRESS` record keyed by the idempotency token
//! 4. back up to the staging directory, checksum, promote to the destination
//! 5. complete the record as `SUCCEEDED` (or `FAILED`, removing only what
//!    this run promoted)
//! 6. re-read the promoted artifact and record the checksum verdict

use std::{path::PathBuf, sync::Arc};

use backchain_core::{
    checksum::checksum_file,
    error::{CatalogError, InputError},
    retry::with_retry,
    BackupCommand, BackupLsns, BackupRecord, BackupStatus, BackupType, BlobStore, Component,
    DatabaseEngine, DatabaseName, Error, Result, RetryPolicy,
};
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::{
    catalog::{Catalog, Completion, RecordOrder, RecordQuery},
    lease::LeaseManager,
    verify::{checksum_verdict, VerificationResult},
};

/// Per-invocation backup options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupOptions {
    pub copy_only: bool,
    pub compression: bool,
    /// Retried invocations with the same token land on the same record
    pub idempotency_token: Option<String>,
    /// Final artifact location, which must not exist yet; derived from the
    /// backup root when unset
    pub destination: Option<String>,
}

/// Issues backups and catalogs their results.
#[derive(Clone)]
pub struct BackupExecutor {
    catalog: Arc<dyn Catalog>,
    engine: Arc<dyn DatabaseEngine>,
    store: Arc<dyn BlobStore>,
    leases: LeaseManager,
    retry: RetryPolicy,
    staging_dir: PathBuf,
    backup_root: String,
}

/// `<root>/<db>/<TYPE>/<db>_<TYPE>_<yyyymmdd_hhmmss>.<bak|trn>`
#[must_use]
pub fn artifact_location(
    backup_root: &str,
    database: &DatabaseName,
    backup_type: BackupType,
    at: DateTime<Utc>,
) -> String {
    let db: String = database
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "{root}/{db}/{backup_type}/{db}_{backup_type}_{stamp}.{ext}",
        root = backup_root.trim_end_matches('/'),
        stamp = at.format("%Y%m%d_%H%M%S"),
        ext = backup_type.extension()
    )
}

impl BackupExecutor {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn Catalog>,
        engine: Arc<dyn DatabaseEngine>,
        store: Arc<dyn BlobStore>,
        leases: LeaseManager,
    ) -> Self {
        Self {
            catalog,
            engine,
            store,
            leases,
            retry: RetryPolicy::default(),
            staging_dir: PathBuf::from(".backchain/staging"),
            backup_root: "backups".to_string(),
        }
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_staging_dir(mut self, staging_dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = staging_dir.into();
        self
    }

    #[must_use]
    pub fn with_backup_root(mut self, backup_root: impl Into<String>) -> Self {
        self.backup_root = backup_root.into();
        self
    }

    /// Take a backup of `database` and catalog it.
    ///
    /// # Errors
    ///
    /// - `InputError::InvalidRecoveryModel` for LOG on a SIMPLE database
    /// - `InputError::NoBaseBackup` for DIFFERENTIAL without an anchorable FULL
    /// - `InputError::InvalidArgument` for an explicit destination that already exists
    /// - `ExecutionError::LeaseHeld` (after retries) if the database is busy
    /// - engine and storage errors; the record is then `FAILED`
    #[instrument(skip(self, options), fields(database = %database, backup_type = %backup_type))]
    pub async fn execute(
        &self,
        database: &DatabaseName,
        backup_type: BackupType,
        options: &BackupOptions,
    ) -> Result<BackupRecord> {
        if let Some(token) = &options.idempotency_token {
            if let Some(existing) = self.catalog.find_by_token(database, token).await? {
                return replay(existing);
            }
        }

        let anchors = self
            .check_preconditions(database, backup_type)
            .await
            .map_err(|e| e.tagged(Component::Executor, None))?;

        let token = options
            .idempotency_token
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let holder = format!("backup:{token}");

        let guard = with_retry("acquire lease", &self.retry, || {
            self.leases.acquire_guarded(database, &holder)
        })
        .await
        .map_err(|e| e.tagged(Component::Lease, None))?;

        let result = self
            .run_locked(database, backup_type, options, &token, &anchors)
            .await;

        if let Err(e) = guard.release().await {
            warn!(database = %database, error = %e, "Failed to release lease");
        }
        result
    }

    /// FULLs a new differential may anchor to (newest first); empty for other types.
    async fn check_preconditions(
        &self,
        database: &DatabaseName,
        backup_type: BackupType,
    ) -> Result<Vec<BackupRecord>> {
        match backup_type {
            BackupType::Full => Ok(Vec::new()),
            BackupType::Log => {
                let model = with_retry("read recovery model", &self.retry, || {
                    self.engine.recovery_model(database)
                })
                .await?;
                if model.supports_log_backups() {
                    Ok(Vec::new())
                } else {
                    Err(InputError::InvalidRecoveryModel {
                        database: database.to_string(),
                        model,
                    }
                    .into())
                }
            }
            BackupType::Differential => {
                let fulls = self
                    .catalog
                    .query(
                        &RecordQuery::for_database(database)
                            .of_type(BackupType::Full)
                            .with_statuses(&[
                                BackupStatus::Succeeded,
                                BackupStatus::Verified,
                                BackupStatus::VerificationFailed,
                            ])
                            .copy_only(false)
                            .ordered(RecordOrder::NewestFirst),
                    )
                    .await?
                    .into_iter()
                    .filter(BackupRecord::can_anchor_differentials)
                    .collect::<Vec<_>>();
                if fulls.is_empty() {
                    Err(InputError::NoBaseBackup {
                        database: database.to_string(),
                    }
                    .into())
                } else {
                    Ok(fulls)
                }
            }
        }
    }

    async fn run_locked(
        &self,
        database: &DatabaseName,
        backup_type: BackupType,
        options: &BackupOptions,
        token: &str,
        anchors: &[BackupRecord],
    ) -> Result<BackupRecord> {
        let destination = match &options.destination {
            Some(destination) => {
                if self.store.exists(destination).await? {
                    return Err(Error::invalid_argument(format!(
                        "Destination {destination} already holds an artifact; choose another path"
                    ))
                    .tagged(Component::Executor, None));
                }
                destination.clone()
            }
            None => self.default_destination(database, backup_type).await?,
        };

        let record = BackupRecord::in_progress(
            database.clone(),
            backup_type,
            &destination,
            options.copy_only,
            token,
        );
        match self.catalog.record(&record).await {
            Ok(_) => {}
            Err(e) if matches!(e.root(), Error::Catalog(CatalogError::DuplicateRecord { .. })) => {
                // A concurrent invocation with the same token got there first
                return match self.catalog.find_by_token(database, token).await? {
                    Some(existing) => replay(existing),
                    None => Err(e),
                };
            }
            Err(e) => return Err(e.tagged(Component::Catalog, None)),
        }
        info!(record = %record.id, destination = %destination, "Backup started");

        let staged = self
            .staging_dir
            .join(format!("{}.{}", record.id, backup_type.extension()));

        let produced = self.produce(&record, &staged, options, anchors).await;
        let promoted = produced.is_ok();
        let completed = match produced {
            Ok(completion) => self
                .catalog
                .complete(&record.id, &completion)
                .await
                .map_err(|e| e.tagged(Component::Catalog, None)),
            Err(e) => Err(e),
        };

        match completed {
            Ok(done) => {
                let lsn_range = done
                    .lsns
                    .map_or_else(String::new, |l| format!("{}-{}", l.first, l.last));
                info!(
                    record = %done.id,
                    size_bytes = done.size_bytes,
                    lsn_range = %lsn_range,
                    "Backup finished"
                );
                Ok(self.verify_checksum(done).await)
            }
            Err(e) => {
                self.discard(&staged, promoted.then_some(destination.as_str()))
                    .await;
                if let Err(mark) = self
                    .catalog
                    .complete(&record.id, &Completion::failed(e.to_string()))
                    .await
                {
                    warn!(record = %record.id, error = %mark, "Could not mark backup as failed");
                }
                warn!(record = %record.id, error = %e, "Backup failed");
                Err(e)
            }
        }
    }

    async fn default_destination(
        &self,
        database: &DatabaseName,
        backup_type: BackupType,
    ) -> Result<String> {
        let base = artifact_location(&self.backup_root, database, backup_type, Utc::now());
        if self.store.exists(&base).await? {
            // Two backups within the same second
            let (stem, ext) = base
                .rsplit_once('.')
                .unwrap_or((base.as_str(), backup_type.extension()));
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            return Ok(format!("{stem}_{}.{ext}", suffix.get(..8).unwrap_or(&suffix)));
        }
        Ok(base)
    }

    async fn produce(
        &self,
        record: &BackupRecord,
        staged: &std::path::Path,
        options: &BackupOptions,
        anchors: &[BackupRecord],
    ) -> Result<Completion> {
        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|e| {
                Error::io_error(format!(
                    "Failed to create staging directory {}: {e}",
                    self.staging_dir.display()
                ))
                .tagged(Component::Executor, None)
            })?;

        let command = BackupCommand::new(record.database_name.clone(), record.backup_type, staged)
            .with_copy_only(options.copy_only)
            .with_compression(options.compression);
        let artifact = with_retry("backup", &self.retry, || self.engine.backup(&command))
            .await
            .map_err(|e| e.tagged(Component::Engine, None))?;

        let checksum = checksum_file(&artifact.path)
            .await
            .map_err(|e| e.tagged(Component::Executor, None))?;

        let lsns = match record.backup_type {
            BackupType::Differential => anchor_differential(artifact.lsns, anchors),
            BackupType::Full | BackupType::Log => artifact.lsns,
        };

        with_retry("promote artifact", &self.retry, || {
            self.store.promote(&artifact.path, &record.location)
        })
        .await
        .map_err(|e| e.tagged(Component::Storage, None))?;

        Ok(Completion::succeeded(lsns, artifact.size_bytes, checksum))
    }

    /// Remove whatever a failed run left behind.
    ///
    /// `promoted` is the destination this run moved its artifact to, if it
    /// got that far.
    async fn discard(&self, staged: &std::path::Path, promoted: Option<&str>) {
        if let Err(e) = tokio::fs::remove_file(staged).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %staged.display(), error = %e, "Could not remove staged artifact");
            }
        }
        if let Some(destination) = promoted {
            if let Err(e) = self.store.delete(destination).await {
                warn!(destination, error = %e, "Could not remove promoted artifact");
            }
        }
    }

    /// Checksum the promoted artifact and record the verdict.
    ///
    /// A verdict that cannot be reached leaves the record `SUCCEEDED`.
    async fn verify_checksum(&self, record: BackupRecord) -> BackupRecord {
        let (status, detail) = match checksum_verdict(self.store.as_ref(), &record).await {
            Ok(VerificationResult::Passed) => (BackupStatus::Verified, None),
            Ok(VerificationResult::Failed { reason }) => {
                warn!(record = %record.id, reason = %reason, "Backup failed checksum verification");
                (BackupStatus::VerificationFailed, Some(reason))
            }
            Err(e) => {
                warn!(record = %record.id, error = %e, "Could not verify backup checksum");
                return record;
            }
        };

        match self
            .catalog
            .update_status(&record.id, status, detail.as_deref())
            .await
        {
            Ok(()) => BackupRecord {
                status,
                error_detail: detail,
                ..record
            },
            Err(e) => {
                warn!(record = %record.id, error = %e, "Could not record checksum verdict");
                record
            }
        }
    }
}

/// Express a differential's base as the anchoring FULL's `last_lsn`.
///
/// The engine reports the base full's checkpoint; the catalog anchors
/// differentials by the full's `last_lsn`. A base matching no cataloged full
/// is kept as reported, which leaves the differential unanchored.
fn anchor_differential(reported: BackupLsns, anchors: &[BackupRecord]) -> BackupLsns {
    let base = reported.database_backup;
    match anchors
        .iter()
        .filter_map(|r| r.lsns)
        .find(|full| full.checkpoint == base)
    {
        Some(full) => BackupLsns {
            database_backup: full.last,
            ..reported
        },
        None => {
            warn!(
                reported = %base,
                "Differential base matches no cataloged full backup; it will not join restore chains"
            );
            reported
        }
    }
}

fn replay(existing: BackupRecord) -> Result<BackupRecord> {
    match existing.status {
        BackupStatus::InProgress => Err(Error::invalid_argument(format!(
            "Backup with token '{}' is still in progress (record {})",
            existing.idempotency_token, existing.id
        ))),
        BackupStatus::Failed => Err(Error::invalid_argument(format!(
            "Token '{}' belongs to failed backup {}: {}\n\nRetry with a new idempotency token.",
            existing.idempotency_token,
            existing.id,
            existing.error_detail.as_deref().unwrap_or("no detail recorded")
        ))),
        BackupStatus::Succeeded | BackupStatus::Verified | BackupStatus::VerificationFailed => {
            info!(record = %existing.id, token = %existing.idempotency_token, "Backup already cataloged for this token");
            Ok(existing)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use backchain_core::Lsn;

    #[test]
    fn test_artifact_location_layout() {
        let db = DatabaseName::parse("Sales DB").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 1, 30, 5).unwrap();
        assert_eq!(
            artifact_location("/mnt/backups/", &db, BackupType::Log, at),
            "/mnt/backups/Sales_DB/LOG/Sales_DB_LOG_20240301_013005.trn"
        );
        assert_eq!(
            artifact_location("file:///b", &db, BackupType::Full, at),
            "file:///b/Sales_DB/FULL/Sales_DB_FULL_20240301_013005.bak"
        );
    }

    fn full_with(first: u128, checkpoint: u128, last: u128) -> BackupRecord {
        let mut record = BackupRecord::in_progress(
            DatabaseName::parse("sales").unwrap(),
            BackupType::Full,
            "/b",
            false,
            uuid::Uuid::new_v4().to_string(),
        );
        record.status = BackupStatus::Succeeded;
        record.lsns = Some(BackupLsns {
            first: Lsn::new(first),
            last: Lsn::new(last),
            checkpoint: Lsn::new(checkpoint),
            database_backup: Lsn::new(0),
        });
        record
    }

    fn diff_reporting(base: u128) -> BackupLsns {
        BackupLsns {
            first: Lsn::new(300),
            last: Lsn::new(350),
            checkpoint: Lsn::new(300),
            database_backup: Lsn::new(base),
        }
    }

    #[test]
    fn test_differential_anchor_maps_checkpoint_to_last() {
        let anchors = vec![full_with(400, 420, 450), full_with(100, 150, 200)];
        let lsns = anchor_differential(diff_reporting(150), &anchors);
        assert_eq!(lsns.database_backup, Lsn::new(200));
        assert_eq!(lsns.last, Lsn::new(350));
    }

    #[test]
    fn test_differential_anchor_matches_checkpoint_only() {
        let anchors = vec![full_with(220, 250, 300), full_with(100, 150, 200)];
        let lsns = anchor_differential(diff_reporting(250), &anchors);
        assert_eq!(lsns.database_backup, Lsn::new(300));

        // A full's first LSN is not its checkpoint
        let lsns = anchor_differential(diff_reporting(220), &anchors);
        assert_eq!(lsns, diff_reporting(220));
    }

    #[test]
    fn test_unmatched_differential_base_is_kept() {
        let anchors = vec![full_with(400, 420, 450), full_with(100, 150, 200)];
        let lsns = anchor_differential(diff_reporting(999), &anchors);
        assert_eq!(lsns, diff_reporting(999));
    }

    #[test]
    fn test_replay_rules() {
        let mut record = full_with(1, 1, 2);
        assert!(replay(record.clone()).is_ok());

        record.status = BackupStatus::Failed;
        record.error_detail = Some("disk full".to_string());
        let err = replay(record.clone()).unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert_eq!(err.exit_code(), 1);

        record.status = BackupStatus::InProgress;
        assert!(replay(record).unwrap_err().to_string().contains("in progress"));
    }
}
