//! Backup catalog persistence using `SQLx`
//!
//! The catalog is the single shared store: backup records, restore jobs and
//! (through [`crate::lease`]) per-database leases all live in one `SQLite`
//! file. Every write touches one row in one statement, so readers never see
//! a half-written record.
//!
//! Components receive the catalog as an `Arc<dyn Catalog>`.

use std::path::Path;

use async_trait::async_trait;
use backchain_core::{
    BackupLsns, BackupRecord, BackupStatus, BackupType, DatabaseName, Error, JobId, Lsn, RecordId,
    RestoreJob, Result, VerificationPolicy,
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

mod job_ops;
mod query;
mod record_ops;
mod schema;

pub use job_ops::JobOps;
pub(crate) use query::format_timestamp;
pub use record_ops::RecordOps;

// ═══════════════════════════════════════════════════════════════════════════
// QUERY VALUES
// ═══════════════════════════════════════════════════════════════════════════

/// Result ordering for [`RecordQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordOrder {
    /// By `started_at`, oldest first
    #[default]
    Chronological,
    /// By `first_lsn`, lowest first
    LsnAscending,
    /// By `finished_at`, newest first
    NewestFirst,
}

/// Filter over backup records. Unset fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordQuery {
    pub database: Option<DatabaseName>,
    pub backup_type: Option<BackupType>,
    pub statuses: Vec<BackupStatus>,
    /// Inclusive lower bound on `finished_at`
    pub finished_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `finished_at`
    pub finished_before: Option<DateTime<Utc>>,
    /// Exclusive lower bound on `first_lsn`
    pub first_lsn_after: Option<Lsn>,
    /// Differentials whose `database_backup_lsn` equals this
    pub anchored_to: Option<Lsn>,
    pub copy_only: Option<bool>,
    pub order: RecordOrder,
    pub limit: Option<u32>,
}

impl RecordQuery {
    #[must_use]
    pub fn for_database(database: &DatabaseName) -> Self {
        Self {
            database: Some(database.clone()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn of_type(mut self, backup_type: BackupType) -> Self {
        self.backup_type = Some(backup_type);
        self
    }

    #[must_use]
    pub fn with_statuses(mut self, statuses: &[BackupStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    #[must_use]
    pub fn eligible_under(self, policy: VerificationPolicy) -> Self {
        self.with_statuses(&policy.eligible_statuses())
    }

    #[must_use]
    pub fn finished_between(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.finished_after = after;
        self.finished_before = before;
        self
    }

    #[must_use]
    pub fn first_lsn_after(mut self, lsn: Lsn) -> Self {
        self.first_lsn_after = Some(lsn);
        self
    }

    #[must_use]
    pub fn anchored_to(mut self, lsn: Lsn) -> Self {
        self.anchored_to = Some(lsn);
        self
    }

    #[must_use]
    pub fn copy_only(mut self, copy_only: bool) -> Self {
        self.copy_only = Some(copy_only);
        self
    }

    #[must_use]
    pub fn ordered(mut self, order: RecordOrder) -> Self {
        self.order = order;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Outcome written when an `IN_PROGRESS` record finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub status: BackupStatus,
    pub lsns: Option<BackupLsns>,
    pub finished_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub checksum: Option<String>,
    pub error_detail: Option<String>,
}

impl Completion {
    #[must_use]
    pub fn succeeded(lsns: BackupLsns, size_bytes: u64, checksum: String) -> Self {
        Self {
            status: BackupStatus::Succeeded,
            lsns: Some(lsns),
            finished_at: Utc::now(),
            size_bytes,
            checksum: Some(checksum),
            error_detail: None,
        }
    }

    #[must_use]
    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            status: BackupStatus::Failed,
            lsns: None,
            finished_at: Utc::now(),
            size_bytes: 0,
            checksum: None,
            error_detail: Some(detail.into()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CATALOG CONTRACT
// ═══════════════════════════════════════════════════════════════════════════

/// Durable record of every backup and restore job.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Catalog a new record.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::DuplicateRecord` when the idempotency token or
    /// the `(database, type, first_lsn, last_lsn)` tuple already exists.
    async fn record(&self, record: &BackupRecord) -> Result<RecordId>;

    async fn get(&self, id: &RecordId) -> Result<Option<BackupRecord>>;

    /// The record a previous invocation created for `token`.
    async fn find_by_token(
        &self,
        database: &DatabaseName,
        token: &str,
    ) -> Result<Option<BackupRecord>>;

    async fn query(&self, query: &RecordQuery) -> Result<Vec<BackupRecord>>;

    /// Forward-only status change.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::InvalidStatusTransition` for a backward move and
    /// `CatalogError::NotFound` for an unknown id.
    async fn update_status(
        &self,
        id: &RecordId,
        status: BackupStatus,
        detail: Option<&str>,
    ) -> Result<()>;

    /// Write LSNs, checksum, size and the final status of an `IN_PROGRESS` record.
    async fn complete(&self, id: &RecordId, completion: &Completion) -> Result<BackupRecord>;

    async fn save_job(&self, job: &RestoreJob) -> Result<()>;

    async fn load_job(&self, id: &JobId) -> Result<Option<RestoreJob>>;

    async fn list_jobs(&self, database: Option<&DatabaseName>) -> Result<Vec<RestoreJob>>;

    async fn request_cancel(&self, id: &JobId) -> Result<()>;

    async fn cancel_requested(&self, id: &JobId) -> Result<bool>;

    /// Newest completed record of a type.
    async fn latest(
        &self,
        database: &DatabaseName,
        backup_type: BackupType,
    ) -> Result<Option<BackupRecord>> {
        let query = RecordQuery::for_database(database)
            .of_type(backup_type)
            .with_statuses(&[
                BackupStatus::Succeeded,
                BackupStatus::Verified,
                BackupStatus::VerificationFailed,
            ])
            .ordered(RecordOrder::NewestFirst)
            .limit(1);
        Ok(self.query(&query).await?.into_iter().next())
    }

    /// Most recent eligible FULL finished at or before `before`.
    async fn latest_full_before(
        &self,
        database: &DatabaseName,
        before: DateTime<Utc>,
        policy: VerificationPolicy,
    ) -> Result<Option<BackupRecord>> {
        let query = RecordQuery::for_database(database)
            .of_type(BackupType::Full)
            .eligible_under(policy)
            .finished_between(None, Some(before))
            .ordered(RecordOrder::NewestFirst)
            .limit(1);
        Ok(self.query(&query).await?.into_iter().next())
    }

    /// Eligible LOG records with `first_lsn > after`, lowest first.
    async fn logs_after(
        &self,
        database: &DatabaseName,
        after: Lsn,
        policy: VerificationPolicy,
    ) -> Result<Vec<BackupRecord>> {
        let query = RecordQuery::for_database(database)
            .of_type(BackupType::Log)
            .eligible_under(policy)
            .first_lsn_after(after)
            .ordered(RecordOrder::LsnAscending);
        self.query(&query).await
    }

    /// Eligible DIFFERENTIAL records anchored to a FULL ending at `anchor`.
    async fn differentials_anchored_to(
        &self,
        database: &DatabaseName,
        anchor: Lsn,
        policy: VerificationPolicy,
    ) -> Result<Vec<BackupRecord>> {
        let query = RecordQuery::for_database(database)
            .of_type(BackupType::Differential)
            .eligible_under(policy)
            .anchored_to(anchor)
            .ordered(RecordOrder::NewestFirst);
        self.query(&query).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SQLITE CATALOG
// ═══════════════════════════════════════════════════════════════════════════

/// `SQLite` catalog with connection pooling
#[derive(Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    /// Open or create a catalog at the given path
    ///
    /// # Errors
    ///
    /// Returns `Error::Catalog` if:
    /// - The parent directory cannot be created
    /// - Database file cannot be opened
    /// - Schema initialization fails
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::database_error(format!(
                    "Failed to create catalog directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = schema::create_connection_pool(&db_url).await?;
        schema::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// The underlying pool, shared with the lease manager
    #[must_use]
    pub fn shared_pool(&self) -> SqlitePool {
        self.pool.clone()
    }
}

impl RecordOps for SqliteCatalog {
    fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl JobOps for SqliteCatalog {
    fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn record(&self, record: &BackupRecord) -> Result<RecordId> {
        <Self as RecordOps>::insert(self, record).await
    }

    async fn get(&self, id: &RecordId) -> Result<Option<BackupRecord>> {
        <Self as RecordOps>::get(self, id).await
    }

    async fn find_by_token(
        &self,
        database: &DatabaseName,
        token: &str,
    ) -> Result<Option<BackupRecord>> {
        <Self as RecordOps>::get_by_token(self, database, token).await
    }

    async fn query(&self, query: &RecordQuery) -> Result<Vec<BackupRecord>> {
        <Self as RecordOps>::select(self, query).await
    }

    async fn update_status(
        &self,
        id: &RecordId,
        status: BackupStatus,
        detail: Option<&str>,
    ) -> Result<()> {
        <Self as RecordOps>::set_status(self, id, status, detail).await
    }

    async fn complete(&self, id: &RecordId, completion: &Completion) -> Result<BackupRecord> {
        <Self as RecordOps>::finish(self, id, completion).await
    }

    async fn save_job(&self, job: &RestoreJob) -> Result<()> {
        <Self as JobOps>::upsert_job(self, job).await
    }

    async fn load_job(&self, id: &JobId) -> Result<Option<RestoreJob>> {
        <Self as JobOps>::fetch_job(self, id).await
    }

    async fn list_jobs(&self, database: Option<&DatabaseName>) -> Result<Vec<RestoreJob>> {
        <Self as JobOps>::fetch_jobs(self, database).await
    }

    async fn request_cancel(&self, id: &JobId) -> Result<()> {
        <Self as JobOps>::flag_cancel(self, id).await
    }

    async fn cancel_requested(&self, id: &JobId) -> Result<bool> {
        <Self as JobOps>::is_cancel_flagged(self, id).await
    }
}

#[cfg(test)]
mod tests;
