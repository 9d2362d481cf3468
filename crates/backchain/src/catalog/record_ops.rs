//! Insert and status operations for backup records

use backchain_core::{
    error::CatalogError, BackupRecord, BackupStatus, DatabaseName, Error, RecordId, Result,
};
use sqlx::SqlitePool;

use super::{
    query::{
        format_timestamp, query_record_by_id, query_record_by_token, query_records, size_to_db,
    },
    Completion, RecordQuery,
};

/// Trait for backup record operations
#[allow(async_fn_in_trait)]
pub trait RecordOps {
    /// Get reference to the connection pool
    fn pool(&self) -> &SqlitePool;

    /// Insert a new record
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::DuplicateRecord` if the idempotency token or the
    /// `(database, type, first_lsn, last_lsn)` tuple is already cataloged
    async fn insert(&self, record: &BackupRecord) -> Result<RecordId> {
        insert_record(self.pool(), record).await
    }

    /// Get a record by id
    async fn get(&self, id: &RecordId) -> Result<Option<BackupRecord>> {
        query_record_by_id(self.pool(), id).await
    }

    /// Get the record created for an idempotency token
    async fn get_by_token(
        &self,
        database: &DatabaseName,
        token: &str,
    ) -> Result<Option<BackupRecord>> {
        query_record_by_token(self.pool(), database, token).await
    }

    /// Records matching `query`
    async fn select(&self, query: &RecordQuery) -> Result<Vec<BackupRecord>> {
        query_records(self.pool(), query).await
    }

    /// Move a record to `status`, checking the transition is allowed
    async fn set_status(
        &self,
        id: &RecordId,
        status: BackupStatus,
        detail: Option<&str>,
    ) -> Result<()> {
        let current = require_record(self.pool(), id).await?;
        if !current.status.can_transition_to(status) {
            return Err(invalid_transition(id, current.status, status));
        }

        let updated = sqlx::query(
            "UPDATE backup_records SET status = ?, error_detail = ? WHERE id = ? AND status = ?",
        )
        .bind(status.to_string())
        .bind(detail)
        .bind(id.as_str())
        .bind(current.status.to_string())
        .execute(self.pool())
        .await
        .map_err(|e| Error::database_error(format!("Failed to update status of {id}: {e}")))?
        .rows_affected();

        if updated == 0 {
            // Someone else moved it between the read and the write
            let now = require_record(self.pool(), id).await?;
            return Err(invalid_transition(id, now.status, status));
        }
        Ok(())
    }

    /// Finish an `IN_PROGRESS` record in a single write
    async fn finish(&self, id: &RecordId, completion: &Completion) -> Result<BackupRecord> {
        let current = require_record(self.pool(), id).await?;
        if !current.status.can_transition_to(completion.status)
            || !matches!(
                completion.status,
                BackupStatus::Succeeded | BackupStatus::Failed
            )
        {
            return Err(invalid_transition(id, current.status, completion.status));
        }

        let lsns = completion.lsns;
        let updated = sqlx::query(
            "UPDATE backup_records SET status = ?, first_lsn = ?, last_lsn = ?, checkpoint_lsn = ?,
                 database_backup_lsn = ?, finished_at = ?, size_bytes = ?, checksum = ?, error_detail = ?
             WHERE id = ? AND status = 'IN_PROGRESS'",
        )
        .bind(completion.status.to_string())
        .bind(lsns.map(|l| l.first.to_sortable()))
        .bind(lsns.map(|l| l.last.to_sortable()))
        .bind(lsns.map(|l| l.checkpoint.to_sortable()))
        .bind(lsns.map(|l| l.database_backup.to_sortable()))
        .bind(format_timestamp(completion.finished_at))
        .bind(size_to_db(completion.size_bytes))
        .bind(completion.checksum.as_deref())
        .bind(completion.error_detail.as_deref())
        .bind(id.as_str())
        .execute(self.pool())
        .await
        .map_err(|e| map_unique_violation(&e, &current, "complete"))?
        .rows_affected();

        if updated == 0 {
            let now = require_record(self.pool(), id).await?;
            return Err(invalid_transition(id, now.status, completion.status));
        }
        require_record(self.pool(), id).await
    }
}

async fn require_record(pool: &SqlitePool, id: &RecordId) -> Result<BackupRecord> {
    query_record_by_id(pool, id)
        .await?
        .ok_or_else(|| Error::not_found(format!("backup record {id}")))
}

fn invalid_transition(id: &RecordId, from: BackupStatus, to: BackupStatus) -> Error {
    Error::Catalog(CatalogError::InvalidStatusTransition {
        id: id.to_string(),
        from,
        to,
    })
}

fn map_unique_violation(err: &sqlx::Error, record: &BackupRecord, action: &str) -> Error {
    let text = err.to_string();
    if !text.to_lowercase().contains("unique") {
        return Error::database_error(format!("Failed to {action} record {}: {text}", record.id));
    }

    let detail = if text.contains("idempotency_token") {
        format!(
            "idempotency token '{}' is already used",
            record.idempotency_token
        )
    } else if text.contains("first_lsn") {
        format!("a {} backup with the same LSN range is already cataloged", record.backup_type)
    } else {
        format!("record {} already exists", record.id)
    };
    Error::Catalog(CatalogError::DuplicateRecord {
        database: record.database_name.to_string(),
        detail,
    })
}

/// Insert a record into the catalog
async fn insert_record(pool: &SqlitePool, record: &BackupRecord) -> Result<RecordId> {
    let lsns = record.lsns;
    sqlx::query(
        "INSERT INTO backup_records (id, database_name, backup_type, first_lsn, last_lsn,
             checkpoint_lsn, database_backup_lsn, started_at, finished_at, location, size_bytes,
             status, checksum, is_copy_only, idempotency_token, error_detail)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(record.id.as_str())
    .bind(record.database_name.as_str())
    .bind(record.backup_type.to_string())
    .bind(lsns.map(|l| l.first.to_sortable()))
    .bind(lsns.map(|l| l.last.to_sortable()))
    .bind(lsns.map(|l| l.checkpoint.to_sortable()))
    .bind(lsns.map(|l| l.database_backup.to_sortable()))
    .bind(format_timestamp(record.started_at))
    .bind(record.finished_at.map(format_timestamp))
    .bind(&record.location)
    .bind(size_to_db(record.size_bytes))
    .bind(record.status.to_string())
    .bind(record.checksum.as_deref())
    .bind(i32::from(record.is_copy_only))
    .bind(&record.idempotency_token)
    .bind(record.error_detail.as_deref())
    .execute(pool)
    .await
    .map(|_| record.id.clone())
    .map_err(|e| map_unique_violation(&e, record, "insert"))
}
