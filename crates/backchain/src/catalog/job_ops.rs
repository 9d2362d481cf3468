//! Restore job persistence
//!
//! Jobs are stored whole as JSON next to the columns needed for listing.
//! `cancel_requested` lives in its own column so a cancel from another
//! process survives the running job's next save.

use backchain_core::{DatabaseName, Error, JobId, RestoreJob, Result};
use sqlx::{Row, SqlitePool};

use super::query::format_timestamp;

/// Trait for restore job operations
#[allow(async_fn_in_trait)]
pub trait JobOps {
    /// Get reference to the connection pool
    fn pool(&self) -> &SqlitePool;

    /// Insert or update a job
    async fn upsert_job(&self, job: &RestoreJob) -> Result<()> {
        let body = serde_json::to_string(job)
            .map_err(|e| Error::parse_error(format!("Failed to serialize job {}: {e}", job.id)))?;

        sqlx::query(
            "INSERT INTO restore_jobs (id, target_database, state, current_step, total_steps,
                 cancel_requested, created_at, updated_at, body)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 state = excluded.state,
                 current_step = excluded.current_step,
                 total_steps = excluded.total_steps,
                 updated_at = excluded.updated_at,
                 body = excluded.body",
        )
        .bind(job.id.as_str())
        .bind(job.target_database.as_str())
        .bind(job.state.to_string())
        .bind(i64::try_from(job.current_step_index).unwrap_or(i64::MAX))
        .bind(i64::try_from(job.total_steps()).unwrap_or(i64::MAX))
        .bind(i32::from(job.cancel_requested))
        .bind(format_timestamp(job.created_at))
        .bind(format_timestamp(job.updated_at))
        .bind(body)
        .execute(self.pool())
        .await
        .map(|_| ())
        .map_err(|e| Error::database_error(format!("Failed to save job {}: {e}", job.id)))
    }

    /// Load a job by id
    async fn fetch_job(&self, id: &JobId) -> Result<Option<RestoreJob>> {
        sqlx::query("SELECT body, cancel_requested FROM restore_jobs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| Error::database_error(format!("Failed to query job {id}: {e}")))?
            .map(|row| parse_job_row(&row))
            .transpose()
    }

    /// Jobs newest first, optionally for one target database
    async fn fetch_jobs(&self, database: Option<&DatabaseName>) -> Result<Vec<RestoreJob>> {
        let rows = match database {
            Some(db) => {
                sqlx::query(
                    "SELECT body, cancel_requested FROM restore_jobs
                     WHERE target_database = ? ORDER BY created_at DESC",
                )
                .bind(db.as_str())
                .fetch_all(self.pool())
                .await
            }
            None => {
                sqlx::query(
                    "SELECT body, cancel_requested FROM restore_jobs ORDER BY created_at DESC",
                )
                .fetch_all(self.pool())
                .await
            }
        }
        .map_err(|e| Error::database_error(format!("Failed to list jobs: {e}")))?;

        rows.iter().map(parse_job_row).collect()
    }

    /// Flag a job for cancellation before its next step
    async fn flag_cancel(&self, id: &JobId) -> Result<()> {
        let updated = sqlx::query("UPDATE restore_jobs SET cancel_requested = 1 WHERE id = ?")
            .bind(id.as_str())
            .execute(self.pool())
            .await
            .map_err(|e| Error::database_error(format!("Failed to cancel job {id}: {e}")))?
            .rows_affected();

        if updated == 0 {
            return Err(Error::not_found(format!("restore job {id}")));
        }
        Ok(())
    }

    /// Whether cancellation was requested for a job
    async fn is_cancel_flagged(&self, id: &JobId) -> Result<bool> {
        sqlx::query("SELECT cancel_requested FROM restore_jobs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| Error::database_error(format!("Failed to query job {id}: {e}")))?
            .map_or(Ok(false), |row| {
                row.try_get::<i64, _>("cancel_requested")
                    .map(|flag| flag != 0)
                    .map_err(|e| {
                        Error::database_error(format!("Failed to read cancel_requested: {e}"))
                    })
            })
    }
}

fn parse_job_row(row: &sqlx::sqlite::SqliteRow) -> Result<RestoreJob> {
    let body: String = row
        .try_get("body")
        .map_err(|e| Error::database_error(format!("Failed to read body: {e}")))?;
    let cancel_requested: i64 = row
        .try_get("cancel_requested")
        .map_err(|e| Error::database_error(format!("Failed to read cancel_requested: {e}")))?;

    let mut job: RestoreJob = serde_json::from_str(&body)
        .map_err(|e| Error::database_error(format!("Corrupt restore job row: {e}")))?;
    job.cancel_requested = job.cancel_requested || cancel_requested != 0;
    Ok(job)
}
