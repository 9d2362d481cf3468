//! Catalog schema definitions and initialization

use backchain_core::{Error, Result};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

/// Catalog schema as SQL string - executed once on open
///
/// LSNs are stored zero-padded and timestamps as fixed-width RFC 3339 text,
/// so text comparison in `WHERE`/`ORDER BY` matches numeric and time order.
pub(crate) const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS backup_records (
    id TEXT PRIMARY KEY,
    database_name TEXT NOT NULL,
    backup_type TEXT NOT NULL CHECK(backup_type IN ('FULL', 'DIFFERENTIAL', 'LOG')),
    first_lsn TEXT,
    last_lsn TEXT,
    checkpoint_lsn TEXT,
    database_backup_lsn TEXT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    location TEXT NOT NULL,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL CHECK(status IN ('IN_PROGRESS', 'SUCCEEDED', 'FAILED', 'VERIFIED', 'VERIFICATION_FAILED')),
    checksum TEXT,
    is_copy_only INTEGER NOT NULL DEFAULT 0,
    idempotency_token TEXT NOT NULL,
    error_detail TEXT,
    UNIQUE(database_name, idempotency_token)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_records_lsn_range
    ON backup_records(database_name, backup_type, first_lsn, last_lsn)
    WHERE first_lsn IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_records_type_finished
    ON backup_records(database_name, backup_type, finished_at);
CREATE INDEX IF NOT EXISTS idx_records_type_first_lsn
    ON backup_records(database_name, backup_type, first_lsn);
CREATE INDEX IF NOT EXISTS idx_records_anchor
    ON backup_records(database_name, database_backup_lsn);

CREATE TABLE IF NOT EXISTS restore_jobs (
    id TEXT PRIMARY KEY,
    target_database TEXT NOT NULL,
    state TEXT NOT NULL CHECK(state IN ('PENDING', 'RESTORING', 'RECOVERING', 'COMPLETED', 'FAILED', 'ROLLED_BACK')),
    current_step INTEGER NOT NULL,
    total_steps INTEGER NOT NULL,
    cancel_requested INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    body TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_target ON restore_jobs(target_database, created_at);
";

/// Create `SQLite` connection pool
pub(crate) async fn create_connection_pool(db_url: &str) -> Result<SqlitePool> {
    SqlitePoolOptions::new()
        .max_connections(5)
        .min_connections(1)
        .connect(db_url)
        .await
        .map_err(|e| Error::database_error(format!("Failed to connect to catalog: {e}")))
}

/// Initialize catalog schema
pub(crate) async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA)
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(|e| Error::database_error(format!("Failed to initialize schema: {e}")))
}
