//! Per-database leases.
//!
//! At most one backup or restore runs against a database at a time. A lease
//! is a row keyed by database name with a holder and an expiry; it is taken
//! with a single guarded `INSERT`, renewed by a heartbeat while the operation
//! runs, and released only by its holder. A crashed holder's lease lapses
//! after the TTL.

use backchain_core::{error::ExecutionError, DatabaseName, Error, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::catalog::format_timestamp;

/// Default lease TTL in seconds (5 minutes).
const DEFAULT_TTL_SECS: i64 = 300;

/// Shortest heartbeat period, whatever the TTL.
const MIN_HEARTBEAT_MS: u64 = 100;

/// An acquired lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub lease_id: String,
    pub database: DatabaseName,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Manages per-database leases backed by `SQLite`.
#[derive(Debug, Clone)]
pub struct LeaseManager {
    db: SqlitePool,
    ttl: Duration,
}

impl LeaseManager {
    /// Create a new `LeaseManager` with default TTL.
    #[must_use]
    pub const fn new(db: SqlitePool) -> Self {
        Self {
            db,
            ttl: Duration::seconds(DEFAULT_TTL_SECS),
        }
    }

    /// Create a new `LeaseManager` with a custom TTL.
    #[must_use]
    pub const fn with_ttl(db: SqlitePool, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Initialize the leases table.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS database_leases (
                lease_id TEXT PRIMARY KEY,
                database_name TEXT NOT NULL UNIQUE,
                holder TEXT NOT NULL,
                acquired_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )",
        )
        .execute(&self.db)
        .await
        .map(|_| ())
        .map_err(|e| Error::database_error(format!("Failed to create leases table: {e}")))
    }

    /// Take the lease on `database` for `holder`.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::LeaseHeld` (transient) if another holder has an
    /// unexpired lease.
    pub async fn acquire(&self, database: &DatabaseName, holder: &str) -> Result<Lease> {
        let now = Utc::now();
        let now_str = format_timestamp(now);

        // Expired leases belong to crashed holders
        let reaped = sqlx::query("DELETE FROM database_leases WHERE database_name = ? AND expires_at < ?")
            .bind(database.as_str())
            .bind(&now_str)
            .execute(&self.db)
            .await
            .map_err(|e| Error::database_error(format!("Failed to reap expired leases: {e}")))?
            .rows_affected();
        if reaped > 0 {
            warn!(database = %database, "Reclaimed an expired lease");
        }

        let lease = Lease {
            lease_id: uuid::Uuid::new_v4().to_string(),
            database: database.clone(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + self.ttl,
        };

        let inserted = sqlx::query(
            "INSERT INTO database_leases (lease_id, database_name, holder, acquired_at, expires_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&lease.lease_id)
        .bind(database.as_str())
        .bind(holder)
        .bind(&now_str)
        .bind(format_timestamp(lease.expires_at))
        .execute(&self.db)
        .await;

        match inserted {
            Ok(_) => {
                debug!(database = %database, holder, "Lease acquired");
                Ok(lease)
            }
            Err(e) if e.to_string().to_lowercase().contains("unique") => {
                Err(self.held_error(database).await)
            }
            Err(e) => Err(Error::database_error(format!(
                "Failed to acquire lease on '{database}': {e}"
            ))),
        }
    }

    async fn held_error(&self, database: &DatabaseName) -> Error {
        match self.current(database).await {
            Ok(Some(current)) => Error::Execution(ExecutionError::LeaseHeld {
                database: database.to_string(),
                holder: current.holder,
                expires_at: current.expires_at,
            }),
            Ok(None) => Error::Execution(ExecutionError::LeaseHeld {
                database: database.to_string(),
                holder: "unknown".to_string(),
                expires_at: Utc::now(),
            }),
            Err(e) => e,
        }
    }

    /// Extend a lease by one TTL from now.
    ///
    /// Returns `false` when the lease is gone (expired and reclaimed).
    pub async fn renew(&self, lease: &Lease) -> Result<bool> {
        let expires_at = Utc::now() + self.ttl;
        sqlx::query("UPDATE database_leases SET expires_at = ? WHERE lease_id = ? AND holder = ?")
            .bind(format_timestamp(expires_at))
            .bind(&lease.lease_id)
            .bind(&lease.holder)
            .execute(&self.db)
            .await
            .map(|result| result.rows_affected() > 0)
            .map_err(|e| Error::database_error(format!("Failed to renew lease: {e}")))
    }

    /// Give the lease back. Only the holder's own lease row is removed.
    pub async fn release(&self, lease: &Lease) -> Result<bool> {
        let released = sqlx::query("DELETE FROM database_leases WHERE lease_id = ? AND holder = ?")
            .bind(&lease.lease_id)
            .bind(&lease.holder)
            .execute(&self.db)
            .await
            .map(|result| result.rows_affected() > 0)
            .map_err(|e| Error::database_error(format!("Failed to release lease: {e}")))?;

        if released {
            debug!(database = %lease.database, holder = %lease.holder, "Lease released");
        } else {
            warn!(
                database = %lease.database,
                holder = %lease.holder,
                "Lease was already gone at release"
            );
        }
        Ok(released)
    }

    /// The unexpired lease on `database`, if any.
    pub async fn current(&self, database: &DatabaseName) -> Result<Option<Lease>> {
        let now_str = format_timestamp(Utc::now());
        let row = sqlx::query(
            "SELECT lease_id, holder, acquired_at, expires_at FROM database_leases
             WHERE database_name = ? AND expires_at >= ?",
        )
        .bind(database.as_str())
        .bind(&now_str)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| Error::database_error(format!("Failed to query lease: {e}")))?;

        row.map(|row| {
            let text = |column: &str| -> Result<String> {
                row.try_get::<String, _>(column)
                    .map_err(|e| Error::database_error(format!("Failed to read {column}: {e}")))
            };
            let parse = |column: &str| -> Result<DateTime<Utc>> {
                DateTime::parse_from_rfc3339(&text(column)?)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| Error::database_error(format!("Invalid {column}: {e}")))
            };
            Ok(Lease {
                lease_id: text("lease_id")?,
                database: database.clone(),
                holder: text("holder")?,
                acquired_at: parse("acquired_at")?,
                expires_at: parse("expires_at")?,
            })
        })
        .transpose()
    }

    /// Take the lease and keep it alive until the guard is released or dropped.
    pub async fn acquire_guarded(&self, database: &DatabaseName, holder: &str) -> Result<LeaseGuard> {
        let lease = self.acquire(database, holder).await?;
        let heartbeat = self.spawn_heartbeat(lease.clone());
        Ok(LeaseGuard {
            lease,
            manager: self.clone(),
            heartbeat,
        })
    }

    fn heartbeat_period(&self) -> std::time::Duration {
        let third = self.ttl / 3;
        third
            .to_std()
            .unwrap_or_default()
            .max(std::time::Duration::from_millis(MIN_HEARTBEAT_MS))
    }

    fn spawn_heartbeat(&self, lease: Lease) -> JoinHandle<()> {
        let manager = self.clone();
        let period = self.heartbeat_period();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match manager.renew(&lease).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(database = %lease.database, "Lease lost; heartbeat stopped");
                        break;
                    }
                    Err(e) => warn!(database = %lease.database, error = %e, "Lease heartbeat failed"),
                }
            }
        })
    }
}

/// A held lease with a running heartbeat.
///
/// Call [`LeaseGuard::release`] when the operation ends. Dropping the guard
/// only stops the heartbeat; the row then lapses after the TTL.
#[derive(Debug)]
pub struct LeaseGuard {
    lease: Lease,
    manager: LeaseManager,
    heartbeat: JoinHandle<()>,
}

impl LeaseGuard {
    #[must_use]
    pub const fn lease(&self) -> &Lease {
        &self.lease
    }

    /// Stop the heartbeat and delete the lease row.
    pub async fn release(self) -> Result<()> {
        self.heartbeat.abort();
        self.manager.release(&self.lease).await.map(|_| ())
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.heartbeat.abort();
    }
}
