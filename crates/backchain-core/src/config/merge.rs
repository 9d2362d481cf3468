//! Configuration merging logic (Immutable functional pattern)
//!
//! Later configs override earlier ones (defaults → global → project → file → env → CLI).
//! A field left at its default in `other` keeps the value from `self`, so a
//! project file only needs to mention what it changes.

use super::{
    defaults::{
        DEFAULT_BACKUP_ROOT, DEFAULT_CATALOG_DB, DEFAULT_LEASE_TTL_SECS,
        DEFAULT_LOGIN_TIMEOUT_SECS, DEFAULT_SCRATCH_DIR, DEFAULT_SCRATCH_PREFIX, DEFAULT_SERVER,
        DEFAULT_SQLCMD, DEFAULT_STAGING_DIR,
    },
    types::{Config, EngineConfig, LeaseConfig, VerificationConfig},
};
use crate::{record::VerificationPolicy, retry::RetryPolicy};

fn pick<T: PartialEq>(base: T, other: T, default: &T) -> T {
    if &other == default {
        base
    } else {
        other
    }
}

fn pick_str(base: String, other: String, default: &str) -> String {
    if other.is_empty() || other == default {
        base
    } else {
        other
    }
}

impl Config {
    /// Merge another config into this one (other takes precedence) - immutable pattern
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            catalog_db: pick_str(self.catalog_db, other.catalog_db, DEFAULT_CATALOG_DB),
            staging_dir: pick_str(self.staging_dir, other.staging_dir, DEFAULT_STAGING_DIR),
            backup_root: pick_str(self.backup_root, other.backup_root, DEFAULT_BACKUP_ROOT),
            engine: self.engine.merge(other.engine),
            retry: merge_retry(self.retry, other.retry),
            lease: self.lease.merge(other.lease),
            verification: self.verification.merge(other.verification),
        }
    }
}

impl EngineConfig {
    fn merge(self, other: Self) -> Self {
        Self {
            server: pick_str(self.server, other.server, DEFAULT_SERVER),
            sqlcmd_path: pick_str(self.sqlcmd_path, other.sqlcmd_path, DEFAULT_SQLCMD),
            trusted_connection: pick(self.trusted_connection, other.trusted_connection, &true),
            login_timeout_secs: pick(
                self.login_timeout_secs,
                other.login_timeout_secs,
                &DEFAULT_LOGIN_TIMEOUT_SECS,
            ),
            compression: pick(self.compression, other.compression, &false),
        }
    }
}

fn merge_retry(base: RetryPolicy, other: RetryPolicy) -> RetryPolicy {
    let default = RetryPolicy::default();
    RetryPolicy {
        max_retries: pick(base.max_retries, other.max_retries, &default.max_retries),
        base_delay_ms: pick(base.base_delay_ms, other.base_delay_ms, &default.base_delay_ms),
        max_delay_ms: pick(base.max_delay_ms, other.max_delay_ms, &default.max_delay_ms),
    }
}

impl LeaseConfig {
    fn merge(self, other: Self) -> Self {
        Self {
            ttl_secs: pick(self.ttl_secs, other.ttl_secs, &DEFAULT_LEASE_TTL_SECS),
        }
    }
}

impl VerificationConfig {
    fn merge(self, other: Self) -> Self {
        Self {
            policy: pick(self.policy, other.policy, &VerificationPolicy::default()),
            scratch_dir: pick_str(self.scratch_dir, other.scratch_dir, DEFAULT_SCRATCH_DIR),
            scratch_prefix: pick_str(
                self.scratch_prefix,
                other.scratch_prefix,
                DEFAULT_SCRATCH_PREFIX,
            ),
        }
    }
}
