//! Default configuration values

use super::types::{Config, EngineConfig, LeaseConfig, VerificationConfig};
use crate::{record::VerificationPolicy, retry::RetryPolicy};

pub(super) const DEFAULT_CATALOG_DB: &str = ".backchain/catalog.db";
pub(super) const DEFAULT_STAGING_DIR: &str = ".backchain/staging";
pub(super) const DEFAULT_BACKUP_ROOT: &str = "backups";
pub(super) const DEFAULT_SERVER: &str = "localhost";
pub(super) const DEFAULT_SQLCMD: &str = "sqlcmd";
pub(super) const DEFAULT_LOGIN_TIMEOUT_SECS: u32 = 15;
pub(super) const DEFAULT_LEASE_TTL_SECS: u64 = 300;
pub(super) const DEFAULT_SCRATCH_DIR: &str = ".backchain/scratch";
pub(super) const DEFAULT_SCRATCH_PREFIX: &str = "backchain_verify_";

// ═══════════════════════════════════════════════════════════════════════════
// DEFAULT IMPLEMENTATIONS
// ═══════════════════════════════════════════════════════════════════════════

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_db: DEFAULT_CATALOG_DB.to_string(),
            staging_dir: DEFAULT_STAGING_DIR.to_string(),
            backup_root: DEFAULT_BACKUP_ROOT.to_string(),
            engine: EngineConfig::default(),
            retry: RetryPolicy::default(),
            lease: LeaseConfig::default(),
            verification: VerificationConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            sqlcmd_path: DEFAULT_SQLCMD.to_string(),
            trusted_connection: true,
            login_timeout_secs: DEFAULT_LOGIN_TIMEOUT_SECS,
            compression: false,
        }
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_LEASE_TTL_SECS,
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            policy: VerificationPolicy::default(),
            scratch_dir: DEFAULT_SCRATCH_DIR.to_string(),
            scratch_prefix: DEFAULT_SCRATCH_PREFIX.to_string(),
        }
    }
}
