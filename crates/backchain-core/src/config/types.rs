//! Configuration type definitions
//!
//! Pure data holders; behavior lives in the sibling modules.

use serde::{Deserialize, Serialize};

use crate::{record::VerificationPolicy, retry::RetryPolicy};

// ═══════════════════════════════════════════════════════════════════════════
// MAIN CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════

/// Root configuration structure
///
/// Loaded from defaults → global → project → explicit file → env vars → CLI flags
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// SQLite file holding the backup catalog, leases and restore jobs
    pub catalog_db: String,
    /// Local directory the engine writes backups into before promotion
    pub staging_dir: String,
    /// Root URI or path artifacts are promoted under
    pub backup_root: String,
    pub engine: EngineConfig,
    pub retry: RetryPolicy,
    pub lease: LeaseConfig,
    pub verification: VerificationConfig,
}

// ═══════════════════════════════════════════════════════════════════════════
// NESTED CONFIGURATION STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// `host[\instance][,port]`
    pub server: String,
    pub sqlcmd_path: String,
    /// Use integrated authentication instead of a login
    pub trusted_connection: bool,
    pub login_timeout_secs: u32,
    /// Compress backups on the server
    pub compression: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LeaseConfig {
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerificationConfig {
    pub policy: VerificationPolicy,
    /// Where scratch databases' files are placed during full verification
    pub scratch_dir: String,
    pub scratch_prefix: String,
}
