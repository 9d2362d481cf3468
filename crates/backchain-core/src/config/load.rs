//! Configuration loading from files and environment (Immutable functional pattern)
//!
//! All operations return new instances rather than mutating in place.

use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use super::types::Config;
use crate::{record::VerificationPolicy, Error, Result};

// ═══════════════════════════════════════════════════════════════════════════
// PUBLIC API
// ═══════════════════════════════════════════════════════════════════════════

/// Load configuration from all sources with hierarchy
///
/// `explicit` is a file named on the command line; unlike the global and
/// project files it must exist.
///
/// # Errors
///
/// Returns error if:
/// - A config file is malformed TOML
/// - The explicit config file is missing
/// - An environment override cannot be parsed
/// - Config values fail validation
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    // 1. Start with built-in defaults
    let config = Config::default();

    // 2. Global config
    let config = match global_config_path() {
        Some(path) if path.exists() => config.merge(load_toml_file(&path)?),
        _ => config,
    };

    // 3. Project config
    let project_path = project_config_path()?;
    let config = if project_path.exists() {
        config.merge(load_toml_file(&project_path)?)
    } else {
        config
    };

    // 4. Explicit file
    let config = match explicit {
        Some(path) => config.merge(load_toml_file(path)?),
        None => config,
    };

    // 5. Environment overrides
    let config = config.apply_env_vars()?;

    config.validate()?;
    Ok(config)
}

// ═══════════════════════════════════════════════════════════════════════════
// PATH HELPERS
// ═══════════════════════════════════════════════════════════════════════════

/// Get path to global config file
pub fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "backchain")
        .map(|proj_dirs| proj_dirs.config_dir().join("config.toml"))
}

/// Get path to project config file
///
/// # Errors
///
/// Returns error if current directory cannot be determined
pub fn project_config_path() -> Result<PathBuf> {
    std::env::current_dir()
        .map(|dir| dir.join(".backchain/config.toml"))
        .map_err(|e| Error::io_error(format!("Failed to get current directory: {e}")))
}

/// Load a TOML file into a Config
///
/// # Errors
///
/// Returns error if:
/// - File cannot be read
/// - Path is a directory instead of a file
/// - TOML is malformed
pub fn load_toml_file(path: &Path) -> Result<Config> {
    if path.is_dir() {
        return Err(Error::invalid_config(format!(
            "Config path is a directory, not a file: {}\n\
             \n\
             Expected: .backchain/config.toml (file)",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::invalid_config(format!(
            "Failed to read config file {}: {e}",
            path.display()
        ))
    })?;

    toml::from_str(&content).map_err(|e| {
        Error::parse_error(format!(
            "Failed to parse config file {}: {e}",
            path.display()
        ))
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// ENVIRONMENT VARIABLE OVERRIDES (Immutable pattern)
// ═══════════════════════════════════════════════════════════════════════════

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::invalid_config(format!("Invalid {name} value '{value}': {e}")))
}

impl Config {
    /// Apply `BACKCHAIN_*` environment variable overrides
    ///
    /// # Errors
    ///
    /// Returns error if environment variable values are invalid
    pub fn apply_env_vars(self) -> Result<Self> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be parsed
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("BACKCHAIN_CATALOG_DB") {
            self.catalog_db = value;
        }
        if let Some(value) = lookup("BACKCHAIN_STAGING_DIR") {
            self.staging_dir = value;
        }
        if let Some(value) = lookup("BACKCHAIN_BACKUP_ROOT") {
            self.backup_root = value;
        }
        if let Some(value) = lookup("BACKCHAIN_SERVER") {
            self.engine.server = value;
        }
        if let Some(value) = lookup("BACKCHAIN_SQLCMD_PATH") {
            self.engine.sqlcmd_path = value;
        }
        if let Some(value) = lookup("BACKCHAIN_TRUSTED_CONNECTION") {
            self.engine.trusted_connection = parse_env("BACKCHAIN_TRUSTED_CONNECTION", &value)?;
        }
        if let Some(value) = lookup("BACKCHAIN_MAX_RETRIES") {
            self.retry.max_retries = parse_env("BACKCHAIN_MAX_RETRIES", &value)?;
        }
        if let Some(value) = lookup("BACKCHAIN_LEASE_TTL_SECS") {
            self.lease.ttl_secs = parse_env("BACKCHAIN_LEASE_TTL_SECS", &value)?;
        }
        if let Some(value) = lookup("BACKCHAIN_VERIFICATION_POLICY") {
            self.verification.policy =
                parse_env::<VerificationPolicy>("BACKCHAIN_VERIFICATION_POLICY", &value)?;
        }
        Ok(self)
    }
}
