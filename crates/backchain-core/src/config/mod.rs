//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config: ~/.config/backchain/config.toml
//! 3. Project config: .backchain/config.toml
//! 4. Explicit file passed with `--config`
//! 5. Environment variables: BACKCHAIN_*
//! 6. CLI flags (command-specific)
//!
//! # Example Config
//!
//! ```toml
//! catalog_db = "/var/lib/backchain/catalog.db"
//! backup_root = "/mnt/backups"
//!
//! [engine]
//! server = "sql01.internal,1433"
//! login_timeout_secs = 30
//!
//! [retry]
//! max_retries = 5
//!
//! [verification]
//! policy = "require_verified"
//! ```
//!
//! # Module Structure
//!
//! - `types`: Configuration structure definitions
//! - `defaults`: Default value implementations
//! - `load`: Loading from files and environment
//! - `merge`: Configuration merging logic
//! - `validate`: Validation

mod defaults;
mod load;
mod merge;
mod types;
mod validate;

#[cfg(test)]
mod tests_defaults;
#[cfg(test)]
mod tests_loading;
#[cfg(test)]
mod tests_validation;

pub use load::{global_config_path, load_config, load_toml_file, project_config_path};
pub use types::{Config, EngineConfig, LeaseConfig, VerificationConfig};
