//! Configuration validation

use super::types::Config;
use crate::{Error, Result};

/// Upper bound on `retry.max_retries`.
const MAX_RETRIES_LIMIT: u32 = 20;

impl Config {
    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any values are out of range or invalid
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("catalog_db", &self.catalog_db),
            ("staging_dir", &self.staging_dir),
            ("backup_root", &self.backup_root),
            ("engine.server", &self.engine.server),
            ("engine.sqlcmd_path", &self.engine.sqlcmd_path),
            ("verification.scratch_dir", &self.verification.scratch_dir),
            ("verification.scratch_prefix", &self.verification.scratch_prefix),
        ] {
            if value.trim().is_empty() {
                return Err(Error::invalid_config(format!("{key} cannot be empty")));
            }
        }

        if self.lease.ttl_secs == 0 {
            return Err(Error::invalid_config("lease.ttl_secs must be at least 1"));
        }

        if self.retry.max_retries > MAX_RETRIES_LIMIT {
            return Err(Error::invalid_config(format!(
                "retry.max_retries must be 0-{MAX_RETRIES_LIMIT}"
            )));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::invalid_config(format!(
                "retry.base_delay_ms ({}) cannot exceed retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }

        if self
            .verification
            .scratch_prefix
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '_'))
        {
            return Err(Error::invalid_config(
                "verification.scratch_prefix may only contain letters, digits and '_'",
            ));
        }

        Ok(())
    }
}
