//! Default-value and merge tests for configuration

use super::{Config, EngineConfig, LeaseConfig, VerificationConfig};
use crate::{record::VerificationPolicy, retry::RetryPolicy};

#[test]
fn test_defaults_are_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.catalog_db, ".backchain/catalog.db");
    assert_eq!(config.engine.sqlcmd_path, "sqlcmd");
    assert!(config.engine.trusted_connection);
    assert_eq!(config.lease.ttl_secs, 300);
    assert_eq!(
        config.verification.policy,
        VerificationPolicy::ExcludeFailed
    );
}

#[test]
fn test_merge_keeps_base_when_other_is_default() {
    let base = Config {
        backup_root: "/mnt/backups".to_string(),
        engine: EngineConfig {
            server: "sql01".to_string(),
            ..EngineConfig::default()
        },
        ..Config::default()
    };

    let merged = base.clone().merge(Config::default());
    assert_eq!(merged, base);
}

#[test]
fn test_merge_other_overrides() {
    let base = Config {
        backup_root: "/mnt/backups".to_string(),
        ..Config::default()
    };
    let project = Config {
        backup_root: "/srv/backups".to_string(),
        retry: RetryPolicy::default().with_max_retries(7),
        lease: LeaseConfig { ttl_secs: 60 },
        verification: VerificationConfig {
            policy: VerificationPolicy::RequireVerified,
            ..VerificationConfig::default()
        },
        ..Config::default()
    };

    let merged = base.merge(project);
    assert_eq!(merged.backup_root, "/srv/backups");
    assert_eq!(merged.retry.max_retries, 7);
    assert_eq!(merged.retry.base_delay_ms, RetryPolicy::default().base_delay_ms);
    assert_eq!(merged.lease.ttl_secs, 60);
    assert_eq!(
        merged.verification.policy,
        VerificationPolicy::RequireVerified
    );
}

#[test]
fn test_merge_respects_disabled_trusted_connection() {
    let global = Config {
        engine: EngineConfig {
            trusted_connection: false,
            ..EngineConfig::default()
        },
        ..Config::default()
    };
    let merged = Config::default().merge(global.clone());
    assert!(!merged.engine.trusted_connection);

    // A project file that does not mention it keeps the global choice.
    let merged = global.merge(Config::default());
    assert!(!merged.engine.trusted_connection);
}
