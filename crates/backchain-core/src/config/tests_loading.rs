//! Loading-focused tests for configuration
//!
//! File parsing, path resolution, and environment overrides.

use std::{collections::HashMap, io::Write};

use serial_test::serial;

use super::{load_config, load_toml_file, project_config_path, Config};
use crate::record::VerificationPolicy;

fn write_config(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(body.as_bytes()).unwrap();
    path
}

#[test]
fn test_partial_file_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        "config.toml",
        r#"
backup_root = "/mnt/backups"

[engine]
server = "sql01,1433"

[verification]
policy = "allow_failed"
"#,
    );

    let config = load_toml_file(&path).unwrap();
    assert_eq!(config.backup_root, "/mnt/backups");
    assert_eq!(config.engine.server, "sql01,1433");
    assert_eq!(config.engine.sqlcmd_path, "sqlcmd");
    assert_eq!(config.verification.policy, VerificationPolicy::AllowFailed);
    assert_eq!(config.lease.ttl_secs, 300);
}

#[test]
fn test_malformed_toml_returns_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "bad.toml", "catalog_db = \n invalid toml [[[");

    let err = load_toml_file(&path).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn test_unknown_policy_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "bad.toml", "[verification]\npolicy = \"sometimes\"\n");
    assert!(load_toml_file(&path).is_err());
}

#[test]
fn test_directory_is_not_a_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_toml_file(dir.path()).unwrap_err();
    assert!(err.to_string().contains("directory"));
}

#[test]
fn test_project_config_path() {
    let path = project_config_path().unwrap();
    assert!(path.ends_with(".backchain/config.toml"));
}

#[test]
fn test_env_overrides_from_lookup() {
    let vars: HashMap<&str, &str> = [
        ("BACKCHAIN_BACKUP_ROOT", "/env/backups"),
        ("BACKCHAIN_MAX_RETRIES", "9"),
        ("BACKCHAIN_TRUSTED_CONNECTION", "false"),
        ("BACKCHAIN_VERIFICATION_POLICY", "require_verified"),
    ]
    .into_iter()
    .collect();

    let config = Config::default()
        .apply_env_from(|name| vars.get(name).map(ToString::to_string))
        .unwrap();

    assert_eq!(config.backup_root, "/env/backups");
    assert_eq!(config.retry.max_retries, 9);
    assert!(!config.engine.trusted_connection);
    assert_eq!(
        config.verification.policy,
        VerificationPolicy::RequireVerified
    );
}

#[test]
fn test_env_override_with_bad_number() {
    let err = Config::default()
        .apply_env_from(|name| (name == "BACKCHAIN_LEASE_TTL_SECS").then(|| "soon".to_string()))
        .unwrap_err();
    assert!(err.to_string().contains("BACKCHAIN_LEASE_TTL_SECS"));
}

#[test]
#[serial]
fn test_load_config_layers_explicit_file_and_env() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        "ops.toml",
        "catalog_db = \"/ops/catalog.db\"\nbackup_root = \"/ops/backups\"\n",
    );

    std::env::set_var("BACKCHAIN_BACKUP_ROOT", "/env/backups");
    let result = load_config(Some(&path));
    std::env::remove_var("BACKCHAIN_BACKUP_ROOT");

    let config = result.unwrap();
    assert_eq!(config.catalog_db, "/ops/catalog.db");
    assert_eq!(config.backup_root, "/env/backups");
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    let err = load_config(Some(std::path::Path::new("/nonexistent/backchain.toml"))).unwrap_err();
    assert_eq!(err.exit_code(), 1);
}
