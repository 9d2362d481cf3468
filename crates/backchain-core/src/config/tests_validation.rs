//! Validation tests for configuration

use super::{Config, LeaseConfig};
use crate::retry::RetryPolicy;

#[test]
fn test_empty_paths_rejected() {
    let config = Config {
        staging_dir: "  ".to_string(),
        ..Config::default()
    };
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("staging_dir"));
}

#[test]
fn test_zero_lease_ttl_rejected() {
    let config = Config {
        lease: LeaseConfig { ttl_secs: 0 },
        ..Config::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_retry_bounds() {
    let too_many = Config {
        retry: RetryPolicy::default().with_max_retries(21),
        ..Config::default()
    };
    assert!(too_many.validate().is_err());

    let at_limit = Config {
        retry: RetryPolicy::default().with_max_retries(20),
        ..Config::default()
    };
    assert!(at_limit.validate().is_ok());

    let inverted = Config {
        retry: RetryPolicy::default()
            .with_base_delay_ms(5_000)
            .with_max_delay_ms(1_000),
        ..Config::default()
    };
    let err = inverted.validate().unwrap_err();
    assert!(err.to_string().contains("base_delay_ms"));
}

#[test]
fn test_scratch_prefix_must_be_identifier_safe() {
    let mut config = Config::default();
    config.verification.scratch_prefix = "verify-".to_string();
    assert!(config.validate().is_err());

    config.verification.scratch_prefix = "chk_".to_string();
    assert!(config.validate().is_ok());
}
