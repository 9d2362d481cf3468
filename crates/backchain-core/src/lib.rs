//! # Backchain Core
//!
//! Domain model for backup-chain orchestration and point-in-time restore.
//!
//! ## Laws (Compiler Enforced)
//!
//! - No `unwrap()` - returns `Result` instead
//! - No `expect()` - returns `Result` instead
//! - No `panic!()` - returns `Result` instead
//! - No `unsafe` - safe Rust only
//!
//! ## Layout
//!
//! - [`record`]: catalog rows (`BackupRecord`) and their enums
//! - [`resolver`]: pure restore-chain selection over catalog rows
//! - [`chain`] / [`job`]: the resolved chain and the restore job state machine
//! - [`command`] / [`tsql`]: typed engine commands and their rendering
//! - [`engine`] / [`storage`]: traits for the database engine and artifact storage
//! - [`retry`]: bounded exponential backoff for transient failures
//! - [`config`]: layered TOML configuration

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![forbid(unsafe_code)]

pub mod chain;
pub mod checksum;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod lsn;
pub mod record;
pub mod resolver;
pub mod retry;
pub mod storage;
pub mod tsql;

pub use chain::{Coverage, RestoreChain, RestoreTarget};
pub use command::{BackupCommand, FileMove, RestoreCommand, RestoreMode};
pub use config::Config;
pub use engine::{ArtifactFile, BackupArtifact, ConsistencyReport, DatabaseEngine};
pub use error::{Component, Error, Result};
pub use job::{JobId, RestoreJob, RestoreState};
pub use lsn::Lsn;
pub use record::{
    BackupLsns, BackupRecord, BackupStatus, BackupType, DatabaseName, RecordId, RecoveryModel,
    VerificationPolicy,
};
pub use retry::RetryPolicy;
pub use storage::BlobStore;
