//! # Backchain
//!
//! Backup-chain orchestration and point-in-time restore for SQL Server.
//!
//! ## Components
//!
//! - [`catalog`]: `SQLite` store of backup records and restore jobs
//! - [`executor`]: takes backups and catalogs them
//! - [`resolver`]: resolves restore chains from the catalog
//! - [`restore`]: runs restore jobs step by step
//! - [`verify`]: checksum and full-restore verification
//! - [`lease`]: one active backup or restore per database
//! - [`engine`] / [`storage`]: `sqlcmd` and local filesystem adapters
//! - [`context`]: builds all of the above from a `Config`

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![forbid(unsafe_code)]

pub mod catalog;
pub mod cli;
pub mod context;
pub mod engine;
pub mod executor;
pub mod lease;
pub mod resolver;
pub mod restore;
pub mod storage;
pub mod verify;

pub use context::Backchain;
