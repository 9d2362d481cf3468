//! Database engine adapters.
//!
//! [`SqlcmdEngine`] drives SQL Server through the `sqlcmd` client. Failures
//! are sorted into transient (worth a retry) and logical (surfaced at once)
//! by matching the client's messages against known patterns.

mod sqlcmd;

pub use sqlcmd::{relocation_path, SqlcmdEngine};

/// Message fragments that mark a failure as transient.
///
/// Connection and login problems, deadlocks, concurrent backup serialization
/// and out-of-space conditions.
const TRANSIENT_PATTERNS: &[&str] = &[
    "login timeout expired",
    "timeout expired",
    "tcp provider",
    "named pipes provider",
    "network-related",
    "server is not found or not accessible",
    "connection was forcibly closed",
    "communication link failure",
    "deadlock victim",
    "msg 1205,",
    "must be serialized",
    "not enough space on the disk",
    "operating system error 112",
    "operating system error 64",
    "operating system error 53",
];

/// Whether an engine message describes a condition retry might clear.
#[must_use]
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}
