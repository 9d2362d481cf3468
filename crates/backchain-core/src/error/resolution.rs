//! Resolution errors: no valid restore chain exists for the request.
//!
//! These are never papered over with an approximate restore target.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::lsn::Lsn;

/// Reasons a restore chain cannot be built.
#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    /// No full backup exists at or before the requested point
    #[error("No restore path for '{database}': no usable full backup {}", describe_point(.point_in_time))]
    NoRestorePath {
        database: String,
        point_in_time: Option<DateTime<Utc>>,
    },

    /// A log backup is missing between the anchor and the target
    #[error(
        "Broken log chain for '{database}': no log backup starts at LSN {expected} \
         (next available starts at {found}); the range {expected}-{found} is missing"
    )]
    BrokenChain {
        database: String,
        expected: Lsn,
        found: Lsn,
    },
}

fn describe_point(point: &Option<DateTime<Utc>>) -> String {
    point.map_or_else(
        || "exists".to_string(),
        |t| format!("finished at or before {}", t.to_rfc3339()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broken_chain_names_missing_range() {
        let err = ResolutionError::BrokenChain {
            database: "sales".into(),
            expected: Lsn::new(200),
            found: Lsn::new(250),
        };
        assert!(err.to_string().contains("200-250"));
    }

    #[test]
    fn test_no_restore_path_latest() {
        let err = ResolutionError::NoRestorePath {
            database: "sales".into(),
            point_in_time: None,
        };
        assert_eq!(
            err.to_string(),
            "No restore path for 'sales': no usable full backup exists"
        );
    }
}
