//! The resolved restore chain.
//!
//! A `RestoreChain` is built by [`crate::resolver`] and never mutated after it
//! is returned. The orchestrator re-checks it with [`RestoreChain::validate`]
//! before issuing the first engine command.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    command::RestoreMode,
    lsn::Lsn,
    record::{BackupRecord, BackupType, DatabaseName},
    Error, Result,
};

/// What the caller asked to restore to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "at", rename_all = "snake_case")]
pub enum RestoreTarget {
    Latest,
    PointInTime(DateTime<Utc>),
}

impl RestoreTarget {
    #[must_use]
    pub const fn point(self) -> Option<DateTime<Utc>> {
        match self {
            Self::Latest => None,
            Self::PointInTime(t) => Some(t),
        }
    }
}

/// How well the chain reaches the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Coverage {
    /// The requested point is reproduced exactly
    Exact,
    /// Restore to the newest available state was requested and is reached
    Latest,
    /// The requested point lies past the newest contiguous backup; the chain
    /// stops at `reachable` instead
    BeyondCoverage {
        requested: DateTime<Utc>,
        reachable: DateTime<Utc>,
    },
}

/// Ordered `[full, diff?, log*]` plus the resolved target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreChain {
    database: DatabaseName,
    steps: Vec<BackupRecord>,
    target: RestoreTarget,
    stop_at: Option<DateTime<Utc>>,
    coverage: Coverage,
}

impl RestoreChain {
    pub(crate) const fn new(
        database: DatabaseName,
        steps: Vec<BackupRecord>,
        target: RestoreTarget,
        stop_at: Option<DateTime<Utc>>,
        coverage: Coverage,
    ) -> Self {
        Self {
            database,
            steps,
            target,
            stop_at,
            coverage,
        }
    }

    #[must_use]
    pub const fn database(&self) -> &DatabaseName {
        &self.database
    }

    #[must_use]
    pub fn steps(&self) -> &[BackupRecord] {
        &self.steps
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub const fn target(&self) -> RestoreTarget {
        self.target
    }

    /// `STOPAT` applied to the final log step, if any.
    #[must_use]
    pub const fn stop_at(&self) -> Option<DateTime<Utc>> {
        self.stop_at
    }

    #[must_use]
    pub const fn coverage(&self) -> Coverage {
        self.coverage
    }

    /// Whether the chain reaches what was asked for, exactly or as latest.
    #[must_use]
    pub const fn reaches_target(&self) -> bool {
        !matches!(self.coverage, Coverage::BeyondCoverage { .. })
    }

    #[must_use]
    pub fn full(&self) -> Option<&BackupRecord> {
        self.steps.first()
    }

    #[must_use]
    pub fn differential(&self) -> Option<&BackupRecord> {
        self.steps
            .get(1)
            .filter(|r| r.backup_type == BackupType::Differential)
    }

    #[must_use]
    pub fn logs(&self) -> &[BackupRecord] {
        let skip = if self.differential().is_some() { 2 } else { 1 };
        self.steps.get(skip..).unwrap_or(&[])
    }

    /// The state the restored database will reflect.
    #[must_use]
    pub fn reachable_until(&self) -> Option<DateTime<Utc>> {
        self.stop_at
            .or_else(|| self.steps.last().and_then(|r| r.finished_at))
    }

    /// `(full.first_lsn, last.last_lsn)`.
    #[must_use]
    pub fn lsn_span(&self) -> Option<(Lsn, Lsn)> {
        let first = self.steps.first().and_then(BackupRecord::first_lsn)?;
        let last = self.steps.last().and_then(BackupRecord::last_lsn)?;
        Some((first, last))
    }

    /// Engine mode for step `index`: every step but the last stays non-recovered.
    #[must_use]
    pub fn mode_for_step(&self, index: usize) -> RestoreMode {
        if index + 1 < self.steps.len() {
            RestoreMode::NoRecovery
        } else {
            self.stop_at
                .map_or(RestoreMode::Recovery, RestoreMode::RecoveryStopAt)
        }
    }

    /// Re-check every structural invariant.
    ///
    /// A chain failing this check would not reconstruct the requested state,
    /// so violations are reported as [`Error::Invariant`] and never retried.
    ///
    /// # Errors
    ///
    /// Returns `Error::Invariant` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        let full = self
            .steps
            .first()
            .ok_or_else(|| Error::invariant("restore chain is empty"))?;
        if full.backup_type != BackupType::Full {
            return Err(Error::invariant(format!(
                "restore chain starts with {} instead of FULL",
                full.backup_type
            )));
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.database_name != self.database {
                return Err(Error::invariant(format!(
                    "step {} belongs to '{}', chain is for '{}'",
                    index + 1,
                    step.database_name,
                    self.database
                )));
            }
            if step.lsns.is_none() || step.finished_at.is_none() {
                return Err(Error::invariant(format!(
                    "step {} ({}) has no LSN metadata",
                    index + 1,
                    step.id
                )));
            }
            if step.backup_type == BackupType::Full && index > 0 {
                return Err(Error::invariant("FULL backup after the first step"));
            }
            if step.backup_type == BackupType::Differential && index != 1 {
                return Err(Error::invariant("DIFFERENTIAL backup outside step 2"));
            }
        }

        let mut anchor = full.lsns.map(|l| l.last);
        if let Some(diff) = self.differential() {
            let lsns = diff.lsns.map(|l| (l.database_backup, l.last));
            match (anchor, lsns) {
                (Some(base), Some((diff_base, diff_last))) if base == diff_base => {
                    anchor = Some(diff_last);
                }
                _ => {
                    return Err(Error::invariant(format!(
                        "differential {} is not anchored to full {}",
                        diff.id, full.id
                    )))
                }
            }
        }

        let mut expected = anchor;
        for (position, log) in self.logs().iter().enumerate() {
            let (Some(exp), Some(lsns)) = (expected, log.lsns) else {
                return Err(Error::invariant("log step without LSN metadata"));
            };
            let continues = if position == 0 {
                lsns.first <= exp && exp < lsns.last
            } else {
                lsns.first == exp
            };
            if !continues {
                return Err(Error::invariant(format!(
                    "log {} (lsn {}-{}) does not continue from lsn {exp}",
                    log.id, lsns.first, lsns.last
                )));
            }
            expected = Some(lsns.last);
        }

        self.validate_target()
    }

    fn validate_target(&self) -> Result<()> {
        let last = self
            .steps
            .last()
            .ok_or_else(|| Error::invariant("restore chain is empty"))?;
        let last_finished = last
            .finished_at
            .ok_or_else(|| Error::invariant("final step has no finish time"))?;

        match (self.target, self.coverage, self.stop_at) {
            (RestoreTarget::Latest, Coverage::Latest, None) => Ok(()),
            (RestoreTarget::PointInTime(t), Coverage::Exact, Some(stop)) => {
                if stop != t {
                    Err(Error::invariant(format!(
                        "chain stops at {} but {} was requested",
                        stop.to_rfc3339(),
                        t.to_rfc3339()
                    )))
                } else if last.backup_type != BackupType::Log {
                    Err(Error::invariant("STOPAT applied to a non-log step"))
                } else if stop > last_finished {
                    Err(Error::invariant(format!(
                        "STOPAT {} is past the final log backup",
                        stop.to_rfc3339()
                    )))
                } else {
                    Ok(())
                }
            }
            (RestoreTarget::PointInTime(t), Coverage::Exact, None) => {
                if t < last_finished {
                    Err(Error::invariant(format!(
                        "requested {} precedes the final step, which needs STOPAT",
                        t.to_rfc3339()
                    )))
                } else {
                    Ok(())
                }
            }
            (
                RestoreTarget::PointInTime(t),
                Coverage::BeyondCoverage {
                    requested,
                    reachable,
                },
                None,
            ) if requested == t && reachable == last_finished => Ok(()),
            (target, coverage, stop) => Err(Error::invariant(format!(
                "chain target {target:?} does not match coverage {coverage:?} / stop {stop:?}"
            ))),
        }
    }
}
