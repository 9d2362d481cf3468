//! Restore chain resolution.
//!
//! Pure functions over catalog rows. The resolver picks a base FULL, an
//! optional DIFFERENTIAL anchored to it, then stitches LOG backups forward
//! from the anchor LSN until the target is covered. Any hole in the log
//! sequence before the target is reached is a [`ResolutionError::BrokenChain`];
//! nothing is ever approximated across a gap.
//!
//! Callers pass only records that are eligible under their verification
//! policy; [`eligible`] does that filtering for in-memory record sets.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use tracing::{debug, warn};

use crate::{
    chain::{Coverage, RestoreChain, RestoreTarget},
    error::ResolutionError,
    lsn::Lsn,
    record::{BackupLsns, BackupRecord, BackupType, DatabaseName, VerificationPolicy},
    Error, Result,
};

#[cfg(test)]
pub(crate) mod fixtures;

/// Log backups selected after the anchor, and how far they reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogStitch {
    pub logs: Vec<BackupRecord>,
    pub stop_at: Option<DateTime<Utc>>,
    pub coverage: Coverage,
}

/// A record with its completion data unpacked.
#[derive(Clone, Copy)]
struct Candidate<'a> {
    record: &'a BackupRecord,
    lsns: BackupLsns,
    finished: DateTime<Utc>,
}

impl<'a> Candidate<'a> {
    fn of(record: &'a BackupRecord) -> Option<Self> {
        Some(Self {
            record,
            lsns: record.lsns?,
            finished: record.finished_at?,
        })
    }

    /// Later LSN wins; identical LSNs go to the most recently finished copy.
    fn preference(&self) -> (Lsn, DateTime<Utc>) {
        (self.lsns.last, self.finished)
    }

    fn finished_by(&self, target: RestoreTarget) -> bool {
        target.point().map_or(true, |t| self.finished <= t)
    }

    /// Whether this log continues the sequence at `expected`.
    ///
    /// The opening log may straddle the anchor; later logs must start exactly
    /// where the previous one ended.
    fn continues(&self, expected: Lsn, opening: bool) -> bool {
        let starts = if opening {
            self.lsns.first <= expected
        } else {
            self.lsns.first == expected
        };
        starts && self.lsns.last > expected
    }
}

fn candidates<'r, 'a: 'r>(
    records: &'r [&'a BackupRecord],
    backup_type: BackupType,
) -> impl Iterator<Item = Candidate<'a>> + 'r {
    records
        .iter()
        .filter(move |r| r.backup_type == backup_type)
        .filter_map(|r| Candidate::of(*r))
}

/// Records for `database` that may join a chain under `policy`.
#[must_use]
pub fn eligible<'a>(
    database: &DatabaseName,
    records: &'a [BackupRecord],
    policy: VerificationPolicy,
) -> Vec<&'a BackupRecord> {
    records
        .iter()
        .filter(|r| &r.database_name == database && r.is_eligible(policy))
        .collect()
}

/// Latest FULL finished at or before the target.
///
/// Copy-only fulls are valid restore bases; copy-only only matters for
/// anchoring later differentials.
#[must_use]
pub fn select_base<'a>(
    records: &[&'a BackupRecord],
    target: RestoreTarget,
) -> Option<&'a BackupRecord> {
    candidates(records, BackupType::Full)
        .filter(|c| c.finished_by(target))
        .max_by_key(Candidate::preference)
        .map(|c| c.record)
}

/// Latest DIFFERENTIAL anchored to `base` and finished at or before the target.
#[must_use]
pub fn select_differential<'a>(
    records: &[&'a BackupRecord],
    base: &BackupRecord,
    target: RestoreTarget,
) -> Option<&'a BackupRecord> {
    let base_last = base.last_lsn()?;
    candidates(records, BackupType::Differential)
        .filter(|c| c.lsns.database_backup == base_last && c.finished_by(target))
        .max_by_key(Candidate::preference)
        .map(|c| c.record)
}

/// Walk LOG backups forward from `anchor` until the target is covered.
///
/// When several logs continue the sequence, the one reaching furthest wins.
///
/// # Errors
///
/// Returns `ResolutionError::BrokenChain` if the sequence stops short of the
/// target while later logs exist, and `Error::Invariant` if `anchor` has no
/// LSN metadata.
pub fn stitch_logs(
    database: &DatabaseName,
    anchor: &BackupRecord,
    records: &[&BackupRecord],
    target: RestoreTarget,
) -> Result<LogStitch> {
    let anchor = Candidate::of(anchor)
        .ok_or_else(|| Error::invariant(format!("anchor {} has no LSN metadata", anchor.id)))?;

    if target.point().is_some_and(|t| t <= anchor.finished) {
        return Ok(LogStitch {
            logs: Vec::new(),
            stop_at: None,
            coverage: Coverage::Exact,
        });
    }

    let pool = candidates(records, BackupType::Log)
        .filter(|c| c.lsns.last > anchor.lsns.last)
        .sorted_by_key(|c| c.lsns.first)
        .collect::<Vec<_>>();

    let mut selected: Vec<Candidate<'_>> = Vec::new();
    let mut expected = anchor.lsns.last;

    loop {
        let opening = selected.is_empty();
        let next = pool
            .iter()
            .filter(|c| c.continues(expected, opening))
            .max_by_key(|c| c.preference())
            .copied();

        let Some(log) = next else {
            let gap = pool
                .iter()
                .map(|c| c.lsns.first)
                .filter(|first| *first > expected)
                .min();
            if let Some(found) = gap {
                return Err(ResolutionError::BrokenChain {
                    database: database.to_string(),
                    expected,
                    found,
                }
                .into());
            }
            break;
        };

        expected = log.lsns.last;
        selected.push(log);

        if let Some(t) = target.point().filter(|t| log.finished >= *t) {
            return Ok(LogStitch {
                logs: selected.iter().map(|c| c.record.clone()).collect(),
                stop_at: Some(t),
                coverage: Coverage::Exact,
            });
        }
    }

    let coverage = match target {
        RestoreTarget::Latest => Coverage::Latest,
        RestoreTarget::PointInTime(requested) => {
            let reachable = selected.last().map_or(anchor.finished, |c| c.finished);
            warn!(
                database = %database,
                requested = %requested.to_rfc3339(),
                reachable = %reachable.to_rfc3339(),
                "Requested point is past the newest log backup; restoring to the latest reachable point"
            );
            Coverage::BeyondCoverage {
                requested,
                reachable,
            }
        }
    };

    Ok(LogStitch {
        logs: selected.into_iter().map(|c| c.record.clone()).collect(),
        stop_at: None,
        coverage,
    })
}

/// Build and validate a chain from selected parts.
///
/// # Errors
///
/// Returns `Error::Invariant` if the parts do not form a valid chain.
pub fn assemble_chain(
    database: &DatabaseName,
    target: RestoreTarget,
    base: &BackupRecord,
    differential: Option<&BackupRecord>,
    stitch: LogStitch,
) -> Result<RestoreChain> {
    let steps = std::iter::once(base.clone())
        .chain(differential.cloned())
        .chain(stitch.logs)
        .collect::<Vec<_>>();

    let chain = RestoreChain::new(
        database.clone(),
        steps,
        target,
        stitch.stop_at,
        stitch.coverage,
    );
    chain.validate()?;

    debug!(
        database = %database,
        steps = chain.len(),
        chain = %chain.steps().iter().map(BackupRecord::describe).join(" -> "),
        "Resolved restore chain"
    );
    Ok(chain)
}

/// Resolve a restore chain from already-eligible records.
///
/// # Errors
///
/// - `ResolutionError::NoRestorePath` if no FULL finished at or before the target
/// - `ResolutionError::BrokenChain` if a log is missing before the target
pub fn resolve_from(
    database: &DatabaseName,
    records: &[&BackupRecord],
    target: RestoreTarget,
) -> Result<RestoreChain> {
    let base = select_base(records, target).ok_or_else(|| ResolutionError::NoRestorePath {
        database: database.to_string(),
        point_in_time: target.point(),
    })?;
    let differential = select_differential(records, base, target);
    let anchor = differential.unwrap_or(base);
    let stitch = stitch_logs(database, anchor, records, target)?;

    assemble_chain(database, target, base, differential, stitch)
}

/// Resolve a restore chain for `database` from any record set.
///
/// # Errors
///
/// See [`resolve_from`].
pub fn resolve(
    database: &DatabaseName,
    records: &[BackupRecord],
    target: RestoreTarget,
    policy: VerificationPolicy,
) -> Result<RestoreChain> {
    resolve_from(database, &eligible(database, records, policy), target)
}

/// Resolve the shortest chain whose final step is `record`.
///
/// `record` itself is admitted regardless of policy so a failed verification
/// can be re-run; every other step must be eligible.
///
/// # Errors
///
/// Returns an input error if `record` has not completed, and a resolution
/// error if no chain ends at it.
pub fn resolve_through(
    record: &BackupRecord,
    records: &[BackupRecord],
    policy: VerificationPolicy,
) -> Result<RestoreChain> {
    let database = &record.database_name;
    let (Some(lsns), Some(finished)) = (record.lsns, record.finished_at) else {
        return Err(Error::invalid_argument(format!(
            "Backup {} has not completed and cannot be restored",
            record.id
        )));
    };
    if !record.status.is_completed() {
        return Err(Error::invalid_argument(format!(
            "Backup {} is {} and cannot be restored",
            record.id, record.status
        )));
    }

    let mut pool = eligible(database, records, policy);
    pool.retain(|r| r.id != record.id);
    pool.push(record);

    let target = RestoreTarget::PointInTime(finished);
    let unreachable = || ResolutionError::NoRestorePath {
        database: database.to_string(),
        point_in_time: Some(finished),
    };

    match record.backup_type {
        BackupType::Full => {
            let stitch = stitch_logs(database, record, &[], target)?;
            assemble_chain(database, target, record, None, stitch)
        }
        BackupType::Differential => {
            let base = candidates(&pool, BackupType::Full)
                .filter(|c| c.lsns.last == lsns.database_backup)
                .max_by_key(Candidate::preference)
                .map(|c| c.record)
                .ok_or_else(unreachable)?;
            let stitch = stitch_logs(database, record, &[], target)?;
            assemble_chain(database, target, base, Some(record), stitch)
        }
        BackupType::Log => {
            let chain = resolve_from(database, &pool, target)?;
            if chain.steps().last().map(|s| &s.id) != Some(&record.id) {
                return Err(unreachable().into());
            }
            // Recover at the end of the log, never with STOPAT
            let stitch = LogStitch {
                logs: chain.logs().to_vec(),
                stop_at: None,
                coverage: Coverage::Exact,
            };
            let base = chain
                .full()
                .ok_or_else(|| Error::invariant("restore chain is empty"))?;
            assemble_chain(database, target, base, chain.differential(), stitch)
        }
    }
}
