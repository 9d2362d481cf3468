//! Restore job state machine.
//!
//! ```text
//! PENDING -> RESTORING (steps 1..N-1, NORECOVERY) -> RECOVERING (step N) -> COMPLETED
//!    |            |                                       |
//!    |            +---------------> FAILED <--------------+
//!    +--> ROLLED_BACK (cancelled or refused before any step ran)
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
    chain::RestoreChain,
    record::{BackupRecord, DatabaseName},
    Error, Result,
};

/// Restore job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Parse a job id given on the command line.
    ///
    /// # Errors
    ///
    /// Returns an input error if the text is not a UUID.
    pub fn parse(text: &str) -> Result<Self> {
        uuid::Uuid::parse_str(text.trim())
            .map(|id| Self(id.to_string()))
            .map_err(|e| Error::invalid_argument(format!("Invalid job id '{text}': {e}")))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RestoreState {
    Pending,
    Restoring,
    Recovering,
    Completed,
    Failed,
    RolledBack,
}

impl RestoreState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::RolledBack)
    }

    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(
                next,
                Self::Restoring | Self::Recovering | Self::Failed | Self::RolledBack
            ),
            Self::Restoring => matches!(next, Self::Restoring | Self::Recovering | Self::Failed),
            Self::Recovering => matches!(next, Self::Completed | Self::Failed),
            Self::Completed | Self::Failed | Self::RolledBack => false,
        }
    }
}

/// One restore of a chain into a target database.
///
/// `chain` is a frozen snapshot; the orchestrator only advances
/// `current_step_index` and `state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreJob {
    pub id: JobId,
    pub target_database: DatabaseName,
    pub chain: RestoreChain,
    /// Index of the step running now, or of the next step to run
    pub current_step_index: usize,
    pub state: RestoreState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancel_requested: bool,
    pub error: Option<String>,
    /// Zero-based index of the step that failed
    pub failed_step: Option<usize>,
}

impl RestoreJob {
    #[must_use]
    pub fn new(target_database: DatabaseName, chain: RestoreChain) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            target_database,
            chain,
            current_step_index: 0,
            state: RestoreState::Pending,
            created_at: now,
            updated_at: now,
            cancel_requested: false,
            error: None,
            failed_step: None,
        }
    }

    #[must_use]
    pub fn total_steps(&self) -> usize {
        self.chain.len()
    }

    #[must_use]
    pub fn current_step(&self) -> Option<&BackupRecord> {
        self.chain.steps().get(self.current_step_index)
    }

    /// Steps that finished successfully.
    #[must_use]
    pub fn completed_steps(&self) -> usize {
        match self.state {
            RestoreState::Completed => self.total_steps(),
            _ => self.failed_step.unwrap_or(self.current_step_index),
        }
    }

    fn transition(&mut self, next: RestoreState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::invariant(format!(
                "restore job {} cannot move from {} to {next}",
                self.id, self.state
            )));
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Enter step `index`: `RESTORING` for intermediate steps, `RECOVERING` for the last.
    ///
    /// # Errors
    ///
    /// Returns `Error::Invariant` if steps are entered out of order.
    pub fn begin_step(&mut self, index: usize) -> Result<()> {
        let expected = if self.state == RestoreState::Pending {
            0
        } else {
            self.current_step_index + 1
        };
        if index != expected || index >= self.total_steps() {
            return Err(Error::invariant(format!(
                "restore job {} asked to run step {} but step {} is next",
                self.id,
                index + 1,
                expected + 1
            )));
        }

        let next = if index + 1 == self.total_steps() {
            RestoreState::Recovering
        } else {
            RestoreState::Restoring
        };
        self.transition(next)?;
        self.current_step_index = index;
        Ok(())
    }

    /// Mark the final step done.
    ///
    /// # Errors
    ///
    /// Returns `Error::Invariant` unless the job is recovering.
    pub fn complete(&mut self) -> Result<()> {
        self.transition(RestoreState::Completed)
    }

    /// Record a failure at the current step.
    ///
    /// # Errors
    ///
    /// Returns `Error::Invariant` if the job already ended.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        let started = self.has_started();
        self.transition(RestoreState::Failed)?;
        self.failed_step = started.then_some(self.current_step_index);
        self.error = Some(message.into());
        Ok(())
    }

    /// End a job that never ran a step.
    ///
    /// # Errors
    ///
    /// Returns `Error::Invariant` once any step has started.
    pub fn roll_back(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(RestoreState::RolledBack)?;
        self.error = Some(reason.into());
        Ok(())
    }

    /// Whether any engine command has been issued for this job.
    #[must_use]
    pub fn has_started(&self) -> bool {
        self.state != RestoreState::Pending && self.state != RestoreState::RolledBack
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::{
        chain::{Coverage, RestoreTarget},
        lsn::Lsn,
        record::{BackupLsns, BackupStatus, BackupType},
    };

    fn record(kind: BackupType, first: u128, last: u128, hour: i64) -> BackupRecord {
        let db = DatabaseName::parse("sales").unwrap();
        let mut r = BackupRecord::in_progress(db, kind, "/b", false, uuid::Uuid::new_v4().to_string());
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        r.status = BackupStatus::Succeeded;
        r.finished_at = Some(base + Duration::hours(hour));
        r.lsns = Some(BackupLsns {
            first: Lsn::new(first),
            last: Lsn::new(last),
            checkpoint: Lsn::new(first),
            database_backup: Lsn::new(0),
        });
        r
    }

    fn three_step_job() -> RestoreJob {
        let db = DatabaseName::parse("sales").unwrap();
        let chain = RestoreChain::new(
            db.clone(),
            vec![
                record(BackupType::Full, 100, 200, 0),
                record(BackupType::Log, 200, 250, 1),
                record(BackupType::Log, 250, 300, 2),
            ],
            RestoreTarget::Latest,
            None,
            Coverage::Latest,
        );
        RestoreJob::new(db, chain)
    }

    #[test]
    fn test_happy_path_states() {
        let mut job = three_step_job();
        assert_eq!(job.state, RestoreState::Pending);

        job.begin_step(0).unwrap();
        assert_eq!(job.state, RestoreState::Restoring);
        job.begin_step(1).unwrap();
        assert_eq!(job.state, RestoreState::Restoring);
        job.begin_step(2).unwrap();
        assert_eq!(job.state, RestoreState::Recovering);
        job.complete().unwrap();

        assert_eq!(job.state, RestoreState::Completed);
        assert_eq!(job.completed_steps(), 3);
        assert!(job.state.is_terminal());
    }

    #[test]
    fn test_steps_cannot_be_skipped_or_repeated() {
        let mut job = three_step_job();
        assert!(job.begin_step(1).is_err());
        job.begin_step(0).unwrap();
        assert!(job.begin_step(0).is_err());
        assert!(job.begin_step(2).is_err());
    }

    #[test]
    fn test_failure_records_step() {
        let mut job = three_step_job();
        job.begin_step(0).unwrap();
        job.begin_step(1).unwrap();
        job.fail("media failure").unwrap();

        assert_eq!(job.state, RestoreState::Failed);
        assert_eq!(job.failed_step, Some(1));
        assert_eq!(job.completed_steps(), 1);
        assert!(job.begin_step(2).is_err());
    }

    #[test]
    fn test_roll_back_only_before_first_step() {
        let mut job = three_step_job();
        assert!(!job.has_started());
        job.roll_back("cancelled").unwrap();
        assert_eq!(job.state, RestoreState::RolledBack);
        assert!(!job.has_started());

        let mut running = three_step_job();
        running.begin_step(0).unwrap();
        assert!(running.roll_back("cancelled").is_err());
    }

    #[test]
    fn test_job_id_parse() {
        let id = JobId::generate();
        assert_eq!(JobId::parse(id.as_str()).unwrap(), id);
        assert!(JobId::parse("not-a-uuid").is_err());
    }
}
