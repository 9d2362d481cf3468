//! Human and JSON renderings of records, chains and jobs.
//!
//! JSON goes to stdout; progress and warnings go to stderr through `tracing`.

use backchain_core::{
    BackupRecord, BackupStatus, BackupType, Coverage, DatabaseName, JobId, RecordId,
    RestoreChain, RestoreJob, RestoreMode, RestoreState, RestoreTarget, Result,
};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;

use crate::verify::{VerificationReport, VerificationResult};

/// Print `value` as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn lsn_range(record: &BackupRecord) -> String {
    record
        .lsns
        .map_or_else(|| "-".to_string(), |l| format!("{}-{}", l.first, l.last))
}

fn timestamp(t: Option<DateTime<Utc>>) -> String {
    t.map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

// ═══════════════════════════════════════════════════════════════════════════
// RECORDS
// ═══════════════════════════════════════════════════════════════════════════

/// One-line summary of a record.
pub fn record_line(record: &BackupRecord) -> String {
    format!(
        "{id}  {kind:<12} {status:<19} lsn {range:<24} finished {finished}{copy}  {location}",
        id = record.id.short(),
        kind = record.backup_type.to_string(),
        status = record.status.to_string(),
        range = lsn_range(record),
        finished = timestamp(record.finished_at),
        copy = if record.is_copy_only { " (copy-only)" } else { "" },
        location = record.location,
    )
}

pub fn record_table(records: &[BackupRecord]) -> String {
    if records.is_empty() {
        return "No backups cataloged".to_string();
    }
    records.iter().map(record_line).join("\n")
}

// ═══════════════════════════════════════════════════════════════════════════
// CHAINS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub struct StepView {
    pub step: usize,
    pub record_id: RecordId,
    pub backup_type: BackupType,
    pub status: BackupStatus,
    pub lsn_range: String,
    pub finished_at: Option<DateTime<Utc>>,
    pub location: String,
    pub mode: RestoreMode,
}

#[derive(Debug, Serialize)]
pub struct ChainView {
    pub database: DatabaseName,
    pub target: RestoreTarget,
    pub coverage: Coverage,
    pub stop_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepView>,
}

impl ChainView {
    pub fn of(chain: &RestoreChain) -> Self {
        Self {
            database: chain.database().clone(),
            target: chain.target(),
            coverage: chain.coverage(),
            stop_at: chain.stop_at(),
            steps: chain
                .steps()
                .iter()
                .enumerate()
                .map(|(index, record)| StepView {
                    step: index + 1,
                    record_id: record.id.clone(),
                    backup_type: record.backup_type,
                    status: record.status,
                    lsn_range: lsn_range(record),
                    finished_at: record.finished_at,
                    location: record.location.clone(),
                    mode: chain.mode_for_step(index),
                })
                .collect(),
        }
    }
}

fn mode_text(mode: RestoreMode) -> String {
    match mode {
        RestoreMode::NoRecovery => "NORECOVERY".to_string(),
        RestoreMode::Recovery => "RECOVERY".to_string(),
        RestoreMode::RecoveryStopAt(t) => format!("RECOVERY STOPAT {}", t.to_rfc3339()),
    }
}

/// Warning text when the chain falls short of the requested point.
pub fn coverage_warning(chain: &RestoreChain) -> Option<String> {
    match chain.coverage() {
        Coverage::BeyondCoverage {
            requested,
            reachable,
        } => Some(format!(
            "Warning: {} is past the last log backup; restoring to the latest reachable point {}",
            requested.to_rfc3339(),
            reachable.to_rfc3339()
        )),
        Coverage::Exact | Coverage::Latest => None,
    }
}

pub fn chain_text(chain: &RestoreChain) -> String {
    let view = ChainView::of(chain);
    let header = match chain.target() {
        RestoreTarget::Latest => format!(
            "Restore chain for '{}' to the latest point ({} steps)",
            view.database,
            view.steps.len()
        ),
        RestoreTarget::PointInTime(t) => format!(
            "Restore chain for '{}' to {} ({} steps)",
            view.database,
            t.to_rfc3339(),
            view.steps.len()
        ),
    };
    let steps = view
        .steps
        .iter()
        .map(|s| {
            format!(
                "  {step}. {kind:<12} {id}  lsn {range:<24} {mode}\n     {location}",
                step = s.step,
                kind = s.backup_type.to_string(),
                id = s.record_id.short(),
                range = s.lsn_range,
                mode = mode_text(s.mode),
                location = s.location,
            )
        })
        .join("\n");
    format!("{header}\n{steps}")
}

// ═══════════════════════════════════════════════════════════════════════════
// JOBS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub target_database: DatabaseName,
    pub source_database: DatabaseName,
    pub state: RestoreState,
    /// One-based step currently running (or last run)
    pub current_step: usize,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_step: Option<usize>,
    pub cancel_requested: bool,
    pub error: Option<String>,
    pub coverage: Coverage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobView {
    pub fn of(job: &RestoreJob) -> Self {
        Self {
            id: job.id.clone(),
            target_database: job.target_database.clone(),
            source_database: job.chain.database().clone(),
            state: job.state,
            current_step: job.current_step_index + 1,
            total_steps: job.total_steps(),
            completed_steps: job.completed_steps(),
            failed_step: job.failed_step.map(|s| s + 1),
            cancel_requested: job.cancel_requested,
            error: job.error.clone(),
            coverage: job.chain.coverage(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

pub fn job_text(job: &RestoreJob) -> String {
    let mut lines = vec![
        format!("Job      {}", job.id),
        format!(
            "Target   {} (from {})",
            job.target_database,
            job.chain.database()
        ),
        format!("State    {}", job.state),
        format!(
            "Progress {}/{} steps",
            job.completed_steps(),
            job.total_steps()
        ),
    ];
    if let Some(step) = job.current_step().filter(|_| !job.state.is_terminal()) {
        lines.push(format!(
            "Step     {} {}",
            job.current_step_index + 1,
            step.describe()
        ));
    }
    if job.cancel_requested {
        lines.push("Cancel   requested".to_string());
    }
    if let Some(error) = &job.error {
        lines.push(format!("Error    {error}"));
    }
    lines.join("\n")
}

pub fn job_table(jobs: &[RestoreJob]) -> String {
    if jobs.is_empty() {
        return "No restore jobs".to_string();
    }
    jobs.iter()
        .map(|job| {
            format!(
                "{id}  {target:<24} {state:<12} {done}/{total}  {updated}",
                id = job.id,
                target = job.target_database.as_str(),
                state = job.state.to_string(),
                done = job.completed_steps(),
                total = job.total_steps(),
                updated = timestamp(Some(job.updated_at)),
            )
        })
        .join("\n")
}

// ═══════════════════════════════════════════════════════════════════════════
// VERIFICATION
// ═══════════════════════════════════════════════════════════════════════════

pub fn verification_line(report: &VerificationReport) -> String {
    let verdict = match &report.result {
        VerificationResult::Passed => "PASSED".to_string(),
        VerificationResult::Failed { reason } => format!("FAILED: {reason}"),
    };
    format!(
        "{id}  {kind:<12} {mode}  {verdict}",
        id = report.record_id.short(),
        kind = report.backup_type.to_string(),
        mode = report.mode,
    )
}
