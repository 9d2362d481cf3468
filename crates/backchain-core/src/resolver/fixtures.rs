//! Record builders shared by resolver tests.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::{
    lsn::Lsn,
    record::{BackupLsns, BackupRecord, BackupStatus, BackupType, DatabaseName},
};

pub fn sales() -> DatabaseName {
    DatabaseName::parse("sales").unwrap()
}

/// Day 1 at `hours:minutes`; negative hours reach into the previous day.
pub fn at(hours: i64, minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        + Duration::hours(hours)
        + Duration::minutes(minutes)
}

pub fn record(
    backup_type: BackupType,
    first: u128,
    last: u128,
    database_backup: u128,
    finished: DateTime<Utc>,
) -> BackupRecord {
    let mut r = BackupRecord::in_progress(
        sales(),
        backup_type,
        format!("/backups/sales/{backup_type}/{first}_{last}.{}", backup_type.extension()),
        false,
        uuid::Uuid::new_v4().to_string(),
    );
    r.started_at = finished - Duration::minutes(5);
    r.finished_at = Some(finished);
    r.status = BackupStatus::Succeeded;
    r.size_bytes = 1024;
    r.lsns = Some(BackupLsns {
        first: Lsn::new(first),
        last: Lsn::new(last),
        checkpoint: Lsn::new(first),
        database_backup: Lsn::new(database_backup),
    });
    r
}

pub fn full(first: u128, last: u128, finished: DateTime<Utc>) -> BackupRecord {
    record(BackupType::Full, first, last, 0, finished)
}

pub fn diff(first: u128, last: u128, base_last: u128, finished: DateTime<Utc>) -> BackupRecord {
    record(BackupType::Differential, first, last, base_last, finished)
}

pub fn log(first: u128, last: u128, finished: DateTime<Utc>) -> BackupRecord {
    record(BackupType::Log, first, last, 0, finished)
}

/// A backup that started at `started` and ran for `minutes`.
pub fn timed(mut r: BackupRecord, started: DateTime<Utc>, minutes: i64) -> BackupRecord {
    r.started_at = started;
    r.finished_at = Some(started + Duration::minutes(minutes));
    r
}
