use backchain_core::{
    error::CatalogError, BackupLsns, BackupRecord, BackupStatus, BackupType, DatabaseName, Error,
    JobId, Lsn, RestoreState, RestoreTarget, VerificationPolicy,
};
use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;
use tokio_test::block_on;

use super::{Catalog, Completion, RecordOrder, RecordQuery, SqliteCatalog};

type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

async fn setup() -> Result<(SqliteCatalog, TempDir), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let catalog = SqliteCatalog::open(&dir.path().join("state/catalog.db")).await?;
    Ok((catalog, dir))
}

fn sales() -> DatabaseName {
    DatabaseName::parse("sales").unwrap()
}

fn lsns(first: u128, last: u128, database_backup: u128) -> BackupLsns {
    BackupLsns {
        first: Lsn::new(first),
        last: Lsn::new(last),
        checkpoint: Lsn::new(first),
        database_backup: Lsn::new(database_backup),
    }
}

/// A finished record, inserted directly as an import would.
fn finished(
    backup_type: BackupType,
    range: BackupLsns,
    hour: u32,
    status: BackupStatus,
) -> BackupRecord {
    let finished_at = Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap();
    let mut record = BackupRecord::in_progress(
        sales(),
        backup_type,
        format!("/backups/sales/{backup_type}/{hour}"),
        false,
        uuid::Uuid::new_v4().to_string(),
    );
    record.lsns = Some(range);
    record.started_at = finished_at - Duration::minutes(5);
    record.finished_at = Some(finished_at);
    record.status = status;
    record.size_bytes = 4096;
    record.checksum = Some("ab".repeat(32));
    record
}

#[test]
fn test_record_and_get_round_trip() -> TestResult {
    block_on(async {
        let (catalog, _dir) = setup().await?;
        let record = finished(
            BackupType::Full,
            lsns(100, 200, 0),
            0,
            BackupStatus::Succeeded,
        );

        let id = catalog.record(&record).await?;
        let loaded = catalog.get(&id).await?;

        assert_eq!(loaded, Some(record));
        Ok(())
    })
}

#[tokio::test]
async fn test_same_token_never_creates_two_records() -> TestResult {
    let (catalog, _dir) = setup().await?;
    let first = BackupRecord::in_progress(sales(), BackupType::Full, "/b/1", false, "nightly-1");
    let second = BackupRecord::in_progress(sales(), BackupType::Full, "/b/2", false, "nightly-1");

    catalog.record(&first).await?;
    let err = catalog.record(&second).await.unwrap_err();

    assert!(matches!(
        err,
        Error::Catalog(CatalogError::DuplicateRecord { .. })
    ));
    assert!(err.to_string().contains("nightly-1"));
    assert_eq!(
        catalog.query(&RecordQuery::for_database(&sales())).await?.len(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_identical_lsn_range_is_a_duplicate() -> TestResult {
    let (catalog, _dir) = setup().await?;
    catalog
        .record(&finished(
            BackupType::Log,
            lsns(200, 250, 100),
            1,
            BackupStatus::Succeeded,
        ))
        .await?;

    let err = catalog
        .record(&finished(
            BackupType::Log,
            lsns(200, 250, 100),
            2,
            BackupStatus::Succeeded,
        ))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("same LSN range"));
    assert_eq!(err.exit_code(), 3);
    Ok(())
}

#[tokio::test]
async fn test_complete_writes_lsns_once() -> TestResult {
    let (catalog, _dir) = setup().await?;
    let record = BackupRecord::in_progress(sales(), BackupType::Full, "/b/full", false, "t-1");
    let id = catalog.record(&record).await?;

    let done = catalog
        .complete(
            &id,
            &Completion::succeeded(lsns(100, 200, 0), 8192, "cd".repeat(32)),
        )
        .await?;
    assert_eq!(done.status, BackupStatus::Succeeded);
    assert_eq!(done.last_lsn(), Some(Lsn::new(200)));
    assert_eq!(done.size_bytes, 8192);
    assert!(done.finished_at.is_some());

    let again = catalog
        .complete(&id, &Completion::failed("late failure"))
        .await
        .unwrap_err();
    assert!(matches!(
        again,
        Error::Catalog(CatalogError::InvalidStatusTransition {
            from: BackupStatus::Succeeded,
            to: BackupStatus::Failed,
            ..
        })
    ));
    Ok(())
}

#[tokio::test]
async fn test_complete_rejects_duplicate_range() -> TestResult {
    let (catalog, _dir) = setup().await?;
    catalog
        .record(&finished(
            BackupType::Full,
            lsns(100, 200, 0),
            0,
            BackupStatus::Succeeded,
        ))
        .await?;
    let pending = BackupRecord::in_progress(sales(), BackupType::Full, "/b/dup", false, "t-2");
    let id = catalog.record(&pending).await?;

    let err = catalog
        .complete(
            &id,
            &Completion::succeeded(lsns(100, 200, 0), 1, "00".repeat(32)),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Catalog(CatalogError::DuplicateRecord { .. })
    ));
    let still_pending = catalog.get(&id).await?.unwrap();
    assert_eq!(still_pending.status, BackupStatus::InProgress);
    Ok(())
}

#[tokio::test]
async fn test_status_only_moves_forward() -> TestResult {
    let (catalog, _dir) = setup().await?;
    let record = finished(
        BackupType::Full,
        lsns(100, 200, 0),
        0,
        BackupStatus::Succeeded,
    );
    let id = catalog.record(&record).await?;

    catalog
        .update_status(&id, BackupStatus::VerificationFailed, Some("checksum mismatch"))
        .await?;
    let failed = catalog.get(&id).await?.unwrap();
    assert_eq!(failed.status, BackupStatus::VerificationFailed);
    assert_eq!(failed.error_detail.as_deref(), Some("checksum mismatch"));

    catalog
        .update_status(&id, BackupStatus::Verified, None)
        .await?;
    assert_eq!(
        catalog.get(&id).await?.unwrap().status,
        BackupStatus::Verified
    );

    let err = catalog
        .update_status(&id, BackupStatus::InProgress, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("VERIFIED -> IN_PROGRESS"));
    Ok(())
}

#[tokio::test]
async fn test_update_status_unknown_record() -> TestResult {
    let (catalog, _dir) = setup().await?;
    let err = catalog
        .update_status(
            &backchain_core::RecordId::new("missing"),
            BackupStatus::Verified,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Catalog(CatalogError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_query_patterns() -> TestResult {
    let (catalog, _dir) = setup().await?;
    let policy = VerificationPolicy::ExcludeFailed;
    let full_a = finished(BackupType::Full, lsns(100, 200, 0), 0, BackupStatus::Succeeded);
    let full_b = finished(BackupType::Full, lsns(400, 500, 0), 4, BackupStatus::Verified);
    let diff = finished(
        BackupType::Differential,
        lsns(300, 350, 200),
        3,
        BackupStatus::Succeeded,
    );
    let log_1 = finished(BackupType::Log, lsns(200, 250, 100), 1, BackupStatus::Succeeded);
    let log_2 = finished(BackupType::Log, lsns(250, 300, 100), 2, BackupStatus::Succeeded);
    let log_bad = finished(
        BackupType::Log,
        lsns(300, 420, 100),
        5,
        BackupStatus::VerificationFailed,
    );
    for record in [&full_a, &full_b, &diff, &log_2, &log_1, &log_bad] {
        catalog.record(record).await?;
    }

    let at_two = Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap();
    let base = catalog.latest_full_before(&sales(), at_two, policy).await?;
    assert_eq!(base.map(|r| r.id), Some(full_a.id.clone()));

    let logs = catalog.logs_after(&sales(), Lsn::new(100), policy).await?;
    assert_eq!(
        logs.iter().map(|r| r.id.clone()).collect::<Vec<_>>(),
        vec![log_1.id.clone(), log_2.id.clone()]
    );

    let allow_failed = catalog
        .logs_after(&sales(), Lsn::new(250), VerificationPolicy::AllowFailed)
        .await?;
    assert_eq!(allow_failed.len(), 1);
    assert_eq!(allow_failed[0].id, log_bad.id);

    let diffs = catalog
        .differentials_anchored_to(&sales(), Lsn::new(200), policy)
        .await?;
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].id, diff.id);

    let latest = catalog.latest(&sales(), BackupType::Full).await?;
    assert_eq!(latest.map(|r| r.id), Some(full_b.id));
    Ok(())
}

#[tokio::test]
async fn test_query_by_time_range_and_copy_only() -> TestResult {
    let (catalog, _dir) = setup().await?;
    let mut copy = finished(BackupType::Full, lsns(600, 700, 0), 6, BackupStatus::Succeeded);
    copy.is_copy_only = true;
    let regular = finished(BackupType::Full, lsns(100, 200, 0), 1, BackupStatus::Succeeded);
    catalog.record(&copy).await?;
    catalog.record(&regular).await?;

    let anchorable = catalog
        .query(
            &RecordQuery::for_database(&sales())
                .of_type(BackupType::Full)
                .copy_only(false)
                .ordered(RecordOrder::NewestFirst),
        )
        .await?;
    assert_eq!(anchorable.len(), 1);
    assert_eq!(anchorable[0].id, regular.id);

    let window = catalog
        .query(&RecordQuery::for_database(&sales()).finished_between(
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 5, 0, 0).unwrap()),
            None,
        ))
        .await?;
    assert_eq!(window.len(), 1);
    assert!(window[0].is_copy_only);
    Ok(())
}

#[tokio::test]
async fn test_jobs_persist_and_cancel_flag_survives_save() -> TestResult {
    let (catalog, _dir) = setup().await?;
    let records = [
        finished(BackupType::Full, lsns(100, 200, 0), 0, BackupStatus::Succeeded),
        finished(BackupType::Log, lsns(200, 250, 100), 1, BackupStatus::Succeeded),
    ];
    let chain = backchain_core::resolver::resolve(
        &sales(),
        &records,
        RestoreTarget::Latest,
        VerificationPolicy::ExcludeFailed,
    )?;
    let mut job = backchain_core::RestoreJob::new(sales(), chain);
    catalog.save_job(&job).await?;

    catalog.request_cancel(&job.id).await?;
    job.begin_step(0)?;
    catalog.save_job(&job).await?;

    let loaded = catalog.load_job(&job.id).await?.unwrap();
    assert_eq!(loaded.state, RestoreState::Restoring);
    assert!(loaded.cancel_requested);
    assert!(catalog.cancel_requested(&job.id).await?);
    assert_eq!(catalog.list_jobs(Some(&sales())).await?.len(), 1);
    assert!(catalog.list_jobs(None).await?.len() == 1);
    Ok(())
}

#[tokio::test]
async fn test_cancel_unknown_job() -> TestResult {
    let (catalog, _dir) = setup().await?;
    let err = catalog.request_cancel(&JobId::generate()).await.unwrap_err();
    assert!(matches!(err, Error::Catalog(CatalogError::NotFound(_))));
    assert!(catalog.load_job(&JobId::generate()).await?.is_none());
    Ok(())
}
