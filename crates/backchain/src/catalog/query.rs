//! Query building and row parsing for catalog operations

use std::str::FromStr;

use backchain_core::{
    BackupLsns, BackupRecord, BackupStatus, BackupType, DatabaseName, Error, Lsn, RecordId, Result,
};
use chrono::{DateTime, SecondsFormat, Utc};
use itertools::Itertools;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use super::{RecordOrder, RecordQuery};

pub(crate) const RECORD_COLUMNS: &str = "id, database_name, backup_type, first_lsn, last_lsn, \
     checkpoint_lsn, database_backup_lsn, started_at, finished_at, location, size_bytes, status, \
     checksum, is_copy_only, idempotency_token, error_detail";

/// Fixed-width RFC 3339 so stored timestamps sort as text
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(text: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::database_error(format!("Invalid {field} '{text}': {e}")))
}

pub(crate) fn size_to_db(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

fn read<T>(row: &SqliteRow, column: &str) -> Result<T>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column)
        .map_err(|e| Error::database_error(format!("Failed to read {column}: {e}")))
}

fn parse_lsn_column(value: Option<String>, column: &str) -> Result<Option<Lsn>> {
    value
        .map(|text| {
            Lsn::parse(&text)
                .map_err(|e| Error::database_error(format!("Invalid {column}: {e}")))
        })
        .transpose()
}

/// Parse a database row into a `BackupRecord`
pub(crate) fn parse_record_row(row: &SqliteRow) -> Result<BackupRecord> {
    let id: String = read(row, "id")?;
    let database_name = DatabaseName::parse(read::<String>(row, "database_name")?)
        .map_err(|e| Error::database_error(format!("Invalid database_name in record {id}: {e}")))?;
    let backup_type = BackupType::from_str(&read::<String>(row, "backup_type")?)
        .map_err(|e| Error::database_error(format!("Invalid backup_type in record {id}: {e}")))?;
    let status = BackupStatus::from_str(&read::<String>(row, "status")?)
        .map_err(|e| Error::database_error(format!("Invalid status in record {id}: {e}")))?;

    let first = parse_lsn_column(read(row, "first_lsn")?, "first_lsn")?;
    let last = parse_lsn_column(read(row, "last_lsn")?, "last_lsn")?;
    let checkpoint = parse_lsn_column(read(row, "checkpoint_lsn")?, "checkpoint_lsn")?;
    let database_backup =
        parse_lsn_column(read(row, "database_backup_lsn")?, "database_backup_lsn")?;
    let lsns = match (first, last, checkpoint, database_backup) {
        (Some(first), Some(last), Some(checkpoint), Some(database_backup)) => Some(BackupLsns {
            first,
            last,
            checkpoint,
            database_backup,
        }),
        (None, None, None, None) => None,
        _ => {
            return Err(Error::database_error(format!(
                "Record {id} has incomplete LSN metadata"
            )))
        }
    };

    let started_at = parse_timestamp(&read::<String>(row, "started_at")?, "started_at")?;
    let finished_at = read::<Option<String>>(row, "finished_at")?
        .map(|text| parse_timestamp(&text, "finished_at"))
        .transpose()?;
    let size_bytes = u64::try_from(read::<i64>(row, "size_bytes")?).unwrap_or(0);

    Ok(BackupRecord {
        id: RecordId::new(id),
        database_name,
        backup_type,
        lsns,
        started_at,
        finished_at,
        location: read(row, "location")?,
        size_bytes,
        status,
        checksum: read(row, "checksum")?,
        is_copy_only: read::<i64>(row, "is_copy_only")? != 0,
        idempotency_token: read(row, "idempotency_token")?,
        error_detail: read(row, "error_detail")?,
    })
}

/// Build the `WHERE`/`ORDER BY` text and bind values for a record query
pub(crate) fn build_record_query(query: &RecordQuery) -> (String, Vec<String>) {
    let statuses = (!query.statuses.is_empty()).then(|| {
        (
            format!(
                "status IN ({})",
                query.statuses.iter().map(|_| "?").join(", ")
            ),
            query.statuses.iter().map(ToString::to_string).collect_vec(),
        )
    });

    let (clauses, values): (Vec<String>, Vec<Vec<String>>) = [
        query
            .database
            .as_ref()
            .map(|db| ("database_name = ?".to_string(), vec![db.to_string()])),
        query
            .backup_type
            .map(|t| ("backup_type = ?".to_string(), vec![t.to_string()])),
        statuses,
        query
            .finished_after
            .map(|t| ("finished_at >= ?".to_string(), vec![format_timestamp(t)])),
        query
            .finished_before
            .map(|t| ("finished_at <= ?".to_string(), vec![format_timestamp(t)])),
        query
            .first_lsn_after
            .map(|lsn| ("first_lsn > ?".to_string(), vec![lsn.to_sortable()])),
        query
            .anchored_to
            .map(|lsn| ("database_backup_lsn = ?".to_string(), vec![lsn.to_sortable()])),
        query
            .copy_only
            .map(|flag| ("is_copy_only = ?".to_string(), vec![i32::from(flag).to_string()])),
    ]
    .into_iter()
    .flatten()
    .unzip();

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    let order = match query.order {
        RecordOrder::Chronological => "started_at ASC, id ASC",
        RecordOrder::LsnAscending => "first_lsn ASC, finished_at ASC",
        RecordOrder::NewestFirst => "finished_at DESC, last_lsn DESC",
    };
    let limit = query
        .limit
        .map_or_else(String::new, |n| format!(" LIMIT {n}"));

    (
        format!("SELECT {RECORD_COLUMNS} FROM backup_records{where_clause} ORDER BY {order}{limit}"),
        values.into_iter().flatten().collect(),
    )
}

/// Run a record query
pub(crate) async fn query_records(
    pool: &SqlitePool,
    query: &RecordQuery,
) -> Result<Vec<BackupRecord>> {
    let (sql, values) = build_record_query(query);
    let mut statement = sqlx::query(&sql);
    for value in values {
        statement = statement.bind(value);
    }

    statement
        .fetch_all(pool)
        .await
        .map_err(|e| Error::database_error(format!("Failed to query backup records: {e}")))?
        .iter()
        .map(parse_record_row)
        .collect()
}

/// Query a record by id
pub(crate) async fn query_record_by_id(
    pool: &SqlitePool,
    id: &RecordId,
) -> Result<Option<BackupRecord>> {
    sqlx::query(&format!(
        "SELECT {RECORD_COLUMNS} FROM backup_records WHERE id = ?"
    ))
    .bind(id.as_str())
    .fetch_optional(pool)
    .await
    .map_err(|e| Error::database_error(format!("Failed to query record {id}: {e}")))
    .and_then(|opt_row| opt_row.map_or(Ok(None), |row| parse_record_row(&row).map(Some)))
}

/// Query a record by its idempotency token
pub(crate) async fn query_record_by_token(
    pool: &SqlitePool,
    database: &DatabaseName,
    token: &str,
) -> Result<Option<BackupRecord>> {
    sqlx::query(&format!(
        "SELECT {RECORD_COLUMNS} FROM backup_records WHERE database_name = ? AND idempotency_token = ?"
    ))
    .bind(database.as_str())
    .bind(token)
    .fetch_optional(pool)
    .await
    .map_err(|e| Error::database_error(format!("Failed to query token '{token}': {e}")))
    .and_then(|opt_row| opt_row.map_or(Ok(None), |row| parse_record_row(&row).map(Some)))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_timestamps_sort_as_text() {
        let early = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let late = early + chrono::Duration::microseconds(1);
        assert!(format_timestamp(early) < format_timestamp(late));
        assert_eq!(
            parse_timestamp(&format_timestamp(late), "t").unwrap(),
            late
        );
    }

    #[test]
    fn test_empty_query_selects_everything_chronologically() {
        let (sql, values) = build_record_query(&RecordQuery::default());
        assert!(!sql.contains("WHERE"));
        assert!(sql.ends_with("ORDER BY started_at ASC, id ASC"));
        assert!(values.is_empty());
    }

    #[test]
    fn test_query_binds_in_clause_order() {
        let db = DatabaseName::parse("sales").unwrap();
        let query = RecordQuery::for_database(&db)
            .of_type(BackupType::Log)
            .with_statuses(&[BackupStatus::Succeeded, BackupStatus::Verified])
            .first_lsn_after(Lsn::new(200))
            .ordered(RecordOrder::LsnAscending);

        let (sql, values) = build_record_query(&query);
        assert!(sql.contains(
            "WHERE database_name = ? AND backup_type = ? AND status IN (?, ?) AND first_lsn > ?"
        ));
        assert!(sql.contains("ORDER BY first_lsn ASC"));
        assert_eq!(
            values,
            vec![
                "sales".to_string(),
                "LOG".to_string(),
                "SUCCEEDED".to_string(),
                "VERIFIED".to_string(),
                Lsn::new(200).to_sortable(),
            ]
        );
    }

    #[test]
    fn test_limit_is_appended() {
        let (sql, _) = build_record_query(
            &RecordQuery::default()
                .ordered(RecordOrder::NewestFirst)
                .limit(1),
        );
        assert!(sql.ends_with("ORDER BY finished_at DESC, last_lsn DESC LIMIT 1"));
    }
}
