//! T-SQL rendering for typed engine commands.
//!
//! Every identifier goes through [`quote_ident`] and every path or name used
//! as a value goes through [`quote_literal`]; nothing else is interpolated.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{
    command::{BackupCommand, RestoreCommand, RestoreMode},
    record::{BackupType, DatabaseName},
};

/// Quote an identifier: `[name]` with `]` doubled.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Quote a Unicode string literal: `N'text'` with `'` doubled.
#[must_use]
pub fn quote_literal(text: &str) -> String {
    format!("N'{}'", text.replace('\'', "''"))
}

fn quote_path(path: &Path) -> String {
    quote_literal(&path.to_string_lossy())
}

/// `STOPAT` timestamp literal.
///
/// TODO: convert to the server's local time zone (from `sys.time_zone_info`)
/// instead of assuming the instance clock runs in UTC.
fn stopat_literal(at: DateTime<Utc>) -> String {
    quote_literal(
        &at.to_rfc3339_opts(SecondsFormat::Millis, true)
            .trim_end_matches('Z')
            .to_string(),
    )
}

/// Render a backup command.
#[must_use]
pub fn render_backup(command: &BackupCommand) -> String {
    let verb = match command.backup_type {
        BackupType::Full | BackupType::Differential => "DATABASE",
        BackupType::Log => "LOG",
    };

    let mut options = vec!["CHECKSUM", "INIT", "FORMAT"];
    if command.backup_type == BackupType::Differential {
        options.push("DIFFERENTIAL");
    }
    if command.copy_only {
        options.push("COPY_ONLY");
    }
    if command.compression {
        options.push("COMPRESSION");
    }

    format!(
        "BACKUP {verb} {} TO DISK = {} WITH {};",
        quote_ident(command.database.as_str()),
        quote_path(&command.target),
        options.join(", ")
    )
}

/// Render one restore step.
#[must_use]
pub fn render_restore(command: &RestoreCommand) -> String {
    let verb = match command.backup_type {
        BackupType::Full | BackupType::Differential => "DATABASE",
        BackupType::Log => "LOG",
    };

    let mut options = vec!["CHECKSUM".to_string()];
    match command.mode {
        RestoreMode::NoRecovery => options.push("NORECOVERY".to_string()),
        RestoreMode::Recovery => options.push("RECOVERY".to_string()),
        RestoreMode::RecoveryStopAt(at) => {
            options.push("RECOVERY".to_string());
            options.push(format!("STOPAT = {}", stopat_literal(at)));
        }
    }
    options.extend(command.relocations.iter().map(|mv| {
        format!(
            "MOVE {} TO {}",
            quote_literal(&mv.logical_name),
            quote_path(&mv.physical_path)
        )
    }));
    if command.replace {
        options.push("REPLACE".to_string());
    }

    format!(
        "RESTORE {verb} {} FROM DISK = {} WITH {};",
        quote_ident(command.database.as_str()),
        quote_path(&command.source),
        options.join(", ")
    )
}

/// LSN metadata and size of the backup most recently written to `target`.
///
/// Columns: `first_lsn|last_lsn|checkpoint_lsn|database_backup_lsn|backup_size`.
#[must_use]
pub fn backupset_metadata(database: &DatabaseName, target: &Path) -> String {
    format!(
        "SET NOCOUNT ON; \
         SELECT TOP (1) CONVERT(varchar(40), bs.first_lsn), CONVERT(varchar(40), bs.last_lsn), \
         CONVERT(varchar(40), bs.checkpoint_lsn), CONVERT(varchar(40), bs.database_backup_lsn), \
         CONVERT(varchar(40), bs.backup_size) \
         FROM msdb.dbo.backupset AS bs \
         JOIN msdb.dbo.backupmediafamily AS mf ON mf.media_set_id = bs.media_set_id \
         WHERE bs.database_name = {} AND mf.physical_device_name = {} \
         ORDER BY bs.backup_finish_date DESC;",
        quote_literal(database.as_str()),
        quote_path(target)
    )
}

/// Recovery model of a database (empty result when it does not exist).
#[must_use]
pub fn recovery_model(database: &DatabaseName) -> String {
    format!(
        "SET NOCOUNT ON; SELECT recovery_model_desc FROM sys.databases WHERE name = {};",
        quote_literal(database.as_str())
    )
}

/// Read and checksum an artifact without restoring it.
#[must_use]
pub fn verify_only(source: &Path) -> String {
    format!(
        "RESTORE VERIFYONLY FROM DISK = {} WITH CHECKSUM;",
        quote_path(source)
    )
}

/// Logical files contained in an artifact.
#[must_use]
pub fn file_list(source: &Path) -> String {
    format!("RESTORE FILELISTONLY FROM DISK = {};", quote_path(source))
}

/// Consistency check, printing only errors.
#[must_use]
pub fn check_consistency(database: &DatabaseName) -> String {
    format!(
        "DBCC CHECKDB ({}) WITH NO_INFOMSGS, ALL_ERRORMSGS;",
        quote_ident(database.as_str())
    )
}

/// Drop a database, kicking out sessions first when it is online.
#[must_use]
pub fn drop_database(database: &DatabaseName) -> String {
    let ident = quote_ident(database.as_str());
    format!(
        "IF DATABASEPROPERTYEX({name}, 'Status') = 'ONLINE' \
         ALTER DATABASE {ident} SET SINGLE_USER WITH ROLLBACK IMMEDIATE; \
         DROP DATABASE {ident};",
        name = quote_literal(database.as_str())
    )
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::command::FileMove;

    fn db(name: &str) -> DatabaseName {
        DatabaseName::parse(name).unwrap()
    }

    #[test]
    fn test_quote_ident_doubles_closing_bracket() {
        assert_eq!(quote_ident("sales"), "[sales]");
        assert_eq!(quote_ident("we]ird"), "[we]]ird]");
    }

    #[test]
    fn test_quote_literal_doubles_quote() {
        assert_eq!(quote_literal("O'Brien"), "N'O''Brien'");
    }

    #[test]
    fn test_render_full_backup() {
        let cmd = BackupCommand::new(db("sales"), BackupType::Full, "/stage/a.bak");
        assert_eq!(
            render_backup(&cmd),
            "BACKUP DATABASE [sales] TO DISK = N'/stage/a.bak' WITH CHECKSUM, INIT, FORMAT;"
        );
    }

    #[test]
    fn test_render_differential_copy_only_compressed() {
        let cmd = BackupCommand::new(db("sales"), BackupType::Differential, "/stage/d.bak")
            .with_copy_only(true)
            .with_compression(true);
        let sql = render_backup(&cmd);
        assert!(sql.starts_with("BACKUP DATABASE [sales]"));
        assert!(sql.contains("DIFFERENTIAL, COPY_ONLY, COMPRESSION"));
    }

    #[test]
    fn test_render_log_backup() {
        let cmd = BackupCommand::new(db("sales"), BackupType::Log, "/stage/l.trn");
        assert!(render_backup(&cmd).starts_with("BACKUP LOG [sales] TO DISK"));
    }

    #[test]
    fn test_render_restore_norecovery_with_moves() {
        let cmd = RestoreCommand::new(
            db("sales_copy"),
            BackupType::Full,
            "/b/full.bak",
            RestoreMode::NoRecovery,
        )
        .with_relocations(vec![FileMove::parse("sales=/data/sales_copy.mdf").unwrap()])
        .with_replace(true);
        assert_eq!(
            render_restore(&cmd),
            "RESTORE DATABASE [sales_copy] FROM DISK = N'/b/full.bak' WITH CHECKSUM, NORECOVERY, \
             MOVE N'sales' TO N'/data/sales_copy.mdf', REPLACE;"
        );
    }

    #[test]
    fn test_render_restore_log_stopat() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 1, 30, 0).unwrap();
        let cmd = RestoreCommand::new(
            db("sales"),
            BackupType::Log,
            "/b/log.trn",
            RestoreMode::RecoveryStopAt(at),
        );
        assert_eq!(
            render_restore(&cmd),
            "RESTORE LOG [sales] FROM DISK = N'/b/log.trn' WITH CHECKSUM, RECOVERY, \
             STOPAT = N'2024-03-01T01:30:00.000';"
        );
    }

    #[test]
    fn test_injection_attempt_stays_quoted() {
        let name = db("x]; DROP DATABASE prod; --");
        let sql = check_consistency(&name);
        assert_eq!(sql, "DBCC CHECKDB ([x]]; DROP DATABASE prod; --]) WITH NO_INFOMSGS, ALL_ERRORMSGS;");
    }

    #[test]
    fn test_drop_database_guards_single_user() {
        let sql = drop_database(&db("scratch"));
        assert!(sql.contains("DATABASEPROPERTYEX(N'scratch', 'Status')"));
        assert!(sql.ends_with("DROP DATABASE [scratch];"));
    }
}
