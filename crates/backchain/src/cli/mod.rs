//! Operator command line.
//!
//! Exit codes: 0 success, 1 invalid input, 2 no restore chain,
//! 3 engine or storage failure, 4 partial restore.

pub mod handlers;
pub mod output;

use std::path::PathBuf;

use backchain_core::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::{Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    Command::new("backchain")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Backup-chain orchestration and point-in-time restore for SQL Server")
        .subcommand_required(true)
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Output as JSON"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf))
                .help("Config file layered over the global and project files"),
        )
        .after_help(
            "EXIT CODES:\n  \
             0  success\n  \
             1  invalid input\n  \
             2  no restore chain (no full backup, or a gap in the log chain)\n  \
             3  engine, storage or catalog failure\n  \
             4  partial restore: the target database needs manual attention",
        )
        .subcommand(cmd_backup())
        .subcommand(cmd_restore())
        .subcommand(cmd_verify())
        .subcommand(cmd_status())
        .subcommand(cmd_cancel())
        .subcommand(cmd_chain())
        .subcommand(cmd_list())
}

fn database_arg() -> Arg {
    Arg::new("database").required(true).help("Database name")
}

fn at_arg() -> Arg {
    Arg::new("at")
        .long("at")
        .value_name("TIMESTAMP")
        .help("Point in time (RFC 3339, or 'YYYY-MM-DD HH:MM:SS' in UTC)")
}

fn cmd_backup() -> Command {
    Command::new("backup")
        .about("Take a backup and catalog it")
        .arg(database_arg())
        .arg(
            Arg::new("type")
                .required(true)
                .help("full, diff (differential) or log"),
        )
        .arg(
            Arg::new("copy-only")
                .long("copy-only")
                .action(ArgAction::SetTrue)
                .help("Do not disturb the differential base"),
        )
        .arg(
            Arg::new("compress")
                .long("compress")
                .action(ArgAction::SetTrue)
                .help("Compress on the server (default from engine.compression)"),
        )
        .arg(
            Arg::new("token")
                .long("token")
                .value_name("TOKEN")
                .help("Idempotency token; repeating a token returns the cataloged backup"),
        )
        .arg(
            Arg::new("destination")
                .long("destination")
                .value_name("URI")
                .help("Artifact location (default: <backup_root>/<db>/<TYPE>/...)"),
        )
}

fn cmd_restore() -> Command {
    Command::new("restore")
        .about("Restore a database from its backup chain")
        .arg(database_arg())
        .arg(at_arg())
        .arg(
            Arg::new("target")
                .long("target")
                .value_name("NAME")
                .help("Restore under a different database name"),
        )
        .arg(
            Arg::new("move")
                .long("move")
                .value_name("LOGICAL=PATH")
                .action(ArgAction::Append)
                .help("Relocate a database file (repeatable)"),
        )
        .arg(
            Arg::new("replace")
                .long("replace")
                .action(ArgAction::SetTrue)
                .help("Overwrite an existing target database"),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Resolve and print the chain without restoring"),
        )
}

fn cmd_verify() -> Command {
    Command::new("verify")
        .about("Verify the newest backups (or one backup) of a database")
        .arg(database_arg())
        .arg(
            Arg::new("full")
                .long("full")
                .action(ArgAction::SetTrue)
                .help("Restore into a scratch database and run a consistency check"),
        )
        .arg(
            Arg::new("id")
                .long("id")
                .value_name("RECORD")
                .help("Verify this backup record only"),
        )
}

fn cmd_status() -> Command {
    Command::new("status")
        .about("Show a restore job, or all jobs")
        .arg(Arg::new("job").help("Restore job id (lists jobs if omitted)"))
}

fn cmd_cancel() -> Command {
    Command::new("cancel")
        .about("Stop a restore job before its next step")
        .arg(Arg::new("job").required(true).help("Restore job id"))
}

fn cmd_chain() -> Command {
    Command::new("chain")
        .about("Print the restore chain without restoring")
        .arg(database_arg())
        .arg(at_arg())
}

fn cmd_list() -> Command {
    Command::new("list")
        .about("List cataloged backups")
        .arg(database_arg())
        .arg(
            Arg::new("type")
                .long("type")
                .value_name("TYPE")
                .help("Only this backup type"),
        )
        .arg(
            Arg::new("status")
                .long("status")
                .value_name("STATUS")
                .action(ArgAction::Append)
                .help("Only these statuses (repeatable)"),
        )
        .arg(
            Arg::new("after")
                .long("after")
                .value_name("TIMESTAMP")
                .help("Finished at or after"),
        )
        .arg(
            Arg::new("before")
                .long("before")
                .value_name("TIMESTAMP")
                .help("Finished at or before"),
        )
        .arg(
            Arg::new("limit")
                .long("limit")
                .value_parser(clap::value_parser!(u32))
                .help("At most this many rows"),
        )
}

/// Parse a timestamp given on the command line; naive forms are UTC.
///
/// # Errors
///
/// Returns an input error for text in none of the accepted forms.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Ok(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(t.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(t) = date.and_hms_opt(0, 0, 0) {
            return Ok(t.and_utc());
        }
    }
    Err(Error::invalid_argument(format!(
        "Invalid timestamp '{text}'. Expected RFC 3339 (2024-03-01T01:30:00Z) \
         or 'YYYY-MM-DD HH:MM:SS' (UTC)"
    )))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_parse_timestamp_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 1, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-01T01:30:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-03-01T03:30:00+02:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-03-01 01:30:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-03-01 01:30").unwrap(), expected);
        assert_eq!(
            parse_timestamp("2024-03-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        let err = parse_timestamp("yesterday").unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_restore_collects_moves() {
        let matches = build_cli()
            .try_get_matches_from([
                "backchain", "restore", "sales", "--move", "data=/d/s.mdf", "--move",
                "log=/l/s.ldf", "--json",
            ])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "restore");
        assert_eq!(sub.get_many::<String>("move").unwrap().count(), 2);
        assert!(sub.get_flag("json"));
    }
}
