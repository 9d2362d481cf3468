//! `sqlcmd`-backed engine.

use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use async_trait::async_trait;
use backchain_core::{
    config::EngineConfig, tsql, ArtifactFile, BackupArtifact, BackupCommand, BackupLsns,
    ConsistencyReport, DatabaseEngine, DatabaseName, Error, Lsn, RecoveryModel, RestoreCommand,
    Result,
};
use tokio::process::Command;
use tracing::{debug, instrument};

use super::is_transient_message;

/// Column separator passed to `sqlcmd -s`.
const SEPARATOR: char = '|';

/// A failed `sqlcmd` invocation.
#[derive(Debug)]
struct Failure {
    message: String,
    transient: bool,
}

impl Failure {
    fn into_error(self) -> Error {
        if self.transient {
            Error::engine_transient(self.message)
        } else {
            Error::engine_logical(self.message)
        }
    }
}

/// Runs T-SQL through the `sqlcmd` command-line client.
#[derive(Debug, Clone)]
pub struct SqlcmdEngine {
    config: EngineConfig,
}

impl SqlcmdEngine {
    #[must_use]
    pub const fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Arguments for one batch. Errors go to stderr (`-r 1`) and abort with a
    /// non-zero exit (`-b`); rows come back headerless and `|`-separated.
    fn args(&self, sql: &str) -> Vec<String> {
        let mut args = vec![
            "-S".to_string(),
            self.config.server.clone(),
            "-b".to_string(),
            "-r".to_string(),
            "1".to_string(),
            "-h".to_string(),
            "-1".to_string(),
            "-W".to_string(),
            "-s".to_string(),
            SEPARATOR.to_string(),
            "-l".to_string(),
            self.config.login_timeout_secs.to_string(),
        ];
        if self.config.trusted_connection {
            args.push("-E".to_string());
        }
        args.push("-Q".to_string());
        args.push(sql.to_string());
        args
    }

    async fn run(&self, sql: &str) -> std::result::Result<String, Failure> {
        debug!(server = %self.config.server, sql, "Running sqlcmd batch");

        let output = Command::new(&self.config.sqlcmd_path)
            .args(self.args(sql))
            .output()
            .await
            .map_err(|e| Failure {
                message: format!(
                    "Failed to execute '{}': {e}\n\nIs the SQL Server command-line client installed? \
                     Set engine.sqlcmd_path or BACKCHAIN_SQLCMD_PATH.",
                    self.config.sqlcmd_path
                ),
                transient: false,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = [stderr.trim(), stdout.trim()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let message = if message.is_empty() {
            format!(
                "sqlcmd exited with code {}",
                output.status.code().unwrap_or(-1)
            )
        } else {
            message
        };

        Err(Failure {
            transient: is_transient_message(&message),
            message,
        })
    }

    async fn execute(&self, sql: &str) -> Result<String> {
        self.run(sql).await.map_err(Failure::into_error)
    }
}

/// Split `sqlcmd` output into trimmed, non-empty rows of columns.
fn rows(output: &str) -> Vec<Vec<String>> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.split(SEPARATOR)
                .map(|column| column.trim().to_string())
                .collect()
        })
        .collect()
}

fn column<'a>(row: &'a [String], index: usize, what: &str) -> Result<&'a str> {
    row.get(index)
        .map(String::as_str)
        .ok_or_else(|| Error::engine_logical(format!("Missing {what} in engine output")))
}

/// Parse `first|last|checkpoint|database_backup|size` from backupset metadata.
fn parse_backupset(output: &str) -> Result<(BackupLsns, u64)> {
    let all = rows(output);
    let row = all
        .first()
        .ok_or_else(|| Error::engine_logical("Backup finished but msdb has no backupset row for it"))?;

    let lsn = |index: usize, what: &str| -> Result<Lsn> {
        let text = column(row, index, what)?;
        // NULL database_backup_lsn for the very first full backup
        if text.eq_ignore_ascii_case("null") {
            return Ok(Lsn::new(0));
        }
        Lsn::parse(text)
            .map_err(|e| Error::engine_logical(format!("Unreadable {what} from engine: {e}")))
    };

    let lsns = BackupLsns {
        first: lsn(0, "first_lsn")?,
        last: lsn(1, "last_lsn")?,
        checkpoint: lsn(2, "checkpoint_lsn")?,
        database_backup: lsn(3, "database_backup_lsn")?,
    };
    let size = column(row, 4, "backup_size")?
        .split('.')
        .next()
        .and_then(|whole| whole.parse::<u64>().ok())
        .unwrap_or(0);
    Ok((lsns, size))
}

#[async_trait]
impl DatabaseEngine for SqlcmdEngine {
    async fn recovery_model(&self, database: &DatabaseName) -> Result<RecoveryModel> {
        let output = self.execute(&tsql::recovery_model(database)).await?;
        let all = rows(&output);
        let model = all
            .first()
            .and_then(|row| row.first())
            .ok_or_else(|| Error::invalid_argument(format!("Database '{database}' does not exist")))?;
        RecoveryModel::from_str(model)
            .map_err(|e| Error::engine_logical(format!("Unknown recovery model '{model}': {e}")))
    }

    #[instrument(skip(self, command), fields(database = %command.database, backup_type = %command.backup_type))]
    async fn backup(&self, command: &BackupCommand) -> Result<BackupArtifact> {
        self.execute(&tsql::render_backup(command)).await?;
        let metadata = self
            .execute(&tsql::backupset_metadata(&command.database, &command.target))
            .await?;
        let (lsns, reported_size) = parse_backupset(&metadata)?;

        let size_bytes = tokio::fs::metadata(&command.target)
            .await
            .map(|m| m.len())
            .unwrap_or(reported_size);

        Ok(BackupArtifact {
            path: command.target.clone(),
            lsns,
            size_bytes,
        })
    }

    #[instrument(skip(self, command), fields(database = %command.database, source = %command.source.display()))]
    async fn restore(&self, command: &RestoreCommand) -> Result<()> {
        self.execute(&tsql::render_restore(command)).await.map(|_| ())
    }

    async fn verify_artifact(&self, path: &Path) -> Result<bool> {
        match self.run(&tsql::verify_only(path)).await {
            Ok(_) => Ok(true),
            Err(failure) if failure.transient => Err(failure.into_error()),
            Err(failure) => {
                debug!(path = %path.display(), message = %failure.message, "Artifact failed VERIFYONLY");
                Ok(false)
            }
        }
    }

    async fn list_files(&self, path: &Path) -> Result<Vec<ArtifactFile>> {
        let output = self.execute(&tsql::file_list(path)).await?;
        rows(&output)
            .iter()
            .map(|row| {
                Ok(ArtifactFile {
                    logical_name: column(row, 0, "LogicalName")?.to_string(),
                    physical_name: column(row, 1, "PhysicalName")?.to_string(),
                    file_type: column(row, 2, "Type")?.to_string(),
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn check_consistency(&self, database: &DatabaseName) -> Result<ConsistencyReport> {
        match self.run(&tsql::check_consistency(database)).await {
            Ok(_) => Ok(ConsistencyReport::clean()),
            Err(failure) if !failure.transient && failure.message.contains("CHECKDB found") => {
                Ok(ConsistencyReport::corrupt(
                    failure
                        .message
                        .lines()
                        .map(str::trim)
                        .filter(|line| !line.is_empty())
                        .map(ToString::to_string)
                        .collect(),
                ))
            }
            Err(failure) => Err(failure.into_error()),
        }
    }

    async fn drop_database(&self, database: &DatabaseName) -> Result<()> {
        self.execute(&tsql::drop_database(database)).await.map(|_| ())
    }
}

/// Physical path for a relocated file: `<dir>/<database>_<logical>.<mdf|ldf|ndf>`.
#[must_use]
pub fn relocation_path(dir: &Path, database: &DatabaseName, file: &ArtifactFile) -> PathBuf {
    let extension = match file.file_type.as_str() {
        "L" => "ldf",
        "D" => "mdf",
        _ => "ndf",
    };
    let logical: String = file
        .logical_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    dir.join(format!("{database}_{logical}.{extension}"))
}
