//! Command handlers that bridge `clap` and the components
//!
//! - `backup`: take a backup
//! - `restore`: restore, and preview a chain
//! - `verify`: checksum or full-restore verification
//! - `jobs`: restore job status and cancellation
//! - `list`: catalog listing

use std::path::PathBuf;

use anyhow::Result;
use backchain_core::{config::load_config, DatabaseName, Error};
use clap::{error::ErrorKind, ArgMatches};

use crate::{cli::build_cli, context::Backchain};

pub mod backup;
pub mod jobs;
pub mod list;
pub mod restore;
pub mod verify;

/// Parse arguments, load configuration, and run the selected command.
pub async fn run_cli() -> Result<()> {
    let matches = match build_cli().try_get_matches() {
        Ok(matches) => matches,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.print()?;
            return Ok(());
        }
        // Usage errors are input errors (exit 1), not clap's default 2
        Err(e) => return Err(Error::invalid_argument(e.render().to_string().trim_end()).into()),
    };

    let config = load_config(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;
    let app = Backchain::open(config).await?;
    dispatch(&app, &matches).await
}

pub async fn dispatch(app: &Backchain, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("backup", sub_m)) => backup::handle_backup(app, sub_m).await,
        Some(("restore", sub_m)) => restore::handle_restore(app, sub_m).await,
        Some(("chain", sub_m)) => restore::handle_chain(app, sub_m).await,
        Some(("verify", sub_m)) => verify::handle_verify(app, sub_m).await,
        Some(("status", sub_m)) => jobs::handle_status(app, sub_m).await,
        Some(("cancel", sub_m)) => jobs::handle_cancel(app, sub_m).await,
        Some(("list", sub_m)) => list::handle_list(app, sub_m).await,
        _ => anyhow::bail!("Unknown command. Run 'backchain --help' for usage."),
    }
}

fn json_flag(sub_m: &ArgMatches) -> bool {
    sub_m.get_flag("json")
}

fn database(sub_m: &ArgMatches) -> Result<DatabaseName, Error> {
    let name = sub_m
        .get_one::<String>("database")
        .ok_or_else(|| Error::invalid_argument("A database name is required"))?;
    DatabaseName::parse(name.as_str())
}
