//! `backchain backup <db> <type>`

use std::str::FromStr;

use anyhow::Result;
use backchain_core::{BackupStatus, BackupType, Error};
use clap::ArgMatches;

use super::{database, json_flag};
use crate::{
    cli::output::{print_json, record_line},
    context::Backchain,
    executor::BackupOptions,
};

pub async fn handle_backup(app: &Backchain, sub_m: &ArgMatches) -> Result<()> {
    let database = database(sub_m)?;
    let kind = sub_m
        .get_one::<String>("type")
        .map(String::as_str)
        .unwrap_or_default();
    let backup_type = BackupType::from_str(kind).map_err(|_| {
        Error::invalid_argument(format!(
            "Unknown backup type '{kind}'. Expected full, diff or log"
        ))
    })?;

    let options = BackupOptions {
        copy_only: sub_m.get_flag("copy-only"),
        compression: sub_m.get_flag("compress") || app.config.engine.compression,
        idempotency_token: sub_m.get_one::<String>("token").cloned(),
        destination: sub_m.get_one::<String>("destination").cloned(),
    };

    let record = app
        .executor
        .execute(&database, backup_type, &options)
        .await?;

    if json_flag(sub_m) {
        print_json(&record)?;
    } else {
        println!("{}", record_line(&record));
    }

    if record.status == BackupStatus::VerificationFailed {
        return Err(Error::storage(
            false,
            format!(
                "Backup {} was written but failed checksum verification: {}",
                record.id,
                record.error_detail.as_deref().unwrap_or("no detail")
            ),
        )
        .into());
    }
    Ok(())
}
