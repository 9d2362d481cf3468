//! `backchain verify <db> [--full] [--id <record>]`

use anyhow::Result;
use backchain_core::{Error, RecordId};
use clap::ArgMatches;

use super::{database, json_flag};
use crate::{
    cli::output::{print_json, verification_line},
    context::Backchain,
    verify::VerificationMode,
};

pub async fn handle_verify(app: &Backchain, sub_m: &ArgMatches) -> Result<()> {
    let database = database(sub_m)?;
    let mode = if sub_m.get_flag("full") {
        VerificationMode::FullRestore
    } else {
        VerificationMode::Checksum
    };

    let reports = match sub_m.get_one::<String>("id") {
        Some(id) => {
            let record = app
                .catalog
                .get(&RecordId::new(id.trim()))
                .await?
                .ok_or_else(|| Error::not_found(format!("Backup record {id} not found")))?;
            if record.database_name != database {
                return Err(Error::invalid_argument(format!(
                    "Backup {id} belongs to '{}', not '{database}'",
                    record.database_name
                ))
                .into());
            }
            vec![app.verifier.verify(&record, mode).await?]
        }
        None => app.verifier.verify_latest(&database, mode).await?,
    };

    if json_flag(sub_m) {
        print_json(&reports)?;
    } else {
        for report in &reports {
            println!("{}", verification_line(report));
        }
    }

    let failed = reports.iter().filter(|r| !r.result.passed()).count();
    if failed > 0 {
        return Err(Error::storage(
            false,
            format!("{failed} of {} backups failed verification", reports.len()),
        )
        .into());
    }
    Ok(())
}
