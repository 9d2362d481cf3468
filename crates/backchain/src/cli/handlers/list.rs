//! `backchain list <db>`

use std::str::FromStr;

use anyhow::Result;
use backchain_core::{BackupStatus, BackupType, Error};
use clap::ArgMatches;

use super::{database, json_flag};
use crate::{
    catalog::{RecordOrder, RecordQuery},
    cli::{
        output::{print_json, record_table},
        parse_timestamp,
    },
    context::Backchain,
};

pub async fn handle_list(app: &Backchain, sub_m: &ArgMatches) -> Result<()> {
    let mut query = RecordQuery::for_database(&database(sub_m)?).ordered(RecordOrder::Chronological);

    if let Some(kind) = sub_m.get_one::<String>("type") {
        let backup_type = BackupType::from_str(kind)
            .map_err(|_| Error::invalid_argument(format!("Unknown backup type '{kind}'")))?;
        query = query.of_type(backup_type);
    }

    let statuses = sub_m
        .get_many::<String>("status")
        .into_iter()
        .flatten()
        .map(|s| {
            BackupStatus::from_str(s)
                .map_err(|_| Error::invalid_argument(format!("Unknown backup status '{s}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if !statuses.is_empty() {
        query = query.with_statuses(&statuses);
    }

    let after = sub_m
        .get_one::<String>("after")
        .map(|t| parse_timestamp(t))
        .transpose()?;
    let before = sub_m
        .get_one::<String>("before")
        .map(|t| parse_timestamp(t))
        .transpose()?;
    if after.is_some() || before.is_some() {
        query = query.finished_between(after, before);
    }
    if let Some(limit) = sub_m.get_one::<u32>("limit") {
        query = query.limit(*limit);
    }

    let records = app.catalog.query(&query).await?;
    if json_flag(sub_m) {
        print_json(&records)?;
    } else {
        println!("{}", record_table(&records));
    }
    Ok(())
}
