//! `backchain restore` and `backchain chain`

use anyhow::Result;
use backchain_core::{DatabaseName, FileMove, RestoreTarget};
use clap::ArgMatches;
use tracing::warn;

use super::{database, json_flag};
use crate::{
    cli::{
        output::{chain_text, coverage_warning, job_text, print_json, ChainView, JobView},
        parse_timestamp,
    },
    context::Backchain,
    restore::RestoreRequest,
};

fn target(sub_m: &ArgMatches) -> Result<RestoreTarget> {
    Ok(match sub_m.get_one::<String>("at") {
        Some(at) => RestoreTarget::PointInTime(parse_timestamp(at)?),
        None => RestoreTarget::Latest,
    })
}

pub async fn handle_chain(app: &Backchain, sub_m: &ArgMatches) -> Result<()> {
    let database = database(sub_m)?;
    let chain = app.resolver.resolve(&database, target(sub_m)?).await?;

    if json_flag(sub_m) {
        print_json(&ChainView::of(&chain))?;
    } else {
        if let Some(warning) = coverage_warning(&chain) {
            eprintln!("{warning}");
        }
        println!("{}", chain_text(&chain));
    }
    Ok(())
}

pub async fn handle_restore(app: &Backchain, sub_m: &ArgMatches) -> Result<()> {
    let json = json_flag(sub_m);
    let database = database(sub_m)?;
    let target = target(sub_m)?;
    let target_database = match sub_m.get_one::<String>("target") {
        Some(name) => DatabaseName::parse(name.as_str())?,
        None => database.clone(),
    };
    let relocations = sub_m
        .get_many::<String>("move")
        .into_iter()
        .flatten()
        .map(|text| FileMove::parse(text))
        .collect::<Result<Vec<_>, _>>()?;

    let chain = app.resolver.resolve(&database, target).await?;
    if !json {
        if let Some(warning) = coverage_warning(&chain) {
            eprintln!("{warning}");
        }
    }

    if sub_m.get_flag("dry-run") {
        if json {
            print_json(&ChainView::of(&chain))?;
        } else {
            println!("{}", chain_text(&chain));
            println!("Dry run: nothing was restored");
        }
        return Ok(());
    }

    let request = RestoreRequest::new(target_database)
        .with_relocations(relocations)
        .with_replace(sub_m.get_flag("replace"));
    let handle = app.orchestrator.start(chain, request).await?;
    let job_id = handle.job_id().clone();
    if !json {
        eprintln!("Restore job {job_id} started; Ctrl-C stops it before the next step");
    }

    let wait = handle.wait();
    tokio::pin!(wait);
    let finished = loop {
        tokio::select! {
            result = &mut wait => break result,
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Could not listen for Ctrl-C");
                    break (&mut wait).await;
                }
                match app.orchestrator.cancel(&job_id).await {
                    Ok(_) => eprintln!("Cancellation requested; the running step will finish first"),
                    Err(e) => warn!(job = %job_id, error = %e, "Could not request cancellation"),
                }
            }
        }
    };

    let job = finished?;
    if json {
        print_json(&JobView::of(&job))?;
    } else {
        println!("{}", job_text(&job));
    }
    Ok(())
}
