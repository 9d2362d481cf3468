//! `backchain status [job]` and `backchain cancel <job>`

use anyhow::Result;
use backchain_core::{Error, JobId};
use clap::ArgMatches;

use super::json_flag;
use crate::{
    cli::output::{job_table, job_text, print_json, JobView},
    context::Backchain,
};

fn job_id(sub_m: &ArgMatches) -> Result<Option<JobId>, Error> {
    sub_m
        .get_one::<String>("job")
        .map(|id| JobId::parse(id))
        .transpose()
}

pub async fn handle_status(app: &Backchain, sub_m: &ArgMatches) -> Result<()> {
    let json = json_flag(sub_m);

    if let Some(id) = job_id(sub_m)? {
        let job = app.orchestrator.status(&id).await?;
        if json {
            print_json(&JobView::of(&job))?;
        } else {
            println!("{}", job_text(&job));
        }
        return Ok(());
    }

    let jobs = app.catalog.list_jobs(None).await?;
    if json {
        print_json(&jobs.iter().map(JobView::of).collect::<Vec<_>>())?;
    } else {
        println!("{}", job_table(&jobs));
    }
    Ok(())
}

pub async fn handle_cancel(app: &Backchain, sub_m: &ArgMatches) -> Result<()> {
    let id = job_id(sub_m)?.ok_or_else(|| Error::invalid_argument("A job id is required"))?;
    let job = app.orchestrator.cancel(&id).await?;

    if json_flag(sub_m) {
        print_json(&JobView::of(&job))?;
    } else {
        println!(
            "Cancellation requested for job {id} ({}, step {}/{}); the running step finishes first",
            job.state,
            job.current_step_index + 1,
            job.total_steps()
        );
    }
    Ok(())
}
