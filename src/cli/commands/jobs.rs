//! Jobs command - list an owner's jobs from the store.

use crate::cli::Output;
use crate::config::Settings;
use crate::store::{JobStore, SqliteJobStore};

/// Print all jobs recorded for an owner, newest first.
pub async fn run_jobs(owner: &str, settings: Settings) -> anyhow::Result<()> {
    let store = SqliteJobStore::new(&settings.sqlite_path())?;
    let jobs = store.list_jobs(owner).await?;

    if jobs.is_empty() {
        Output::info(&format!("No jobs recorded for '{}'.", owner));
        return Ok(());
    }

    Output::header(&format!("Jobs for {}", owner));
    println!();
    for job in &jobs {
        Output::job_line(
            &job.id.to_string(),
            &job.kind.to_string(),
            &job.status.to_string(),
            job.progress,
            job.display_name.as_deref(),
        );
        if let Some(error) = &job.error {
            println!("      {}", console::style(error).red().dim());
        }
    }
    println!();
    Output::info(&format!("{} job(s) total.", jobs.len()));
    Ok(())
}
