use anyhow::{Context, Result};
use scholarship_ingest::{config::Config, daemon, store::Store};
use uuid::Uuid;

/// Print a persisted job as JSON
pub fn show_status(config: &Config, job_id: &str) -> Result<()> {
    let id = Uuid::parse_str(job_id).with_context(|| format!("Invalid job ID '{}'", job_id))?;
    let store = Store::open(&config.storage.data_dir).context("Failed to open job store")?;
    let job = store
        .jobs
        .get(&id)
        .ok_or_else(|| anyhow::anyhow!("Job {} not found in {}", id, config.storage.data_dir.display()))?;

    println!("{}", serde_json::to_string_pretty(&job)?);
    if job.status.is_terminal() {
        return Ok(());
    }
    if !daemon::is_daemon_running(&config.storage.data_dir) {
        eprintln!("Note: job is {} but no daemon is running for this data directory", job.status);
    }
    Ok(())
}
