use anyhow::{Context, Result};
use scholarship_ingest::{
    config::Config,
    daemon::{self, build_manager, PipelineMetrics},
    store::Store,
    types::{JobRequest, JobType, Priority},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Upper bound on how long a foreground run waits, retries included
const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Run one job against `url` with a single worker and print the final job
pub async fn run_once(
    config: Config,
    url: String,
    name: Option<String>,
    force_update: bool,
    incremental: bool,
) -> Result<()> {
    if let Some(pid) = daemon::get_daemon_pid(&config.storage.data_dir) {
        anyhow::bail!(
            "Daemon (PID {}) owns {}; submit the job over the HTTP API instead",
            pid,
            config.storage.data_dir.display()
        );
    }
    let store = Arc::new(Store::open(&config.storage.data_dir).context("Failed to open job store")?);
    let mut config = config;
    config.scheduler.workers = 1;
    let manager = build_manager(&config, store.clone(), PipelineMetrics::shared())?;

    let job_id = manager.enqueue(JobRequest {
        source_url: url,
        source_name: name,
        job_type: if incremental { JobType::Incremental } else { JobType::Full },
        priority: Priority::Urgent,
        force_update,
    })?;
    info!("Running scrape job {}", job_id);
    let workers = manager.start_workers();

    let job = tokio::select! {
        job = manager.wait_for(&job_id, MAX_WAIT) => job?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling job {}", job_id);
            manager.cancel(&job_id, Some("interrupted".to_string()))?
        }
    };
    manager.shutdown();
    for handle in workers {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    store.flush_blocking().await.context("Failed to write the store to disk")?;

    println!("{}", serde_json::to_string_pretty(&job)?);
    if !job.counters_consistent() {
        warn!("Job {} counters are inconsistent", job.id);
    }
    Ok(())
}
