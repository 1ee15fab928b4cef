use anyhow::Result;
use scholarship_ingest::{
    config::Config,
    daemon::{self, Daemon},
};
use tracing::info;

/// Run the daemon in the foreground until Ctrl+C or SIGTERM
pub async fn serve(mut config: Config, listen: Option<String>, workers: Option<usize>) -> Result<()> {
    if let Some(addr) = listen {
        config.http.listen_addr = addr;
    }
    if let Some(workers) = workers {
        config.scheduler.workers = workers;
    }
    config.validate()?;

    if let Some(pid) = daemon::get_daemon_pid(&config.storage.data_dir) {
        anyhow::bail!(
            "Daemon is already running (PID {}) for {}",
            pid,
            config.storage.data_dir.display()
        );
    }

    info!(
        "Serving with {} workers, data in {}",
        config.scheduler.workers,
        config.storage.data_dir.display()
    );
    let daemon = Daemon::start(config).await?;
    daemon.run().await
}
