//! Daemon start-up, signal handling and shutdown
//!
//! One daemon owns a data directory at a time; the owner's PID is kept in a
//! lock file inside it.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::scraping::{FetchConfig, FetchEngine};
use crate::store::Store;
use crate::validation::HttpLinkChecker;

use super::http::HttpServer;
use super::jobs::{JobManager, Pipeline};
use super::metrics::PipelineMetrics;

const PID_FILE_NAME: &str = "scholarship-ingest.pid";

/// Appended to the lock error where a dead owner cannot be detected
#[cfg(unix)]
const LIVENESS_HINT: &str = "";
#[cfg(not(unix))]
const LIVENESS_HINT: &str = " (owner liveness cannot be checked on this platform; remove the file if no daemon is running)";

/// How long workers get to reach a page boundary on shutdown
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

const HTTP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const FLUSH_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Exclusive claim on a data directory
#[derive(Debug)]
struct PidLock {
    path: PathBuf,
}

impl PidLock {
    /// Claim `path`, replacing it when the recorded process is gone.
    /// Creation is atomic, so two starters cannot both win.
    fn acquire(path: &Path) -> Result<Self> {
        for attempt in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id())
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && attempt == 0 => {
                    if let Some(pid) = read_pid(path).filter(|&pid| process_exists(pid)) {
                        anyhow::bail!(
                            "Daemon is already running (PID {}). Stop it first or remove {}{}",
                            pid,
                            path.display(),
                            LIVENESS_HINT
                        );
                    }
                    warn!("Removing stale lock {}", path.display());
                    std::fs::remove_file(path)
                        .with_context(|| format!("Failed to remove stale lock {}", path.display()))?;
                }
                Err(e) => return Err(e).with_context(|| format!("Failed to create {}", path.display())),
            }
        }
        anyhow::bail!("Could not claim {}", path.display())
    }

    fn release(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}

/// A running ingestion daemon: worker pool, maintenance and admin API
pub struct Daemon {
    config: Config,
    store: Arc<Store>,
    manager: Arc<JobManager>,
    metrics: Arc<PipelineMetrics>,
    shutdown_tx: broadcast::Sender<()>,
    lock: PidLock,
}

impl Daemon {
    /// Claim the data directory, open the store and recover jobs left
    /// behind by a previous process.
    pub async fn start(config: Config) -> Result<Self> {
        let data_dir = config.storage.data_dir.clone();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        let lock = PidLock::acquire(&data_dir.join(PID_FILE_NAME))?;

        let store = Arc::new(Store::open(&data_dir).context("Failed to open job store")?);
        let metrics = PipelineMetrics::shared();
        let manager = build_manager(&config, store.clone(), metrics.clone())?;
        let recovered = manager.recover().context("Failed to recover jobs")?;
        info!(
            "Daemon started on {} ({} jobs recovered)",
            data_dir.display(),
            recovered
        );

        Ok(Self {
            config,
            store,
            manager,
            metrics,
            shutdown_tx: broadcast::channel(16).0,
            lock,
        })
    }

    /// Run until Ctrl+C or SIGTERM, then drain and release the lock
    pub async fn run(&self) -> Result<()> {
        let sampler = self.spawn_memory_sampler();
        let flusher = self.store.start_flusher(
            Duration::from_millis(self.config.storage.flush_interval_ms.max(1)),
            self.shutdown_tx.subscribe(),
        );
        let workers = self.manager.start_workers();
        let maintenance = self.manager.start_maintenance();
        let http = self.config.http.enabled.then(|| self.spawn_http());

        tokio::select! {
            _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
            _ = wait_for_sigterm() => info!("Received SIGTERM, shutting down"),
        }

        let _ = self.shutdown_tx.send(());
        self.manager.shutdown();

        for handle in workers {
            drain("Scrape worker", handle, WORKER_DRAIN_TIMEOUT).await;
        }
        maintenance.abort();
        sampler.abort();
        if let Some(handle) = http {
            drain("Admin API", handle, HTTP_DRAIN_TIMEOUT).await;
        }
        // Workers are gone, so the final flush sees everything they wrote
        drain("Store flusher", flusher, FLUSH_DRAIN_TIMEOUT).await;
        if self.store.is_dirty() {
            self.store.flush_blocking().await.context("Failed to write the store to disk")?;
        }

        self.lock.release()?;
        info!("Daemon stopped");
        Ok(())
    }

    fn spawn_memory_sampler(&self) -> JoinHandle<()> {
        let metrics = self.metrics.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let every = Duration::from_secs(self.config.metrics.system_metrics_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => metrics.update_memory_usage(),
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }

    fn spawn_http(&self) -> JoinHandle<()> {
        let server = HttpServer::new(
            self.config.http.clone(),
            self.manager.clone(),
            self.metrics.clone(),
            self.config.metrics.enabled,
        );
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = server.run(shutdown_rx).await {
                error!("Admin API failed: {:#}", e);
            }
        })
    }
}

/// Wait for `handle` up to `timeout`, aborting it after that
async fn drain(what: &str, handle: JoinHandle<()>, timeout: Duration) {
    let abort = handle.abort_handle();
    if tokio::time::timeout(timeout, handle).await.is_err() {
        warn!("{} did not stop within {:?}, aborting", what, timeout);
        abort.abort();
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}

/// Job manager wired to the live HTTP fetcher and link checker
pub fn build_manager(config: &Config, store: Arc<Store>, metrics: Arc<PipelineMetrics>) -> Result<Arc<JobManager>> {
    let fetcher = FetchEngine::new(FetchConfig::from(&config.scraping)).context("Failed to build HTTP client")?;
    let checker = HttpLinkChecker::new(
        &config.scraping.user_agent,
        Duration::from_secs(config.validation.check_timeout_secs),
    )
    .context("Failed to build link checker")?;
    let pipeline = Pipeline::from_config(
        config,
        Arc::new(fetcher),
        Arc::new(checker),
        store.clone(),
        metrics.clone(),
    )
    .context("Failed to load extraction rules")?;
    let (shutdown_tx, _) = broadcast::channel(16);
    Ok(JobManager::new(
        store,
        Arc::new(pipeline),
        config.scheduler.clone(),
        shutdown_tx,
        metrics,
    ))
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn process_exists(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // kill(pid, 0) sends nothing; it only checks the target. Zero and
        // negative values would address process groups.
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if pid <= 0 {
            return false;
        }
        if unsafe { libc::kill(pid, 0) } == 0 {
            return true;
        }
        // EPERM: alive, owned by another user
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

/// Whether a live daemon owns `data_dir`
pub fn is_daemon_running(data_dir: &Path) -> bool {
    get_daemon_pid(data_dir).is_some()
}

/// PID of the live daemon owning `data_dir`
pub fn get_daemon_pid(data_dir: &Path) -> Option<u32> {
    read_pid(&data_dir.join(PID_FILE_NAME)).filter(|&pid| process_exists(pid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_acquire_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(PID_FILE_NAME);

        let lock = PidLock::acquire(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id()));
        lock.release().unwrap();
        assert!(!path.exists());
        // Releasing twice is harmless
        lock.release().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_live_lock_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(PID_FILE_NAME);
        let _lock = PidLock::acquire(&path).unwrap();
        assert!(PidLock::acquire(&path).is_err());
        assert!(is_daemon_running(dir.path()));
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_lock_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(PID_FILE_NAME);
        // PIDs this large are never handed out
        std::fs::write(&path, "4294967\n").unwrap();
        assert!(!is_daemon_running(dir.path()));

        let _lock = PidLock::acquire(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_liveness() {
        assert!(process_exists(std::process::id()));
        assert!(!process_exists(0));
        // Would be -1 as a pid_t, which addresses every process
        assert!(!process_exists(u32::MAX));
        assert!(!process_exists(4294967));
    }

    #[test]
    fn test_no_daemon_in_empty_dir() {
        let dir = TempDir::new().unwrap();
        assert!(!is_daemon_running(dir.path()));
        assert_eq!(get_daemon_pid(dir.path()), None);
    }
}
