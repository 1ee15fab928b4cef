//! Background Job Management
//!
//! Owns the scraping job lifecycle: enqueue, a fixed worker pool pulling the
//! highest-priority ready job, automatic retry with exponential backoff,
//! cooperative cancellation, crash recovery and retention clean-up. Every
//! status change is written to the job store before it is reported.

mod pipeline;
mod queue;

pub use pipeline::{Pipeline, Revalidation, RunOutcome};
pub use queue::JobQueue;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use super::metrics::PipelineMetrics;
use crate::config::SchedulerConfig;
use crate::store::{JobFilter, Store, StoreError};
use crate::types::{JobId, JobRequest, JobStatus, ScrapingJob};

/// Errors from job operations
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("invalid job request: {0}")]
    InvalidRequest(String),
    #[error("job {id} is {status}; cannot {action}")]
    InvalidTransition {
        id: JobId,
        status: JobStatus,
        action: &'static str,
    },
    #[error("source unreachable after {attempted} page attempts: {last_error}")]
    SourceUnreachable { attempted: usize, last_error: String },
    #[error("job {0} is still stopping; retry once its attempt has ended")]
    StillStopping(JobId),
    #[error("worker crashed: {0}")]
    WorkerCrashed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How often the maintenance task runs retention clean-up and revalidation
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

/// Delay before a queue entry blocked by a stopping attempt is looked at again
const STOPPING_RECHECK: Duration = Duration::from_millis(200);

/// Poll interval of [`JobManager::wait_for`]
const WAIT_POLL: Duration = Duration::from_millis(20);

/// Job manager for scheduling and controlling scraping jobs
pub struct JobManager {
    store: Arc<Store>,
    queue: Arc<JobQueue>,
    pipeline: Arc<Pipeline>,
    config: SchedulerConfig,
    /// Stop flags of the attempts currently running
    running: DashMap<JobId, Arc<AtomicBool>>,
    shutdown_tx: broadcast::Sender<()>,
    metrics: Arc<PipelineMetrics>,
}

impl JobManager {
    /// Create a new job manager
    pub fn new(
        store: Arc<Store>,
        pipeline: Arc<Pipeline>,
        config: SchedulerConfig,
        shutdown_tx: broadcast::Sender<()>,
        metrics: Arc<PipelineMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            queue: Arc::new(JobQueue::new()),
            pipeline,
            config,
            running: DashMap::new(),
            shutdown_tx,
            metrics,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Number of attempts currently holding a worker
    pub fn active_count(&self) -> usize {
        self.running.len()
    }

    /// Persist a new pending job and queue it
    pub fn enqueue(&self, request: JobRequest) -> Result<JobId, JobError> {
        let url = Url::parse(request.source_url.trim())
            .map_err(|e| JobError::InvalidRequest(format!("source_url '{}': {}", request.source_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(JobError::InvalidRequest(format!(
                "source_url must be http or https, got '{}'",
                url.scheme()
            )));
        }
        let domain = url
            .host_str()
            .ok_or_else(|| JobError::InvalidRequest("source_url has no host".to_string()))?
            .to_string();

        let request = JobRequest {
            source_url: url.to_string(),
            ..request
        };
        let job = ScrapingJob::new(&request, domain, self.config.max_retries);
        self.store.jobs.insert(&job)?;
        self.queue.push(job.id, job.priority);
        self.metrics.jobs_enqueued.inc();
        self.metrics.queue_depth.set(self.queue.len() as u64);
        info!(
            "Scrape job {}: enqueued {} ({:?} priority)",
            job.id, job.source_url, job.priority
        );
        Ok(job.id)
    }

    pub fn status(&self, id: &JobId) -> Result<ScrapingJob, JobError> {
        self.store.jobs.get(id).ok_or(JobError::NotFound(*id))
    }

    pub fn list(&self, filter: &JobFilter) -> Vec<ScrapingJob> {
        self.store.jobs.list(filter)
    }

    /// Cancel a pending or running job. A running attempt notices at its
    /// next page or record boundary; its counters are frozen from now on.
    pub fn cancel(&self, id: &JobId, reason: Option<String>) -> Result<ScrapingJob, JobError> {
        let current = self.status(id)?;
        if current.status.is_terminal() {
            return Err(JobError::InvalidTransition {
                id: *id,
                status: current.status,
                action: "cancel",
            });
        }
        let reason = reason.unwrap_or_else(|| "cancelled by request".to_string());
        let job = self
            .store
            .jobs
            .transition(id, JobStatus::Cancelled, |j| {
                let now = Utc::now();
                j.cancelled_at = Some(now);
                j.completed_at = Some(now);
                j.cancellation_reason = Some(reason);
                j.next_retry_at = None;
                if let Some(started) = j.started_at {
                    j.duration_secs = Some((now - started).num_milliseconds() as f64 / 1000.0);
                }
            })
            .map_err(|e| self.transition_error(e, "cancel"))?;

        if let Some(flag) = self.running.get(id) {
            flag.store(true, Ordering::Release);
        }
        self.metrics.jobs_cancelled.inc();
        info!("Scrape job {}: cancelled ({} before)", id, current.status);
        Ok(job)
    }

    /// Put a failed or cancelled job back in the queue with a fresh retry
    /// budget. Refused while a cancelled attempt is still winding down, so a
    /// job never holds two workers.
    pub fn retry(&self, id: &JobId) -> Result<ScrapingJob, JobError> {
        let current = self.status(id)?;
        if !matches!(current.status, JobStatus::Failed | JobStatus::Cancelled) {
            return Err(JobError::InvalidTransition {
                id: *id,
                status: current.status,
                action: "retry",
            });
        }
        if self.running.contains_key(id) {
            return Err(JobError::StillStopping(*id));
        }
        let job = self
            .store
            .jobs
            .transition(id, JobStatus::Pending, |j| {
                j.retry_count = 0;
                j.next_retry_at = None;
                j.completed_at = None;
                j.cancelled_at = None;
                j.cancellation_reason = None;
            })
            .map_err(|e| self.transition_error(e, "retry"))?;
        self.queue.push(job.id, job.priority);
        self.metrics.queue_depth.set(self.queue.len() as u64);
        info!("Scrape job {}: manually requeued", id);
        Ok(job)
    }

    fn transition_error(&self, err: StoreError, action: &'static str) -> JobError {
        match err {
            StoreError::InvalidTransition { id, from, .. } => JobError::InvalidTransition {
                id,
                status: from,
                action,
            },
            StoreError::NotFound { id, .. } => JobError::NotFound(id),
            other => JobError::Store(other),
        }
    }

    /// Spawn the worker pool. Workers exit on shutdown.
    pub fn start_workers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let workers = self.config.workers.max(1);
        info!("Starting {} scrape workers", workers);
        (0..workers)
            .map(|n| {
                let manager = Arc::clone(self);
                let mut shutdown_rx = self.shutdown_tx.subscribe();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            id = manager.queue.pop() => {
                                manager.metrics.queue_depth.set(manager.queue.len() as u64);
                                manager.run_one(id).await;
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("Scrape worker {} shutting down", n);
                                break;
                            }
                        }
                    }
                })
            })
            .collect()
    }

    /// Run one attempt of `id` if it is still ready
    pub async fn run_one(&self, id: JobId) {
        let Some(job) = self.store.jobs.get(&id) else {
            return;
        };
        if job.status != JobStatus::Pending {
            debug!("Scrape job {}: dropping stale queue entry ({})", id, job.status);
            return;
        }
        if let Some(at) = job.next_retry_at {
            let now = Utc::now();
            if at > now {
                debug!("Scrape job {}: not due until {}", id, at);
                self.push_after(id, job.priority, remaining(Some(at), now));
                return;
            }
        }

        // The stop flag is registered before the job turns Running, so any
        // cancel that sees Running also finds the flag.
        let flag = Arc::new(AtomicBool::new(false));
        match self.running.entry(id) {
            Entry::Occupied(_) => {
                debug!("Scrape job {}: previous attempt still stopping, deferring", id);
                self.push_after(id, job.priority, STOPPING_RECHECK);
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&flag));
            }
        }

        let job = match self.store.jobs.transition(&id, JobStatus::Running, |j| {
            let now = Utc::now();
            j.attempts += 1;
            j.started_at.get_or_insert(now);
            j.attempt_started_at = Some(now);
            j.next_retry_at = None;
            j.last_progress_at = Some(now);
        }) {
            Ok(job) => job,
            Err(e) => {
                self.release(&id, &flag);
                debug!("Scrape job {}: not started: {}", id, e);
                return;
            }
        };

        self.metrics.jobs_started.inc();
        self.metrics.jobs_running.inc();
        info!("Scrape job {}: attempt {} started", id, job.attempts);

        let pipeline = Arc::clone(&self.pipeline);
        let cancel = Arc::clone(&flag);
        let handle = tokio::spawn(async move { pipeline.run(job, cancel).await });
        let result = match handle.await {
            Ok(result) => result,
            Err(join_err) => Err(JobError::WorkerCrashed(join_err.to_string())),
        };

        self.release(&id, &flag);
        self.metrics.jobs_running.dec();

        match result {
            // Saved records are on disk before the job reads as completed
            Ok(RunOutcome::Completed) => match self.store.flush_blocking().await {
                Ok(()) => self.complete(&id),
                Err(e) => self.fail_attempt(&id, &format!("records not written to disk: {}", e)),
            },
            Ok(RunOutcome::Cancelled) => {}
            Err(e) => self.fail_attempt(&id, &e.to_string()),
        }
    }

    /// Drop the stop flag of `id`, but only if it is still the one this
    /// attempt registered.
    fn release(&self, id: &JobId, flag: &Arc<AtomicBool>) {
        self.running.remove_if(id, |_, registered| Arc::ptr_eq(registered, flag));
    }

    fn complete(&self, id: &JobId) {
        let outcome = self.store.jobs.transition(id, JobStatus::Completed, |j| {
            let now = Utc::now();
            j.completed_at = Some(now);
            if let Some(started) = j.started_at {
                j.duration_secs = Some((now - started).num_milliseconds() as f64 / 1000.0);
            }
        });
        match outcome {
            Ok(job) => {
                self.metrics.jobs_completed.inc();
                if let Some(secs) = job.duration_secs {
                    self.metrics.job_duration.observe(Duration::from_secs_f64(secs.max(0.0)));
                }
                info!(
                    "Scrape job {}: completed, {} scraped / {} saved / {} rejected",
                    id, job.items_scraped, job.items_saved, job.items_rejected
                );
            }
            // Cancelled while the last record was being written
            Err(e) => debug!("Scrape job {}: not completed: {}", id, e),
        }
    }

    /// Record a failed attempt; schedule the next one while the retry budget
    /// lasts.
    fn fail_attempt(&self, id: &JobId, reason: &str) {
        warn!("Scrape job {}: attempt failed: {}", id, reason);
        // The retry time is written with the failure so a reader never sees
        // a retriable job as finally failed.
        let mut delay = Duration::ZERO;
        let failed = self.store.jobs.transition(id, JobStatus::Failed, |j| {
            let now = Utc::now();
            j.errors.push(format!("attempt {}: {}", j.attempts, reason));
            j.completed_at = Some(now);
            if let Some(started) = j.started_at {
                j.duration_secs = Some((now - started).num_milliseconds() as f64 / 1000.0);
            }
            if j.retry_count < j.max_retries {
                delay = self.backoff(j.retry_count + 1);
                let wait = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                j.next_retry_at = Some(now + wait);
            }
        });
        let job = match failed {
            Ok(job) => job,
            Err(e) => {
                debug!("Scrape job {}: failure not recorded: {}", id, e);
                return;
            }
        };

        if job.next_retry_at.is_none() {
            self.metrics.jobs_failed.inc();
            error!(
                "Scrape job {}: failed after {} attempts ({} retries)",
                id, job.attempts, job.retry_count
            );
            return;
        }

        self.requeue(id, delay);
    }

    /// Move a failed job whose retry is scheduled back to Pending and queue
    /// it after `delay`. `next_retry_at` is kept so the job is not run early.
    fn requeue(&self, id: &JobId, delay: Duration) -> bool {
        let requeued = self.store.jobs.transition(id, JobStatus::Pending, |j| {
            j.retry_count += 1;
            j.completed_at = None;
        });
        match requeued {
            Ok(job) => {
                self.metrics.jobs_retried.inc();
                info!(
                    "Scrape job {}: retry {}/{} in {:?}",
                    id, job.retry_count, job.max_retries, delay
                );
                self.push_after(job.id, job.priority, delay);
                true
            }
            Err(e) => {
                error!("Scrape job {}: could not schedule retry: {}", id, e);
                false
            }
        }
    }

    /// `base * 2^(retry - 1)`, capped
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.config.retry_base_delay_secs;
        let exp = retry.saturating_sub(1).min(32);
        let secs = base.saturating_mul(1u64 << exp).min(self.config.retry_max_delay_secs);
        Duration::from_secs(secs)
    }

    fn push_after(&self, id: JobId, priority: crate::types::Priority, delay: Duration) {
        if delay.is_zero() {
            self.queue.push(id, priority);
            return;
        }
        let queue = Arc::clone(&self.queue);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => queue.push(id, priority),
                _ = shutdown_rx.recv() => {}
            }
        });
    }

    /// Re-queue work left behind by a previous process: pending jobs go back
    /// on the queue, jobs persisted as running are treated as crashed, and
    /// failed jobs that died between their failure and its retry being
    /// queued get that retry.
    pub fn recover(&self) -> Result<usize, JobError> {
        let mut recovered = 0;
        let pending = self.store.jobs.with_status(JobStatus::Pending);
        let retrying: Vec<ScrapingJob> = self
            .store
            .jobs
            .with_status(JobStatus::Failed)
            .into_iter()
            .filter(|j| j.next_retry_at.is_some())
            .collect();

        for job in self.store.jobs.with_status(JobStatus::Running) {
            warn!("Scrape job {}: was running at shutdown, treating as crashed", job.id);
            self.fail_attempt(&job.id, "interrupted by daemon restart");
            recovered += 1;
        }
        let now = Utc::now();
        for job in retrying {
            if self.requeue(&job.id, remaining(job.next_retry_at, now)) {
                recovered += 1;
            }
        }
        for job in pending {
            self.push_after(job.id, job.priority, remaining(job.next_retry_at, now));
            recovered += 1;
        }
        if recovered > 0 {
            info!("Recovered {} scrape jobs", recovered);
        }
        self.metrics.queue_depth.set(self.queue.len() as u64);
        Ok(recovered)
    }

    /// Remove terminal jobs older than the retention period
    pub fn cleanup_old_jobs(&self) -> Result<usize, JobError> {
        if self.config.job_retention_days == 0 {
            return Ok(0);
        }
        let cutoff = Utc::now() - chrono::Duration::days(self.config.job_retention_days as i64);
        let removed = self.store.jobs.remove_finished_before(cutoff)?;
        if removed > 0 {
            info!("Removed {} finished jobs older than {} days", removed, self.config.job_retention_days);
        }
        Ok(removed)
    }

    /// Mark expired records and re-check those not validated within
    /// `revalidate_after_days`
    pub async fn revalidate_records(&self) -> Result<Revalidation, JobError> {
        let limit = if self.config.revalidate_after_days == 0 {
            0
        } else {
            self.config.revalidate_batch.max(1)
        };
        let cutoff = Utc::now() - chrono::Duration::days(self.config.revalidate_after_days as i64);
        let report = self.pipeline.revalidate(cutoff, limit).await?;
        if report != Revalidation::default() {
            info!(
                "Revalidated {} records: {} expired, {} invalidated, {} restored, {} timed out",
                report.checked, report.expired, report.invalidated, report.restored, report.skipped
            );
        }
        Ok(report)
    }

    /// Periodic retention clean-up and record revalidation until shutdown
    pub fn start_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = manager.cleanup_old_jobs() {
                            warn!("Job retention clean-up failed: {}", e);
                        }
                        if let Err(e) = manager.revalidate_records().await {
                            warn!("Record revalidation failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }

    /// Stop running attempts at their next boundary without touching their
    /// stored status; they are recovered on the next start.
    pub fn shutdown(&self) {
        for entry in self.running.iter() {
            entry.value().store(true, Ordering::Release);
        }
        let _ = self.shutdown_tx.send(());
    }

    /// Wait until `id` settles: terminal with no retry pending
    pub async fn wait_for(&self, id: &JobId, timeout: Duration) -> Result<ScrapingJob, JobError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self.status(id)?;
            if job.status.is_terminal() && job.next_retry_at.is_none() {
                return Ok(job);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(job);
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }
}

/// Time left until `at`, zero when it has passed or is unset
fn remaining(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
    at.and_then(|at| (at - now).to_std().ok()).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::scraping::{FetchError, FetchResult, PageFetcher};
    use crate::types::{CandidateRecord, ScholarshipRecord, TrustTier, ValidationStatus};
    use crate::validation::LinkChecker;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct DownFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for DownFetcher {
        async fn fetch(&self, _url: &Url) -> Result<FetchResult, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::Status(503))
        }
    }

    /// Blocks every fetch until released
    struct HeldFetcher {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl PageFetcher for HeldFetcher {
        async fn fetch(&self, _url: &Url) -> Result<FetchResult, FetchError> {
            self.entered.notify_one();
            self.release.notified().await;
            Err(FetchError::Status(503))
        }
    }

    struct AlwaysLive;

    #[async_trait]
    impl LinkChecker for AlwaysLive {
        async fn check(&self, _url: &Url) -> Result<u16, FetchError> {
            Ok(200)
        }
    }

    fn manager(config: &Config, fetcher: Arc<dyn PageFetcher>) -> Arc<JobManager> {
        let store = Arc::new(Store::in_memory());
        let metrics = PipelineMetrics::shared();
        let pipeline = Pipeline::from_config(config, fetcher, Arc::new(AlwaysLive), store.clone(), metrics.clone()).unwrap();
        let (shutdown_tx, _) = broadcast::channel(4);
        JobManager::new(store, Arc::new(pipeline), config.scheduler.clone(), shutdown_tx, metrics)
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.scraping.default_delay_ms = 0;
        config.scraping.jitter_ms = 0;
        config.scraping.respect_robots = false;
        config.scheduler.workers = 2;
        config.scheduler.max_retries = 2;
        config.scheduler.retry_base_delay_secs = 0;
        config.scheduler.retry_max_delay_secs = 0;
        config
    }

    fn request(url: &str) -> JobRequest {
        JobRequest {
            source_url: url.to_string(),
            source_name: None,
            job_type: Default::default(),
            priority: Default::default(),
            force_update: false,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut config = test_config();
        config.scheduler.retry_base_delay_secs = 60;
        config.scheduler.retry_max_delay_secs = 200;
        let fetcher = Arc::new(DownFetcher { calls: AtomicUsize::new(0) });
        let m = manager(&config, fetcher);
        assert_eq!(m.backoff(1), Duration::from_secs(60));
        assert_eq!(m.backoff(2), Duration::from_secs(120));
        assert_eq!(m.backoff(3), Duration::from_secs(200));
        assert_eq!(m.backoff(40), Duration::from_secs(200));
    }

    #[tokio::test]
    async fn test_enqueue_rejects_bad_urls() {
        let config = test_config();
        let m = manager(&config, Arc::new(DownFetcher { calls: AtomicUsize::new(0) }));
        assert!(matches!(m.enqueue(request("not a url")), Err(JobError::InvalidRequest(_))));
        assert!(matches!(m.enqueue(request("ftp://ugc.ac.in/list")), Err(JobError::InvalidRequest(_))));

        let id = m.enqueue(request("https://ugc.ac.in/scholarships")).unwrap();
        let job = m.status(&id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.source_name, "ugc.ac.in");
        assert_eq!(m.queued(), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted_after_three_attempts() {
        let config = test_config();
        let fetcher = Arc::new(DownFetcher { calls: AtomicUsize::new(0) });
        let m = manager(&config, fetcher.clone());
        let id = m.enqueue(request("https://unreachable.example.org/list")).unwrap();
        let _workers = m.start_workers();

        let job = m.wait_for(&id, Duration::from_secs(10)).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.retry_count, 2);
        assert_eq!(job.errors.iter().filter(|e| e.starts_with("attempt")).count(), 3);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
        m.shutdown();
    }

    #[tokio::test]
    async fn test_cancel_pending_and_retry() {
        let config = test_config();
        let m = manager(&config, Arc::new(DownFetcher { calls: AtomicUsize::new(0) }));
        let id = m.enqueue(request("https://ugc.ac.in/list")).unwrap();

        let job = m.cancel(&id, Some("operator".to_string())).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.cancellation_reason.as_deref(), Some("operator"));
        assert!(matches!(m.cancel(&id, None), Err(JobError::InvalidTransition { .. })));

        // The stale queue entry is skipped
        m.run_one(id).await;
        assert_eq!(m.status(&id).unwrap().attempts, 0);

        let job = m.retry(&id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.cancelled_at.is_none());
        assert!(matches!(m.retry(&id), Err(JobError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_recover_treats_running_as_crashed() {
        let mut config = test_config();
        config.scheduler.max_retries = 0;
        let m = manager(&config, Arc::new(DownFetcher { calls: AtomicUsize::new(0) }));
        let id = m.enqueue(request("https://ugc.ac.in/list")).unwrap();
        m.queue.try_pop();
        m.store.jobs.transition(&id, JobStatus::Running, |j| j.attempts = 1).unwrap();

        m.recover().unwrap();
        let job = m.status(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.errors[0].contains("interrupted"));
    }

    #[tokio::test]
    async fn test_retry_refused_until_cancelled_attempt_stops() {
        let config = test_config();
        let fetcher = Arc::new(HeldFetcher {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let m = manager(&config, fetcher.clone());
        let id = m.enqueue(request("https://ugc.ac.in/list")).unwrap();
        m.queue.try_pop();

        let worker = {
            let m = Arc::clone(&m);
            tokio::spawn(async move { m.run_one(id).await })
        };
        fetcher.entered.notified().await;
        assert_eq!(m.active_count(), 1);

        m.cancel(&id, None).unwrap();
        assert!(matches!(m.retry(&id), Err(JobError::StillStopping(_))));
        assert_eq!(m.status(&id).unwrap().status, JobStatus::Cancelled);

        fetcher.release.notify_one();
        worker.await.unwrap();
        assert_eq!(m.active_count(), 0);

        let job = m.retry(&id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(m.queued(), 1);
    }

    #[tokio::test]
    async fn test_stale_attempt_keeps_newer_stop_flag() {
        let config = test_config();
        let m = manager(&config, Arc::new(DownFetcher { calls: AtomicUsize::new(0) }));
        let id = uuid::Uuid::new_v4();
        let old = Arc::new(AtomicBool::new(true));
        let new = Arc::new(AtomicBool::new(false));
        m.running.insert(id, Arc::clone(&new));

        m.release(&id, &old);
        assert_eq!(m.active_count(), 1);
        m.release(&id, &new);
        assert_eq!(m.active_count(), 0);
    }

    #[tokio::test]
    async fn test_recover_requeues_scheduled_retry() {
        let config = test_config();
        let m = manager(&config, Arc::new(DownFetcher { calls: AtomicUsize::new(0) }));
        let due = m.enqueue(request("https://ugc.ac.in/list")).unwrap();
        let exhausted = m.enqueue(request("https://aicte-india.org/list")).unwrap();
        m.queue.try_pop();
        m.queue.try_pop();

        for (id, retry_at) in [(due, Some(Utc::now() - chrono::Duration::seconds(1))), (exhausted, None)] {
            m.store.jobs.transition(&id, JobStatus::Running, |j| j.attempts = 1).unwrap();
            m.store
                .jobs
                .transition(&id, JobStatus::Failed, |j| {
                    j.completed_at = Some(Utc::now());
                    j.next_retry_at = retry_at;
                })
                .unwrap();
        }

        assert_eq!(m.recover().unwrap(), 1);
        let job = m.status(&due).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
        assert!(job.completed_at.is_none());
        assert_eq!(m.queued(), 1);
        assert_eq!(m.status(&exhausted).unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_revalidation_disabled_still_expires() {
        let mut config = test_config();
        config.scheduler.revalidate_after_days = 0;
        let m = manager(&config, Arc::new(DownFetcher { calls: AtomicUsize::new(0) }));

        let now = Utc::now();
        let mut candidate = CandidateRecord::new("Lapsed Merit Award", "https://ugc.ac.in/list", uuid::Uuid::new_v4());
        candidate.deadline = Some(now.date_naive() - chrono::Duration::days(3));
        let record = ScholarshipRecord {
            id: uuid::Uuid::new_v4(),
            candidate,
            source_name: "ugc.ac.in".to_string(),
            quality_score: 40,
            validation_status: ValidationStatus::Validated,
            trust_tier: TrustTier::Trusted,
            last_validated_at: now - chrono::Duration::days(90),
            duplicate_of: None,
            created_at: now,
            updated_at: now,
        };
        m.store.records.insert(&record).unwrap();

        let report = m.revalidate_records().await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.checked, 0);
        let stored = m.store.records.get(&record.id).unwrap();
        assert_eq!(stored.validation_status, ValidationStatus::Expired);
        assert_eq!(stored.last_validated_at, record.last_validated_at);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let config = test_config();
        let m = manager(&config, Arc::new(DownFetcher { calls: AtomicUsize::new(0) }));
        let id = uuid::Uuid::new_v4();
        assert!(matches!(m.status(&id), Err(JobError::NotFound(_))));
        assert!(matches!(m.cancel(&id, None), Err(JobError::NotFound(_))));
    }
}
