//! Aggregate health snapshot for the admin dashboard

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::jobs::JobManager;
use super::metrics::{get_memory_usage, MetricsSnapshot, PipelineMetrics};
use crate::config::SchedulerConfig;
use crate::store::Store;
use crate::types::{JobId, JobStatus};

/// 24h success rate below which the jobs section is degraded
const MIN_SUCCESS_RATE: f64 = 0.8;

/// Resident memory above which resources are degraded
const MEMORY_WARN_BYTES: u64 = 2 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseHealth {
    pub status: HealthStatus,
    pub reachable: bool,
    pub jobs: usize,
    pub records: usize,
    pub response_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    pub status: HealthStatus,
    pub queued: usize,
    pub running: usize,
    pub workers: usize,
    /// running / workers
    pub utilisation: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceHealth {
    pub status: HealthStatus,
    pub memory_bytes: Option<u64>,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobHealth {
    pub status: HealthStatus,
    /// Running jobs without counter progress for longer than the stuck threshold
    pub stuck_jobs: Vec<JobId>,
    /// Running jobs past the per-attempt time budget
    pub overdue_jobs: Vec<JobId>,
    pub finished_24h: usize,
    pub succeeded_24h: usize,
    /// Completed over completed + failed in the last 24h
    pub success_rate_24h: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub database: DatabaseHealth,
    pub queue: QueueHealth,
    pub resources: ResourceHealth,
    pub jobs: JobHealth,
    pub performance: MetricsSnapshot,
}

/// Worker pool occupancy at the time of the check
#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub workers: usize,
}

/// Health of a live daemon
pub fn check(manager: &JobManager, metrics: &PipelineMetrics) -> HealthReport {
    let queue = QueueStats {
        queued: manager.queued(),
        running: manager.active_count(),
        workers: manager.config().workers,
    };
    report(manager.store(), queue, manager.config(), metrics, Utc::now())
}

/// Build a health report as of `now`
pub fn report(
    store: &Store,
    queue: QueueStats,
    config: &SchedulerConfig,
    metrics: &PipelineMetrics,
    now: DateTime<Utc>,
) -> HealthReport {
    let database = match store.ping() {
        Ok(elapsed) => DatabaseHealth {
            status: HealthStatus::Healthy,
            reachable: true,
            jobs: store.jobs.len(),
            records: store.records.len(),
            response_time_ms: elapsed.as_secs_f64() * 1000.0,
            error: None,
        },
        Err(e) => DatabaseHealth {
            status: HealthStatus::Unhealthy,
            reachable: false,
            jobs: 0,
            records: 0,
            response_time_ms: 0.0,
            error: Some(e.to_string()),
        },
    };

    let utilisation = if queue.workers == 0 {
        0.0
    } else {
        queue.running as f64 / queue.workers as f64
    };
    let queue_health = QueueHealth {
        // Every worker busy with more work waiting
        status: if queue.running >= queue.workers && queue.queued > queue.workers {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        },
        queued: queue.queued,
        running: queue.running,
        workers: queue.workers,
        utilisation,
    };

    let memory_bytes = get_memory_usage();
    let resources = ResourceHealth {
        status: match memory_bytes {
            Some(bytes) if bytes > MEMORY_WARN_BYTES => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        },
        memory_bytes,
        uptime_secs: metrics.uptime().as_secs(),
    };

    let jobs = job_health(store, config, now);

    let status = [database.status, queue_health.status, resources.status, jobs.status]
        .into_iter()
        .max()
        .unwrap_or(HealthStatus::Healthy);

    HealthReport {
        status,
        checked_at: now,
        database,
        queue: queue_health,
        resources,
        jobs,
        performance: metrics.snapshot(),
    }
}

fn job_health(store: &Store, config: &SchedulerConfig, now: DateTime<Utc>) -> JobHealth {
    let stuck_after = chrono::Duration::seconds(config.stuck_threshold_secs as i64);
    let overdue_after = chrono::Duration::seconds(config.job_timeout_secs as i64);

    let mut stuck_jobs = Vec::new();
    let mut overdue_jobs = Vec::new();
    for job in store.jobs.with_status(JobStatus::Running) {
        if let Some(last) = job.last_progress_at.or(job.started_at) {
            if now - last > stuck_after {
                stuck_jobs.push(job.id);
            }
        }
        if let Some(started) = job.started_at {
            if config.job_timeout_secs > 0 && now - started > overdue_after {
                overdue_jobs.push(job.id);
            }
        }
    }
    stuck_jobs.sort();
    overdue_jobs.sort();

    let finished = store.jobs.finished_since(now - chrono::Duration::hours(24));
    let succeeded = finished.iter().filter(|j| j.status == JobStatus::Completed).count();
    let failed = finished.iter().filter(|j| j.status == JobStatus::Failed).count();
    let success_rate_24h = (succeeded + failed > 0).then(|| succeeded as f64 / (succeeded + failed) as f64);

    let status = if !stuck_jobs.is_empty() {
        HealthStatus::Unhealthy
    } else if success_rate_24h.map_or(false, |r| r < MIN_SUCCESS_RATE) || !overdue_jobs.is_empty() {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    JobHealth {
        status,
        stuck_jobs,
        overdue_jobs,
        finished_24h: finished.len(),
        succeeded_24h: succeeded,
        success_rate_24h,
    }
}
