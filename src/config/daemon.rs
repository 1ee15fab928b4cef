//! Scheduler, storage, admin API and metrics settings

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Job scheduler and worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of workers; each job occupies one worker for its lifetime
    pub workers: usize,
    /// Automatic retries after a failed attempt
    pub max_retries: u32,
    /// Backoff before the first retry (seconds); doubles per retry
    pub retry_base_delay_secs: u64,
    /// Ceiling on the retry backoff (seconds)
    pub retry_max_delay_secs: u64,
    /// Budget for one job attempt (seconds); overruns are reported by health
    pub job_timeout_secs: u64,
    /// Budget for validating one record (seconds)
    pub record_timeout_secs: u64,
    /// A running job without counter progress for this long is stuck (seconds)
    pub stuck_threshold_secs: u64,
    /// Terminal jobs older than this are removed (days, 0 keeps forever)
    pub job_retention_days: u64,
    /// Stored records are re-checked once their last validation is this old
    /// (days, 0 only marks expired deadlines)
    pub revalidate_after_days: u64,
    /// Most records re-checked per maintenance pass
    pub revalidate_batch: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            max_retries: 3,
            retry_base_delay_secs: 60,
            retry_max_delay_secs: 3600,
            job_timeout_secs: 300,
            record_timeout_secs: 15,
            stuck_threshold_secs: 2 * 60 * 60,
            job_retention_days: 30,
            revalidate_after_days: 7,
            revalidate_batch: 100,
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `jobs.json` and `records.json`
    pub data_dir: PathBuf,
    /// How often records and job progress are written behind to disk
    pub flush_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".scholarship-ingest"),
            flush_interval_ms: 1000,
        }
    }
}

/// Admin API used by the dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    /// `host:port`; keep it on loopback unless `api_keys` is set
    pub listen_addr: String,
    /// Accepted keys; with none, job and record routes are open
    pub api_keys: Vec<String>,
    /// Allow cross-origin calls from a dashboard on another host
    pub cors_enabled: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:8080".to_string(),
            api_keys: Vec::new(),
            cors_enabled: false,
        }
    }
}

/// Prometheus exposition and resource sampling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve `/metrics`
    pub enabled: bool,
    /// How often resident memory is sampled (seconds)
    pub system_metrics_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            system_metrics_interval_secs: 15,
        }
    }
}
