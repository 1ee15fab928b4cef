//! Daemon Module
//!
//! Long-running ingestion service. The daemon owns the job store and a fixed
//! pool of scrape workers, and exposes job control, record queries and
//! health over HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   scholarship-ingest serve                    │
//! │                                                               │
//! │  HTTP API ──▶ JobManager ──▶ JobQueue (priority, FIFO)        │
//! │                   │                                           │
//! │                   ▼                                           │
//! │            worker pool (N)                                    │
//! │                   │  one job per worker                       │
//! │                   ▼                                           │
//! │  Pipeline: crawl ─▶ extract ─▶ normalize ─▶ validate          │
//! │                                   ─▶ dedup ─▶ score ─▶ Store  │
//! │                                                               │
//! │  health / metrics ◀── Store, JobManager, PipelineMetrics      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! scholarship-ingest serve --config config.toml
//! ```

pub mod health;
pub mod http;
pub mod jobs;
pub mod lifecycle;
pub mod metrics;

pub use health::{HealthReport, HealthStatus};
pub use http::HttpServer;
pub use jobs::{JobError, JobManager, Pipeline, Revalidation, RunOutcome};
pub use lifecycle::{build_manager, get_daemon_pid, is_daemon_running, Daemon};
pub use metrics::{MetricsSnapshot, PipelineMetrics, Timer};
