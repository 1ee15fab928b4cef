//! Pipeline metrics
//!
//! Lock-free counters for jobs, crawling, validation and dedup. The same
//! numbers back the health report and the Prometheus `/metrics` page.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

const PREFIX: &str = "scholarship_ingest";

/// Monotonic count
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Level that moves both ways; never drops below zero
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

const LATENCY_BOUNDS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];
const JOB_BOUNDS: &[f64] = &[1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0];

/// Duration histogram with Prometheus-style cumulative buckets.
///
/// Bounds are upper limits in seconds; `le[i]` counts every observation
/// at or below `bounds[i]`.
#[derive(Debug)]
pub struct Histogram {
    bounds: &'static [f64],
    le: Vec<AtomicU64>,
    sum_nanos: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    fn with_bounds(bounds: &'static [f64]) -> Self {
        Self {
            bounds,
            le: bounds.iter().map(|_| AtomicU64::new(0)).collect(),
            sum_nanos: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Page fetches and link checks: 10ms to 30s
    pub fn new_latency() -> Self {
        Self::with_bounds(LATENCY_BOUNDS)
    }

    /// Whole job attempts: 1s to 2h
    pub fn new_job_duration() -> Self {
        Self::with_bounds(JOB_BOUNDS)
    }

    pub fn observe(&self, duration: Duration) {
        let secs = duration.as_secs_f64();
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.sum_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        let first = self.bounds.partition_point(|&b| b < secs);
        for slot in &self.le[first..] {
            slot.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> Duration {
        Duration::from_nanos(self.sum_nanos.load(Ordering::Relaxed))
    }

    pub fn mean(&self) -> Duration {
        match self.count() {
            0 => Duration::ZERO,
            n => self.sum() / u32::try_from(n).unwrap_or(u32::MAX),
        }
    }

    /// Observations above the largest bound
    pub fn overflow_count(&self) -> u64 {
        let top = self.le.last().map_or(0, |c| c.load(Ordering::Relaxed));
        self.count().saturating_sub(top)
    }

    /// `(bound, cumulative count)` pairs, smallest bound first
    pub fn buckets(&self) -> impl Iterator<Item = (f64, u64)> + '_ {
        self.bounds
            .iter()
            .zip(&self.le)
            .map(|(&b, c)| (b, c.load(Ordering::Relaxed)))
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new_latency()
    }
}

/// Process-wide pipeline metrics
#[derive(Debug)]
pub struct PipelineMetrics {
    started_at: Instant,

    pub jobs_enqueued: Counter,
    pub jobs_started: Counter,
    pub jobs_completed: Counter,
    pub jobs_failed: Counter,
    pub jobs_cancelled: Counter,
    pub jobs_retried: Counter,
    pub jobs_running: Gauge,
    pub queue_depth: Gauge,
    pub job_duration: Histogram,

    pub pages_fetched: Counter,
    pub fetch_errors: Counter,
    pub fetch_latency: Histogram,
    pub extraction_failures: Counter,

    pub items_scraped: Counter,
    pub items_validated: Counter,
    pub items_saved: Counter,
    pub items_updated: Counter,
    pub items_rejected: Counter,
    pub validation_latency: Histogram,

    pub dedup_checks: Counter,
    pub duplicates_found: Counter,

    pub records_revalidated: Counter,
    pub records_expired: Counter,

    pub memory_usage_bytes: Gauge,
    pub http_requests_total: Counter,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            jobs_enqueued: Counter::new(),
            jobs_started: Counter::new(),
            jobs_completed: Counter::new(),
            jobs_failed: Counter::new(),
            jobs_cancelled: Counter::new(),
            jobs_retried: Counter::new(),
            jobs_running: Gauge::new(),
            queue_depth: Gauge::new(),
            job_duration: Histogram::new_job_duration(),
            pages_fetched: Counter::new(),
            fetch_errors: Counter::new(),
            fetch_latency: Histogram::new_latency(),
            extraction_failures: Counter::new(),
            items_scraped: Counter::new(),
            items_validated: Counter::new(),
            items_saved: Counter::new(),
            items_updated: Counter::new(),
            items_rejected: Counter::new(),
            validation_latency: Histogram::new_latency(),
            dedup_checks: Counter::new(),
            duplicates_found: Counter::new(),
            records_revalidated: Counter::new(),
            records_expired: Counter::new(),
            memory_usage_bytes: Gauge::new(),
            http_requests_total: Counter::new(),
        }
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let uptime = self.uptime();
        let completed = self.jobs_completed.get();
        let finished = completed + self.jobs_failed.get() + self.jobs_cancelled.get();
        let hours = uptime.as_secs_f64() / 3600.0;
        MetricsSnapshot {
            uptime_secs: uptime.as_secs(),
            jobs_enqueued: self.jobs_enqueued.get(),
            jobs_started: self.jobs_started.get(),
            jobs_completed: completed,
            jobs_failed: self.jobs_failed.get(),
            jobs_cancelled: self.jobs_cancelled.get(),
            jobs_retried: self.jobs_retried.get(),
            jobs_running: self.jobs_running.get(),
            queue_depth: self.queue_depth.get(),
            avg_job_duration_secs: self.job_duration.mean().as_secs_f64(),
            jobs_per_hour: ratio(finished, hours),
            avg_items_saved_per_job: ratio(self.items_saved.get(), completed as f64),
            pages_fetched: self.pages_fetched.get(),
            fetch_errors: self.fetch_errors.get(),
            fetch_latency_ms: millis(self.fetch_latency.mean()),
            extraction_failures: self.extraction_failures.get(),
            items_scraped: self.items_scraped.get(),
            items_validated: self.items_validated.get(),
            items_saved: self.items_saved.get(),
            items_updated: self.items_updated.get(),
            items_rejected: self.items_rejected.get(),
            validation_latency_ms: millis(self.validation_latency.mean()),
            dedup_checks: self.dedup_checks.get(),
            duplicates_found: self.duplicates_found.get(),
            records_revalidated: self.records_revalidated.get(),
            records_expired: self.records_expired.get(),
            memory_usage_bytes: self.memory_usage_bytes.get(),
            http_requests_total: self.http_requests_total.get(),
        }
    }

    pub fn update_memory_usage(&self) {
        if let Some(usage) = get_memory_usage() {
            self.memory_usage_bytes.set(usage);
        }
    }

    /// Prometheus text exposition
    pub fn to_prometheus(&self) -> String {
        let counters: [(&str, &str, &Counter); 19] = [
            ("jobs_enqueued_total", "Jobs enqueued", &self.jobs_enqueued),
            ("jobs_started_total", "Job attempts started", &self.jobs_started),
            ("jobs_completed_total", "Jobs completed", &self.jobs_completed),
            ("jobs_failed_total", "Jobs failed after exhausting retries", &self.jobs_failed),
            ("jobs_cancelled_total", "Jobs cancelled", &self.jobs_cancelled),
            ("jobs_retried_total", "Automatic job retries scheduled", &self.jobs_retried),
            ("pages_fetched_total", "Pages fetched", &self.pages_fetched),
            ("fetch_errors_total", "Page fetch failures", &self.fetch_errors),
            ("extraction_failures_total", "Pages with no extractable records", &self.extraction_failures),
            ("items_scraped_total", "Candidate records extracted", &self.items_scraped),
            ("items_validated_total", "Candidate records validated", &self.items_validated),
            ("items_saved_total", "Records saved", &self.items_saved),
            ("items_updated_total", "Records overwritten by force updates", &self.items_updated),
            ("items_rejected_total", "Records rejected", &self.items_rejected),
            ("dedup_checks_total", "Records checked for duplicates", &self.dedup_checks),
            ("duplicates_found_total", "Duplicates found", &self.duplicates_found),
            ("records_revalidated_total", "Stored records re-checked by maintenance", &self.records_revalidated),
            ("records_expired_total", "Stored records marked expired", &self.records_expired),
            ("http_requests_total", "HTTP API requests", &self.http_requests_total),
        ];
        let gauges: [(&str, &str, &Gauge); 4] = [
            ("uptime_seconds", "Seconds since start", &Gauge(AtomicU64::new(self.uptime().as_secs()))),
            ("jobs_running", "Jobs currently running", &self.jobs_running),
            ("queue_depth", "Jobs waiting for a worker", &self.queue_depth),
            ("memory_usage_bytes", "Resident memory in bytes", &self.memory_usage_bytes),
        ];
        let histograms: [(&str, &str, &Histogram); 3] = [
            ("job_duration_seconds", "Job attempt duration in seconds", &self.job_duration),
            ("fetch_latency_seconds", "Page fetch latency in seconds", &self.fetch_latency),
            ("validation_latency_seconds", "Record validation latency in seconds", &self.validation_latency),
        ];

        let mut out = Exposition::default();
        for (name, help, c) in counters {
            out.scalar(name, help, "counter", c.get());
        }
        for (name, help, g) in gauges {
            out.scalar(name, help, "gauge", g.get());
        }
        for (name, help, h) in histograms {
            out.histogram(name, help, h);
        }
        out.0
    }
}

fn ratio(numerator: u64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator as f64 / denominator
    } else {
        0.0
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Accumulates metric families in text format
#[derive(Default)]
struct Exposition(String);

impl Exposition {
    fn header(&mut self, name: &str, help: &str, kind: &str) {
        let _ = writeln!(self.0, "# HELP {PREFIX}_{name} {help}");
        let _ = writeln!(self.0, "# TYPE {PREFIX}_{name} {kind}");
    }

    fn scalar(&mut self, name: &str, help: &str, kind: &str, value: u64) {
        self.header(name, help, kind);
        let _ = writeln!(self.0, "{PREFIX}_{name} {value}\n");
    }

    fn histogram(&mut self, name: &str, help: &str, h: &Histogram) {
        self.header(name, help, "histogram");
        for (bound, count) in h.buckets() {
            let _ = writeln!(self.0, "{PREFIX}_{name}_bucket{{le=\"{bound:.3}\"}} {count}");
        }
        let total = h.count();
        let _ = writeln!(self.0, "{PREFIX}_{name}_bucket{{le=\"+Inf\"}} {total}");
        let _ = writeln!(self.0, "{PREFIX}_{name}_sum {:.6}", h.sum().as_secs_f64());
        let _ = writeln!(self.0, "{PREFIX}_{name}_count {total}\n");
    }
}

/// Serializable view of [`PipelineMetrics`] at one instant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,

    pub jobs_enqueued: u64,
    pub jobs_started: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    pub jobs_retried: u64,
    pub jobs_running: u64,
    pub queue_depth: u64,
    pub avg_job_duration_secs: f64,
    pub jobs_per_hour: f64,
    pub avg_items_saved_per_job: f64,

    pub pages_fetched: u64,
    pub fetch_errors: u64,
    pub fetch_latency_ms: f64,
    pub extraction_failures: u64,

    pub items_scraped: u64,
    pub items_validated: u64,
    pub items_saved: u64,
    pub items_updated: u64,
    pub items_rejected: u64,
    pub validation_latency_ms: f64,

    pub dedup_checks: u64,
    pub duplicates_found: u64,
    pub records_revalidated: u64,
    pub records_expired: u64,

    pub memory_usage_bytes: u64,
    pub http_requests_total: u64,
}

/// Stopwatch feeding a [`Histogram`]
pub struct Timer(Instant);

impl Timer {
    pub fn start() -> Self {
        Self(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }

    pub fn record(self, histogram: &Histogram) -> Duration {
        let elapsed = self.elapsed();
        histogram.observe(elapsed);
        elapsed
    }
}

/// Resident set size of this process, where the platform exposes it
pub(crate) fn get_memory_usage() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        Some(pages * 4096)
    }

    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}
