//! Core types for the ingestion pipeline

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a scraping job
pub type JobId = Uuid;

/// Unique identifier for a persisted scholarship record
pub type RecordId = Uuid;

// ============================================================================
// Job Types
// ============================================================================

/// Status of a scraping job.
///
/// `Completed`, `Failed` and `Cancelled` are terminal. `Failed` is left again
/// only through an automatic retry (while the retry budget lasts) or an
/// explicit operator retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Failed, Pending)
                | (Cancelled, Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Full crawls walk every pagination link; incremental crawls stop at the
/// first page that yields nothing new.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    #[default]
    Full,
    Incremental,
}

/// Job priority. Variant order is the scheduling order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "normal" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// Request to enqueue a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub source_url: String,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub job_type: JobType,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub force_update: bool,
}

/// A crawl-and-ingest run against a single source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapingJob {
    pub id: JobId,
    pub source_url: String,
    pub source_name: String,
    pub source_domain: String,
    pub status: JobStatus,
    pub job_type: JobType,
    pub priority: Priority,
    pub force_update: bool,

    pub items_scraped: u64,
    pub items_validated: u64,
    pub items_saved: u64,
    pub items_rejected: u64,
    /// Subset of `items_saved` that overwrote an existing record
    pub items_updated: u64,
    pub pages_fetched: u64,

    pub errors: Vec<String>,
    pub warnings: Vec<String>,

    pub retry_count: u32,
    pub max_retries: u32,
    pub attempts: u32,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// Start of the current (or last) attempt
    #[serde(default)]
    pub attempt_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub last_progress_at: Option<DateTime<Utc>>,
}

impl ScrapingJob {
    pub fn new(request: &JobRequest, source_domain: String, max_retries: u32) -> Self {
        let source_name = request
            .source_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| source_domain.clone());
        Self {
            id: Uuid::new_v4(),
            source_url: request.source_url.clone(),
            source_name,
            source_domain,
            status: JobStatus::Pending,
            job_type: request.job_type,
            priority: request.priority,
            force_update: request.force_update,
            items_scraped: 0,
            items_validated: 0,
            items_saved: 0,
            items_rejected: 0,
            items_updated: 0,
            pages_fetched: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            retry_count: 0,
            max_retries,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            attempt_started_at: None,
            completed_at: None,
            duration_secs: None,
            next_retry_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            last_progress_at: None,
        }
    }

    /// `items_rejected + items_saved == items_validated <= items_scraped`
    pub fn counters_consistent(&self) -> bool {
        self.items_rejected + self.items_saved == self.items_validated
            && self.items_validated <= self.items_scraped
            && self.items_updated <= self.items_saved
    }
}

// ============================================================================
// Record Types
// ============================================================================

/// An extracted-but-not-yet-persisted scholarship entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub title: String,
    pub description: String,
    pub raw_amount: Option<String>,
    pub amount: Option<u64>,
    pub raw_deadline: Option<String>,
    pub deadline: Option<NaiveDate>,
    pub eligibility: Option<String>,
    /// Page the record was extracted from
    pub source_url: String,
    pub application_url: Option<String>,
    pub provider: Option<String>,
    pub category: Option<String>,
    pub level: Option<String>,
    pub tags: Vec<String>,
    /// Provenance: the job that produced this candidate
    pub job_id: JobId,
}

impl CandidateRecord {
    pub fn new(title: impl Into<String>, source_url: impl Into<String>, job_id: JobId) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            raw_amount: None,
            amount: None,
            raw_deadline: None,
            deadline: None,
            eligibility: None,
            source_url: source_url.into(),
            application_url: None,
            provider: None,
            category: None,
            level: None,
            tags: Vec::new(),
            job_id,
        }
    }

    /// URL the record points users at: the application link when present,
    /// otherwise the page it was found on.
    pub fn link(&self) -> &str {
        self.application_url.as_deref().unwrap_or(&self.source_url)
    }
}

/// Validation verdict attached to a persisted record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Validated,
    Failed,
    Expired,
    Suspicious,
    Duplicate,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validated => "validated",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Suspicious => "suspicious",
            Self::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ValidationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "validated" => Ok(Self::Validated),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            "suspicious" => Ok(Self::Suspicious),
            "duplicate" => Ok(Self::Duplicate),
            other => Err(format!("unknown validation status '{}'", other)),
        }
    }
}

/// Reliability classification of a source domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustTier {
    Trusted,
    Neutral,
    Suspicious,
}

/// A persisted scholarship record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScholarshipRecord {
    pub id: RecordId,
    #[serde(flatten)]
    pub candidate: CandidateRecord,
    pub source_name: String,
    pub quality_score: u8,
    pub validation_status: ValidationStatus,
    pub trust_tier: TrustTier,
    pub last_validated_at: DateTime<Utc>,
    /// Back-reference to the record this one duplicates
    pub duplicate_of: Option<RecordId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
