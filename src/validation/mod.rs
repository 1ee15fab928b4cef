//! Link and data validation
//!
//! Every candidate gets a URL format check, a domain trust tier, a
//! completeness check and, unless disabled, a liveness check of its link.
//! Network errors during liveness are retried once with backoff. Results are
//! reported as a [`ValidationOutcome`] carrying reason codes.

mod trust;

pub use trust::TrustPolicy;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::ValidationConfig;
use crate::normalize::amount::is_unspecified;
use crate::scraping::FetchError;
use crate::types::{CandidateRecord, TrustTier, ValidationStatus};

const MAX_URL_LEN: usize = 2000;

/// Why a record failed validation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationFailure {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("suspicious domain {0}")]
    SuspiciousDomain(String),
    #[error("domain {domain} trust score {score:.2} below minimum")]
    LowTrust { domain: String, score: f32 },
    #[error("dead link {url} (HTTP {status})")]
    DeadLink { url: String, status: u16 },
    #[error("TLS certificate check failed for {url}: {detail}")]
    Tls { url: String, detail: String },
    #[error("unreachable {url}: {detail}")]
    Unreachable { url: String, detail: String },
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("deadline {0} has passed")]
    Expired(NaiveDate),
}

impl ValidationFailure {
    /// Stable reason code for logs and API consumers
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidUrl { .. } => "invalid_url",
            Self::SuspiciousDomain(_) => "suspicious_domain",
            Self::LowTrust { .. } => "low_trust",
            Self::DeadLink { .. } => "dead_link",
            Self::Tls { .. } => "tls_failure",
            Self::Unreachable { .. } => "unreachable",
            Self::MissingField(_) => "incomplete",
            Self::Expired(_) => "expired",
        }
    }
}

/// Result of validating one candidate
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub status: ValidationStatus,
    pub failures: Vec<ValidationFailure>,
    pub trust_tier: TrustTier,
    pub trust_score: f32,
    /// HTTP status of the liveness check, when one ran
    pub http_status: Option<u16>,
}

impl ValidationOutcome {
    pub fn passed(&self) -> bool {
        self.status == ValidationStatus::Validated
    }

    pub fn reason_codes(&self) -> Vec<&'static str> {
        self.failures.iter().map(|f| f.code()).collect()
    }

    /// One-line summary for the job warning list
    pub fn summary(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("[{}] {}", f.code(), f))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Liveness check for one URL; returns the final HTTP status
#[async_trait]
pub trait LinkChecker: Send + Sync {
    async fn check(&self, url: &Url) -> Result<u16, FetchError>;
}

/// reqwest-backed checker: HEAD, falling back to GET when HEAD is refused
pub struct HttpLinkChecker {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpLinkChecker {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::from_reqwest(e, timeout))?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl LinkChecker for HttpLinkChecker {
    async fn check(&self, url: &Url) -> Result<u16, FetchError> {
        let head = self
            .client
            .head(url.as_str())
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, self.timeout))?;
        let status = head.status().as_u16();
        if status != 405 && status != 501 {
            return Ok(status);
        }

        let get = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, self.timeout))?;
        Ok(get.status().as_u16())
    }
}

/// Liveness results within one job, keyed by URL
pub type LinkCache = HashMap<String, Result<u16, ValidationFailure>>;

/// Validates candidates against the configured policy
pub struct Validator {
    config: ValidationConfig,
    trust: TrustPolicy,
    checker: std::sync::Arc<dyn LinkChecker>,
}

impl Validator {
    pub fn new(config: ValidationConfig, checker: std::sync::Arc<dyn LinkChecker>) -> Self {
        Self {
            trust: TrustPolicy::new(&config),
            config,
            checker,
        }
    }

    /// Validate one candidate. `today` decides expiry; `cache` holds this
    /// job's liveness results.
    pub async fn validate(
        &self,
        record: &CandidateRecord,
        today: NaiveDate,
        cache: &mut LinkCache,
    ) -> ValidationOutcome {
        let mut failures = Vec::new();

        let link = record.link().to_string();
        let parsed = match check_url_format(&link) {
            Ok(url) => Some(url),
            Err(f) => {
                failures.push(f);
                None
            }
        };

        // Trust covers both the page and the link it points to
        let source_host = Url::parse(&record.source_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));
        let link_host = parsed.as_ref().and_then(|u| u.host_str().map(str::to_string));
        let hosts: Vec<&str> = source_host.iter().chain(link_host.iter()).map(String::as_str).collect();
        let trust_tier = self.trust.weakest(hosts.iter().copied());
        let trust_score = self.trust.score(trust_tier);
        let weakest_host = hosts
            .iter()
            .find(|h| self.trust.tier(h) == trust_tier)
            .map(|h| h.to_string())
            .unwrap_or_default();
        if trust_tier == TrustTier::Suspicious {
            failures.push(ValidationFailure::SuspiciousDomain(weakest_host));
        } else if !self.trust.acceptable(trust_tier) {
            failures.push(ValidationFailure::LowTrust {
                domain: weakest_host,
                score: trust_score,
            });
        }

        failures.extend(missing_fields(record).into_iter().map(ValidationFailure::MissingField));

        // Liveness is only worth a request when nothing else already failed
        let mut http_status = None;
        if failures.is_empty() && self.config.check_liveness {
            if let Some(url) = &parsed {
                match self.liveness(url, cache).await {
                    Ok(status) => http_status = Some(status),
                    Err(f) => {
                        if let ValidationFailure::DeadLink { status, .. } = &f {
                            http_status = Some(*status);
                        }
                        failures.push(f);
                    }
                }
            }
        }

        let expired = record.deadline.filter(|d| *d < today);
        if let Some(deadline) = expired {
            failures.push(ValidationFailure::Expired(deadline));
        }

        let status = if failures
            .iter()
            .any(|f| matches!(f, ValidationFailure::SuspiciousDomain(_) | ValidationFailure::LowTrust { .. }))
        {
            ValidationStatus::Suspicious
        } else if failures.iter().any(|f| !matches!(f, ValidationFailure::Expired(_))) {
            ValidationStatus::Failed
        } else if expired.is_some() && self.config.reject_expired {
            ValidationStatus::Expired
        } else {
            if expired.is_some() {
                failures.clear();
            }
            ValidationStatus::Validated
        };

        ValidationOutcome {
            status,
            failures,
            trust_tier,
            trust_score,
            http_status,
        }
    }

    async fn liveness(&self, url: &Url, cache: &mut LinkCache) -> Result<u16, ValidationFailure> {
        let key = url.as_str().to_string();
        if let Some(cached) = cache.get(&key) {
            return cached.clone();
        }

        let mut result = self.checker.check(url).await;
        if matches!(&result, Err(e) if e.is_network()) {
            debug!("Retrying liveness check for {} after network error", url);
            tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
            result = self.checker.check(url).await;
        }

        let verdict = match result {
            Ok(status) if status < 400 => Ok(status),
            Ok(status) | Err(FetchError::Status(status)) => Err(ValidationFailure::DeadLink {
                url: key.clone(),
                status,
            }),
            Err(FetchError::Tls(detail)) => Err(ValidationFailure::Tls {
                url: key.clone(),
                detail,
            }),
            Err(e) => Err(ValidationFailure::Unreachable {
                url: key.clone(),
                detail: e.to_string(),
            }),
        };
        cache.insert(key, verdict.clone());
        verdict
    }
}

/// Syntactic URL check: http(s), host present, bounded length
pub fn check_url_format(link: &str) -> Result<Url, ValidationFailure> {
    let invalid = |reason: &str| ValidationFailure::InvalidUrl {
        url: link.to_string(),
        reason: reason.to_string(),
    };
    if link.trim().is_empty() {
        return Err(invalid("empty"));
    }
    if link.len() > MAX_URL_LEN {
        return Err(invalid("too long"));
    }
    let url = Url::parse(link).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(url)
}

/// Required fields absent from the record. The amount may be replaced by an
/// explicit "unspecified" marker.
pub fn missing_fields(record: &CandidateRecord) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if record.title.trim().is_empty() {
        missing.push("title");
    }
    if record.description.trim().is_empty() {
        missing.push("description");
    }
    if record.deadline.is_none() {
        missing.push("deadline");
    }
    if record.eligibility.as_deref().map_or(true, |e| e.trim().is_empty()) {
        missing.push("eligibility");
    }
    let amount_stated = record.amount.is_some()
        || record.raw_amount.as_deref().map_or(false, is_unspecified);
    if !amount_stated {
        missing.push("amount");
    }
    missing
}
