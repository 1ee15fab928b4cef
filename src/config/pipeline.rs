//! Normalization, extraction, validation and deduplication configuration

use serde::{Deserialize, Serialize};

/// Amount and date parsing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// chrono format strings tried in order
    pub date_formats: Vec<String>,
    /// Smallest plausible award in rupees
    pub min_amount: u64,
    /// Largest plausible award in rupees
    pub max_amount: u64,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            date_formats: [
                "%Y-%m-%d",
                "%d-%m-%Y",
                "%d/%m/%Y",
                "%m/%d/%Y",
                "%Y/%m/%d",
                "%d-%m-%y",
                "%d/%m/%y",
                "%B %d, %Y",
                "%b %d, %Y",
                "%d %B %Y",
                "%d %b %Y",
                "%B %d %Y",
                "%b %d %Y",
                "%d %B, %Y",
                "%d.%m.%Y",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            min_amount: 100,
            max_amount: 50_000_000,
        }
    }
}

/// Content extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Candidates with shorter titles are dropped
    pub min_title_len: usize,
    /// Candidates with shorter descriptions are dropped
    pub min_description_len: usize,
    /// Minimum text length of a block considered by the heuristic fallback
    pub min_block_len: usize,
    /// Text classifier used by the heuristic fallback
    pub classifier: ClassifierConfig,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_title_len: 10,
            min_description_len: 20,
            min_block_len: 100,
            classifier: ClassifierConfig::default(),
        }
    }
}

/// Optional OpenAI-compatible classifier for unstructured pages.
///
/// When `endpoint` is unset the keyword classifier is used alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    /// Keyword hits per 100 words required to call a block scholarship-shaped
    pub keyword_density: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 20,
            keyword_density: 1.5,
        }
    }
}

/// Link and data validation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Known-trusted domains, matched exactly or as a suffix
    pub trusted_domains: Vec<String>,
    /// Domains or TLD suffixes treated as suspicious
    pub suspicious_domains: Vec<String>,
    /// Timeout for one liveness request (seconds)
    pub check_timeout_secs: u64,
    /// Backoff before the single retry of a network error (milliseconds)
    pub retry_backoff_ms: u64,
    /// Skip liveness checks entirely (offline runs)
    pub check_liveness: bool,
    /// Reject records whose deadline already passed
    pub reject_expired: bool,
    pub trust_scores: TrustScores,
    /// Records from domains scoring below this are rejected as suspicious
    pub min_trust_score: f32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            trusted_domains: [
                "gov.in",
                "nic.in",
                "ac.in",
                "edu.in",
                "ugc.ac.in",
                "aicte-india.org",
                "scholarships.gov.in",
                "nsp.gov.in",
                "education.gov.in",
                "buddy4study.com",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            suspicious_domains: [
                "tk", "ml", "ga", "cf", "bit.ly", "tinyurl.com", "goo.gl", "t.co", "ow.ly",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            check_timeout_secs: 10,
            retry_backoff_ms: 500,
            check_liveness: true,
            reject_expired: true,
            trust_scores: TrustScores::default(),
            min_trust_score: 0.1,
        }
    }
}

/// Trust score assigned to each domain tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustScores {
    pub trusted: f32,
    pub neutral: f32,
    pub suspicious: f32,
}

impl Default for TrustScores {
    fn default() -> Self {
        Self {
            trusted: 1.0,
            neutral: 0.5,
            suspicious: 0.0,
        }
    }
}

/// Duplicate detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Normalized-title similarity at or above which records match
    pub similarity_threshold: f64,
    /// Words removed from titles before comparison
    pub stop_words: Vec<String>,
    /// Size of the normalized-title cache
    pub cache_size: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            stop_words: [
                "the", "a", "an", "and", "or", "of", "for", "to", "in", "on", "by", "with",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            cache_size: 10_000,
        }
    }
}
