//! Crawler and per-source configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::DEFAULT_USER_AGENT;

/// Crawler configuration shared by every job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapingConfig {
    /// User agent string for page fetches, robots.txt and liveness checks
    pub user_agent: String,
    /// Fixed delay between requests to the same domain (milliseconds)
    pub default_delay_ms: u64,
    /// Upper bound of the random jitter added to the delay (milliseconds)
    pub jitter_ms: u64,
    /// Maximum in-flight fetches per domain across all jobs
    pub max_concurrent_per_domain: usize,
    /// Hard timeout for a single page fetch (seconds)
    pub request_timeout_secs: u64,
    /// Maximum pages followed through pagination per job
    pub max_pages: usize,
    /// Maximum accepted response body (bytes)
    pub max_content_size: usize,
    /// Honor robots.txt
    pub respect_robots: bool,
    /// Number of domains whose robots.txt is cached
    pub robots_cache_size: usize,
    /// Per-domain overrides, keyed by host (e.g. "scholarships.gov.in")
    pub sources: HashMap<String, SourceConfig>,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_delay_ms: 2000,
            jitter_ms: 500,
            max_concurrent_per_domain: 2,
            request_timeout_secs: 30,
            max_pages: 10,
            max_content_size: 10 * 1024 * 1024,
            respect_robots: true,
            robots_cache_size: 1000,
            sources: HashMap::new(),
        }
    }
}

impl ScrapingConfig {
    /// Overrides for `domain`, matching either the exact host or a parent
    /// domain (`www.ugc.ac.in` picks up `ugc.ac.in`).
    pub fn source(&self, domain: &str) -> Option<&SourceConfig> {
        if let Some(cfg) = self.sources.get(domain) {
            return Some(cfg);
        }
        self.sources
            .iter()
            .find(|(key, _)| domain.ends_with(&format!(".{}", key)))
            .map(|(_, cfg)| cfg)
    }

    pub fn delay_ms_for(&self, domain: &str) -> u64 {
        self.source(domain)
            .and_then(|s| s.delay_ms)
            .unwrap_or(self.default_delay_ms)
    }

    pub fn jitter_ms_for(&self, domain: &str) -> u64 {
        self.source(domain)
            .and_then(|s| s.jitter_ms)
            .unwrap_or(self.jitter_ms)
    }

    pub fn max_concurrent_for(&self, domain: &str) -> usize {
        self.source(domain)
            .and_then(|s| s.max_concurrent)
            .unwrap_or(self.max_concurrent_per_domain)
            .max(1)
    }

    pub fn max_pages_for(&self, domain: &str) -> usize {
        self.source(domain)
            .and_then(|s| s.max_pages)
            .unwrap_or(self.max_pages)
    }
}

/// Per-source overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub delay_ms: Option<u64>,
    pub jitter_ms: Option<u64>,
    pub max_concurrent: Option<usize>,
    pub max_pages: Option<usize>,
    /// Selector rule set; replaces any built-in rules for this domain
    pub rules: Option<SelectorRules>,
}

/// CSS selectors locating scholarship fields on a listing page.
///
/// `item` selects one element per scholarship; every other selector is
/// evaluated inside that element. Several selectors may be given as a comma
/// separated CSS group.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorRules {
    pub item: String,
    pub title: String,
    pub description: Option<String>,
    pub amount: Option<String>,
    pub deadline: Option<String>,
    pub eligibility: Option<String>,
    pub application_url: Option<String>,
    pub provider: Option<String>,
    /// Pagination link selector, evaluated on the whole page
    pub next_page: Option<String>,
}
