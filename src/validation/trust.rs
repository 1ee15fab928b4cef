//! Domain trust tiers

use crate::config::ValidationConfig;
use crate::types::TrustTier;

/// Whether `host` is `pattern` or a subdomain of it. A bare TLD pattern
/// ("tk") matches any host under that TLD.
fn host_matches(host: &str, pattern: &str) -> bool {
    let pattern = pattern.trim().trim_start_matches('.').to_lowercase();
    if pattern.is_empty() {
        return false;
    }
    host == pattern || host.ends_with(&format!(".{}", pattern))
}

/// Classifies hosts against the configured allow and deny lists
#[derive(Debug, Clone)]
pub struct TrustPolicy {
    trusted: Vec<String>,
    suspicious: Vec<String>,
    scores: crate::config::TrustScores,
    min_score: f32,
}

impl TrustPolicy {
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            trusted: config.trusted_domains.clone(),
            suspicious: config.suspicious_domains.clone(),
            scores: config.trust_scores.clone(),
            min_score: config.min_trust_score,
        }
    }

    /// Tier of one host; the allow list wins over the deny list
    pub fn tier(&self, host: &str) -> TrustTier {
        let host = host.trim_end_matches('.').to_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        if self.trusted.iter().any(|d| host_matches(host, d)) {
            TrustTier::Trusted
        } else if self.suspicious.iter().any(|d| host_matches(host, d)) {
            TrustTier::Suspicious
        } else {
            TrustTier::Neutral
        }
    }

    pub fn score(&self, tier: TrustTier) -> f32 {
        match tier {
            TrustTier::Trusted => self.scores.trusted,
            TrustTier::Neutral => self.scores.neutral,
            TrustTier::Suspicious => self.scores.suspicious,
        }
    }

    /// Least trusted tier among several hosts
    pub fn weakest<'a>(&self, hosts: impl IntoIterator<Item = &'a str>) -> TrustTier {
        hosts
            .into_iter()
            .map(|h| self.tier(h))
            .min_by(|a, b| self.score(*a).total_cmp(&self.score(*b)))
            .unwrap_or(TrustTier::Neutral)
    }

    /// Whether a tier's score is high enough to keep a record
    pub fn acceptable(&self, tier: TrustTier) -> bool {
        tier != TrustTier::Suspicious && self.score(tier) >= self.min_score
    }
}
