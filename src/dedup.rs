//! Duplicate detection between candidate and stored scholarship records
//!
//! Two records match when either:
//! - their normalized titles are at least `similarity_threshold` similar and
//!   carry the same numbers (so "2024" and "2025" editions stay apart), or
//! - a strong signal fires: same provider, amount and deadline, or the same
//!   normalized application link with the same amount and deadline.
//!
//! Every comparison is symmetric by construction.

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use url::Url;

use crate::config::DedupConfig;
use crate::scraping::normalize_url;
use crate::types::{CandidateRecord, RecordId, ScholarshipRecord};

/// Why two records were judged the same scholarship
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MatchReason {
    TitleSimilarity { score: f64 },
    ProviderAmountDeadline,
    SameLink,
}

/// A stored record the candidate duplicates
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateMatch {
    pub record_id: RecordId,
    pub reason: MatchReason,
}

/// Outcome of deduplicating a batch of candidates from one page
#[derive(Debug, Default)]
pub struct BatchDedup {
    pub unique: Vec<CandidateRecord>,
    /// Dropped candidates with the index (into `unique`) of the kept twin
    pub duplicates: Vec<(CandidateRecord, usize)>,
}

pub struct Deduplicator {
    config: DedupConfig,
    stop_words: BTreeSet<String>,
    /// Raw title -> normalized title
    title_cache: Mutex<LruCache<String, String>>,
}

impl Deduplicator {
    pub fn new(config: DedupConfig) -> Self {
        let stop_words = config.stop_words.iter().map(|w| w.to_lowercase()).collect();
        let cache_size = NonZeroUsize::new(config.cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            stop_words,
            title_cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    /// Lowercase, strip punctuation, collapse whitespace and drop stop words.
    pub fn normalize_title(&self, title: &str) -> String {
        if let Some(hit) = self.title_cache.lock().get(title) {
            return hit.clone();
        }
        let lowered = title.to_lowercase();
        let spaced: String = lowered
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();
        let normalized = spaced
            .split_whitespace()
            .filter(|w| !self.stop_words.contains(*w))
            .collect::<Vec<_>>()
            .join(" ");
        self.title_cache.lock().put(title.to_string(), normalized.clone());
        normalized
    }

    /// Similarity of two titles in `0.0..=1.0` after normalization
    pub fn title_similarity(&self, a: &str, b: &str) -> f64 {
        let na = self.normalize_title(a);
        let nb = self.normalize_title(b);
        // Order the pair so argument order cannot change the float result
        let (x, y) = if na <= nb { (&na, &nb) } else { (&nb, &na) };
        if x.is_empty() && y.is_empty() {
            return 0.0;
        }
        strsim::normalized_levenshtein(x, y)
    }

    fn numbers(normalized: &str) -> BTreeSet<&str> {
        normalized
            .split(' ')
            .filter(|w| w.chars().any(|c| c.is_ascii_digit()))
            .collect()
    }

    /// Decide whether `a` and `b` describe the same scholarship
    pub fn compare(&self, a: &CandidateRecord, b: &CandidateRecord) -> Option<MatchReason> {
        if let (Some(pa), Some(pb)) = (&a.provider, &b.provider) {
            let same_provider = self.normalize_title(pa) == self.normalize_title(pb);
            if same_provider
                && a.amount.is_some()
                && a.amount == b.amount
                && a.deadline.is_some()
                && a.deadline == b.deadline
            {
                return Some(MatchReason::ProviderAmountDeadline);
            }
        }

        if let (Some(la), Some(lb)) = (link_key(a), link_key(b)) {
            let has_terms = a.amount.is_some() || a.deadline.is_some();
            if la == lb && has_terms && a.amount == b.amount && a.deadline == b.deadline {
                return Some(MatchReason::SameLink);
            }
        }

        let na = self.normalize_title(&a.title);
        let nb = self.normalize_title(&b.title);
        if Self::numbers(&na) != Self::numbers(&nb) {
            return None;
        }
        let score = self.title_similarity(&a.title, &b.title);
        if score >= self.config.similarity_threshold {
            return Some(MatchReason::TitleSimilarity { score });
        }
        None
    }

    pub fn is_duplicate(&self, a: &CandidateRecord, b: &CandidateRecord) -> bool {
        self.compare(a, b).is_some()
    }

    /// First stored record `candidate` duplicates. Only live records
    /// (validated, not themselves duplicates) are considered.
    pub fn find_match<'a, I>(&self, candidate: &CandidateRecord, existing: I) -> Option<DuplicateMatch>
    where
        I: IntoIterator<Item = &'a ScholarshipRecord>,
    {
        existing
            .into_iter()
            .filter(|r| r.duplicate_of.is_none())
            .find_map(|r| {
                self.compare(candidate, &r.candidate).map(|reason| DuplicateMatch {
                    record_id: r.id,
                    reason,
                })
            })
    }

    /// Collapse duplicates within one batch, keeping the first occurrence.
    pub fn dedup_batch(&self, candidates: Vec<CandidateRecord>) -> BatchDedup {
        let mut out = BatchDedup::default();
        for candidate in candidates {
            match out.unique.iter().position(|kept| self.is_duplicate(kept, &candidate)) {
                Some(idx) => out.duplicates.push((candidate, idx)),
                None => out.unique.push(candidate),
            }
        }
        out
    }
}

/// Normalized application link; the listing page URL is shared by every
/// record on a page so it never counts.
fn link_key(record: &CandidateRecord) -> Option<String> {
    let link = record.application_url.as_deref()?;
    let parsed = Url::parse(link).ok()?;
    Some(normalize_url(&parsed))
}
