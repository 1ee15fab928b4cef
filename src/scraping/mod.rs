//! Crawling and extraction of scholarship listings
//!
//! A job walks one source through [`Crawler`], which asks the
//! [`PolitenessController`] before every request, fetches through a
//! [`PageFetcher`] and hands each page to the source's [`Extractor`].

pub mod crawler;
pub mod extractor;
pub mod fetcher;
pub mod politeness;

pub use crawler::{CrawlSession, Crawler, PageEvent};
pub use extractor::{ContentExtractor, Extraction, ExtractionError, Extractor};
pub use fetcher::{FetchConfig, FetchEngine, FetchError, FetchResult, PageFetcher};
pub use politeness::{FetchDecision, PolitenessController};

use url::Url;

/// Query keys that identify a visit rather than a page
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "sid",
    "sessionid",
    "jsessionid",
    "ref",
];

fn is_tracking(pair: &str) -> bool {
    let key = pair.split_once('=').map_or(pair, |(k, _)| k);
    TRACKING_PARAMS.iter().any(|t| t.eq_ignore_ascii_case(key))
}

/// Comparison key for a URL.
///
/// Two links that reach the same listing page map to the same key: the
/// fragment, a leading `www.`, a trailing slash and tracking parameters
/// are dropped, remaining parameters are sorted and the whole key is
/// lowercased.
pub fn normalize_url(url: &Url) -> String {
    let mut key = url.clone();
    key.set_fragment(None);

    let bare_host = key
        .host_str()
        .and_then(|h| h.strip_prefix("www."))
        .map(str::to_owned);
    if let Some(host) = bare_host {
        if let Err(e) = key.set_host(Some(&host)) {
            tracing::warn!("Cannot drop www. from {}: {}", url, e);
        }
    }

    if key.path().len() > 1 {
        let trimmed = key.path().trim_end_matches('/').to_owned();
        key.set_path(if trimmed.is_empty() { "/" } else { trimmed.as_str() });
    }

    let mut pairs: Vec<String> = key
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|p| !p.is_empty() && !is_tracking(p))
        .map(str::to_owned)
        .collect();
    pairs.sort_unstable();
    key.set_query((!pairs.is_empty()).then(|| pairs.join("&")).as_deref());

    key.as_str().to_lowercase()
}
