//! Per-job page crawler
//!
//! A [`CrawlSession`] walks one source: it fetches pages one at a time in
//! discovery order, follows pagination links up to the page budget, and
//! yields a [`PageEvent`] per page. The caller polls cancellation between
//! calls to [`CrawlSession::next_page`]; a fetch already in flight runs to
//! completion or timeout.

use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::extractor::{ContentExtractor, Extraction, ExtractionError};
use super::fetcher::{FetchError, FetchResult, PageFetcher};
use super::normalize_url;
use super::politeness::PolitenessController;
use crate::config::ScrapingConfig;
use crate::types::JobId;

/// Result of one crawl step
#[derive(Debug)]
pub enum PageEvent {
    /// Page fetched and candidates extracted
    Extracted { url: Url, extraction: Extraction },
    /// Page fetched but nothing usable came out of it
    ExtractionFailed { url: Url, error: ExtractionError },
    /// Page not fetched
    FetchFailed { url: Url, error: FetchError },
    /// Page skipped without fetching or extraction (robots, repeated content)
    Skipped { url: Url, reason: String },
}

/// Crawl components shared by every job
pub struct Crawler {
    fetcher: Arc<dyn PageFetcher>,
    politeness: Arc<PolitenessController>,
    extractor: Arc<ContentExtractor>,
    config: ScrapingConfig,
}

impl Crawler {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        politeness: Arc<PolitenessController>,
        extractor: Arc<ContentExtractor>,
        config: ScrapingConfig,
    ) -> Self {
        Self {
            fetcher,
            politeness,
            extractor,
            config,
        }
    }

    /// Start crawling `start` for `job_id`
    pub fn session(&self, job_id: JobId, start: Url) -> CrawlSession<'_> {
        let domain = start.host_str().unwrap_or_default().to_string();
        let max_pages = self.config.max_pages_for(&domain).max(1);
        let mut seen = HashSet::new();
        seen.insert(normalize_url(&start));

        CrawlSession {
            crawler: self,
            job_id,
            domain,
            max_pages,
            queue: VecDeque::from([start]),
            seen,
            fingerprints: HashSet::new(),
            rate_limited_retries: HashSet::new(),
            pages_attempted: 0,
            pages_fetched: 0,
            stopped: false,
        }
    }
}

/// Crawl state of one job
pub struct CrawlSession<'a> {
    crawler: &'a Crawler,
    job_id: JobId,
    domain: String,
    max_pages: usize,
    queue: VecDeque<Url>,
    seen: HashSet<String>,
    fingerprints: HashSet<[u8; 32]>,
    rate_limited_retries: HashSet<String>,
    pages_attempted: usize,
    pages_fetched: usize,
    stopped: bool,
}

impl CrawlSession<'_> {
    /// Pages fetched successfully so far
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub fn pages_attempted(&self) -> usize {
        self.pages_attempted
    }

    /// Stop following pagination; the next call returns `None`
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Fetch and extract the next page in discovery order
    pub async fn next_page(&mut self) -> Option<PageEvent> {
        if self.stopped || self.pages_attempted >= self.max_pages {
            return None;
        }
        let url = self.queue.pop_front()?;
        self.pages_attempted += 1;

        let crawler = self.crawler;
        if !crawler.politeness.is_allowed(&url, crawler.fetcher.as_ref()).await {
            debug!("Scrape job {}: {} disallowed by robots.txt", self.job_id, url);
            return Some(PageEvent::Skipped {
                url,
                reason: "disallowed by robots.txt".to_string(),
            });
        }

        let page = match self.fetch(&url).await {
            Ok(page) => page,
            Err(FetchError::RateLimited(retry_after)) => {
                crawler.politeness.record_429(&self.domain, retry_after);
                // One more try after the backoff, at the front of the queue
                if self.rate_limited_retries.insert(normalize_url(&url)) {
                    warn!("Scrape job {}: rate limited on {}, will retry", self.job_id, url);
                    self.pages_attempted -= 1;
                    self.queue.push_front(url.clone());
                }
                return Some(PageEvent::FetchFailed {
                    url,
                    error: FetchError::RateLimited(retry_after),
                });
            }
            Err(error) => {
                if matches!(error, FetchError::Connect(_)) {
                    crawler.politeness.record_error(&self.domain);
                }
                return Some(PageEvent::FetchFailed { url, error });
            }
        };
        crawler.politeness.record_success(&self.domain);
        self.pages_fetched += 1;

        let fingerprint: [u8; 32] = Sha256::digest(page.body.as_bytes()).into();
        if !self.fingerprints.insert(fingerprint) {
            return Some(PageEvent::Skipped {
                url,
                reason: "content identical to an earlier page".to_string(),
            });
        }

        self.enqueue_pagination(&page);

        match crawler.extractor.extract(&page, self.job_id).await {
            Ok(extraction) => {
                debug!(
                    "Scrape job {}: {} candidates ({} dropped) from {} via {}",
                    self.job_id,
                    extraction.candidates.len(),
                    extraction.dropped,
                    url,
                    extraction.strategy
                );
                Some(PageEvent::Extracted { url, extraction })
            }
            Err(error) => Some(PageEvent::ExtractionFailed { url, error }),
        }
    }

    async fn fetch(&self, url: &Url) -> Result<FetchResult, FetchError> {
        let crawler = self.crawler;
        let _permit = crawler.politeness.acquire(&self.domain).await;
        crawler.politeness.wait_turn(&self.domain).await;

        let timeout = Duration::from_secs(crawler.config.request_timeout_secs.max(1));
        match tokio::time::timeout(timeout, crawler.fetcher.fetch(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(timeout)),
        }
    }

    fn enqueue_pagination(&mut self, page: &FetchResult) {
        let mut added = 0;
        for link in self.crawler.extractor.pagination_links(page) {
            if self.seen.insert(normalize_url(&link)) {
                self.queue.push_back(link);
                added += 1;
            }
        }
        if added > 0 {
            info!(
                "Scrape job {}: queued {} pagination links from {}",
                self.job_id, added, page.final_url
            );
        }
    }
}
