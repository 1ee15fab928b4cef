//! Page fetching
//!
//! [`PageFetcher`] is the seam the crawler fetches through. [`FetchEngine`]
//! is the HTTP implementation; tests substitute in-memory fetchers.

use async_trait::async_trait;
use std::error::Error as StdError;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

use crate::config::ScrapingConfig;

/// Why a page could not be fetched
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Timeout after {0:?}")]
    Timeout(Duration),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("TLS failure: {0}")]
    Tls(String),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("Rate limited, retry after {0:?}")]
    RateLimited(Option<Duration>),
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),
    #[error("Content too large: {0} bytes")]
    ContentTooLarge(usize),
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),
}

impl FetchError {
    /// Map a reqwest error onto the fetch taxonomy
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            return FetchError::Timeout(timeout);
        }
        if let Some(status) = err.status() {
            return FetchError::Status(status.as_u16());
        }
        if err.is_connect() || err.is_request() {
            let chain = error_chain(&err);
            if is_tls_message(&chain) {
                return FetchError::Tls(chain);
            }
            if err.is_connect() {
                return FetchError::Connect(chain);
            }
        }
        FetchError::Http(err)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout(_))
    }

    /// Transient failures worth one more attempt
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout(_) | FetchError::Connect(_) | FetchError::Http(_)
        )
    }
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

fn is_tls_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["certificate", "tls", "ssl", "handshake", "unknownissuer"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Body of a listing page after redirects
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Where the redirect chain ended; relative links resolve against this
    pub final_url: Url,
    pub body: String,
    pub content_type: String,
}

const JS_SHELL_MARKERS: &[&str] = &[
    "window.__NEXT_DATA__",
    "window.__NUXT__",
    "ng-app",
    "<div id=\"root\"></div>",
    "<div id=\"app\"></div>",
];

impl FetchResult {
    pub fn html(url: Url, body: impl Into<String>) -> Self {
        Self {
            final_url: url,
            body: body.into(),
            content_type: "text/html".to_string(),
        }
    }

    pub fn is_html(&self) -> bool {
        is_markup(&self.content_type)
    }

    /// Whether the page is an empty client-rendered shell whose listings
    /// never reach a plain HTTP fetch
    pub fn needs_js_rendering(&self) -> bool {
        if !self.is_html() {
            return false;
        }
        let body = self.body.as_str();
        let placeholder = body.len() < 5000 && (body.contains("Loading...") || body.contains("Please wait"));
        visible_text_ratio(body) < 0.05 || placeholder || JS_SHELL_MARKERS.iter().any(|m| body.contains(m))
    }
}

fn is_markup(content_type: &str) -> bool {
    content_type.contains("text/html") || content_type.contains("application/xhtml")
}

/// Share of the document's bytes that are non-whitespace text outside tags
fn visible_text_ratio(html: &str) -> f32 {
    if html.is_empty() {
        return 0.0;
    }
    let (text, _) = html.chars().fold((0usize, false), |(text, in_tag), c| match c {
        '<' => (text, true),
        '>' => (text, false),
        c if !in_tag && !c.is_whitespace() => (text + 1, in_tag),
        _ => (text, in_tag),
    });
    text as f32 / html.len() as f32
}

/// Source of page content for the crawler
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchResult, FetchError>;
}

/// Configuration for the HTTP fetch engine
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_content_size: usize,
    pub max_redirects: usize,
}

impl From<&ScrapingConfig> for FetchConfig {
    fn from(config: &ScrapingConfig) -> Self {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        Self {
            user_agent: config.user_agent.clone(),
            timeout,
            connect_timeout: timeout.min(Duration::from_secs(10)),
            max_content_size: config.max_content_size,
            max_redirects: 10,
        }
    }
}

/// reqwest-backed page fetcher
pub struct FetchEngine {
    http_client: reqwest::Client,
    config: FetchConfig,
}

impl FetchEngine {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(&config.user_agent)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| FetchError::from_reqwest(e, config.timeout))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    fn check_size(&self, len: usize) -> Result<(), FetchError> {
        if len > self.config.max_content_size {
            return Err(FetchError::ContentTooLarge(len));
        }
        Ok(())
    }
}

fn header<'a>(response: &'a reqwest::Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

/// `Retry-After` in its delta-seconds form; HTTP dates are ignored
fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    header(response, "retry-after")?.trim().parse().ok().map(Duration::from_secs)
}

#[async_trait]
impl PageFetcher for FetchEngine {
    async fn fetch(&self, url: &Url) -> Result<FetchResult, FetchError> {
        let timeout = self.config.timeout;
        let started = Instant::now();
        let response = self
            .http_client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, timeout))?;

        match response.status().as_u16() {
            429 => return Err(FetchError::RateLimited(retry_after(&response))),
            code if !(200..300).contains(&code) => return Err(FetchError::Status(code)),
            _ => {}
        }

        // Some portals omit the header on listing pages
        let content_type = header(&response, "content-type").unwrap_or("text/html").to_string();
        if !is_markup(&content_type) && !content_type.contains("text/plain") {
            return Err(FetchError::InvalidContentType(content_type));
        }
        if let Some(len) = response.content_length() {
            self.check_size(usize::try_from(len).unwrap_or(usize::MAX))?;
        }

        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(e, timeout))?;
        self.check_size(body.len())?;

        tracing::trace!("Fetched {} ({} bytes) in {:?}", final_url, body.len(), started.elapsed());
        Ok(FetchResult {
            final_url,
            body,
            content_type,
        })
    }
}
