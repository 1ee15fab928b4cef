//! Crawl politeness shared by every worker
//!
//! robots.txt rules per host, a minimum gap between requests to one host
//! (with jitter), backoff after 429s and connection failures, and a cap on
//! concurrent requests per host.

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use rand::Rng;
use regex::Regex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use url::Url;

use super::fetcher::PageFetcher;
use crate::config::ScrapingConfig;

const ROBOTS_TTL: Duration = Duration::from_secs(24 * 3600);
const MISSING_ROBOTS_TTL: Duration = Duration::from_secs(3600);
/// Ceiling on a robots.txt Crawl-delay we are willing to honour
const MAX_CRAWL_DELAY: Duration = Duration::from_secs(60);
const MAX_429_BACKOFF: Duration = Duration::from_secs(600);
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Outcome of asking for a request slot on a host
#[derive(Debug, Clone, PartialEq)]
pub enum FetchDecision {
    /// The slot is reserved; fetch now
    Allowed,
    /// Too soon after the previous request
    WaitFor(Duration),
    /// Host is backing off after errors until the given instant
    RateLimited(Instant),
}

#[derive(Debug, Clone)]
struct Rule {
    allow: bool,
    /// Pattern length, used for longest-match precedence
    specificity: usize,
    matcher: Regex,
}

impl Rule {
    /// `*` matches any run of characters and a trailing `$` anchors the end
    fn compile(allow: bool, pattern: &str) -> Option<Self> {
        let (body, anchored) = match pattern.strip_suffix('$') {
            Some(body) => (body, true),
            None => (pattern, false),
        };
        let mut source = String::from("^");
        source.push_str(&body.split('*').map(regex::escape).collect::<Vec<_>>().join(".*"));
        if anchored {
            source.push('$');
        }
        Some(Self {
            allow,
            specificity: pattern.len(),
            matcher: Regex::new(&source).ok()?,
        })
    }
}

/// One `User-agent` group as written in the file
#[derive(Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
    crawl_delay: Option<Duration>,
}

/// Parsed robots.txt for one host, as it applies to our user agent
#[derive(Debug, Clone)]
pub struct RobotsRules {
    rules: Vec<Rule>,
    crawl_delay: Option<Duration>,
    expires_at: Instant,
}

impl RobotsRules {
    /// Rules from the group naming our product token, falling back to `*`
    pub fn parse(content: &str, user_agent: &str) -> Self {
        let token = user_agent
            .split(['/', ' '])
            .next()
            .unwrap_or(user_agent)
            .to_lowercase();

        let mut groups: Vec<Group> = Vec::new();
        let mut in_agent_lines = false;
        for raw in content.lines() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match field.trim().to_ascii_lowercase().as_str() {
                "user-agent" => {
                    // Consecutive User-agent lines share one group
                    if !in_agent_lines {
                        groups.push(Group::default());
                    }
                    in_agent_lines = true;
                    if let Some(group) = groups.last_mut() {
                        group.agents.push(value.to_lowercase());
                    }
                }
                field => {
                    in_agent_lines = false;
                    let Some(group) = groups.last_mut() else {
                        continue;
                    };
                    match field {
                        "allow" | "disallow" if !value.is_empty() => {
                            group.rules.extend(Rule::compile(field == "allow", value));
                        }
                        "crawl-delay" => {
                            group.crawl_delay = value
                                .parse::<f64>()
                                .ok()
                                .filter(|d| d.is_finite() && *d >= 0.0)
                                .map(Duration::from_secs_f64);
                        }
                        _ => {}
                    }
                }
            }
        }

        let names_us = |g: &&Group| g.agents.iter().any(|a| a != "*" && !a.is_empty() && token.contains(a.as_str()));
        let chosen = groups
            .iter()
            .find(names_us)
            .or_else(|| groups.iter().find(|g| g.agents.iter().any(|a| a == "*")));

        Self {
            rules: chosen.map(|g| g.rules.clone()).unwrap_or_default(),
            crawl_delay: chosen.and_then(|g| g.crawl_delay),
            expires_at: Instant::now() + ROBOTS_TTL,
        }
    }

    /// Used when robots.txt is missing or unreachable
    pub fn allow_all() -> Self {
        Self {
            rules: Vec::new(),
            crawl_delay: None,
            expires_at: Instant::now() + MISSING_ROBOTS_TTL,
        }
    }

    /// Longest matching rule decides; a tie goes to allow
    pub fn is_allowed(&self, path: &str) -> bool {
        self.rules
            .iter()
            .filter(|r| r.matcher.is_match(path))
            .max_by_key(|r| (r.specificity, r.allow))
            .map_or(true, |r| r.allow)
    }

    pub fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }

    pub fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay
    }
}

/// Request pacing for one host
#[derive(Debug, Clone)]
struct HostPace {
    /// Earliest start of the next request
    next_slot: Instant,
    backoff_until: Option<Instant>,
    consecutive_429s: u32,
    fetches: u64,
}

impl Default for HostPace {
    fn default() -> Self {
        Self {
            next_slot: Instant::now(),
            backoff_until: None,
            consecutive_429s: 0,
            fetches: 0,
        }
    }
}

/// Politeness state shared by the worker pool
pub struct PolitenessController {
    robots: Mutex<LruCache<String, RobotsRules>>,
    hosts: DashMap<String, HostPace>,
    permits: DashMap<String, Arc<Semaphore>>,
    config: ScrapingConfig,
}

impl PolitenessController {
    pub fn new(config: ScrapingConfig) -> Self {
        let capacity = NonZeroUsize::new(config.robots_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            robots: Mutex::new(LruCache::new(capacity)),
            hosts: DashMap::new(),
            permits: DashMap::new(),
            config,
        }
    }

    /// Configured gap for `host`, raised to its robots.txt Crawl-delay
    fn delay_for(&self, host: &str) -> Duration {
        let configured = Duration::from_millis(self.config.delay_ms_for(host));
        let requested = self
            .robots
            .lock()
            .peek(host)
            .and_then(RobotsRules::crawl_delay)
            .map_or(Duration::ZERO, |d| d.min(MAX_CRAWL_DELAY));
        configured.max(requested)
    }

    fn jitter_for(&self, host: &str) -> Duration {
        match self.config.jitter_ms_for(host) {
            0 => Duration::ZERO,
            max => Duration::from_millis(rand::thread_rng().gen_range(0..=max)),
        }
    }

    /// Reserve the next request slot on `host` if it is open.
    ///
    /// The check and the reservation happen under the host's map entry, so
    /// two workers never take the same slot.
    pub fn check_rate_limit(&self, host: &str) -> FetchDecision {
        let gap = self.delay_for(host);
        let now = Instant::now();
        let mut pace = self.hosts.entry(host.to_string()).or_default();

        let backoff = pace.backoff_until;
        match backoff {
            Some(until) if now < until => return FetchDecision::RateLimited(until),
            Some(_) => pace.backoff_until = None,
            None => {}
        }
        if now < pace.next_slot {
            return FetchDecision::WaitFor(pace.next_slot - now);
        }
        pace.next_slot = now + gap;
        pace.fetches += 1;
        FetchDecision::Allowed
    }

    /// Sleep until a slot on `host` is reserved
    pub async fn wait_turn(&self, host: &str) {
        loop {
            match self.check_rate_limit(host) {
                FetchDecision::Allowed => return,
                FetchDecision::WaitFor(d) => tokio::time::sleep(d + self.jitter_for(host)).await,
                FetchDecision::RateLimited(until) => {
                    tokio::time::sleep_until(tokio::time::Instant::from_std(until)).await
                }
            }
        }
    }

    /// One of the host's concurrent request permits
    pub async fn acquire(&self, host: &str) -> Option<OwnedSemaphorePermit> {
        let semaphore = self
            .permits
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_concurrent_for(host))))
            .clone();
        semaphore.acquire_owned().await.ok()
    }

    /// Whether robots.txt lets us fetch `url`. The host's robots.txt is
    /// fetched through `fetcher` on first use and cached.
    pub async fn is_allowed(&self, url: &Url, fetcher: &dyn PageFetcher) -> bool {
        if !self.config.respect_robots {
            return true;
        }
        let Some(host) = url.host_str() else {
            return false;
        };

        let cached = self.robots.lock().get(host).filter(|r| r.is_fresh()).cloned();
        let rules = match cached {
            Some(rules) => rules,
            None => {
                let rules = self.load_robots(url, fetcher).await;
                self.robots.lock().put(host.to_string(), rules.clone());
                rules
            }
        };

        let mut target = url.path().to_string();
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }
        rules.is_allowed(&target)
    }

    async fn load_robots(&self, url: &Url, fetcher: &dyn PageFetcher) -> RobotsRules {
        let Ok(robots_url) = url.join("/robots.txt") else {
            return RobotsRules::allow_all();
        };
        match fetcher.fetch(&robots_url).await {
            Ok(page) => RobotsRules::parse(&page.body, &self.config.user_agent),
            Err(e) => {
                tracing::debug!("No robots.txt at {} ({}), allowing all", robots_url, e);
                RobotsRules::allow_all()
            }
        }
    }

    pub fn record_success(&self, host: &str) {
        if let Some(mut pace) = self.hosts.get_mut(host) {
            pace.consecutive_429s = 0;
        }
    }

    /// Back off after a 429: `Retry-After` when given, otherwise 30s
    /// doubling per consecutive 429, capped at ten minutes
    pub fn record_429(&self, host: &str, retry_after: Option<Duration>) {
        let mut pace = self.hosts.entry(host.to_string()).or_default();
        pace.consecutive_429s += 1;
        let exponent = pace.consecutive_429s.clamp(1, 5) - 1;
        let backoff = retry_after.unwrap_or(Duration::from_secs(30 << exponent));
        pace.backoff_until = Some(Instant::now() + backoff.min(MAX_429_BACKOFF));
    }

    /// Short pause after a connection failure
    pub fn record_error(&self, host: &str) {
        let mut pace = self.hosts.entry(host.to_string()).or_default();
        pace.backoff_until = Some(Instant::now() + ERROR_BACKOFF);
    }

    pub fn stats(&self) -> PolitenessStats {
        let now = Instant::now();
        let mut stats = PolitenessStats {
            domains_tracked: self.hosts.len(),
            robots_cached: self.robots.lock().len(),
            ..Default::default()
        };
        for pace in self.hosts.iter() {
            stats.total_fetches += pace.fetches;
            if pace.backoff_until.is_some_and(|until| now < until) {
                stats.rate_limited_domains += 1;
            }
        }
        stats
    }
}

#[derive(Debug, Clone, Default)]
pub struct PolitenessStats {
    pub domains_tracked: usize,
    pub robots_cached: usize,
    pub rate_limited_domains: usize,
    pub total_fetches: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraping::fetcher::{FetchError, FetchResult};
    use async_trait::async_trait;

    const BOT: &str = "ShikshaSetu-Bot/1.0 (+https://shikshasetu.in/bot)";

    struct RobotsOnly(&'static str);

    #[async_trait]
    impl PageFetcher for RobotsOnly {
        async fn fetch(&self, url: &Url) -> Result<FetchResult, FetchError> {
            if url.path() == "/robots.txt" {
                Ok(FetchResult::html(url.clone(), self.0))
            } else {
                Err(FetchError::Status(404))
            }
        }
    }

    fn paced(delay_ms: u64) -> ScrapingConfig {
        ScrapingConfig {
            default_delay_ms: delay_ms,
            jitter_ms: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_named_group_replaces_wildcard() {
        let robots = RobotsRules::parse(
            "User-agent: *\nDisallow: /private/\nCrawl-delay: 2\n\n\
             User-agent: googlebot\nUser-agent: shikshasetu-bot\nDisallow: /admin/\nCrawl-delay: 1\n",
            BOT,
        );
        assert!(robots.is_allowed("/scholarships"));
        assert!(robots.is_allowed("/private/list"));
        assert!(!robots.is_allowed("/admin/settings"));
        assert_eq!(robots.crawl_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_wildcard_group_and_longest_match() {
        let robots = RobotsRules::parse(
            "# portal rules\nUser-agent: *\nDisallow: /private/\nAllow: /private/notices/\nDisallow: /*.pdf$\n",
            "SomeOtherBot",
        );
        assert!(!robots.is_allowed("/private/secret"));
        assert!(robots.is_allowed("/private/notices/2024"));
        assert!(!robots.is_allowed("/docs/guidelines.pdf"));
        assert!(robots.is_allowed("/docs/guidelines.pdf?download=1"));
        assert!(robots.is_allowed("/docs/guidelines.html"));
    }

    #[test]
    fn test_rule_patterns() {
        let rule = |p| Rule::compile(false, p).unwrap();
        assert!(rule("/admin/").matcher.is_match("/admin/test"));
        assert!(!rule("/admin/").matcher.is_match("/public/admin/"));
        assert!(rule("/images/*.jpg").matcher.is_match("/images/2024/cat.jpg"));
        assert!(rule("/page.html$").matcher.is_match("/page.html"));
        assert!(!rule("/page.html$").matcher.is_match("/page.html?query"));
        // Regex metacharacters in paths are literal
        assert!(!rule("/a.c").matcher.is_match("/abc"));
    }

    #[test]
    fn test_empty_robots_allows_everything() {
        let robots = RobotsRules::parse("", BOT);
        assert!(robots.is_allowed("/anything"));
        assert_eq!(robots.crawl_delay(), None);
        assert!(robots.is_fresh());
    }

    #[test]
    fn test_slot_is_reserved_per_host() {
        let controller = PolitenessController::new(paced(100));

        assert_eq!(controller.check_rate_limit("ugc.ac.in"), FetchDecision::Allowed);
        match controller.check_rate_limit("ugc.ac.in") {
            FetchDecision::WaitFor(d) => assert!(d > Duration::ZERO && d <= Duration::from_millis(100)),
            other => panic!("expected WaitFor, got {:?}", other),
        }
        assert_eq!(controller.check_rate_limit("aicte-india.org"), FetchDecision::Allowed);
        assert_eq!(controller.stats().total_fetches, 2);
    }

    #[test]
    fn test_per_source_delay_override() {
        let mut config = paced(100);
        config.sources.insert(
            "slow.gov.in".to_string(),
            crate::config::SourceConfig {
                delay_ms: Some(10_000),
                ..Default::default()
            },
        );
        let controller = PolitenessController::new(config);
        assert_eq!(controller.delay_for("slow.gov.in"), Duration::from_secs(10));
        assert_eq!(controller.delay_for("fast.org"), Duration::from_millis(100));
    }

    #[test]
    fn test_429_backs_off_until_success() {
        let controller = PolitenessController::new(paced(0));
        controller.record_429("ugc.ac.in", None);

        assert!(matches!(
            controller.check_rate_limit("ugc.ac.in"),
            FetchDecision::RateLimited(_)
        ));
        assert_eq!(controller.stats().rate_limited_domains, 1);

        controller.record_429("ugc.ac.in", Some(Duration::ZERO));
        assert_eq!(controller.check_rate_limit("ugc.ac.in"), FetchDecision::Allowed);
    }

    #[tokio::test]
    async fn test_concurrency_cap_per_host() {
        let mut config = paced(0);
        config.max_concurrent_per_domain = 1;
        let controller = PolitenessController::new(config);

        let first = controller.acquire("ugc.ac.in").await;
        assert!(first.is_some());
        let blocked = tokio::time::timeout(Duration::from_millis(50), controller.acquire("ugc.ac.in")).await;
        assert!(blocked.is_err(), "second permit should wait while the first is held");

        drop(first);
        let next = tokio::time::timeout(Duration::from_millis(50), controller.acquire("ugc.ac.in")).await;
        assert!(matches!(next, Ok(Some(_))));
    }

    #[tokio::test]
    async fn test_robots_fetched_once_per_host() {
        let controller = PolitenessController::new(paced(0));
        let fetcher = RobotsOnly("User-agent: *\nDisallow: /private/\n");

        let open = Url::parse("https://example.org/list").unwrap();
        let closed = Url::parse("https://example.org/private/list").unwrap();
        assert!(controller.is_allowed(&open, &fetcher).await);
        assert!(!controller.is_allowed(&closed, &fetcher).await);
        assert_eq!(controller.stats().robots_cached, 1);
    }

    #[tokio::test]
    async fn test_missing_robots_allows_all() {
        struct Nothing;
        #[async_trait]
        impl PageFetcher for Nothing {
            async fn fetch(&self, _url: &Url) -> Result<FetchResult, FetchError> {
                Err(FetchError::Status(404))
            }
        }
        let controller = PolitenessController::new(paced(0));
        let url = Url::parse("https://example.org/anything").unwrap();
        assert!(controller.is_allowed(&url, &Nothing).await);
    }
}
