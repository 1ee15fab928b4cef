//! Scholarship extraction from fetched pages
//!
//! Each source plugs in as an [`Extractor`] strategy. For a page the
//! [`ContentExtractor`] tries, in order:
//! 1. the rule set registered for the page's domain (config or built-in),
//! 2. generic scholarship item selectors,
//! 3. the heuristic fallback with a [`TextClassifier`].
//!
//! The first strategy that finds anything wins.

mod classify;
mod heuristic;
mod rules;
mod tags;
mod text;
mod types;

pub use classify::{from_config as classifier_from_config, HttpClassifier, KeywordClassifier, TextClassifier};
pub use rules::{builtin_rules, generic_rules, RuleExtractor};
pub use types::*;

use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::fetcher::FetchResult;
use super::normalize_url;
use crate::config::{ExtractionConfig, ScrapingConfig};
use crate::types::{CandidateRecord, JobId};
use heuristic::{collect_blocks, eligibility_from_text};
use text::{collapse_whitespace, parse_selector};

/// A per-source extraction strategy
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, page: &FetchResult, job_id: JobId) -> Result<Extraction, ExtractionError>;
}

/// Fields gathered by a strategy, before cleaning
#[derive(Debug, Default)]
struct Fields {
    title: Option<String>,
    description: Option<String>,
    amount: Option<String>,
    deadline: Option<String>,
    eligibility: Option<String>,
    application_url: Option<String>,
    provider: Option<String>,
    full_text: String,
}

/// Turn raw fields into a candidate, or `None` when the title or
/// description is too short to be useful.
fn build_candidate(fields: Fields, config: &ExtractionConfig, page: &Url, job_id: JobId) -> Option<CandidateRecord> {
    let title = collapse_whitespace(fields.title.as_deref().unwrap_or(""));
    let description = collapse_whitespace(fields.description.as_deref().unwrap_or(&fields.full_text));
    if title.chars().count() < config.min_title_len || description.chars().count() < config.min_description_len {
        return None;
    }

    let eligibility = fields
        .eligibility
        .filter(|e| !e.trim().is_empty())
        .or_else(|| eligibility_from_text(&fields.full_text));
    let classify_text = format!(
        "{} {} {}",
        title,
        description,
        eligibility.as_deref().unwrap_or("")
    );

    let mut candidate = CandidateRecord::new(title, page.as_str(), job_id);
    candidate.description = description;
    candidate.raw_amount = fields.amount.filter(|a| !a.trim().is_empty());
    candidate.raw_deadline = fields.deadline.filter(|d| !d.trim().is_empty());
    candidate.eligibility = eligibility;
    candidate.application_url = fields.application_url;
    candidate.provider = fields.provider.filter(|p| !p.trim().is_empty());
    candidate.category = tags::category(&classify_text);
    candidate.level = tags::level(&classify_text);
    candidate.tags = tags::tags(&classify_text);
    Some(candidate)
}

/// Strategy backed by a CSS selector rule set
pub struct SelectorExtractor {
    rules: RuleExtractor,
    config: ExtractionConfig,
}

impl SelectorExtractor {
    pub fn new(rules: RuleExtractor, config: ExtractionConfig) -> Self {
        Self { rules, config }
    }

    fn extract_sync(&self, page: &FetchResult, job_id: JobId) -> Extraction {
        let document = Html::parse_document(&page.body);
        let items = self.rules.raw_items(&document, &page.final_url);
        let mut extraction = Extraction {
            strategy: self.rules.name().to_string(),
            ..Default::default()
        };
        for item in items {
            let fields = Fields {
                title: item.title,
                description: item.description,
                amount: item.amount,
                deadline: item.deadline,
                eligibility: item.eligibility,
                application_url: item.application_url,
                provider: item.provider,
                full_text: item.full_text,
            };
            match build_candidate(fields, &self.config, &page.final_url, job_id) {
                Some(c) => extraction.candidates.push(c),
                None => extraction.dropped += 1,
            }
        }
        extraction
    }
}

#[async_trait]
impl Extractor for SelectorExtractor {
    fn name(&self) -> &str {
        self.rules.name()
    }

    async fn extract(&self, page: &FetchResult, job_id: JobId) -> Result<Extraction, ExtractionError> {
        let extraction = self.extract_sync(page, job_id);
        if extraction.candidates.is_empty() && extraction.dropped == 0 {
            return Err(ExtractionError::NoMatches {
                strategy: self.name().to_string(),
            });
        }
        Ok(extraction)
    }
}

/// Strategy for unstructured pages: structural blocks plus classification
pub struct HeuristicExtractor {
    classifier: Box<dyn TextClassifier>,
    config: ExtractionConfig,
}

impl HeuristicExtractor {
    pub fn new(classifier: Box<dyn TextClassifier>, config: ExtractionConfig) -> Self {
        Self { classifier, config }
    }
}

#[async_trait]
impl Extractor for HeuristicExtractor {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn extract(&self, page: &FetchResult, job_id: JobId) -> Result<Extraction, ExtractionError> {
        // The parsed DOM is not Send, so it must be gone before any await
        let blocks = {
            let document = Html::parse_document(&page.body);
            collect_blocks(&document, &page.final_url, self.config.min_block_len)
        };

        let mut extraction = Extraction {
            strategy: format!("heuristic/{}", self.classifier.name()),
            ..Default::default()
        };
        for block in blocks {
            let verdict = self.classifier.classify(&block.text).await?;
            if !verdict.is_scholarship {
                continue;
            }
            debug!(
                "Heuristic block accepted (confidence {:.2}): {:?}",
                verdict.confidence, block.heading
            );
            let fields = Fields {
                title: block.heading,
                description: Some(block.text.clone()),
                application_url: block.links.into_iter().next(),
                full_text: block.text,
                ..Default::default()
            };
            match build_candidate(fields, &self.config, &page.final_url, job_id) {
                Some(c) => extraction.candidates.push(c),
                None => extraction.dropped += 1,
            }
        }

        if extraction.candidates.is_empty() && extraction.dropped == 0 {
            return Err(ExtractionError::NoMatches {
                strategy: extraction.strategy,
            });
        }
        Ok(extraction)
    }
}

const DEFAULT_PAGINATION: &str =
    "a[rel='next'], .pagination a, .pager a, a.next, li.next a, .page-numbers a, a.page-link";

/// Strategy registry and pagination discovery
pub struct ContentExtractor {
    sources: HashMap<String, Arc<dyn Extractor>>,
    next_page: HashMap<String, Selector>,
    generic: Arc<dyn Extractor>,
    heuristic: Arc<dyn Extractor>,
    default_pagination: Selector,
}

impl ContentExtractor {
    /// Build the registry from built-in rule sets, config rule sets and the
    /// configured classifier.
    pub fn from_config(scraping: &ScrapingConfig, extraction: &ExtractionConfig) -> Result<Self, ExtractionError> {
        let classifier = classifier_from_config(&extraction.classifier);
        let mut this = Self {
            sources: HashMap::new(),
            next_page: HashMap::new(),
            generic: Arc::new(SelectorExtractor::new(
                RuleExtractor::new("generic", &generic_rules())?,
                extraction.clone(),
            )),
            heuristic: Arc::new(HeuristicExtractor::new(classifier, extraction.clone())),
            default_pagination: parse_selector(DEFAULT_PAGINATION)?,
        };

        for domain in ["scholarships.gov.in", "buddy4study.com", "aicte-india.org", "ugc.ac.in"] {
            if let Some(rules) = builtin_rules(domain) {
                this.register_rules(domain, &rules, extraction)?;
            }
        }
        for (domain, source) in &scraping.sources {
            if let Some(rules) = &source.rules {
                this.register_rules(domain, rules, extraction)?;
            }
        }
        Ok(this)
    }

    fn register_rules(
        &mut self,
        domain: &str,
        rules: &crate::config::SelectorRules,
        extraction: &ExtractionConfig,
    ) -> Result<(), ExtractionError> {
        let extractor = SelectorExtractor::new(RuleExtractor::new(domain, rules)?, extraction.clone());
        let next_page = match &rules.next_page {
            Some(css) if !css.trim().is_empty() => Some(parse_selector(css)?),
            _ => None,
        };
        self.register(domain, Arc::new(extractor), next_page);
        Ok(())
    }

    /// Plug in a strategy for `domain`, replacing any existing one
    pub fn register(&mut self, domain: &str, extractor: Arc<dyn Extractor>, next_page: Option<Selector>) {
        let domain = domain.strip_prefix("www.").unwrap_or(domain).to_string();
        match next_page {
            Some(sel) => {
                self.next_page.insert(domain.clone(), sel);
            }
            None => {
                self.next_page.remove(&domain);
            }
        }
        self.sources.insert(domain, extractor);
    }

    fn lookup<'a, T>(map: &'a HashMap<String, T>, host: &str) -> Option<&'a T> {
        let host = host.strip_prefix("www.").unwrap_or(host);
        map.get(host).or_else(|| {
            map.iter()
                .find(|(domain, _)| host.ends_with(&format!(".{}", domain)))
                .map(|(_, v)| v)
        })
    }

    /// Strategies tried for a page on `host`, in order
    pub fn strategies_for(&self, host: &str) -> Vec<Arc<dyn Extractor>> {
        let mut chain = Vec::with_capacity(3);
        if let Some(source) = Self::lookup(&self.sources, host) {
            chain.push(source.clone());
        }
        chain.push(self.generic.clone());
        chain.push(self.heuristic.clone());
        chain
    }

    /// Extract candidates from a fetched page
    pub async fn extract(&self, page: &FetchResult, job_id: JobId) -> Result<Extraction, ExtractionError> {
        if !page.is_html() {
            return Err(ExtractionError::NotHtml(page.content_type.clone()));
        }
        if page.body.trim().is_empty() {
            return Err(ExtractionError::EmptyPage);
        }

        let host = page.final_url.host_str().unwrap_or_default();
        let mut tried = Vec::new();
        for strategy in self.strategies_for(host) {
            match strategy.extract(page, job_id).await {
                Ok(extraction) => return Ok(extraction),
                Err(ExtractionError::NoMatches { strategy }) => tried.push(strategy),
                Err(e) => {
                    debug!("Strategy {} failed on {}: {}", strategy.name(), page.final_url, e);
                    tried.push(strategy.name().to_string());
                }
            }
        }

        if page.needs_js_rendering() {
            return Err(ExtractionError::NeedsJavaScript);
        }
        Err(ExtractionError::NoMatches {
            strategy: tried.join(", "),
        })
    }

    /// Pagination links on a page, same host only, in document order
    pub fn pagination_links(&self, page: &FetchResult) -> Vec<Url> {
        let base = &page.final_url;
        let host = base.host_str().unwrap_or_default();
        let document = Html::parse_document(&page.body);

        let mut selectors: Vec<&Selector> = Vec::with_capacity(2);
        if let Some(sel) = Self::lookup(&self.next_page, host) {
            selectors.push(sel);
        }
        selectors.push(&self.default_pagination);

        let current = normalize_url(base);
        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for selector in selectors {
            for element in document.select(selector) {
                let Some(href) = element.value().attr("href") else {
                    continue;
                };
                let Ok(url) = base.join(href.trim()) else {
                    continue;
                };
                if url.host_str() != Some(host) || !matches!(url.scheme(), "http" | "https") {
                    continue;
                }
                let key = normalize_url(&url);
                if key != current && seen.insert(key) {
                    links.push(url);
                }
            }
        }
        links
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn extractor() -> ContentExtractor {
        ContentExtractor::from_config(&ScrapingConfig::default(), &ExtractionConfig::default()).unwrap()
    }

    fn page(url: &str, body: &str) -> FetchResult {
        FetchResult::html(Url::parse(url).unwrap(), body)
    }

    const BUDDY_PAGE: &str = r#"
        <html><body>
          <div class="scholarship-card">
            <h2 class="scholarship-title">HDFC Badhte Kadam Scholarship 2025</h2>
            <div class="summary">Support for students from economically weaker sections pursuing graduation.</div>
            <span class="award">Up to ₹1,00,000</span>
            <span class="deadline">15-Nov-2025</span>
            <div class="eligibility">Students of class 12 and graduation with family income below 6 lakh.</div>
            <a class="apply-now" href="https://www.buddy4study.com/page/hdfc-badhte-kadam">Apply Now</a>
          </div>
          <div class="scholarship-card">
            <h2 class="scholarship-title">Short</h2>
            <div class="summary">Too short to keep.</div>
          </div>
          <ul class="pagination">
            <li><a href="?page=1">1</a></li>
            <li><a href="?page=2">2</a></li>
            <li><a class="next" href="?page=2">Next</a></li>
            <li><a href="https://elsewhere.org/?page=3">3</a></li>
          </ul>
        </body></html>
    "#;

    #[tokio::test]
    async fn test_source_rules_take_precedence() {
        let page = page("https://www.buddy4study.com/scholarships?page=1", BUDDY_PAGE);
        let result = extractor().extract(&page, Uuid::nil()).await.unwrap();

        assert_eq!(result.strategy, "buddy4study.com");
        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.dropped, 1);

        let c = &result.candidates[0];
        assert_eq!(c.title, "HDFC Badhte Kadam Scholarship 2025");
        assert_eq!(c.raw_amount.as_deref(), Some("Up to ₹1,00,000"));
        assert_eq!(c.raw_deadline.as_deref(), Some("15-Nov-2025"));
        assert_eq!(
            c.application_url.as_deref(),
            Some("https://www.buddy4study.com/page/hdfc-badhte-kadam")
        );
        assert_eq!(c.category.as_deref(), Some("need-based"));
        assert_eq!(c.source_url, "https://www.buddy4study.com/scholarships?page=1");
    }

    #[tokio::test]
    async fn test_generic_selectors_on_unknown_site() {
        let body = r#"
            <div class="scholarship-item">
              <h3>Kishore Vaigyanik Protsahan Yojana</h3>
              <p>Fellowship for students of basic sciences with a monthly stipend.</p>
              <span class="amount">Rs. 7,000 per month</span>
            </div>
        "#;
        let result = extractor()
            .extract(&page("https://kvpy.example.org/", body), Uuid::nil())
            .await
            .unwrap();
        assert_eq!(result.strategy, "generic");
        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].raw_amount.as_deref(), Some("Rs. 7,000 per month"));
    }

    #[tokio::test]
    async fn test_heuristic_fallback() {
        let body = r#"
            <html><body><div class="content"><section>
              <h4>District Merit Scholarship for Rural Students</h4>
              <p>This scholarship scheme supports rural students who apply after class 12.
              Eligibility: students from rural schools with 75% marks. Amount Rs 15,000 per annum.</p>
            </section></div></body></html>
        "#;
        let result = extractor()
            .extract(&page("https://district.example.in/notices", body), Uuid::nil())
            .await
            .unwrap();
        assert_eq!(result.strategy, "heuristic/keyword");
        assert_eq!(result.candidates.len(), 1);
        let c = &result.candidates[0];
        assert_eq!(c.title, "District Merit Scholarship for Rural Students");
        assert_eq!(c.eligibility.as_deref(), Some("students from rural schools with 75% marks"));
    }

    #[tokio::test]
    async fn test_page_without_scholarships_is_an_error() {
        let body = "<html><body><p>About our department and its history.</p></body></html>";
        let err = extractor()
            .extract(&page("https://example.org/about", body), Uuid::nil())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::NoMatches { .. }));
    }

    #[tokio::test]
    async fn test_non_html_is_rejected() {
        let mut p = page("https://example.org/robots.txt", "User-agent: *");
        p.content_type = "text/plain".to_string();
        assert!(matches!(
            extractor().extract(&p, Uuid::nil()).await,
            Err(ExtractionError::NotHtml(_))
        ));
    }

    #[test]
    fn test_pagination_links_same_host_in_order() {
        let page = page("https://www.buddy4study.com/scholarships?page=1", BUDDY_PAGE);
        let links = extractor().pagination_links(&page);
        let as_str: Vec<&str> = links.iter().map(|u| u.as_str()).collect();
        assert_eq!(as_str, vec!["https://www.buddy4study.com/scholarships?page=2"]);
    }

    struct Fixed;

    #[async_trait]
    impl Extractor for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn extract(&self, page: &FetchResult, job_id: JobId) -> Result<Extraction, ExtractionError> {
            Ok(Extraction {
                candidates: vec![CandidateRecord::new("Fixed Scholarship Title", page.final_url.as_str(), job_id)],
                dropped: 0,
                strategy: "fixed".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_registered_strategy_plugs_in() {
        let mut ex = extractor();
        ex.register("portal.example.in", Arc::new(Fixed), None);
        let result = ex
            .extract(&page("https://www.portal.example.in/x", "<p>x</p>"), Uuid::nil())
            .await
            .unwrap();
        assert_eq!(result.strategy, "fixed");
    }
}
