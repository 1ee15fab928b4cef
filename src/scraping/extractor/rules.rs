//! Selector rule sets
//!
//! A [`RuleExtractor`] compiles one [`SelectorRules`] set and turns every
//! matching item element into a candidate. Built-in rule sets cover the
//! major Indian scholarship portals; config rule sets replace them.

use scraper::{Html, Selector};
use url::Url;

use super::text::{element_text, parse_selector, select_link, select_text};
use super::types::ExtractionError;
use crate::config::SelectorRules;

/// Generic item selectors tried on any site before the heuristic fallback
pub fn generic_rules() -> SelectorRules {
    SelectorRules {
        item: ".scholarship-item, .scholarship-card, .scholarship, .scheme-item, .grant-item, .fellowship-item, article.scholarship".to_string(),
        title: "h1, h2, h3, h4, .title, .scholarship-title, a".to_string(),
        description: Some(".description, .summary, .excerpt, p".to_string()),
        amount: Some(".amount, .award, .scholarship-amount, .value".to_string()),
        deadline: Some(".deadline, .last-date, .closing-date, .due-date".to_string()),
        eligibility: Some(".eligibility, .eligibility-criteria, .criteria".to_string()),
        application_url: Some("a.apply, a.apply-link, a.apply-now, a[href*='apply'], a".to_string()),
        provider: Some(".provider, .ministry, .organization, .sponsor".to_string()),
        next_page: None,
    }
}

/// Built-in rule set for a known portal
pub fn builtin_rules(domain: &str) -> Option<SelectorRules> {
    let domain = domain.strip_prefix("www.").unwrap_or(domain);
    let rules = match domain {
        "scholarships.gov.in" => SelectorRules {
            item: ".scholarship-item, .scheme-card, .scheme-list li".to_string(),
            title: ".scheme-title, .card-title, h3, h4".to_string(),
            description: Some(".scheme-desc, .description, p".to_string()),
            amount: Some(".amount, .scholarship-amount".to_string()),
            deadline: Some(".last-date, .deadline".to_string()),
            eligibility: Some(".eligibility".to_string()),
            application_url: Some("a.apply-link, a[href*='apply'], a".to_string()),
            provider: Some(".ministry, .department".to_string()),
            next_page: Some(".pagination a.next, a[rel='next']".to_string()),
        },
        "buddy4study.com" => SelectorRules {
            item: ".scholarship-card, .listing-item".to_string(),
            title: ".scholarship-title, h2, h3".to_string(),
            description: Some(".scholarship-desc, .summary".to_string()),
            amount: Some(".award, .scholarship-amount".to_string()),
            deadline: Some(".deadline, .last-date".to_string()),
            eligibility: Some(".eligibility-text, .eligibility".to_string()),
            application_url: Some("a.apply-now, a".to_string()),
            provider: Some(".provider-name".to_string()),
            next_page: Some(".pagination a.next, a[rel='next']".to_string()),
        },
        "aicte-india.org" => SelectorRules {
            item: ".scheme-item, .views-row".to_string(),
            title: ".scheme-name, .views-field-title, h3".to_string(),
            description: Some(".scheme-details, .views-field-body, p".to_string()),
            amount: Some(".amount".to_string()),
            deadline: Some(".deadline, .views-field-field-last-date".to_string()),
            eligibility: Some(".eligibility".to_string()),
            application_url: Some("a[href*='apply'], a".to_string()),
            provider: None,
            next_page: Some(".pager__item--next a, a[rel='next']".to_string()),
        },
        "ugc.ac.in" => SelectorRules {
            item: ".scheme-list li, .views-row".to_string(),
            title: "a, h3, strong".to_string(),
            description: Some("p, .description".to_string()),
            amount: Some(".amount".to_string()),
            deadline: Some(".deadline, .last-date".to_string()),
            eligibility: Some(".eligibility".to_string()),
            application_url: Some("a".to_string()),
            provider: None,
            next_page: Some(".pager-next a, a[rel='next']".to_string()),
        },
        _ => return None,
    };
    Some(rules)
}

/// Raw fields of one item before they become a candidate
#[derive(Debug, Clone, Default)]
pub(crate) struct RawItem {
    pub title: Option<String>,
    pub description: Option<String>,
    pub amount: Option<String>,
    pub deadline: Option<String>,
    pub eligibility: Option<String>,
    pub application_url: Option<String>,
    pub provider: Option<String>,
    pub full_text: String,
}

/// Compiled selector rule set
pub struct RuleExtractor {
    name: String,
    item: Selector,
    title: Selector,
    description: Option<Selector>,
    amount: Option<Selector>,
    deadline: Option<Selector>,
    eligibility: Option<Selector>,
    application_url: Option<Selector>,
    provider: Option<Selector>,
}

fn compile(css: &Option<String>) -> Result<Option<Selector>, ExtractionError> {
    css.as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(parse_selector)
        .transpose()
}

impl RuleExtractor {
    pub fn new(name: impl Into<String>, rules: &SelectorRules) -> Result<Self, ExtractionError> {
        Ok(Self {
            name: name.into(),
            item: parse_selector(&rules.item)?,
            title: parse_selector(&rules.title)?,
            description: compile(&rules.description)?,
            amount: compile(&rules.amount)?,
            deadline: compile(&rules.deadline)?,
            eligibility: compile(&rules.eligibility)?,
            application_url: compile(&rules.application_url)?,
            provider: compile(&rules.provider)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pull raw field text for every item on the page
    pub(crate) fn raw_items(&self, document: &Html, base: &Url) -> Vec<RawItem> {
        document
            .select(&self.item)
            .map(|item| {
                let full_text = element_text(&item);
                let title = select_text(&item, Some(&self.title));
                let description = select_text(&item, self.description.as_ref())
                    .filter(|d| Some(d) != title.as_ref());
                RawItem {
                    title,
                    description,
                    amount: select_text(&item, self.amount.as_ref()),
                    deadline: select_text(&item, self.deadline.as_ref()),
                    eligibility: select_text(&item, self.eligibility.as_ref()),
                    application_url: select_link(&item, self.application_url.as_ref(), base),
                    provider: select_text(&item, self.provider.as_ref()),
                    full_text,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NSP_PAGE: &str = r#"
        <html><body>
          <ul class="scheme-list">
            <li>
              <h3 class="scheme-title">Post Matric Scholarship for Minorities</h3>
              <p class="scheme-desc">Financial assistance to meritorious students from minority communities.</p>
              <span class="amount">Rs. 10,000 per annum</span>
              <span class="last-date">31/10/2025</span>
              <div class="eligibility">Family income below Rs. 2 lakh per annum</div>
              <span class="ministry">Ministry of Minority Affairs</span>
              <a class="apply-link" href="/apply/pms-minority">Apply</a>
            </li>
            <li>
              <h3 class="scheme-title">Central Sector Scheme of Scholarship</h3>
              <p class="scheme-desc">For college and university students above 80th percentile.</p>
            </li>
          </ul>
        </body></html>
    "#;

    #[test]
    fn test_builtin_rules_lookup() {
        assert!(builtin_rules("scholarships.gov.in").is_some());
        assert!(builtin_rules("www.buddy4study.com").is_some());
        assert!(builtin_rules("example.org").is_none());
    }

    #[test]
    fn test_all_builtin_rules_compile() {
        for domain in ["scholarships.gov.in", "buddy4study.com", "aicte-india.org", "ugc.ac.in"] {
            let rules = builtin_rules(domain).unwrap();
            assert!(RuleExtractor::new(domain, &rules).is_ok(), "{} rules should compile", domain);
        }
        assert!(RuleExtractor::new("generic", &generic_rules()).is_ok());
    }

    #[test]
    fn test_raw_items_from_rule_set() {
        let extractor = RuleExtractor::new("nsp", &builtin_rules("scholarships.gov.in").unwrap()).unwrap();
        let doc = Html::parse_document(NSP_PAGE);
        let base = Url::parse("https://scholarships.gov.in/schemes").unwrap();
        let items = extractor.raw_items(&doc, &base);

        assert_eq!(items.len(), 2);
        let first = &items[0];
        assert_eq!(first.title.as_deref(), Some("Post Matric Scholarship for Minorities"));
        assert_eq!(first.amount.as_deref(), Some("Rs. 10,000 per annum"));
        assert_eq!(first.deadline.as_deref(), Some("31/10/2025"));
        assert_eq!(first.provider.as_deref(), Some("Ministry of Minority Affairs"));
        assert_eq!(
            first.application_url.as_deref(),
            Some("https://scholarships.gov.in/apply/pms-minority")
        );
        assert!(items[1].amount.is_none());
    }

    #[test]
    fn test_invalid_selector_is_reported() {
        let rules = SelectorRules {
            item: "div[[".to_string(),
            title: "h3".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            RuleExtractor::new("bad", &rules),
            Err(ExtractionError::InvalidSelector(_))
        ));
    }
}
