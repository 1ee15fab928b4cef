//! DOM text helpers shared by the extraction strategies

use scraper::{ElementRef, Selector};
use url::Url;

use super::types::ExtractionError;

/// Visible text of an element with whitespace collapsed
pub(crate) fn element_text(element: &ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

pub(crate) fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn parse_selector(css: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(css).map_err(|_| ExtractionError::InvalidSelector(css.to_string()))
}

/// Text of the first non-empty match of `selector` inside `element`
pub(crate) fn select_text(element: &ElementRef<'_>, selector: Option<&Selector>) -> Option<String> {
    let selector = selector?;
    element
        .select(selector)
        .map(|e| element_text(&e))
        .find(|t| !t.is_empty())
}

/// Absolute http(s) URL of the first link matched by `selector`
pub(crate) fn select_link(element: &ElementRef<'_>, selector: Option<&Selector>, base: &Url) -> Option<String> {
    let selector = selector?;
    let mut candidates = element.select(selector);
    let from_matches = candidates.find_map(|e| resolve_href(&e, base));
    // The item itself may be the link
    from_matches.or_else(|| {
        if element.value().name() == "a" {
            resolve_href(element, base)
        } else {
            None
        }
    })
}

pub(crate) fn resolve_href(element: &ElementRef<'_>, base: &Url) -> Option<String> {
    let href = element.value().attr("href")?.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:") {
        return None;
    }
    let url = base.join(href).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}
