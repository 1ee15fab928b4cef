//! Heuristic fallback for pages without a matching rule set
//!
//! Collects text blocks that look structurally like listings (class or id
//! naming scholarship words, or list/article/table containers), keeps the
//! innermost ones, and lets a [`TextClassifier`] decide which describe a
//! scholarship.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;
use url::Url;

use super::text::{element_text, resolve_href};
use super::types::Block;

fn keyword_attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)scholarship|scheme|grant|award|fellowship").expect("attr regex is valid"))
}

fn eligibility_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)eligib(?:ility|le)\s*(?:criteria)?\s*[:\-]?\s*([^.\n]{10,300})")
            .expect("eligibility regex is valid")
    })
}

/// Sentence after an "Eligibility:" marker
pub(crate) fn eligibility_from_text(text: &str) -> Option<String> {
    eligibility_regex()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// First sentence of a block, used as a title when no heading exists
fn first_sentence(text: &str) -> Option<String> {
    let end = text.find(['.', '!', '?', '\n']).unwrap_or(text.len());
    let sentence = text[..end].trim();
    if sentence.is_empty() || sentence.chars().count() > 120 {
        None
    } else {
        Some(sentence.to_string())
    }
}

fn structural_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("div, section, article, li, tr").expect("structural selector is valid"))
}

fn heading_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("h1, h2, h3, h4, h5, strong, b").expect("heading selector is valid"))
}

fn link_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("a[href]").expect("link selector is valid"))
}

fn has_keyword_attr(element: &ElementRef<'_>) -> bool {
    let value = element.value();
    let class = value.attr("class").unwrap_or("");
    let id = value.attr("id").unwrap_or("");
    keyword_attr_regex().is_match(class) || keyword_attr_regex().is_match(id)
}

fn is_listing_container(element: &ElementRef<'_>) -> bool {
    matches!(element.value().name(), "article" | "li" | "tr" | "section")
}

/// Collect candidate blocks from a parsed page.
///
/// Blocks shorter than `min_len` are skipped, as are blocks that merely wrap
/// another collected block.
pub(crate) fn collect_blocks(document: &Html, base: &Url, min_len: usize) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();

    for element in document.select(structural_selector()) {
        if !(has_keyword_attr(&element) || is_listing_container(&element)) {
            continue;
        }
        let text = element_text(&element);
        if text.chars().count() < min_len {
            continue;
        }
        let heading = element
            .select(heading_selector())
            .map(|h| element_text(&h))
            .find(|h| !h.is_empty())
            .or_else(|| first_sentence(&text));
        let links = element
            .select(link_selector())
            .filter_map(|a| resolve_href(&a, base))
            .collect();
        blocks.push(Block { heading, text, links });
    }

    // Document order puts ancestors before descendants; drop any block whose
    // text wholly contains a later, smaller block.
    let mut keep = vec![true; blocks.len()];
    for i in 0..blocks.len() {
        for j in 0..blocks.len() {
            if i != j
                && keep[j]
                && blocks[i].text.len() > blocks[j].text.len()
                && blocks[i].text.contains(&blocks[j].text)
            {
                keep[i] = false;
                break;
            }
        }
    }

    blocks
        .into_iter()
        .zip(keep)
        .filter_map(|(b, k)| k.then_some(b))
        .take(50)
        .collect()
}
