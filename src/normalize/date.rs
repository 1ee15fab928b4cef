//! Deadline parsing against a configurable list of chrono formats

use chrono::{Duration, NaiveDate};
use regex::Regex;
use std::sync::OnceLock;

fn ordinal_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(\d{1,2})(st|nd|rd|th)\b").expect("ordinal regex is valid"))
}

/// Date-shaped substrings: numeric forms and month-name forms
fn embedded_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(\d{4}[-/]\d{1,2}[-/]\d{1,2}|\d{1,2}[-/.]\d{1,2}[-/.]\d{2,4}|\d{1,2}\s+[a-z]{3,9},?\s+\d{4}|[a-z]{3,9}\s+\d{1,2},?\s+\d{4})\b",
        )
        .expect("embedded date regex is valid")
    })
}

fn deadline_keyword_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(deadline|last\s+date|apply\s+by|closing\s+date|due\s+date|applications?\s+close[sd]?)",
        )
        .expect("deadline keyword regex is valid")
    })
}

fn clean(text: &str) -> String {
    let without_ordinals = ordinal_regex().replace_all(text, "$1");
    without_ordinals
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == '.' || c == ',' || c == ';' || c == ':')
        .to_string()
}

fn parse_exact(text: &str, formats: &[String]) -> Option<NaiveDate> {
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

/// Parse a date field.
///
/// The whole (cleaned) text is tried against every format first; failing
/// that, the first date-shaped substring that parses wins. Returns `None`
/// when nothing parses.
pub fn parse_date(text: &str, formats: &[String]) -> Option<NaiveDate> {
    let cleaned = clean(text);
    if cleaned.is_empty() {
        return None;
    }
    if let Some(date) = parse_exact(&cleaned, formats) {
        return Some(date);
    }
    // ISO timestamps: keep the date part
    if cleaned.len() > 10 && cleaned.is_char_boundary(10) {
        if let Some(date) = parse_exact(&cleaned[..10], formats) {
            return Some(date);
        }
    }
    embedded_date_regex()
        .find_iter(&cleaned)
        .find_map(|m| parse_exact(m.as_str().trim_end_matches(','), formats))
}

/// Find a deadline in free text by looking just after deadline keywords
/// ("Last date: 31 March 2025").
pub fn find_deadline_in_text(text: &str, formats: &[String]) -> Option<NaiveDate> {
    deadline_keyword_regex().find_iter(text).find_map(|m| {
        let tail: String = text[m.end()..].chars().take(60).collect();
        parse_date(&tail, formats)
    })
}

/// A deadline is plausible when it is no earlier than yesterday and no more
/// than five years out.
pub fn is_plausible_deadline(date: NaiveDate, today: NaiveDate) -> bool {
    date >= today - Duration::days(1) && date <= today + Duration::days(5 * 365)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NormalizeConfig;

    fn formats() -> Vec<String> {
        NormalizeConfig::default().date_formats
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_common_formats() {
        let f = formats();
        assert_eq!(parse_date("2025-03-31", &f), Some(ymd(2025, 3, 31)));
        assert_eq!(parse_date("31/03/2025", &f), Some(ymd(2025, 3, 31)));
        assert_eq!(parse_date("31-03-2025", &f), Some(ymd(2025, 3, 31)));
        assert_eq!(parse_date("March 31, 2025", &f), Some(ymd(2025, 3, 31)));
        assert_eq!(parse_date("31 Mar 2025", &f), Some(ymd(2025, 3, 31)));
    }

    #[test]
    fn test_ordinals_and_noise() {
        let f = formats();
        assert_eq!(parse_date("15th March 2025", &f), Some(ymd(2025, 3, 15)));
        assert_eq!(parse_date("  31 March 2025. ", &f), Some(ymd(2025, 3, 31)));
        assert_eq!(parse_date("Closes on 1st July 2025 (midnight)", &f), Some(ymd(2025, 7, 1)));
    }

    #[test]
    fn test_iso_timestamp() {
        assert_eq!(parse_date("2025-03-31T23:59:00Z", &formats()), Some(ymd(2025, 3, 31)));
    }

    #[test]
    fn test_unparseable_returns_none() {
        let f = formats();
        assert_eq!(parse_date("soon", &f), None);
        assert_eq!(parse_date("", &f), None);
        assert_eq!(parse_date("31/31/2025", &f), None);
    }

    #[test]
    fn test_only_configured_formats_are_used() {
        let only_iso = vec!["%Y-%m-%d".to_string()];
        assert_eq!(parse_date("31/03/2025", &only_iso), None);
        assert_eq!(parse_date("2025-03-31", &only_iso), Some(ymd(2025, 3, 31)));
    }

    #[test]
    fn test_deadline_in_text() {
        let f = formats();
        let text = "Open to all students. Last date to apply: 30th November 2025. Apply online.";
        assert_eq!(find_deadline_in_text(text, &f), Some(ymd(2025, 11, 30)));
        assert_eq!(find_deadline_in_text("No dates here", &f), None);
    }

    #[test]
    fn test_plausible_deadline_window() {
        let today = ymd(2025, 1, 10);
        assert!(is_plausible_deadline(ymd(2025, 1, 9), today));
        assert!(!is_plausible_deadline(ymd(2025, 1, 8), today));
        assert!(is_plausible_deadline(ymd(2029, 12, 31), today));
        assert!(!is_plausible_deadline(ymd(2031, 1, 1), today));
    }
}
