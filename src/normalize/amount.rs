//! Indian-locale currency parsing
//!
//! Handles `₹`/`Rs.`/`INR` prefixes, lakh-style comma grouping
//! (`1,00,000`), decimals before a unit (`2.5 lakh`), unit words
//! (thousand, lakh, crore and their abbreviations), spelled-out multipliers
//! (`five lakh`) and ranges, which resolve to their upper bound.

use regex::Regex;
use std::sync::OnceLock;

/// Why an amount could not be turned into a number
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount text is empty")]
    Empty,
    /// The source states explicitly that no fixed amount applies
    #[error("amount explicitly unspecified: '{0}'")]
    Unspecified(String),
    #[error("no amount found in '{0}'")]
    Unparseable(String),
    #[error("amount {value} outside plausible range {min}..={max}")]
    OutOfRange { value: u64, min: u64, max: u64 },
}

const UNSPECIFIED_MARKERS: &[&str] = &[
    "unspecified",
    "not specified",
    "varies",
    "variable",
    "as per norms",
    "as per rules",
    "as applicable",
    "full tuition",
    "tuition fee waiver",
    "fee waiver",
    "n/a",
    "not applicable",
    "to be announced",
];

fn amount_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(₹|\brs\.?|\binr\b|\brupees?\b)?\s*(\d{1,3}(?:,\d{2,3})+|\d+)(?:\.(\d+))?\s*(?:(thousand|lakhs?|lacs?|lac|crores?|cr|k)\b)?",
        )
        .expect("amount regex is valid")
    })
}

fn word_amount_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(one|two|three|four|five|six|seven|eight|nine|ten|twenty|fifty|hundred)\s+(thousand|lakhs?|lacs?|crores?)\b",
        )
        .expect("word amount regex is valid")
    })
}

fn unit_multiplier(unit: &str) -> f64 {
    match unit.to_ascii_lowercase().as_str() {
        "thousand" | "k" => 1_000.0,
        "lakh" | "lakhs" | "lac" | "lacs" => 100_000.0,
        "crore" | "crores" | "cr" => 10_000_000.0,
        _ => 1.0,
    }
}

fn word_value(word: &str) -> f64 {
    match word.to_ascii_lowercase().as_str() {
        "one" => 1.0,
        "two" => 2.0,
        "three" => 3.0,
        "four" => 4.0,
        "five" => 5.0,
        "six" => 6.0,
        "seven" => 7.0,
        "eight" => 8.0,
        "nine" => 9.0,
        "ten" => 10.0,
        "twenty" => 20.0,
        "fifty" => 50.0,
        "hundred" => 100.0,
        _ => 0.0,
    }
}

/// True when `text` states there is no fixed amount ("Varies", "Full tuition")
pub fn is_unspecified(text: &str) -> bool {
    let lower = text.to_lowercase();
    UNSPECIFIED_MARKERS.iter().any(|m| lower.contains(m))
}

/// One amount phrase found in text
#[derive(Debug, Clone, Copy, PartialEq)]
struct Match {
    value: f64,
    /// Currency marker or unit word present
    explicit: bool,
}

fn scan(text: &str) -> Vec<Match> {
    let mut found = Vec::new();

    for caps in amount_regex().captures_iter(text) {
        let Some(int_part) = caps.get(2) else {
            continue;
        };
        let digits: String = int_part.as_str().chars().filter(|c| *c != ',').collect();
        let number = match caps.get(3) {
            Some(frac) => format!("{}.{}", digits, frac.as_str()),
            None => digits,
        };
        let Ok(base) = number.parse::<f64>() else {
            continue;
        };
        let unit = caps.get(4).map(|m| m.as_str());
        found.push(Match {
            value: base * unit.map(unit_multiplier).unwrap_or(1.0),
            explicit: caps.get(1).is_some() || unit.is_some(),
        });
    }

    for caps in word_amount_regex().captures_iter(text) {
        found.push(Match {
            value: word_value(&caps[1]) * unit_multiplier(&caps[2]),
            explicit: true,
        });
    }

    found
}

fn to_rupees(value: f64) -> u64 {
    value.round().max(0.0) as u64
}

/// Parse the text of an amount field into whole rupees.
///
/// Ranges resolve to their upper bound. Values outside `min..=max` are
/// reported as [`AmountError::OutOfRange`].
pub fn parse_amount(text: &str, min: u64, max: u64) -> Result<u64, AmountError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AmountError::Empty);
    }

    let matches = scan(trimmed);
    if matches.is_empty() {
        if is_unspecified(trimmed) {
            return Err(AmountError::Unspecified(trimmed.to_string()));
        }
        return Err(AmountError::Unparseable(trimmed.to_string()));
    }

    // Bare numbers next to explicit amounts ("for 10 months") are ignored
    let explicit: Vec<&Match> = matches.iter().filter(|m| m.explicit).collect();
    let pool: Vec<&Match> = if explicit.is_empty() {
        matches.iter().collect()
    } else {
        explicit
    };
    let value = pool
        .iter()
        .map(|m| to_rupees(m.value))
        .max()
        .unwrap_or_default();

    if value < min || value > max {
        return Err(AmountError::OutOfRange { value, min, max });
    }
    Ok(value)
}

/// Find the first currency-looking phrase in free text.
///
/// Only phrases carrying a currency marker or unit word qualify, so years
/// and counts in running prose are not mistaken for amounts.
pub fn find_amount_in_text(text: &str, min: u64, max: u64) -> Option<u64> {
    scan(text)
        .into_iter()
        .filter(|m| m.explicit)
        .map(|m| to_rupees(m.value))
        .find(|v| *v >= min && *v <= max)
}
