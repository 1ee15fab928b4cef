//! Quality scoring
//!
//! A deterministic weighted sum over a candidate's fields. Each component is
//! capped on its own and the total is capped at 100. The reference date is
//! an argument so the same inputs always produce the same score.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::CandidateRecord;

/// Per-component scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityBreakdown {
    pub title: u8,
    pub description: u8,
    pub link: u8,
    pub deadline: u8,
    pub amount: u8,
    pub eligibility: u8,
}

impl QualityBreakdown {
    pub fn total(&self) -> u8 {
        let sum = self.title as u16
            + self.description as u16
            + self.link as u16
            + self.deadline as u16
            + self.amount as u16
            + self.eligibility as u16;
        sum.min(100) as u8
    }
}

fn char_len(s: &str) -> usize {
    s.trim().chars().count()
}

fn title_score(title: &str) -> u8 {
    match char_len(title) {
        n if n >= 10 => 20,
        n if n >= 5 => 15,
        _ => 10,
    }
}

fn description_score(description: &str) -> u8 {
    match char_len(description) {
        n if n >= 200 => 20,
        n if n >= 100 => 15,
        n if n >= 50 => 10,
        _ => 5,
    }
}

fn link_score(link: Option<&str>) -> u8 {
    let valid = link
        .and_then(|l| Url::parse(l.trim()).ok())
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false);
    if valid {
        20
    } else {
        5
    }
}

fn deadline_score(deadline: Option<NaiveDate>, today: NaiveDate) -> u8 {
    match deadline {
        Some(d) if d > today => 15,
        _ => 5,
    }
}

fn amount_score(amount: Option<u64>) -> u8 {
    match amount {
        Some(a) if a > 0 => 15,
        _ => 5,
    }
}

fn eligibility_score(eligibility: Option<&str>) -> u8 {
    match eligibility.map(char_len).unwrap_or(0) {
        n if n >= 50 => 10,
        n if n >= 20 => 7,
        _ => 3,
    }
}

/// Score every component of `record` relative to `today`
pub fn breakdown(record: &CandidateRecord, today: NaiveDate) -> QualityBreakdown {
    QualityBreakdown {
        title: title_score(&record.title),
        description: description_score(&record.description),
        link: link_score(record.application_url.as_deref()),
        deadline: deadline_score(record.deadline, today),
        amount: amount_score(record.amount),
        eligibility: eligibility_score(record.eligibility.as_deref()),
    }
}

/// Quality score in `0..=100`
pub fn score(record: &CandidateRecord, today: NaiveDate) -> u8 {
    breakdown(record, today).total()
}
