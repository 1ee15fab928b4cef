//! Amount and date normalization
//!
//! Resolves the raw amount and deadline text of a candidate into canonical
//! values. Nothing here fails a candidate: anything unparseable leaves the
//! normalized field empty and produces a [`NormalizeWarning`].

pub mod amount;
pub mod date;

pub use amount::{find_amount_in_text, is_unspecified, parse_amount, AmountError};
pub use date::{find_deadline_in_text, is_plausible_deadline, parse_date};

use crate::config::NormalizeConfig;
use crate::types::CandidateRecord;

/// A recoverable normalization problem, logged onto the job's warnings
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeWarning {
    #[error("unparseable amount '{text}' in '{title}'")]
    UnparseableAmount { title: String, text: String },
    #[error("implausible amount {value} in '{title}'")]
    AmountOutOfRange { title: String, value: u64 },
    #[error("unparseable deadline '{text}' in '{title}'")]
    UnparseableDate { title: String, text: String },
}

/// Resolves amounts and deadlines on candidate records
#[derive(Debug, Clone)]
pub struct Normalizer {
    config: NormalizeConfig,
}

impl Normalizer {
    pub fn new(config: NormalizeConfig) -> Self {
        Self { config }
    }

    /// Fill `amount` and `deadline` from their raw text, falling back to the
    /// description when the raw field is absent.
    pub fn normalize(&self, record: &mut CandidateRecord) -> Vec<NormalizeWarning> {
        let mut warnings = Vec::new();
        let (min, max) = (self.config.min_amount, self.config.max_amount);

        record.amount = match record.raw_amount.as_deref() {
            Some(text) => match parse_amount(text, min, max) {
                Ok(value) => Some(value),
                Err(AmountError::Empty) | Err(AmountError::Unspecified(_)) => None,
                Err(AmountError::OutOfRange { value, .. }) => {
                    warnings.push(NormalizeWarning::AmountOutOfRange {
                        title: record.title.clone(),
                        value,
                    });
                    None
                }
                Err(AmountError::Unparseable(text)) => {
                    warnings.push(NormalizeWarning::UnparseableAmount {
                        title: record.title.clone(),
                        text,
                    });
                    None
                }
            },
            None => find_amount_in_text(&record.description, min, max),
        };

        let formats = &self.config.date_formats;
        record.deadline = match record.raw_deadline.as_deref() {
            Some(text) if !text.trim().is_empty() => {
                let parsed = parse_date(text, formats);
                if parsed.is_none() {
                    warnings.push(NormalizeWarning::UnparseableDate {
                        title: record.title.clone(),
                        text: text.trim().to_string(),
                    });
                }
                parsed
            }
            _ => find_deadline_in_text(&record.description, formats),
        };

        warnings
    }
}
