//! Extraction types

use thiserror::Error;

use crate::types::CandidateRecord;

/// Page-level extraction failure; recorded as a warning, never fatal
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("no scholarship content found by {strategy}")]
    NoMatches { strategy: String },
    #[error("not an HTML page ({0})")]
    NotHtml(String),
    #[error("page is empty")]
    EmptyPage,
    #[error("page needs JavaScript rendering")]
    NeedsJavaScript,
    #[error("invalid selector '{0}'")]
    InvalidSelector(String),
    #[error("classifier error: {0}")]
    Classifier(String),
}

/// Candidates extracted from one page
#[derive(Debug, Default)]
pub struct Extraction {
    pub candidates: Vec<CandidateRecord>,
    /// Items found but dropped for a too-short title or description
    pub dropped: usize,
    /// Strategy that produced the candidates
    pub strategy: String,
}

/// Verdict of a text classifier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub is_scholarship: bool,
    pub confidence: f32,
}

/// A text block collected from the DOM for classification
#[derive(Debug, Clone, Default)]
pub(crate) struct Block {
    pub heading: Option<String>,
    pub text: String,
    pub links: Vec<String>,
}
