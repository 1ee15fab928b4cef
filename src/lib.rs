//! Scholarship Ingest: crawl, extract, validate, deduplicate and score
//! scholarship listings from external web sources.
//!
//! - Per-source crawling with robots.txt, rate limits and pagination
//! - Selector rule sets per source, with a heuristic/classifier fallback
//! - Indian-locale amount and date normalization
//! - Link liveness, TLS and domain-trust validation
//! - Title-similarity and field-match deduplication
//! - Deterministic quality scoring
//! - Priority job scheduler with bounded retries, exposed over HTTP

pub mod config;
pub mod daemon;
pub mod dedup;
pub mod normalize;
pub mod scoring;
pub mod scraping;
pub mod store;
pub mod types;
pub mod util;
pub mod validation;

pub use config::Config;
pub use types::*;
