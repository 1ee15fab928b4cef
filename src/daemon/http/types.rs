//! HTTP API Request/Response Types
//!
//! JSON-serializable types for the HTTP API. Jobs and records are returned
//! as their stored shape.

use serde::{Deserialize, Serialize};

use crate::types::{JobId, JobStatus, ScholarshipRecord, ScrapingJob};

/// Response to a job being enqueued
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCreatedResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

/// Optional reason attached to a cancel request (`?reason=...`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelQuery {
    pub reason: Option<String>,
}

/// Page of jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<ScrapingJob>,
    pub count: usize,
}

/// Page of records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordListResponse {
    pub records: Vec<ScholarshipRecord>,
    pub count: usize,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn unauthorized() -> Self {
        Self::new("UNAUTHORIZED", "Invalid or missing API key")
    }
}
