//! API key checks for the admin API
//!
//! A key may arrive as `Authorization: Bearer <key>`, a bare
//! `Authorization: <key>`, or `X-API-Key: <key>`. Keys are held as SHA-256
//! digests so a request never compares raw secrets.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::types::ErrorResponse;

const API_KEY_HEADER: &str = "x-api-key";

type KeyDigest = [u8; 32];

fn digest(key: &str) -> KeyDigest {
    Sha256::digest(key.as_bytes()).into()
}

/// Accepted keys; an empty set leaves the API open
#[derive(Clone, Default)]
pub struct AuthState {
    keys: Arc<HashSet<KeyDigest>>,
}

impl AuthState {
    /// Blank entries are ignored, so `api_keys = [""]` still means open
    pub fn new(api_keys: Vec<String>) -> Self {
        let keys = api_keys
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(digest)
            .collect();
        Self { keys: Arc::new(keys) }
    }

    pub fn is_open(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn accepts(&self, presented: Option<&str>) -> bool {
        self.is_open() || presented.map_or(false, |key| self.keys.contains(&digest(key)))
    }
}

fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|h| h.to_str().ok())
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    match header_text(headers, header::AUTHORIZATION.as_str()) {
        Some(value) => Some(value.strip_prefix("Bearer ").unwrap_or(value).trim()),
        None => header_text(headers, API_KEY_HEADER).map(str::trim),
    }
}

/// Rejects requests without an accepted key with 401
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if auth.accepts(presented_key(request.headers())) {
        return next.run(request).await;
    }
    debug!("Rejected unauthenticated request to {}", request.uri().path());
    (StatusCode::UNAUTHORIZED, Json(ErrorResponse::unauthorized())).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_no_keys_means_open() {
        let auth = AuthState::new(vec![]);
        assert!(auth.is_open());
        assert!(auth.accepts(None));
        assert!(auth.accepts(Some("anything")));

        assert!(AuthState::new(vec!["  ".to_string()]).is_open());
    }

    #[test]
    fn test_configured_keys() {
        let auth = AuthState::new(vec!["dashboard-key".to_string(), " ops-key ".to_string()]);
        assert!(!auth.is_open());
        assert!(auth.accepts(Some("dashboard-key")));
        assert!(auth.accepts(Some("ops-key")));
        assert!(!auth.accepts(Some("wrong")));
        assert!(!auth.accepts(None));
    }

    #[test]
    fn test_presented_key_sources() {
        let mut headers = HeaderMap::new();
        assert_eq!(presented_key(&headers), None);

        headers.insert(API_KEY_HEADER, HeaderValue::from_static("ops-key"));
        assert_eq!(presented_key(&headers), Some("ops-key"));

        // Authorization wins when both are present
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer dashboard-key"));
        assert_eq!(presented_key(&headers), Some("dashboard-key"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("raw-key"));
        assert_eq!(presented_key(&headers), Some("raw-key"));
    }
}
