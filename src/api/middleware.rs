//! Admin API middleware
//!
//! - Shared-key authentication (`x-api-key` or `Authorization: Bearer`)
//! - Security headers
//! - Request logging

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Shared state for the admin middleware
#[derive(Clone)]
pub struct AdminAuthState {
    api_key: Arc<str>,
    /// Paths that don't require authentication
    public_paths: Arc<[String]>,
}

impl AdminAuthState {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Arc::from(api_key.into()),
            public_paths: Arc::from(vec!["/health".to_string()]),
        }
    }

    fn is_public_path(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| path.starts_with(p.as_str()))
    }

    fn accepts(&self, presented: &str) -> bool {
        constant_time_eq(presented.as_bytes(), self.api_key.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn presented_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-api-key")
        .or_else(|| headers.get("authorization"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim_start_matches("Bearer ").trim().to_string())
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<AdminAuthState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = request.uri().path().to_string();

    if state.is_public_path(&path) {
        return Ok(next.run(request).await);
    }

    match presented_key(&headers) {
        Some(key) if state.accepts(&key) => {
            debug!(path = %path, "Admin key authenticated");
            Ok(next.run(request).await)
        }
        Some(_) => {
            warn!(path = %path, "Invalid admin key attempt");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            warn!(path = %path, "Missing admin key");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Security headers middleware
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        "Cache-Control",
        HeaderValue::from_static("no-store, no-cache, must-revalidate"),
    );
    headers.remove("Server");

    response
}

/// Request logging middleware
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;
    let duration = start.elapsed();
    let status = response.status();

    if status.is_server_error() {
        error!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = duration.as_millis() as u64,
            "Request failed"
        );
    } else if status.is_client_error() {
        warn!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = duration.as_millis() as u64,
            "Client error"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = duration.as_millis() as u64,
            "Request completed"
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_public_path() {
        let state = AdminAuthState::new("0123456789abcdef");
        assert!(state.is_public_path("/health"));
        assert!(!state.is_public_path("/channels"));
        assert!(!state.is_public_path("/bans"));
    }

    #[test]
    fn test_key_comparison() {
        let state = AdminAuthState::new("0123456789abcdef");
        assert!(state.accepts("0123456789abcdef"));
        assert!(!state.accepts("0123456789abcdeX"));
        assert!(!state.accepts("0123"));
        assert!(!state.accepts(""));
    }

    #[test]
    fn test_presented_key_sources() {
        let mut headers = HeaderMap::new();
        assert_eq!(presented_key(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer secret-key"));
        assert_eq!(presented_key(&headers).as_deref(), Some("secret-key"));

        headers.insert("x-api-key", HeaderValue::from_static("header-key"));
        assert_eq!(presented_key(&headers).as_deref(), Some("header-key"));
    }
}
