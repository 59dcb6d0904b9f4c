//! Auth Gate (§4.1).
//!
//! Validates the relay's own bearer token (`TOKEN-RELAY-AUTH`) on
//! inbound requests. A fixed set of paths bypass the gate entirely.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::RelayError;
use crate::server::AppState;

pub const RELAY_AUTH_HEADER: &str = "TOKEN-RELAY-AUTH";
pub const RELAY_TARGET_HEADER: &str = "TOKEN-RELAY-TARGET";

const BYPASS_PATHS: &[&str] = &["/health", "/health/live", "/health/ready"];

/// Whether `path` is exempt from the auth gate.
pub fn bypasses_gate(path: &str) -> bool {
    BYPASS_PATHS.contains(&path)
}

/// Check `headers` against `config.auth_tokens`. Tokens are compared
/// post-decryption; the config loader already decrypted any
/// `ENC:`-wrapped entries at load time (§6), so this is a plain
/// membership test on the hot path.
pub fn check(headers: &HeaderMap, auth_tokens: &std::collections::HashSet<String>) -> Result<(), RelayError> {
    let presented = headers
        .get(RELAY_AUTH_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(RelayError::Auth)?;
    if auth_tokens.contains(presented) {
        Ok(())
    } else {
        Err(RelayError::Auth)
    }
}

/// `axum` middleware wiring `check` into the router, bypassing the
/// paths listed in `BYPASS_PATHS`.
pub async fn middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if bypasses_gate(request.uri().path()) {
        return next.run(request).await;
    }
    let config = state.config.load();
    if let Err(err) = check(request.headers(), &config.auth_tokens) {
        return err.into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::collections::HashSet;

    fn tokens() -> HashSet<String> {
        HashSet::from(["secret-1".to_string(), "secret-2".to_string()])
    }

    #[test]
    fn accepts_known_token() {
        let mut headers = HeaderMap::new();
        headers.insert(RELAY_AUTH_HEADER, HeaderValue::from_static("secret-1"));
        assert!(check(&headers, &tokens()).is_ok());
    }

    #[test]
    fn rejects_missing_header() {
        let headers = HeaderMap::new();
        assert!(matches!(check(&headers, &tokens()), Err(RelayError::Auth)));
    }

    #[test]
    fn rejects_unknown_token() {
        let mut headers = HeaderMap::new();
        headers.insert(RELAY_AUTH_HEADER, HeaderValue::from_static("not-a-token"));
        assert!(matches!(check(&headers, &tokens()), Err(RelayError::Auth)));
    }

    #[test]
    fn health_paths_bypass_the_gate() {
        assert!(bypasses_gate("/health"));
        assert!(bypasses_gate("/health/live"));
        assert!(bypasses_gate("/health/ready"));
        assert!(!bypasses_gate("/proxy/foo"));
    }
}
