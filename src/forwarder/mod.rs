//! Request Forwarder (§4.2, §4.2b) — the per-request state machine.
//!
//! [`direct`] implements the direct-mode pipeline: target resolution,
//! credential injection, and dispatch through the [`crate::client_pool`].
//! [`chain`] implements chain mode, which skips local credential
//! injection entirely and forwards to the configured downstream relay.
//! Both share the header-hygiene and URL-building helpers in this
//! module.

pub mod chain;
pub mod direct;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use axum::response::{IntoResponse, Response};
use secrecy::ExposeSecret;
use tracing::Instrument;

use crate::auth_gate::{RELAY_AUTH_HEADER, RELAY_TARGET_HEADER};
use crate::config::{AuthSpec, ProxyMode, TargetSpec};
use crate::error::{RelayError, RelayResult};
use crate::server::AppState;
use crate::{oauth1, resolver};

/// Top-level `/proxy/*path` handler: dispatches to direct or chain mode
/// per the active `RelayConfig` snapshot (§2 data flow).
pub async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("proxy_request", request_id = %request_id, path = %path);

    async move {
        let mode = state.config.load().mode;
        let result = match mode {
            ProxyMode::Direct => direct::forward(&state, method, &path, &uri, &headers, body).await,
            ProxyMode::Chain => chain::forward(&state, method, &path, &uri, &headers, body).await,
        };
        match result {
            Ok(response) => response,
            Err(err) => err.into_response(),
        }
    }
    .instrument(span)
    .await
}

/// Request bodies at or under this size are buffered so they can be
/// inspected (OAuth1 form-signing) or safely re-sent; larger bodies
/// stream straight through (§4.2 step 5).
pub const SMALL_BODY_THRESHOLD: usize = 50 * 1024 * 1024;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Copy `inbound` into a fresh header map, dropping hop-by-hop headers
/// and the relay's own control headers (§4.2 step 3).
pub fn strip_inbound_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        let lower = name.as_str().to_ascii_lowercase();
        if HOP_BY_HOP.contains(&lower.as_str()) {
            continue;
        }
        if lower == RELAY_AUTH_HEADER.to_ascii_lowercase() || lower == RELAY_TARGET_HEADER.to_ascii_lowercase() {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Strip hop-by-hop headers from an upstream response before relaying
/// it back to the caller (§4.2 step 7).
pub fn strip_response_headers(upstream: &reqwest::header::HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.append(name, value);
        }
    }
    out
}

/// Build the outbound URL: `target.endpoint` plus the inbound path
/// suffix, with the query string resolved against `target.variables`
/// (§4.2 step 2).
pub fn build_outbound_url(
    target: &TargetSpec,
    path_suffix: &str,
    raw_query: Option<&str>,
) -> RelayResult<url::Url> {
    // `Url::join` treats a base path with no trailing slash as a file
    // name and discards its last segment (RFC 3986 §5.3 relative
    // resolution), which would drop e.g. `/v1` from an endpoint like
    // `https://api.example/v1`. Force a trailing slash so the suffix is
    // always appended rather than substituted.
    let mut base = target.endpoint.clone();
    if !base.path().ends_with('/') {
        let path_with_slash = format!("{}/", base.path());
        base.set_path(&path_with_slash);
    }
    let mut url = base
        .join(path_suffix.trim_start_matches('/'))
        .map_err(|e| RelayError::target_bad_request(format!("invalid forwarded path: {e}")))?;

    let resolved_query = match raw_query {
        Some(q) if !q.is_empty() => Some(resolver::resolve_query(q, &target.variables)?),
        _ => None,
    };
    url.set_query(resolved_query.as_deref());
    Ok(url)
}

/// Apply a target's credential policy to the outbound request headers.
///
/// `body_form_params` is populated only when the inbound `Content-Type`
/// is `application/x-www-form-urlencoded`, so OAuth1 signing can fold
/// body params into the signature base string (§4.3 step 2).
pub async fn inject_credentials(
    target: &TargetSpec,
    target_name: &str,
    method: &str,
    url: &url::Url,
    body_form_params: Option<&[(String, String)]>,
    oauth2_cache: &crate::oauth2::TokenCache,
    headers: &mut HeaderMap,
) -> RelayResult<()> {
    match &target.auth {
        AuthSpec::Static => {
            for (key, value) in &target.headers {
                let name = HeaderName::try_from(key.as_str())
                    .map_err(|e| RelayError::config(format!("invalid static header name {key}: {e}")))?;
                let val = HeaderValue::from_str(value)
                    .map_err(|e| RelayError::config(format!("invalid static header value for {key}: {e}")))?;
                headers.insert(name, val);
            }
        }
        AuthSpec::OAuth2(auth) => {
            let token = oauth2_cache.acquire(target_name, &target.endpoint, auth).await?;
            let value = format!("{} {}", token.token_type, token.access_token);
            headers.insert(
                axum::http::header::AUTHORIZATION,
                HeaderValue::from_str(&value)
                    .map_err(|e| RelayError::internal(format!("invalid bearer header: {e}")))?,
            );
        }
        AuthSpec::OAuth1(creds) => {
            let nonce = oauth1::generate_nonce();
            let timestamp = oauth1::generate_timestamp();
            let header = oauth1::sign_request(method, url, body_form_params, creds, &nonce, timestamp);
            headers.insert(
                axum::http::header::AUTHORIZATION,
                HeaderValue::from_str(&header)
                    .map_err(|e| RelayError::internal(format!("invalid OAuth1 header: {e}")))?,
            );
        }
    }
    // Non-auth static headers (e.g. a custom `X-Api-Version`) are merged
    // regardless of authType — only Static treats `headers` as the auth
    // vehicle itself, but other auth types may still carry incidental
    // static headers (target headers win over inbound, §4.2 step 4).
    if !matches!(target.auth, AuthSpec::Static) {
        for (key, value) in &target.headers {
            let name = HeaderName::try_from(key.as_str())
                .map_err(|e| RelayError::config(format!("invalid static header name {key}: {e}")))?;
            let val = HeaderValue::from_str(value)
                .map_err(|e| RelayError::config(format!("invalid static header value for {key}: {e}")))?;
            headers.insert(name, val);
        }
    }
    Ok(())
}

/// If `content_type` is form-urlencoded, decode `body` into pairs for
/// OAuth1 signing; otherwise `None`.
pub fn form_params_if_applicable(content_type: Option<&str>, body: &[u8]) -> Option<Vec<(String, String)>> {
    let content_type = content_type?;
    if !content_type.starts_with("application/x-www-form-urlencoded") {
        return None;
    }
    serde_urlencoded::from_bytes::<Vec<(String, String)>>(body).ok()
}

/// Redact a secret for a log field without ever formatting its value.
pub fn redacted(secret: &secrecy::SecretString) -> &'static str {
    let _ = secret.expose_secret();
    "<redacted>"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn target(endpoint: &str) -> TargetSpec {
        TargetSpec {
            endpoint: url::Url::parse(endpoint).unwrap(),
            description: None,
            enabled: true,
            headers: HashMap::new(),
            auth: AuthSpec::Static,
            variables: HashMap::new(),
            ignore_certificate_validation: false,
            token: None,
            health_check: None,
            timeout_seconds: None,
        }
    }

    #[test]
    fn strips_hop_by_hop_and_relay_control_headers() {
        let mut inbound = HeaderMap::new();
        inbound.insert("connection", HeaderValue::from_static("keep-alive"));
        inbound.insert(RELAY_AUTH_HEADER, HeaderValue::from_static("t"));
        inbound.insert(RELAY_TARGET_HEADER, HeaderValue::from_static("api"));
        inbound.insert("x-custom", HeaderValue::from_static("keep-me"));

        let out = strip_inbound_headers(&inbound);
        assert!(out.get("connection").is_none());
        assert!(out.get(RELAY_AUTH_HEADER).is_none());
        assert!(out.get(RELAY_TARGET_HEADER).is_none());
        assert_eq!(out.get("x-custom").unwrap(), "keep-me");
    }

    #[test]
    fn builds_url_with_path_and_query() {
        let t = target("https://api.example/v1/");
        let url = build_outbound_url(&t, "/widgets", Some("name=foo")).unwrap();
        assert_eq!(url.as_str(), "https://api.example/v1/widgets?name=foo");
    }

    #[test]
    fn builds_url_when_endpoint_has_no_trailing_slash() {
        let t = target("https://api.example/v1");
        let url = build_outbound_url(&t, "/widgets", None).unwrap();
        assert_eq!(url.as_str(), "https://api.example/v1/widgets");
    }

    #[test]
    fn form_params_only_for_urlencoded_content_type() {
        let body = b"a=1&b=2";
        assert!(form_params_if_applicable(Some("application/json"), body).is_none());
        let parsed = form_params_if_applicable(
            Some("application/x-www-form-urlencoded"),
            body,
        )
        .unwrap();
        assert_eq!(parsed, vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]);
    }
}
