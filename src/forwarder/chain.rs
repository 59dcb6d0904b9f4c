//! Chain-mode forwarding (§4.2b).
//!
//! Skips local credential injection entirely: the downstream Relay
//! performs §4.2 steps 1-7 against its own target configuration. This
//! Relay only rewrites the relay-auth header and passes everything
//! else through verbatim.

use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Method, Uri};
use axum::response::Response;
use secrecy::ExposeSecret;

use crate::auth_gate::RELAY_AUTH_HEADER;
use crate::error::{RelayError, RelayResult};
use crate::forwarder::{strip_response_headers, SMALL_BODY_THRESHOLD};
use crate::server::AppState;
use crate::telemetry;

/// Forward one inbound request to `config.chain.target` (§4.2b).
pub async fn forward(
    state: &AppState,
    method: Method,
    _path: &str,
    uri: &Uri,
    headers: &HeaderMap,
    body: Body,
) -> RelayResult<Response> {
    let config = state.config.load();
    let chain = config
        .chain
        .as_ref()
        .ok_or_else(|| RelayError::config("mode = chain but no chain.target configured"))?;
    let chain_target = &chain.target;

    // The downstream Relay's own route is `/proxy/*path`, so it expects
    // the inbound path verbatim (including the `/proxy/` prefix), not
    // the axum-stripped wildcard suffix.
    let mut outbound_url = chain_target.endpoint.clone();
    outbound_url
        .path_segments_mut()
        .map_err(|()| RelayError::internal("chain target endpoint cannot be a base URL"))?
        .pop_if_empty()
        .extend(uri.path().trim_start_matches('/').split('/'));
    outbound_url.set_query(uri.query());

    let mut outbound_headers = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let lower = name.as_str().to_ascii_lowercase();
        if lower == RELAY_AUTH_HEADER.to_ascii_lowercase() {
            continue;
        }
        outbound_headers.append(name.clone(), value.clone());
    }
    // TOKEN-RELAY-TARGET is preserved verbatim (it was copied above
    // along with every other header); only the relay's own auth is
    // replaced with the chain credential.
    if let Some(token) = &chain_target.token {
        let value = HeaderValue::from_str(token.expose_secret())
            .map_err(|e| RelayError::internal(format!("invalid chain token: {e}")))?;
        outbound_headers.insert(RELAY_AUTH_HEADER, value);
    }

    let content_length: Option<usize> = headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    let should_buffer = content_length
        .map(|len| len < SMALL_BODY_THRESHOLD)
        .unwrap_or(false);

    let outbound_body = if should_buffer {
        let bytes = axum::body::to_bytes(body, SMALL_BODY_THRESHOLD + 1)
            .await
            .map_err(|e| RelayError::internal(format!("reading request body: {e}")))?;
        reqwest::Body::from(bytes.to_vec())
    } else {
        reqwest::Body::wrap_stream(body.into_data_stream())
    };

    let timeout = config.timeout_for(chain_target);
    let client = state
        .client_pool
        .for_target(chain_target.ignore_certificate_validation);

    let started = Instant::now();
    let mut request_builder = client
        .request(method.clone(), outbound_url)
        .timeout(timeout)
        .body(outbound_body);
    for (name, value) in outbound_headers.iter() {
        request_builder = request_builder.header(name.clone(), value.clone());
    }

    let response = request_builder
        .send()
        .await
        .map_err(|e| RelayError::from_reqwest(e, timeout.as_millis() as u64))?;

    let status = response.status();
    let response_headers = strip_response_headers(response.headers());
    telemetry::record_request("<chain>", method.as_str(), status.as_u16(), started.elapsed());

    let mut builder = Response::builder().status(status.as_u16());
    for (name, value) in response_headers.iter() {
        builder = builder.header(name.clone(), value.clone());
    }
    builder
        .body(Body::from_stream(response.bytes_stream()))
        .map_err(|e| RelayError::internal(format!("building response: {e}")))
}
