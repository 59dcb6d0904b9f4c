//! Direct-mode forwarding (§4.2).

use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;

use crate::auth_gate::RELAY_TARGET_HEADER;
use crate::config::AuthSpec;
use crate::error::{RelayError, RelayResult};
use crate::forwarder::{
    build_outbound_url, form_params_if_applicable, inject_credentials, strip_inbound_headers,
    strip_response_headers, SMALL_BODY_THRESHOLD,
};
use crate::server::AppState;
use crate::telemetry;

/// Forward one inbound request to its resolved target (§4.2 steps 1-7).
pub async fn forward(
    state: &AppState,
    method: Method,
    path: &str,
    uri: &Uri,
    headers: &HeaderMap,
    body: Body,
) -> RelayResult<Response> {
    let config = state.config.load();

    let target_name = headers
        .get(RELAY_TARGET_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| RelayError::target_bad_request("missing TOKEN-RELAY-TARGET header"))?
        .to_string();

    let target = config
        .target(&target_name)
        .filter(|t| t.enabled)
        .ok_or_else(|| RelayError::target_not_found(&target_name))?;

    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let content_length: Option<usize> = headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());

    // OAuth1 over a form-encoded body needs the decoded params for
    // signing, so it always buffers regardless of size; everything
    // else buffers only when small enough to make re-send safe (§4.2
    // step 5).
    let needs_form_signing =
        matches!(&target.auth, AuthSpec::OAuth1(_)) && content_type.as_deref() == Some("application/x-www-form-urlencoded");
    let should_buffer = needs_form_signing
        || content_length
            .map(|len| len < SMALL_BODY_THRESHOLD)
            .unwrap_or(false);

    let (outbound_body, buffered_bytes): (reqwest::Body, Option<Vec<u8>>) = if should_buffer {
        let bytes = axum::body::to_bytes(body, SMALL_BODY_THRESHOLD + 1)
            .await
            .map_err(|e| RelayError::internal(format!("reading request body: {e}")))?;
        (reqwest::Body::from(bytes.to_vec()), Some(bytes.to_vec()))
    } else {
        (reqwest::Body::wrap_stream(body.into_data_stream()), None)
    };

    let outbound_url = build_outbound_url(target, path, uri.query())?;

    let form_params = buffered_bytes
        .as_deref()
        .and_then(|bytes| form_params_if_applicable(content_type.as_deref(), bytes));

    let mut outbound_headers = strip_inbound_headers(headers);
    inject_credentials(
        target,
        &target_name,
        method.as_str(),
        &outbound_url,
        form_params.as_deref(),
        &state.oauth2,
        &mut outbound_headers,
    )
    .await?;

    let timeout = config.timeout_for(target);
    let client = state.client_pool.for_target(target.ignore_certificate_validation);

    let started = Instant::now();
    let mut request_builder = client
        .request(method.clone(), outbound_url.clone())
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
    telemetry::record_request(&target_name, method.as_str(), status.as_u16(), started.elapsed());

    let body_stream = response.bytes_stream();
    let mut builder = Response::builder().status(status.as_u16());
    for (name, value) in response_headers.iter() {
        builder = builder.header(name.clone(), value.clone());
    }
    builder
        .body(Body::from_stream(body_stream))
        .map_err(|e| RelayError::internal(format!("building response: {e}")))
}
