//! HTTP server wiring (§6 External interfaces).
//!
//! Assembles the `axum::Router` for the three route groups the Relay
//! exposes: `/proxy/*path` (the forwarder), `/health*` (the health
//! engine), and `/function/{plugin}/{function}` (the plugin
//! collaborator). The Auth Gate middleware wraps every route except
//! the health bypass paths.

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get};
use axum::Router;

use crate::client_pool::ClientPool;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::health;
use crate::oauth2::TokenCache;
use crate::plugin::{PluginInvoker, PluginParams};
use crate::{auth_gate, forwarder};

/// Shared process state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<RelayConfig>>,
    pub client_pool: Arc<ClientPool>,
    pub oauth2: Arc<TokenCache>,
    pub plugin_invoker: Arc<dyn PluginInvoker>,
}

/// Build the full router, auth-gated except for the health bypass
/// paths (§4.1).
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/proxy/*path", any(forwarder::dispatch))
        .route("/health", get(health_handler))
        .route("/health/live", get(health_handler))
        .route("/health/ready", get(health_handler))
        .route("/function/:plugin/:function", any(plugin_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_gate::middleware,
        ))
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let config = state.config.load_full();
    let report = health::run(&config, state.client_pool.auxiliary()).await;
    let status = match report.status {
        health::OverallStatus::Healthy => StatusCode::OK,
        health::OverallStatus::Degraded => StatusCode::OK,
        health::OverallStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report)).into_response()
}

async fn plugin_handler(
    State(state): State<AppState>,
    Path((plugin, function)): Path<(String, String)>,
) -> Response {
    match state
        .plugin_invoker
        .invoke(&plugin, &function, PluginParams::default())
        .await
    {
        Ok(crate::plugin::PluginOutcome::Json(value)) => Json(value).into_response(),
        Ok(crate::plugin::PluginOutcome::Stream {
            content_type,
            filename,
            body,
        }) => {
            let mut builder = Response::builder()
                .status(StatusCode::OK)
                .header(axum::http::header::CONTENT_TYPE, content_type);
            if let Some(name) = filename {
                builder = builder.header(
                    axum::http::header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{name}\""),
                );
            }
            builder
                .body(axum::body::Body::from(body))
                .unwrap_or_else(|_| RelayError::internal("building stream response").into_response())
        }
        Err(err) => err.into_response(),
    }
}
