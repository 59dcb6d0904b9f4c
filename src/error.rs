//! Error types for the Relay
//!
//! Follows the §7 error taxonomy: each variant maps to exactly one HTTP
//! status code via [`IntoResponse`], and carries enough context for the
//! structured log event without leaking upstream detail into the
//! response body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Result type for relay operations.
pub type RelayResult<T> = std::result::Result<T, RelayError>;

/// Main error type for the Relay.
///
/// Constructors follow the pattern established for each variant: a bare
/// `message` constructor plus a `_with_<context>` variant when the
/// taxonomy calls for extra context (target name, upstream status, …).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RelayError {
    /// Fatal error encountered while loading or validating `RelayConfig`.
    /// Not recoverable per-request; only ever surfaced at startup.
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        key: Option<String>,
    },

    /// Relay auth (`TOKEN-RELAY-AUTH`) missing or not a recognized token.
    #[error("Relay authentication failed")]
    Auth,

    /// Target name missing from `TOKEN-RELAY-TARGET`, unknown, or disabled.
    #[error("Target error: {message}")]
    Target {
        message: String,
        /// Whether the target is merely unknown (404) vs. a malformed
        /// request altogether (400).
        not_found: bool,
    },

    /// Query placeholder referenced a variable not present in
    /// `target.variables`.
    #[error("Unknown query parameter placeholder: {name}")]
    Placeholder { name: String },

    /// OAuth1 configuration missing a required field, or OAuth2
    /// acquisition failed against the token endpoint.
    #[error("Credential error: {message}")]
    Credential { message: String },

    /// Outbound request to the target exceeded its deadline.
    #[error("Upstream timeout after {timeout_ms}ms")]
    UpstreamTimeout { timeout_ms: u64 },

    /// DNS/TCP/TLS failure reaching the target.
    #[error("Upstream transport error: {message}")]
    UpstreamTransport { message: String },

    /// Unexpected internal failure; detail goes to logs only.
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// A collaborator interface (§6) was invoked with no backend wired up.
    #[error("Not implemented: {message}")]
    NotImplemented { message: String },

    /// Serialization failure (config parsing, request/response bodies).
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error loading the config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            key: None,
        }
    }

    /// Create a configuration error naming the offending config key.
    pub fn config_with_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Create a "target not found" error (maps to 404).
    pub fn target_not_found(name: impl Into<String>) -> Self {
        Self::Target {
            message: format!("Unknown or disabled target: {}", name.into()),
            not_found: true,
        }
    }

    /// Create a malformed-target-request error (maps to 400).
    pub fn target_bad_request(message: impl Into<String>) -> Self {
        Self::Target {
            message: message.into(),
            not_found: false,
        }
    }

    /// Create a placeholder error for the named unknown variable.
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self::Placeholder { name: name.into() }
    }

    /// Create a credential-acquisition error.
    pub fn credential(message: impl Into<String>) -> Self {
        Self::Credential {
            message: message.into(),
        }
    }

    /// Create an internal error from a displayable cause.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a not-implemented error for an unconfigured collaborator.
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::NotImplemented {
            message: message.into(),
        }
    }

    /// Classify a `reqwest::Error` into the taxonomy's upstream variants.
    pub fn from_reqwest(err: reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            Self::UpstreamTimeout { timeout_ms }
        } else {
            Self::UpstreamTransport {
                message: err.to_string(),
            }
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth => StatusCode::UNAUTHORIZED,
            Self::Target { not_found, .. } => {
                if *not_found {
                    StatusCode::NOT_FOUND
                } else {
                    StatusCode::BAD_REQUEST
                }
            }
            Self::Placeholder { .. } => StatusCode::BAD_REQUEST,
            Self::Credential { .. } => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamTransport { .. } => StatusCode::BAD_GATEWAY,
            Self::Internal { .. } | Self::Serialization(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotImplemented { .. } => StatusCode::NOT_IMPLEMENTED,
        }
    }

    /// The message surfaced to clients. Relay-auth failures are
    /// deliberately opaque; internal errors are generic so logs (not
    /// responses) carry the detail.
    fn client_message(&self) -> String {
        match self {
            Self::Auth => "authentication failed".to_string(),
            Self::Internal { .. } | Self::Serialization(_) | Self::Io(_) => {
                "internal error".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    success: bool,
    error: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if matches!(self, Self::Auth) {
            tracing::warn!("relay auth rejected");
            return (status, ()).into_response();
        }
        tracing::error!(error = %self, status = %status, "request failed");
        let body = ErrorEnvelope {
            success: false,
            error: self.client_message(),
            timestamp: chrono::Utc::now(),
        };
        (status, axum::Json(body)).into_response()
    }
}
