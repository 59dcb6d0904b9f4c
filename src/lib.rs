//! Token Relay — an authenticated HTTP reverse proxy.
//!
//! Accepts client requests tagged with a logical target name, attaches
//! the configured outbound credentials (static headers, OAuth 2.0
//! bearer tokens, or OAuth 1.0 signed headers), forwards to the target
//! endpoint, and streams the response back. May also run in chain
//! mode, forwarding to a downstream Relay that completes credential
//! injection.

pub mod auth_gate;
pub mod client_pool;
pub mod config;
pub mod crypto;
pub mod error;
pub mod forwarder;
pub mod health;
pub mod oauth1;
pub mod oauth2;
pub mod plugin;
pub mod resolver;
pub mod server;
pub mod telemetry;

pub use config::RelayConfig;
pub use error::{RelayError, RelayResult};
pub use server::AppState;
