//! Hosting binary: parses CLI flags, loads configuration, and serves
//! the Relay's `axum::Router` (§0 ambient stack, §6 environment
//! variables).

use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use clap::Parser;
use tokenrelay::client_pool::ClientPool;
use tokenrelay::oauth2::TokenCache;
use tokenrelay::plugin::NotConfiguredInvoker;
use tokenrelay::server::{build_router, AppState};
use tokenrelay::RelayConfig;

/// Token Relay — authenticated HTTP reverse proxy.
#[derive(Parser, Debug)]
#[command(name = "tokenrelay", about = "Authenticated HTTP reverse proxy")]
struct Cli {
    /// Address to bind the HTTP server to.
    #[arg(long, env = "TOKENRELAY_BIND_ADDR", default_value = "0.0.0.0:8080")]
    bind_addr: SocketAddr,

    /// Override the config file path (also read from `ConfigPath`).
    #[arg(long, env = "ConfigPath")]
    config_path: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Some(path) = &cli.config_path {
        std::env::set_var("ConfigPath", path);
    }

    let config = RelayConfig::load().map_err(|e| {
        tracing::error!(error = %e, "fatal: failed to load configuration");
        e
    })?;
    tracing::info!(targets = config.targets.len(), mode = ?config.mode, "configuration loaded");

    let client_pool = Arc::new(ClientPool::new()?);
    let oauth2_cache = Arc::new(TokenCache::new(client_pool.auxiliary().clone()));

    let state = AppState {
        config: Arc::new(ArcSwap::from_pointee(config)),
        client_pool,
        oauth2: oauth2_cache,
        plugin_invoker: Arc::new(NotConfiguredInvoker),
    };

    let router = build_router(state).layer(
        tower_http::trace::TraceLayer::new_for_http(),
    );

    tracing::info!(addr = %cli.bind_addr, "starting server");
    let listener = tokio::net::TcpListener::bind(cli.bind_addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
