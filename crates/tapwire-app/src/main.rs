//! Tapwire - capturing reverse proxy for coding-agent LLM traffic.
//!
//! This is the main binary that runs:
//! - the capturing proxy (point the agent's API base URL at it)
//! - the dashboard API and live hub

use std::sync::Arc;

use clap::Parser;
use tapwire_app::init_logging;
use tapwire_core::{ExchangeStore, LifecycleStore, DEFAULT_STORE_CAPACITY};
use tapwire_proxy::{
    CaptureHandler, ProxyConfig, ProxyServer, DEFAULT_PROXY_PORT, DEFAULT_UPSTREAM,
};
use tapwire_server::{AppState, DashboardHub, Server, ServerConfig, DEFAULT_PORT};

/// Tapwire - capture and inspect LLM API traffic
#[derive(Parser, Debug)]
#[command(name = "tapwire", version, about)]
struct Args {
    /// Port the proxy listens on
    #[arg(long, env = "TAPWIRE_PROXY_PORT", default_value_t = DEFAULT_PROXY_PORT)]
    proxy_port: u16,

    /// Port the dashboard API listens on
    #[arg(long, env = "TAPWIRE_DASHBOARD_PORT", default_value_t = DEFAULT_PORT)]
    dashboard_port: u16,

    /// Base URL requests are forwarded to
    #[arg(long, env = "TAPWIRE_UPSTREAM", default_value = DEFAULT_UPSTREAM)]
    upstream: String,

    /// Number of exchanges and hook events kept in memory
    #[arg(long, env = "TAPWIRE_CAPACITY", default_value_t = DEFAULT_STORE_CAPACITY)]
    capacity: usize,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Keep guard alive for the duration of the program
    let _log_guard = init_logging(&args.log_level, args.debug);

    tracing::info!("Starting Tapwire...");
    tracing::debug!("Args: {:?}", args);

    let proxy_config = ProxyConfig::new()
        .with_port(args.proxy_port)
        .with_upstream(args.upstream)
        .with_capacity(args.capacity);

    let hub = DashboardHub::default();
    let state = AppState::new(
        Arc::new(ExchangeStore::new(proxy_config.capacity)),
        Arc::new(LifecycleStore::new(proxy_config.capacity)),
        hub.clone(),
    );

    let handler = CaptureHandler::new(Arc::clone(&state.exchanges), Arc::new(hub));
    let proxy = ProxyServer::new(proxy_config, handler)?;
    let server = Server::with_state(ServerConfig::default().with_port(args.dashboard_port), state)?;

    tracing::info!(
        "Proxy http://{} -> {}, dashboard API http://{}",
        proxy.addr(),
        proxy.upstream(),
        server.addr()
    );

    tokio::select! {
        result = proxy.run() => result?,
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupt received"),
    }

    tracing::info!("Tapwire shutting down");
    Ok(())
}
