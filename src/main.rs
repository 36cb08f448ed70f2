//! # Metadata Gateway - Main Entry Point
//!
//! Caching, rate-limiting proxy in front of the TMDB metadata API.
//!
//! Startup sequence:
//! 1. Load configuration (`GATEWAY_CONFIG_PATH` if set, else defaults) plus environment overrides
//! 2. Initialize structured logging
//! 3. Install the Prometheus recorder when metrics are enabled
//! 4. Serve until SIGTERM or SIGINT, then drain in-flight connections

use metadata_gateway::core::config::GatewayConfig;
use metadata_gateway::gateway::server::GatewayServer;
use metadata_gateway::observability::{init_logging, install_prometheus_recorder};
use metadata_gateway::GatewayResult;
use tokio::signal;
use tracing::{error, info, warn};

const CONFIG_PATH_ENV: &str = "GATEWAY_CONFIG_PATH";

#[tokio::main]
async fn main() {
    let config = match load_config().await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.observability.logging) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!("🚀 Starting metadata gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(config).await {
        error!("Gateway terminated with error: {}", e);
        std::process::exit(1);
    }

    info!("✅ Metadata gateway shutdown complete");
}

async fn load_config() -> GatewayResult<GatewayConfig> {
    let path = std::env::var(CONFIG_PATH_ENV).ok().filter(|p| !p.is_empty());
    GatewayConfig::load(path).await
}

async fn run(config: GatewayConfig) -> GatewayResult<()> {
    let metrics = if config.observability.metrics.enabled {
        let handle = install_prometheus_recorder()?;
        info!("📊 Prometheus recorder installed");
        Some(handle)
    } else {
        None
    };

    if config.upstream.api_key().is_none() {
        warn!("No upstream API key configured; proxy requests will fail until TMDB_API_KEY is set");
    }

    info!(
        upstream = %config.upstream.base_url,
        fresh_ttl = ?config.cache.fresh_ttl,
        hard_ttl = ?config.cache.hard_ttl,
        max_requests = config.rate_limit.max_requests,
        window = ?config.rate_limit.window,
        "Gateway configured"
    );

    let server = GatewayServer::new(&config, metrics)?;
    server.start(shutdown_signal()).await
}

/// Resolves on SIGTERM or SIGINT
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("📡 Received SIGINT (Ctrl+C), initiating graceful shutdown..."),
        _ = terminate => info!("📡 Received SIGTERM, initiating graceful shutdown..."),
    }
}
