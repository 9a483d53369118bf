//! Switchyard - routing core for a model-inference gateway
//!
//! This is the main entry point for the gateway server.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use switchyard::telemetry::InMemoryTelemetryRepo;
use switchyard::{
    routes, Channel, Config, HttpUpstream, InMemoryChannelSource, RouterState, SystemClock,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchyard=info,tower_http=info".into()),
        )
        .with_target(true)
        .init();

    info!("Starting Switchyard gateway core");

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded successfully");

    // Load the channel table. Deployments embedding the crate inject their
    // own source of truth; the standalone binary reads a JSON file.
    let channels = load_channels()?;
    info!(channels = channels.len(), "Channel table loaded");
    let source = Arc::new(InMemoryChannelSource::new(channels));

    // Upstream HTTP client with connection pooling
    let http_client = reqwest::Client::builder()
        .pool_max_idle_per_host(100)
        .connect_timeout(std::time::Duration::from_secs(
            config.upstream_connect_timeout_seconds,
        ))
        .build()?;
    let upstream = Arc::new(HttpUpstream::new(http_client));

    let telemetry_repo = Arc::new(InMemoryTelemetryRepo::new());

    // Initialize application state
    let state = Arc::new(
        RouterState::new(config.clone(), source, upstream, telemetry_repo).await?,
    );
    info!("Application state initialized");

    // Warm the candidate cache
    if let Err(e) = state.cache.preload().await {
        warn!(error = %e, "Candidate cache preload failed");
    }

    // Start the health sweeper
    let shutdown = CancellationToken::new();
    let sweeper_handle = state.sweeper(Arc::new(SystemClock)).spawn(shutdown.clone());

    // Build the router
    let app = routes::create_router(state.clone());

    // Bind to address
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the sweeper before exiting
    shutdown.cancel();
    let _ = sweeper_handle.await;

    info!("Switchyard shutdown complete");
    Ok(())
}

/// Read the channel table from `CHANNELS_FILE` (JSON array of channels)
fn load_channels() -> Result<Vec<Channel>> {
    match std::env::var("CHANNELS_FILE") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {path}"))?;
            let channels: Vec<Channel> = serde_json::from_str(&raw)
                .with_context(|| format!("invalid channel JSON in {path}"))?;
            Ok(channels)
        }
        Err(_) => {
            warn!("CHANNELS_FILE not set, starting with an empty channel table");
            Ok(Vec::new())
        }
    }
}

/// Handle graceful shutdown signals
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating shutdown");
        }
    }
}
