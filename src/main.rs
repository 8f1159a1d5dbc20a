//! shotmap-gateway server entry point.
//!
//! Loads configuration, initializes tracing, opens the store and starts
//! the Axum HTTP server with REST and WebSocket endpoints.

use tracing_subscriber::EnvFilter;

use shotmap_gateway::config::{GatewayConfig, LogFormat};
use shotmap_gateway::server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = GatewayConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::info!(addr = %config.listen_addr, "starting shotmap-gateway");

    let store = server::open_store(&config).await?;
    let cities = server::load_cities(&config)?;

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    server::serve(listener, &config, store, cities).await?;

    Ok(())
}
