//! Process wiring: store selection, background tasks and the HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::api;
use crate::app_state::AppState;
use crate::config::GatewayConfig;
use crate::persistence::{BoundedStore, DurableStore, MemoryStore, PostgresStore, spawn_sweeper};
use crate::service::{CityDirectory, StaticCityDirectory};

/// Opens the configured store, wrapped with the per-call timeout.
///
/// # Errors
///
/// Returns an error if PostgreSQL is enabled and cannot be reached or
/// migrated.
pub async fn open_store(config: &GatewayConfig) -> anyhow::Result<Arc<dyn DurableStore>> {
    let inner: Arc<dyn DurableStore> = if config.persistence_enabled {
        let store = PostgresStore::connect(config).await?;
        store.migrate().await?;
        tracing::info!("using PostgreSQL store");
        Arc::new(store)
    } else {
        tracing::warn!("persistence disabled, state is kept in memory only");
        Arc::new(MemoryStore::new())
    };
    Ok(Arc::new(BoundedStore::new(inner, config.store_timeout)))
}

/// Loads the city table: built-in entries plus `CITIES_FILE`, if set.
///
/// # Errors
///
/// Returns an error if `CITIES_FILE` is set but unreadable.
pub fn load_cities(config: &GatewayConfig) -> anyhow::Result<Arc<dyn CityDirectory>> {
    let directory = match &config.cities_file {
        Some(path) => StaticCityDirectory::with_file(path)?,
        None => StaticCityDirectory::with_builtin(),
    };
    tracing::info!(cities = directory.len(), "city directory loaded");
    Ok(Arc::new(directory))
}

/// Serves the gateway on `listener` until the process stops.
///
/// Starts the expired-record sweeper over `store`.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(
    listener: TcpListener,
    config: &GatewayConfig,
    store: Arc<dyn DurableStore>,
    cities: Arc<dyn CityDirectory>,
) -> anyhow::Result<()> {
    let state = AppState::new(config, Arc::clone(&store), cities);
    let _sweeper = spawn_sweeper(store, config.store_sweep_interval);
    let app = api::build_app(state, config.request_timeout);

    tracing::info!(addr = %listener.local_addr()?, "server listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
