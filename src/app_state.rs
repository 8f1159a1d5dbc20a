//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::persistence::DurableStore;
use crate::service::{
    AggregateUpdater, CityDirectory, CityResolver, IdempotencyGuard, IngestService,
    LibraryService, RateLimitPolicy, RateLimiter,
};
use crate::ws::broadcast::{BroadcastEngine, PushChannel};
use crate::ws::hub::ConnectionHub;
use crate::ws::registry::ConnectionRegistry;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Shared durable store, pinged by the health check.
    pub store: Arc<dyn DurableStore>,
    /// Ingestion pipeline and recent-shot reads.
    pub ingest: Arc<IngestService>,
    /// Shared profile library.
    pub library: Arc<LibraryService>,
    /// Stats read path.
    pub aggregates: AggregateUpdater,
    /// Limiter used for WebSocket upgrades.
    pub rate_limiter: RateLimiter,
    /// Quota applied to WebSocket upgrades.
    pub ws_connect_policy: RateLimitPolicy,
    /// Fan-out engine (owns the connection registry).
    pub broadcaster: BroadcastEngine,
    /// Outbound queues of the sockets served by this process.
    pub hub: ConnectionHub,
    /// Whether `X-Forwarded-For` identifies the client.
    pub trust_forwarded_for: bool,
}

impl AppState {
    /// Wires every component over `store` and `cities`.
    #[must_use]
    pub fn new(
        config: &GatewayConfig,
        store: Arc<dyn DurableStore>,
        cities: Arc<dyn CityDirectory>,
    ) -> Self {
        let rate_limiter = RateLimiter::new(Arc::clone(&store));
        let hub = ConnectionHub::new(config.ws_outbound_buffer);
        let registry = ConnectionRegistry::new(Arc::clone(&store), config.connection_ttl_secs);
        let broadcaster = BroadcastEngine::new(
            registry,
            Arc::new(hub.clone()) as Arc<dyn PushChannel>,
            config.delivery_timeout,
        );
        let aggregates = AggregateUpdater::new(
            Arc::clone(&store),
            config.raw_ttl_secs(),
            config.stats_top_k,
        );
        let ingest = IngestService::new(
            Arc::clone(&store),
            rate_limiter.clone(),
            config.ingest_rate_limit.clone(),
            IdempotencyGuard::new(Arc::clone(&store), config.idempotency_ttl_secs),
            CityResolver::new(cities, config.city_lookup_timeout),
            aggregates.clone(),
            broadcaster.clone(),
            config.raw_ttl_secs(),
        );

        let library = LibraryService::new(
            Arc::clone(&store),
            rate_limiter.clone(),
            config.library_upload_rate_limit.clone(),
            config.library_flag_rate_limit.clone(),
        );

        Self {
            store,
            ingest: Arc::new(ingest),
            library: Arc::new(library),
            aggregates,
            rate_limiter,
            ws_connect_policy: config.ws_connect_rate_limit.clone(),
            broadcaster,
            hub,
            trust_forwarded_for: config.trust_forwarded_for,
        }
    }
}
