//! # shotmap-gateway
//!
//! Ingestion API and live WebSocket feed for espresso "shot" events.
//!
//! Clients report shots over HTTP. Each report is validated, rate limited
//! per source address, deduplicated by an optional idempotency key,
//! geolocated by city name, stored in a day-partitioned store, counted in
//! daily aggregates and pushed to every live viewer whose filter matches.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP)                  Viewers (WebSocket)
//!     │                                │
//!     ├── REST Handlers (api/)         ├── WS Handler + protocol (ws/)
//!     │                                │
//!     ├── IngestService (service/)     │
//!     │     ├── RateLimiter            │
//!     │     ├── IdempotencyGuard       │
//!     │     ├── CityResolver           │
//!     │     ├── AggregateUpdater       │
//!     │     └── BroadcastEngine ───────┼── ConnectionHub (push channel)
//!     │                                │
//!     └── DurableStore (persistence/) ─┴── ConnectionRegistry
//!           ├── MemoryStore
//!           ├── PostgresStore
//!           └── BoundedStore (timeouts)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod server;
pub mod service;
pub mod ws;
