//! Service layer: the ingestion pipeline and the components it drives.
//!
//! [`IngestService`] orchestrates the [`RateLimiter`], [`IdempotencyGuard`],
//! [`CityResolver`] and [`AggregateUpdater`], then hands stored events to
//! the [`crate::ws::broadcast::BroadcastEngine`]. [`LibraryService`]
//! serves the shared profile library with the same limiter.

pub mod aggregates;
pub mod city_resolver;
pub mod idempotency;
pub mod ingest_service;
pub mod library;
pub mod rate_limiter;

pub use aggregates::{AggregateReport, AggregateUpdater, StatsSnapshot};
pub use city_resolver::{CityDirectory, CityEntry, CityResolver, StaticCityDirectory};
pub use idempotency::IdempotencyGuard;
pub use ingest_service::{IngestOutcome, IngestService};
pub use library::{FlagOutcome, LibraryCreated, LibraryPage, LibraryQuery, LibraryService};
pub use rate_limiter::{RateLimitDecision, RateLimitPolicy, RateLimiter};
