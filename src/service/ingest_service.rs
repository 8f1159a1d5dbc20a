//! Shot ingestion pipeline.
//!
//! `validate -> idempotency check -> rate limit -> resolve -> {persist,
//! aggregate, reserve key} -> broadcast -> respond`.
//!
//! A retry carrying the key of a stored event returns that event before
//! any quota is consumed. Only validation, the idempotency lookup, rate
//! limiting and the primary write can fail a request. Aggregates, key
//! reservation and broadcast are best effort and only logged.

use std::sync::Arc;

use chrono::Utc;

use super::aggregates::{AggregateUpdater, previous_day};
use super::city_resolver::CityResolver;
use super::idempotency::IdempotencyGuard;
use super::rate_limiter::{RateLimitPolicy, RateLimiter};
use crate::domain::{Coordinates, EventId, ShotEvent, ShotSubmission, day_bucket};
use crate::error::GatewayError;
use crate::persistence::DurableStore;
use crate::ws::broadcast::BroadcastEngine;

/// Result of a successful ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    /// Identifier of the stored (or previously stored) event.
    pub event_id: EventId,
    /// Whether the location was resolved.
    pub resolved: bool,
    /// Coordinates stored for the event; `None` for duplicates.
    pub coordinates: Option<Coordinates>,
    /// `true` when the idempotency key matched an earlier event.
    pub duplicate: bool,
    /// Requests left in the caller's rate-limit window; `None` for
    /// duplicates, which do not touch the limiter.
    pub remaining: Option<u32>,
}

/// Collaborators and retention settings of the pipeline.
#[derive(Debug, Clone)]
pub struct IngestService {
    store: Arc<dyn DurableStore>,
    rate_limiter: RateLimiter,
    policy: RateLimitPolicy,
    idempotency: IdempotencyGuard,
    resolver: CityResolver,
    aggregates: AggregateUpdater,
    broadcaster: BroadcastEngine,
    raw_ttl_secs: i64,
}

impl IngestService {
    /// Wires the pipeline.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn DurableStore>,
        rate_limiter: RateLimiter,
        policy: RateLimitPolicy,
        idempotency: IdempotencyGuard,
        resolver: CityResolver,
        aggregates: AggregateUpdater,
        broadcaster: BroadcastEngine,
        raw_ttl_secs: i64,
    ) -> Self {
        Self {
            store,
            rate_limiter,
            policy,
            idempotency,
            resolver,
            aggregates,
            broadcaster,
            raw_ttl_secs,
        }
    }

    /// Ingests one submission from `source` (the rate-limit subject).
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Validation`] for malformed input (no side effects).
    /// - [`GatewayError::RateLimited`] once `source` exhausted its quota.
    /// - [`GatewayError::StoreUnavailable`] if the rate limiter, the
    ///   idempotency lookup or the primary write fails.
    pub async fn ingest(
        &self,
        submission: ShotSubmission,
        source: &str,
    ) -> Result<IngestOutcome, GatewayError> {
        let shot = submission.validate()?;

        let key = shot.idempotency_key.as_deref();
        if let Some(event_id) = self.idempotency.check(key).await? {
            tracing::info!(%event_id, "duplicate submission, returning prior event");
            return Ok(IngestOutcome {
                event_id,
                resolved: true,
                coordinates: None,
                duplicate: true,
                remaining: None,
            });
        }

        let decision = self
            .rate_limiter
            .check(&self.policy, source)
            .await?
            .into_result()
            .inspect_err(|_| tracing::info!(source, policy = %self.policy, "ingest rate limited"))?;

        let location = self
            .resolver
            .resolve(&shot.city, shot.country_code.as_deref(), shot.coordinates)
            .await;
        let event_id = EventId::new();
        let timestamp = shot
            .timestamp
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        let event = ShotEvent::new(event_id, timestamp, &location, shot.details);

        let expires_at = Utc::now().timestamp().saturating_add(self.raw_ttl_secs);
        let reserve = async {
            match key {
                Some(key) => self.idempotency.reserve(key, event_id).await.map(|_| ()),
                None => Ok(()),
            }
        };
        let (persisted, aggregates, reserved) = tokio::join!(
            self.store.put_shot(&event, expires_at),
            self.aggregates.increment(
                &event.city,
                &event.country_code,
                &event.profile,
                event.timestamp
            ),
            reserve,
        );

        if let Err(e) = persisted {
            tracing::error!(%event_id, error = %e, "failed to persist shot");
            return Err(e.into());
        }
        if aggregates.failed > 0 {
            tracing::warn!(%event_id, failed = aggregates.failed, "aggregates partially updated");
        }
        if let Err(e) = reserved {
            tracing::warn!(%event_id, error = %e, "failed to record idempotency key");
        }

        let summary = self.broadcaster.broadcast(&event).await;
        tracing::info!(
            %event_id,
            city = %event.city,
            country = %event.country_code,
            resolved = location.resolved,
            sent = summary.sent,
            failed = summary.failed,
            stale = summary.stale,
            "shot ingested"
        );

        Ok(IngestOutcome {
            event_id,
            resolved: location.resolved,
            coordinates: Some(event.coordinates()),
            duplicate: false,
            remaining: Some(decision.remaining),
        })
    }

    /// Most recent shots, newest first, from today's and yesterday's
    /// partitions. `limit` is clamped to `1..=100`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::StoreUnavailable`] if a read fails.
    pub async fn recent(&self, limit: usize) -> Result<Vec<ShotEvent>, GatewayError> {
        let limit = limit.clamp(1, 100);
        let today = day_bucket(Utc::now().timestamp_millis());
        let mut shots = self.store.shots_for_day(today, Some(limit)).await?;
        if shots.len() < limit {
            let rest = limit - shots.len();
            shots.extend(self.store.shots_for_day(previous_day(today), Some(rest)).await?);
        }
        Ok(shots)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::persistence::testing::{FaultyStore, Op};
    use crate::persistence::MemoryStore;
    use crate::service::city_resolver::StaticCityDirectory;
    use crate::ws::broadcast::PushChannel;
    use crate::ws::hub::ConnectionHub;
    use crate::ws::registry::ConnectionRegistry;

    struct Harness {
        service: IngestService,
        store: Arc<FaultyStore>,
        hub: ConnectionHub,
        registry: ConnectionRegistry,
    }

    fn harness() -> Harness {
        let store = Arc::new(FaultyStore::new());
        let dyn_store: Arc<dyn DurableStore> = Arc::clone(&store) as Arc<dyn DurableStore>;
        let hub = ConnectionHub::new(16);
        let registry = ConnectionRegistry::new(Arc::clone(&dyn_store), 7200);
        let broadcaster = BroadcastEngine::new(
            registry.clone(),
            Arc::new(hub.clone()) as Arc<dyn PushChannel>,
            Duration::from_millis(500),
        );
        let service = IngestService::new(
            Arc::clone(&dyn_store),
            RateLimiter::new(Arc::clone(&dyn_store)),
            RateLimitPolicy::new("SHOT", 10, 3600),
            IdempotencyGuard::new(Arc::clone(&dyn_store), 3600),
            CityResolver::new(
                Arc::new(StaticCityDirectory::with_builtin()),
                Duration::from_millis(500),
            ),
            AggregateUpdater::new(Arc::clone(&dyn_store), 86_400, 5),
            broadcaster,
            180 * 86_400,
        );
        Harness {
            service,
            store,
            hub,
            registry,
        }
    }

    fn submission(city: &str, key: Option<&str>) -> ShotSubmission {
        let Ok(submission) = serde_json::from_value(serde_json::json!({
            "city": city,
            "profile": "Blooming Espresso",
            "software_name": "Decenza",
            "software_version": "1.4.0",
            "machine_model": "DE1XL",
            "idempotency_key": key,
        })) else {
            panic!("valid submission JSON");
        };
        submission
    }

    #[tokio::test]
    async fn resolvable_city_is_stored_and_resolved() {
        let h = harness();
        let Ok(outcome) = h.service.ingest(submission("Berlin", None), "1.2.3.4").await else {
            panic!("ingest should succeed");
        };
        assert!(outcome.resolved);
        assert!(!outcome.duplicate);
        assert_eq!(outcome.coordinates, Some(Coordinates::new(52.52, 13.405)));
        assert_eq!(outcome.remaining, Some(9));

        let Ok(recent) = h.service.recent(10).await else {
            panic!("recent should succeed");
        };
        let Some(stored) = recent.first() else {
            panic!("event should be stored");
        };
        assert_eq!(stored.event_id, outcome.event_id);
        assert_eq!(stored.city, "Berlin");
        assert_eq!(stored.country_code, "DE");
        assert_eq!((stored.lat, stored.lon), (52.52, 13.405));
    }

    #[tokio::test]
    async fn same_key_returns_same_event_once() {
        let h = harness();
        let Ok(first) = h.service.ingest(submission("Berlin", Some("k-1")), "ip").await else {
            panic!("first ingest should succeed");
        };
        let Ok(second) = h.service.ingest(submission("Berlin", Some("k-1")), "ip").await else {
            panic!("retry should succeed");
        };
        assert!(second.duplicate);
        assert!(second.resolved);
        assert_eq!(second.remaining, None);
        assert_eq!(h.store.calls(Op::IncrementWindow), 1);
        assert_eq!(first.event_id, second.event_id);
        assert_eq!(h.store.inner.shot_count().await, 1);
        assert_eq!(h.store.calls(Op::IncrementCounter), 3);

        let Ok(third) = h.service.ingest(submission("Berlin", Some("k-2")), "ip").await else {
            panic!("fresh key should succeed");
        };
        assert!(!third.duplicate);
        assert_ne!(third.event_id, first.event_id);
        assert_eq!(h.store.inner.shot_count().await, 2);
    }

    #[tokio::test]
    async fn eleventh_request_is_rate_limited() {
        let h = harness();
        for i in 0..10 {
            let result = h.service.ingest(submission("Paris", None), "9.9.9.9").await;
            assert!(result.is_ok(), "request {i} should pass");
        }
        let result = h.service.ingest(submission("Paris", None), "9.9.9.9").await;
        assert!(matches!(
            result,
            Err(GatewayError::RateLimited { remaining: 0, .. })
        ));
        assert!(h.service.ingest(submission("Paris", None), "other").await.is_ok());
    }

    #[tokio::test]
    async fn retry_of_stored_event_succeeds_after_quota_is_spent() {
        let h = harness();
        let Ok(first) = h.service.ingest(submission("Berlin", Some("retry-me")), "5.5.5.5").await
        else {
            panic!("first ingest should succeed");
        };
        for i in 0..9 {
            let result = h.service.ingest(submission("Berlin", None), "5.5.5.5").await;
            assert!(result.is_ok(), "filler {i} should pass");
        }
        assert!(matches!(
            h.service.ingest(submission("Berlin", None), "5.5.5.5").await,
            Err(GatewayError::RateLimited { .. })
        ));

        let Ok(retry) = h.service.ingest(submission("Berlin", Some("retry-me")), "5.5.5.5").await
        else {
            panic!("retry of a stored event should not be rate limited");
        };
        assert!(retry.duplicate);
        assert_eq!(retry.event_id, first.event_id);
        assert_eq!(h.store.inner.shot_count().await, 10);
    }

    #[tokio::test]
    async fn invalid_input_has_no_side_effects() {
        let h = harness();
        let result = h.service.ingest(submission("", None), "ip").await;
        assert!(matches!(result, Err(GatewayError::Validation(_))));
        assert_eq!(h.store.calls(Op::IncrementWindow), 0);
        assert_eq!(h.store.inner.shot_count().await, 0);
    }

    #[tokio::test]
    async fn primary_write_failure_fails_request() {
        let h = harness();
        h.store.fail(Op::PutShot);
        let result = h.service.ingest(submission("Berlin", None), "ip").await;
        assert!(matches!(result, Err(GatewayError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn aggregate_and_reservation_failures_are_tolerated() {
        let h = harness();
        h.store.fail(Op::IncrementCounter);
        h.store.fail(Op::PutIdempotency);
        let result = h.service.ingest(submission("Berlin", Some("k")), "ip").await;
        assert!(result.is_ok());
        assert_eq!(h.store.inner.shot_count().await, 1);
    }

    #[tokio::test]
    async fn rate_limiter_outage_fails_closed() {
        let h = harness();
        h.store.fail(Op::IncrementWindow);
        let result = h.service.ingest(submission("Berlin", None), "ip").await;
        assert!(matches!(result, Err(GatewayError::StoreUnavailable(_))));
        assert_eq!(h.store.inner.shot_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_city_without_coordinates_is_unresolved() {
        let h = harness();
        let Ok(outcome) = h.service.ingest(submission("Atlantis", None), "ip").await else {
            panic!("ingest should succeed");
        };
        assert!(!outcome.resolved);
        assert_eq!(outcome.coordinates, Some(Coordinates::new(0.0, -30.0)));
    }

    #[tokio::test]
    async fn subscribers_receive_matching_shots() {
        let h = harness();
        let id = crate::domain::ConnectionId::new("viewer");
        let _ = h.registry.register(&id, None).await;
        let mut rx = h.hub.attach(&id).await;

        let Ok(_) = h.service.ingest(submission("Tokyo", None), "ip").await else {
            panic!("ingest should succeed");
        };
        let Some(frame) = rx.recv().await else {
            panic!("expected a pushed frame");
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&frame) else {
            panic!("frame should be JSON");
        };
        assert_eq!(value["type"], "shot");
        assert_eq!(value["city"], "Tokyo");
        assert_eq!(value["country_code"], "JP");
    }
}
