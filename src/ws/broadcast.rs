//! Fan-out of shots to live connections.
//!
//! [`BroadcastEngine::broadcast`] snapshots the registry, applies each
//! connection's filter and pushes to every match concurrently. Outcomes
//! are counted, never raised:
//!
//! | delivery result            | counted as | registry effect |
//! |----------------------------|------------|-----------------|
//! | `Ok`                       | `sent`     | none            |
//! | [`DeliveryError::Gone`]    | `stale`    | evicted         |
//! | timeout / transient error  | `failed`   | none            |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;

use super::messages::PushMessage;
use super::registry::ConnectionRegistry;
use crate::domain::{ConnectionId, ShotEvent};

/// Why a single push did not reach its connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The peer no longer exists; its registration is stale.
    #[error("connection is gone")]
    Gone,

    /// The push did not complete within the delivery timeout.
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    /// Any other failure; the connection may recover.
    #[error("transient delivery failure: {0}")]
    Transient(String),
}

/// Transport able to push a serialized message to one connection.
#[async_trait]
pub trait PushChannel: Send + Sync + std::fmt::Debug {
    /// Pushes `payload` (a JSON text frame) to `id`.
    async fn deliver(&self, id: &ConnectionId, payload: &str) -> Result<(), DeliveryError>;
}

/// Counts of one broadcast's delivery outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastSummary {
    /// Deliveries that succeeded.
    pub sent: usize,
    /// Deliveries that failed but left the connection registered.
    pub failed: usize,
    /// Connections found gone and evicted.
    pub stale: usize,
}

/// Delivers shots and protocol replies to registered connections.
#[derive(Debug, Clone)]
pub struct BroadcastEngine {
    registry: ConnectionRegistry,
    channel: Arc<dyn PushChannel>,
    delivery_timeout: Duration,
}

impl BroadcastEngine {
    /// Creates an engine bounding each delivery by `delivery_timeout`.
    #[must_use]
    pub fn new(
        registry: ConnectionRegistry,
        channel: Arc<dyn PushChannel>,
        delivery_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            channel,
            delivery_timeout,
        }
    }

    /// The registry this engine evicts from.
    #[must_use]
    pub const fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Pushes `event` to every connection whose filter accepts it.
    pub async fn broadcast(&self, event: &ShotEvent) -> BroadcastSummary {
        let connections = match self.registry.list_all().await {
            Ok(connections) => connections,
            Err(e) => {
                tracing::warn!(event_id = %event.event_id, error = %e, "could not list connections");
                return BroadcastSummary::default();
            }
        };
        let payload = match serde_json::to_string(&PushMessage::Shot(event.to_broadcast())) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(event_id = %event.event_id, error = %e, "could not serialize shot");
                return BroadcastSummary::default();
            }
        };

        let deliveries = connections
            .iter()
            .filter(|conn| conn.accepts(event))
            .map(|conn| self.deliver_or_evict(&conn.connection_id, &payload));
        let outcomes = join_all(deliveries).await;

        let mut summary = BroadcastSummary::default();
        for outcome in outcomes {
            match outcome {
                Ok(()) => summary.sent += 1,
                Err(DeliveryError::Gone) => summary.stale += 1,
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }

    /// Pushes one message to one connection, evicting it if gone.
    ///
    /// # Errors
    ///
    /// Returns the [`DeliveryError`] of the failed push.
    pub async fn send_direct<M: Serialize + Sync>(
        &self,
        id: &ConnectionId,
        message: &M,
    ) -> Result<(), DeliveryError> {
        let payload =
            serde_json::to_string(message).map_err(|e| DeliveryError::Transient(e.to_string()))?;
        self.deliver_or_evict(id, &payload).await
    }

    async fn deliver_or_evict(&self, id: &ConnectionId, payload: &str) -> Result<(), DeliveryError> {
        let result =
            match tokio::time::timeout(self.delivery_timeout, self.channel.deliver(id, payload))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::Timeout(self.delivery_timeout)),
            };
        match &result {
            Ok(()) => {}
            Err(DeliveryError::Gone) => {
                tracing::debug!(connection_id = %id, "evicting stale connection");
                if let Err(e) = self.registry.remove(id).await {
                    tracing::warn!(connection_id = %id, error = %e, "stale connection eviction failed");
                }
            }
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "delivery failed");
            }
        }
        result
    }
}
