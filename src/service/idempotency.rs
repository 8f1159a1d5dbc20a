//! Short-lived deduplication of client retries.
//!
//! The guard only prevents visible double-processing when a single client
//! retries; it is not a lock. Two concurrent first submissions with the
//! same key can both pass [`IdempotencyGuard::check`] and both be stored.
//! The first [`IdempotencyGuard::reserve`] wins and later lookups return
//! its event id.

use std::sync::Arc;

use chrono::Utc;

use crate::domain::EventId;
use crate::error::GatewayError;
use crate::persistence::{DurableStore, IdempotencyRecord};

/// Idempotency-key lookup and reservation over the durable store.
#[derive(Debug, Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn DurableStore>,
    ttl_secs: i64,
}

impl IdempotencyGuard {
    /// Creates a guard whose records live `ttl_secs` seconds.
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>, ttl_secs: i64) -> Self {
        Self { store, ttl_secs }
    }

    /// Returns the event id previously assigned to `key`, if any.
    ///
    /// An absent or empty key never matches.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::StoreUnavailable`] if the lookup fails.
    pub async fn check(&self, key: Option<&str>) -> Result<Option<EventId>, GatewayError> {
        let Some(key) = key.filter(|k| !k.is_empty()) else {
            return Ok(None);
        };
        Ok(self
            .store
            .get_idempotency(key, Utc::now().timestamp())
            .await?)
    }

    /// Records `event_id` for `key`. Losing a race to a concurrent
    /// duplicate is not an error; the earlier record stays canonical.
    ///
    /// Returns `true` if this call's record was stored.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::StoreUnavailable`] if the write fails.
    pub async fn reserve(&self, key: &str, event_id: EventId) -> Result<bool, GatewayError> {
        let now = Utc::now().timestamp();
        let record = IdempotencyRecord {
            key: key.to_string(),
            event_id,
            expires_at: now.saturating_add(self.ttl_secs),
        };
        let stored = self.store.put_idempotency_if_absent(&record, now).await?;
        if !stored {
            tracing::debug!(key, %event_id, "idempotency key already reserved by a concurrent request");
        }
        Ok(stored)
    }
}
