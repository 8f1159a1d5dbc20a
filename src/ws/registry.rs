//! Durable registry of live connections.
//!
//! Every record carries a lease (`expires_at`) refreshed by heartbeats.
//! Expired records are invisible to [`ConnectionRegistry::list_all`] and
//! garbage-collected by the store sweeper, never by this type.

use std::sync::Arc;

use chrono::Utc;

use crate::domain::{Connection, ConnectionFilters, ConnectionId};
use crate::persistence::{DurableStore, StoreError};

/// Connection lifecycle operations over the durable store.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    store: Arc<dyn DurableStore>,
    lease_secs: i64,
}

impl ConnectionRegistry {
    /// Creates a registry granting leases of `lease_secs`.
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>, lease_secs: i64) -> Self {
        Self { store, lease_secs }
    }

    /// Lease length in seconds.
    #[must_use]
    pub const fn lease_secs(&self) -> i64 {
        self.lease_secs
    }

    fn connection(&self, id: &ConnectionId, filters: Option<ConnectionFilters>) -> Connection {
        let now = Utc::now();
        Connection {
            connection_id: id.clone(),
            connected_at: now.timestamp_millis(),
            filters,
            expires_at: now.timestamp().saturating_add(self.lease_secs),
        }
    }

    /// Records a new connection with a fresh lease.
    ///
    /// # Errors
    ///
    /// Returns the store error if the write fails.
    pub async fn register(
        &self,
        id: &ConnectionId,
        filters: Option<ConnectionFilters>,
    ) -> Result<(), StoreError> {
        self.store
            .upsert_connection(&self.connection(id, filters))
            .await
    }

    /// Replaces (or with `None`, clears) a connection's filter and
    /// renews its lease. `connected_at` is preserved.
    ///
    /// # Errors
    ///
    /// Returns the store error if the write fails.
    pub async fn update_filters(
        &self,
        id: &ConnectionId,
        filters: Option<ConnectionFilters>,
    ) -> Result<(), StoreError> {
        self.register(id, filters).await
    }

    /// Extends the lease, leaving filters untouched. A connection whose
    /// record already expired is registered again without filters.
    ///
    /// # Errors
    ///
    /// Returns the store error if a write fails.
    pub async fn heartbeat(&self, id: &ConnectionId) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        let expires_at = now.saturating_add(self.lease_secs);
        if self.store.touch_connection(id, now, expires_at).await? {
            return Ok(());
        }
        tracing::debug!(connection_id = %id, "heartbeat for unknown connection, re-registering");
        self.register(id, None).await
    }

    /// Removes a connection. Removing an unknown id is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the store error if the delete fails.
    pub async fn remove(&self, id: &ConnectionId) -> Result<(), StoreError> {
        self.store.delete_connection(id).await
    }

    /// Snapshot of every connection with a running lease. The snapshot
    /// may already be stale by the time it is used.
    ///
    /// # Errors
    ///
    /// Returns the store error if the read fails.
    pub async fn list_all(&self) -> Result<Vec<Connection>, StoreError> {
        self.store.list_connections(Utc::now().timestamp()).await
    }
}
