//! Timeout decorator for any [`DurableStore`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use super::models::IdempotencyRecord;
use super::{DurableStore, StoreError};
use crate::domain::{
    AggregateCounter, Connection, ConnectionId, CounterKey, CounterScope, EventId, LibraryCounter,
    LibraryEntry, LibraryEntryId, LibraryInsert, LibrarySelector, ShotEvent,
};

/// Wraps a store so that every call completes within `timeout` or fails
/// with [`StoreError::Timeout`].
#[derive(Debug, Clone)]
pub struct BoundedStore {
    inner: Arc<dyn DurableStore>,
    timeout: Duration,
}

impl BoundedStore {
    /// Wraps `inner` with a per-call bound.
    #[must_use]
    pub fn new(inner: Arc<dyn DurableStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>> + Send,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl DurableStore for BoundedStore {
    async fn put_shot(&self, event: &ShotEvent, expires_at: i64) -> Result<(), StoreError> {
        self.bounded(self.inner.put_shot(event, expires_at)).await
    }

    async fn shots_for_day(
        &self,
        day: NaiveDate,
        limit: Option<usize>,
    ) -> Result<Vec<ShotEvent>, StoreError> {
        self.bounded(self.inner.shots_for_day(day, limit)).await
    }

    async fn get_idempotency(&self, key: &str, now: i64) -> Result<Option<EventId>, StoreError> {
        self.bounded(self.inner.get_idempotency(key, now)).await
    }

    async fn put_idempotency_if_absent(
        &self,
        record: &IdempotencyRecord,
        now: i64,
    ) -> Result<bool, StoreError> {
        self.bounded(self.inner.put_idempotency_if_absent(record, now))
            .await
    }

    async fn increment_window(
        &self,
        key: &str,
        window_start: i64,
        expires_at: i64,
    ) -> Result<Option<u64>, StoreError> {
        self.bounded(self.inner.increment_window(key, window_start, expires_at))
            .await
    }

    async fn reset_window(
        &self,
        key: &str,
        window_start: i64,
        expires_at: i64,
    ) -> Result<(), StoreError> {
        self.bounded(self.inner.reset_window(key, window_start, expires_at))
            .await
    }

    async fn increment_counter(
        &self,
        key: &CounterKey,
        timestamp: i64,
        expires_at: i64,
    ) -> Result<u64, StoreError> {
        self.bounded(self.inner.increment_counter(key, timestamp, expires_at))
            .await
    }

    async fn get_counter(&self, key: &CounterKey) -> Result<Option<AggregateCounter>, StoreError> {
        self.bounded(self.inner.get_counter(key)).await
    }

    async fn counters_for_day(
        &self,
        day: NaiveDate,
        scope: CounterScope,
    ) -> Result<Vec<AggregateCounter>, StoreError> {
        self.bounded(self.inner.counters_for_day(day, scope)).await
    }

    async fn upsert_connection(&self, connection: &Connection) -> Result<(), StoreError> {
        self.bounded(self.inner.upsert_connection(connection)).await
    }

    async fn touch_connection(
        &self,
        id: &ConnectionId,
        now: i64,
        expires_at: i64,
    ) -> Result<bool, StoreError> {
        self.bounded(self.inner.touch_connection(id, now, expires_at))
            .await
    }

    async fn delete_connection(&self, id: &ConnectionId) -> Result<(), StoreError> {
        self.bounded(self.inner.delete_connection(id)).await
    }

    async fn list_connections(&self, now: i64) -> Result<Vec<Connection>, StoreError> {
        self.bounded(self.inner.list_connections(now)).await
    }

    async fn purge_expired(&self, now: i64) -> Result<u64, StoreError> {
        self.bounded(self.inner.purge_expired(now)).await
    }

    async fn insert_library_entry(&self, entry: &LibraryEntry) -> Result<LibraryInsert, StoreError> {
        self.bounded(self.inner.insert_library_entry(entry)).await
    }

    async fn get_library_entry(
        &self,
        id: &LibraryEntryId,
    ) -> Result<Option<LibraryEntry>, StoreError> {
        self.bounded(self.inner.get_library_entry(id)).await
    }

    async fn library_entries(
        &self,
        selector: &LibrarySelector,
    ) -> Result<Vec<LibraryEntry>, StoreError> {
        self.bounded(self.inner.library_entries(selector)).await
    }

    async fn delete_library_entry(
        &self,
        id: &LibraryEntryId,
        device_id: &str,
    ) -> Result<bool, StoreError> {
        self.bounded(self.inner.delete_library_entry(id, device_id))
            .await
    }

    async fn increment_library_counter(
        &self,
        id: &LibraryEntryId,
        counter: LibraryCounter,
    ) -> Result<Option<u64>, StoreError> {
        self.bounded(self.inner.increment_library_counter(id, counter))
            .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.bounded(self.inner.ping()).await
    }
}
