//! Fault-injecting store wrapper for tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use super::models::IdempotencyRecord;
use super::{DurableStore, MemoryStore, StoreError};
use crate::domain::{
    AggregateCounter, Connection, ConnectionId, CounterKey, CounterScope, EventId, LibraryCounter,
    LibraryEntry, LibraryEntryId, LibraryInsert, LibrarySelector, ShotEvent,
};

/// Store operations that can be made to fail or stall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    PutShot,
    GetIdempotency,
    PutIdempotency,
    IncrementWindow,
    ResetWindow,
    IncrementCounter,
    UpsertConnection,
    TouchConnection,
    DeleteConnection,
    ListConnections,
    Ping,
    InsertLibraryEntry,
    IncrementLibraryCounter,
}

/// [`MemoryStore`] with per-operation failure and delay switches.
#[derive(Debug, Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    failing: Mutex<HashSet<Op>>,
    /// Number of upcoming calls of an op that fail before it recovers.
    failing_times: Mutex<HashMap<Op, usize>>,
    delays: Mutex<HashMap<Op, Duration>>,
    calls: Mutex<HashMap<Op, usize>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, op: Op) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(op);
        }
    }

    pub fn fail_times(&self, op: Op, times: usize) {
        if let Ok(mut failing) = self.failing_times.lock() {
            failing.insert(op, times);
        }
    }

    pub fn delay(&self, op: Op, by: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.insert(op, by);
        }
    }

    pub fn calls(&self, op: Op) -> usize {
        self.calls
            .lock()
            .ok()
            .and_then(|calls| calls.get(&op).copied())
            .unwrap_or(0)
    }

    async fn enter(&self, op: Op) -> Result<(), StoreError> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(op).or_default() += 1;
        }
        let delay = self
            .delays
            .lock()
            .ok()
            .and_then(|delays| delays.get(&op).copied());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let always = self
            .failing
            .lock()
            .map(|failing| failing.contains(&op))
            .unwrap_or(false);
        let once = self
            .failing_times
            .lock()
            .map(|mut failing| match failing.get_mut(&op) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            })
            .unwrap_or(false);
        if always || once {
            return Err(StoreError::Unavailable(format!("injected failure in {op:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for FaultyStore {
    async fn put_shot(&self, event: &ShotEvent, expires_at: i64) -> Result<(), StoreError> {
        self.enter(Op::PutShot).await?;
        self.inner.put_shot(event, expires_at).await
    }

    async fn shots_for_day(
        &self,
        day: NaiveDate,
        limit: Option<usize>,
    ) -> Result<Vec<ShotEvent>, StoreError> {
        self.inner.shots_for_day(day, limit).await
    }

    async fn get_idempotency(&self, key: &str, now: i64) -> Result<Option<EventId>, StoreError> {
        self.enter(Op::GetIdempotency).await?;
        self.inner.get_idempotency(key, now).await
    }

    async fn put_idempotency_if_absent(
        &self,
        record: &IdempotencyRecord,
        now: i64,
    ) -> Result<bool, StoreError> {
        self.enter(Op::PutIdempotency).await?;
        self.inner.put_idempotency_if_absent(record, now).await
    }

    async fn increment_window(
        &self,
        key: &str,
        window_start: i64,
        expires_at: i64,
    ) -> Result<Option<u64>, StoreError> {
        self.enter(Op::IncrementWindow).await?;
        self.inner
            .increment_window(key, window_start, expires_at)
            .await
    }

    async fn reset_window(
        &self,
        key: &str,
        window_start: i64,
        expires_at: i64,
    ) -> Result<(), StoreError> {
        self.enter(Op::ResetWindow).await?;
        self.inner.reset_window(key, window_start, expires_at).await
    }

    async fn increment_counter(
        &self,
        key: &CounterKey,
        timestamp: i64,
        expires_at: i64,
    ) -> Result<u64, StoreError> {
        self.enter(Op::IncrementCounter).await?;
        self.inner
            .increment_counter(key, timestamp, expires_at)
            .await
    }

    async fn get_counter(&self, key: &CounterKey) -> Result<Option<AggregateCounter>, StoreError> {
        self.inner.get_counter(key).await
    }

    async fn counters_for_day(
        &self,
        day: NaiveDate,
        scope: CounterScope,
    ) -> Result<Vec<AggregateCounter>, StoreError> {
        self.inner.counters_for_day(day, scope).await
    }

    async fn upsert_connection(&self, connection: &Connection) -> Result<(), StoreError> {
        self.enter(Op::UpsertConnection).await?;
        self.inner.upsert_connection(connection).await
    }

    async fn touch_connection(
        &self,
        id: &ConnectionId,
        now: i64,
        expires_at: i64,
    ) -> Result<bool, StoreError> {
        self.enter(Op::TouchConnection).await?;
        self.inner.touch_connection(id, now, expires_at).await
    }

    async fn delete_connection(&self, id: &ConnectionId) -> Result<(), StoreError> {
        self.enter(Op::DeleteConnection).await?;
        self.inner.delete_connection(id).await
    }

    async fn list_connections(&self, now: i64) -> Result<Vec<Connection>, StoreError> {
        self.enter(Op::ListConnections).await?;
        self.inner.list_connections(now).await
    }

    async fn purge_expired(&self, now: i64) -> Result<u64, StoreError> {
        self.inner.purge_expired(now).await
    }

    async fn insert_library_entry(&self, entry: &LibraryEntry) -> Result<LibraryInsert, StoreError> {
        self.enter(Op::InsertLibraryEntry).await?;
        self.inner.insert_library_entry(entry).await
    }

    async fn get_library_entry(
        &self,
        id: &LibraryEntryId,
    ) -> Result<Option<LibraryEntry>, StoreError> {
        self.inner.get_library_entry(id).await
    }

    async fn library_entries(
        &self,
        selector: &LibrarySelector,
    ) -> Result<Vec<LibraryEntry>, StoreError> {
        self.inner.library_entries(selector).await
    }

    async fn delete_library_entry(
        &self,
        id: &LibraryEntryId,
        device_id: &str,
    ) -> Result<bool, StoreError> {
        self.inner.delete_library_entry(id, device_id).await
    }

    async fn increment_library_counter(
        &self,
        id: &LibraryEntryId,
        counter: LibraryCounter,
    ) -> Result<Option<u64>, StoreError> {
        self.enter(Op::IncrementLibraryCounter).await?;
        self.inner.increment_library_counter(id, counter).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.enter(Op::Ping).await?;
        self.inner.ping().await
    }
}
