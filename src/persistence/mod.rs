//! Durable store adapter.
//!
//! [`DurableStore`] abstracts the partitioned key-value store every other
//! component persists through: point get/put, range reads by partition,
//! and atomic single-key conditional increments. No operation spans more
//! than one key, so implementations never need cross-key locking.
//!
//! Implementations:
//! - [`MemoryStore`]: in-process maps, used when persistence is disabled
//!   and throughout the tests.
//! - [`PostgresStore`]: `sqlx::PgPool` backed, conditional writes expressed
//!   as `INSERT .. ON CONFLICT .. DO UPDATE .. WHERE`.
//! - [`BoundedStore`]: decorator enforcing a timeout on every call.
//!
//! [`spawn_sweeper`] runs the TTL garbage collection in the background.

pub mod bounded;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod sweeper;
#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::{
    AggregateCounter, Connection, ConnectionId, CounterKey, CounterScope, EventId, LibraryCounter,
    LibraryEntry, LibraryEntryId, LibraryInsert, LibrarySelector, ShotEvent,
};

pub use bounded::BoundedStore;
pub use memory::MemoryStore;
pub use models::IdempotencyRecord;
pub use postgres::PostgresStore;
pub use sweeper::spawn_sweeper;

/// Failure talking to the durable store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backend rejected the call or could not be reached.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete within the configured bound.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A stored row could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Partitioned key-value store used by every stateful component.
///
/// All timestamps named `*_secs` / `expires_at` are Unix seconds; event
/// timestamps are Unix milliseconds. Records whose `expires_at` is at or
/// before `now` are treated as absent by every read that takes a `now`.
#[async_trait]
pub trait DurableStore: Send + Sync + std::fmt::Debug {
    /// Writes an event into its day partition.
    async fn put_shot(&self, event: &ShotEvent, expires_at: i64) -> Result<(), StoreError>;

    /// Reads a day partition, newest first by `(timestamp, event_id)`.
    async fn shots_for_day(
        &self,
        day: NaiveDate,
        limit: Option<usize>,
    ) -> Result<Vec<ShotEvent>, StoreError>;

    /// Looks up the event id recorded for an idempotency key.
    async fn get_idempotency(&self, key: &str, now: i64) -> Result<Option<EventId>, StoreError>;

    /// Records `record` unless a live record for the same key exists.
    ///
    /// Returns `true` if this call's value was stored.
    async fn put_idempotency_if_absent(
        &self,
        record: &IdempotencyRecord,
        now: i64,
    ) -> Result<bool, StoreError>;

    /// Atomically adds one to the window counter stored under `key`,
    /// provided the row is absent or was created for `window_start`.
    ///
    /// Returns the new count, or `None` when the stored window differs.
    async fn increment_window(
        &self,
        key: &str,
        window_start: i64,
        expires_at: i64,
    ) -> Result<Option<u64>, StoreError>;

    /// Unconditionally overwrites `key` with `{count: 1, window_start}`.
    async fn reset_window(
        &self,
        key: &str,
        window_start: i64,
        expires_at: i64,
    ) -> Result<(), StoreError>;

    /// Atomically adds one to a counter, creating it at 1 if absent, and
    /// records `timestamp` as the last event seen. Returns the new count.
    async fn increment_counter(
        &self,
        key: &CounterKey,
        timestamp: i64,
        expires_at: i64,
    ) -> Result<u64, StoreError>;

    /// Reads a single counter.
    async fn get_counter(&self, key: &CounterKey) -> Result<Option<AggregateCounter>, StoreError>;

    /// Reads every counter of `scope` in a day partition.
    async fn counters_for_day(
        &self,
        day: NaiveDate,
        scope: CounterScope,
    ) -> Result<Vec<AggregateCounter>, StoreError>;

    /// Creates a connection, or replaces filters and lease of an existing
    /// one while keeping its original `connected_at`.
    async fn upsert_connection(&self, connection: &Connection) -> Result<(), StoreError>;

    /// Moves a connection's lease end. Returns `false` if no live record
    /// exists at `now`.
    async fn touch_connection(
        &self,
        id: &ConnectionId,
        now: i64,
        expires_at: i64,
    ) -> Result<bool, StoreError>;

    /// Deletes a connection. Deleting a missing connection is not an error.
    async fn delete_connection(&self, id: &ConnectionId) -> Result<(), StoreError>;

    /// Lists every connection whose lease is still running at `now`.
    async fn list_connections(&self, now: i64) -> Result<Vec<Connection>, StoreError>;

    /// Removes every record whose lease or retention ended at or before
    /// `now`. Returns the number of records removed.
    async fn purge_expired(&self, now: i64) -> Result<u64, StoreError>;

    /// Stores `entry` unless an entry with the same `data_hash` exists.
    async fn insert_library_entry(&self, entry: &LibraryEntry) -> Result<LibraryInsert, StoreError>;

    /// Reads one library entry.
    async fn get_library_entry(
        &self,
        id: &LibraryEntryId,
    ) -> Result<Option<LibraryEntry>, StoreError>;

    /// Reads every entry named by `selector`, in no particular order.
    async fn library_entries(
        &self,
        selector: &LibrarySelector,
    ) -> Result<Vec<LibraryEntry>, StoreError>;

    /// Deletes an entry if `device_id` uploaded it. Returns `false` when
    /// the entry is missing or owned by another device.
    async fn delete_library_entry(
        &self,
        id: &LibraryEntryId,
        device_id: &str,
    ) -> Result<bool, StoreError>;

    /// Atomically adds one to a counter of an existing entry. Returns the
    /// new value, or `None` if the entry does not exist.
    async fn increment_library_counter(
        &self,
        id: &LibraryEntryId,
        counter: LibraryCounter,
    ) -> Result<Option<u64>, StoreError>;

    /// Round trip to the backend without touching data.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
