//! In-process implementation of [`DurableStore`].
//!
//! Each table is a map behind its own [`tokio::sync::RwLock`]. Every
//! conditional operation runs entirely under the table's write lock, which
//! makes it atomic with respect to every other operation on that table.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

use super::models::{Expiring, IdempotencyRecord, RateLimitWindow};
use super::{DurableStore, StoreError};
use crate::domain::shot_event::day_partition_key;
use crate::domain::{
    AggregateCounter, Connection, ConnectionId, CounterKey, CounterScope, EventId, LibraryCounter,
    LibraryEntry, LibraryEntryId, LibraryInsert, LibrarySelector, ShotEvent,
};

/// Shots keyed by partition key, then by sort key.
type ShotTable = HashMap<String, BTreeMap<String, Expiring<ShotEvent>>>;

/// Aggregates keyed by `(partition key, sort key)`.
type CounterTable = HashMap<(String, String), Expiring<AggregateCounter>>;

/// Store holding every table in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    shots: RwLock<ShotTable>,
    idempotency: RwLock<HashMap<String, Expiring<EventId>>>,
    rate_limits: RwLock<HashMap<String, RateLimitWindow>>,
    counters: RwLock<CounterTable>,
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    library: RwLock<HashMap<LibraryEntryId, LibraryEntry>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored shots across all partitions.
    pub async fn shot_count(&self) -> usize {
        self.shots.read().await.values().map(BTreeMap::len).sum()
    }

    /// Raw rate-limit row, for inspection.
    pub async fn rate_limit_window(&self, key: &str) -> Option<RateLimitWindow> {
        self.rate_limits.read().await.get(key).copied()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn put_shot(&self, event: &ShotEvent, expires_at: i64) -> Result<(), StoreError> {
        let mut shots = self.shots.write().await;
        shots.entry(event.partition_key()).or_default().insert(
            event.sort_key(),
            Expiring {
                value: event.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn shots_for_day(
        &self,
        day: NaiveDate,
        limit: Option<usize>,
    ) -> Result<Vec<ShotEvent>, StoreError> {
        let shots = self.shots.read().await;
        let Some(partition) = shots.get(&day_partition_key(day)) else {
            return Ok(Vec::new());
        };
        Ok(partition
            .values()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .map(|row| row.value.clone())
            .collect())
    }

    async fn get_idempotency(&self, key: &str, now: i64) -> Result<Option<EventId>, StoreError> {
        let table = self.idempotency.read().await;
        Ok(table
            .get(key)
            .filter(|row| row.is_live(now))
            .map(|row| row.value))
    }

    async fn put_idempotency_if_absent(
        &self,
        record: &IdempotencyRecord,
        now: i64,
    ) -> Result<bool, StoreError> {
        let mut table = self.idempotency.write().await;
        if table.get(&record.key).is_some_and(|row| row.is_live(now)) {
            return Ok(false);
        }
        table.insert(
            record.key.clone(),
            Expiring {
                value: record.event_id,
                expires_at: record.expires_at,
            },
        );
        Ok(true)
    }

    async fn increment_window(
        &self,
        key: &str,
        window_start: i64,
        expires_at: i64,
    ) -> Result<Option<u64>, StoreError> {
        let mut table = self.rate_limits.write().await;
        match table.get_mut(key) {
            None => {
                table.insert(
                    key.to_string(),
                    RateLimitWindow {
                        window_start,
                        count: 1,
                        expires_at,
                    },
                );
                Ok(Some(1))
            }
            Some(row) if row.window_start == window_start => {
                row.count = row.count.saturating_add(1);
                Ok(Some(row.count))
            }
            Some(_) => Ok(None),
        }
    }

    async fn reset_window(
        &self,
        key: &str,
        window_start: i64,
        expires_at: i64,
    ) -> Result<(), StoreError> {
        self.rate_limits.write().await.insert(
            key.to_string(),
            RateLimitWindow {
                window_start,
                count: 1,
                expires_at,
            },
        );
        Ok(())
    }

    async fn increment_counter(
        &self,
        key: &CounterKey,
        timestamp: i64,
        expires_at: i64,
    ) -> Result<u64, StoreError> {
        let mut table = self.counters.write().await;
        let row = table
            .entry((key.partition_key(), key.sort_key()))
            .or_insert_with(|| Expiring {
                value: AggregateCounter {
                    key: key.clone(),
                    count: 0,
                    last_event_timestamp: timestamp,
                },
                expires_at,
            });
        row.value.count = row.value.count.saturating_add(1);
        row.value.last_event_timestamp = row.value.last_event_timestamp.max(timestamp);
        Ok(row.value.count)
    }

    async fn get_counter(&self, key: &CounterKey) -> Result<Option<AggregateCounter>, StoreError> {
        let table = self.counters.read().await;
        Ok(table
            .get(&(key.partition_key(), key.sort_key()))
            .map(|row| row.value.clone()))
    }

    async fn counters_for_day(
        &self,
        day: NaiveDate,
        scope: CounterScope,
    ) -> Result<Vec<AggregateCounter>, StoreError> {
        let pk = day_partition_key(day);
        let table = self.counters.read().await;
        Ok(table
            .iter()
            .filter(|((row_pk, _), row)| *row_pk == pk && row.value.key.dimension.scope() == scope)
            .map(|(_, row)| row.value.clone())
            .collect())
    }

    async fn upsert_connection(&self, connection: &Connection) -> Result<(), StoreError> {
        let mut table = self.connections.write().await;
        table
            .entry(connection.connection_id.clone())
            .and_modify(|existing| {
                existing.filters.clone_from(&connection.filters);
                existing.expires_at = connection.expires_at;
            })
            .or_insert_with(|| connection.clone());
        Ok(())
    }

    async fn touch_connection(
        &self,
        id: &ConnectionId,
        now: i64,
        expires_at: i64,
    ) -> Result<bool, StoreError> {
        let mut table = self.connections.write().await;
        let Some(conn) = table.get_mut(id).filter(|conn| !conn.is_expired(now)) else {
            return Ok(false);
        };
        conn.expires_at = expires_at;
        Ok(true)
    }

    async fn delete_connection(&self, id: &ConnectionId) -> Result<(), StoreError> {
        self.connections.write().await.remove(id);
        Ok(())
    }

    async fn list_connections(&self, now: i64) -> Result<Vec<Connection>, StoreError> {
        let table = self.connections.read().await;
        Ok(table
            .values()
            .filter(|conn| !conn.is_expired(now))
            .cloned()
            .collect())
    }

    async fn insert_library_entry(&self, entry: &LibraryEntry) -> Result<LibraryInsert, StoreError> {
        let mut table = self.library.write().await;
        if let Some(existing) = table.values().find(|e| e.data_hash == entry.data_hash) {
            return Ok(LibraryInsert::Duplicate(existing.id));
        }
        table.insert(entry.id, entry.clone());
        Ok(LibraryInsert::Inserted)
    }

    async fn get_library_entry(
        &self,
        id: &LibraryEntryId,
    ) -> Result<Option<LibraryEntry>, StoreError> {
        Ok(self.library.read().await.get(id).cloned())
    }

    async fn library_entries(
        &self,
        selector: &LibrarySelector,
    ) -> Result<Vec<LibraryEntry>, StoreError> {
        let table = self.library.read().await;
        Ok(table
            .values()
            .filter(|entry| match selector {
                LibrarySelector::All => true,
                LibrarySelector::Kind(kind) => entry.kind == *kind,
                LibrarySelector::Device(device) => entry.device_id == *device,
            })
            .cloned()
            .collect())
    }

    async fn delete_library_entry(
        &self,
        id: &LibraryEntryId,
        device_id: &str,
    ) -> Result<bool, StoreError> {
        let mut table = self.library.write().await;
        if table.get(id).is_some_and(|entry| entry.device_id == device_id) {
            table.remove(id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn increment_library_counter(
        &self,
        id: &LibraryEntryId,
        counter: LibraryCounter,
    ) -> Result<Option<u64>, StoreError> {
        let mut table = self.library.write().await;
        Ok(table.get_mut(id).map(|entry| {
            let field = match counter {
                LibraryCounter::Downloads => &mut entry.downloads,
                LibraryCounter::Flags => &mut entry.flag_count,
            };
            *field = field.saturating_add(1);
            *field
        }))
    }

    async fn purge_expired(&self, now: i64) -> Result<u64, StoreError> {
        let mut removed = 0usize;

        {
            let mut shots = self.shots.write().await;
            for partition in shots.values_mut() {
                let before = partition.len();
                partition.retain(|_, row| row.is_live(now));
                removed += before - partition.len();
            }
            shots.retain(|_, partition| !partition.is_empty());
        }
        {
            let mut table = self.idempotency.write().await;
            let before = table.len();
            table.retain(|_, row| row.is_live(now));
            removed += before - table.len();
        }
        {
            let mut table = self.rate_limits.write().await;
            let before = table.len();
            table.retain(|_, row| row.expires_at > now);
            removed += before - table.len();
        }
        {
            let mut table = self.counters.write().await;
            let before = table.len();
            table.retain(|_, row| row.is_live(now));
            removed += before - table.len();
        }
        {
            let mut table = self.connections.write().await;
            let before = table.len();
            table.retain(|_, conn| !conn.is_expired(now));
            removed += before - table.len();
        }

        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::{ConnectionFilters, ShotDetails};
    use crate::domain::location::{Coordinates, ResolvedLocation};

    fn shot(timestamp: i64) -> ShotEvent {
        let location = ResolvedLocation {
            resolved: true,
            city: "Berlin".to_string(),
            country_code: "DE".to_string(),
            coordinates: Coordinates::new(52.52, 13.405),
        };
        ShotEvent::new(
            EventId::new(),
            timestamp,
            &location,
            ShotDetails {
                profile: "p".to_string(),
                software_name: "s".to_string(),
                software_version: "1".to_string(),
                machine_model: "m".to_string(),
            },
        )
    }

    fn conn(id: &str, expires_at: i64) -> Connection {
        Connection {
            connection_id: ConnectionId::new(id),
            connected_at: 5,
            filters: None,
            expires_at,
        }
    }

    #[tokio::test]
    async fn shots_come_back_newest_first() {
        let store = MemoryStore::new();
        let day_start = 1_700_006_400_000; // 2023-11-15T00:00:00Z
        for offset in [10, 30, 20] {
            let _ = store.put_shot(&shot(day_start + offset), i64::MAX).await;
        }
        let Ok(shots) = store.shots_for_day(day_bucket_of(day_start), Some(2)).await else {
            panic!("read failed");
        };
        let stamps: Vec<i64> = shots.iter().map(|s| s.timestamp - day_start).collect();
        assert_eq!(stamps, vec![30, 20]);
    }

    fn day_bucket_of(ms: i64) -> NaiveDate {
        crate::domain::day_bucket(ms)
    }

    #[tokio::test]
    async fn idempotency_first_writer_wins_until_expiry() {
        let store = MemoryStore::new();
        let first = IdempotencyRecord {
            key: "k".to_string(),
            event_id: EventId::new(),
            expires_at: 100,
        };
        let second = IdempotencyRecord {
            event_id: EventId::new(),
            expires_at: 200,
            ..first.clone()
        };
        assert!(matches!(store.put_idempotency_if_absent(&first, 0).await, Ok(true)));
        assert!(matches!(store.put_idempotency_if_absent(&second, 50).await, Ok(false)));
        assert!(matches!(store.get_idempotency("k", 50).await, Ok(Some(id)) if id == first.event_id));

        // expired records read as absent and may be replaced
        assert!(matches!(store.get_idempotency("k", 100).await, Ok(None)));
        assert!(matches!(store.put_idempotency_if_absent(&second, 100).await, Ok(true)));
    }

    #[tokio::test]
    async fn window_increment_is_conditional_on_window_start() {
        let store = MemoryStore::new();
        assert!(matches!(store.increment_window("rl", 0, 60).await, Ok(Some(1))));
        assert!(matches!(store.increment_window("rl", 0, 60).await, Ok(Some(2))));
        assert!(matches!(store.increment_window("rl", 60, 120).await, Ok(None)));
        let _ = store.reset_window("rl", 60, 120).await;
        assert!(matches!(store.increment_window("rl", 60, 120).await, Ok(Some(2))));
    }

    #[tokio::test]
    async fn concurrent_counter_increments_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let Some(day) = NaiveDate::from_ymd_opt(2024, 6, 1) else {
            panic!("valid date");
        };
        let key = CounterKey::total(day);
        let mut tasks = Vec::new();
        for i in 0..64 {
            let store = Arc::clone(&store);
            let key = key.clone();
            tasks.push(tokio::spawn(async move {
                store.increment_counter(&key, i, i64::MAX).await
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
        let Ok(Some(counter)) = store.get_counter(&key).await else {
            panic!("counter missing");
        };
        assert_eq!(counter.count, 64);
        assert_eq!(counter.last_event_timestamp, 63);
    }

    #[tokio::test]
    async fn counters_for_day_filters_scope() {
        let store = MemoryStore::new();
        let Some(day) = NaiveDate::from_ymd_opt(2024, 6, 1) else {
            panic!("valid date");
        };
        let _ = store.increment_counter(&CounterKey::total(day), 1, 10).await;
        let _ = store
            .increment_counter(&CounterKey::city(day, "Oslo", "NO"), 1, 10)
            .await;
        let _ = store
            .increment_counter(&CounterKey::profile(day, "Turbo"), 1, 10)
            .await;
        let Ok(cities) = store.counters_for_day(day, CounterScope::City).await else {
            panic!("read failed");
        };
        assert_eq!(cities.len(), 1);
        let Ok(totals) = store.counters_for_day(day, CounterScope::Total).await else {
            panic!("read failed");
        };
        assert_eq!(totals.len(), 1);
    }

    #[tokio::test]
    async fn upsert_keeps_connected_at() {
        let store = MemoryStore::new();
        let _ = store.upsert_connection(&conn("a", 10)).await;
        let mut replacement = conn("a", 20);
        replacement.connected_at = 99;
        replacement.filters = Some(ConnectionFilters {
            country_code: Some("US".to_string()),
        });
        let _ = store.upsert_connection(&replacement).await;

        let Ok(all) = store.list_connections(0).await else {
            panic!("list failed");
        };
        assert_eq!(all.len(), 1);
        let Some(stored) = all.first() else {
            panic!("connection missing");
        };
        assert_eq!(stored.connected_at, 5);
        assert_eq!(stored.expires_at, 20);
        assert_eq!(stored.filters, replacement.filters);
    }

    #[tokio::test]
    async fn touch_reports_missing_connection() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.touch_connection(&ConnectionId::new("nope"), 0, 10).await,
            Ok(false)
        ));
        let _ = store.upsert_connection(&conn("a", 10)).await;
        assert!(matches!(
            store.touch_connection(&ConnectionId::new("a"), 5, 30).await,
            Ok(true)
        ));
        assert!(matches!(
            store.touch_connection(&ConnectionId::new("a"), 30, 60).await,
            Ok(false)
        ));
    }

    #[tokio::test]
    async fn expired_connections_are_hidden_and_purged() {
        let store = MemoryStore::new();
        let _ = store.upsert_connection(&conn("old", 10)).await;
        let _ = store.upsert_connection(&conn("new", 100)).await;
        let Ok(live) = store.list_connections(50).await else {
            panic!("list failed");
        };
        assert_eq!(live.len(), 1);

        let _ = store.put_shot(&shot(1_000), 10).await;
        assert!(matches!(store.purge_expired(50).await, Ok(2)));
        assert_eq!(store.shot_count().await, 0);
    }

    fn entry(device: &str, hash: &str) -> LibraryEntry {
        LibraryEntry {
            id: LibraryEntryId::new(),
            version: 1,
            kind: "profile".to_string(),
            tags: vec![],
            app_version: "1.0".to_string(),
            data: "{}".to_string(),
            data_hash: hash.to_string(),
            device_id: device.to_string(),
            downloads: 0,
            flag_count: 0,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn library_deduplicates_by_hash() {
        let store = MemoryStore::new();
        let first = entry("dev-a", "h1");
        assert!(matches!(
            store.insert_library_entry(&first).await,
            Ok(LibraryInsert::Inserted)
        ));
        let copy = entry("dev-b", "h1");
        assert!(matches!(
            store.insert_library_entry(&copy).await,
            Ok(LibraryInsert::Duplicate(id)) if id == first.id
        ));
        let Ok(mine) = store
            .library_entries(&LibrarySelector::Device("dev-b".to_string()))
            .await
        else {
            panic!("list failed");
        };
        assert!(mine.is_empty());
    }

    #[tokio::test]
    async fn library_delete_requires_owner() {
        let store = MemoryStore::new();
        let stored = entry("dev-a", "h1");
        let _ = store.insert_library_entry(&stored).await;
        assert!(matches!(
            store.delete_library_entry(&stored.id, "dev-b").await,
            Ok(false)
        ));
        assert!(matches!(
            store.delete_library_entry(&stored.id, "dev-a").await,
            Ok(true)
        ));
        assert!(matches!(store.get_library_entry(&stored.id).await, Ok(None)));
    }

    #[tokio::test]
    async fn library_counters_count_up_independently() {
        let store = MemoryStore::new();
        let stored = entry("dev-a", "h1");
        let _ = store.insert_library_entry(&stored).await;
        for _ in 0..2 {
            let _ = store
                .increment_library_counter(&stored.id, LibraryCounter::Downloads)
                .await;
        }
        assert!(matches!(
            store
                .increment_library_counter(&stored.id, LibraryCounter::Flags)
                .await,
            Ok(Some(1))
        ));
        let Ok(Some(read)) = store.get_library_entry(&stored.id).await else {
            panic!("entry missing");
        };
        assert_eq!((read.downloads, read.flag_count), (2, 1));
        assert!(matches!(
            store
                .increment_library_counter(&LibraryEntryId::new(), LibraryCounter::Downloads)
                .await,
            Ok(None)
        ));
    }
}
