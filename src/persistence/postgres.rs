//! PostgreSQL implementation of the durable store.
//!
//! Tables mirror the partitioned key layout (`pk`/`sk` text keys) so rows
//! can be range-read by partition. Conditional writes are single
//! statements of the form `INSERT .. ON CONFLICT .. DO UPDATE .. WHERE ..
//! RETURNING`, which Postgres executes atomically per row.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use super::models::IdempotencyRecord;
use super::{DurableStore, StoreError};
use crate::config::GatewayConfig;
use crate::domain::shot_event::day_partition_key;
use crate::domain::{
    AggregateCounter, Connection, ConnectionFilters, ConnectionId, CounterDimension, CounterKey,
    CounterScope, EventId, LibraryCounter, LibraryEntry, LibraryEntryId, LibraryInsert,
    LibrarySelector, ShotEvent,
};

/// Row shape of the `shots` table as read back.
type ShotRow = (
    Uuid,
    i64,
    String,
    String,
    f64,
    f64,
    String,
    String,
    String,
    String,
);

/// Row shape of the `aggregates` table as read back.
type CounterRow = (i64, i64, Option<String>, Option<String>, Option<String>);

/// Row shape of the `library_entries` table as read back.
type LibraryRow = (
    Uuid,
    i32,
    String,
    Vec<String>,
    String,
    String,
    String,
    String,
    i64,
    i64,
    DateTime<Utc>,
);

const LIBRARY_COLUMNS: &str = "entry_id, version, kind, tags, app_version, data, data_hash, \
     device_id, downloads, flag_count, created_at";

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool using the database settings of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if no connection can be made.
    pub async fn connect(config: &GatewayConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(unavailable)?;
        Ok(Self::new(pool))
    }

    /// Applies the bundled schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn to_count(raw: i64) -> u64 {
    u64::try_from(raw).unwrap_or(0)
}

fn shot_from_row(row: ShotRow) -> ShotEvent {
    let (
        event_id,
        timestamp,
        city,
        country_code,
        lat,
        lon,
        profile,
        software_name,
        software_version,
        machine_model,
    ) = row;
    ShotEvent {
        event_id: EventId::from_uuid(event_id),
        timestamp,
        city,
        country_code,
        lat,
        lon,
        profile,
        software_name,
        software_version,
        machine_model,
    }
}

fn filters_to_column(filters: Option<&ConnectionFilters>) -> Result<Option<String>, StoreError> {
    filters
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn library_from_row(row: LibraryRow) -> LibraryEntry {
    let (
        id,
        version,
        kind,
        tags,
        app_version,
        data,
        data_hash,
        device_id,
        downloads,
        flags,
        created_at,
    ) = row;
    LibraryEntry {
        id: LibraryEntryId::from_uuid(id),
        version: u32::try_from(version).unwrap_or(1),
        kind,
        tags,
        app_version,
        data,
        data_hash,
        device_id,
        downloads: to_count(downloads),
        flag_count: to_count(flags),
        created_at,
    }
}

fn filters_from_column(raw: Option<String>) -> Result<Option<ConnectionFilters>, StoreError> {
    raw.as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| StoreError::Corrupt(e.to_string()))
}

/// Rebuilds the counter dimension from its label columns. Rows written
/// without labels are skipped by the caller.
fn dimension_from_labels(
    scope: CounterScope,
    city: Option<String>,
    country_code: Option<String>,
    profile: Option<String>,
) -> Option<CounterDimension> {
    match scope {
        CounterScope::Total => Some(CounterDimension::Total),
        CounterScope::City => Some(CounterDimension::City {
            city: city?,
            country_code: country_code?,
        }),
        CounterScope::Profile => Some(CounterDimension::Profile { profile: profile? }),
    }
}

#[async_trait]
impl DurableStore for PostgresStore {
    async fn put_shot(&self, event: &ShotEvent, expires_at: i64) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO shots (pk, sk, event_id, ts, city, country_code, lat, lon, profile, \
             software_name, software_version, machine_model, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(event.partition_key())
        .bind(event.sort_key())
        .bind(*event.event_id.as_uuid())
        .bind(event.timestamp)
        .bind(&event.city)
        .bind(&event.country_code)
        .bind(event.lat)
        .bind(event.lon)
        .bind(&event.profile)
        .bind(&event.software_name)
        .bind(&event.software_version)
        .bind(&event.machine_model)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn shots_for_day(
        &self,
        day: NaiveDate,
        limit: Option<usize>,
    ) -> Result<Vec<ShotEvent>, StoreError> {
        let limit = limit
            .and_then(|l| i64::try_from(l).ok())
            .unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, ShotRow>(
            "SELECT event_id, ts, city, country_code, lat, lon, profile, software_name, \
             software_version, machine_model FROM shots \
             WHERE pk = $1 ORDER BY sk DESC LIMIT $2",
        )
        .bind(day_partition_key(day))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(rows.into_iter().map(shot_from_row).collect())
    }

    async fn get_idempotency(&self, key: &str, now: i64) -> Result<Option<EventId>, StoreError> {
        let row = sqlx::query_scalar::<_, Uuid>(
            "SELECT event_id FROM idempotency_keys \
             WHERE idempotency_key = $1 AND expires_at > $2",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(row.map(EventId::from_uuid))
    }

    async fn put_idempotency_if_absent(
        &self,
        record: &IdempotencyRecord,
        now: i64,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO idempotency_keys (idempotency_key, event_id, expires_at) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (idempotency_key) DO UPDATE \
             SET event_id = EXCLUDED.event_id, expires_at = EXCLUDED.expires_at \
             WHERE idempotency_keys.expires_at <= $4 \
             RETURNING event_id",
        )
        .bind(&record.key)
        .bind(*record.event_id.as_uuid())
        .bind(record.expires_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(row.is_some())
    }

    async fn increment_window(
        &self,
        key: &str,
        window_start: i64,
        expires_at: i64,
    ) -> Result<Option<u64>, StoreError> {
        let row = sqlx::query_scalar::<_, i64>(
            "INSERT INTO rate_limits (limit_key, window_start, count, expires_at) \
             VALUES ($1, $2, 1, $3) \
             ON CONFLICT (limit_key) DO UPDATE SET count = rate_limits.count + 1 \
             WHERE rate_limits.window_start = EXCLUDED.window_start \
             RETURNING count",
        )
        .bind(key)
        .bind(window_start)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(row.map(to_count))
    }

    async fn reset_window(
        &self,
        key: &str,
        window_start: i64,
        expires_at: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO rate_limits (limit_key, window_start, count, expires_at) \
             VALUES ($1, $2, 1, $3) \
             ON CONFLICT (limit_key) DO UPDATE \
             SET window_start = EXCLUDED.window_start, count = 1, expires_at = EXCLUDED.expires_at",
        )
        .bind(key)
        .bind(window_start)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn increment_counter(
        &self,
        key: &CounterKey,
        timestamp: i64,
        expires_at: i64,
    ) -> Result<u64, StoreError> {
        let (city, country_code, profile) = match &key.dimension {
            CounterDimension::Total => (None, None, None),
            CounterDimension::City { city, country_code } => {
                (Some(city.as_str()), Some(country_code.as_str()), None)
            }
            CounterDimension::Profile { profile } => (None, None, Some(profile.as_str())),
        };
        let count = sqlx::query_scalar::<_, i64>(
            "INSERT INTO aggregates (pk, sk, count, last_ts, city, country_code, profile, expires_at) \
             VALUES ($1, $2, 1, $3, $4, $5, $6, $7) \
             ON CONFLICT (pk, sk) DO UPDATE \
             SET count = aggregates.count + 1, last_ts = GREATEST(aggregates.last_ts, EXCLUDED.last_ts) \
             RETURNING count",
        )
        .bind(key.partition_key())
        .bind(key.sort_key())
        .bind(timestamp)
        .bind(city)
        .bind(country_code)
        .bind(profile)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(to_count(count))
    }

    async fn get_counter(&self, key: &CounterKey) -> Result<Option<AggregateCounter>, StoreError> {
        let row = sqlx::query_as::<_, (i64, i64)>(
            "SELECT count, last_ts FROM aggregates WHERE pk = $1 AND sk = $2",
        )
        .bind(key.partition_key())
        .bind(key.sort_key())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(row.map(|(count, last_ts)| AggregateCounter {
            key: key.clone(),
            count: to_count(count),
            last_event_timestamp: last_ts,
        }))
    }

    async fn counters_for_day(
        &self,
        day: NaiveDate,
        scope: CounterScope,
    ) -> Result<Vec<AggregateCounter>, StoreError> {
        let pattern = match scope {
            CounterScope::Total => CounterScope::Total.sort_key_prefix().to_string(),
            other => format!("{}%", other.sort_key_prefix()),
        };
        let rows = sqlx::query_as::<_, CounterRow>(
            "SELECT count, last_ts, city, country_code, profile FROM aggregates \
             WHERE pk = $1 AND sk LIKE $2",
        )
        .bind(day_partition_key(day))
        .bind(pattern)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(rows
            .into_iter()
            .filter_map(|(count, last_ts, city, country_code, profile)| {
                let dimension = dimension_from_labels(scope, city, country_code, profile)?;
                Some(AggregateCounter {
                    key: CounterKey { day, dimension },
                    count: to_count(count),
                    last_event_timestamp: last_ts,
                })
            })
            .collect())
    }

    async fn upsert_connection(&self, connection: &Connection) -> Result<(), StoreError> {
        let filters = filters_to_column(connection.filters.as_ref())?;
        sqlx::query(
            "INSERT INTO connections (connection_id, connected_at, filters, expires_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (connection_id) DO UPDATE \
             SET filters = EXCLUDED.filters, expires_at = EXCLUDED.expires_at",
        )
        .bind(connection.connection_id.as_str())
        .bind(connection.connected_at)
        .bind(filters)
        .bind(connection.expires_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn touch_connection(
        &self,
        id: &ConnectionId,
        now: i64,
        expires_at: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE connections SET expires_at = $2 WHERE connection_id = $1 AND expires_at > $3",
        )
        .bind(id.as_str())
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_connection(&self, id: &ConnectionId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM connections WHERE connection_id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn list_connections(&self, now: i64) -> Result<Vec<Connection>, StoreError> {
        let rows = sqlx::query_as::<_, (String, i64, Option<String>, i64)>(
            "SELECT connection_id, connected_at, filters, expires_at FROM connections \
             WHERE expires_at > $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.into_iter()
            .map(|(id, connected_at, filters, expires_at)| {
                Ok(Connection {
                    connection_id: ConnectionId::new(id),
                    connected_at,
                    filters: filters_from_column(filters)?,
                    expires_at,
                })
            })
            .collect()
    }

    async fn purge_expired(&self, now: i64) -> Result<u64, StoreError> {
        let mut removed = 0u64;
        for table in [
            "shots",
            "idempotency_keys",
            "rate_limits",
            "aggregates",
            "connections",
        ] {
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE expires_at <= $1"))
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(unavailable)?;
            removed = removed.saturating_add(result.rows_affected());
        }
        Ok(removed)
    }

    async fn insert_library_entry(&self, entry: &LibraryEntry) -> Result<LibraryInsert, StoreError> {
        let inserted = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO library_entries (entry_id, version, kind, tags, app_version, data, \
             data_hash, device_id, downloads, flag_count, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, 0, $9) \
             ON CONFLICT (data_hash) DO NOTHING RETURNING entry_id",
        )
        .bind(*entry.id.as_uuid())
        .bind(i32::try_from(entry.version).unwrap_or(i32::MAX))
        .bind(&entry.kind)
        .bind(&entry.tags)
        .bind(&entry.app_version)
        .bind(&entry.data)
        .bind(&entry.data_hash)
        .bind(&entry.device_id)
        .bind(entry.created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;
        if inserted.is_some() {
            return Ok(LibraryInsert::Inserted);
        }

        let existing = sqlx::query_scalar::<_, Uuid>(
            "SELECT entry_id FROM library_entries WHERE data_hash = $1",
        )
        .bind(&entry.data_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;
        existing
            .map(|id| LibraryInsert::Duplicate(LibraryEntryId::from_uuid(id)))
            .ok_or_else(|| StoreError::Corrupt("duplicate hash vanished".to_string()))
    }

    async fn get_library_entry(
        &self,
        id: &LibraryEntryId,
    ) -> Result<Option<LibraryEntry>, StoreError> {
        let row = sqlx::query_as::<_, LibraryRow>(&format!(
            "SELECT {LIBRARY_COLUMNS} FROM library_entries WHERE entry_id = $1"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(row.map(library_from_row))
    }

    async fn library_entries(
        &self,
        selector: &LibrarySelector,
    ) -> Result<Vec<LibraryEntry>, StoreError> {
        let query = match selector {
            LibrarySelector::All => {
                sqlx::query_as::<_, LibraryRow>(&format!(
                    "SELECT {LIBRARY_COLUMNS} FROM library_entries"
                ))
                .fetch_all(&self.pool)
                .await
            }
            LibrarySelector::Kind(kind) => {
                sqlx::query_as::<_, LibraryRow>(&format!(
                    "SELECT {LIBRARY_COLUMNS} FROM library_entries WHERE kind = $1"
                ))
                .bind(kind)
                .fetch_all(&self.pool)
                .await
            }
            LibrarySelector::Device(device) => {
                sqlx::query_as::<_, LibraryRow>(&format!(
                    "SELECT {LIBRARY_COLUMNS} FROM library_entries WHERE device_id = $1"
                ))
                .bind(device)
                .fetch_all(&self.pool)
                .await
            }
        };
        Ok(query
            .map_err(unavailable)?
            .into_iter()
            .map(library_from_row)
            .collect())
    }

    async fn delete_library_entry(
        &self,
        id: &LibraryEntryId,
        device_id: &str,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM library_entries WHERE entry_id = $1 AND device_id = $2")
                .bind(*id.as_uuid())
                .bind(device_id)
                .execute(&self.pool)
                .await
                .map_err(unavailable)?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_library_counter(
        &self,
        id: &LibraryEntryId,
        counter: LibraryCounter,
    ) -> Result<Option<u64>, StoreError> {
        let column = match counter {
            LibraryCounter::Downloads => "downloads",
            LibraryCounter::Flags => "flag_count",
        };
        let value = sqlx::query_scalar::<_, i64>(&format!(
            "UPDATE library_entries SET {column} = {column} + 1 WHERE entry_id = $1 \
             RETURNING {column}"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(value.map(to_count))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}
