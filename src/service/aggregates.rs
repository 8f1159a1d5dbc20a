//! Daily aggregate counters and the stats read path.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use crate::domain::{AggregateCounter, CounterDimension, CounterKey, CounterScope, day_bucket};
use crate::error::GatewayError;
use crate::persistence::{DurableStore, StoreError};

const HOUR_MS: i64 = 3_600_000;

/// Outcome of one [`AggregateUpdater::increment`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateReport {
    /// Counters that were incremented.
    pub applied: usize,
    /// Counters that still failed after their retry.
    pub failed: usize,
}

/// A city and its count for the day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CityCount {
    /// City label.
    pub city: String,
    /// Country code of the city.
    pub country_code: String,
    /// Shots counted today.
    pub count: u64,
}

/// A profile and its count for the day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileCount {
    /// Profile label.
    pub profile: String,
    /// Shots counted today.
    pub count: u64,
}

/// Point-in-time activity summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// UTC day the snapshot covers.
    pub day: NaiveDate,
    /// Total shots today.
    pub shots_today: u64,
    /// Shots with a timestamp within the last hour.
    pub shots_last_hour: u64,
    /// Busiest cities today, descending.
    pub top_cities: Vec<CityCount>,
    /// Most used profiles today, descending.
    pub top_profiles: Vec<ProfileCount>,
}

/// Maintains the per-day total, per-city and per-profile counters.
#[derive(Debug, Clone)]
pub struct AggregateUpdater {
    store: Arc<dyn DurableStore>,
    retention_secs: i64,
    top_k: usize,
}

impl AggregateUpdater {
    /// Creates an updater whose counters are retained `retention_secs`
    /// past the end of their day, and whose stats list `top_k` entries.
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>, retention_secs: i64, top_k: usize) -> Self {
        Self {
            store,
            retention_secs,
            top_k,
        }
    }

    /// Counts one event against the three counters of its day.
    ///
    /// The increments run concurrently and independently; each is
    /// retried once. Failures are logged and reported, never raised.
    pub async fn increment(
        &self,
        city: &str,
        country_code: &str,
        profile: &str,
        timestamp: i64,
    ) -> AggregateReport {
        let day = day_bucket(timestamp);
        let expires_at = self.expires_at(day);
        let keys = [
            CounterKey::total(day),
            CounterKey::city(day, city, country_code),
            CounterKey::profile(day, profile),
        ];
        let [total, city_counter, profile_counter] = &keys;
        let (a, b, c) = tokio::join!(
            self.increment_once_retried(total, timestamp, expires_at),
            self.increment_once_retried(city_counter, timestamp, expires_at),
            self.increment_once_retried(profile_counter, timestamp, expires_at),
        );

        let mut report = AggregateReport::default();
        for (key, result) in keys.iter().zip([a, b, c]) {
            match result {
                Ok(_) => report.applied += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        partition = %key.partition_key(),
                        sort_key = %key.sort_key(),
                        error = %e,
                        "aggregate increment failed"
                    );
                }
            }
        }
        report
    }

    async fn increment_once_retried(
        &self,
        key: &CounterKey,
        timestamp: i64,
        expires_at: i64,
    ) -> Result<u64, StoreError> {
        match self.store.increment_counter(key, timestamp, expires_at).await {
            Ok(count) => Ok(count),
            Err(first) => {
                tracing::debug!(sort_key = %key.sort_key(), error = %first, "retrying aggregate increment");
                self.store.increment_counter(key, timestamp, expires_at).await
            }
        }
    }

    fn expires_at(&self, day: NaiveDate) -> i64 {
        let day_end = day
            .succ_opt()
            .and_then(|next| next.and_hms_opt(0, 0, 0))
            .map_or_else(|| Utc::now().timestamp(), |end| end.and_utc().timestamp());
        day_end.saturating_add(self.retention_secs)
    }

    /// Builds the stats snapshot for the current UTC day.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::StoreUnavailable`] if any read fails.
    pub async fn snapshot(&self) -> Result<StatsSnapshot, GatewayError> {
        self.snapshot_at(Utc::now().timestamp_millis()).await
    }

    /// [`Self::snapshot`] at an explicit time (ms).
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::StoreUnavailable`] if any read fails.
    pub async fn snapshot_at(&self, now_ms: i64) -> Result<StatsSnapshot, GatewayError> {
        let day = day_bucket(now_ms);
        let total_key = CounterKey::total(day);
        let (total, cities, profiles, last_hour) = tokio::join!(
            self.store.get_counter(&total_key),
            self.store.counters_for_day(day, CounterScope::City),
            self.store.counters_for_day(day, CounterScope::Profile),
            self.shots_since(now_ms.saturating_sub(HOUR_MS), now_ms),
        );

        let top_cities = top_k(cities?, self.top_k)
            .into_iter()
            .filter_map(|counter| match counter.key.dimension {
                CounterDimension::City { city, country_code } => Some(CityCount {
                    city,
                    country_code,
                    count: counter.count,
                }),
                _ => None,
            })
            .collect();
        let top_profiles = top_k(profiles?, self.top_k)
            .into_iter()
            .filter_map(|counter| match counter.key.dimension {
                CounterDimension::Profile { profile } => Some(ProfileCount {
                    profile,
                    count: counter.count,
                }),
                _ => None,
            })
            .collect();

        Ok(StatsSnapshot {
            day,
            shots_today: total?.map_or(0, |c| c.count),
            shots_last_hour: last_hour?,
            top_cities,
            top_profiles,
        })
    }

    /// Counts stored shots with `since_ms <= timestamp <= now_ms`. The
    /// window can straddle midnight, so yesterday's partition is read too.
    async fn shots_since(&self, since_ms: i64, now_ms: i64) -> Result<u64, StoreError> {
        let today = day_bucket(now_ms);
        let mut days = vec![today];
        let first = day_bucket(since_ms);
        if first != today {
            days.push(first);
        }
        let mut count = 0_u64;
        for day in days {
            let shots = self.store.shots_for_day(day, None).await?;
            let in_window = shots
                .iter()
                .filter(|s| s.timestamp >= since_ms && s.timestamp <= now_ms)
                .count();
            count = count.saturating_add(u64::try_from(in_window).unwrap_or(u64::MAX));
        }
        Ok(count)
    }
}

/// Sorts descending by count (label ascending on ties) and keeps `k`.
fn top_k(mut counters: Vec<AggregateCounter>, k: usize) -> Vec<AggregateCounter> {
    counters.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.key.sort_key().cmp(&b.key.sort_key()))
    });
    counters.truncate(k);
    counters
}

/// Yesterday relative to `day`, used by recent-shot reads.
#[must_use]
pub fn previous_day(day: NaiveDate) -> NaiveDate {
    day.pred_opt().unwrap_or(day)
}
