//! Daily aggregate counters.
//!
//! Three counter scopes exist per day: the global total, one counter per
//! (city, country) and one per profile. Each is keyed by the day partition
//! and a sort key naming the sub-dimension, and carries its human-readable
//! label so top-K reads need no second lookup.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::shot_event::day_partition_key;

/// Which family of counters a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterScope {
    /// Global daily total.
    Total,
    /// Per city daily total.
    City,
    /// Per profile daily total.
    Profile,
}

impl CounterScope {
    /// Sort-key prefix shared by every counter of this scope.
    #[must_use]
    pub const fn sort_key_prefix(self) -> &'static str {
        match self {
            Self::Total => "TOTAL",
            Self::City => "CITY#",
            Self::Profile => "PROFILE#",
        }
    }
}

/// The sub-dimension a counter tracks, including its display label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum CounterDimension {
    /// Global daily total.
    Total,
    /// Shots from one city.
    City {
        /// City label.
        city: String,
        /// Country code of the city.
        country_code: String,
    },
    /// Shots pulled with one profile.
    Profile {
        /// Profile label.
        profile: String,
    },
}

impl CounterDimension {
    /// Scope of this dimension.
    #[must_use]
    pub const fn scope(&self) -> CounterScope {
        match self {
            Self::Total => CounterScope::Total,
            Self::City { .. } => CounterScope::City,
            Self::Profile { .. } => CounterScope::Profile,
        }
    }

    /// Sort key within the day partition.
    #[must_use]
    pub fn sort_key(&self) -> String {
        match self {
            Self::Total => "TOTAL".to_string(),
            Self::City { city, country_code } => format!("CITY#{city}#CC#{country_code}"),
            Self::Profile { profile } => format!("PROFILE#{profile}"),
        }
    }
}

/// Identity of a single counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CounterKey {
    /// Owning UTC day.
    pub day: NaiveDate,
    /// Tracked sub-dimension.
    pub dimension: CounterDimension,
}

impl CounterKey {
    /// Key of the global total for `day`.
    #[must_use]
    pub const fn total(day: NaiveDate) -> Self {
        Self {
            day,
            dimension: CounterDimension::Total,
        }
    }

    /// Key of a city counter for `day`.
    #[must_use]
    pub fn city(day: NaiveDate, city: &str, country_code: &str) -> Self {
        Self {
            day,
            dimension: CounterDimension::City {
                city: city.to_string(),
                country_code: country_code.to_string(),
            },
        }
    }

    /// Key of a profile counter for `day`.
    #[must_use]
    pub fn profile(day: NaiveDate, profile: &str) -> Self {
        Self {
            day,
            dimension: CounterDimension::Profile {
                profile: profile.to_string(),
            },
        }
    }

    /// Partition key: the day bucket.
    #[must_use]
    pub fn partition_key(&self) -> String {
        day_partition_key(self.day)
    }

    /// Sort key: the encoded sub-dimension.
    #[must_use]
    pub fn sort_key(&self) -> String {
        self.dimension.sort_key()
    }
}

/// Current value of a counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateCounter {
    /// Counter identity, labels included.
    pub key: CounterKey,
    /// Monotonic count.
    pub count: u64,
    /// Timestamp (ms) of the last event counted.
    pub last_event_timestamp: i64,
}
