//! The immutable shot record and its day-partitioned storage keys.
//!
//! A [`ShotEvent`] is created once by the ingestion pipeline after location
//! resolution and is never mutated afterwards. Storage partitions events by
//! the UTC day of their timestamp and orders them within a day by
//! `(timestamp, event_id)`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::EventId;
use super::location::{Coordinates, ResolvedLocation};

/// Returns the UTC day owning a millisecond timestamp.
///
/// Timestamps outside chrono's representable range fall back to the Unix
/// epoch day; validation rejects such values before they get here.
#[must_use]
pub fn day_bucket(timestamp_ms: i64) -> NaiveDate {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .unwrap_or_default()
        .date_naive()
}

/// Partition key of a day: `DAY#YYYY-MM-DD`.
#[must_use]
pub fn day_partition_key(day: NaiveDate) -> String {
    format!("DAY#{}", day.format("%Y-%m-%d"))
}

/// A stored shot event with resolved coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ShotEvent {
    /// Server-generated identifier.
    #[schema(value_type = String, format = Uuid)]
    pub event_id: EventId,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Resolved city label.
    pub city: String,
    /// Resolved country code.
    pub country_code: String,
    /// Resolved latitude.
    pub lat: f64,
    /// Resolved longitude.
    pub lon: f64,
    /// Profile name the shot was pulled with.
    pub profile: String,
    /// Reporting application.
    pub software_name: String,
    /// Reporting application version.
    pub software_version: String,
    /// Machine model.
    pub machine_model: String,
}

/// Fields of a shot that come from the client rather than from resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShotDetails {
    /// Profile name.
    pub profile: String,
    /// Reporting application.
    pub software_name: String,
    /// Reporting application version.
    pub software_version: String,
    /// Machine model.
    pub machine_model: String,
}

impl ShotEvent {
    /// Assembles an event from its resolved location and client details.
    #[must_use]
    pub fn new(
        event_id: EventId,
        timestamp: i64,
        location: &ResolvedLocation,
        details: ShotDetails,
    ) -> Self {
        Self {
            event_id,
            timestamp,
            city: location.city.clone(),
            country_code: location.country_code.clone(),
            lat: location.coordinates.lat,
            lon: location.coordinates.lon,
            profile: details.profile,
            software_name: details.software_name,
            software_version: details.software_version,
            machine_model: details.machine_model,
        }
    }

    /// UTC day this event is partitioned under.
    #[must_use]
    pub fn day(&self) -> NaiveDate {
        day_bucket(self.timestamp)
    }

    /// Partition key: `DAY#YYYY-MM-DD`.
    #[must_use]
    pub fn partition_key(&self) -> String {
        day_partition_key(self.day())
    }

    /// Sort key within the day partition: `TS#<13-digit ms>#<event id>`.
    ///
    /// The timestamp is zero padded so lexicographic order matches
    /// chronological order.
    #[must_use]
    pub fn sort_key(&self) -> String {
        format!("TS#{:013}#{}", self.timestamp, self.event_id)
    }

    /// Position of the event.
    #[must_use]
    pub const fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lon)
    }

    /// Builds the payload pushed to live subscribers.
    #[must_use]
    pub fn to_broadcast(&self) -> ShotBroadcast {
        ShotBroadcast {
            timestamp: self.timestamp,
            city: self.city.clone(),
            country_code: Some(self.country_code.clone()),
            lat: self.lat,
            lon: self.lon,
            profile: self.profile.clone(),
            software_name: self.software_name.clone(),
            software_version: self.software_version.clone(),
            machine_model: self.machine_model.clone(),
        }
    }
}

/// Live payload for a shot. Serialized inside
/// [`crate::ws::messages::PushMessage::Shot`], which adds `"type": "shot"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotBroadcast {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// City label.
    pub city: String,
    /// Country code, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lon: f64,
    /// Profile name.
    pub profile: String,
    /// Reporting application.
    pub software_name: String,
    /// Reporting application version.
    pub software_version: String,
    /// Machine model.
    pub machine_model: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(timestamp: i64) -> ShotEvent {
        let location = ResolvedLocation {
            resolved: true,
            city: "Berlin".to_string(),
            country_code: "DE".to_string(),
            coordinates: Coordinates::new(52.52, 13.405),
        };
        ShotEvent::new(
            EventId::from_uuid(uuid::Uuid::nil()),
            timestamp,
            &location,
            ShotDetails {
                profile: "Blooming Espresso".to_string(),
                software_name: "Decenza".to_string(),
                software_version: "1.4.0".to_string(),
                machine_model: "DE1XL".to_string(),
            },
        )
    }

    #[test]
    fn day_bucket_uses_utc_date() {
        // 2024-03-09T23:59:59.999Z
        let day = day_bucket(1_710_028_799_999);
        assert_eq!(day.to_string(), "2024-03-09");
        assert_eq!(day_bucket(1_710_028_800_000).to_string(), "2024-03-10");
    }

    #[test]
    fn keys_follow_day_layout() {
        let event = sample(1_710_028_800_000);
        assert_eq!(event.partition_key(), "DAY#2024-03-10");
        assert_eq!(
            event.sort_key(),
            "TS#1710028800000#00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn sort_key_is_zero_padded() {
        let event = sample(42);
        assert!(event.sort_key().starts_with("TS#0000000000042#"));
    }

    #[test]
    fn broadcast_carries_resolved_fields() {
        let broadcast = sample(1_000).to_broadcast();
        assert_eq!(broadcast.city, "Berlin");
        assert_eq!(broadcast.country_code.as_deref(), Some("DE"));
        assert!((broadcast.lat - 52.52).abs() < f64::EPSILON);
        assert_eq!(broadcast.timestamp, 1_000);
    }
}
