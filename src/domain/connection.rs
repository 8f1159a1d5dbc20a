//! Live push connections and their subscription filters.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ShotEvent;

/// Identifier of a live push session, assigned at upgrade time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Allocates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wraps an identifier issued elsewhere.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrowed string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Structured predicate a subscriber uses to narrow the live feed.
///
/// Every present field must match; an empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionFilters {
    /// Only deliver shots from this country.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
}

impl ConnectionFilters {
    /// Returns `true` if `event` passes every present predicate.
    #[must_use]
    pub fn matches(&self, event: &ShotEvent) -> bool {
        self.country_code
            .as_deref()
            .is_none_or(|cc| cc == event.country_code)
    }

    /// Returns `true` if no predicate is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.country_code.is_none()
    }
}

/// A registered live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Session identifier.
    pub connection_id: ConnectionId,
    /// Registration time, milliseconds since the Unix epoch.
    pub connected_at: i64,
    /// Optional subscription filter; `None` receives every shot.
    pub filters: Option<ConnectionFilters>,
    /// Lease end, seconds since the Unix epoch.
    pub expires_at: i64,
}

impl Connection {
    /// Returns `true` if this connection should receive `event`.
    #[must_use]
    pub fn accepts(&self, event: &ShotEvent) -> bool {
        self.filters.as_ref().is_none_or(|f| f.matches(event))
    }

    /// Returns `true` once the lease has run out at `now_secs`.
    #[must_use]
    pub const fn is_expired(&self, now_secs: i64) -> bool {
        self.expires_at <= now_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventId;

    fn event_from(country_code: &str) -> ShotEvent {
        ShotEvent {
            event_id: EventId::new(),
            timestamp: 1,
            city: "Somewhere".to_string(),
            country_code: country_code.to_string(),
            lat: 0.0,
            lon: 0.0,
            profile: "p".to_string(),
            software_name: "s".to_string(),
            software_version: "1".to_string(),
            machine_model: "m".to_string(),
        }
    }

    fn connection(filters: Option<ConnectionFilters>) -> Connection {
        Connection {
            connection_id: ConnectionId::generate(),
            connected_at: 0,
            filters,
            expires_at: 100,
        }
    }

    #[test]
    fn no_filter_accepts_everything() {
        let conn = connection(None);
        assert!(conn.accepts(&event_from("US")));
        assert!(conn.accepts(&event_from("XX")));
    }

    #[test]
    fn empty_filter_accepts_everything() {
        let conn = connection(Some(ConnectionFilters::default()));
        assert!(conn.accepts(&event_from("JP")));
    }

    #[test]
    fn country_filter_is_exact() {
        let conn = connection(Some(ConnectionFilters {
            country_code: Some("US".to_string()),
        }));
        assert!(conn.accepts(&event_from("US")));
        assert!(!conn.accepts(&event_from("CA")));
        assert!(!conn.accepts(&event_from("us")));
    }

    #[test]
    fn expiry_is_inclusive_of_lease_end() {
        let conn = connection(None);
        assert!(!conn.is_expired(99));
        assert!(conn.is_expired(100));
    }

    #[test]
    fn empty_filters_serialize_as_empty_object() {
        let json = serde_json::to_string(&ConnectionFilters::default()).ok();
        assert_eq!(json.as_deref(), Some("{}"));
    }
}
