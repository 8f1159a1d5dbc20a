//! Records that exist only in the store, with no richer domain form.

use serde::{Deserialize, Serialize};

use crate::domain::EventId;

/// Maps a client-chosen idempotency key to the event it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Client-chosen key.
    pub key: String,
    /// Event assigned on first successful ingestion.
    pub event_id: EventId,
    /// Unix seconds after which the key may be reused.
    pub expires_at: i64,
}

/// Fixed-window rate limiting row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitWindow {
    /// Start of the window the count belongs to, Unix seconds.
    pub window_start: i64,
    /// Requests counted in this window.
    pub count: u64,
    /// Unix seconds after which the row may be collected.
    pub expires_at: i64,
}

/// A value paired with its expiry, as held by [`super::MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct Expiring<T> {
    /// Stored value.
    pub value: T,
    /// Unix seconds after which the value is dead.
    pub expires_at: i64,
}

impl<T> Expiring<T> {
    /// Returns `true` while the value is alive at `now`.
    #[must_use]
    pub const fn is_live(&self, now: i64) -> bool {
        self.expires_at > now
    }
}
