//! WebSocket message types: client actions and server pushes.

use serde::{Deserialize, Serialize};

use crate::domain::{ConnectionFilters, ShotBroadcast};

/// Actions a client can send over the socket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Sets (or replaces) the subscription filter.
    Subscribe {
        /// Filter to apply; absent means "everything".
        #[serde(default)]
        filters: Option<ConnectionFilters>,
    },
    /// Clears the subscription filter.
    Unsubscribe,
    /// Refreshes the connection lease.
    Ping,
}

/// Messages the server pushes to a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// A newly ingested shot.
    Shot(ShotBroadcast),
    /// Confirms a subscribe, echoing the effective filter.
    Subscribed {
        /// Filter now in effect (`{}` when none).
        filters: ConnectionFilters,
    },
    /// Confirms an unsubscribe.
    Unsubscribed,
    /// Heartbeat reply.
    Pong {
        /// Server time, milliseconds since the Unix epoch.
        timestamp: i64,
    },
}

/// Protocol-level error reply: `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReply {
    /// Human-readable reason.
    pub error: String,
}

impl ErrorReply {
    /// Creates an error reply.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Anything the server sends in response to a client action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    /// Successful reply.
    Push(PushMessage),
    /// Error reply; the connection stays open.
    Error(ErrorReply),
}

impl From<PushMessage> for Reply {
    fn from(message: PushMessage) -> Self {
        Self::Push(message)
    }
}

impl From<ErrorReply> for Reply {
    fn from(error: ErrorReply) -> Self {
        Self::Error(error)
    }
}
