//! WebSocket layer: live connections, subscriptions and fan-out.
//!
//! Every socket accepted at `/ws` is recorded in the
//! [`registry::ConnectionRegistry`] and attached to the
//! [`hub::ConnectionHub`]. The [`broadcast::BroadcastEngine`] pushes
//! shots and protocol replies through the hub.

pub mod broadcast;
pub mod connection;
pub mod handler;
pub mod hub;
pub mod messages;
pub mod protocol;
pub mod registry;
