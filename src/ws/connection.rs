//! WebSocket connection loop.
//!
//! Handles the read/write loop for a single socket: inbound frames go
//! through the subscription protocol, outbound frames (shots and replies)
//! arrive through the hub queue attached for this connection.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::broadcast::BroadcastEngine;
use super::hub::ConnectionHub;
use super::messages::ErrorReply;
use super::protocol::handle_text;
use crate::domain::ConnectionId;

/// Runs one connection until either side closes it, then unregisters it.
///
/// The connection must already be registered and its `outbound` queue
/// attached to `hub`.
pub async fn run_connection(
    socket: WebSocket,
    id: ConnectionId,
    mut outbound: mpsc::Receiver<String>,
    hub: ConnectionHub,
    engine: BroadcastEngine,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    tracing::info!(connection_id = %id, "ws connection opened");

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_text(text.as_str(), &id, engine.registry()).await;
                        reply_to(&engine, &id, &reply).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        reply_to(&engine, &id, &ErrorReply::new("Invalid JSON")).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %id, error = %e, "ws read error");
                        break;
                    }
                    _ => {}
                }
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if ws_tx.send(Message::text(frame)).await.is_err() {
                    break;
                }
            }
        }
    }

    hub.detach(&id).await;
    if let Err(e) = engine.registry().remove(&id).await {
        tracing::warn!(connection_id = %id, error = %e, "could not unregister closed connection");
    }
    tracing::info!(connection_id = %id, "ws connection closed");
}

async fn reply_to<M: serde::Serialize + Sync>(
    engine: &BroadcastEngine,
    id: &ConnectionId,
    reply: &M,
) {
    if let Err(e) = engine.send_direct(id, reply).await {
        tracing::debug!(connection_id = %id, error = %e, "reply not queued");
    }
}
