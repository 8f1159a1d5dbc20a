//! Axum WebSocket upgrade handler.

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::{IntoResponse, Response};

use super::connection::run_connection;
use crate::api::client_ip::SourceIp;
use crate::app_state::AppState;
use crate::domain::ConnectionId;
use crate::error::GatewayError;

/// `GET /ws`: Upgrade HTTP connection to WebSocket.
///
/// Upgrades are rate limited per source IP. The connection is registered
/// (without filters) and its outbound queue attached before the upgrade
/// completes, so no broadcast in between finds it missing.
///
/// # Errors
///
/// Returns [`GatewayError::RateLimited`] when the source exhausted its
/// quota and [`GatewayError::StoreUnavailable`] if the limiter or the
/// registry cannot be reached.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    SourceIp(source): SourceIp,
) -> Result<Response, GatewayError> {
    state
        .rate_limiter
        .check(&state.ws_connect_policy, &source)
        .await?
        .into_result()?;

    let id = ConnectionId::generate();
    state
        .broadcaster
        .registry()
        .register(&id, None)
        .await
        .inspect_err(|e| tracing::error!(connection_id = %id, error = %e, "failed to register connection"))?;

    let hub = state.hub.clone();
    let outbound = hub.attach(&id).await;
    let engine = state.broadcaster.clone();
    Ok(ws
        .on_upgrade(move |socket| run_connection(socket, id, outbound, hub, engine))
        .into_response())
}
