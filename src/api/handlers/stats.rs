//! Stats handler.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::StatsResponse;
use crate::app_state::AppState;
use crate::error::{ErrorResponse, GatewayError};

/// `GET /api/v1/stats`: Today's activity summary.
///
/// # Errors
///
/// Returns [`GatewayError::StoreUnavailable`] if a counter read fails.
#[utoipa::path(
    get,
    path = "/api/v1/stats",
    tag = "Stats",
    summary = "Activity stats",
    description = "Shots today and in the last hour, plus the busiest cities and profiles of the current UTC day.",
    responses(
        (status = 200, description = "Stats snapshot", body = StatsResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse),
    )
)]
pub async fn get_stats(State(state): State<AppState>) -> Result<impl IntoResponse, GatewayError> {
    let snapshot = state.aggregates.snapshot().await?;
    Ok(Json(StatsResponse::from(snapshot)))
}

/// Stats routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/stats", get(get_stats))
}
