//! Shot ingestion and recent-shot handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::client_ip::SourceIp;
use crate::api::dto::{RecentShotsQuery, RecentShotsResponse, ShotResponse};
use crate::app_state::AppState;
use crate::domain::ShotSubmission;
use crate::error::{ErrorResponse, GatewayError};

/// `POST /api/v1/shots`: Ingest one shot.
///
/// Failures use the same body shape as success (`ok: false` plus
/// `error`), with the status code of the underlying [`GatewayError`].
#[utoipa::path(
    post,
    path = "/api/v1/shots",
    tag = "Shots",
    summary = "Ingest a shot",
    description = "Validates, rate limits (per source IP) and deduplicates (by `idempotency_key`) a shot, resolves its city, stores it and pushes it to live subscribers.",
    request_body = ShotSubmission,
    responses(
        (status = 200, description = "Shot stored, or duplicate of a stored shot", body = ShotResponse,
            headers(("X-RateLimit-Remaining" = u32, description = "Requests left in the window; absent for duplicates"))),
        (status = 400, description = "Invalid request", body = ShotResponse),
        (status = 429, description = "Rate limit exceeded", body = ShotResponse,
            headers(("Retry-After" = u64, description = "Seconds until the window resets"))),
        (status = 503, description = "Store unavailable", body = ShotResponse),
    )
)]
pub async fn ingest_shot(
    State(state): State<AppState>,
    SourceIp(source): SourceIp,
    payload: Result<Json<ShotSubmission>, JsonRejection>,
) -> Response {
    let result = match payload {
        Ok(Json(submission)) => state.ingest.ingest(submission, &source).await,
        Err(rejection) => Err(GatewayError::Validation(format!(
            "Invalid JSON body: {}",
            rejection.body_text()
        ))),
    };

    match result {
        Ok(outcome) => {
            let mut response = (StatusCode::OK, Json(ShotResponse::from(&outcome))).into_response();
            if let Some(remaining) = outcome.remaining {
                response
                    .headers_mut()
                    .insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            }
            response
        }
        Err(err) => {
            let mut response = (err.status_code(), Json(ShotResponse::from(&err))).into_response();
            for (name, value) in err.rate_limit_headers() {
                if let Ok(value) = value.parse::<HeaderValue>() {
                    response.headers_mut().insert(name, value);
                }
            }
            response
        }
    }
}

/// `GET /api/v1/shots/recent`: Most recent shots.
///
/// # Errors
///
/// Returns [`GatewayError::StoreUnavailable`] if the store read fails.
#[utoipa::path(
    get,
    path = "/api/v1/shots/recent",
    tag = "Shots",
    summary = "Recent shots",
    description = "Returns the most recent shots, newest first, from today's and yesterday's partitions.",
    params(RecentShotsQuery),
    responses(
        (status = 200, description = "Recent shots", body = RecentShotsResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse),
    )
)]
pub async fn recent_shots(
    State(state): State<AppState>,
    Query(query): Query<RecentShotsQuery>,
) -> Result<impl IntoResponse, GatewayError> {
    let shots = state.ingest.recent(query.limit()).await?;
    Ok(Json(RecentShotsResponse { shots }))
}

/// Shot routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/shots", post(ingest_shot))
        .route("/shots/recent", get(recent_shots))
}
