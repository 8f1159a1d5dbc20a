//! REST API layer: route handlers, DTOs, and router composition.
//!
//! All resource endpoints are mounted under `/api/v1`; `/health` and
//! `/ws` live at the root.

pub mod client_ip;
pub mod device;
pub mod dto;
pub mod handlers;

use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// OpenAPI document of the REST surface.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "shotmap-gateway",
        description = "Shot ingestion API and live WebSocket feed"
    ),
    paths(
        handlers::shots::ingest_shot,
        handlers::shots::recent_shots,
        handlers::stats::get_stats,
        handlers::library::create_entry,
        handlers::library::list_entries,
        handlers::library::get_entry,
        handlers::library::delete_entry,
        handlers::library::record_download,
        handlers::library::flag_entry,
        handlers::system::health_handler,
    ),
    components(schemas(
        crate::domain::ShotSubmission,
        crate::domain::ShotEvent,
        dto::ShotResponse,
        dto::RecentShotsResponse,
        dto::StatsResponse,
        dto::CityCountDto,
        dto::ProfileCountDto,
        crate::domain::LibraryEntryInput,
        crate::domain::LibraryFlagInput,
        crate::domain::LibrarySort,
        dto::LibraryEntrySummary,
        dto::LibraryEntryResponse,
        dto::LibraryCreatedResponse,
        dto::LibraryListResponse,
        dto::LibraryDownloadResponse,
        dto::SuccessResponse,
        handlers::system::HealthResponse,
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
    )),
    tags(
        (name = "Shots", description = "Shot ingestion and recent shots"),
        (name = "Stats", description = "Daily aggregates"),
        (name = "Library", description = "Shared profile library"),
        (name = "System", description = "Health"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
}

/// Full application: REST, WebSocket, Swagger UI and HTTP middleware.
///
/// `request_timeout` bounds plain HTTP requests; upgraded sockets are not
/// affected once the upgrade response is sent.
pub fn build_app(state: AppState, request_timeout: Duration) -> Router {
    let router = build_router().route("/ws", get(ws_handler));

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );
    #[cfg(not(feature = "swagger-ui"))]
    let router = router.route(
        "/api-docs/openapi.json",
        get(|| async { axum::Json(ApiDoc::openapi()) }),
    );

    router
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
