//! Shared profile library handlers.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::client_ip::SourceIp;
use crate::api::device::DeviceId;
use crate::api::dto::{
    LibraryCreatedResponse, LibraryDownloadResponse, LibraryEntryResponse, LibraryListQuery,
    LibraryListResponse, SuccessResponse,
};
use crate::app_state::AppState;
use crate::domain::{LibraryEntryId, LibraryEntryInput, LibraryFlagInput};
use crate::error::{ErrorResponse, GatewayError};

/// Unknown and malformed ids both read as missing.
fn entry_id(raw: &str) -> Result<LibraryEntryId, GatewayError> {
    raw.parse()
        .map_err(|_| GatewayError::NotFound(format!("library entry {raw} not found")))
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, GatewayError> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        GatewayError::Validation(format!("Invalid JSON body: {}", rejection.body_text()))
    })
}

fn with_remaining(mut response: Response, remaining: u32) -> Response {
    response
        .headers_mut()
        .insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    response
}

/// `POST /api/v1/library`: Upload an entry.
///
/// # Errors
///
/// 401 without `X-Device-Id`, 400 for invalid input, 429 once the device
/// spent its upload quota, 409 for a document already in the library.
#[utoipa::path(
    post,
    path = "/api/v1/library",
    tag = "Library",
    summary = "Upload a library entry",
    description = "Stores a profile (or other document) uploaded by the device named in `X-Device-Id`. Identical documents are rejected with the id of the existing entry.",
    request_body = LibraryEntryInput,
    params(("X-Device-Id" = String, Header, description = "Uploading device")),
    responses(
        (status = 201, description = "Entry stored", body = LibraryCreatedResponse,
            headers(("X-RateLimit-Remaining" = u32, description = "Uploads left in the window"))),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Missing device id", body = ErrorResponse),
        (status = 409, description = "Identical entry exists; `details` holds its id", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse,
            headers(("Retry-After" = u64, description = "Seconds until the window resets"))),
        (status = 503, description = "Store unavailable", body = ErrorResponse),
    )
)]
pub async fn create_entry(
    State(state): State<AppState>,
    device: DeviceId,
    payload: Result<Json<LibraryEntryInput>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let input = json_body(payload)?;
    let created = state.library.create(input, device.as_deref()).await?;
    let body = LibraryCreatedResponse {
        id: created.entry.id.to_string(),
        kind: created.entry.kind.clone(),
        created_at: created.entry.created_at,
    };
    Ok(with_remaining(
        (StatusCode::CREATED, Json(body)).into_response(),
        created.remaining,
    ))
}

/// `GET /api/v1/library`: List entries.
///
/// # Errors
///
/// 400 for malformed query parameters, 401 for `device_id=mine` without
/// `X-Device-Id`.
#[utoipa::path(
    get,
    path = "/api/v1/library",
    tag = "Library",
    summary = "List library entries",
    description = "Lists entries without their documents, filtered by type, tags, creation time or device, sorted by `newest` or `popular`, one page at a time.",
    params(LibraryListQuery),
    responses(
        (status = 200, description = "One page of entries", body = LibraryListResponse),
        (status = 400, description = "Invalid query", body = ErrorResponse),
        (status = 401, description = "device_id=mine without X-Device-Id", body = ErrorResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse),
    )
)]
pub async fn list_entries(
    State(state): State<AppState>,
    device: DeviceId,
    query: Result<Query<LibraryListQuery>, QueryRejection>,
) -> Result<impl IntoResponse, GatewayError> {
    let Query(query) = query.map_err(|rejection| {
        GatewayError::Validation(format!("Invalid query: {}", rejection.body_text()))
    })?;
    let page = state.library.list(query.into(), device.as_deref()).await?;
    Ok(Json(LibraryListResponse::from(&page)))
}

/// `GET /api/v1/library/{id}`: One entry with its document.
///
/// # Errors
///
/// 404 if the entry does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/library/{id}",
    tag = "Library",
    summary = "Get a library entry",
    params(("id" = String, Path, description = "Entry id")),
    responses(
        (status = 200, description = "The entry", body = LibraryEntryResponse),
        (status = 404, description = "No such entry", body = ErrorResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse),
    )
)]
pub async fn get_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let entry = state.library.get(&entry_id(&id)?).await?;
    Ok(Json(LibraryEntryResponse::from(&entry)))
}

/// `DELETE /api/v1/library/{id}`: Delete an own entry.
///
/// # Errors
///
/// 401 without `X-Device-Id`, 403 when the entry is missing or belongs
/// to another device.
#[utoipa::path(
    delete,
    path = "/api/v1/library/{id}",
    tag = "Library",
    summary = "Delete a library entry",
    params(
        ("id" = String, Path, description = "Entry id"),
        ("X-Device-Id" = String, Header, description = "Uploading device"),
    ),
    responses(
        (status = 200, description = "Entry deleted", body = SuccessResponse),
        (status = 401, description = "Missing device id", body = ErrorResponse),
        (status = 403, description = "Not found or not the owner", body = ErrorResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse),
    )
)]
pub async fn delete_entry(
    State(state): State<AppState>,
    device: DeviceId,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let owner = device.as_deref();
    match entry_id(&id) {
        Ok(id) => state.library.delete(&id, owner).await?,
        Err(_) if owner.is_none() => {
            return Err(GatewayError::Unauthorized(
                "X-Device-Id header is required".to_string(),
            ));
        }
        // a malformed id cannot name an owned entry
        Err(_) => {
            return Err(GatewayError::Forbidden(
                "entry not found or you are not the owner".to_string(),
            ));
        }
    }
    Ok(Json(SuccessResponse { success: true }))
}

/// `POST /api/v1/library/{id}/download`: Record a download.
///
/// # Errors
///
/// 404 if the entry does not exist.
#[utoipa::path(
    post,
    path = "/api/v1/library/{id}/download",
    tag = "Library",
    summary = "Record a download",
    params(("id" = String, Path, description = "Entry id")),
    responses(
        (status = 200, description = "Download counted", body = LibraryDownloadResponse),
        (status = 404, description = "No such entry", body = ErrorResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse),
    )
)]
pub async fn record_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let downloads = state.library.record_download(&entry_id(&id)?).await?;
    Ok(Json(LibraryDownloadResponse {
        success: true,
        downloads,
    }))
}

/// `POST /api/v1/library/{id}/flag`: Flag an entry for moderation.
///
/// # Errors
///
/// 429 once the caller IP spent its flag quota, 400 without a reason,
/// 404 if the entry does not exist.
#[utoipa::path(
    post,
    path = "/api/v1/library/{id}/flag",
    tag = "Library",
    summary = "Flag a library entry",
    params(("id" = String, Path, description = "Entry id")),
    request_body = LibraryFlagInput,
    responses(
        (status = 200, description = "Flag recorded", body = SuccessResponse,
            headers(("X-RateLimit-Remaining" = u32, description = "Flags left in the window"))),
        (status = 400, description = "Missing reason", body = ErrorResponse),
        (status = 404, description = "No such entry", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse,
            headers(("Retry-After" = u64, description = "Seconds until the window resets"))),
        (status = 503, description = "Store unavailable", body = ErrorResponse),
    )
)]
pub async fn flag_entry(
    State(state): State<AppState>,
    SourceIp(source): SourceIp,
    Path(id): Path<String>,
    payload: Result<Json<LibraryFlagInput>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let id = entry_id(&id)?;
    let input = json_body(payload)?;
    let outcome = state.library.flag(&id, input, &source).await?;
    Ok(with_remaining(
        Json(SuccessResponse { success: true }).into_response(),
        outcome.remaining,
    ))
}

/// Library routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/library", get(list_entries).post(create_entry))
        .route("/library/{id}", get(get_entry).delete(delete_entry))
        .route("/library/{id}/download", post(record_download))
        .route("/library/{id}/flag", post(flag_entry))
}
