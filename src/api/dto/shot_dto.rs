//! Ingestion and recent-shot DTOs.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::ShotEvent;
use crate::error::GatewayError;
use crate::service::IngestOutcome;

/// Response body of `POST /api/v1/shots`, for success and failure alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ShotResponse {
    /// Whether the shot was accepted.
    pub ok: bool,
    /// Whether the city resolved to known coordinates.
    pub resolved: bool,
    /// Stored latitude.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    /// Stored longitude.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    /// Identifier of the stored event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&IngestOutcome> for ShotResponse {
    fn from(outcome: &IngestOutcome) -> Self {
        Self {
            ok: true,
            resolved: outcome.resolved,
            lat: outcome.coordinates.map(|c| c.lat),
            lon: outcome.coordinates.map(|c| c.lon),
            event_id: Some(outcome.event_id.to_string()),
            error: None,
        }
    }
}

impl From<&GatewayError> for ShotResponse {
    fn from(err: &GatewayError) -> Self {
        let error = match err {
            GatewayError::Validation(reason) => reason.clone(),
            GatewayError::RateLimited { .. } => "Rate limit exceeded".to_string(),
            GatewayError::StoreUnavailable(_) | GatewayError::Internal(_) => {
                "Failed to store shot".to_string()
            }
            other => other.to_string(),
        };
        Self {
            ok: false,
            resolved: false,
            lat: None,
            lon: None,
            event_id: None,
            error: Some(error),
        }
    }
}

/// Query parameters of `GET /api/v1/shots/recent`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct RecentShotsQuery {
    /// Number of shots, clamped to 1..=100. Defaults to 20.
    pub limit: Option<usize>,
}

impl RecentShotsQuery {
    /// Effective limit.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(20).clamp(1, 100)
    }
}

/// Response body of `GET /api/v1/shots/recent`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RecentShotsResponse {
    /// Shots, newest first.
    pub shots: Vec<ShotEvent>,
}
