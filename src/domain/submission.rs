//! Client shot submissions and their validation.
//!
//! [`ShotSubmission`] mirrors the JSON body accepted by the ingestion
//! endpoint with every field optional, so that missing fields are reported
//! together with other violations instead of failing deserialization.
//! [`ShotSubmission::validate`] normalizes text fields and produces a
//! [`ValidatedShot`] or a single [`GatewayError::Validation`] listing every
//! problem.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::ToSchema;

use super::location::Coordinates;
use super::shot_event::ShotDetails;
use crate::error::GatewayError;

const MAX_CITY: usize = 100;
const MAX_PROFILE: usize = 200;
const MAX_SOFTWARE_NAME: usize = 100;
const MAX_VERSION: usize = 50;
const MAX_MODEL: usize = 100;
const MAX_IDEMPOTENCY_KEY: usize = 64;

/// Raw shot report as sent by a client.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ShotSubmission {
    /// Client timestamp in milliseconds; server receipt time when omitted.
    #[serde(default, alias = "ts")]
    pub timestamp: Option<i64>,
    /// City name as typed by the user.
    #[serde(default)]
    pub city: Option<String>,
    /// ISO 3166-1 alpha-2 country code.
    #[serde(default)]
    pub country_code: Option<String>,
    /// Profile name.
    #[serde(default)]
    pub profile: Option<String>,
    /// Reporting application.
    #[serde(default)]
    pub software_name: Option<String>,
    /// Reporting application version.
    #[serde(default)]
    pub software_version: Option<String>,
    /// Machine model.
    #[serde(default)]
    pub machine_model: Option<String>,
    /// Device latitude, used only when the city cannot be resolved.
    #[serde(default)]
    pub lat: Option<f64>,
    /// Device longitude, used only when the city cannot be resolved.
    #[serde(default)]
    pub lon: Option<f64>,
    /// Client-chosen retry token.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// A submission that passed validation, with normalized text.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedShot {
    /// Client timestamp, if supplied.
    pub timestamp: Option<i64>,
    /// Normalized city name.
    pub city: String,
    /// Upper-cased country code, if supplied.
    pub country_code: Option<String>,
    /// Client coordinates; present only if both components were sent.
    pub coordinates: Option<Coordinates>,
    /// Non-empty idempotency key.
    pub idempotency_key: Option<String>,
    /// Remaining descriptive fields.
    pub details: ShotDetails,
}

impl ShotSubmission {
    /// Validates and normalizes the submission.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] describing every failing field
    /// as `field: message`, joined by `"; "`.
    pub fn validate(self) -> Result<ValidatedShot, GatewayError> {
        let mut errors = Vec::new();

        let timestamp = match self.timestamp {
            Some(ts) if ts <= 0 => {
                errors.push("timestamp: must be a positive integer".to_string());
                None
            }
            Some(ts) if DateTime::<Utc>::from_timestamp_millis(ts).is_none() => {
                errors.push("timestamp: out of range".to_string());
                None
            }
            other => other,
        };

        let city = required_text(&mut errors, "city", self.city, MAX_CITY);
        let profile = required_text(&mut errors, "profile", self.profile, MAX_PROFILE);
        let software_name = required_text(
            &mut errors,
            "software_name",
            self.software_name,
            MAX_SOFTWARE_NAME,
        );
        let software_version = required_text(
            &mut errors,
            "software_version",
            self.software_version,
            MAX_VERSION,
        );
        let machine_model =
            required_text(&mut errors, "machine_model", self.machine_model, MAX_MODEL);

        let country_code = match self.country_code {
            None => None,
            Some(cc) => match parse_country_code(&cc) {
                Some(cc) => Some(cc),
                None => {
                    errors.push(
                        "country_code: must be 2 letters (ISO 3166-1 alpha-2)".to_string(),
                    );
                    None
                }
            },
        };

        let lat = bounded(&mut errors, "lat", self.lat, 90.0);
        let lon = bounded(&mut errors, "lon", self.lon, 180.0);
        let coordinates = match (lat, lon) {
            (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)),
            _ => None,
        };

        let idempotency_key = match self.idempotency_key.map(|k| k.trim().to_string()) {
            Some(key) if key.chars().count() > MAX_IDEMPOTENCY_KEY => {
                errors.push(format!(
                    "idempotency_key: must be at most {MAX_IDEMPOTENCY_KEY} characters"
                ));
                None
            }
            Some(key) if key.is_empty() => None,
            other => other,
        };

        if !errors.is_empty() {
            return Err(GatewayError::Validation(errors.join("; ")));
        }

        Ok(ValidatedShot {
            timestamp,
            city: city.unwrap_or_default(),
            country_code,
            coordinates,
            idempotency_key,
            details: ShotDetails {
                profile: profile.unwrap_or_default(),
                software_name: software_name.unwrap_or_default(),
                software_version: software_version.unwrap_or_default(),
                machine_model: machine_model.unwrap_or_default(),
            },
        })
    }
}

/// Trims and collapses internal whitespace runs to a single space.
#[must_use]
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Upper-cases a two-letter ASCII country code, or `None` if malformed.
#[must_use]
pub fn parse_country_code(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()))
        .then(|| trimmed.to_ascii_uppercase())
}

fn required_text(
    errors: &mut Vec<String>,
    field: &str,
    value: Option<String>,
    max: usize,
) -> Option<String> {
    let normalized = value.as_deref().map(normalize_text).unwrap_or_default();
    if normalized.is_empty() {
        errors.push(format!("{field}: {field} is required"));
        return None;
    }
    if normalized.chars().count() > max {
        errors.push(format!("{field}: {field} must be at most {max} characters"));
        return None;
    }
    Some(normalized)
}

fn bounded(errors: &mut Vec<String>, field: &str, value: Option<f64>, limit: f64) -> Option<f64> {
    let value = value?;
    if value.is_finite() && (-limit..=limit).contains(&value) {
        Some(value)
    } else {
        errors.push(format!("{field}: must be between -{limit} and {limit}"));
        None
    }
}
