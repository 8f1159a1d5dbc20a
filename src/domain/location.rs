//! Geographic value types produced by city resolution.

use serde::{Deserialize, Serialize};

/// Country code recorded when neither the directory nor the client supplied one.
pub const UNKNOWN_COUNTRY_CODE: &str = "XX";

/// Sentinel position used for cities that could not be resolved (mid-Atlantic).
pub const UNRESOLVED_COORDINATES: Coordinates = Coordinates {
    lat: 0.0,
    lon: -30.0,
};

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in `[-90, 90]`.
    pub lat: f64,
    /// Longitude in `[-180, 180]`.
    pub lon: f64,
}

impl Coordinates {
    /// Creates a coordinate pair.
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Rounds both components to one decimal place (~11 km), which is as
    /// precise as a client-supplied position is ever stored.
    #[must_use]
    pub fn coarsened(self) -> Self {
        Self {
            lat: (self.lat * 10.0).round() / 10.0,
            lon: (self.lon * 10.0).round() / 10.0,
        }
    }
}

/// Best-effort location attached to a shot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    /// `false` only when the sentinel position was used.
    pub resolved: bool,
    /// Canonical city label.
    pub city: String,
    /// ISO 3166-1 alpha-2 code, or [`UNKNOWN_COUNTRY_CODE`].
    pub country_code: String,
    /// Position of the city.
    pub coordinates: Coordinates,
}
