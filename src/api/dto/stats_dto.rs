//! Stats DTOs.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::service::StatsSnapshot;

/// A city in the top-K list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CityCountDto {
    /// City label.
    pub city: String,
    /// Country code of the city.
    pub country_code: String,
    /// Shots today.
    pub count: u64,
}

/// A profile in the top-K list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProfileCountDto {
    /// Profile label.
    pub profile: String,
    /// Shots today.
    pub count: u64,
}

/// Response body of `GET /api/v1/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatsResponse {
    /// Shots counted today (UTC).
    pub shots_today: u64,
    /// Shots within the last hour.
    pub shots_last_hour: u64,
    /// Busiest cities today.
    pub top_cities: Vec<CityCountDto>,
    /// Most used profiles today.
    pub top_profiles: Vec<ProfileCountDto>,
}

impl From<StatsSnapshot> for StatsResponse {
    fn from(snapshot: StatsSnapshot) -> Self {
        Self {
            shots_today: snapshot.shots_today,
            shots_last_hour: snapshot.shots_last_hour,
            top_cities: snapshot
                .top_cities
                .into_iter()
                .map(|c| CityCountDto {
                    city: c.city,
                    country_code: c.country_code,
                    count: c.count,
                })
                .collect(),
            top_profiles: snapshot
                .top_profiles
                .into_iter()
                .map(|p| ProfileCountDto {
                    profile: p.profile,
                    count: p.count,
                })
                .collect(),
        }
    }
}
