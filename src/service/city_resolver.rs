//! City name to coordinate resolution.
//!
//! [`CityDirectory`] is the read-only lookup table of known cities;
//! [`CityResolver`] layers the fallback chain on top of it:
//!
//! 1. directory hit (exact name + country first, then name only);
//! 2. client coordinates coarsened to 0.1°;
//! 3. the sentinel position with `resolved = false`.
//!
//! Resolution never fails. A slow directory is cut off after the
//! configured timeout and treated as a miss.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::location::{UNKNOWN_COUNTRY_CODE, UNRESOLVED_COORDINATES};
use crate::domain::{Coordinates, ResolvedLocation};

/// One known city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityEntry {
    /// Canonical display name.
    pub city: String,
    /// ISO 3166-1 alpha-2 code.
    pub country_code: String,
    /// Latitude of the city centre.
    pub lat: f64,
    /// Longitude of the city centre.
    pub lon: f64,
    /// Population, used to pick between same-named cities.
    #[serde(default)]
    pub population: Option<u64>,
}

/// Read-only lookup of city coordinates.
#[async_trait]
pub trait CityDirectory: Send + Sync + std::fmt::Debug {
    /// Finds `city` (case-insensitive). With a country code, an exact
    /// `(city, country)` match is preferred over a name-only match.
    async fn lookup(&self, city: &str, country_code: Option<&str>) -> Option<CityEntry>;
}

/// In-memory city table keyed by lower-cased name.
#[derive(Debug, Default, Clone)]
pub struct StaticCityDirectory {
    by_name: HashMap<String, Vec<CityEntry>>,
}

impl StaticCityDirectory {
    /// Builds a directory from `entries`.
    #[must_use]
    pub fn new(entries: impl IntoIterator<Item = CityEntry>) -> Self {
        let mut by_name: HashMap<String, Vec<CityEntry>> = HashMap::new();
        for entry in entries {
            by_name
                .entry(normalize_name(&entry.city))
                .or_default()
                .push(entry);
        }
        for candidates in by_name.values_mut() {
            candidates.sort_by(|a, b| b.population.cmp(&a.population));
        }
        Self { by_name }
    }

    /// Directory seeded with the built-in list of major cities.
    #[must_use]
    pub fn with_builtin() -> Self {
        Self::new(builtin_cities())
    }

    /// Built-in cities plus every entry of a JSON array file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a JSON array
    /// of city entries.
    pub fn with_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let extra: Vec<CityEntry> = serde_json::from_str(&raw)?;
        Ok(Self::new(builtin_cities().into_iter().chain(extra)))
    }

    /// Number of cities held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.values().map(Vec::len).sum()
    }

    /// Returns `true` if the directory holds no cities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[async_trait]
impl CityDirectory for StaticCityDirectory {
    async fn lookup(&self, city: &str, country_code: Option<&str>) -> Option<CityEntry> {
        let candidates = self.by_name.get(&normalize_name(city))?;
        if let Some(cc) = country_code
            && let Some(exact) = candidates
                .iter()
                .find(|c| c.country_code.eq_ignore_ascii_case(cc))
        {
            return Some(exact.clone());
        }
        candidates.first().cloned()
    }
}

fn normalize_name(city: &str) -> String {
    city.trim().to_lowercase()
}

/// Fallback chain over a [`CityDirectory`].
#[derive(Debug, Clone)]
pub struct CityResolver {
    directory: Arc<dyn CityDirectory>,
    timeout: Duration,
}

impl CityResolver {
    /// Creates a resolver giving each lookup at most `timeout`.
    #[must_use]
    pub fn new(directory: Arc<dyn CityDirectory>, timeout: Duration) -> Self {
        Self { directory, timeout }
    }

    /// Resolves a city to a best-effort location.
    pub async fn resolve(
        &self,
        city: &str,
        country_code: Option<&str>,
        client_coordinates: Option<Coordinates>,
    ) -> ResolvedLocation {
        let lookup = tokio::time::timeout(self.timeout, self.directory.lookup(city, country_code));
        match lookup.await {
            Ok(Some(entry)) => {
                return ResolvedLocation {
                    resolved: true,
                    city: entry.city,
                    country_code: entry.country_code,
                    coordinates: Coordinates::new(entry.lat, entry.lon),
                };
            }
            Ok(None) => {}
            Err(_) => {
                tracing::warn!(city, timeout = ?self.timeout, "city lookup timed out");
            }
        }

        let country_code = country_code.unwrap_or(UNKNOWN_COUNTRY_CODE).to_string();
        if let Some(coordinates) = client_coordinates {
            return ResolvedLocation {
                resolved: true,
                city: city.to_string(),
                country_code,
                coordinates: coordinates.coarsened(),
            };
        }

        tracing::warn!(city, country = %country_code, "unresolved city");
        ResolvedLocation {
            resolved: false,
            city: city.to_string(),
            country_code,
            coordinates: UNRESOLVED_COORDINATES,
        }
    }
}

fn city(name: &str, country_code: &str, lat: f64, lon: f64, population: u64) -> CityEntry {
    CityEntry {
        city: name.to_string(),
        country_code: country_code.to_string(),
        lat,
        lon,
        population: Some(population),
    }
}

/// Major cities available without an external table.
fn builtin_cities() -> Vec<CityEntry> {
    vec![
        city("Amsterdam", "NL", 52.374, 4.8897, 741_636),
        city("Athens", "GR", 37.9838, 23.7278, 664_046),
        city("Auckland", "NZ", -36.8485, 174.7633, 1_657_000),
        city("Austin", "US", 30.2672, -97.7431, 961_855),
        city("Bangkok", "TH", 13.7563, 100.5018, 5_104_476),
        city("Barcelona", "ES", 41.3888, 2.159, 1_620_343),
        city("Beijing", "CN", 39.9042, 116.4074, 18_960_744),
        city("Berlin", "DE", 52.52, 13.405, 3_426_354),
        city("Bogota", "CO", 4.711, -74.0721, 7_674_366),
        city("Boston", "US", 42.3601, -71.0589, 675_647),
        city("Brisbane", "AU", -27.4698, 153.0251, 2_280_000),
        city("Brussels", "BE", 50.8503, 4.3517, 1_019_022),
        city("Budapest", "HU", 47.4979, 19.0402, 1_741_041),
        city("Buenos Aires", "AR", -34.6037, -58.3816, 13_076_300),
        city("Cairo", "EG", 30.0444, 31.2357, 7_734_614),
        city("Cape Town", "ZA", -33.9249, 18.4241, 3_433_441),
        city("Chicago", "US", 41.8781, -87.6298, 2_746_388),
        city("Copenhagen", "DK", 55.6761, 12.5683, 1_153_615),
        city("Dallas", "US", 32.7767, -96.797, 1_304_379),
        city("Denver", "US", 39.7392, -104.9903, 715_522),
        city("Dubai", "AE", 25.2048, 55.2708, 1_137_347),
        city("Dublin", "IE", 53.3498, -6.2603, 1_024_027),
        city("Edinburgh", "GB", 55.9533, -3.1883, 464_990),
        city("Hamburg", "DE", 53.5511, 9.9937, 1_739_117),
        city("Helsinki", "FI", 60.1699, 24.9384, 558_457),
        city("Hong Kong", "HK", 22.3193, 114.1694, 7_012_738),
        city("Istanbul", "TR", 41.0082, 28.9784, 14_804_116),
        city("Jakarta", "ID", -6.2088, 106.8456, 8_540_121),
        city("Johannesburg", "ZA", -26.2041, 28.0473, 2_026_469),
        city("Lisbon", "PT", 38.7223, -9.1393, 517_802),
        city("London", "GB", 51.5074, -0.1278, 8_961_989),
        city("London", "CA", 42.9849, -81.2453, 383_822),
        city("Los Angeles", "US", 34.0522, -118.2437, 3_898_747),
        city("Madrid", "ES", 40.4168, -3.7038, 3_255_944),
        city("Manila", "PH", 14.5995, 120.9842, 1_600_000),
        city("Melbourne", "AU", -37.8136, 144.9631, 4_917_750),
        city("Mexico City", "MX", 19.4326, -99.1332, 12_294_193),
        city("Miami", "US", 25.7617, -80.1918, 442_241),
        city("Milan", "IT", 45.4642, 9.19, 1_371_498),
        city("Montreal", "CA", 45.5017, -73.5673, 1_762_949),
        city("Moscow", "RU", 55.7558, 37.6173, 10_381_222),
        city("Mumbai", "IN", 19.076, 72.8777, 12_691_836),
        city("Munich", "DE", 48.1351, 11.582, 1_260_391),
        city("Nairobi", "KE", -1.2921, 36.8219, 2_750_547),
        city("New York", "US", 40.7128, -74.006, 8_804_190),
        city("Oslo", "NO", 59.9139, 10.7522, 580_000),
        city("Paris", "FR", 48.8566, 2.3522, 2_138_551),
        city("Paris", "US", 33.6609, -95.5555, 24_171),
        city("Portland", "US", 45.5152, -122.6784, 652_503),
        city("Prague", "CZ", 50.0755, 14.4378, 1_165_581),
        city("Rome", "IT", 41.9028, 12.4964, 2_318_895),
        city("San Francisco", "US", 37.7749, -122.4194, 873_965),
        city("Santiago", "CL", -33.4489, -70.6693, 4_837_295),
        city("Sao Paulo", "BR", -23.5505, -46.6333, 10_021_295),
        city("Seattle", "US", 47.6062, -122.3321, 737_015),
        city("Seoul", "KR", 37.5665, 126.978, 10_349_312),
        city("Singapore", "SG", 1.3521, 103.8198, 3_547_809),
        city("Stockholm", "SE", 59.3293, 18.0686, 1_515_017),
        city("Sydney", "AU", -33.8688, 151.2093, 4_627_345),
        city("Taipei", "TW", 25.033, 121.5654, 7_871_900),
        city("Tokyo", "JP", 35.6762, 139.6503, 8_336_599),
        city("Toronto", "CA", 43.6532, -79.3832, 2_600_000),
        city("Vancouver", "CA", 49.2827, -123.1207, 600_000),
        city("Vienna", "AT", 48.2082, 16.3738, 1_691_468),
        city("Warsaw", "PL", 52.2297, 21.0122, 1_702_139),
        city("Zurich", "CH", 47.3769, 8.5417, 341_730),
    ]
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn resolver() -> CityResolver {
        CityResolver::new(
            Arc::new(StaticCityDirectory::with_builtin()),
            Duration::from_millis(500),
        )
    }

    #[derive(Debug)]
    struct StalledDirectory;

    #[async_trait]
    impl CityDirectory for StalledDirectory {
        async fn lookup(&self, _city: &str, _country_code: Option<&str>) -> Option<CityEntry> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            None
        }
    }

    #[tokio::test]
    async fn resolves_known_city_case_insensitively() {
        let loc = resolver().resolve("  berlin ", None, None).await;
        assert!(loc.resolved);
        assert_eq!(loc.city, "Berlin");
        assert_eq!(loc.country_code, "DE");
        assert_eq!(loc.coordinates, Coordinates::new(52.52, 13.405));
    }

    #[tokio::test]
    async fn country_code_disambiguates() {
        let loc = resolver().resolve("London", Some("CA"), None).await;
        assert_eq!(loc.country_code, "CA");
        let loc = resolver().resolve("London", None, None).await;
        assert_eq!(loc.country_code, "GB");
    }

    #[tokio::test]
    async fn unknown_country_falls_back_to_most_populous() {
        let loc = resolver().resolve("Paris", Some("JP"), None).await;
        assert!(loc.resolved);
        assert_eq!(loc.country_code, "FR");
    }

    #[tokio::test]
    async fn miss_uses_coarsened_client_coordinates() {
        let loc = resolver()
            .resolve("Smalltown", Some("NZ"), Some(Coordinates::new(-45.8788, 170.5028)))
            .await;
        assert!(loc.resolved);
        assert_eq!(loc.city, "Smalltown");
        assert_eq!(loc.country_code, "NZ");
        assert!((loc.coordinates.lat + 45.9).abs() < 1e-9);
        assert!((loc.coordinates.lon - 170.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn miss_without_coordinates_uses_sentinel() {
        let loc = resolver().resolve("Nowhere", None, None).await;
        assert!(!loc.resolved);
        assert_eq!(loc.country_code, UNKNOWN_COUNTRY_CODE);
        assert_eq!(loc.coordinates, UNRESOLVED_COORDINATES);
    }

    #[tokio::test]
    async fn slow_directory_counts_as_miss() {
        let resolver = CityResolver::new(Arc::new(StalledDirectory), Duration::from_millis(20));
        let loc = resolver.resolve("Berlin", Some("DE"), None).await;
        assert!(!loc.resolved);
        assert_eq!(loc.country_code, "DE");
    }

    #[test]
    fn file_entries_extend_builtin() {
        let path = std::env::temp_dir().join(format!("cities-{}.json", uuid::Uuid::new_v4()));
        let body = r#"[{"city": "Dunedin", "country_code": "NZ", "lat": -45.87, "lon": 170.5}]"#;
        if std::fs::write(&path, body).is_err() {
            panic!("could not write fixture");
        }
        let Ok(directory) = StaticCityDirectory::with_file(&path) else {
            panic!("fixture should load");
        };
        let _ = std::fs::remove_file(&path);
        assert_eq!(directory.len(), StaticCityDirectory::with_builtin().len() + 1);
    }
}
