//! Geographic distance provider.
//!
//! Haversine great-circle math is always available; road distances come from
//! a pluggable external matrix source and degrade to haversine times a road
//! factor whenever the source is absent or failing. Every resolved pair is
//! cached for the lifetime of the provider.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Multiplier correcting straight-line distance to an estimated road distance.
pub const DEFAULT_ROAD_FACTOR: f64 = 1.3;

/// Average city driving speed assumed for time estimates.
pub const DEFAULT_SPEED_KMH: f64 = 25.0;

/// Above this many origin-destination pairs a batch is always computed
/// analytically, never via per-pair external calls.
pub const DEFAULT_BATCH_PAIR_LIMIT: usize = 100;

/// Great-circle distance between two `(lat, lng)` points in kilometers.
pub fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lng1) = from;
    let (lat2, lng2) = to;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lng2 - lng1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Convert a distance to an estimated travel time in minutes.
pub fn estimate_travel_time_min(distance_km: f64, avg_speed_kmh: f64) -> f64 {
    (distance_km / avg_speed_kmh) * 60.0
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("distance source request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("distance source returned malformed data: {0}")]
    Malformed(String),
}

/// External road-distance metric source.
///
/// Implementations return kilometers. Any error is recovered by the provider
/// via the analytic fallback; implementations should not retry internally.
pub trait RoadDistanceSource: Send + Sync {
    fn distance_km(&self, from: (f64, f64), to: (f64, f64)) -> Result<f64, SourceError>;

    fn matrix_km(
        &self,
        origins: &[(f64, f64)],
        destinations: &[(f64, f64)],
    ) -> Result<Vec<Vec<f64>>, SourceError>;
}

#[derive(Debug, Clone)]
pub struct MatrixApiConfig {
    pub base_url: String,
    pub api_key: String,
    /// Timeout for single-pair lookups.
    pub lookup_timeout: Duration,
    /// Timeout for batch matrix requests.
    pub batch_timeout: Duration,
}

impl MatrixApiConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            lookup_timeout: Duration::from_secs(10),
            batch_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP adapter for a Distance-Matrix-style API.
#[derive(Debug)]
pub struct MatrixApiSource {
    config: MatrixApiConfig,
    client: reqwest::blocking::Client,
}

impl MatrixApiSource {
    pub fn new(config: MatrixApiConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder().build()?;
        Ok(Self { config, client })
    }

    fn request(
        &self,
        origins: &str,
        destinations: &str,
        timeout: Duration,
    ) -> Result<MatrixResponse, SourceError> {
        let response = self
            .client
            .get(self.config.base_url.as_str())
            .timeout(timeout)
            .query(&[
                ("origins", origins),
                ("destinations", destinations),
                ("units", "metric"),
                ("mode", "driving"),
                ("key", self.config.api_key.as_str()),
            ])
            .send()?
            .error_for_status()?
            .json::<MatrixResponse>()?;

        if response.status != "OK" {
            return Err(SourceError::Malformed(format!(
                "matrix API status: {}",
                response.status
            )));
        }
        Ok(response)
    }
}

impl RoadDistanceSource for MatrixApiSource {
    fn distance_km(&self, from: (f64, f64), to: (f64, f64)) -> Result<f64, SourceError> {
        let response = self.request(
            &format_points(&[from]),
            &format_points(&[to]),
            self.config.lookup_timeout,
        )?;

        response
            .rows
            .first()
            .and_then(|row| row.elements.first())
            .and_then(MatrixElement::distance_km)
            .ok_or_else(|| SourceError::Malformed("empty matrix element".to_string()))
    }

    fn matrix_km(
        &self,
        origins: &[(f64, f64)],
        destinations: &[(f64, f64)],
    ) -> Result<Vec<Vec<f64>>, SourceError> {
        let response = self.request(
            &format_points(origins),
            &format_points(destinations),
            self.config.batch_timeout,
        )?;

        if response.rows.len() != origins.len() {
            return Err(SourceError::Malformed(format!(
                "expected {} rows, got {}",
                origins.len(),
                response.rows.len()
            )));
        }

        let matrix = response
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                row.elements
                    .iter()
                    .enumerate()
                    .map(|(j, element)| {
                        // Failed elements degrade individually instead of
                        // discarding the whole matrix.
                        element.distance_km().unwrap_or_else(|| {
                            haversine_km(origins[i], destinations[j]) * DEFAULT_ROAD_FACTOR
                        })
                    })
                    .collect()
            })
            .collect();

        Ok(matrix)
    }
}

fn format_points(points: &[(f64, f64)]) -> String {
    points
        .iter()
        .map(|(lat, lng)| format!("{lat},{lng}"))
        .collect::<Vec<_>>()
        .join("|")
}

#[derive(Debug, Deserialize)]
struct MatrixResponse {
    status: String,
    rows: Vec<MatrixRow>,
}

#[derive(Debug, Deserialize)]
struct MatrixRow {
    elements: Vec<MatrixElement>,
}

#[derive(Debug, Deserialize)]
struct MatrixElement {
    status: String,
    distance: Option<MatrixDistance>,
}

#[derive(Debug, Deserialize)]
struct MatrixDistance {
    /// Distance in meters.
    value: f64,
}

impl MatrixElement {
    fn distance_km(&self) -> Option<f64> {
        if self.status != "OK" {
            return None;
        }
        self.distance.as_ref().map(|d| d.value / 1000.0)
    }
}

#[derive(Debug, Clone)]
pub struct DistanceProviderConfig {
    pub road_factor: f64,
    pub avg_speed_kmh: f64,
    pub batch_pair_limit: usize,
}

impl Default for DistanceProviderConfig {
    fn default() -> Self {
        Self {
            road_factor: DEFAULT_ROAD_FACTOR,
            avg_speed_kmh: DEFAULT_SPEED_KMH,
            batch_pair_limit: DEFAULT_BATCH_PAIR_LIMIT,
        }
    }
}

/// Bit-exact coordinate pair, usable as a cache key.
type PairKey = (u64, u64, u64, u64);

fn pair_key(from: (f64, f64), to: (f64, f64)) -> PairKey {
    (
        from.0.to_bits(),
        from.1.to_bits(),
        to.0.to_bits(),
        to.1.to_bits(),
    )
}

/// Distance provider shared by the clusterer and the sequencer.
///
/// The pair cache is never evicted during a run and is guarded by a mutex so
/// per-worker sequencing can run in parallel.
pub struct DistanceProvider {
    source: Option<Box<dyn RoadDistanceSource>>,
    config: DistanceProviderConfig,
    cache: Mutex<HashMap<PairKey, f64>>,
}

impl DistanceProvider {
    /// Provider with no external source; every road distance is analytic.
    pub fn analytic() -> Self {
        Self::new(None, DistanceProviderConfig::default())
    }

    pub fn new(
        source: Option<Box<dyn RoadDistanceSource>>,
        config: DistanceProviderConfig,
    ) -> Self {
        Self {
            source,
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Road distance between two points in kilometers.
    ///
    /// Resolution order: cache, external source, haversine times road factor.
    /// Never fails; source errors are logged and recovered.
    pub fn road_distance_km(&self, from: (f64, f64), to: (f64, f64)) -> f64 {
        let key = pair_key(from, to);
        if let Some(cached) = self.cache.lock().expect("distance cache poisoned").get(&key) {
            return *cached;
        }

        let distance = match &self.source {
            Some(source) => match source.distance_km(from, to) {
                Ok(km) => km,
                Err(err) => {
                    warn!("road distance source failed, using analytic fallback: {err}");
                    self.fallback_km(from, to)
                }
            },
            None => self.fallback_km(from, to),
        };

        self.cache
            .lock()
            .expect("distance cache poisoned")
            .insert(key, distance);
        distance
    }

    /// All-pairs distance matrix in kilometers.
    ///
    /// Computed analytically when no source is configured or the pair count
    /// exceeds the batch limit; a per-pair external call is never made here.
    pub fn batch_distances_km(
        &self,
        origins: &[(f64, f64)],
        destinations: &[(f64, f64)],
    ) -> Vec<Vec<f64>> {
        let pair_count = origins.len() * destinations.len();
        let source = match &self.source {
            Some(source) if pair_count <= self.config.batch_pair_limit => source,
            _ => return self.analytic_matrix(origins, destinations),
        };

        match source.matrix_km(origins, destinations) {
            Ok(matrix) => matrix,
            Err(err) => {
                warn!("batch distance source failed, using analytic fallback: {err}");
                self.analytic_matrix(origins, destinations)
            }
        }
    }

    pub fn estimate_travel_time_min(&self, distance_km: f64) -> f64 {
        estimate_travel_time_min(distance_km, self.config.avg_speed_kmh)
    }

    fn fallback_km(&self, from: (f64, f64), to: (f64, f64)) -> f64 {
        haversine_km(from, to) * self.config.road_factor
    }

    fn analytic_matrix(
        &self,
        origins: &[(f64, f64)],
        destinations: &[(f64, f64)],
    ) -> Vec<Vec<f64>> {
        origins
            .iter()
            .map(|origin| {
                destinations
                    .iter()
                    .map(|dest| self.fallback_km(*origin, *dest))
                    .collect()
            })
            .collect()
    }
}
