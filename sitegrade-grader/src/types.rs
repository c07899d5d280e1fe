//! Core Types for the Grading Engine
//!
//! Shared by the registry, the sampler and the orchestrator:
//! - `Coordinate` - WGS84 point with metre offsets
//! - `RasterValue` - numeric or categorical value read from a layer
//! - `SamplingMethod` - point / average / max
//! - `GradingError` - failure taxonomy for sampling and configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Mean radius of Earth in meters (IUGG)
pub const MEAN_EARTH_RADIUS_M: f64 = 6_371_008.8;

// ============================================================================
// Coordinate
// ============================================================================

/// Geographic coordinate in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Create a validated coordinate
    ///
    /// # Errors
    /// `InvalidConfiguration` if either component is non-finite or out of range.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, GradingError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(GradingError::InvalidConfiguration(format!(
                "latitude out of range: {}",
                latitude
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(GradingError::InvalidConfiguration(format!(
                "longitude out of range: {}",
                longitude
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Point displaced by `east_m` / `north_m` metres on a spherical earth
    ///
    /// Small-offset approximation; adequate for radii of a few kilometres.
    pub fn offset_meters(&self, east_m: f64, north_m: f64) -> Coordinate {
        let lat_rad = self.latitude.to_radians();
        // Avoid division blow-up at the poles
        let cos_lat = lat_rad.cos().abs().max(1e-9);

        let d_lat = (north_m / MEAN_EARTH_RADIUS_M).to_degrees();
        let d_lon = (east_m / (MEAN_EARTH_RADIUS_M * cos_lat)).to_degrees();

        Coordinate {
            latitude: (self.latitude + d_lat).clamp(-90.0, 90.0),
            longitude: wrap_longitude(self.longitude + d_lon),
        }
    }
}

/// Bring a longitude back into [-180, 180] after crossing the antimeridian
fn wrap_longitude(longitude: f64) -> f64 {
    if (-180.0..=180.0).contains(&longitude) {
        longitude
    } else {
        (longitude + 180.0).rem_euclid(360.0) - 180.0
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

// ============================================================================
// Raster values
// ============================================================================

/// Raw value returned by a raster layer
///
/// Serialized untagged: a JSON number or a JSON string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RasterValue {
    Numeric(f64),
    Categorical(String),
}

impl RasterValue {
    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RasterValue::Numeric(v) => Some(*v),
            RasterValue::Categorical(_) => None,
        }
    }
}

impl fmt::Display for RasterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RasterValue::Numeric(v) => write!(f, "{}", v),
            RasterValue::Categorical(code) => write!(f, "{}", code),
        }
    }
}

impl From<f64> for RasterValue {
    fn from(value: f64) -> Self {
        RasterValue::Numeric(value)
    }
}

impl From<&str> for RasterValue {
    fn from(value: &str) -> Self {
        RasterValue::Categorical(value.to_string())
    }
}

// ============================================================================
// Sampling methods
// ============================================================================

/// How a layer is sampled
///
/// Ordering (`Point < Average < Max`) fixes task order within a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMethod {
    /// Single read at the exact coordinate
    Point,
    /// Mean over a grid of reads
    Average,
    /// Maximum over a grid of reads
    Max,
}

impl SamplingMethod {
    /// True for grid-based methods
    pub fn is_area(&self) -> bool {
        !matches!(self, SamplingMethod::Point)
    }

    /// Grid aggregator for area methods
    pub fn aggregator(&self) -> Option<AreaAggregator> {
        match self {
            SamplingMethod::Point => None,
            SamplingMethod::Average => Some(AreaAggregator::Average),
            SamplingMethod::Max => Some(AreaAggregator::Max),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SamplingMethod::Point => "point",
            SamplingMethod::Average => "average",
            SamplingMethod::Max => "max",
        }
    }
}

impl fmt::Display for SamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reduction applied to surviving grid cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaAggregator {
    Average,
    Max,
}

impl AreaAggregator {
    /// Reduce values in the given order
    ///
    /// Returns `None` for an empty slice. Summation follows slice order so
    /// identical inputs give bit-identical results.
    pub fn reduce(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        match self {
            AreaAggregator::Average => Some(values.iter().sum::<f64>() / values.len() as f64),
            AreaAggregator::Max => values.iter().copied().reduce(f64::max),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Grading failure taxonomy
///
/// Per-task failures are recorded on the owning layer and never abort a
/// batch. `InvalidConfiguration` is raised before any task launches.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GradingError {
    /// Valid query, no data at this location
    #[error("no data: {0}")]
    NotFound(String),

    /// Remote failure or timeout
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// No grid cell returned a usable value
    #[error("insufficient data: no grid cell within {radius_meters} m returned a value for layer {layer_id}")]
    InsufficientData { layer_id: String, radius_meters: f64 },

    /// Programmer or catalog error detected at load time
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Run cancelled before this task resolved
    #[error("cancelled")]
    Cancelled,

    /// Layer id not present in the policy table
    #[error("unknown layer: {0}")]
    UnknownLayer(String),
}

impl GradingError {
    /// Only upstream failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, GradingError::Upstream(_))
    }
}

/// Result alias for grading operations
pub type GradingResult<T> = Result<T, GradingError>;
