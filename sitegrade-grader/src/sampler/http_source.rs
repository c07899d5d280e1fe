//! HTTP raster service client
//!
//! `GET {base_url}/layers/{layer_id}/point?lat=..&lon=..` returning
//! `{"value": <number | string | null>}`. A 404 or a `null` value means
//! no data at that location. Requests are throttled by a `governor` limiter
//! that the sampler waits on through `RasterSource::ready`.

use super::retry::upstream;
use super::RasterSource;
use crate::registry::LayerDescriptor;
use crate::types::{Coordinate, GradingError, GradingResult, RasterValue};
use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

/// Header carrying the optional API key
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// `[raster]` configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterServiceConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
    pub rate_limit_per_second: u32,
}

impl Default for RasterServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8088".to_string(),
            api_key: None,
            request_timeout_ms: 10_000,
            rate_limit_per_second: 50,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PointResponse {
    value: Option<RasterValue>,
}

pub struct HttpRasterSource {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl HttpRasterSource {
    /// Build a client from configuration
    ///
    /// # Errors
    /// `InvalidConfiguration` for an empty base URL, a zero rate limit, or an
    /// HTTP client that cannot be constructed.
    pub fn new(config: &RasterServiceConfig) -> GradingResult<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(GradingError::InvalidConfiguration(
                "raster base_url must not be empty".to_string(),
            ));
        }

        let per_second = NonZeroU32::new(config.rate_limit_per_second).ok_or_else(|| {
            GradingError::InvalidConfiguration("raster rate_limit_per_second must be > 0".to_string())
        })?;
        let rate_limiter = RateLimiter::direct(Quota::per_second(per_second));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| GradingError::InvalidConfiguration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            client,
            rate_limiter,
        })
    }

    /// Check if an API key is configured
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn point_url(&self, layer_id: &str) -> String {
        format!("{}/layers/{}/point", self.base_url, layer_id)
    }
}

#[async_trait]
impl RasterSource for HttpRasterSource {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn ready(&self) {
        self.rate_limiter.until_ready().await;
    }

    /// One request; callers go through [`RasterSource::ready`] first
    async fn read_point(
        &self,
        layer: &LayerDescriptor,
        coordinate: Coordinate,
    ) -> GradingResult<Option<RasterValue>> {
        let mut request = self.client.get(self.point_url(&layer.id)).query(&[
            ("lat", coordinate.latitude.to_string()),
            ("lon", coordinate.longitude.to_string()),
        ]);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| upstream(format!("raster request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(layer_id = %layer.id, %coordinate, "Raster service returned 404");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(upstream(format!("raster service returned {}", status)));
        }

        let body: PointResponse = response
            .json()
            .await
            .map_err(|e| upstream(format!("invalid raster response: {}", e)))?;

        Ok(body.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_rate_limit() {
        let config = RasterServiceConfig {
            rate_limit_per_second: 0,
            ..Default::default()
        };
        assert!(matches!(
            HttpRasterSource::new(&config),
            Err(GradingError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_point_url_trims_trailing_slash() {
        let config = RasterServiceConfig {
            base_url: "http://raster.local/api/".to_string(),
            api_key: Some(String::new()),
            ..Default::default()
        };
        let source = HttpRasterSource::new(&config).unwrap();
        assert_eq!(source.point_url("noise_road_lden"), "http://raster.local/api/layers/noise_road_lden/point");
        assert!(!source.has_api_key());
    }

    #[test]
    fn test_null_value_parses_as_none() {
        let body: PointResponse = serde_json::from_str(r#"{"value": null}"#).unwrap();
        assert!(body.value.is_none());
        let body: PointResponse = serde_json::from_str(r#"{"value": "category-B"}"#).unwrap();
        assert_eq!(body.value, Some(RasterValue::from("category-B")));
    }
}
