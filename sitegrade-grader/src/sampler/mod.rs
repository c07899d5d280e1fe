//! Raster Sampler
//!
//! Performs single point reads and grid-based area reads against an opaque
//! remote raster source.
//!
//! # Area sampling
//! - Grid cells come from [`grid::grid_cells`] and never exceed `max_samples`
//! - Cells are read with bounded concurrency, each under its own timeout
//! - `NotFound` and timed-out cells are excluded, never counted as zero
//! - Zero surviving cells yields `InsufficientData` (or `Upstream` when every
//!   cell failed outright)
//!
//! Cell results are collected in grid order, so a deterministic source gives
//! bit-identical aggregates.

pub mod grid;
pub mod http_source;
pub mod retry;

pub use http_source::{HttpRasterSource, RasterServiceConfig};
pub use retry::RetryPolicy;

use crate::batch::Sample;
use crate::registry::{LayerDescriptor, ValueKind};
use crate::scale::ScaleProfile;
use crate::types::{AreaAggregator, Coordinate, GradingError, GradingResult, RasterValue};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Remote raster data source
///
/// One call reads one layer at one coordinate. `Ok(None)` means the query
/// was valid but there is no data there; transport problems are `Upstream`.
/// Sources may also report no data as `Err(NotFound)`; both are treated the
/// same way.
#[async_trait]
pub trait RasterSource: Send + Sync {
    /// Source name for logging
    fn name(&self) -> &'static str;

    /// Wait until the source will accept another request
    ///
    /// The sampler awaits this before starting the read timeout, so local
    /// throttling never counts against a cell.
    async fn ready(&self) {}

    /// Read the raw value (or class code) at `coordinate`
    async fn read_point(
        &self,
        layer: &LayerDescriptor,
        coordinate: Coordinate,
    ) -> GradingResult<Option<RasterValue>>;
}

/// Sampler tuning
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    /// Timeout for a single read
    pub cell_timeout: Duration,
    /// Concurrent cell reads within one area sample
    pub cell_concurrency: usize,
    /// Retry policy for point reads
    pub retry: RetryPolicy,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            cell_timeout: Duration::from_millis(3000),
            cell_concurrency: 16,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of one grid cell read
#[derive(Debug, Clone, PartialEq)]
enum CellOutcome {
    Value(f64),
    /// Class code on a mixed layer
    NonNumeric,
    NoData,
    TimedOut,
    Failed(String),
}

/// Point and area sampling over a [`RasterSource`]
#[derive(Clone)]
pub struct RasterSampler {
    source: Arc<dyn RasterSource>,
    config: SamplerConfig,
}

impl RasterSampler {
    pub fn new(source: Arc<dyn RasterSource>, config: SamplerConfig) -> Self {
        Self { source, config }
    }

    /// Single value at the exact coordinate
    ///
    /// `Ok(None)` when the layer has no data at the coordinate. Upstream
    /// failures (including timeouts) are retried per the retry policy.
    pub async fn sample_point(
        &self,
        layer: &LayerDescriptor,
        coordinate: Coordinate,
    ) -> GradingResult<Option<RasterValue>> {
        let result = retry::retry_upstream("point read", &layer.id, &self.config.retry, || {
            self.read_with_timeout(layer, coordinate)
        })
        .await;

        match result {
            Err(GradingError::NotFound(reason)) => {
                trace!(layer_id = %layer.id, %reason, "No data at point");
                Ok(None)
            }
            other => other,
        }
    }

    /// Aggregate of a grid of reads inside `scale.radius_meters`
    ///
    /// # Errors
    /// - `InvalidConfiguration` for categorical layers
    /// - `InsufficientData` when no cell survives
    /// - `Upstream` when every cell failed with a transport error
    pub async fn sample_area(
        &self,
        layer: &LayerDescriptor,
        coordinate: Coordinate,
        scale: &ScaleProfile,
        aggregator: AreaAggregator,
    ) -> GradingResult<Sample> {
        if layer.value_kind == ValueKind::Categorical {
            return Err(GradingError::InvalidConfiguration(format!(
                "area sampling requested on categorical layer '{}'",
                layer.id
            )));
        }

        let cells = grid::grid_cells(coordinate, scale);
        let cell_count = cells.len();

        debug!(
            layer_id = %layer.id,
            scale = %scale.name,
            radius_m = scale.radius_meters,
            spacing_m = scale.effective_spacing(),
            cells = cell_count,
            "Sampling area"
        );

        let outcomes: Vec<CellOutcome> = stream::iter(cells)
            .map(|cell| self.read_cell(layer, cell))
            .buffered(self.config.cell_concurrency.max(1))
            .collect()
            .await;

        let values: Vec<f64> = outcomes
            .iter()
            .filter_map(|o| match o {
                CellOutcome::Value(v) => Some(*v),
                _ => None,
            })
            .collect();

        match aggregator.reduce(&values) {
            Some(value) => {
                let failed = outcomes.iter().filter(|o| matches!(o, CellOutcome::Failed(_))).count();
                let timed_out = outcomes.iter().filter(|o| matches!(o, CellOutcome::TimedOut)).count();
                if failed + timed_out > 0 {
                    debug!(
                        layer_id = %layer.id,
                        failed,
                        timed_out,
                        surviving = values.len(),
                        cells = cell_count,
                        "Grid cells dropped from area sample"
                    );
                }
                trace!(
                    layer_id = %layer.id,
                    surviving = values.len(),
                    cells = cell_count,
                    "Area sample aggregated"
                );
                Ok(Sample::area(value, values.len(), scale.radius_meters))
            }
            None => {
                let failures: Vec<&String> = outcomes
                    .iter()
                    .filter_map(|o| match o {
                        CellOutcome::Failed(msg) => Some(msg),
                        _ => None,
                    })
                    .collect();

                if cell_count > 0 && failures.len() == cell_count {
                    Err(GradingError::Upstream(format!(
                        "all {} grid cells failed ({})",
                        cell_count, failures[0]
                    )))
                } else {
                    Err(GradingError::InsufficientData {
                        layer_id: layer.id.clone(),
                        radius_meters: scale.radius_meters,
                    })
                }
            }
        }
    }

    async fn read_with_timeout(
        &self,
        layer: &LayerDescriptor,
        coordinate: Coordinate,
    ) -> GradingResult<Option<RasterValue>> {
        self.source.ready().await;
        match tokio::time::timeout(
            self.config.cell_timeout,
            self.source.read_point(layer, coordinate),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GradingError::Upstream(format!(
                "{} read timed out after {} ms",
                self.source.name(),
                self.config.cell_timeout.as_millis()
            ))),
        }
    }

    /// Single attempt; cells are not retried
    async fn read_cell(&self, layer: &LayerDescriptor, cell: Coordinate) -> CellOutcome {
        self.source.ready().await;
        match tokio::time::timeout(self.config.cell_timeout, self.source.read_point(layer, cell)).await {
            Err(_) => CellOutcome::TimedOut,
            Ok(Ok(Some(RasterValue::Numeric(v)))) if v.is_finite() => CellOutcome::Value(v),
            Ok(Ok(Some(_))) => CellOutcome::NonNumeric,
            Ok(Ok(None)) | Ok(Err(GradingError::NotFound(_))) => CellOutcome::NoData,
            Ok(Err(e)) => CellOutcome::Failed(e.to_string()),
        }
    }
}
