//! In-memory raster source with per-layer scripted behavior

use async_trait::async_trait;
use sitegrade_grader::registry::LayerDescriptor;
use sitegrade_grader::sampler::RasterSource;
use sitegrade_grader::types::{Coordinate, GradingError, GradingResult, RasterValue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// What a layer answers
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Same value everywhere
    Value(RasterValue),
    /// Valid query, no data anywhere
    NoData,
    /// Every call fails with an upstream error
    Upstream,
    /// Never answers
    Hang,
    /// Answers after a delay
    Delayed(Duration, RasterValue),
}

#[derive(Default)]
pub struct ScriptedSource {
    behaviors: HashMap<String, Behavior>,
    calls: Mutex<HashMap<String, usize>>,
    total_calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, layer_id: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(layer_id.to_string(), behavior);
        self
    }

    /// Reads issued for a layer
    pub fn calls(&self, layer_id: &str) -> usize {
        self.calls.lock().unwrap().get(layer_id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RasterSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn read_point(
        &self,
        layer: &LayerDescriptor,
        _coordinate: Coordinate,
    ) -> GradingResult<Option<RasterValue>> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().unwrap().entry(layer.id.clone()).or_insert(0) += 1;

        match self.behaviors.get(&layer.id).cloned().unwrap_or(Behavior::NoData) {
            Behavior::Value(value) => Ok(Some(value)),
            Behavior::NoData => Ok(None),
            Behavior::Upstream => Err(GradingError::Upstream("503 Service Unavailable".into())),
            Behavior::Hang => std::future::pending().await,
            Behavior::Delayed(delay, value) => {
                tokio::time::sleep(delay).await;
                Ok(Some(value))
            }
        }
    }
}
