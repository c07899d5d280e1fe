//! sitegrade-grader library interface
//!
//! Environmental layer grading engine: layer registry, scale resolution,
//! raster sampling and the grading orchestrator, plus the HTTP service
//! built on top of them.

pub mod api;
pub mod batch;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod sampler;
pub mod scale;
pub mod types;

pub use crate::error::{ApiError, ApiResult};

use crate::batch::GradingBatch;
use crate::orchestrator::Orchestrator;
use crate::scale::ScaleName;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sitegrade_common::events::{EventBus, GradingStatus, ProgressUpdate};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// State of one grading run as seen by the API
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub scale_ceiling: ScaleName,
    pub status: GradingStatus,
    pub layers_total: usize,
    pub tasks_total: usize,
    pub eta_ms: u64,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Latest progress update
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressUpdate>,
    /// Final batch once the run has finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<GradingBatch>,
    #[serde(skip)]
    pub cancel: CancellationToken,
}

/// Finished runs kept for status queries
pub const DEFAULT_RETAINED_RUNS: usize = 100;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Runs started since startup
    pub runs: Arc<RwLock<HashMap<Uuid, RunRecord>>>,
    /// Ceiling for requests that do not choose one
    pub default_ceiling: ScaleName,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
    /// Finished runs kept before the oldest are evicted
    pub retained_runs: usize,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, event_bus: EventBus, default_ceiling: ScaleName) -> Self {
        Self {
            orchestrator,
            event_bus,
            runs: Arc::new(RwLock::new(HashMap::new())),
            default_ceiling,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
            retained_runs: DEFAULT_RETAINED_RUNS,
        }
    }

    /// Keep at most `retained_runs` finished runs (minimum 1)
    pub fn with_retained_runs(mut self, retained_runs: usize) -> Self {
        self.retained_runs = retained_runs.max(1);
        self
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::grading_routes())
        .merge(api::layer_routes())
        .merge(api::health_routes())
        .route("/grading/events", get(api::grading_event_stream))
        .with_state(state)
}
