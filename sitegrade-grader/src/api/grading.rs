//! Grading run API handlers
//!
//! POST /grading/start, GET /grading/status/:run_id, POST /grading/cancel/:run_id

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitegrade_common::events::GradingStatus;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::orchestrator::GradingRun;
use crate::scale::ScaleName;
use crate::types::Coordinate;
use crate::{AppState, RunRecord};

/// POST /grading/start request
#[derive(Debug, Deserialize)]
pub struct StartGradingRequest {
    pub latitude: f64,
    pub longitude: f64,
    /// Defaults to the configured ceiling
    #[serde(default)]
    pub scale_ceiling: Option<ScaleName>,
}

/// POST /grading/start response
#[derive(Debug, Serialize, Deserialize)]
pub struct StartGradingResponse {
    pub run_id: Uuid,
    pub layers_total: usize,
    pub tasks_total: usize,
    pub eta_ms: u64,
    pub started_at: DateTime<Utc>,
}

/// GET /grading/status response
#[derive(Debug, Serialize)]
pub struct GradingStatusResponse {
    #[serde(flatten)]
    pub run: RunRecord,
    /// Every critical layer has at least one resolved task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critical_layers_resolved: Option<bool>,
    /// Critical layers that ended with errors only
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub critical_gaps: Vec<String>,
}

/// POST /grading/cancel response
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelGradingResponse {
    pub run_id: Uuid,
    pub cancel_requested_at: DateTime<Utc>,
}

/// POST /grading/start
///
/// Validate the coordinate, spawn a run and return its id immediately.
pub async fn start_grading(
    State(state): State<AppState>,
    Json(request): Json<StartGradingRequest>,
) -> ApiResult<Json<StartGradingResponse>> {
    let coordinate = Coordinate::new(request.latitude, request.longitude)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let ceiling = request.scale_ceiling.unwrap_or(state.default_ceiling);

    let run = state.orchestrator.spawn(coordinate, ceiling)?;
    let started_at = Utc::now();

    let response = StartGradingResponse {
        run_id: run.run_id,
        layers_total: run.layers_total,
        tasks_total: run.tasks_total,
        eta_ms: run.budget.eta_ms,
        started_at,
    };

    let record = RunRecord {
        run_id: run.run_id,
        latitude: coordinate.latitude,
        longitude: coordinate.longitude,
        scale_ceiling: ceiling,
        status: GradingStatus::Running,
        layers_total: run.layers_total,
        tasks_total: run.tasks_total,
        eta_ms: run.budget.eta_ms,
        started_at,
        finished_at: None,
        progress: None,
        batch: None,
        cancel: run.cancel.clone(),
    };
    state.runs.write().await.insert(run.run_id, record);

    tracing::info!(
        run_id = %run.run_id,
        %coordinate,
        ceiling = %ceiling,
        "Grading run accepted"
    );

    tokio::spawn(track_run(state.clone(), run));

    Ok(Json(response))
}

/// GET /grading/status/:run_id
pub async fn get_grading_status(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<GradingStatusResponse>> {
    let run = state
        .runs
        .read()
        .await
        .get(&run_id)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("Grading run not found: {}", run_id)))?;

    tracing::debug!(run_id = %run_id, status = ?run.status, "Status query");

    let (critical_layers_resolved, critical_gaps) = match (&run.batch, &run.progress) {
        (Some(batch), _) => (Some(batch.critical_layers_resolved()), batch.critical_gaps()),
        (None, Some(progress)) => (Some(progress.critical_layers_resolved), Vec::new()),
        (None, None) => (None, Vec::new()),
    };

    Ok(Json(GradingStatusResponse {
        run,
        critical_layers_resolved,
        critical_gaps,
    }))
}

/// POST /grading/cancel/:run_id
///
/// Cooperative: results merged so far are kept.
pub async fn cancel_grading(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<CancelGradingResponse>> {
    let runs = state.runs.read().await;
    let run = runs
        .get(&run_id)
        .ok_or_else(|| ApiError::NotFound(format!("Grading run not found: {}", run_id)))?;

    if run.status.is_terminal() {
        return Err(ApiError::BadRequest(format!(
            "Grading run already finished: {:?}",
            run.status
        )));
    }

    run.cancel.cancel();
    tracing::info!(run_id = %run_id, "Grading run cancellation requested");

    Ok(Json(CancelGradingResponse {
        run_id,
        cancel_requested_at: Utc::now(),
    }))
}

/// Mirror a run's progress and final batch into the run table
async fn track_run(state: AppState, mut run: GradingRun) {
    let run_id = run.run_id;

    while let Some(update) = run.progress.recv().await {
        if let Some(record) = state.runs.write().await.get_mut(&run_id) {
            record.progress = Some(update);
        }
    }

    let outcome = run.handle.await;
    if let Err(e) = &outcome {
        tracing::error!(run_id = %run_id, error = %e, "Grading task panicked or was aborted");
        *state.last_error.write().await = Some(format!("grading run {} failed: {}", run_id, e));
    }

    let mut runs = state.runs.write().await;
    if let Some(record) = runs.get_mut(&run_id) {
        record.finished_at = Some(Utc::now());
        match outcome {
            Ok(batch) => {
                record.status = batch.status;
                record.batch = Some(batch);
            }
            Err(_) => record.status = GradingStatus::Cancelled,
        }
    }

    let evicted = evict_finished_runs(&mut runs, state.retained_runs);
    if evicted > 0 {
        tracing::debug!(evicted, retained = state.retained_runs, "Evicted finished grading runs");
    }
}

/// Drop the oldest finished runs beyond `keep`; running ones are never evicted
///
/// Returns the number of records removed.
pub fn evict_finished_runs(runs: &mut HashMap<Uuid, RunRecord>, keep: usize) -> usize {
    let mut finished: Vec<(DateTime<Utc>, Uuid)> = runs
        .values()
        .filter(|r| r.status.is_terminal())
        .map(|r| (r.finished_at.unwrap_or(r.started_at), r.run_id))
        .collect();
    if finished.len() <= keep {
        return 0;
    }

    finished.sort_unstable();
    let excess = finished.len() - keep;
    for (_, run_id) in finished.into_iter().take(excess) {
        runs.remove(&run_id);
    }
    excess
}

/// Build grading routes
pub fn grading_routes() -> Router<AppState> {
    Router::new()
        .route("/grading/start", post(start_grading))
        .route("/grading/status/:run_id", get(get_grading_status))
        .route("/grading/cancel/:run_id", post(cancel_grading))
}
