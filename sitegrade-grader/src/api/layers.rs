//! Layer catalog endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::registry::{LayerCategory, ValueKind};
use crate::scale::ScaleName;
use crate::types::SamplingMethod;
use crate::AppState;

/// One catalog entry
#[derive(Debug, Serialize)]
pub struct LayerInfo {
    pub id: String,
    pub display_name: String,
    pub category: LayerCategory,
    pub unit: String,
    pub value_kind: ValueKind,
    pub methods: Vec<SamplingMethod>,
    pub base_scale: ScaleName,
    pub priority: i32,
    pub critical: bool,
}

/// GET /layers
///
/// The loaded catalog in execution order.
pub async fn list_layers(State(state): State<AppState>) -> Json<Vec<LayerInfo>> {
    let layers = state
        .orchestrator
        .table()
        .list_by_priority()
        .into_iter()
        .map(|(layer, policy)| LayerInfo {
            id: layer.id.clone(),
            display_name: layer.display_name.clone(),
            category: layer.category,
            unit: layer.unit.clone(),
            value_kind: layer.value_kind,
            methods: policy.methods.iter().copied().collect(),
            base_scale: policy.base_scale,
            priority: policy.priority,
            critical: policy.critical,
        })
        .collect();

    Json(layers)
}

/// Build catalog routes
pub fn layer_routes() -> Router<AppState> {
    Router::new().route("/layers", get(list_layers))
}
