//! Test Helper Utilities
//!
//! Shared fixtures for sitegrade-grader integration tests

pub mod scripted_source;

pub use scripted_source::{Behavior, ScriptedSource};

use sitegrade_common::events::EventBus;
use sitegrade_grader::batch::ScaleReconciliation;
use sitegrade_grader::orchestrator::{Orchestrator, OrchestratorConfig};
use sitegrade_grader::registry::PolicyTable;
use sitegrade_grader::sampler::{RasterSampler, RetryPolicy, SamplerConfig};
use sitegrade_grader::scale::{ScaleCatalog, ScaleResolver};
use sitegrade_grader::types::Coordinate;
use std::sync::Arc;
use std::time::Duration;

/// Critical max layer (quick only), non-critical average layer (default),
/// critical categorical point layer
pub const END_TO_END_CATALOG: &str = r#"
    [[layer]]
    id = "l1_noise"
    display_name = "Road traffic noise"
    category = "noise"
    unit = "dB(A)"
    value_kind = "numeric"
    methods = ["max"]
    base_scale = "default"
    overrides = [{ method = "max", scale = "quick" }]
    priority = 10
    critical = true

    [[layer]]
    id = "l2_vegetation"
    display_name = "Vegetation volume"
    category = "nature"
    unit = "m³/m²"
    value_kind = "numeric"
    methods = ["average"]
    base_scale = "default"
    priority = 20

    [[layer]]
    id = "l3_monument"
    display_name = "Listed monument"
    category = "historical"
    value_kind = "categorical"
    methods = ["point"]
    priority = 30
    critical = true
"#;

/// Same as the end-to-end catalog, with L1 at both quick and default scale
pub const DUAL_SCALE_CATALOG: &str = r#"
    [[layer]]
    id = "l1_noise"
    display_name = "Road traffic noise"
    category = "noise"
    unit = "dB(A)"
    value_kind = "numeric"
    methods = ["max"]
    overrides = [{ method = "max", scale = "quick" }, { method = "max", scale = "default" }]
    priority = 10
    critical = true
"#;

pub fn munich() -> Coordinate {
    Coordinate::new(48.137154, 11.576124).unwrap()
}

pub fn table(catalog: &str) -> Arc<PolicyTable> {
    Arc::new(PolicyTable::from_toml_str(catalog).unwrap())
}

/// Source scripted for the end-to-end scenario
pub fn end_to_end_source() -> ScriptedSource {
    ScriptedSource::new()
        .with("l1_noise", Behavior::Value(62.0.into()))
        .with("l2_vegetation", Behavior::Value(8.0.into()))
        .with("l3_monument", Behavior::Value("category-B".into()))
}

/// Sampler settings that keep tests fast
pub fn fast_sampler_config(cell_timeout: Duration) -> SamplerConfig {
    SamplerConfig {
        cell_timeout,
        cell_concurrency: 32,
        retry: RetryPolicy {
            max_retries: 2,
            initial_backoff_ms: 0,
            backoff_multiplier: 3,
        },
    }
}

pub fn orchestrator(
    table: Arc<PolicyTable>,
    source: Arc<ScriptedSource>,
    reconciliation: ScaleReconciliation,
    event_bus: Option<EventBus>,
) -> Orchestrator {
    orchestrator_with_timeout(table, source, reconciliation, event_bus, Duration::from_millis(500))
}

pub fn orchestrator_with_timeout(
    table: Arc<PolicyTable>,
    source: Arc<ScriptedSource>,
    reconciliation: ScaleReconciliation,
    event_bus: Option<EventBus>,
    cell_timeout: Duration,
) -> Orchestrator {
    let resolver = ScaleResolver::new(table.clone(), ScaleCatalog::default());
    let sampler = RasterSampler::new(source, fast_sampler_config(cell_timeout));
    let config = OrchestratorConfig {
        concurrency: 4,
        reconciliation,
        ..Default::default()
    };
    let orchestrator = Orchestrator::new(table, resolver, sampler, config);
    match event_bus {
        Some(bus) => orchestrator.with_event_bus(bus),
        None => orchestrator,
    }
}
