//! Grading batch and result aggregation
//!
//! The [`BatchAggregator`] is the only writer of a run's results. The
//! orchestrator feeds it one [`TaskOutcome`] per resolved task; it places
//! samples into the declared slots, keeps per-layer error lists in task
//! order, and tracks completion for progress and critical gating.
//!
//! # Scale precedence
//! When a method runs at several scales, the widest radius is canonical and
//! fills the slot. Narrower samples are kept as `previews` unless
//! [`ScaleReconciliation::DiscardPreviews`] is configured.

use crate::orchestrator::GradingTask;
use crate::registry::PolicyTable;
use crate::scale::ScaleName;
use crate::types::{GradingError, RasterValue, SamplingMethod};
use serde::{Deserialize, Serialize};
use sitegrade_common::events::{GradingStatus, ProgressUpdate};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Text shown for a layer without any usable sample
pub const NOT_ANALYZED: &str = "not analyzed";

/// One resolved value
///
/// `sample_count` and `radius_meters` are present only for area samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: RasterValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius_meters: Option<f64>,
}

impl Sample {
    pub fn point(value: RasterValue) -> Self {
        Self {
            value,
            sample_count: None,
            radius_meters: None,
        }
    }

    pub fn area(value: f64, sample_count: usize, radius_meters: f64) -> Self {
        Self {
            value: RasterValue::Numeric(value),
            sample_count: Some(sample_count),
            radius_meters: Some(radius_meters),
        }
    }
}

/// Non-canonical sample of a multi-scale method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaledSample {
    pub method: SamplingMethod,
    pub scale: ScaleName,
    pub sample: Sample,
}

/// How non-canonical scale samples are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleReconciliation {
    /// Keep narrower samples under `previews`
    #[default]
    RetainPreviews,
    /// Only the canonical sample survives
    DiscardPreviews,
}

/// Per-layer result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerGradingResult {
    pub layer_id: String,
    pub layer_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_sample: Option<Sample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_area_sample: Option<Sample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_area_sample: Option<Sample>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previews: Vec<ScaledSample>,
    /// Methods that resolved with no data at this location
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub no_data: Vec<SamplingMethod>,
}

impl LayerGradingResult {
    pub fn new(layer_id: impl Into<String>, layer_name: impl Into<String>) -> Self {
        Self {
            layer_id: layer_id.into(),
            layer_name: layer_name.into(),
            point_sample: None,
            average_area_sample: None,
            max_area_sample: None,
            errors: Vec::new(),
            previews: Vec::new(),
            no_data: Vec::new(),
        }
    }

    /// Canonical sample for a method
    pub fn slot(&self, method: SamplingMethod) -> Option<&Sample> {
        match method {
            SamplingMethod::Point => self.point_sample.as_ref(),
            SamplingMethod::Average => self.average_area_sample.as_ref(),
            SamplingMethod::Max => self.max_area_sample.as_ref(),
        }
    }

    fn slot_mut(&mut self, method: SamplingMethod) -> &mut Option<Sample> {
        match method {
            SamplingMethod::Point => &mut self.point_sample,
            SamplingMethod::Average => &mut self.average_area_sample,
            SamplingMethod::Max => &mut self.max_area_sample,
        }
    }

    /// True if any slot holds a sample
    pub fn has_sample(&self) -> bool {
        self.point_sample.is_some() || self.average_area_sample.is_some() || self.max_area_sample.is_some()
    }
}

/// Display sample with fixed precedence: max area, average area, point
pub fn display_sample(result: &LayerGradingResult) -> Option<&Sample> {
    result
        .max_area_sample
        .as_ref()
        .or(result.average_area_sample.as_ref())
        .or(result.point_sample.as_ref())
}

/// Human readable display value, or [`NOT_ANALYZED`]
pub fn format_display_value(result: &LayerGradingResult, unit: &str) -> String {
    let Some(sample) = display_sample(result) else {
        return NOT_ANALYZED.to_string();
    };

    match &sample.value {
        RasterValue::Numeric(v) => {
            let number = format_number(*v);
            if unit.is_empty() {
                number
            } else {
                format!("{} {}", number, unit)
            }
        }
        RasterValue::Categorical(code) => code.clone(),
    }
}

/// At most two decimals, trailing zeros dropped
fn format_number(value: f64) -> String {
    let text = format!("{:.2}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

/// Results of one grading run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingBatch {
    pub layers: BTreeMap<String, LayerGradingResult>,
    pub layers_requested: usize,
    pub layers_completed: usize,
    pub tasks_total: usize,
    pub tasks_resolved: usize,
    pub status: GradingStatus,
    /// Critical layer ids
    #[serde(default)]
    pub critical_layers: Vec<String>,
}

impl GradingBatch {
    /// Every scheduled task produced a sample, no data, or an error
    pub fn is_done(&self) -> bool {
        self.tasks_resolved == self.tasks_total
    }

    /// Critical layers ending with errors and no sample
    pub fn critical_gaps(&self) -> Vec<String> {
        self.critical_layers
            .iter()
            .filter(|id| {
                self.layers
                    .get(*id)
                    .map(|l| !l.has_sample() && !l.errors.is_empty())
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Every critical layer has at least one resolved task
    ///
    /// On a frozen batch this means every critical layer has a sample, a
    /// no-data mark or an error.
    pub fn critical_layers_resolved(&self) -> bool {
        self.critical_layers.iter().all(|id| {
            self.layers
                .get(id)
                .map(|l| l.has_sample() || !l.no_data.is_empty() || !l.errors.is_empty())
                .unwrap_or(false)
        })
    }

    /// Total recorded errors across layers
    pub fn error_count(&self) -> usize {
        self.layers.values().map(|l| l.errors.len()).sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Outcome of one task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Sample(Sample),
    /// Valid query, no data at the location
    NoData,
    Failed(GradingError),
}

/// Per-layer bookkeeping
#[derive(Debug)]
struct LayerState {
    declared: BTreeSet<SamplingMethod>,
    critical: bool,
    tasks_total: usize,
    tasks_resolved: usize,
    /// Task index → message, so errors read in task order
    errors: BTreeMap<usize, String>,
    /// Scale of the sample held in each area slot
    slot_scales: BTreeMap<SamplingMethod, ScaleName>,
}

/// Single writer for a run's [`GradingBatch`]
#[derive(Debug)]
pub struct BatchAggregator {
    tasks: Vec<GradingTask>,
    resolved: Vec<bool>,
    layers: BTreeMap<String, LayerGradingResult>,
    states: BTreeMap<String, LayerState>,
    critical_layers: Vec<String>,
    reconciliation: ScaleReconciliation,
    tasks_resolved: usize,
    cancelled: bool,
}

impl BatchAggregator {
    /// Empty results for every layer that has at least one task
    pub fn new(tasks: Vec<GradingTask>, table: &PolicyTable, reconciliation: ScaleReconciliation) -> Self {
        let mut layers = BTreeMap::new();
        let mut states: BTreeMap<String, LayerState> = BTreeMap::new();
        let mut critical_layers = Vec::new();

        for task in &tasks {
            if let Some(state) = states.get_mut(&task.layer_id) {
                state.tasks_total += 1;
                continue;
            }

            let declared = table
                .get_policy(&task.layer_id)
                .map(|p| p.methods.clone())
                .unwrap_or_default();
            if task.critical {
                critical_layers.push(task.layer_id.clone());
            }
            layers.insert(
                task.layer_id.clone(),
                LayerGradingResult::new(&task.layer_id, &task.layer_name),
            );
            states.insert(
                task.layer_id.clone(),
                LayerState {
                    declared,
                    critical: task.critical,
                    tasks_total: 1,
                    tasks_resolved: 0,
                    errors: BTreeMap::new(),
                    slot_scales: BTreeMap::new(),
                },
            );
        }

        Self {
            resolved: vec![false; tasks.len()],
            tasks,
            layers,
            states,
            critical_layers,
            reconciliation,
            tasks_resolved: 0,
            cancelled: false,
        }
    }

    pub fn tasks(&self) -> &[GradingTask] {
        &self.tasks
    }

    pub fn layers_total(&self) -> usize {
        self.states.len()
    }

    pub fn layers_completed(&self) -> usize {
        self.states
            .values()
            .filter(|s| s.tasks_resolved == s.tasks_total)
            .count()
    }

    pub fn tasks_resolved(&self) -> usize {
        self.tasks_resolved
    }

    pub fn is_done(&self) -> bool {
        self.tasks_resolved == self.tasks.len()
    }

    /// Every critical layer has at least one resolved task
    pub fn critical_layers_resolved(&self) -> bool {
        self.states
            .values()
            .filter(|s| s.critical)
            .all(|s| s.tasks_resolved > 0)
    }

    /// Critical layers that so far have errors and no sample
    pub fn critical_gaps(&self) -> Vec<String> {
        self.critical_layers
            .iter()
            .filter(|id| {
                self.layers
                    .get(*id)
                    .map(|l| !l.has_sample() && !l.errors.is_empty())
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Merge one task outcome; returns false if the task was already resolved
    pub fn merge(&mut self, task_index: usize, outcome: TaskOutcome) -> bool {
        let Some(task) = self.tasks.get(task_index) else {
            warn!(task_index, "Outcome for unknown task ignored");
            return false;
        };
        if self.resolved[task_index] {
            warn!(task_index, layer_id = %task.layer_id, "Duplicate outcome ignored");
            return false;
        }

        let (Some(layer), Some(state)) = (
            self.layers.get_mut(&task.layer_id),
            self.states.get_mut(&task.layer_id),
        ) else {
            return false;
        };

        self.resolved[task_index] = true;
        self.tasks_resolved += 1;
        state.tasks_resolved += 1;

        match outcome {
            TaskOutcome::Sample(sample) => {
                if !state.declared.contains(&task.method) {
                    warn!(
                        layer_id = %task.layer_id,
                        method = %task.method,
                        "Rejected sample for undeclared method"
                    );
                    state.errors.insert(
                        task_index,
                        format!("{}: sample rejected, method not declared for this layer", task),
                    );
                } else {
                    place_sample(layer, &mut state.slot_scales, task, sample, self.reconciliation);
                }
            }
            TaskOutcome::NoData => {
                if !layer.no_data.contains(&task.method) {
                    layer.no_data.push(task.method);
                    layer.no_data.sort();
                }
            }
            TaskOutcome::Failed(error) => {
                state.errors.insert(task_index, format!("{}: {}", task, error));
            }
        }

        layer.errors = state.errors.values().cloned().collect();
        true
    }

    /// Progress snapshot after resolving a task of `current_layer_id`
    pub fn progress(&self, current_layer_id: &str) -> ProgressUpdate {
        ProgressUpdate {
            layers_completed: self.layers_completed(),
            layers_total: self.layers_total(),
            tasks_completed: self.tasks_resolved,
            tasks_total: self.tasks.len(),
            current_layer_title: self
                .layers
                .get(current_layer_id)
                .map(|l| l.layer_name.clone())
                .unwrap_or_default(),
            critical_layers_resolved: self.critical_layers_resolved(),
        }
    }

    /// Record a `cancelled` error on every unresolved task
    ///
    /// Returns the number of tasks marked.
    pub fn record_cancelled(&mut self) -> usize {
        self.cancelled = true;
        let pending: Vec<usize> = (0..self.tasks.len()).filter(|&i| !self.resolved[i]).collect();
        for &index in &pending {
            self.merge(index, TaskOutcome::Failed(GradingError::Cancelled));
        }
        pending.len()
    }

    /// Current results without consuming the aggregator
    pub fn snapshot(&self) -> GradingBatch {
        GradingBatch {
            layers: self.layers.clone(),
            layers_requested: self.layers_total(),
            layers_completed: self.layers_completed(),
            tasks_total: self.tasks.len(),
            tasks_resolved: self.tasks_resolved,
            status: self.status(),
            critical_layers: self.critical_layers.clone(),
        }
    }

    /// Final batch with previews in a stable order
    pub fn freeze(mut self) -> GradingBatch {
        for layer in self.layers.values_mut() {
            layer
                .previews
                .sort_by(|a, b| (a.method, a.scale).cmp(&(b.method, b.scale)));
        }
        self.snapshot()
    }

    fn status(&self) -> GradingStatus {
        if self.cancelled {
            GradingStatus::Cancelled
        } else if self.is_done() {
            GradingStatus::Completed
        } else {
            GradingStatus::Running
        }
    }
}

/// Put an area or point sample into its slot
///
/// The widest radius wins; equal radii go to the larger scale name so the
/// result never depends on completion order.
fn place_sample(
    layer: &mut LayerGradingResult,
    slot_scales: &mut BTreeMap<SamplingMethod, ScaleName>,
    task: &GradingTask,
    sample: Sample,
    reconciliation: ScaleReconciliation,
) {
    let Some(scale) = task.scale else {
        *layer.slot_mut(task.method) = Some(sample);
        return;
    };

    let radius = |s: &Sample| s.radius_meters.unwrap_or(0.0);
    let keeps_slot = match (layer.slot(task.method), slot_scales.get(&task.method)) {
        (Some(current), Some(&current_scale)) => {
            let (held, incoming) = (radius(current), radius(&sample));
            held > incoming || (held == incoming && current_scale >= scale.name)
        }
        (Some(current), None) => radius(current) >= radius(&sample),
        (None, _) => false,
    };

    let displaced = if keeps_slot {
        Some(ScaledSample {
            method: task.method,
            scale: scale.name,
            sample,
        })
    } else {
        let previous = layer.slot_mut(task.method).replace(sample);
        let previous_scale = slot_scales.insert(task.method, scale.name);
        previous.zip(previous_scale).map(|(sample, scale)| ScaledSample {
            method: task.method,
            scale,
            sample,
        })
    };

    if let Some(preview) = displaced {
        if reconciliation == ScaleReconciliation::RetainPreviews {
            layer.previews.push(preview);
        }
    }
}
