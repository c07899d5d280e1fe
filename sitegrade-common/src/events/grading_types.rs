//! Supporting types carried by grading events

use serde::{Deserialize, Serialize};

/// Progress snapshot emitted after every task resolution
///
/// `layers_completed` counts layers whose every scheduled task has resolved
/// (sample, no data, or recorded error).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Layers with all tasks resolved
    pub layers_completed: usize,
    /// Layers scheduled in this run
    pub layers_total: usize,
    /// Tasks resolved so far
    pub tasks_completed: usize,
    /// Tasks scheduled in this run
    pub tasks_total: usize,
    /// Display name of the layer whose task just resolved
    pub current_layer_title: String,
    /// Every critical layer has at least one resolved task
    #[serde(default)]
    pub critical_layers_resolved: bool,
}

impl ProgressUpdate {
    /// Fraction of tasks resolved (0.0-1.0)
    pub fn fraction(&self) -> f64 {
        if self.tasks_total == 0 {
            1.0
        } else {
            self.tasks_completed as f64 / self.tasks_total as f64
        }
    }
}

/// Lifecycle state of a grading run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingStatus {
    /// Tasks still executing
    Running,
    /// Every task resolved
    Completed,
    /// Cancelled by the caller; merged results are kept
    Cancelled,
}

impl GradingStatus {
    /// True once no further results will be merged
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GradingStatus::Running)
    }
}
