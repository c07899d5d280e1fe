//! Advisory time budget for a grading run
//!
//! Sums a fixed nominal cost per task before execution. The estimate is
//! reported to the caller and logged; it never aborts a run.

use super::GradingTask;
use crate::scale::ScaleName;
use serde::{Deserialize, Serialize};

/// Recommended per-task timeout as a multiple of the largest nominal cost
pub const TIMEOUT_CEILING_FACTOR: u64 = 3;

/// Nominal cost per task kind, milliseconds (`[grading.costs]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NominalCosts {
    pub point_ms: u64,
    pub quick_ms: u64,
    pub default_ms: u64,
    pub detailed_ms: u64,
}

impl Default for NominalCosts {
    fn default() -> Self {
        Self {
            point_ms: 200,
            quick_ms: 1_500,
            default_ms: 4_000,
            detailed_ms: 12_000,
        }
    }
}

impl NominalCosts {
    pub fn cost_of(&self, task: &GradingTask) -> u64 {
        match task.scale_name() {
            None => self.point_ms,
            Some(ScaleName::Quick) => self.quick_ms,
            Some(ScaleName::Default) => self.default_ms,
            Some(ScaleName::Detailed) => self.detailed_ms,
        }
    }
}

/// Pre-execution estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeBudget {
    /// Sum of nominal task costs
    pub total_ms: u64,
    /// Expected wall-clock time under the concurrency limit
    pub eta_ms: u64,
    /// Recommended per-task timeout
    pub task_timeout_ceiling_ms: u64,
}

impl TimeBudget {
    /// Estimate for `tasks` run `concurrency` at a time
    ///
    /// The ETA is the larger of the evenly spread total and the single most
    /// expensive task.
    pub fn estimate(tasks: &[GradingTask], concurrency: usize, costs: &NominalCosts) -> Self {
        let mut total_ms = 0u64;
        let mut largest_ms = 0u64;
        for task in tasks {
            let cost = costs.cost_of(task);
            total_ms = total_ms.saturating_add(cost);
            largest_ms = largest_ms.max(cost);
        }

        let spread = total_ms.div_ceil(concurrency.max(1) as u64);

        Self {
            total_ms,
            eta_ms: spread.max(largest_ms),
            task_timeout_ceiling_ms: largest_ms.saturating_mul(TIMEOUT_CEILING_FACTOR),
        }
    }
}
