//! Grading Orchestrator
//!
//! Turns a coordinate into a [`GradingBatch`]:
//! 1. Build the task list from the policy table (priority order)
//! 2. Run tasks through a bounded pool (`buffer_unordered`)
//! 3. Merge every completion in a single aggregator loop
//! 4. Report progress after every resolution
//!
//! Per-task failures are recorded on the owning layer and never stop sibling
//! tasks. Cancellation keeps everything merged so far and marks the rest.

mod budget;
mod tasks;

pub use budget::{NominalCosts, TimeBudget, TIMEOUT_CEILING_FACTOR};
pub use tasks::{build_tasks, GradingTask};

use crate::batch::{BatchAggregator, GradingBatch, Sample, ScaleReconciliation, TaskOutcome};
use crate::registry::PolicyTable;
use crate::sampler::RasterSampler;
use crate::scale::{ScaleName, ScaleResolver};
use crate::types::{Coordinate, GradingError, GradingResult};
use futures::stream::{self, StreamExt};
use sitegrade_common::events::{EventBus, GradingEvent, ProgressUpdate};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upper bound on concurrent tasks
pub const MAX_CONCURRENCY: usize = 32;

/// Orchestrator tuning
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Concurrent tasks, clamped to `1..=MAX_CONCURRENCY`
    pub concurrency: usize,
    pub reconciliation: ScaleReconciliation,
    pub costs: NominalCosts,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: 6,
            reconciliation: ScaleReconciliation::default(),
            costs: NominalCosts::default(),
        }
    }
}

/// Tasks and estimate for one run, computed before anything executes
#[derive(Debug, Clone)]
pub struct GradingPlan {
    pub ceiling: ScaleName,
    pub tasks: Vec<GradingTask>,
    pub layers_total: usize,
    pub budget: TimeBudget,
}

/// Handle to a run started with [`Orchestrator::spawn`]
pub struct GradingRun {
    pub run_id: Uuid,
    pub layers_total: usize,
    pub tasks_total: usize,
    pub budget: TimeBudget,
    /// One update per resolved task
    pub progress: mpsc::UnboundedReceiver<ProgressUpdate>,
    pub cancel: CancellationToken,
    pub handle: JoinHandle<GradingBatch>,
}

pub struct Orchestrator {
    table: Arc<PolicyTable>,
    resolver: ScaleResolver,
    sampler: RasterSampler,
    config: OrchestratorConfig,
    event_bus: Option<EventBus>,
}

impl Orchestrator {
    pub fn new(
        table: Arc<PolicyTable>,
        resolver: ScaleResolver,
        sampler: RasterSampler,
        mut config: OrchestratorConfig,
    ) -> Self {
        config.concurrency = config.concurrency.clamp(1, MAX_CONCURRENCY);
        Self {
            table,
            resolver,
            sampler,
            config,
            event_bus: None,
        }
    }

    /// Publish lifecycle events on `event_bus`
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn table(&self) -> &Arc<PolicyTable> {
        &self.table
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Build tasks and the time estimate without executing anything
    ///
    /// # Errors
    /// `InvalidConfiguration` if the table and scales cannot produce tasks.
    pub fn plan(&self, ceiling: ScaleName) -> GradingResult<GradingPlan> {
        let tasks = build_tasks(&self.table, &self.resolver, ceiling)?;
        let mut layer_ids: Vec<&str> = tasks.iter().map(|t| t.layer_id.as_str()).collect();
        layer_ids.sort_unstable();
        layer_ids.dedup();
        let layers_total = layer_ids.len();
        let budget = TimeBudget::estimate(&tasks, self.config.concurrency, &self.config.costs);

        Ok(GradingPlan {
            ceiling,
            tasks,
            layers_total,
            budget,
        })
    }

    /// Grade one coordinate and wait for the batch
    ///
    /// Progress updates go to `progress` when given. Cancelling `cancel` stops
    /// scheduling, records a `cancelled` error on every unresolved task and
    /// returns the partial batch.
    pub async fn grade_location(
        &self,
        run_id: Uuid,
        coordinate: Coordinate,
        ceiling: ScaleName,
        progress: Option<mpsc::UnboundedSender<ProgressUpdate>>,
        cancel: CancellationToken,
    ) -> GradingResult<GradingBatch> {
        let plan = self.plan(ceiling)?;
        Ok(self.execute(run_id, coordinate, plan, progress, cancel).await)
    }

    /// Start a run on its own tokio task
    pub fn spawn(self: &Arc<Self>, coordinate: Coordinate, ceiling: ScaleName) -> GradingResult<GradingRun> {
        let plan = self.plan(ceiling)?;
        let run_id = Uuid::new_v4();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let layers_total = plan.layers_total;
        let tasks_total = plan.tasks.len();
        let budget = plan.budget;

        let orchestrator = Arc::clone(self);
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            orchestrator
                .execute(run_id, coordinate, plan, Some(progress_tx), run_cancel)
                .await
        });

        Ok(GradingRun {
            run_id,
            layers_total,
            tasks_total,
            budget,
            progress: progress_rx,
            cancel,
            handle,
        })
    }

    async fn execute(
        &self,
        run_id: Uuid,
        coordinate: Coordinate,
        plan: GradingPlan,
        progress: Option<mpsc::UnboundedSender<ProgressUpdate>>,
        cancel: CancellationToken,
    ) -> GradingBatch {
        let tasks_total = plan.tasks.len();

        info!(
            run_id = %run_id,
            %coordinate,
            ceiling = %plan.ceiling,
            layers = plan.layers_total,
            tasks = tasks_total,
            concurrency = self.config.concurrency,
            eta_ms = plan.budget.eta_ms,
            task_timeout_ceiling_ms = plan.budget.task_timeout_ceiling_ms,
            "Grading started"
        );
        self.emit(GradingEvent::GradingStarted {
            run_id,
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            layers_total: plan.layers_total,
            tasks_total,
            eta_ms: plan.budget.eta_ms,
            timestamp: chrono::Utc::now(),
        });

        let mut aggregator = BatchAggregator::new(plan.tasks.clone(), &self.table, self.config.reconciliation);
        let mut critical_announced = false;

        // Tasks enter the pool in priority order; completions arrive in any order
        let mut completions = stream::iter(plan.tasks.into_iter().enumerate())
            .map(move |(index, task)| async move {
                let outcome = self.run_task(&task, coordinate).await;
                (index, task, outcome)
            })
            .buffer_unordered(self.config.concurrency);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    warn!(
                        run_id = %run_id,
                        resolved = aggregator.tasks_resolved(),
                        tasks = tasks_total,
                        "Grading cancelled"
                    );
                    break;
                }

                next = completions.next() => {
                    let Some((index, task, outcome)) = next else {
                        break;
                    };

                    match &outcome {
                        TaskOutcome::Failed(error) => warn!(
                            run_id = %run_id,
                            layer_id = %task.layer_id,
                            task = %task,
                            error = %error,
                            "Grading task failed"
                        ),
                        TaskOutcome::NoData => debug!(
                            run_id = %run_id,
                            layer_id = %task.layer_id,
                            task = %task,
                            "No data at location"
                        ),
                        TaskOutcome::Sample(sample) => debug!(
                            run_id = %run_id,
                            layer_id = %task.layer_id,
                            task = %task,
                            value = %sample.value,
                            "Grading task resolved"
                        ),
                    }

                    if !aggregator.merge(index, outcome) {
                        continue;
                    }

                    self.report_progress(run_id, &progress, aggregator.progress(&task.layer_id));

                    if !critical_announced && aggregator.critical_layers_resolved() {
                        critical_announced = true;
                        let gaps = aggregator.critical_gaps();
                        info!(run_id = %run_id, gaps = gaps.len(), "Critical layers resolved");
                        self.emit(GradingEvent::CriticalLayersResolved {
                            run_id,
                            gaps,
                            timestamp: chrono::Utc::now(),
                        });
                    }
                }
            }
        }

        // In-flight reads are dropped here
        drop(completions);

        if !aggregator.is_done() {
            let marked = aggregator.record_cancelled();
            debug!(run_id = %run_id, marked, "Unresolved tasks marked cancelled");
            if let Some(last) = aggregator.tasks().last() {
                self.report_progress(run_id, &progress, aggregator.progress(&last.layer_id));
            }
        }

        let batch = aggregator.freeze();
        let error_count = batch.error_count();

        info!(
            run_id = %run_id,
            status = ?batch.status,
            layers_completed = batch.layers_completed,
            layers = batch.layers_requested,
            errors = error_count,
            critical_gaps = batch.critical_gaps().len(),
            "Grading finished"
        );
        self.emit(GradingEvent::GradingFinished {
            run_id,
            status: batch.status,
            layers_completed: batch.layers_completed,
            layers_total: batch.layers_requested,
            error_count,
            timestamp: chrono::Utc::now(),
        });

        batch
    }

    /// Execute one task; failures become outcomes
    async fn run_task(&self, task: &GradingTask, coordinate: Coordinate) -> TaskOutcome {
        let layer = match self.table.get_layer(&task.layer_id) {
            Ok(layer) => layer,
            Err(e) => return TaskOutcome::Failed(e),
        };

        match (task.method.aggregator(), task.scale) {
            (None, _) => match self.sampler.sample_point(layer, coordinate).await {
                Ok(Some(value)) => TaskOutcome::Sample(Sample::point(value)),
                Ok(None) => TaskOutcome::NoData,
                Err(e) => TaskOutcome::Failed(e),
            },
            (Some(aggregator), Some(scale)) => {
                match self.sampler.sample_area(layer, coordinate, &scale, aggregator).await {
                    Ok(sample) => TaskOutcome::Sample(sample),
                    Err(e) => TaskOutcome::Failed(e),
                }
            }
            (Some(_), None) => TaskOutcome::Failed(GradingError::InvalidConfiguration(format!(
                "area task for layer '{}' has no scale",
                task.layer_id
            ))),
        }
    }

    fn report_progress(
        &self,
        run_id: Uuid,
        progress: &Option<mpsc::UnboundedSender<ProgressUpdate>>,
        update: ProgressUpdate,
    ) {
        if let Some(tx) = progress {
            // Receiver may be gone; grading continues regardless
            let _ = tx.send(update.clone());
        }
        self.emit(GradingEvent::GradingProgress {
            run_id,
            progress: update,
            timestamp: chrono::Utc::now(),
        });
    }

    fn emit(&self, event: GradingEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(event);
        }
    }
}
