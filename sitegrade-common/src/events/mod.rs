//! Event types for the SiteGrade event system
//!
//! Provides grading lifecycle events and the `EventBus` shared between the
//! grading engine and its HTTP/SSE surface.

mod grading_types;

pub use grading_types::{GradingStatus, ProgressUpdate};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// SiteGrade event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GradingEvent {
    /// Grading run accepted and task list built
    GradingStarted {
        run_id: Uuid,
        latitude: f64,
        longitude: f64,
        /// Layers scheduled
        layers_total: usize,
        /// Sampling tasks scheduled
        tasks_total: usize,
        /// Advisory wall-clock estimate
        eta_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A sampling task resolved
    GradingProgress {
        run_id: Uuid,
        progress: ProgressUpdate,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Every critical layer has at least one resolved task
    ///
    /// Downstream reporting may treat the run as ready from here on.
    CriticalLayersResolved {
        run_id: Uuid,
        /// Critical layers that resolved with errors only
        gaps: Vec<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Run reached a terminal state
    GradingFinished {
        run_id: Uuid,
        status: GradingStatus,
        layers_completed: usize,
        layers_total: usize,
        error_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl GradingEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &str {
        match self {
            GradingEvent::GradingStarted { .. } => "GradingStarted",
            GradingEvent::GradingProgress { .. } => "GradingProgress",
            GradingEvent::CriticalLayersResolved { .. } => "CriticalLayersResolved",
            GradingEvent::GradingFinished { .. } => "GradingFinished",
        }
    }

    /// Run this event belongs to
    pub fn run_id(&self) -> Uuid {
        match self {
            GradingEvent::GradingStarted { run_id, .. }
            | GradingEvent::GradingProgress { run_id, .. }
            | GradingEvent::CriticalLayersResolved { run_id, .. }
            | GradingEvent::GradingFinished { run_id, .. } => *run_id,
        }
    }
}

/// Broadcast bus for grading events
///
/// Cloning is cheap; all clones share one channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GradingEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before slow subscribers lag
    ///
    /// # Examples
    ///
    /// ```
    /// use sitegrade_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<GradingEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: GradingEvent,
    ) -> Result<usize, broadcast::error::SendError<GradingEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: GradingEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
