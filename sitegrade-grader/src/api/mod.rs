//! HTTP API handlers for sitegrade-grader
//!
//! REST endpoints for grading runs and the layer catalog, plus an SSE stream
//! of grading events.

pub mod grading;
pub mod health;
pub mod layers;
pub mod sse;

pub use grading::grading_routes;
pub use health::health_routes;
pub use layers::layer_routes;
pub use sse::grading_event_stream;
