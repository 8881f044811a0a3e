//! HTTP API handlers for txsync
//!
//! REST endpoints for sync control, preferences and feedback, plus an SSE
//! stream of sync events.

pub mod feedback;
pub mod health;
pub mod preferences;
pub mod sse;
pub mod sync;

pub use feedback::feedback_routes;
pub use health::health_routes;
pub use preferences::preference_routes;
pub use sse::sync_event_stream;
pub use sync::sync_routes;
