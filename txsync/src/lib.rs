//! txsync library interface
//!
//! Exposes public APIs for the binary and for integration testing

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use txsync_common::events::EventBus;

use crate::models::ClassifierIdentity;
use crate::services::{FeedbackTracker, OperationThrottle, SyncOrchestrator};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub orchestrator: SyncOrchestrator,
    pub feedback: FeedbackTracker,
    /// Cooldown between externally triggered runs of the same kind
    pub throttle: Arc<OperationThrottle>,
    /// Classifier stamped on feedback entries that do not name one
    pub classifier: ClassifierIdentity,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        orchestrator: SyncOrchestrator,
        classifier: ClassifierIdentity,
        cooldown: Duration,
    ) -> Self {
        Self {
            feedback: FeedbackTracker::new(db.clone()),
            db,
            event_bus,
            orchestrator,
            throttle: Arc::new(OperationThrottle::new(cooldown)),
            classifier,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::sync_routes())
        .merge(api::preference_routes())
        .merge(api::feedback_routes())
        .merge(api::health_routes())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
