//! Sync control API handlers
//!
//! POST /sync/start, GET /sync/status, POST /sync/cancel, GET /sync/runs

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use txsync_common::SourceKind;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{OperationKind, SyncState, SyncStatus, SyncSummary};
use crate::services::sync_orchestrator::{LockHolder, StartOutcome};
use crate::AppState;

/// Default number of runs returned by GET /sync/runs
const DEFAULT_RUN_LIMIT: i64 = 20;
const MAX_RUN_LIMIT: i64 = 500;

/// POST /sync/start request (body optional; empty means all sources)
#[derive(Debug, Default, Deserialize)]
pub struct StartSyncRequest {
    #[serde(default)]
    pub sources: Vec<SourceKind>,
}

/// POST /sync/start response
#[derive(Debug, Serialize)]
pub struct StartSyncResponse {
    pub run_id: Uuid,
    pub operation: OperationKind,
    pub state: SyncState,
}

/// GET /sync/status response
#[derive(Debug, Serialize)]
pub struct SyncStatusResponse {
    #[serde(flatten)]
    pub status: SyncStatus,
    pub lock_holder: Option<LockHolder>,
    pub configured_sources: Vec<SourceKind>,
}

/// POST /sync/cancel response
#[derive(Debug, Serialize)]
pub struct CancelSyncResponse {
    pub cancelled: bool,
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<i64>,
}

/// POST /sync/start
///
/// Returns 202 Accepted with the run id. 409 Conflict when the same kind of
/// operation was triggered within the cooldown window or another run holds
/// the sync lock.
pub async fn start_sync(
    State(state): State<AppState>,
    request: Option<Json<StartSyncRequest>>,
) -> ApiResult<(StatusCode, Json<StartSyncResponse>)> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let sources: BTreeSet<SourceKind> = if request.sources.is_empty() {
        SourceKind::ALL.into_iter().collect()
    } else {
        request.sources.into_iter().collect()
    };
    let operation = OperationKind::for_sources(&sources);

    if let Err(remaining) = state.throttle.check(operation) {
        tracing::info!(operation = %operation, remaining_secs = remaining.as_secs(), "Sync start throttled");
        return Err(ApiError::Conflict(format!(
            "{} was triggered recently; retry in {}s",
            operation,
            remaining.as_secs().max(1)
        )));
    }

    let outcome = state.orchestrator.start_sync(sources).await;
    let state_after = outcome.state();
    match outcome {
        StartOutcome::Started { run_id, operation } => {
            tracing::debug!(run_id = %run_id, operation = %operation, "Sync started via API");
            Ok((
                StatusCode::ACCEPTED,
                Json(StartSyncResponse {
                    run_id,
                    operation,
                    state: state_after,
                }),
            ))
        }
        StartOutcome::Blocked { reason } => {
            // Blocked requests do not consume the cooldown
            state.throttle.reset(operation);
            *state.last_error.write().await = Some(reason.clone());
            Err(ApiError::Conflict(reason))
        }
    }
}

/// GET /sync/status
pub async fn get_status(State(state): State<AppState>) -> Json<SyncStatusResponse> {
    Json(SyncStatusResponse {
        status: state.orchestrator.status().await,
        lock_holder: state.orchestrator.lock_holder(),
        configured_sources: state.orchestrator.configured_sources(),
    })
}

/// POST /sync/cancel
///
/// Cooperative: the batch in flight completes and is committed.
pub async fn cancel_sync(State(state): State<AppState>) -> ApiResult<Json<CancelSyncResponse>> {
    if !state.orchestrator.cancel() {
        return Err(ApiError::NotFound("No sync is running".to_string()));
    }
    Ok(Json(CancelSyncResponse { cancelled: true }))
}

/// GET /sync/runs?limit=N
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> ApiResult<Json<Vec<SyncSummary>>> {
    let limit = query.limit.unwrap_or(DEFAULT_RUN_LIMIT);
    if !(1..=MAX_RUN_LIMIT).contains(&limit) {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_RUN_LIMIT
        )));
    }
    let runs = crate::db::sync_runs::list_runs(&state.db, limit).await?;
    Ok(Json(runs))
}

/// Build sync routes
pub fn sync_routes() -> Router<AppState> {
    Router::new()
        .route("/sync/start", post(start_sync))
        .route("/sync/status", get(get_status))
        .route("/sync/cancel", post(cancel_sync))
        .route("/sync/runs", get(list_runs))
        .route("/sync/events", get(super::sse::sync_event_stream))
}
