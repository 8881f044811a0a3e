//! Feedback API
//!
//! POST /feedback, GET /feedback/accuracy, GET /feedback/systematic-errors

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ApiError, ApiResult};
use crate::models::{AccuracyStats, FeedbackAction, FeedbackEntry, SystematicError};
use crate::AppState;

/// POST /feedback request
///
/// Provider, model and prompt version default to the running classifier.
#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub record_external_id: String,
    pub action: FeedbackAction,
    pub original_value: Option<String>,
    pub corrected_value: Option<String>,
    pub reason: Option<String>,
    pub provider: Option<String>,
    pub model_version: Option<String>,
    pub prompt_version: Option<String>,
}

/// GET /feedback/accuracy response
#[derive(Debug, Serialize)]
pub struct AccuracyResponse {
    pub by_provider: BTreeMap<String, AccuracyStats>,
    pub by_prompt_version: BTreeMap<String, AccuracyStats>,
}

/// POST /feedback
pub async fn submit_feedback(
    State(state): State<AppState>,
    Json(request): Json<FeedbackRequest>,
) -> ApiResult<(StatusCode, Json<FeedbackEntry>)> {
    if request.action == FeedbackAction::Edit && request.corrected_value.is_none() {
        return Err(ApiError::BadRequest(
            "edit feedback requires corrected_value".to_string(),
        ));
    }

    let entry = FeedbackEntry {
        record_external_id: request.record_external_id,
        action: request.action,
        original_value: request.original_value,
        corrected_value: request.corrected_value,
        reason: request.reason,
        provider: request
            .provider
            .unwrap_or_else(|| state.classifier.provider.clone()),
        model_version: request
            .model_version
            .unwrap_or_else(|| state.classifier.model_version.clone()),
        prompt_version: request
            .prompt_version
            .unwrap_or_else(|| state.classifier.prompt_version.clone()),
        created_at: Utc::now(),
    };

    state.feedback.record_feedback(&entry).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// GET /feedback/accuracy
pub async fn get_accuracy(State(state): State<AppState>) -> ApiResult<Json<AccuracyResponse>> {
    Ok(Json(AccuracyResponse {
        by_provider: state.feedback.accuracy_by_provider().await?,
        by_prompt_version: state.feedback.accuracy_by_prompt_version().await?,
    }))
}

/// GET /feedback/systematic-errors
pub async fn get_systematic_errors(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<SystematicError>>> {
    Ok(Json(state.feedback.identify_systematic_errors().await?))
}

pub fn feedback_routes() -> Router<AppState> {
    Router::new()
        .route("/feedback", post(submit_feedback))
        .route("/feedback/accuracy", get(get_accuracy))
        .route("/feedback/systematic-errors", get(get_systematic_errors))
}
