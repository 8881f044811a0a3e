//! Source preference API
//!
//! GET /preferences/sources returns the effective enable flag of every
//! source kind; PUT updates the flags named in the body.

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use txsync_common::SourceKind;

use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct SourcePreferencesBody {
    pub enabled: BTreeMap<SourceKind, bool>,
}

/// GET /preferences/sources
pub async fn get_source_preferences(
    State(state): State<AppState>,
) -> ApiResult<Json<SourcePreferencesBody>> {
    let prefs = crate::db::settings::load_source_preferences(&state.db).await?;
    Ok(Json(SourcePreferencesBody {
        enabled: prefs.effective(),
    }))
}

/// PUT /preferences/sources
///
/// **Request:** `{"enabled": {"device-backup": false}}`; unnamed sources keep their value.
pub async fn put_source_preferences(
    State(state): State<AppState>,
    Json(body): Json<SourcePreferencesBody>,
) -> ApiResult<Json<SourcePreferencesBody>> {
    for (source, enabled) in &body.enabled {
        crate::db::settings::set_source_enabled(&state.db, *source, *enabled).await?;
    }

    let prefs = crate::db::settings::load_source_preferences(&state.db).await?;
    Ok(Json(SourcePreferencesBody {
        enabled: prefs.effective(),
    }))
}

pub fn preference_routes() -> Router<AppState> {
    Router::new().route(
        "/preferences/sources",
        get(get_source_preferences).put(put_source_preferences),
    )
}
