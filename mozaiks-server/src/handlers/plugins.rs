//! Plugin listing and execution endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::Value;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

/// `GET /api/plugins`
pub async fn list(
    State(state): State<AppState>,
    AuthUser(_identity): AuthUser,
) -> Json<Value> {
    Json(serde_json::to_value(state.plugins.list()).unwrap_or_else(|_| Value::Array(Vec::new())))
}

/// `POST /api/execute/{plugin}`
///
/// The body is plugin-owned JSON; server-derived identity fields are
/// injected by the dispatcher and overwrite client-supplied values.
pub async fn execute(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(plugin): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let response = state
        .plugin_dispatcher
        .execute(&plugin, body, &identity)
        .await?;
    Ok(Json(response))
}
