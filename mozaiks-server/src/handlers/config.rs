//! Read-only navigation and configuration payloads.

use std::path::Path as FsPath;

use axum::extract::State;
use axum::Json;
use serde_json::Value;

use crate::auth::AuthUser;
use crate::state::AppState;

fn read_config_file(root: &str, file: &str, default: Value) -> Value {
    let path = FsPath::new(root).join(file);
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or(default)
}

/// `GET /api/navigation` — items with either a `path` route or a
/// workflow `trigger`.
pub async fn navigation(
    State(state): State<AppState>,
    AuthUser(_identity): AuthUser,
) -> Json<Value> {
    Json(read_config_file(
        &state.config.config_root,
        "navigation.json",
        Value::Array(Vec::new()),
    ))
}

/// `GET /api/app-config`
pub async fn app_config(
    State(state): State<AppState>,
    AuthUser(_identity): AuthUser,
) -> Json<Value> {
    Json(read_config_file(
        &state.config.config_root,
        "app-config.json",
        serde_json::json!({}),
    ))
}

/// `GET /api/theme-config`
pub async fn theme_config(
    State(state): State<AppState>,
    AuthUser(_identity): AuthUser,
) -> Json<Value> {
    Json(read_config_file(
        &state.config.config_root,
        "theme-config.json",
        serde_json::json!({}),
    ))
}
