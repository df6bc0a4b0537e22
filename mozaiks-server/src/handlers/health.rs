//! Liveness, readiness, and identification endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// `GET /health` — always 200 while the process is alive.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "app_id": state.config.app_id,
        "app_tier": state.config.app_tier,
        "plugins_loaded": state.plugins.len(),
    }))
}

/// `GET /ready` — 503 until the workflows root is usable.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let workflows_root = std::path::Path::new(&state.config.workflows_root);
    if !workflows_root.is_dir() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "reason": format!("workflows root missing: {}", state.config.workflows_root),
            })),
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "status": "ready",
            "workflows": state.bundles.available(),
        })),
    )
}

/// `GET /info` — basic identification metadata.
pub async fn info(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "name": "mozaiks-runtime",
        "version": env!("CARGO_PKG_VERSION"),
        "app_id": state.config.app_id,
        "app_tier": state.config.app_tier,
        "agui_enabled": state.config.agui_enabled,
    }))
}
