//! Service-authenticated platform push endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use mozaiks_core::entitlement::EntitlementManifest;
use mozaiks_core::events::RuntimeEvent;

use crate::auth::ServiceAuth;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// `POST /api/internal/subscription/sync`
///
/// Accepts either a bare manifest or `{ "manifest": { ... } }`.
pub async fn subscription_sync(
    State(state): State<AppState>,
    ServiceAuth(_service): ServiceAuth,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let manifest_value = body.get("manifest").cloned().unwrap_or(body);
    let manifest: EntitlementManifest = serde_json::from_value(manifest_value)
        .map_err(|e| ApiError::bad_request(format!("malformed manifest: {}", e)))?;

    sync_and_notify(&state, manifest).await
}

/// `POST /api/v1/entitlements/{app_id}/sync`
pub async fn entitlements_sync(
    State(state): State<AppState>,
    ServiceAuth(_service): ServiceAuth,
    Path(app_id): Path<String>,
    Json(manifest): Json<EntitlementManifest>,
) -> ApiResult<Json<Value>> {
    if manifest.app_id != app_id {
        return Err(ApiError::bad_request(
            "manifest app_id does not match path",
        ));
    }
    sync_and_notify(&state, manifest).await
}

async fn sync_and_notify(
    state: &AppState,
    manifest: EntitlementManifest,
) -> ApiResult<Json<Value>> {
    let app_id = manifest.app_id.clone();
    let plan = manifest.plan.name.clone();
    state.entitlements.sync(manifest)?;

    state
        .dispatcher
        .emit_global(
            &app_id,
            RuntimeEvent::SubscriptionChanged {
                app_id: app_id.clone(),
                plan: Some(plan),
            },
        )
        .await;

    Ok(Json(json!({ "status": "ok", "app_id": app_id })))
}
