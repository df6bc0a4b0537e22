//! Chat session start, metadata, and listings.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use mozaiks_core::orchestrator::StartRequest;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartBody {
    /// Accepted for wire compatibility; the verified token's subject is
    /// authoritative.
    #[serde(default)]
    #[allow(dead_code)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub client_request_id: Option<String>,
    #[serde(default)]
    pub force_new: bool,
    #[serde(default)]
    pub required_min_tokens: u64,
}

/// `POST /api/chats/{app_id}/{workflow_name}/start`
pub async fn start(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path((app_id, workflow_name)): Path<(String, String)>,
    Json(body): Json<StartBody>,
) -> ApiResult<Json<Value>> {
    state
        .entitlements
        .enforce_tenancy(&identity.app_id, &app_id, Some(&identity.user_id), "chat.start")?;

    let outcome = state
        .orchestrator
        .start(StartRequest {
            app_id: app_id.clone(),
            workflow_name: workflow_name.clone(),
            user_id: identity.user_id.clone(),
            client_request_id: body.client_request_id,
            force_new: body.force_new,
            required_min_tokens: body.required_min_tokens,
        })
        .await?;

    Ok(Json(json!({
        "chat_id": outcome.chat_id,
        "websocket_url": format!(
            "/ws/{}/{}/{}/{}",
            workflow_name, app_id, outcome.chat_id, identity.user_id
        ),
        "cache_seed": outcome.cache_seed,
        "reused": outcome.reused,
    })))
}

/// `GET /api/chats/meta/{app_id}/{workflow_name}/{chat_id}`
pub async fn meta(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path((app_id, workflow_name, chat_id)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    state
        .entitlements
        .enforce_tenancy(&identity.app_id, &app_id, Some(&identity.user_id), "chat.meta")?;

    let session = state
        .store
        .get_session(&app_id, &chat_id)
        .await?
        .filter(|s| s.workflow_name == workflow_name)
        .ok_or_else(|| ApiError::not_found(format!("chat not found: {}", chat_id)))?;

    Ok(Json(serde_json::to_value(session).unwrap_or(Value::Null)))
}

/// `GET /api/sessions/list/{app_id}/{user_id}`
pub async fn list_sessions(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path((app_id, user_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    state
        .entitlements
        .enforce_tenancy(&identity.app_id, &app_id, Some(&identity.user_id), "sessions.list")?;
    if identity.user_id != user_id && !identity.is_superadmin {
        return Err(ApiError::forbidden("cannot list another user's sessions"));
    }

    let sessions = state.store.list_sessions(&app_id, &user_id).await?;
    Ok(Json(json!({ "sessions": sessions })))
}

/// `GET /api/workflows/{app_id}/available`
pub async fn available_workflows(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(app_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state
        .entitlements
        .enforce_tenancy(&identity.app_id, &app_id, Some(&identity.user_id), "workflows.list")?;

    let manifest = state.entitlements.get(&app_id, Some(&identity.user_id));
    let workflows: Vec<Value> = state
        .bundles
        .available()
        .into_iter()
        .map(|workflow| {
            let capability = format!("cap.workflow.{}", workflow);
            let allowed = manifest.capabilities.contains(&capability);
            json!({
                "id": workflow,
                "available": allowed,
                "locked_reason": if allowed { Value::Null } else { json!("capability_required") },
            })
        })
        .collect();

    Ok(Json(json!(workflows)))
}
