//! Capability listing and capability launch.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use mozaiks_core::orchestrator::StartRequest;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const WORKFLOW_CAPABILITY_PREFIX: &str = "cap.workflow.";

/// `GET /api/ai/capabilities`
pub async fn capabilities(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Json<Value> {
    let manifest = state
        .entitlements
        .get(&identity.app_id, Some(&identity.user_id));

    let capabilities: Vec<Value> = state
        .bundles
        .available()
        .into_iter()
        .map(|workflow| {
            let capability = format!("{}{}", WORKFLOW_CAPABILITY_PREFIX, workflow);
            let allowed = manifest.capabilities.contains(&capability);
            json!({
                "id": capability,
                "display_name": workflow,
                "enabled": true,
                "allowed": allowed,
            })
        })
        .collect();

    Json(json!({
        "capabilities": capabilities,
        "plan": manifest.plan,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LaunchRequest {
    pub capability_id: String,
}

/// `POST /api/ai/launch` — start a session and mint a short-lived
/// execution token binding it.
pub async fn launch(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(request): Json<LaunchRequest>,
) -> ApiResult<Json<Value>> {
    let workflow = request
        .capability_id
        .strip_prefix(WORKFLOW_CAPABILITY_PREFIX)
        .ok_or_else(|| {
            ApiError::bad_request(format!(
                "capability_id must start with '{}'",
                WORKFLOW_CAPABILITY_PREFIX
            ))
        })?
        .to_string();

    let outcome = state
        .orchestrator
        .start(StartRequest {
            app_id: identity.app_id.clone(),
            workflow_name: workflow.clone(),
            user_id: identity.user_id.clone(),
            client_request_id: None,
            force_new: false,
            required_min_tokens: 0,
        })
        .await?;

    let launch_token = state.execution_tokens.mint(
        &identity.user_id,
        &identity.app_id,
        &outcome.chat_id,
        &request.capability_id,
        &workflow,
    )?;

    Ok(Json(json!({
        "chat_id": outcome.chat_id,
        "launch_token": launch_token,
        "expires_in": state.execution_tokens.expires_in_seconds(),
        "runtime": {
            "websocket_url": format!(
                "/ws/{}/{}/{}/{}",
                workflow, identity.app_id, outcome.chat_id, identity.user_id
            ),
            "cache_seed": outcome.cache_seed,
        },
    })))
}
