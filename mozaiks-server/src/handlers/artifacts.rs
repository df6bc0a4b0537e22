//! Cached artifact reads.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CachedArtifactQuery {
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
}

/// `GET /api/artifacts/{artifact_id}/cached?app_id=…&chat_id=…`
///
/// 404 on miss or expiry; 403 when the query's tenant does not match
/// the caller's token.
pub async fn cached(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(artifact_id): Path<String>,
    Query(query): Query<CachedArtifactQuery>,
) -> ApiResult<Json<Value>> {
    if let Some(requested_app) = &query.app_id {
        state.entitlements.enforce_tenancy(
            &identity.app_id,
            requested_app,
            Some(&identity.user_id),
            &format!("artifact:{}", artifact_id),
        )?;
    }

    let artifact = state
        .store
        .get_artifact(&identity.app_id, &artifact_id)
        .await?
        .filter(|artifact| match &query.chat_id {
            Some(chat_id) => &artifact.chat_id == chat_id,
            None => true,
        })
        .ok_or_else(|| ApiError::not_found(format!("artifact not found: {}", artifact_id)))?;

    Ok(Json(serde_json::to_value(artifact).unwrap_or(Value::Null)))
}
