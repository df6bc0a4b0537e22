//! Request-level identity extraction.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use mozaiks_core::auth::AuthError;
use mozaiks_core::Identity;

use crate::error::ApiError;
use crate::state::AppState;

/// A verified end-user identity.
pub struct AuthUser(pub Identity);

/// A verified platform service identity (role `internal_service`).
pub struct ServiceAuth(pub Identity);

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = bearer_token(parts).ok_or_else(|| ApiError::from(AuthError::Missing))?;
        let identity = state.validator.validate(&token).await?;
        Ok(AuthUser(identity))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for ServiceAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let AuthUser(identity) = AuthUser::from_request_parts(parts, state).await?;
        if !identity.is_service() {
            return Err(ApiError::from(AuthError::NotService));
        }
        Ok(ServiceAuth(identity))
    }
}
