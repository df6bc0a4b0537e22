//! HTTP error shape for the Mozaiks runtime.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use mozaiks_core::auth::AuthError;
use mozaiks_plugins::PluginError;

/// The public error body: `{ detail, error_code, status_code }`.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub detail: String,
    pub error_code: String,
    pub status_code: u16,
}

impl ApiError {
    pub fn new(status_code: u16, error_code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            error_code: error_code.into(),
            status_code,
        }
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(401, "UNAUTHORIZED", detail)
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(403, "FORBIDDEN", detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(404, "NOT_FOUND", detail)
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(400, "BAD_REQUEST", detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(500, "INTERNAL_ERROR", detail)
    }
}

impl From<mozaiks_core::Error> for ApiError {
    fn from(err: mozaiks_core::Error) -> Self {
        Self::new(err.status_code(), err.code(), err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self::from(mozaiks_core::Error::from(err))
    }
}

impl From<mozaiks_core::EntitlementError> for ApiError {
    fn from(err: mozaiks_core::EntitlementError) -> Self {
        Self::from(mozaiks_core::Error::from(err))
    }
}

impl From<mozaiks_core::session::SessionError> for ApiError {
    fn from(err: mozaiks_core::session::SessionError) -> Self {
        Self::from(mozaiks_core::Error::from(err))
    }
}

impl From<PluginError> for ApiError {
    fn from(err: PluginError) -> Self {
        Self::new(err.status_code(), err.code(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Result alias for handler bodies.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
