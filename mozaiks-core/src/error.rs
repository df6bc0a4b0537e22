//! Top-level error type for the runtime core.
//!
//! Module errors are flattened into categories matching how callers
//! handle them; the HTTP surface maps `code()` / `status_code()` onto
//! the public error shape.

use thiserror::Error;

use crate::auth::AuthError;
use crate::entitlement::EntitlementError;
use crate::provider::ProviderError;
use crate::session::SessionError;
use crate::tool::ToolError;
use crate::workflow::BundleError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Entitlement(#[from] EntitlementError),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("insufficient tokens: {required} required")]
    InsufficientTokens { required: u64 },

    #[error("prerequisite workflow not completed: {workflow}")]
    PrerequisiteNotMet { workflow: String },

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Stable error code for the `{ detail, error_code, status_code }`
    /// response shape.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(e) => e.code(),
            Self::Entitlement(e) => e.code(),
            Self::Bundle(e) => e.code(),
            Self::Session(SessionError::NotFound(_)) => "NOT_FOUND",
            Self::Session(_) => "INTERNAL_ERROR",
            Self::Provider(_) => "LLM_ERROR",
            Self::Tool(ToolError::NotFound(_)) => "NOT_FOUND",
            Self::Tool(ToolError::Timeout) => "PLUGIN_TIMEOUT",
            Self::Tool(ToolError::NotInvocableStateless) => "TOOL_NOT_INVOCABLE_STATELESS",
            Self::Tool(_) => "TOOL_ERROR",
            Self::InsufficientTokens { .. } => "INSUFFICIENT_TOKENS",
            Self::PrerequisiteNotMet { .. } => "CONFLICT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Auth(AuthError::NotService) => 403,
            Self::Auth(_) => 401,
            Self::Entitlement(EntitlementError::CapabilityDenied { .. }) => 403,
            Self::Entitlement(EntitlementError::TenantIsolation) => 403,
            Self::Entitlement(EntitlementError::LimitExceeded { .. }) => 429,
            Self::Entitlement(_) => 400,
            Self::Bundle(BundleError::NotFound(_)) => 404,
            Self::Bundle(_) => 400,
            Self::Session(SessionError::NotFound(_)) => 404,
            Self::Session(_) => 500,
            Self::Provider(_) => 502,
            Self::Tool(ToolError::NotFound(_)) => 404,
            Self::Tool(ToolError::Timeout) => 504,
            Self::Tool(_) => 400,
            Self::InsufficientTokens { .. } => 402,
            Self::PrerequisiteNotMet { .. } => 409,
            Self::Internal(_) => 500,
        }
    }
}

/// Result alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::from(AuthError::Expired).status_code(), 401);
        assert_eq!(
            Error::from(EntitlementError::CapabilityDenied {
                capability: "cap.workflow.x".into()
            })
            .status_code(),
            403
        );
        assert_eq!(
            Error::from(EntitlementError::LimitExceeded {
                limit_id: "cap.limit.tokens_monthly".into()
            })
            .status_code(),
            429
        );
        assert_eq!(Error::InsufficientTokens { required: 10 }.status_code(), 402);
        assert_eq!(
            Error::PrerequisiteNotMet {
                workflow: "onboarding".into()
            }
            .status_code(),
            409
        );
        assert_eq!(
            Error::from(BundleError::NotFound("w".into())).status_code(),
            404
        );
    }

    #[test]
    fn test_code_mapping() {
        assert_eq!(
            Error::from(EntitlementError::CapabilityDenied {
                capability: "cap.workflow.x".into()
            })
            .code(),
            "FEATURE_GATED"
        );
        assert_eq!(
            Error::InsufficientTokens { required: 10 }.code(),
            "INSUFFICIENT_TOKENS"
        );
        assert_eq!(Error::from(ToolError::Timeout).code(), "PLUGIN_TIMEOUT");
    }
}
