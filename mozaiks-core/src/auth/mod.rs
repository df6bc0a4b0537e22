//! Identity and context resolution.
//!
//! Converts bearer credentials into a trusted [`Identity`] for the
//! lifetime of one request. Supports local HMAC validation and external
//! OIDC/JWKS validation, plus the runtime-minted execution token type.

mod execution;
mod jwks;
mod token;

pub use execution::{ExecutionClaims, ExecutionTokenService};
pub use jwks::JwksCache;
pub use token::TokenValidator;

use std::collections::BTreeSet;

use thiserror::Error;

/// Role claim that marks a platform service token.
pub const SERVICE_ROLE: &str = "internal_service";

/// Role claim that marks a superadmin user.
pub const SUPERADMIN_ROLE: &str = "superadmin";

/// Trusted per-request identity context. Never persisted.
#[derive(Debug, Clone)]
pub struct Identity {
    pub app_id: String,
    pub user_id: String,
    pub username: Option<String>,
    pub roles: BTreeSet<String>,
    pub is_superadmin: bool,
    /// Raw bearer token, forwarded to plugins as `user_jwt`.
    pub raw_token: String,
}

impl Identity {
    /// Whether this identity is a platform service rather than a user.
    pub fn is_service(&self) -> bool {
        self.roles.contains(SERVICE_ROLE)
    }

    /// Context object injected into plugin payloads as `_context`.
    pub fn context_value(&self) -> serde_json::Value {
        serde_json::json!({
            "app_id": self.app_id,
            "user_id": self.user_id,
            "username": self.username,
            "roles": self.roles,
            "is_superadmin": self.is_superadmin,
        })
    }
}

/// Errors produced while resolving identity.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token expired")]
    Expired,

    #[error("issuer mismatch")]
    IssuerMismatch,

    #[error("audience mismatch")]
    AudienceMismatch,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("signing key not found: {0}")]
    KeyNotFound(String),

    #[error("JWKS resolution failed: {0}")]
    Jwks(String),

    #[error("service token required")]
    NotService,

    #[error("auth misconfigured: {0}")]
    Config(String),
}

impl AuthError {
    /// Stable error code for the HTTP error shape.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Missing => "AUTH_MISSING",
            Self::InvalidSignature | Self::KeyNotFound(_) => "AUTH_INVALID_SIGNATURE",
            Self::Expired => "AUTH_EXPIRED",
            Self::IssuerMismatch => "AUTH_ISSUER_MISMATCH",
            Self::AudienceMismatch => "AUTH_AUDIENCE_MISMATCH",
            Self::Malformed(_) => "AUTH_MALFORMED",
            Self::Jwks(_) => "AUTH_JWKS_UNAVAILABLE",
            Self::NotService => "FORBIDDEN",
            Self::Config(_) => "AUTH_MISCONFIGURED",
        }
    }
}
