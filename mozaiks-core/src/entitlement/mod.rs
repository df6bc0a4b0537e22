//! Entitlement manifests, capability evaluation, and audit.
//!
//! Capabilities are literal strings of shape `cap.<type>.<name>`; there
//! are no wildcards, and unknown strings always deny. Enforcement points
//! are workflow start, tool invocation, artifact access, and token
//! consumption.

mod audit;
mod manifest;
mod store;

pub use audit::{AuditLog, AuditRecord, AuditResult};
pub use manifest::{
    BudgetBucket, BudgetPeriod, EnforcementMode, EntitlementManifest, ManifestSource, Plan,
    PlanTier, TokenBudget, CAPABILITY_PREFIX,
};
pub use store::{EntitlementStore, LimitCheck};

use thiserror::Error;

/// Errors raised by entitlement checks and manifest sync.
#[derive(Debug, Error)]
pub enum EntitlementError {
    #[error("capability denied: {capability}")]
    CapabilityDenied { capability: String },

    #[error("limit exceeded: {limit_id}")]
    LimitExceeded { limit_id: String },

    #[error("manifest rejected: {0}")]
    InvalidManifest(String),

    #[error("manifest signature invalid")]
    InvalidSignature,

    #[error("tenant isolation violation")]
    TenantIsolation,
}

impl EntitlementError {
    /// Stable error code for the HTTP error shape.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CapabilityDenied { .. } => "FEATURE_GATED",
            Self::LimitExceeded { .. } => "LIMIT_EXCEEDED",
            Self::InvalidManifest(_) => "MANIFEST_INVALID",
            Self::InvalidSignature => "MANIFEST_INVALID_SIGNATURE",
            Self::TenantIsolation => "TENANT_ISOLATION",
        }
    }
}
