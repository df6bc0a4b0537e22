//! Entitlement store and capability evaluator.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::audit::{AuditLog, AuditResult};
use super::manifest::{EnforcementMode, EntitlementManifest};
use super::EntitlementError;

/// Outcome of a numeric limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitCheck {
    Ok,
    /// The limit is exhausted but enforcement only asks for a warning
    /// event; callers proceed.
    SoftExceeded,
    Exceeded,
}

type ManifestKey = (String, Option<String>);

/// Plan-agnostic authorization and limit checking.
///
/// Readers always see a consistent snapshot: manifests are stored behind
/// `Arc` and replaced atomically on sync.
pub struct EntitlementStore {
    signing_key: Option<String>,
    manifests: RwLock<HashMap<ManifestKey, Arc<EntitlementManifest>>>,
    audit: Arc<AuditLog>,
}

impl EntitlementStore {
    pub fn new(signing_key: Option<String>, audit: Arc<AuditLog>) -> Self {
        Self {
            signing_key,
            manifests: RwLock::new(HashMap::new()),
            audit,
        }
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Accept a pushed or file-loaded manifest.
    ///
    /// The previous manifest stays active when validation or signature
    /// verification fails.
    pub fn sync(&self, manifest: EntitlementManifest) -> Result<(), EntitlementError> {
        manifest.validate()?;
        if let Some(key) = &self.signing_key {
            manifest.verify_signature(key)?;
        }

        let key = (manifest.app_id.clone(), manifest.user_id.clone());
        self.manifests.write().insert(key, Arc::new(manifest));
        Ok(())
    }

    /// The active manifest, falling back from user scope to app scope to
    /// the default permissive manifest.
    pub fn get(&self, app_id: &str, user_id: Option<&str>) -> Arc<EntitlementManifest> {
        let manifests = self.manifests.read();
        if let Some(user_id) = user_id {
            if let Some(manifest) =
                manifests.get(&(app_id.to_string(), Some(user_id.to_string())))
            {
                return manifest.clone();
            }
        }
        if let Some(manifest) = manifests.get(&(app_id.to_string(), None)) {
            return manifest.clone();
        }
        drop(manifests);
        Arc::new(EntitlementManifest::default_permissive(app_id))
    }

    /// Literal capability membership. Unknown strings always deny.
    pub fn has(&self, app_id: &str, user_id: Option<&str>, capability: &str) -> bool {
        let manifest = self.get(app_id, user_id);
        let allowed = manifest.capabilities.contains(capability);
        self.audit.record(
            app_id,
            user_id,
            capability,
            if allowed {
                AuditResult::Allowed
            } else {
                AuditResult::Denied
            },
            None,
        );
        allowed
    }

    /// Capability check that raises a structured error on denial.
    pub fn require(
        &self,
        app_id: &str,
        user_id: Option<&str>,
        capability: &str,
    ) -> Result<(), EntitlementError> {
        if self.has(app_id, user_id, capability) {
            Ok(())
        } else {
            Err(EntitlementError::CapabilityDenied {
                capability: capability.to_string(),
            })
        }
    }

    /// Evaluate a numeric limit against observed usage.
    pub fn check_limit(
        &self,
        app_id: &str,
        user_id: Option<&str>,
        limit_id: &str,
        current_usage: i64,
    ) -> LimitCheck {
        let manifest = self.get(app_id, user_id);
        let bound = manifest.limits.get(limit_id).copied().unwrap_or(-1);
        let enforcement = manifest.token_budget.total_tokens.enforcement;

        let within = bound < 0 || current_usage < bound;
        let check = if within {
            LimitCheck::Ok
        } else {
            match enforcement {
                EnforcementMode::None | EnforcementMode::Warn => LimitCheck::Ok,
                EnforcementMode::Soft => LimitCheck::SoftExceeded,
                EnforcementMode::Hard => LimitCheck::Exceeded,
            }
        };

        if !within {
            self.audit.record(
                app_id,
                user_id,
                limit_id,
                if check == LimitCheck::Exceeded {
                    AuditResult::Denied
                } else {
                    AuditResult::Allowed
                },
                Some(format!("usage {} over bound {}", current_usage, bound)),
            );
            if enforcement == EnforcementMode::Warn {
                tracing::warn!(app_id, limit_id, current_usage, bound, "limit exceeded");
            }
        }

        check
    }

    pub fn require_within_limit(
        &self,
        app_id: &str,
        user_id: Option<&str>,
        limit_id: &str,
        current_usage: i64,
    ) -> Result<LimitCheck, EntitlementError> {
        match self.check_limit(app_id, user_id, limit_id, current_usage) {
            LimitCheck::Exceeded => Err(EntitlementError::LimitExceeded {
                limit_id: limit_id.to_string(),
            }),
            ok => Ok(ok),
        }
    }

    /// Validate a caller's tenancy against a resource's `app_id`.
    pub fn enforce_tenancy(
        &self,
        caller_app_id: &str,
        resource_app_id: &str,
        user_id: Option<&str>,
        resource: &str,
    ) -> Result<(), EntitlementError> {
        if caller_app_id == resource_app_id {
            return Ok(());
        }
        self.audit.record(
            caller_app_id,
            user_id,
            resource,
            AuditResult::TenantIsolation,
            Some(format!("resource belongs to {}", resource_app_id)),
        );
        Err(EntitlementError::TenantIsolation)
    }
}
