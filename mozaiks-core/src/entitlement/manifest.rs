//! Entitlement manifest model and signature verification.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::EntitlementError;

/// Prefix every capability string must carry.
pub const CAPABILITY_PREFIX: &str = "cap.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Starter,
    Pro,
    Enterprise,
    Unlimited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub tier: PlanTier,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPeriod {
    Monthly,
    Unlimited,
}

/// Enforcement behavior when a budget or limit is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementMode {
    None,
    Warn,
    Soft,
    Hard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetBucket {
    /// −1 means unlimited.
    pub limit: i64,
    pub used: i64,
    pub enforcement: EnforcementMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudget {
    pub period: BudgetPeriod,
    pub total_tokens: BudgetBucket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestSource {
    Platform,
    File,
    Default,
}

/// The authoritative record of capabilities, limits, plan, and features
/// for an `app_id` (optionally scoped to one user).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementManifest {
    pub version: String,
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub plan: Plan,
    pub capabilities: BTreeSet<String>,
    /// `cap.limit.<name>` → bound; −1 = unlimited.
    #[serde(default)]
    pub limits: BTreeMap<String, i64>,
    pub token_budget: TokenBudget,
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
    #[serde(default)]
    pub rate_limits: BTreeMap<String, i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub source: ManifestSource,
}

impl EntitlementManifest {
    /// The permissive manifest used when no platform manifest has been
    /// pushed (OSS / self-host operation).
    pub fn default_permissive(app_id: impl Into<String>) -> Self {
        let mut limits = BTreeMap::new();
        limits.insert("cap.limit.tokens_monthly".to_string(), -1);
        limits.insert("cap.limit.requests_daily".to_string(), -1);
        limits.insert("cap.limit.plugin_calls_daily".to_string(), -1);

        Self {
            version: "1".to_string(),
            app_id: app_id.into(),
            tenant_id: None,
            user_id: None,
            plan: Plan {
                id: "default".to_string(),
                name: "Default".to_string(),
                tier: PlanTier::Unlimited,
                status: "active".to_string(),
                expires_at: None,
            },
            capabilities: [
                "cap.workflow.basic",
                "cap.tool.basic",
                "cap.artifact.view",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            limits,
            token_budget: TokenBudget {
                period: BudgetPeriod::Unlimited,
                total_tokens: BudgetBucket {
                    limit: -1,
                    used: 0,
                    enforcement: EnforcementMode::None,
                },
            },
            features: BTreeMap::new(),
            rate_limits: BTreeMap::new(),
            signature: None,
            source: ManifestSource::Default,
        }
    }

    /// Schema validation applied on sync.
    pub fn validate(&self) -> Result<(), EntitlementError> {
        if self.app_id.is_empty() {
            return Err(EntitlementError::InvalidManifest(
                "app_id is required".to_string(),
            ));
        }
        for capability in &self.capabilities {
            if !capability.starts_with(CAPABILITY_PREFIX) {
                return Err(EntitlementError::InvalidManifest(format!(
                    "capability must start with 'cap.': {}",
                    capability
                )));
            }
        }
        for limit_id in self.limits.keys() {
            if !limit_id.starts_with("cap.limit.") {
                return Err(EntitlementError::InvalidManifest(format!(
                    "limit id must start with 'cap.limit.': {}",
                    limit_id
                )));
            }
        }
        let bucket = &self.token_budget.total_tokens;
        if bucket.limit >= 0
            && bucket.used > bucket.limit
            && bucket.enforcement != EnforcementMode::None
        {
            return Err(EntitlementError::InvalidManifest(
                "token budget used exceeds limit".to_string(),
            ));
        }
        Ok(())
    }

    /// Canonical body the signature covers: the manifest with the
    /// signature field cleared, in serde_json's stable field order.
    fn canonical_body(&self) -> String {
        let mut unsigned = self.clone();
        unsigned.signature = None;
        serde_json::to_string(&unsigned).unwrap_or_default()
    }

    /// Compute the keyed digest for this manifest body.
    pub fn compute_signature(&self, key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hasher.update(self.canonical_body().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Verify the embedded signature against `key` in constant time.
    pub fn verify_signature(&self, key: &str) -> Result<(), EntitlementError> {
        let presented = self
            .signature
            .as_deref()
            .ok_or(EntitlementError::InvalidSignature)?;
        let expected = self.compute_signature(key);
        if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            Ok(())
        } else {
            Err(EntitlementError::InvalidSignature)
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
