//! Plugin descriptors (`plugin.json`).

use serde::{Deserialize, Serialize};

/// Entitlement actions a plugin declares for the dispatcher to enforce.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginEntitlements {
    /// Feature flag that must be true in the manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    /// Consumable limit name (checked pre-flight, consumed on success).
    /// Resolved against `cap.limit.<name>` in the manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumes_limit: Option<String>,
}

/// One plugin unit's descriptor, read from `<plugins_root>/<dir>/plugin.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Name of the registered [`crate::Executable`] backing this plugin.
    pub entry_point: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entitlements: Option<PluginEntitlements>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_enabled() -> bool {
    true
}

impl PluginDescriptor {
    /// Capability gating this plugin's execution.
    pub fn execute_capability(&self) -> String {
        format!("cap.plugin.{}.execute", self.name)
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}
