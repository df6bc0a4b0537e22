//! Plugin units for the Mozaiks runtime.
//!
//! A plugin is a named request/response handler discovered from a
//! descriptor under the plugins root and dispatched with per-request
//! context injection, entitlement enforcement, and a wall-clock
//! timeout. Plugins report their own errors as `{ "error": ... }`
//! payloads; only framework-level failures surface as [`PluginError`].

mod descriptor;
mod dispatcher;
mod registry;

pub use descriptor::{PluginDescriptor, PluginEntitlements};
pub use dispatcher::Dispatcher;
pub use registry::{LoadedPlugin, PluginInfo, PluginRegistry};

use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

use mozaiks_core::Identity;

/// Context handed to every plugin execution, derived from the verified
/// token. Client-supplied values never reach a plugin.
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub app_id: String,
    pub user_id: String,
    pub username: Option<String>,
    pub roles: Vec<String>,
    pub is_superadmin: bool,
    pub user_jwt: String,
}

impl From<&Identity> for PluginContext {
    fn from(identity: &Identity) -> Self {
        Self {
            app_id: identity.app_id.clone(),
            user_id: identity.user_id.clone(),
            username: identity.username.clone(),
            roles: identity.roles.iter().cloned().collect(),
            is_superadmin: identity.is_superadmin,
            user_jwt: identity.raw_token.clone(),
        }
    }
}

/// The entry operation every plugin unit exposes.
///
/// The returned future must be `'static`: implementations clone what
/// they need so the dispatcher can supervise execution on its own task.
pub trait Executable: Send + Sync {
    fn execute(
        &self,
        request: Value,
        context: PluginContext,
    ) -> BoxFuture<'static, Result<Value, String>>;
}

/// Framework-level dispatch failures.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin not found: {0}")]
    NotFound(String),

    #[error("plugin disabled: {0}")]
    Disabled(String),

    #[error("feature gated: {0}")]
    FeatureGated(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("plugin timed out: {0}")]
    Timeout(String),

    #[error("plugin crashed: {0}")]
    Crashed(String),

    #[error("discovery failed: {0}")]
    Discovery(String),
}

impl PluginError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "PLUGIN_NOT_FOUND",
            Self::Disabled(_) => "PLUGIN_DISABLED",
            Self::FeatureGated(_) => "FEATURE_GATED",
            Self::LimitExceeded(_) => "LIMIT_EXCEEDED",
            Self::Timeout(_) => "PLUGIN_TIMEOUT",
            Self::Crashed(_) => "PLUGIN_CRASHED",
            Self::Discovery(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Disabled(_) | Self::FeatureGated(_) => 403,
            Self::LimitExceeded(_) => 429,
            Self::Timeout(_) => 504,
            Self::Crashed(_) | Self::Discovery(_) => 500,
        }
    }
}
