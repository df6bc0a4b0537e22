//! Runtime configuration.
//!
//! Each component reads a typed record built once at startup from the
//! enumerated environment-variable surface. No other env vars are
//! consulted anywhere in the runtime.

use std::env;
use std::time::Duration;

/// How bearer tokens are validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// OIDC discovery / JWKS validation against an external provider.
    External,
    /// Local HMAC validation with `JWT_SECRET`.
    Local,
}

/// Identity-resolver configuration (C1).
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub oidc_discovery_url: Option<String>,
    pub issuer: Option<String>,
    pub jwks_url: Option<String>,
    pub audience: Option<String>,
    pub jwt_secret: Option<String>,
    pub jwt_algorithm: String,
    /// Claim path roles are read from before the nested fallbacks.
    pub roles_claim: String,
    /// Minimum interval between JWKS refreshes.
    pub jwks_refresh_interval: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Local,
            oidc_discovery_url: None,
            issuer: None,
            jwks_url: None,
            audience: None,
            jwt_secret: None,
            jwt_algorithm: "HS256".to_string(),
            roles_claim: "roles".to_string(),
            jwks_refresh_interval: Duration::from_secs(300),
        }
    }
}

/// Runtime-minted execution token configuration.
#[derive(Debug, Clone)]
pub struct ExecutionTokenConfig {
    pub secret: String,
    pub expire_minutes: u64,
    pub algorithm: String,
}

impl Default for ExecutionTokenConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            expire_minutes: 10,
            algorithm: "HS256".to_string(),
        }
    }
}

/// Plugin dispatcher configuration (C4).
#[derive(Debug, Clone)]
pub struct PluginConfig {
    pub plugins_root: String,
    pub timeout: Duration,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            plugins_root: "plugins".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Usage flusher cadence (C3).
#[derive(Debug, Clone)]
pub struct UsageConfig {
    pub buffer_capacity: usize,
    pub flush_batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1000,
            flush_batch_size: 100,
            flush_interval: Duration::from_secs(60),
        }
    }
}

/// Outbound platform (billing / entitlement push) wiring.
#[derive(Debug, Clone, Default)]
pub struct PlatformConfig {
    pub url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub token_scope: Option<String>,
    pub entitlement_webhook_url: Option<String>,
}

/// Orchestrator bounds (C7).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_turns: u32,
    /// Window within which `start` reuses an in-progress session.
    pub idempotency_window: Duration,
    pub ui_tool_timeout: Duration,
    /// Bound on a single agent turn, model retries included.
    pub agent_turn_timeout: Duration,
    pub max_concurrent_runs: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_turns: 40,
            idempotency_window: Duration::from_secs(120),
            ui_tool_timeout: Duration::from_secs(300),
            agent_turn_timeout: Duration::from_secs(180),
            max_concurrent_runs: 64,
        }
    }
}

/// WebSocket transport bounds (C10).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub heartbeat_interval: Duration,
    pub prebuffer_capacity: usize,
    pub outbound_soft_cap: usize,
    pub outbound_hard_cap: usize,
    pub max_pending_ui_calls: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(120),
            prebuffer_capacity: 200,
            outbound_soft_cap: 256,
            outbound_hard_cap: 1024,
            max_pending_ui_calls: 64,
        }
    }
}

/// Full runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub app_id: String,
    pub app_tier: String,
    pub database_uri: Option<String>,
    pub workflows_root: String,
    /// Directory holding navigation/app-config/theme-config payloads.
    pub config_root: String,
    pub agui_enabled: bool,
    pub artifact_state_ttl: Option<Duration>,
    pub entitlement_signing_key: Option<String>,
    pub auth: AuthConfig,
    pub execution_tokens: ExecutionTokenConfig,
    pub plugins: PluginConfig,
    pub usage: UsageConfig,
    pub platform: PlatformConfig,
    pub orchestrator: OrchestratorConfig,
    pub transport: TransportConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            app_id: "app".to_string(),
            app_tier: "free".to_string(),
            database_uri: None,
            workflows_root: "workflows".to_string(),
            config_root: "config".to_string(),
            agui_enabled: true,
            artifact_state_ttl: None,
            entitlement_signing_key: None,
            auth: AuthConfig::default(),
            execution_tokens: ExecutionTokenConfig::default(),
            plugins: PluginConfig::default(),
            usage: UsageConfig::default(),
            platform: PlatformConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn var_u64(name: &str) -> Option<u64> {
    var(name).and_then(|v| v.parse().ok())
}

impl RuntimeConfig {
    /// Build configuration from the environment.
    ///
    /// Unset variables fall back to the documented defaults; malformed
    /// numeric values are treated as unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(app_id) = var("MOZAIKS_APP_ID") {
            config.app_id = app_id;
        }
        if let Some(tier) = var("APP_TIER") {
            config.app_tier = tier;
        }
        config.database_uri = var("MONGODB_URI").or_else(|| var("DATABASE_URI"));
        if let Some(root) = var("MOZAIKS_WORKFLOWS_ROOT") {
            config.workflows_root = root;
        }
        if let Some(root) = var("MOZAIKS_CONFIG_ROOT") {
            config.config_root = root;
        }
        if let Some(enabled) = var("MOZAIKS_AGUI_ENABLED") {
            config.agui_enabled = enabled != "false" && enabled != "0";
        }
        config.artifact_state_ttl =
            var_u64("MOZAIKS_ARTIFACT_STATE_TTL_SECONDS").map(Duration::from_secs);
        config.entitlement_signing_key = var("MOZAIKS_ENTITLEMENT_SIGNING_KEY");

        config.auth.mode = match var("MOZAIKS_AUTH_MODE").as_deref() {
            Some("external") => AuthMode::External,
            _ => AuthMode::Local,
        };
        config.auth.oidc_discovery_url = var("MOZAIKS_OIDC_DISCOVERY_URL");
        config.auth.issuer = var("AUTH_ISSUER");
        config.auth.jwks_url = var("AUTH_JWKS_URL");
        config.auth.audience = var("AUTH_AUDIENCE");
        config.auth.jwt_secret = var("JWT_SECRET");
        if let Some(alg) = var("JWT_ALGORITHM") {
            config.auth.jwt_algorithm = alg;
        }

        if let Some(secret) = var("MOZAIKS_EXECUTION_TOKEN_SECRET") {
            config.execution_tokens.secret = secret;
        }
        if let Some(minutes) = var_u64("MOZAIKS_EXECUTION_TOKEN_EXPIRE_MINUTES") {
            config.execution_tokens.expire_minutes = minutes;
        }
        if let Some(alg) = var("MOZAIKS_EXECUTION_TOKEN_ALGORITHM") {
            config.execution_tokens.algorithm = alg;
        }

        if let Some(seconds) = var_u64("MOZAIKS_PLUGIN_TIMEOUT_SECONDS") {
            config.plugins.timeout = Duration::from_secs(seconds);
        }
        if let Some(root) = var("MOZAIKS_PLUGINS_ROOT") {
            config.plugins.plugins_root = root;
        }

        config.platform.url = var("MOZAIKS_PLATFORM_URL");
        config.platform.client_id = var("MOZAIKS_PLATFORM_CLIENT_ID");
        config.platform.client_secret = var("MOZAIKS_PLATFORM_CLIENT_SECRET");
        config.platform.token_scope = var("MOZAIKS_PLATFORM_TOKEN_SCOPE");
        config.platform.entitlement_webhook_url = var("ENTITLEMENT_WEBHOOK_URL");

        config
    }
}
