//! Application state: every component the handlers depend on, wired
//! once at startup. No hidden module-level state.

use std::sync::Arc;

use mozaiks_core::auth::{ExecutionTokenService, TokenValidator};
use mozaiks_core::config::RuntimeConfig;
use mozaiks_core::entitlement::{AuditLog, EntitlementStore};
use mozaiks_core::orchestrator::{Orchestrator, OrchestratorDeps};
use mozaiks_core::pipeline::EventDispatcher;
use mozaiks_core::provider::ModelProvider;
use mozaiks_core::session::{spawn_artifact_pruner, PersistenceSubscriber, SessionStore};
use mozaiks_core::tool::ToolRegistry;
use mozaiks_core::usage::{PlatformClient, TokenCounters, UsageFlusher, UsageRecorder};
use mozaiks_core::workflow::BundleLoader;
use mozaiks_plugins::{Dispatcher as PluginDispatcher, PluginRegistry};

use crate::actions::ActionExecutor;
use crate::ws::ConnectionRegistry;

/// Shared application state, cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RuntimeConfig>,
    pub validator: Arc<TokenValidator>,
    pub execution_tokens: Arc<ExecutionTokenService>,
    pub entitlements: Arc<EntitlementStore>,
    pub store: Arc<dyn SessionStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub dispatcher: Arc<EventDispatcher>,
    pub bundles: Arc<BundleLoader>,
    pub plugins: Arc<PluginRegistry>,
    pub plugin_dispatcher: Arc<PluginDispatcher>,
    pub connections: Arc<ConnectionRegistry>,
    pub actions: Arc<ActionExecutor>,
    pub usage: Arc<UsageRecorder>,
}

impl AppState {
    /// Wire the full runtime from a configuration, a model provider, a
    /// tool registry, and a session store.
    pub fn build(
        config: RuntimeConfig,
        provider: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let config = Arc::new(config);

        let audit = Arc::new(AuditLog::new());
        let entitlements = Arc::new(EntitlementStore::new(
            config.entitlement_signing_key.clone(),
            audit.clone(),
        ));
        let validator = Arc::new(TokenValidator::new(config.auth.clone(), &config.app_id));
        let execution_tokens = Arc::new(ExecutionTokenService::new(
            config.execution_tokens.clone(),
        ));

        let usage = Arc::new(UsageRecorder::new(
            config.usage.buffer_capacity,
            config.usage.flush_batch_size,
            audit.clone(),
        ));
        let counters = Arc::new(TokenCounters::new());
        let bundles = Arc::new(BundleLoader::new(&config.workflows_root));

        let dispatcher = Arc::new(EventDispatcher::new());
        dispatcher.set_persistence(Arc::new(PersistenceSubscriber::new(store.clone())));

        let connections = Arc::new(ConnectionRegistry::new(
            config.transport.clone(),
            config.agui_enabled,
            audit.clone(),
        ));
        dispatcher.set_transport(connections.clone());
        if let Some(webhook_url) = &config.platform.entitlement_webhook_url {
            dispatcher.add_handler(Arc::new(
                mozaiks_core::pipeline::WebhookSubscriber::new(webhook_url),
            ));
        }

        let plugins = Arc::new(PluginRegistry::new(&config.plugins.plugins_root));
        let plugin_dispatcher = Arc::new(PluginDispatcher::new(
            plugins.clone(),
            entitlements.clone(),
            usage.clone(),
            config.plugins.timeout,
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            config.orchestrator.clone(),
            OrchestratorDeps {
                bundles: bundles.clone(),
                tools: tools.clone(),
                provider,
                entitlements: entitlements.clone(),
                store: store.clone(),
                dispatcher: dispatcher.clone(),
                usage: usage.clone(),
                counters,
            },
        ));

        let actions = Arc::new(ActionExecutor::new(
            tools,
            entitlements.clone(),
            store.clone(),
            dispatcher.clone(),
            config.plugins.timeout,
            config.artifact_state_ttl,
        ));

        Self {
            config,
            validator,
            execution_tokens,
            entitlements,
            store,
            orchestrator,
            dispatcher,
            bundles,
            plugins,
            plugin_dispatcher,
            connections,
            actions,
            usage,
        }
    }

    /// Start the background tasks: the usage flusher and the artifact
    /// pruner. Returns the join handles so hosts can abort on shutdown.
    pub fn spawn_background_tasks(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let platform = Arc::new(PlatformClient::new(self.config.platform.clone()));
        let flusher = UsageFlusher::new(self.usage.clone(), platform, self.config.usage.clone());

        let mut handles = vec![flusher.spawn()];
        if self.config.artifact_state_ttl.is_some() {
            handles.push(spawn_artifact_pruner(
                self.store.clone(),
                std::time::Duration::from_secs(60),
            ));
        }
        handles
    }
}
