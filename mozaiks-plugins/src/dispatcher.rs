//! Plugin execution dispatcher.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use mozaiks_core::entitlement::{EntitlementStore, LimitCheck};
use mozaiks_core::usage::{UsageEvent, UsageRecorder};
use mozaiks_core::Identity;

use crate::registry::{LoadedPlugin, PluginRegistry};
use crate::{PluginContext, PluginError};

/// Dispatches `POST /api/execute/{plugin}` requests.
///
/// Order of operations: lookup, capability check, declared entitlement
/// actions (pre-flight), timed execution, post-flight consumption.
/// Plugins share no mutable state through the dispatcher.
pub struct Dispatcher {
    registry: Arc<PluginRegistry>,
    entitlements: Arc<EntitlementStore>,
    usage: Arc<UsageRecorder>,
    timeout: Duration,
    /// Consumable-limit usage per `(app_id, user_id, limit)`.
    consumed: Mutex<HashMap<(String, String, String), i64>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<PluginRegistry>,
        entitlements: Arc<EntitlementStore>,
        usage: Arc<UsageRecorder>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            entitlements,
            usage,
            timeout,
            consumed: Mutex::new(HashMap::new()),
        }
    }

    /// Execute a plugin for a verified identity.
    ///
    /// The returned value is the plugin's response body; plugin-reported
    /// errors come back as `{ "error": ... }` payloads inside `Ok`.
    pub async fn execute(
        &self,
        plugin_name: &str,
        body: Value,
        identity: &Identity,
    ) -> Result<Value, PluginError> {
        let plugin = self
            .registry
            .get(plugin_name)
            .ok_or_else(|| PluginError::NotFound(plugin_name.to_string()))?;

        if !plugin.descriptor.enabled {
            return Err(PluginError::Disabled(plugin_name.to_string()));
        }

        self.check_capability(&plugin, identity)?;
        let consumable = self.preflight_entitlements(&plugin, identity)?;

        let request = inject_context(body, identity);
        let context = PluginContext::from(identity);

        // Supervised execution: the plugin future runs on its own task so
        // a panic surfaces as PLUGIN_CRASHED instead of unwinding here.
        let future = plugin.executable.execute(request, context);
        let task = tokio::spawn(future);
        let result = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => return Err(PluginError::Timeout(plugin_name.to_string())),
            Ok(Err(join_error)) => {
                tracing::error!(plugin = plugin_name, error = %join_error, "plugin panicked");
                return Err(PluginError::Crashed(plugin_name.to_string()));
            }
            Ok(Ok(result)) => result,
        };

        let response = match result {
            Ok(value) => value,
            // Plugin-reported failures are boxed, never propagated.
            Err(message) => serde_json::json!({ "error": message }),
        };

        let succeeded = response.get("error").is_none();
        if succeeded {
            if let Some(limit) = consumable {
                self.consume(identity, &limit);
            }
        }

        self.usage.record(UsageEvent::new(
            "plugin.executed",
            &identity.app_id,
            &identity.user_id,
            serde_json::json!({ "plugin": plugin_name, "success": succeeded }),
        ));

        Ok(response)
    }

    /// Enforce `cap.plugin.<name>.execute` when the manifest gates
    /// plugins at all; manifests with no plugin capabilities leave
    /// plugins ungated.
    fn check_capability(
        &self,
        plugin: &LoadedPlugin,
        identity: &Identity,
    ) -> Result<(), PluginError> {
        let manifest = self
            .entitlements
            .get(&identity.app_id, Some(&identity.user_id));
        let gated = manifest
            .capabilities
            .iter()
            .any(|c| c.starts_with("cap.plugin."));
        if !gated {
            return Ok(());
        }

        let capability = plugin.descriptor.execute_capability();
        if self
            .entitlements
            .has(&identity.app_id, Some(&identity.user_id), &capability)
        {
            Ok(())
        } else {
            Err(PluginError::FeatureGated(capability))
        }
    }

    /// Feature gate and consumable-limit pre-flight. Returns the limit
    /// name to consume on success, if any.
    fn preflight_entitlements(
        &self,
        plugin: &LoadedPlugin,
        identity: &Identity,
    ) -> Result<Option<String>, PluginError> {
        let Some(entitlements) = &plugin.descriptor.entitlements else {
            return Ok(None);
        };

        if let Some(feature) = &entitlements.feature {
            let manifest = self
                .entitlements
                .get(&identity.app_id, Some(&identity.user_id));
            if !manifest.features.get(feature).copied().unwrap_or(false) {
                return Err(PluginError::FeatureGated(feature.clone()));
            }
        }

        if let Some(limit) = &entitlements.consumes_limit {
            let limit_id = format!("cap.limit.{}", limit);
            let used = self.used(identity, limit);
            let check = self.entitlements.check_limit(
                &identity.app_id,
                Some(&identity.user_id),
                &limit_id,
                used,
            );
            if check == LimitCheck::Exceeded {
                return Err(PluginError::LimitExceeded(limit_id));
            }
            return Ok(Some(limit.clone()));
        }

        Ok(None)
    }

    fn used(&self, identity: &Identity, limit: &str) -> i64 {
        *self
            .consumed
            .lock()
            .get(&(
                identity.app_id.clone(),
                identity.user_id.clone(),
                limit.to_string(),
            ))
            .unwrap_or(&0)
    }

    fn consume(&self, identity: &Identity, limit: &str) {
        *self
            .consumed
            .lock()
            .entry((
                identity.app_id.clone(),
                identity.user_id.clone(),
                limit.to_string(),
            ))
            .or_insert(0) += 1;
    }
}

/// Overwrite server-derived fields in the request body. Client-supplied
/// values for these keys are always replaced.
fn inject_context(body: Value, identity: &Identity) -> Value {
    let mut object = match body {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            if !other.is_null() {
                map.insert("payload".to_string(), other);
            }
            map
        }
    };

    object.insert(
        "user_id".to_string(),
        Value::String(identity.user_id.clone()),
    );
    object.insert("app_id".to_string(), Value::String(identity.app_id.clone()));
    object.insert(
        "user_jwt".to_string(),
        Value::String(identity.raw_token.clone()),
    );
    object.insert("_context".to_string(), identity.context_value());

    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Executable;
    use futures::future::BoxFuture;
    use mozaiks_core::entitlement::{AuditLog, EntitlementManifest};
    use std::collections::BTreeSet;

    struct Echo;
    impl Executable for Echo {
        fn execute(
            &self,
            request: Value,
            _context: PluginContext,
        ) -> BoxFuture<'static, Result<Value, String>> {
            Box::pin(async move { Ok(serde_json::json!({ "received": request })) })
        }
    }

    struct Slow;
    impl Executable for Slow {
        fn execute(
            &self,
            _request: Value,
            _context: PluginContext,
        ) -> BoxFuture<'static, Result<Value, String>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Value::Null)
            })
        }
    }

    struct Panicker;
    impl Executable for Panicker {
        fn execute(
            &self,
            _request: Value,
            _context: PluginContext,
        ) -> BoxFuture<'static, Result<Value, String>> {
            Box::pin(async move { panic!("boom") })
        }
    }

    struct Failing;
    impl Executable for Failing {
        fn execute(
            &self,
            _request: Value,
            _context: PluginContext,
        ) -> BoxFuture<'static, Result<Value, String>> {
            Box::pin(async move { Err("business rule violated".to_string()) })
        }
    }

    fn identity() -> Identity {
        Identity {
            app_id: "a_1".to_string(),
            user_id: "u_1".to_string(),
            username: Some("ada".to_string()),
            roles: BTreeSet::from(["user".to_string()]),
            is_superadmin: false,
            raw_token: "jwt-token".to_string(),
        }
    }

    fn registry_with(descriptors: &[Value]) -> Arc<PluginRegistry> {
        let root = tempfile::tempdir().unwrap();
        for descriptor in descriptors {
            let dir = root.path().join(descriptor["name"].as_str().unwrap());
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("plugin.json"), descriptor.to_string()).unwrap();
        }
        let registry = PluginRegistry::new(root.path());
        registry.register_executable("echo", Arc::new(Echo));
        registry.register_executable("slow", Arc::new(Slow));
        registry.register_executable("panicker", Arc::new(Panicker));
        registry.register_executable("failing", Arc::new(Failing));
        registry.discover().unwrap();
        // Keep the tempdir alive for the test duration by leaking it;
        // descriptors are already read into the index.
        std::mem::forget(root);
        registry.into()
    }

    fn dispatcher(registry: Arc<PluginRegistry>) -> Dispatcher {
        let audit = Arc::new(AuditLog::new());
        Dispatcher::new(
            registry,
            Arc::new(EntitlementStore::new(None, audit.clone())),
            Arc::new(UsageRecorder::new(100, 100, audit)),
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn test_context_injection_overwrites_client_fields() {
        let registry = registry_with(&[
            serde_json::json!({ "name": "notes", "entry_point": "echo" }),
        ]);
        let dispatcher = dispatcher(registry);

        let response = dispatcher
            .execute(
                "notes",
                serde_json::json!({ "action": "list", "user_id": "hacker", "app_id": "a_evil" }),
                &identity(),
            )
            .await
            .unwrap();

        let received = &response["received"];
        assert_eq!(received["user_id"], "u_1");
        assert_eq!(received["app_id"], "a_1");
        assert_eq!(received["user_jwt"], "jwt-token");
        assert_eq!(received["action"], "list");
        assert_eq!(received["_context"]["is_superadmin"], false);
    }

    #[tokio::test]
    async fn test_unknown_plugin() {
        let registry = registry_with(&[]);
        let err = dispatcher(registry)
            .execute("ghost", Value::Null, &identity())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_disabled_plugin() {
        let registry = registry_with(&[serde_json::json!({
            "name": "off", "entry_point": "echo", "enabled": false
        })]);
        let err = dispatcher(registry)
            .execute("off", Value::Null, &identity())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Disabled(_)));
    }

    #[tokio::test]
    async fn test_timeout_is_plugin_timeout() {
        let registry = registry_with(&[
            serde_json::json!({ "name": "slowpoke", "entry_point": "slow" }),
        ]);
        let err = dispatcher(registry)
            .execute("slowpoke", Value::Null, &identity())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Timeout(_)));
        assert_eq!(err.status_code(), 504);
    }

    #[tokio::test]
    async fn test_panic_is_plugin_crashed() {
        let registry = registry_with(&[
            serde_json::json!({ "name": "bad", "entry_point": "panicker" }),
        ]);
        let err = dispatcher(registry)
            .execute("bad", Value::Null, &identity())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Crashed(_)));
    }

    #[tokio::test]
    async fn test_plugin_error_is_boxed_not_propagated() {
        let registry = registry_with(&[
            serde_json::json!({ "name": "strict", "entry_point": "failing" }),
        ]);
        let response = dispatcher(registry)
            .execute("strict", Value::Null, &identity())
            .await
            .unwrap();
        assert_eq!(response["error"], "business rule violated");
    }

    #[tokio::test]
    async fn test_feature_gate() {
        let registry = registry_with(&[serde_json::json!({
            "name": "export", "entry_point": "echo",
            "entitlements": { "feature": "export" }
        })]);
        let audit = Arc::new(AuditLog::new());
        let entitlements = Arc::new(EntitlementStore::new(None, audit.clone()));
        let dispatcher = Dispatcher::new(
            registry,
            entitlements.clone(),
            Arc::new(UsageRecorder::new(100, 100, audit)),
            Duration::from_millis(200),
        );

        // Default manifest has no features: gated.
        let err = dispatcher
            .execute("export", Value::Null, &identity())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::FeatureGated(_)));

        // Enable the feature and retry.
        let mut manifest = EntitlementManifest::default_permissive("a_1");
        manifest.features.insert("export".to_string(), true);
        entitlements.sync(manifest).unwrap();
        assert!(dispatcher
            .execute("export", Value::Null, &identity())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_capability_gating_when_manifest_declares_plugins() {
        let registry = registry_with(&[
            serde_json::json!({ "name": "notes", "entry_point": "echo" }),
            serde_json::json!({ "name": "admin", "entry_point": "echo" }),
        ]);
        let audit = Arc::new(AuditLog::new());
        let entitlements = Arc::new(EntitlementStore::new(None, audit.clone()));
        let mut manifest = EntitlementManifest::default_permissive("a_1");
        manifest
            .capabilities
            .insert("cap.plugin.notes.execute".to_string());
        entitlements.sync(manifest).unwrap();

        let dispatcher = Dispatcher::new(
            registry,
            entitlements,
            Arc::new(UsageRecorder::new(100, 100, audit)),
            Duration::from_millis(200),
        );

        assert!(dispatcher
            .execute("notes", Value::Null, &identity())
            .await
            .is_ok());
        let err = dispatcher
            .execute("admin", Value::Null, &identity())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::FeatureGated(_)));
    }

    #[tokio::test]
    async fn test_consumable_limit_exhaustion() {
        let registry = registry_with(&[serde_json::json!({
            "name": "export", "entry_point": "echo",
            "entitlements": { "consumes_limit": "exports_daily" }
        })]);
        let audit = Arc::new(AuditLog::new());
        let entitlements = Arc::new(EntitlementStore::new(None, audit.clone()));
        let mut manifest = EntitlementManifest::default_permissive("a_1");
        manifest
            .limits
            .insert("cap.limit.exports_daily".to_string(), 2);
        manifest.token_budget.total_tokens.enforcement =
            mozaiks_core::entitlement::EnforcementMode::Hard;
        entitlements.sync(manifest).unwrap();

        let dispatcher = Dispatcher::new(
            registry,
            entitlements,
            Arc::new(UsageRecorder::new(100, 100, audit)),
            Duration::from_millis(200),
        );

        assert!(dispatcher.execute("export", Value::Null, &identity()).await.is_ok());
        assert!(dispatcher.execute("export", Value::Null, &identity()).await.is_ok());
        let err = dispatcher
            .execute("export", Value::Null, &identity())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::LimitExceeded(_)));
    }
}
