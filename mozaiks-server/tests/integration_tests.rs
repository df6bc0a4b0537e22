//! HTTP surface tests against a fully wired in-memory runtime.

use std::sync::Arc;

use axum_test::TestServer;
use chrono::Utc;
use futures::future::BoxFuture;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};

use mozaiks_core::config::{AuthMode, RuntimeConfig};
use mozaiks_core::entitlement::EntitlementManifest;
use mozaiks_core::session::{ArtifactState, MemoryStore, SessionStore};
use mozaiks_core::test_utils::MockProvider;
use mozaiks_core::tool::ToolRegistry;
use mozaiks_plugins::{Executable, PluginContext};
use mozaiks_server::{build_router, AppState};

const SECRET: &str = "integration-secret";

struct NotesPlugin;

impl Executable for NotesPlugin {
    fn execute(
        &self,
        _request: Value,
        _context: PluginContext,
    ) -> BoxFuture<'static, Result<Value, String>> {
        Box::pin(async move { Ok(json!({ "items": [], "count": 0 })) })
    }
}

struct EchoPlugin;

impl Executable for EchoPlugin {
    fn execute(
        &self,
        request: Value,
        _context: PluginContext,
    ) -> BoxFuture<'static, Result<Value, String>> {
        Box::pin(async move { Ok(json!({ "received": request })) })
    }
}

struct Fixture {
    server: TestServer,
    state: AppState,
    _workflows: tempfile::TempDir,
    _plugins: tempfile::TempDir,
}

fn sign(claims: &Value) -> String {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn user_token(user_id: &str) -> String {
    sign(&json!({
        "sub": user_id,
        "app_id": "a_1",
        "roles": ["user"],
        "exp": Utc::now().timestamp() + 600,
    }))
}

fn service_token() -> String {
    sign(&json!({
        "sub": "platform-svc",
        "app_id": "a_1",
        "roles": ["internal_service"],
        "exp": Utc::now().timestamp() + 600,
    }))
}

fn fixture() -> Fixture {
    let workflows = tempfile::tempdir().unwrap();
    let plugins = tempfile::tempdir().unwrap();

    for name in ["AdvancedAnalytics", "notes_flow"] {
        let dir = workflows.path().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("workflow.json"),
            json!({
                "name": name,
                "agents": [{
                    "name": "Planner",
                    "system_prompt_template": "plan for {app_id}",
                    "llm_profile": { "provider": "openai", "model": "gpt-4o-mini" }
                }]
            })
            .to_string(),
        )
        .unwrap();
    }

    for (dir, descriptor) in [
        ("notes", json!({ "name": "notes", "entry_point": "notes" })),
        ("echo", json!({ "name": "echo", "entry_point": "echo" })),
    ] {
        let plugin_dir = plugins.path().join(dir);
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(plugin_dir.join("plugin.json"), descriptor.to_string()).unwrap();
    }

    let mut config = RuntimeConfig::default();
    config.app_id = "a_1".to_string();
    config.auth.mode = AuthMode::Local;
    config.auth.jwt_secret = Some(SECRET.to_string());
    config.workflows_root = workflows.path().to_string_lossy().to_string();
    config.plugins.plugins_root = plugins.path().to_string_lossy().to_string();
    config.execution_tokens.secret = "exec-secret".to_string();

    let state = AppState::build(
        config,
        Arc::new(MockProvider::new()),
        Arc::new(ToolRegistry::new()),
        Arc::new(MemoryStore::new()),
    );
    state.plugins.register_executable("notes", Arc::new(NotesPlugin));
    state.plugins.register_executable("echo", Arc::new(EchoPlugin));
    state.plugins.discover().unwrap();

    let server = TestServer::new(build_router(state.clone())).unwrap();
    Fixture {
        server,
        state,
        _workflows: workflows,
        _plugins: plugins,
    }
}

fn bearer(token: &str) -> (axum::http::HeaderName, axum::http::HeaderValue) {
    (
        axum::http::header::AUTHORIZATION,
        axum::http::HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    )
}

#[tokio::test]
async fn test_health_and_version_header() {
    let f = fixture();
    let response = f.server.get("/health").await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["app_id"], "a_1");
    assert_eq!(body["plugins_loaded"], 2);

    let version = response
        .headers()
        .get("x-mozaiks-runtime-version")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(version.starts_with("1.0"));
}

#[tokio::test]
async fn test_ready_and_info() {
    let f = fixture();
    f.server.get("/ready").await.assert_status_ok();

    let info: Value = f.server.get("/info").await.json();
    assert_eq!(info["name"], "mozaiks-runtime");
}

#[tokio::test]
async fn test_plugins_require_auth() {
    let f = fixture();
    let response = f.server.get("/api/plugins").await;
    assert_eq!(response.status_code(), 401);

    let body: Value = response.json();
    assert_eq!(body["error_code"], "AUTH_MISSING");
    assert_eq!(body["status_code"], 401);
}

#[tokio::test]
async fn test_plugin_listing() {
    let f = fixture();
    let (name, value) = bearer(&user_token("u_1"));
    let body: Value = f
        .server
        .get("/api/plugins")
        .add_header(name, value)
        .await
        .json();

    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["name"], "echo");
    assert_eq!(rows[1]["name"], "notes");
    assert_eq!(rows[1]["enabled"], true);
    assert_eq!(rows[1]["display_name"], "notes");
}

#[tokio::test]
async fn test_plugin_execute_happy_path() {
    let f = fixture();
    let (name, value) = bearer(&user_token("u_1"));

    let response = f
        .server
        .post("/api/execute/notes")
        .add_header(name, value)
        .json(&json!({ "action": "list", "user_id": "hacker" }))
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body, json!({ "items": [], "count": 0 }));
}

#[tokio::test]
async fn test_plugin_context_injection_overwrites_client_identity() {
    let f = fixture();
    let (name, value) = bearer(&user_token("u_1"));

    let response = f
        .server
        .post("/api/execute/echo")
        .add_header(name, value)
        .json(&json!({ "user_id": "hacker", "app_id": "a_evil", "keep": "me" }))
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["received"]["user_id"], "u_1");
    assert_eq!(body["received"]["app_id"], "a_1");
    assert_eq!(body["received"]["keep"], "me");
    assert_eq!(body["received"]["_context"]["user_id"], "u_1");
}

#[tokio::test]
async fn test_unknown_plugin_404() {
    let f = fixture();
    let (name, value) = bearer(&user_token("u_1"));
    let response = f
        .server
        .post("/api/execute/ghost")
        .add_header(name, value)
        .json(&json!({}))
        .await;
    assert_eq!(response.status_code(), 404);

    let body: Value = response.json();
    assert_eq!(body["error_code"], "PLUGIN_NOT_FOUND");
}

#[tokio::test]
async fn test_capability_denied_start_creates_no_session() {
    let f = fixture();

    // The default permissive manifest has no AdvancedAnalytics grant.
    let (name, value) = bearer(&user_token("u_1"));
    let response = f
        .server
        .post("/api/chats/a_1/AdvancedAnalytics/start")
        .add_header(name, value)
        .json(&json!({ "user_id": "u_1" }))
        .await;
    assert_eq!(response.status_code(), 403);

    let body: Value = response.json();
    assert_eq!(body["error_code"], "FEATURE_GATED");

    let sessions = f.state.store.list_sessions("a_1", "u_1").await.unwrap();
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn test_start_and_meta_round_trip() {
    let f = fixture();

    let mut manifest = EntitlementManifest::default_permissive("a_1");
    manifest
        .capabilities
        .insert("cap.workflow.notes_flow".to_string());
    f.state.entitlements.sync(manifest).unwrap();

    let (name, value) = bearer(&user_token("u_1"));
    let response = f
        .server
        .post("/api/chats/a_1/notes_flow/start")
        .add_header(name.clone(), value.clone())
        .json(&json!({ "user_id": "u_1" }))
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    let chat_id = body["chat_id"].as_str().unwrap();
    assert!(!body["reused"].as_bool().unwrap());
    assert_eq!(body["cache_seed"].as_str().unwrap().len(), 16);
    assert_eq!(
        body["websocket_url"],
        format!("/ws/notes_flow/a_1/{}/u_1", chat_id)
    );

    let meta: Value = f
        .server
        .get(&format!("/api/chats/meta/a_1/notes_flow/{}", chat_id))
        .add_header(name, value)
        .await
        .json();
    assert_eq!(meta["chat_id"], *chat_id);
    assert_eq!(meta["status"], "in_progress");
}

#[tokio::test]
async fn test_start_rejects_cross_tenant_path() {
    let f = fixture();
    let (name, value) = bearer(&user_token("u_1"));
    let response = f
        .server
        .post("/api/chats/a_other/notes_flow/start")
        .add_header(name, value)
        .json(&json!({ "user_id": "u_1" }))
        .await;
    assert_eq!(response.status_code(), 403);

    let body: Value = response.json();
    assert_eq!(body["error_code"], "TENANT_ISOLATION");
}

#[tokio::test]
async fn test_capabilities_listing() {
    let f = fixture();
    let mut manifest = EntitlementManifest::default_permissive("a_1");
    manifest
        .capabilities
        .insert("cap.workflow.notes_flow".to_string());
    f.state.entitlements.sync(manifest).unwrap();

    let (name, value) = bearer(&user_token("u_1"));
    let body: Value = f
        .server
        .get("/api/ai/capabilities")
        .add_header(name, value)
        .await
        .json();

    let capabilities = body["capabilities"].as_array().unwrap();
    assert_eq!(capabilities.len(), 2);
    let notes = capabilities
        .iter()
        .find(|c| c["id"] == "cap.workflow.notes_flow")
        .unwrap();
    assert_eq!(notes["allowed"], true);
    let analytics = capabilities
        .iter()
        .find(|c| c["id"] == "cap.workflow.AdvancedAnalytics")
        .unwrap();
    assert_eq!(analytics["allowed"], false);
    assert_eq!(body["plan"]["tier"], "unlimited");
}

#[tokio::test]
async fn test_launch_returns_execution_token() {
    let f = fixture();
    let mut manifest = EntitlementManifest::default_permissive("a_1");
    manifest
        .capabilities
        .insert("cap.workflow.notes_flow".to_string());
    f.state.entitlements.sync(manifest).unwrap();

    let (name, value) = bearer(&user_token("u_1"));
    let response = f
        .server
        .post("/api/ai/launch")
        .add_header(name, value)
        .json(&json!({ "capability_id": "cap.workflow.notes_flow" }))
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["expires_in"], 600);
    let claims = f
        .state
        .execution_tokens
        .verify(body["launch_token"].as_str().unwrap())
        .unwrap();
    assert_eq!(claims.sub, "u_1");
    assert_eq!(claims.app_id, "a_1");
    assert_eq!(claims.workflow_id, "notes_flow");
    assert_eq!(claims.chat_id, body["chat_id"].as_str().unwrap());
}

#[tokio::test]
async fn test_internal_sync_requires_service_token() {
    let f = fixture();
    let manifest = serde_json::to_value(EntitlementManifest::default_permissive("a_1")).unwrap();

    let (name, value) = bearer(&user_token("u_1"));
    let response = f
        .server
        .post("/api/v1/entitlements/a_1/sync")
        .add_header(name, value)
        .json(&manifest)
        .await;
    assert_eq!(response.status_code(), 403);

    let (name, value) = bearer(&service_token());
    let response = f
        .server
        .post("/api/v1/entitlements/a_1/sync")
        .add_header(name, value)
        .json(&manifest)
        .await;
    response.assert_status_ok();
}

#[tokio::test]
async fn test_entitlements_sync_app_mismatch() {
    let f = fixture();
    let manifest = serde_json::to_value(EntitlementManifest::default_permissive("a_2")).unwrap();

    let (name, value) = bearer(&service_token());
    let response = f
        .server
        .post("/api/v1/entitlements/a_1/sync")
        .add_header(name, value)
        .json(&manifest)
        .await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_artifact_cached_read() {
    let f = fixture();
    f.state
        .store
        .upsert_artifact(&ArtifactState {
            artifact_id: "card_1".to_string(),
            chat_id: "c1".to_string(),
            app_id: "a_1".to_string(),
            workflow_name: "notes_flow".to_string(),
            state: json!({ "vote_status": "done" }),
            updated_at: Utc::now(),
            expires_at: None,
        })
        .await
        .unwrap();

    let (name, value) = bearer(&user_token("u_1"));

    let body: Value = f
        .server
        .get("/api/artifacts/card_1/cached?app_id=a_1&chat_id=c1")
        .add_header(name.clone(), value.clone())
        .await
        .json();
    assert_eq!(body["state"]["vote_status"], "done");

    // Tenancy mismatch: 403, not 404.
    let response = f
        .server
        .get("/api/artifacts/card_1/cached?app_id=a_other")
        .add_header(name.clone(), value.clone())
        .await;
    assert_eq!(response.status_code(), 403);

    let response = f
        .server
        .get("/api/artifacts/ghost/cached?app_id=a_1")
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_workflows_available() {
    let f = fixture();
    let (name, value) = bearer(&user_token("u_1"));
    let body: Value = f
        .server
        .get("/api/workflows/a_1/available")
        .add_header(name, value)
        .await
        .json();

    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r["available"] == false));
    assert_eq!(rows[0]["locked_reason"], "capability_required");
}

#[tokio::test]
async fn test_navigation_defaults_empty() {
    let f = fixture();
    let (name, value) = bearer(&user_token("u_1"));
    let body: Value = f
        .server
        .get("/api/navigation")
        .add_header(name, value)
        .await
        .json();
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_sessions_list_scoped_to_caller() {
    let f = fixture();
    let (name, value) = bearer(&user_token("u_1"));
    let response = f
        .server
        .get("/api/sessions/list/a_1/u_other")
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), 403);
}
