//! End-to-end orchestrator behavior against scripted providers.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};

use mozaiks_core::config::OrchestratorConfig;
use mozaiks_core::entitlement::{AuditLog, EntitlementManifest, EntitlementStore};
use mozaiks_core::orchestrator::{Orchestrator, OrchestratorDeps, StartRequest};
use mozaiks_core::pipeline::EventDispatcher;
use mozaiks_core::session::{MemoryStore, PersistenceSubscriber, SessionStore};
use mozaiks_core::test_utils::{EventCapture, MockProvider};
use mozaiks_core::tool::{FnTool, ToolRegistry};
use mozaiks_core::usage::{TokenCounters, UsageRecorder};
use mozaiks_core::workflow::BundleLoader;
use mozaiks_core::Error;

struct Harness {
    orchestrator: Arc<Orchestrator>,
    provider: Arc<MockProvider>,
    capture: Arc<EventCapture>,
    store: Arc<MemoryStore>,
    entitlements: Arc<EntitlementStore>,
    counters: Arc<TokenCounters>,
    _workflows: tempfile::TempDir,
}

fn write_bundle(root: &Path, name: &str, bundle: &Value) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("workflow.json"),
        serde_json::to_string_pretty(bundle).unwrap(),
    )
    .unwrap();
}

fn manifest_with(capabilities: &[&str]) -> EntitlementManifest {
    let mut manifest = EntitlementManifest::default_permissive("a_1");
    for capability in capabilities {
        manifest.capabilities.insert(capability.to_string());
    }
    manifest
}

fn harness(bundles: &[(&str, Value)], capabilities: &[&str]) -> Harness {
    let workflows = tempfile::tempdir().unwrap();
    for (name, bundle) in bundles {
        write_bundle(workflows.path(), name, bundle);
    }

    let audit = Arc::new(AuditLog::new());
    let entitlements = Arc::new(EntitlementStore::new(None, audit.clone()));
    entitlements.sync(manifest_with(capabilities)).unwrap();

    let store = Arc::new(MemoryStore::new());
    let dispatcher = Arc::new(EventDispatcher::new());
    dispatcher.set_persistence(Arc::new(PersistenceSubscriber::new(store.clone())));
    let capture = EventCapture::new();
    dispatcher.set_transport(capture.clone());

    let provider = Arc::new(MockProvider::new());
    let tools = Arc::new(ToolRegistry::new());
    tools.register(Arc::new(FnTool::new("record_pattern", |args, _ctx| {
        Box::pin(async move { Ok(json!({ "recorded": args["name"] })) })
    })));
    tools.register(Arc::new(FnTool::new("failing_tool", |_args, _ctx| {
        Box::pin(async move { Err(mozaiks_core::tool::ToolError::from("kaput")) })
    })));

    let counters = Arc::new(TokenCounters::new());
    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorConfig {
            ui_tool_timeout: std::time::Duration::from_secs(5),
            ..OrchestratorConfig::default()
        },
        OrchestratorDeps {
            bundles: Arc::new(BundleLoader::new(workflows.path())),
            tools,
            provider: provider.clone(),
            entitlements: entitlements.clone(),
            store: store.clone(),
            dispatcher,
            usage: Arc::new(UsageRecorder::new(100, 100, audit)),
            counters: counters.clone(),
        },
    ));

    Harness {
        orchestrator,
        provider,
        capture,
        store,
        entitlements,
        counters,
        _workflows: workflows,
    }
}

fn pattern_bundle() -> Value {
    json!({
        "name": "patterns",
        "agents": [{
            "name": "PatternAgent",
            "system_prompt_template": "Pick a pattern for {app_id}.",
            "llm_profile": { "provider": "openai", "model": "gpt-4o-mini" },
            "structured_output": "SelectPattern",
            "auto_tool_mode": true
        }],
        "tools": [{
            "name": "record_pattern",
            "target": "PatternAgent",
            "kind": "agent_tool",
            "auto_invoke": true
        }],
        "structured_outputs": {
            "SelectPattern": {
                "name": "SelectPattern",
                "fields": { "name": { "type": "string" } }
            }
        }
    })
}

fn start_request(workflow: &str) -> StartRequest {
    StartRequest {
        app_id: "a_1".to_string(),
        workflow_name: workflow.to_string(),
        user_id: "u_1".to_string(),
        client_request_id: None,
        force_new: false,
        required_min_tokens: 0,
    }
}

#[tokio::test]
async fn test_auto_tool_event_sequence() {
    let h = harness(
        &[("patterns", pattern_bundle())],
        &["cap.workflow.patterns", "cap.tool.record_pattern"],
    );
    h.provider.push_structured(&json!({ "name": "crm" }));

    let outcome = h.orchestrator.start(start_request("patterns")).await.unwrap();
    assert!(!outcome.reused);

    assert!(h.capture.wait_for(&outcome.chat_id, "chat.input_request").await);
    assert!(h.orchestrator.submit_input(&outcome.chat_id, "go".into()).await);
    assert!(
        h.capture
            .wait_for(&outcome.chat_id, "chat.orchestration.run_completed")
            .await
    );

    let types = h.capture.types_for(&outcome.chat_id);
    let orchestration: Vec<&str> = types
        .iter()
        .copied()
        .filter(|t| {
            t.starts_with("chat.orchestration.")
                || *t == "chat.structured_output_ready"
                || *t == "chat.tool_call"
                || *t == "chat.tool_response"
        })
        .collect();
    assert_eq!(
        orchestration,
        vec![
            "chat.orchestration.run_started",
            "chat.orchestration.agent_started",
            "chat.structured_output_ready",
            "chat.orchestration.tool_started",
            "chat.tool_call",
            "chat.tool_response",
            "chat.orchestration.tool_completed",
            "chat.orchestration.agent_completed",
            "chat.orchestration.run_completed",
        ]
    );

    // Sequence numbers are strictly increasing for the chat.
    let seqs: Vec<u64> = h
        .capture
        .envelopes()
        .iter()
        .filter(|e| e.chat_id.as_deref() == Some(outcome.chat_id.as_str()))
        .map(|e| e.sequence_no.unwrap())
        .collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));

    // The auto-tool response carries the tool's result.
    let envelopes = h.capture.envelopes();
    let response = envelopes
        .iter()
        .find(|e| e.event.wire_type() == "chat.tool_response")
        .unwrap();
    let value = serde_json::to_value(response).unwrap();
    assert_eq!(value["data"]["status"], "ok");
    assert_eq!(value["data"]["result"]["recorded"], "crm");
}

#[tokio::test]
async fn test_capability_denied_creates_no_session() {
    let h = harness(&[("patterns", pattern_bundle())], &[]);
    let err = h.orchestrator.start(start_request("patterns")).await.unwrap_err();
    assert_eq!(err.code(), "FEATURE_GATED");
    assert_eq!(err.status_code(), 403);

    let sessions = h.store.list_sessions("a_1", "u_1").await.unwrap();
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn test_unknown_workflow_is_404() {
    let h = harness(&[], &[]);
    let err = h.orchestrator.start(start_request("ghost")).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_idempotent_start_reuses_session() {
    let h = harness(
        &[("patterns", pattern_bundle())],
        &["cap.workflow.patterns", "cap.tool.record_pattern"],
    );
    // Two structured turns in case both runs consume one.
    h.provider.push_structured(&json!({ "name": "crm" }));
    h.provider.push_structured(&json!({ "name": "crm" }));

    let mut request = start_request("patterns");
    request.client_request_id = Some("req-1".to_string());

    let first = h.orchestrator.start(request.clone()).await.unwrap();
    let second = h.orchestrator.start(request.clone()).await.unwrap();
    assert_eq!(first.chat_id, second.chat_id);
    assert!(second.reused);

    let mut forced = request;
    forced.force_new = true;
    let third = h.orchestrator.start(forced).await.unwrap();
    assert_ne!(first.chat_id, third.chat_id);
}

#[tokio::test]
async fn test_concurrent_idempotent_starts_share_one_session() {
    let h = harness(
        &[("patterns", pattern_bundle())],
        &["cap.workflow.patterns", "cap.tool.record_pattern"],
    );
    h.provider.push_structured(&json!({ "name": "crm" }));
    h.provider.push_structured(&json!({ "name": "crm" }));

    let mut request = start_request("patterns");
    request.client_request_id = Some("req-race".to_string());

    // Race two starts with the same idempotency key on separate tasks.
    let orchestrator_a = h.orchestrator.clone();
    let orchestrator_b = h.orchestrator.clone();
    let request_a = request.clone();
    let request_b = request;
    let (first, second) = tokio::join!(
        tokio::spawn(async move { orchestrator_a.start(request_a).await }),
        tokio::spawn(async move { orchestrator_b.start(request_b).await }),
    );
    let first = first.unwrap().unwrap();
    let second = second.unwrap().unwrap();

    assert_eq!(first.chat_id, second.chat_id);
    assert_eq!(first.cache_seed, second.cache_seed);
    // Exactly one of the two created the session; the other reused it.
    assert_ne!(first.reused, second.reused);

    let sessions = h.store.list_sessions("a_1", "u_1").await.unwrap();
    assert_eq!(sessions.len(), 1);
}

#[tokio::test]
async fn test_insufficient_tokens() {
    let h = harness(&[("patterns", pattern_bundle())], &["cap.workflow.patterns"]);

    let mut manifest = manifest_with(&["cap.workflow.patterns"]);
    manifest.token_budget.total_tokens = mozaiks_core::entitlement::BudgetBucket {
        limit: 100,
        used: 0,
        enforcement: mozaiks_core::entitlement::EnforcementMode::Hard,
    };
    h.entitlements.sync(manifest).unwrap();
    h.counters.add("a_1", "u_1", 90);

    let mut request = start_request("patterns");
    request.required_min_tokens = 50;
    let err = h.orchestrator.start(request).await.unwrap_err();
    assert!(matches!(err, Error::InsufficientTokens { .. }));
    assert_eq!(err.status_code(), 402);
}

#[tokio::test]
async fn test_prerequisite_gating() {
    let mut bundle = pattern_bundle();
    bundle["prerequisites"] = json!(["onboarding"]);
    let h = harness(&[("patterns", bundle)], &["cap.workflow.patterns"]);

    let err = h.orchestrator.start(start_request("patterns")).await.unwrap_err();
    assert!(matches!(err, Error::PrerequisiteNotMet { .. }));
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn test_cancellation_between_turns() {
    let h = harness(
        &[("patterns", pattern_bundle())],
        &["cap.workflow.patterns", "cap.tool.record_pattern"],
    );

    let outcome = h.orchestrator.start(start_request("patterns")).await.unwrap();
    assert!(h.capture.wait_for(&outcome.chat_id, "chat.input_request").await);

    assert!(h.orchestrator.cancel(&outcome.chat_id));
    assert!(
        h.capture
            .wait_for(&outcome.chat_id, "chat.orchestration.run_cancelled")
            .await
    );

    let session = h.store.get_session("a_1", &outcome.chat_id).await.unwrap().unwrap();
    assert_eq!(session.status, mozaiks_core::session::ChatStatus::Cancelled);
}

#[tokio::test]
async fn test_structured_output_retry_then_failure() {
    let h = harness(
        &[("patterns", pattern_bundle())],
        &["cap.workflow.patterns", "cap.tool.record_pattern"],
    );
    // Wrong shape twice: one corrective retry, then run failure.
    h.provider.push_structured(&json!({ "wrong": 1 }));
    h.provider.push_structured(&json!({ "wrong": 1 }));

    let outcome = h.orchestrator.start(start_request("patterns")).await.unwrap();
    h.capture.wait_for(&outcome.chat_id, "chat.input_request").await;
    h.orchestrator.submit_input(&outcome.chat_id, "go".into()).await;

    assert!(
        h.capture
            .wait_for(&outcome.chat_id, "chat.orchestration.run_failed")
            .await
    );
    let envelopes = h.capture.envelopes();
    let failed = envelopes
        .iter()
        .find(|e| e.event.wire_type() == "chat.orchestration.run_failed")
        .unwrap();
    let value = serde_json::to_value(failed).unwrap();
    assert_eq!(value["data"]["code"], "STRUCTURED_OUTPUT_INVALID");
    assert_eq!(h.provider.remaining(), 0);
}

#[tokio::test]
async fn test_structured_output_retry_recovers() {
    let h = harness(
        &[("patterns", pattern_bundle())],
        &["cap.workflow.patterns", "cap.tool.record_pattern"],
    );
    h.provider.push_structured(&json!({ "wrong": 1 }));
    h.provider.push_structured(&json!({ "name": "crm" }));

    let outcome = h.orchestrator.start(start_request("patterns")).await.unwrap();
    h.capture.wait_for(&outcome.chat_id, "chat.input_request").await;
    h.orchestrator.submit_input(&outcome.chat_id, "go".into()).await;

    assert!(
        h.capture
            .wait_for(&outcome.chat_id, "chat.orchestration.run_completed")
            .await
    );
}

#[tokio::test]
async fn test_tool_failure_does_not_abort_run() {
    let bundle = json!({
        "name": "tools",
        "agents": [{
            "name": "Worker",
            "system_prompt_template": "work",
            "llm_profile": { "provider": "openai", "model": "gpt-4o-mini" }
        }],
        "tools": [{
            "name": "failing_tool",
            "target": "Worker",
            "kind": "agent_tool"
        }]
    });
    let h = harness(
        &[("tools", bundle)],
        &["cap.workflow.tools", "cap.tool.failing_tool"],
    );
    h.provider.push_tool_call("failing_tool", json!({}));

    let outcome = h.orchestrator.start(start_request("tools")).await.unwrap();
    h.capture.wait_for(&outcome.chat_id, "chat.input_request").await;
    h.orchestrator.submit_input(&outcome.chat_id, "go".into()).await;

    assert!(
        h.capture
            .wait_for(&outcome.chat_id, "chat.orchestration.run_completed")
            .await
    );

    let envelopes = h.capture.envelopes();
    let response = envelopes
        .iter()
        .find(|e| e.event.wire_type() == "chat.tool_response")
        .unwrap();
    let value = serde_json::to_value(response).unwrap();
    assert_eq!(value["data"]["status"], "error");
}

#[tokio::test]
async fn test_tool_capability_denied_is_error_result() {
    let bundle = json!({
        "name": "tools",
        "agents": [{
            "name": "Worker",
            "system_prompt_template": "work",
            "llm_profile": { "provider": "openai", "model": "gpt-4o-mini" }
        }],
        "tools": [{
            "name": "record_pattern",
            "target": "Worker",
            "kind": "agent_tool"
        }]
    });
    // Workflow allowed, tool capability missing.
    let h = harness(&[("tools", bundle)], &["cap.workflow.tools"]);
    h.provider.push_tool_call("record_pattern", json!({ "name": "x" }));

    let outcome = h.orchestrator.start(start_request("tools")).await.unwrap();
    h.capture.wait_for(&outcome.chat_id, "chat.input_request").await;
    h.orchestrator.submit_input(&outcome.chat_id, "go".into()).await;
    h.capture
        .wait_for(&outcome.chat_id, "chat.orchestration.run_completed")
        .await;

    let envelopes = h.capture.envelopes();
    let response = envelopes
        .iter()
        .find(|e| e.event.wire_type() == "chat.tool_response")
        .unwrap();
    let value = serde_json::to_value(response).unwrap();
    assert_eq!(value["data"]["error"], "CAPABILITY_DENIED");
}

#[tokio::test]
async fn test_ui_tool_round_trip() {
    let bundle = json!({
        "name": "forms",
        "agents": [{
            "name": "FormAgent",
            "system_prompt_template": "collect",
            "llm_profile": { "provider": "openai", "model": "gpt-4o-mini" }
        }],
        "tools": [{
            "name": "collect_form",
            "target": "FormAgent",
            "kind": "ui_tool",
            "ui": { "component": "form", "mode": "artifact" }
        }]
    });
    let h = harness(
        &[("forms", bundle)],
        &["cap.workflow.forms", "cap.tool.collect_form"],
    );
    h.provider.push_tool_call("collect_form", json!({}));

    let outcome = h.orchestrator.start(start_request("forms")).await.unwrap();
    h.capture.wait_for(&outcome.chat_id, "chat.input_request").await;
    h.orchestrator.submit_input(&outcome.chat_id, "fill the form".into()).await;

    assert!(h.capture.wait_for(&outcome.chat_id, "chat.tool_call").await);
    let envelopes = h.capture.envelopes();
    let call = envelopes
        .iter()
        .find(|e| e.event.wire_type() == "chat.tool_call")
        .unwrap();
    let call_value = serde_json::to_value(call).unwrap();
    assert_eq!(call_value["data"]["awaiting_response"], true);
    assert_eq!(call_value["data"]["component_type"], "form");
    let corr = call_value["data"]["call_id"].as_str().unwrap().to_string();

    assert!(h
        .orchestrator
        .resolve_ui_response(&corr, json!({ "name": "Ada" })));

    assert!(h.capture.wait_for(&outcome.chat_id, "chat.tool_response").await);
    let envelopes = h.capture.envelopes();
    let response = envelopes
        .iter()
        .find(|e| e.event.wire_type() == "chat.tool_response")
        .unwrap();
    let value = serde_json::to_value(response).unwrap();
    assert_eq!(value["data"]["call_id"], corr.as_str());
    assert_eq!(value["data"]["result"]["name"], "Ada");
    assert_eq!(value["data"]["status"], "ok");

    h.capture
        .wait_for(&outcome.chat_id, "chat.orchestration.run_completed")
        .await;
}

#[tokio::test]
async fn test_handoff_between_agents() {
    let bundle = json!({
        "name": "duo",
        "agents": [
            {
                "name": "First",
                "system_prompt_template": "first",
                "llm_profile": { "provider": "openai", "model": "gpt-4o-mini" }
            },
            {
                "name": "Second",
                "system_prompt_template": "second",
                "llm_profile": { "provider": "openai", "model": "gpt-4o-mini" },
                "is_end_agent": true
            }
        ],
        "handoffs": [{ "from": "First", "to": "Second" }]
    });
    let h = harness(&[("duo", bundle)], &["cap.workflow.duo"]);
    h.provider.push_text("from first");
    h.provider.push_text("from second");

    let outcome = h.orchestrator.start(start_request("duo")).await.unwrap();
    h.capture.wait_for(&outcome.chat_id, "chat.input_request").await;
    h.orchestrator.submit_input(&outcome.chat_id, "go".into()).await;
    assert!(
        h.capture
            .wait_for(&outcome.chat_id, "chat.orchestration.run_completed")
            .await
    );

    let types = h.capture.types_for(&outcome.chat_id);
    assert!(types.iter().any(|t| *t == "chat.handoff"));
    assert_eq!(
        types.iter().filter(|t| **t == "chat.orchestration.agent_started").count(),
        2
    );

    // Persisted log: user message plus both agent texts, dense sequence.
    let messages = h.store.list_messages("a_1", &outcome.chat_id).await.unwrap();
    let seqs: Vec<u64> = messages.iter().map(|m| m.sequence_no).collect();
    assert_eq!(seqs, (1..=messages.len() as u64).collect::<Vec<_>>());
    assert_eq!(messages.len(), 3);
}

#[tokio::test]
async fn test_usage_summary_and_counters() {
    let h = harness(
        &[("patterns", pattern_bundle())],
        &["cap.workflow.patterns", "cap.tool.record_pattern"],
    );
    h.provider.push_structured(&json!({ "name": "crm" }));

    let outcome = h.orchestrator.start(start_request("patterns")).await.unwrap();
    h.capture.wait_for(&outcome.chat_id, "chat.input_request").await;
    h.orchestrator.submit_input(&outcome.chat_id, "go".into()).await;
    h.capture
        .wait_for(&outcome.chat_id, "chat.orchestration.run_completed")
        .await;

    // The scripted turn reports 15 tokens.
    assert_eq!(h.counters.used("a_1", "u_1"), 15);

    let session = h.store.get_session("a_1", &outcome.chat_id).await.unwrap().unwrap();
    assert_eq!(session.total_tokens, 15);

    let types = h.capture.types_for(&outcome.chat_id);
    assert!(types.iter().any(|t| *t == "chat.usage_delta"));
    assert!(types.iter().any(|t| *t == "chat.usage_summary"));
}

#[tokio::test]
async fn test_streamed_deltas_emit_print_events() {
    let h = harness(&[("patterns", pattern_bundle())], &["cap.workflow.patterns"]);
    let mut bundle = pattern_bundle();
    bundle["agents"][0]["structured_output"] = Value::Null;
    bundle["agents"][0]["auto_tool_mode"] = json!(false);
    bundle["tools"] = json!([]);
    write_bundle(h._workflows.path(), "plain", &bundle);
    let mut manifest = manifest_with(&["cap.workflow.patterns", "cap.workflow.plain"]);
    manifest.app_id = "a_1".to_string();
    h.entitlements.sync(manifest).unwrap();

    h.provider.push(mozaiks_core::test_utils::ScriptedTurn {
        content: "hello world".to_string(),
        deltas: vec!["hello ".to_string(), "world".to_string()],
        ..Default::default()
    });

    let outcome = h.orchestrator.start(start_request("plain")).await.unwrap();
    h.capture.wait_for(&outcome.chat_id, "chat.input_request").await;
    h.orchestrator.submit_input(&outcome.chat_id, "hi".into()).await;
    h.capture
        .wait_for(&outcome.chat_id, "chat.orchestration.run_completed")
        .await;

    let types = h.capture.types_for(&outcome.chat_id);
    let prints = types.iter().filter(|t| **t == "chat.print").count();
    assert_eq!(prints, 2);

    // Both prints precede the completed text.
    let ordered: Vec<&str> = types
        .iter()
        .copied()
        .filter(|t| *t == "chat.print" || *t == "chat.text")
        .collect();
    assert_eq!(ordered, vec!["chat.print", "chat.print", "chat.text"]);
}

#[tokio::test]
async fn test_resume_spawns_run_awaiting_input() {
    let h = harness(
        &[("patterns", pattern_bundle())],
        &["cap.workflow.patterns", "cap.tool.record_pattern"],
    );
    h.provider.push_structured(&json!({ "name": "crm" }));

    let outcome = h.orchestrator.start(start_request("patterns")).await.unwrap();
    h.capture.wait_for(&outcome.chat_id, "chat.input_request").await;

    // Simulate a restart: drop the live run, then revive from storage.
    h.orchestrator.cancel(&outcome.chat_id);
    h.capture
        .wait_for(&outcome.chat_id, "chat.orchestration.run_cancelled")
        .await;

    // A cancelled session does not revive.
    assert!(!h.orchestrator.ensure_run("a_1", &outcome.chat_id).await.unwrap());
}
