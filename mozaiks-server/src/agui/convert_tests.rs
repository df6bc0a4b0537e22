use super::{convert_envelope, FramingState};
use crate::agui::events::AguiEvent;
use mozaiks_core::events::{
    ArtifactUpdate, EventEnvelope, RunStatus, RunSummary, RuntimeEvent, ToolStatus, UpdateMode,
};

fn envelope(event: RuntimeEvent) -> EventEnvelope {
    EventEnvelope::for_chat(event, "a_1", "c1")
}

fn print_event(content: &str) -> RuntimeEvent {
    RuntimeEvent::Print {
        content: content.to_string(),
        agent: "Planner".to_string(),
    }
}

fn text_event(content: &str) -> RuntimeEvent {
    RuntimeEvent::Text {
        content: content.to_string(),
        agent: "Planner".to_string(),
        structured_output: None,
    }
}

#[test]
fn test_run_started_carries_run_and_thread_ids() {
    let mut framing = FramingState::new();
    let events = convert_envelope(
        &envelope(RuntimeEvent::RunStarted {
            run_id: "c1".to_string(),
            workflow_name: "notes".to_string(),
            status: RunStatus::InProgress,
        }),
        &mut framing,
    );

    assert_eq!(events.len(), 1);
    let value = serde_json::to_value(&events[0]).unwrap();
    assert_eq!(value["type"], "agui.lifecycle.RunStarted");
    assert_eq!(value["data"]["runId"], "c1");
    assert_eq!(value["data"]["threadId"], "a_1:c1");
}

#[test]
fn test_print_stream_framing() {
    let mut framing = FramingState::new();

    let first = convert_envelope(&envelope(print_event("hel")), &mut framing);
    let second = convert_envelope(&envelope(print_event("lo")), &mut framing);
    let closing = convert_envelope(&envelope(text_event("hello")), &mut framing);

    // First chunk opens a stream, second appends, text closes.
    assert!(matches!(first[0], AguiEvent::TextMessageStart { .. }));
    assert!(matches!(first[1], AguiEvent::TextMessageContent { .. }));
    assert_eq!(second.len(), 1);
    assert!(matches!(second[0], AguiEvent::TextMessageContent { .. }));
    assert_eq!(closing.len(), 1);
    assert!(matches!(closing[0], AguiEvent::TextMessageEnd { .. }));

    // All frames share one messageId.
    let start_id = serde_json::to_value(&first[0]).unwrap()["data"]["messageId"].clone();
    let content_id = serde_json::to_value(&second[0]).unwrap()["data"]["messageId"].clone();
    let end_id = serde_json::to_value(&closing[0]).unwrap()["data"]["messageId"].clone();
    assert_eq!(start_id, content_id);
    assert_eq!(start_id, end_id);
}

#[test]
fn test_bare_text_synthesizes_triple() {
    let mut framing = FramingState::new();
    let events = convert_envelope(&envelope(text_event("hello")), &mut framing);

    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], AguiEvent::TextMessageStart { .. }));
    assert!(matches!(events[1], AguiEvent::TextMessageContent { .. }));
    assert!(matches!(events[2], AguiEvent::TextMessageEnd { .. }));
}

#[test]
fn test_second_message_gets_fresh_id() {
    let mut framing = FramingState::new();
    let first = convert_envelope(&envelope(text_event("one")), &mut framing);
    let second = convert_envelope(&envelope(text_event("two")), &mut framing);

    let first_id = serde_json::to_value(&first[0]).unwrap()["data"]["messageId"].clone();
    let second_id = serde_json::to_value(&second[0]).unwrap()["data"]["messageId"].clone();
    assert_ne!(first_id, second_id);
}

#[test]
fn test_tool_call_closes_open_stream() {
    let mut framing = FramingState::new();
    convert_envelope(&envelope(print_event("thinking")), &mut framing);

    let events = convert_envelope(
        &envelope(RuntimeEvent::ToolCall {
            call_id: "t1".to_string(),
            name: "vote".to_string(),
            agent: "Planner".to_string(),
            arguments: None,
            component_type: None,
            display: None,
            awaiting_response: false,
        }),
        &mut framing,
    );

    assert!(matches!(events[0], AguiEvent::TextMessageEnd { .. }));
    assert!(matches!(events[1], AguiEvent::ToolCallStart { .. }));
}

#[test]
fn test_tool_response_produces_end_and_result() {
    let mut framing = FramingState::new();
    let events = convert_envelope(
        &envelope(RuntimeEvent::ToolResponse {
            call_id: "t1".to_string(),
            name: "vote".to_string(),
            agent: "Planner".to_string(),
            result: Some(serde_json::json!({ "ok": true })),
            status: ToolStatus::Ok,
            error: None,
        }),
        &mut framing,
    );

    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], AguiEvent::ToolCallEnd { .. }));
    let result = serde_json::to_value(&events[1]).unwrap();
    assert_eq!(result["type"], "agui.tool.ToolCallResult");
    assert_eq!(result["data"]["toolCallId"], "t1");
}

#[test]
fn test_run_finished_closes_open_stream() {
    let mut framing = FramingState::new();
    convert_envelope(&envelope(print_event("partial")), &mut framing);

    let events = convert_envelope(
        &envelope(RuntimeEvent::RunCompleted {
            run_id: "c1".to_string(),
            status: RunStatus::Completed,
            summary: RunSummary::default(),
        }),
        &mut framing,
    );

    assert!(matches!(events[0], AguiEvent::TextMessageEnd { .. }));
    assert!(matches!(events[1], AguiEvent::RunFinished { .. }));
}

#[test]
fn test_cancellation_maps_to_run_error() {
    let mut framing = FramingState::new();
    let events = convert_envelope(
        &envelope(RuntimeEvent::RunCancelled {
            run_id: "c1".to_string(),
            status: RunStatus::Cancelled,
        }),
        &mut framing,
    );
    let value = serde_json::to_value(&events[0]).unwrap();
    assert_eq!(value["type"], "agui.lifecycle.RunError");
    assert_eq!(value["data"]["code"], "CANCELLED");
}

#[test]
fn test_patch_action_becomes_state_delta() {
    let mut framing = FramingState::new();
    let events = convert_envelope(
        &envelope(RuntimeEvent::ActionCompleted {
            action_id: "ax1".to_string(),
            artifact_id: "card_1".to_string(),
            result: serde_json::json!({}),
            artifact_update: Some(ArtifactUpdate {
                mode: UpdateMode::Patch,
                payload: serde_json::json!([
                    { "op": "replace", "path": "/vote_status", "value": "done" }
                ]),
            }),
        }),
        &mut framing,
    );

    let value = serde_json::to_value(&events[0]).unwrap();
    assert_eq!(value["type"], "agui.state.StateDelta");
    assert_eq!(value["data"]["artifactId"], "card_1");
    assert_eq!(value["data"]["patch"][0]["path"], "/vote_status");
}

#[test]
fn test_events_without_chat_scope_are_skipped() {
    let mut framing = FramingState::new();
    let envelope = EventEnvelope::new(RuntimeEvent::SubscriptionChanged {
        app_id: "a_1".to_string(),
        plan: None,
    });
    assert!(convert_envelope(&envelope, &mut framing).is_empty());
}
