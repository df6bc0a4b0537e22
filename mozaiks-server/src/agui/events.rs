//! AG-UI secondary envelope types.
//!
//! Every legacy `chat.*` event that has an AG-UI counterpart is
//! dual-emitted as one of these envelopes. Serialization uses the
//! namespaced `type` tag with the payload under `data`, matching the
//! legacy envelope framing; `data` always carries `runId` and
//! `threadId`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

/// JSON Patch operation (RFC 6902). Root replacement uses `path: ""`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonPatchOp {
    pub op: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// How a messages snapshot was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotMode {
    Auto,
    Client,
}

/// AG-UI events, tagged with their wire namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AguiEvent {
    // ===== Lifecycle =====
    #[serde(rename = "agui.lifecycle.RunStarted")]
    #[serde(rename_all = "camelCase")]
    RunStarted { run_id: String, thread_id: String },

    #[serde(rename = "agui.lifecycle.RunFinished")]
    #[serde(rename_all = "camelCase")]
    RunFinished { run_id: String, thread_id: String },

    #[serde(rename = "agui.lifecycle.RunError")]
    #[serde(rename_all = "camelCase")]
    RunError {
        run_id: String,
        thread_id: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    #[serde(rename = "agui.lifecycle.StepStarted")]
    #[serde(rename_all = "camelCase")]
    StepStarted {
        run_id: String,
        thread_id: String,
        step_name: String,
    },

    #[serde(rename = "agui.lifecycle.StepFinished")]
    #[serde(rename_all = "camelCase")]
    StepFinished {
        run_id: String,
        thread_id: String,
        step_name: String,
    },

    // ===== Text stream =====
    #[serde(rename = "agui.text.TextMessageStart")]
    #[serde(rename_all = "camelCase")]
    TextMessageStart {
        run_id: String,
        thread_id: String,
        message_id: String,
        role: MessageRole,
    },

    #[serde(rename = "agui.text.TextMessageContent")]
    #[serde(rename_all = "camelCase")]
    TextMessageContent {
        run_id: String,
        thread_id: String,
        message_id: String,
        delta: String,
    },

    #[serde(rename = "agui.text.TextMessageEnd")]
    #[serde(rename_all = "camelCase")]
    TextMessageEnd {
        run_id: String,
        thread_id: String,
        message_id: String,
    },

    // ===== Tools =====
    #[serde(rename = "agui.tool.ToolCallStart")]
    #[serde(rename_all = "camelCase")]
    ToolCallStart {
        run_id: String,
        thread_id: String,
        tool_call_id: String,
        tool_call_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
    },

    #[serde(rename = "agui.tool.ToolCallEnd")]
    #[serde(rename_all = "camelCase")]
    ToolCallEnd {
        run_id: String,
        thread_id: String,
        tool_call_id: String,
    },

    #[serde(rename = "agui.tool.ToolCallResult")]
    #[serde(rename_all = "camelCase")]
    ToolCallResult {
        run_id: String,
        thread_id: String,
        message_id: String,
        tool_call_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<MessageRole>,
    },

    // ===== State =====
    #[serde(rename = "agui.state.StateSnapshot")]
    #[serde(rename_all = "camelCase")]
    StateSnapshot {
        run_id: String,
        thread_id: String,
        artifact_id: String,
        state: Value,
        workflow_name: String,
    },

    #[serde(rename = "agui.state.StateDelta")]
    #[serde(rename_all = "camelCase")]
    StateDelta {
        run_id: String,
        thread_id: String,
        artifact_id: String,
        patch: Vec<JsonPatchOp>,
    },

    #[serde(rename = "agui.state.MessagesSnapshot")]
    #[serde(rename_all = "camelCase")]
    MessagesSnapshot {
        run_id: String,
        thread_id: String,
        messages: Vec<Value>,
        mode: SnapshotMode,
        total_messages: usize,
    },
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
