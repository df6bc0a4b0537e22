//! Runtime event taxonomy and the universal envelope.
//!
//! Every event produced by the orchestrator, tool paths, or the action
//! executor is one variant of [`RuntimeEvent`]. The wire `type` string is
//! carried by serde's adjacent tagging, so serializing an envelope yields
//! `{ "type": "chat.text", "data": { ... }, ... }` directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Run / step status carried by orchestration events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

/// Tool invocation outcome carried by `chat.tool_response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Ok,
    Error,
}

/// How a UI tool payload is presented by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolDisplay {
    Inline,
    Artifact,
}

/// Artifact mutation produced by a completed stateless action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactUpdate {
    pub mode: UpdateMode,
    /// New state for `replace`, RFC 6902 operation array for `patch`.
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    Replace,
    Patch,
}

/// Aggregates reported with `chat.orchestration.run_completed`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub agent_turns: u32,
    pub tool_calls: u32,
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Events emitted during workflow execution.
///
/// Serialized with adjacent tagging so each variant's rename is the public
/// wire `type` and the fields land under `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RuntimeEvent {
    // ===== Content =====
    /// A completed agent message.
    #[serde(rename = "chat.text")]
    Text {
        content: String,
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        structured_output: Option<Value>,
    },

    /// A streamed token chunk.
    #[serde(rename = "chat.print")]
    Print { content: String, agent: String },

    /// Validated structured output produced by an agent.
    #[serde(rename = "chat.structured_output_ready")]
    StructuredOutputReady {
        agent: String,
        model_name: String,
        structured_data: Value,
        auto_tool_mode: bool,
    },

    // ===== Tools =====
    #[serde(rename = "chat.tool_call")]
    ToolCall {
        call_id: String,
        name: String,
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        component_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display: Option<ToolDisplay>,
        #[serde(default, skip_serializing_if = "is_false")]
        awaiting_response: bool,
    },

    #[serde(rename = "chat.tool_response")]
    ToolResponse {
        call_id: String,
        name: String,
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        status: ToolStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    // ===== User input =====
    #[serde(rename = "chat.input_request")]
    InputRequest {
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
    },

    #[serde(rename = "chat.input_ack")]
    InputAck { agent: String },

    #[serde(rename = "chat.input_timeout")]
    InputTimeout { agent: String },

    // ===== Multi-agent coordination =====
    #[serde(rename = "chat.handoff")]
    Handoff { from_agent: String, to_agent: String },

    #[serde(rename = "chat.select_speaker")]
    SelectSpeaker {
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename = "chat.resume_boundary")]
    ResumeBoundary {
        resumed_from: String,
        message_count: usize,
    },

    // ===== Metering =====
    #[serde(rename = "chat.usage_delta")]
    UsageDelta {
        agent: String,
        input_tokens: u64,
        output_tokens: u64,
    },

    #[serde(rename = "chat.usage_summary")]
    UsageSummary {
        total_tokens: u64,
        input_tokens: u64,
        output_tokens: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cost: Option<f64>,
    },

    // ===== Lifecycle shortcuts =====
    #[serde(rename = "chat.run_start")]
    RunStart { workflow_name: String },

    #[serde(rename = "chat.run_complete")]
    RunComplete { workflow_name: String },

    #[serde(rename = "chat.error")]
    ChatError {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    // ===== Authoritative orchestration =====
    #[serde(rename = "chat.orchestration.run_started")]
    RunStarted {
        run_id: String,
        workflow_name: String,
        status: RunStatus,
    },

    #[serde(rename = "chat.orchestration.run_completed")]
    RunCompleted {
        run_id: String,
        status: RunStatus,
        summary: RunSummary,
    },

    #[serde(rename = "chat.orchestration.run_failed")]
    RunFailed {
        run_id: String,
        status: RunStatus,
        code: String,
        message: String,
    },

    /// Distinct cancellation event; `status` is always `cancelled` so
    /// consumers keyed on run_failed semantics can treat it uniformly.
    #[serde(rename = "chat.orchestration.run_cancelled")]
    RunCancelled { run_id: String, status: RunStatus },

    #[serde(rename = "chat.orchestration.agent_started")]
    AgentStarted {
        run_id: String,
        agent: String,
        turn: u32,
        status: RunStatus,
    },

    #[serde(rename = "chat.orchestration.agent_completed")]
    AgentCompleted {
        run_id: String,
        agent: String,
        turn: u32,
        status: RunStatus,
    },

    #[serde(rename = "chat.orchestration.tool_started")]
    OrchestrationToolStarted {
        run_id: String,
        call_id: String,
        name: String,
        status: RunStatus,
    },

    #[serde(rename = "chat.orchestration.tool_completed")]
    OrchestrationToolCompleted {
        run_id: String,
        call_id: String,
        name: String,
        status: RunStatus,
    },

    // ===== Stateless actions =====
    #[serde(rename = "artifact.action.started")]
    ActionStarted {
        action_id: String,
        artifact_id: String,
        tool: String,
    },

    #[serde(rename = "artifact.action.completed")]
    ActionCompleted {
        action_id: String,
        artifact_id: String,
        result: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artifact_update: Option<ArtifactUpdate>,
    },

    #[serde(rename = "artifact.action.failed")]
    ActionFailed {
        action_id: String,
        artifact_id: String,
        error: String,
        rollback: bool,
    },

    // ===== Platform push =====
    #[serde(rename = "subscription:changed")]
    SubscriptionChanged {
        app_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plan: Option<String>,
    },
}

impl RuntimeEvent {
    /// The public wire `type` string for this event.
    pub fn wire_type(&self) -> &'static str {
        match self {
            Self::Text { .. } => "chat.text",
            Self::Print { .. } => "chat.print",
            Self::StructuredOutputReady { .. } => "chat.structured_output_ready",
            Self::ToolCall { .. } => "chat.tool_call",
            Self::ToolResponse { .. } => "chat.tool_response",
            Self::InputRequest { .. } => "chat.input_request",
            Self::InputAck { .. } => "chat.input_ack",
            Self::InputTimeout { .. } => "chat.input_timeout",
            Self::Handoff { .. } => "chat.handoff",
            Self::SelectSpeaker { .. } => "chat.select_speaker",
            Self::ResumeBoundary { .. } => "chat.resume_boundary",
            Self::UsageDelta { .. } => "chat.usage_delta",
            Self::UsageSummary { .. } => "chat.usage_summary",
            Self::RunStart { .. } => "chat.run_start",
            Self::RunComplete { .. } => "chat.run_complete",
            Self::ChatError { .. } => "chat.error",
            Self::RunStarted { .. } => "chat.orchestration.run_started",
            Self::RunCompleted { .. } => "chat.orchestration.run_completed",
            Self::RunFailed { .. } => "chat.orchestration.run_failed",
            Self::RunCancelled { .. } => "chat.orchestration.run_cancelled",
            Self::AgentStarted { .. } => "chat.orchestration.agent_started",
            Self::AgentCompleted { .. } => "chat.orchestration.agent_completed",
            Self::OrchestrationToolStarted { .. } => "chat.orchestration.tool_started",
            Self::OrchestrationToolCompleted { .. } => "chat.orchestration.tool_completed",
            Self::ActionStarted { .. } => "artifact.action.started",
            Self::ActionCompleted { .. } => "artifact.action.completed",
            Self::ActionFailed { .. } => "artifact.action.failed",
            Self::SubscriptionChanged { .. } => "subscription:changed",
        }
    }

    /// Durable events must be persisted before the transport reveals them.
    pub fn is_durable(&self) -> bool {
        matches!(
            self,
            Self::Text { .. }
                | Self::ToolResponse { .. }
                | Self::StructuredOutputReady { .. }
                | Self::RunStarted { .. }
                | Self::RunCompleted { .. }
                | Self::RunFailed { .. }
                | Self::RunCancelled { .. }
        )
    }

    /// Whether the persistence subscriber should see this event at all.
    pub fn affects_chat_state(&self) -> bool {
        self.is_durable()
            || matches!(
                self,
                Self::ToolCall { .. } | Self::ActionCompleted { .. } | Self::UsageSummary { .. }
            )
    }
}

/// The universal event record: a [`RuntimeEvent`] plus routing metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub event: RuntimeEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_no: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(event: RuntimeEvent) -> Self {
        Self {
            event,
            chat_id: None,
            app_id: None,
            sequence_no: None,
            timestamp: Utc::now(),
        }
    }

    pub fn for_chat(event: RuntimeEvent, app_id: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            event,
            chat_id: Some(chat_id.into()),
            app_id: Some(app_id.into()),
            sequence_no: None,
            timestamp: Utc::now(),
        }
    }
}
