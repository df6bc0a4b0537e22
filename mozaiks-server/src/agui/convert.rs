//! Conversion from legacy envelopes to AG-UI envelopes.
//!
//! The converter is stateful per chat: it tracks the open text-message
//! stream so `chat.print` chunks share one `messageId` and the closing
//! `chat.text` ends it. A `chat.text` with no open stream produces a
//! synthesized Start/Content/End triple.

use mozaiks_core::events::{EventEnvelope, RuntimeEvent, UpdateMode};

use super::events::{AguiEvent, JsonPatchOp, MessageRole};

/// Per-chat conversion state.
#[derive(Debug, Default)]
pub struct FramingState {
    open_message_id: Option<String>,
}

impl FramingState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Identifier pair injected into every AG-UI payload.
#[derive(Debug, Clone)]
pub struct AguiIds {
    pub run_id: String,
    pub thread_id: String,
}

impl AguiIds {
    pub fn from_envelope(envelope: &EventEnvelope) -> Option<Self> {
        let chat_id = envelope.chat_id.as_deref()?;
        let app_id = envelope.app_id.as_deref().unwrap_or("");
        Some(Self {
            run_id: chat_id.to_string(),
            thread_id: format!("{}:{}", app_id, chat_id),
        })
    }
}

/// Convert one legacy envelope into its AG-UI counterparts.
pub fn convert_envelope(envelope: &EventEnvelope, framing: &mut FramingState) -> Vec<AguiEvent> {
    let Some(ids) = AguiIds::from_envelope(envelope) else {
        return Vec::new();
    };

    match &envelope.event {
        RuntimeEvent::RunStarted { .. } => vec![AguiEvent::RunStarted {
            run_id: ids.run_id,
            thread_id: ids.thread_id,
        }],

        RuntimeEvent::RunCompleted { .. } => {
            let mut events = Vec::new();
            if let Some(message_id) = framing.open_message_id.take() {
                events.push(AguiEvent::TextMessageEnd {
                    run_id: ids.run_id.clone(),
                    thread_id: ids.thread_id.clone(),
                    message_id,
                });
            }
            events.push(AguiEvent::RunFinished {
                run_id: ids.run_id,
                thread_id: ids.thread_id,
            });
            events
        }

        RuntimeEvent::RunFailed { code, message, .. } => vec![AguiEvent::RunError {
            run_id: ids.run_id,
            thread_id: ids.thread_id,
            message: message.clone(),
            code: Some(code.clone()),
        }],

        RuntimeEvent::RunCancelled { .. } => vec![AguiEvent::RunError {
            run_id: ids.run_id,
            thread_id: ids.thread_id,
            message: "run cancelled".to_string(),
            code: Some("CANCELLED".to_string()),
        }],

        RuntimeEvent::AgentStarted { agent, .. } => vec![AguiEvent::StepStarted {
            run_id: ids.run_id,
            thread_id: ids.thread_id,
            step_name: agent.clone(),
        }],

        RuntimeEvent::AgentCompleted { agent, .. } => vec![AguiEvent::StepFinished {
            run_id: ids.run_id,
            thread_id: ids.thread_id,
            step_name: agent.clone(),
        }],

        // First print opens a stream; later prints append to it.
        RuntimeEvent::Print { content, .. } => {
            let mut events = Vec::new();
            let message_id = match &framing.open_message_id {
                Some(id) => id.clone(),
                None => {
                    let id = uuid::Uuid::new_v4().to_string();
                    framing.open_message_id = Some(id.clone());
                    events.push(AguiEvent::TextMessageStart {
                        run_id: ids.run_id.clone(),
                        thread_id: ids.thread_id.clone(),
                        message_id: id.clone(),
                        role: MessageRole::Assistant,
                    });
                    id
                }
            };
            events.push(AguiEvent::TextMessageContent {
                run_id: ids.run_id,
                thread_id: ids.thread_id,
                message_id,
                delta: content.clone(),
            });
            events
        }

        // A completed message closes the open stream, or synthesizes a
        // full triple when nothing streamed before it.
        RuntimeEvent::Text { content, .. } => match framing.open_message_id.take() {
            Some(message_id) => vec![AguiEvent::TextMessageEnd {
                run_id: ids.run_id,
                thread_id: ids.thread_id,
                message_id,
            }],
            None => {
                let message_id = uuid::Uuid::new_v4().to_string();
                vec![
                    AguiEvent::TextMessageStart {
                        run_id: ids.run_id.clone(),
                        thread_id: ids.thread_id.clone(),
                        message_id: message_id.clone(),
                        role: MessageRole::Assistant,
                    },
                    AguiEvent::TextMessageContent {
                        run_id: ids.run_id.clone(),
                        thread_id: ids.thread_id.clone(),
                        message_id: message_id.clone(),
                        delta: content.clone(),
                    },
                    AguiEvent::TextMessageEnd {
                        run_id: ids.run_id,
                        thread_id: ids.thread_id,
                        message_id,
                    },
                ]
            }
        },

        RuntimeEvent::ToolCall { call_id, name, .. } => {
            let mut events = Vec::new();
            if let Some(message_id) = framing.open_message_id.take() {
                events.push(AguiEvent::TextMessageEnd {
                    run_id: ids.run_id.clone(),
                    thread_id: ids.thread_id.clone(),
                    message_id,
                });
            }
            events.push(AguiEvent::ToolCallStart {
                run_id: ids.run_id,
                thread_id: ids.thread_id,
                tool_call_id: call_id.clone(),
                tool_call_name: name.clone(),
                parent_message_id: None,
            });
            events
        }

        RuntimeEvent::ToolResponse {
            call_id,
            result,
            error,
            ..
        } => {
            let content = match (result, error) {
                (Some(value), _) => value.to_string(),
                (None, Some(message)) => format!("Error: {}", message),
                (None, None) => String::new(),
            };
            vec![
                AguiEvent::ToolCallEnd {
                    run_id: ids.run_id.clone(),
                    thread_id: ids.thread_id.clone(),
                    tool_call_id: call_id.clone(),
                },
                AguiEvent::ToolCallResult {
                    run_id: ids.run_id,
                    thread_id: ids.thread_id,
                    message_id: uuid::Uuid::new_v4().to_string(),
                    tool_call_id: call_id.clone(),
                    content,
                    role: Some(MessageRole::Tool),
                },
            ]
        }

        // Artifact mutations surface as state events.
        RuntimeEvent::ActionCompleted {
            artifact_id,
            artifact_update: Some(update),
            ..
        } => match update.mode {
            UpdateMode::Replace => vec![AguiEvent::StateSnapshot {
                run_id: ids.run_id,
                thread_id: ids.thread_id,
                artifact_id: artifact_id.clone(),
                state: update.payload.clone(),
                workflow_name: String::new(),
            }],
            UpdateMode::Patch => {
                let patch: Vec<JsonPatchOp> =
                    serde_json::from_value(update.payload.clone()).unwrap_or_default();
                vec![AguiEvent::StateDelta {
                    run_id: ids.run_id,
                    thread_id: ids.thread_id,
                    artifact_id: artifact_id.clone(),
                    patch,
                }]
            }
        },

        _ => Vec::new(),
    }
}

#[cfg(test)]
#[path = "convert_tests.rs"]
mod tests;
