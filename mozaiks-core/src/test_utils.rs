//! Test doubles shared by unit and integration tests.
//!
//! Enabled via the `test-utils` feature so downstream crates can reuse
//! the scripted provider and event capture in their own tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::events::EventEnvelope;
use crate::pipeline::EventSubscriber;
use crate::provider::{
    CompletionRequest, CompletionResponse, LlmProfile, ModelProvider, ProviderError,
    ProviderToolCall, TokenUsage,
};

/// One scripted model response.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    pub content: String,
    pub tool_call: Option<ProviderToolCall>,
    pub usage: Option<TokenUsage>,
    pub deltas: Vec<String>,
}

/// A provider that replays scripted turns in order.
#[derive(Default)]
pub struct MockProvider {
    script: Mutex<VecDeque<ScriptedTurn>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, turn: ScriptedTurn) {
        self.script.lock().push_back(turn);
    }

    pub fn push_text(&self, content: impl Into<String>) {
        self.push(ScriptedTurn {
            content: content.into(),
            usage: Some(TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            }),
            ..ScriptedTurn::default()
        });
    }

    pub fn push_structured(&self, data: &Value) {
        self.push(ScriptedTurn {
            content: data.to_string(),
            usage: Some(TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            }),
            ..ScriptedTurn::default()
        });
    }

    pub fn push_tool_call(&self, name: impl Into<String>, arguments: Value) {
        self.push(ScriptedTurn {
            tool_call: Some(ProviderToolCall {
                id: format!("call_{}", uuid::Uuid::new_v4()),
                name: name.into(),
                arguments,
            }),
            usage: Some(TokenUsage {
                input_tokens: 8,
                output_tokens: 4,
            }),
            ..ScriptedTurn::default()
        });
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn complete(
        &self,
        _profile: &LlmProfile,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let turn = self
            .script
            .lock()
            .pop_front()
            .ok_or_else(|| ProviderError::Model("mock script exhausted".to_string()))?;

        if let Some(sink) = &request.delta_sink {
            for delta in &turn.deltas {
                let _ = sink.send(delta.clone());
            }
        }

        Ok(CompletionResponse {
            content: turn.content,
            tool_call: turn.tool_call,
            usage: turn.usage,
        })
    }
}

/// Subscriber that records every envelope it sees.
#[derive(Default)]
pub struct EventCapture {
    envelopes: Mutex<Vec<EventEnvelope>>,
}

impl EventCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn envelopes(&self) -> Vec<EventEnvelope> {
        self.envelopes.lock().clone()
    }

    /// Wire types in emission order, optionally filtered by chat.
    pub fn types_for(&self, chat_id: &str) -> Vec<&'static str> {
        self.envelopes
            .lock()
            .iter()
            .filter(|e| e.chat_id.as_deref() == Some(chat_id))
            .map(|e| e.event.wire_type())
            .collect()
    }

    /// Block until a given wire type has been seen (with a deadline).
    pub async fn wait_for(&self, chat_id: &str, wire_type: &str) -> bool {
        for _ in 0..200 {
            if self.types_for(chat_id).iter().any(|t| *t == wire_type) {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        false
    }
}

#[async_trait]
impl EventSubscriber for EventCapture {
    async fn on_event(&self, envelope: &EventEnvelope) {
        self.envelopes.lock().push(envelope.clone());
    }
}
