//! Persistence subscriber: writes chat state as events flow.

use std::sync::Arc;

use async_trait::async_trait;

use crate::events::{EventEnvelope, RuntimeEvent};
use crate::pipeline::EventSubscriber;

use super::{ChatMessage, ChatStatus, MessageRole, SessionStore};

/// Writes durable events into the session store. Runs first in the
/// dispatcher fan-out so transport never reveals unpersisted state.
pub struct PersistenceSubscriber {
    store: Arc<dyn SessionStore>,
}

impl PersistenceSubscriber {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventSubscriber for PersistenceSubscriber {
    async fn on_event(&self, envelope: &EventEnvelope) {
        let (Some(app_id), Some(chat_id)) = (&envelope.app_id, &envelope.chat_id) else {
            return;
        };

        let result = match &envelope.event {
            RuntimeEvent::Text {
                content,
                agent,
                structured_output,
            } => {
                let mut message = ChatMessage::unsequenced(
                    chat_id.clone(),
                    app_id.clone(),
                    agent.clone(),
                    MessageRole::Agent,
                    content.clone(),
                );
                message.structured_output = structured_output.clone();
                self.store.append_message(message).await.map(|_| ())
            }

            RuntimeEvent::ToolResponse {
                name,
                agent,
                result,
                error,
                ..
            } => {
                let content = match (result, error) {
                    (Some(value), _) => value.to_string(),
                    (None, Some(message)) => message.clone(),
                    (None, None) => String::new(),
                };
                let mut message = ChatMessage::unsequenced(
                    chat_id.clone(),
                    app_id.clone(),
                    agent.clone(),
                    MessageRole::Tool,
                    content,
                );
                message.structured_output = Some(serde_json::json!({ "tool": name }));
                self.store.append_message(message).await.map(|_| ())
            }

            RuntimeEvent::RunCompleted { summary, .. } => {
                self.store
                    .update_status(
                        app_id,
                        chat_id,
                        ChatStatus::Completed,
                        Some(summary.total_tokens),
                    )
                    .await
            }

            RuntimeEvent::RunFailed { .. } => {
                self.store
                    .update_status(app_id, chat_id, ChatStatus::Failed, None)
                    .await
            }

            RuntimeEvent::RunCancelled { .. } => {
                self.store
                    .update_status(app_id, chat_id, ChatStatus::Cancelled, None)
                    .await
            }

            _ => Ok(()),
        };

        if let Err(err) = result {
            tracing::error!(
                error = %err,
                chat_id,
                event = envelope.event.wire_type(),
                "persistence write failed"
            );
        }
    }
}
