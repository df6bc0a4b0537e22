//! Connection registry: per-chat slots, pre-subscription buffering, and
//! outbound fan-out with backpressure policy.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use mozaiks_core::config::TransportConfig;
use mozaiks_core::entitlement::{AuditLog, AuditResult};
use mozaiks_core::events::{EventEnvelope, RuntimeEvent};
use mozaiks_core::pipeline::EventSubscriber;

use crate::agui::{convert_envelope, AguiEvent, FramingState};

struct ChatSlot {
    sender: Option<mpsc::Sender<String>>,
    buffer: VecDeque<String>,
    framing: FramingState,
    coalesced_prints: u64,
    dropped: u64,
}

impl ChatSlot {
    fn new() -> Self {
        Self {
            sender: None,
            buffer: VecDeque::new(),
            framing: FramingState::new(),
            coalesced_prints: 0,
            dropped: 0,
        }
    }
}

/// Routes serialized envelopes to the connected client per chat, or
/// into a bounded pre-subscription ring while no client is attached.
///
/// Registered as the transport subscriber on the event dispatcher; the
/// AG-UI secondary envelopes are produced here so `runId`/`threadId`
/// injection and text framing stay transport concerns.
pub struct ConnectionRegistry {
    config: TransportConfig,
    agui_enabled: bool,
    audit: Arc<AuditLog>,
    slots: Mutex<HashMap<String, ChatSlot>>,
}

impl ConnectionRegistry {
    pub fn new(config: TransportConfig, agui_enabled: bool, audit: Arc<AuditLog>) -> Self {
        Self {
            config,
            agui_enabled,
            audit,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        self.config.heartbeat_interval
    }

    pub fn agui_enabled(&self) -> bool {
        self.agui_enabled
    }

    /// Attach a connection for a chat. The preamble (snapshot replay) is
    /// queued first, then any pre-subscription buffer, then live events.
    pub fn attach(&self, chat_id: &str, preamble: Vec<String>) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(self.config.outbound_hard_cap);
        let mut slots = self.slots.lock();
        let slot = slots
            .entry(chat_id.to_string())
            .or_insert_with(ChatSlot::new);

        for payload in preamble {
            let _ = tx.try_send(payload);
        }
        while let Some(payload) = slot.buffer.pop_front() {
            let _ = tx.try_send(payload);
        }
        slot.sender = Some(tx);
        rx
    }

    /// Remove the live connection, leaving the slot buffering again.
    pub fn detach(&self, chat_id: &str) {
        if let Some(slot) = self.slots.lock().get_mut(chat_id) {
            slot.sender = None;
        }
    }

    pub fn is_attached(&self, chat_id: &str) -> bool {
        self.slots
            .lock()
            .get(chat_id)
            .map(|slot| slot.sender.is_some())
            .unwrap_or(false)
    }

    /// Serialize an AG-UI event as a wire envelope with routing metadata.
    pub fn agui_payload(envelope: &EventEnvelope, event: &AguiEvent) -> String {
        let mut value = serde_json::to_value(event).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            if let Some(chat_id) = &envelope.chat_id {
                map.insert("chat_id".to_string(), Value::String(chat_id.clone()));
            }
            if let Some(app_id) = &envelope.app_id {
                map.insert("app_id".to_string(), Value::String(app_id.clone()));
            }
            map.insert(
                "timestamp".to_string(),
                serde_json::to_value(envelope.timestamp).unwrap_or(Value::Null),
            );
        }
        value.to_string()
    }

    fn deliver(&self, envelope: &EventEnvelope) {
        let Some(chat_id) = envelope.chat_id.clone() else {
            return;
        };

        let mut slots = self.slots.lock();
        let slot = slots.entry(chat_id.clone()).or_insert_with(ChatSlot::new);

        // Soft-cap backpressure: streamed chunks are coalesced (skipped,
        // with the full text still arriving via chat.text) when the
        // outbound queue is congested.
        let is_print = matches!(envelope.event, RuntimeEvent::Print { .. });
        if is_print {
            if let Some(sender) = &slot.sender {
                let congested = sender.capacity()
                    < self
                        .config
                        .outbound_hard_cap
                        .saturating_sub(self.config.outbound_soft_cap);
                if congested {
                    slot.coalesced_prints += 1;
                    return;
                }
            }
        }

        let mut payloads = Vec::with_capacity(4);
        payloads.push(serde_json::to_string(envelope).unwrap_or_default());
        if self.agui_enabled {
            for agui_event in convert_envelope(envelope, &mut slot.framing) {
                payloads.push(Self::agui_payload(envelope, &agui_event));
            }
        }

        match slot.sender.clone() {
            Some(sender) => {
                for payload in payloads {
                    if sender.try_send(payload).is_err() {
                        // Hard cap reached: close the connection; the run
                        // continues and persistence keeps the transcript.
                        tracing::warn!(chat_id = %chat_id, "outbound queue full, closing connection");
                        slot.sender = None;
                        break;
                    }
                }
            }
            None => {
                for payload in payloads {
                    if slot.buffer.len() >= self.config.prebuffer_capacity {
                        slot.buffer.pop_front();
                        slot.dropped += 1;
                        self.audit.record(
                            envelope.app_id.as_deref().unwrap_or(""),
                            None,
                            "transport.prebuffer",
                            AuditResult::Dropped,
                            Some(format!("chat {} buffer overflow", chat_id)),
                        );
                    }
                    slot.buffer.push_back(payload);
                }
            }
        }
    }

    /// Buffered payload count for a chat (pre-subscription).
    pub fn buffered(&self, chat_id: &str) -> usize {
        self.slots
            .lock()
            .get(chat_id)
            .map(|slot| slot.buffer.len())
            .unwrap_or(0)
    }

    pub fn dropped(&self, chat_id: &str) -> u64 {
        self.slots
            .lock()
            .get(chat_id)
            .map(|slot| slot.dropped)
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventSubscriber for ConnectionRegistry {
    async fn on_event(&self, envelope: &EventEnvelope) {
        self.deliver(envelope);
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
