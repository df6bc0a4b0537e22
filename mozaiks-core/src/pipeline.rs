//! Event dispatcher: sequencing and ordered fan-out.
//!
//! Every runtime event passes through one dispatcher which assigns the
//! per-chat sequence number, stamps the envelope, and fans out in a
//! fixed order: persistence, then usage accounting, then transport,
//! then registered custom handlers. Persistence therefore completes
//! before the transport reveals an event to clients.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::events::{EventEnvelope, RuntimeEvent};

/// A fan-out target. Subscribers must not assume exclusive access to the
/// envelope and must tolerate events they do not care about.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn on_event(&self, envelope: &EventEnvelope);
}

#[derive(Default)]
struct Subscribers {
    persistence: Option<Arc<dyn EventSubscriber>>,
    usage: Option<Arc<dyn EventSubscriber>>,
    transport: Option<Arc<dyn EventSubscriber>>,
    handlers: Vec<Arc<dyn EventSubscriber>>,
}

/// The single event pipeline instance for a runtime process.
#[derive(Default)]
pub struct EventDispatcher {
    sequences: Mutex<HashMap<String, u64>>,
    subscribers: RwLock<Subscribers>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_persistence(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.write().persistence = Some(subscriber);
    }

    pub fn set_usage(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.write().usage = Some(subscriber);
    }

    pub fn set_transport(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.write().transport = Some(subscriber);
    }

    /// Register a custom handler (e.g. webhooks). Handlers run last, in
    /// registration order.
    pub fn add_handler(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.write().handlers.push(subscriber);
    }

    fn next_sequence(&self, chat_id: &str) -> u64 {
        let mut sequences = self.sequences.lock();
        let counter = sequences.entry(chat_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Drop the sequence counter for a finished chat.
    pub fn release_chat(&self, chat_id: &str) {
        self.sequences.lock().remove(chat_id);
    }

    /// Raise a chat's sequence counter to at least `floor`. Used when a
    /// run resumes after a restart so wire sequencing stays monotonic
    /// relative to persisted history.
    pub fn ensure_sequence_floor(&self, chat_id: &str, floor: u64) {
        let mut sequences = self.sequences.lock();
        let counter = sequences.entry(chat_id.to_string()).or_insert(0);
        if *counter < floor {
            *counter = floor;
        }
    }

    /// Emit a chat-scoped event. Returns the stamped envelope.
    pub async fn emit(&self, app_id: &str, chat_id: &str, event: RuntimeEvent) -> EventEnvelope {
        let mut envelope = EventEnvelope::for_chat(event, app_id, chat_id);
        envelope.sequence_no = Some(self.next_sequence(chat_id));
        self.fan_out(&envelope).await;
        envelope
    }

    /// Emit an event without chat scope (e.g. `subscription:changed`).
    pub async fn emit_global(&self, app_id: &str, event: RuntimeEvent) -> EventEnvelope {
        let mut envelope = EventEnvelope::new(event);
        envelope.app_id = Some(app_id.to_string());
        self.fan_out(&envelope).await;
        envelope
    }

    async fn fan_out(&self, envelope: &EventEnvelope) {
        let (persistence, usage, transport, handlers) = {
            let subscribers = self.subscribers.read();
            (
                subscribers.persistence.clone(),
                subscribers.usage.clone(),
                subscribers.transport.clone(),
                subscribers.handlers.clone(),
            )
        };

        if let Some(persistence) = persistence {
            if envelope.event.affects_chat_state() {
                persistence.on_event(envelope).await;
            }
        }
        if let Some(usage) = usage {
            usage.on_event(envelope).await;
        }
        if let Some(transport) = transport {
            transport.on_event(envelope).await;
        }
        for handler in handlers {
            handler.on_event(envelope).await;
        }
    }
}

/// Custom handler forwarding entitlement changes to a configured
/// webhook. Best-effort: delivery failures are logged, never retried.
pub struct WebhookSubscriber {
    url: String,
    http: reqwest::Client,
}

impl WebhookSubscriber {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl EventSubscriber for WebhookSubscriber {
    async fn on_event(&self, envelope: &EventEnvelope) {
        if !matches!(envelope.event, RuntimeEvent::SubscriptionChanged { .. }) {
            return;
        }
        if let Err(err) = self.http.post(&self.url).json(envelope).send().await {
            tracing::warn!(error = %err, url = %self.url, "entitlement webhook delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    struct Recorder {
        label: &'static str,
        log: Arc<PlMutex<Vec<(&'static str, u64)>>>,
    }

    #[async_trait]
    impl EventSubscriber for Recorder {
        async fn on_event(&self, envelope: &EventEnvelope) {
            self.log
                .lock()
                .push((self.label, envelope.sequence_no.unwrap_or(0)));
        }
    }

    fn text_event() -> RuntimeEvent {
        RuntimeEvent::Text {
            content: "hi".into(),
            agent: "a".into(),
            structured_output: None,
        }
    }

    #[tokio::test]
    async fn test_sequence_monotonic_per_chat() {
        let dispatcher = EventDispatcher::new();
        let first = dispatcher.emit("a_1", "c1", text_event()).await;
        let second = dispatcher.emit("a_1", "c1", text_event()).await;
        let other = dispatcher.emit("a_1", "c2", text_event()).await;

        assert_eq!(first.sequence_no, Some(1));
        assert_eq!(second.sequence_no, Some(2));
        assert_eq!(other.sequence_no, Some(1));
    }

    #[tokio::test]
    async fn test_fan_out_order_persistence_first() {
        let dispatcher = EventDispatcher::new();
        let log = Arc::new(PlMutex::new(Vec::new()));

        dispatcher.set_persistence(Arc::new(Recorder {
            label: "persistence",
            log: log.clone(),
        }));
        dispatcher.set_usage(Arc::new(Recorder {
            label: "usage",
            log: log.clone(),
        }));
        dispatcher.set_transport(Arc::new(Recorder {
            label: "transport",
            log: log.clone(),
        }));
        dispatcher.add_handler(Arc::new(Recorder {
            label: "handler",
            log: log.clone(),
        }));

        dispatcher.emit("a_1", "c1", text_event()).await;

        let order: Vec<&'static str> = log.lock().iter().map(|(label, _)| *label).collect();
        assert_eq!(order, vec!["persistence", "usage", "transport", "handler"]);
    }

    #[tokio::test]
    async fn test_ephemeral_events_skip_persistence() {
        let dispatcher = EventDispatcher::new();
        let log = Arc::new(PlMutex::new(Vec::new()));
        dispatcher.set_persistence(Arc::new(Recorder {
            label: "persistence",
            log: log.clone(),
        }));
        dispatcher.set_transport(Arc::new(Recorder {
            label: "transport",
            log: log.clone(),
        }));

        dispatcher
            .emit(
                "a_1",
                "c1",
                RuntimeEvent::Print {
                    content: "tok".into(),
                    agent: "a".into(),
                },
            )
            .await;

        let order: Vec<&'static str> = log.lock().iter().map(|(label, _)| *label).collect();
        assert_eq!(order, vec!["transport"]);
    }

    #[tokio::test]
    async fn test_global_emit_has_no_sequence() {
        let dispatcher = EventDispatcher::new();
        let envelope = dispatcher
            .emit_global(
                "a_1",
                RuntimeEvent::SubscriptionChanged {
                    app_id: "a_1".into(),
                    plan: None,
                },
            )
            .await;
        assert!(envelope.sequence_no.is_none());
        assert!(envelope.chat_id.is_none());
    }

    #[tokio::test]
    async fn test_release_chat_resets_counter() {
        let dispatcher = EventDispatcher::new();
        dispatcher.emit("a_1", "c1", text_event()).await;
        dispatcher.release_chat("c1");
        let envelope = dispatcher.emit("a_1", "c1", text_event()).await;
        assert_eq!(envelope.sequence_no, Some(1));
    }

    #[tokio::test]
    async fn test_webhook_subscriber_forwards_subscription_changes() {
        use wiremock::matchers::{body_partial_json, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({
                "type": "subscription:changed"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = EventDispatcher::new();
        dispatcher.add_handler(Arc::new(WebhookSubscriber::new(format!(
            "{}/hook",
            server.uri()
        ))));

        dispatcher
            .emit_global(
                "a_1",
                RuntimeEvent::SubscriptionChanged {
                    app_id: "a_1".into(),
                    plan: Some("pro".into()),
                },
            )
            .await;
        // Chat events do not reach the webhook (mock expects exactly 1).
        dispatcher.emit("a_1", "c1", text_event()).await;
    }

    #[tokio::test]
    async fn test_concurrent_emission_unique_dense_sequences() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let mut tasks = Vec::new();
        for _ in 0..20 {
            let dispatcher = dispatcher.clone();
            tasks.push(tokio::spawn(async move {
                dispatcher
                    .emit("a_1", "c1", text_event())
                    .await
                    .sequence_no
                    .unwrap()
            }));
        }

        let mut seqs = Vec::new();
        for task in tasks {
            seqs.push(task.await.unwrap());
        }
        seqs.sort_unstable();
        let expected: Vec<u64> = (1..=20).collect();
        assert_eq!(seqs, expected);
    }
}
