//! Run handles and UI-tool correlation waiters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Notify};

/// A user message routed into a running chat.
#[derive(Debug, Clone)]
pub struct UserInput {
    pub text: String,
}

/// Control surface for one in-flight run.
pub struct RunHandle {
    pub chat_id: String,
    input_tx: mpsc::Sender<UserInput>,
    cancelled: AtomicBool,
    cancel_notify: Notify,
}

impl RunHandle {
    pub fn new(chat_id: impl Into<String>, input_tx: mpsc::Sender<UserInput>) -> Self {
        Self {
            chat_id: chat_id.into(),
            input_tx,
            cancelled: AtomicBool::new(false),
            cancel_notify: Notify::new(),
        }
    }

    /// Request cancellation; honored at the next safe point.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel_notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            // Create the listener before re-checking the flag so a
            // concurrent cancel between check and await is not lost.
            let notified = self.cancel_notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    pub async fn submit(&self, input: UserInput) -> bool {
        self.input_tx.send(input).await.is_ok()
    }
}

/// Live runs by `chat_id`.
#[derive(Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<String, Arc<RunHandle>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: Arc<RunHandle>) {
        self.runs.lock().insert(handle.chat_id.clone(), handle);
    }

    pub fn get(&self, chat_id: &str) -> Option<Arc<RunHandle>> {
        self.runs.lock().get(chat_id).cloned()
    }

    pub fn remove(&self, chat_id: &str) {
        self.runs.lock().remove(chat_id);
    }

    pub fn cancel(&self, chat_id: &str) -> bool {
        match self.get(chat_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.runs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.lock().is_empty()
    }
}

struct PendingCall {
    chat_id: String,
    tx: oneshot::Sender<Value>,
}

/// Correlation map for UI-tool round trips.
///
/// The orchestrator registers a waiter before emitting the tool call;
/// the transport resolves it when the matching `ui.tool.response`
/// arrives. Bounded per chat; cleared on response, timeout,
/// cancellation, or disconnect.
pub struct PendingUiCalls {
    per_chat_cap: usize,
    calls: Mutex<HashMap<String, PendingCall>>,
}

impl PendingUiCalls {
    pub fn new(per_chat_cap: usize) -> Self {
        Self {
            per_chat_cap,
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Register a waiter keyed by correlation id.
    pub fn register(
        &self,
        chat_id: &str,
        correlation_id: &str,
    ) -> Result<oneshot::Receiver<Value>, String> {
        let mut calls = self.calls.lock();
        let in_flight = calls.values().filter(|c| c.chat_id == chat_id).count();
        if in_flight >= self.per_chat_cap {
            return Err(format!(
                "too many pending UI calls for chat {} (cap {})",
                chat_id, self.per_chat_cap
            ));
        }

        let (tx, rx) = oneshot::channel();
        calls.insert(
            correlation_id.to_string(),
            PendingCall {
                chat_id: chat_id.to_string(),
                tx,
            },
        );
        Ok(rx)
    }

    /// Resolve a waiter; false when no waiter matches (late response).
    pub fn resolve(&self, correlation_id: &str, response: Value) -> bool {
        match self.calls.lock().remove(correlation_id) {
            Some(call) => call.tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Drop a waiter without resolving (timeout path).
    pub fn abandon(&self, correlation_id: &str) {
        self.calls.lock().remove(correlation_id);
    }

    /// Drop every waiter for a chat (cancellation / disconnect).
    pub fn clear_chat(&self, chat_id: &str) {
        self.calls.lock().retain(|_, call| call.chat_id != chat_id);
    }

    pub fn pending_for(&self, chat_id: &str) -> usize {
        self.calls
            .lock()
            .values()
            .filter(|c| c.chat_id == chat_id)
            .count()
    }
}
