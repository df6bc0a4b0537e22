//! Bounded ring buffer for usage events.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::entitlement::{AuditLog, AuditResult};

use super::UsageEvent;

/// Counter snapshot; `enqueued == flushed + buffered + dropped` holds at
/// every quiescent point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageStats {
    pub enqueued: u64,
    pub flushed: u64,
    pub dropped: u64,
    pub buffered: usize,
}

/// Non-blocking usage event sink.
pub struct UsageRecorder {
    buffer: Mutex<VecDeque<UsageEvent>>,
    capacity: usize,
    batch_threshold: usize,
    enqueued: AtomicU64,
    flushed: AtomicU64,
    dropped: AtomicU64,
    batch_ready: Notify,
    audit: Arc<AuditLog>,
}

impl UsageRecorder {
    pub fn new(capacity: usize, batch_threshold: usize, audit: Arc<AuditLog>) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
            capacity,
            batch_threshold,
            enqueued: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            batch_ready: Notify::new(),
            audit,
        }
    }

    /// Append an event. Drops the oldest buffered event on overflow.
    pub fn record(&self, event: UsageEvent) {
        let app_id = event.app_id.clone();
        let notify = {
            let mut buffer = self.buffer.lock();
            if buffer.len() >= self.capacity {
                buffer.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.audit.record(
                    &app_id,
                    None,
                    "usage.dropped",
                    AuditResult::Dropped,
                    Some("usage buffer overflow".to_string()),
                );
            }
            buffer.push_back(event);
            self.enqueued.fetch_add(1, Ordering::Relaxed);
            buffer.len() >= self.batch_threshold
        };

        if notify {
            self.batch_ready.notify_one();
        }
    }

    /// Remove up to `max` events for flushing.
    pub fn drain(&self, max: usize) -> Vec<UsageEvent> {
        let mut buffer = self.buffer.lock();
        let take = max.min(buffer.len());
        buffer.drain(..take).collect()
    }

    /// Return unflushed events to the front of the buffer, oldest first.
    /// Overflow drops from the front as usual.
    pub fn requeue(&self, events: Vec<UsageEvent>) {
        let mut buffer = self.buffer.lock();
        for event in events.into_iter().rev() {
            buffer.push_front(event);
        }
        while buffer.len() > self.capacity {
            buffer.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn mark_flushed(&self, count: u64) {
        self.flushed.fetch_add(count, Ordering::Relaxed);
    }

    /// Resolves when the buffer crosses the batch threshold.
    pub async fn batch_ready(&self) {
        self.batch_ready.notified().await;
    }

    pub fn stats(&self) -> UsageStats {
        UsageStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            buffered: self.buffer.lock().len(),
        }
    }
}
