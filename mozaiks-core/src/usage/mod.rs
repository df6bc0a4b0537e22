//! Usage accounting: consumption events, counters, and forwarding.
//!
//! Recording never blocks a workflow. Events land in a bounded ring and
//! a background flusher forwards batches to the platform's billing
//! collector; the ring drops oldest on overflow and the drop is audited.

mod counters;
mod flusher;
mod recorder;

pub use counters::TokenCounters;
pub use flusher::{PlatformClient, UsageFlusher};
pub use recorder::{UsageRecorder, UsageStats};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A single consumption event forwarded to billing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub app_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl UsageEvent {
    pub fn new(
        event_type: impl Into<String>,
        app_id: impl Into<String>,
        user_id: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            app_id: app_id.into(),
            user_id: user_id.into(),
            timestamp: Utc::now(),
            data,
        }
    }

    /// Token consumption event emitted at run completion.
    pub fn tokens(
        app_id: impl Into<String>,
        user_id: impl Into<String>,
        chat_id: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Self {
        Self::new(
            "tokens.consumed",
            app_id,
            user_id,
            serde_json::json!({
                "chat_id": chat_id,
                "input_tokens": input_tokens,
                "output_tokens": output_tokens,
                "total_tokens": input_tokens + output_tokens,
            }),
        )
    }
}
