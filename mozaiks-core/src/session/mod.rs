//! Chat session, message, and artifact persistence.
//!
//! The durable document store is an external collaborator; this module
//! defines the storage contract plus an in-memory reference
//! implementation used for self-host and tests. Every read is filtered
//! by `app_id` — a mismatch is a tenancy violation, never a 404.

mod memory;
mod subscriber;

pub use memory::MemoryStore;
pub use subscriber::PersistenceSubscriber;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl ChatStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub chat_id: String,
    pub app_id: String,
    pub user_id: String,
    pub workflow_name: String,
    pub status: ChatStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Deterministic seed derived from `chat_id`, used for cache
    /// isolation and reproducibility.
    pub cache_seed: String,
    pub last_sequence_no: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_request_id: Option<String>,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
    Tool,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub chat_id: String,
    pub app_id: String,
    /// Dense per-chat ordinal assigned by the store on append.
    pub sequence_no: u64,
    pub agent: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// A message awaiting store-assigned sequencing.
    pub fn unsequenced(
        chat_id: impl Into<String>,
        app_id: impl Into<String>,
        agent: impl Into<String>,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            app_id: app_id.into(),
            sequence_no: 0,
            agent: agent.into(),
            role,
            content: content.into(),
            structured_output: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactState {
    pub artifact_id: String,
    pub chat_id: String,
    pub app_id: String,
    pub workflow_name: String,
    pub state: Value,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ArtifactState {
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|at| at <= Utc::now()).unwrap_or(false)
    }
}

/// Summary row for session listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub chat_id: String,
    pub workflow_name: String,
    pub status: ChatStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

/// Everything needed to replay a chat on reconnect.
#[derive(Debug, Clone)]
pub struct ResumeData {
    pub session: ChatSession,
    pub messages: Vec<ChatMessage>,
    /// Latest snapshot per artifact.
    pub artifacts: Vec<ArtifactState>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage contract for chat sessions, messages, and artifact states.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn upsert_session(&self, session: &ChatSession) -> Result<(), SessionError>;

    async fn get_session(
        &self,
        app_id: &str,
        chat_id: &str,
    ) -> Result<Option<ChatSession>, SessionError>;

    async fn update_status(
        &self,
        app_id: &str,
        chat_id: &str,
        status: ChatStatus,
        total_tokens: Option<u64>,
    ) -> Result<(), SessionError>;

    /// Most recent in-progress session matching the idempotency tuple.
    async fn find_recent_session(
        &self,
        app_id: &str,
        user_id: &str,
        workflow_name: &str,
        client_request_id: &str,
        window: Duration,
    ) -> Result<Option<ChatSession>, SessionError>;

    /// Append a message; the store assigns and returns the next dense
    /// per-chat sequence number.
    async fn append_message(&self, message: ChatMessage) -> Result<u64, SessionError>;

    async fn list_messages(
        &self,
        app_id: &str,
        chat_id: &str,
    ) -> Result<Vec<ChatMessage>, SessionError>;

    async fn list_sessions(
        &self,
        app_id: &str,
        user_id: &str,
    ) -> Result<Vec<SessionSummary>, SessionError>;

    async fn upsert_artifact(&self, artifact: &ArtifactState) -> Result<(), SessionError>;

    async fn get_artifact(
        &self,
        app_id: &str,
        artifact_id: &str,
    ) -> Result<Option<ArtifactState>, SessionError>;

    /// Ordered message log plus the latest artifact snapshots.
    async fn resume(&self, app_id: &str, chat_id: &str)
        -> Result<Option<ResumeData>, SessionError>;

    /// Whether the user has at least one completed run of a workflow.
    async fn has_completed_workflow(
        &self,
        app_id: &str,
        user_id: &str,
        workflow_name: &str,
    ) -> Result<bool, SessionError>;

    /// Drop artifacts past their `expires_at`; returns how many.
    async fn prune_expired_artifacts(&self) -> Result<usize, SessionError>;
}

/// Periodic artifact pruning.
pub fn spawn_artifact_pruner(
    store: std::sync::Arc<dyn SessionStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.prune_expired_artifacts().await {
                Ok(0) => {}
                Ok(count) => tracing::debug!(count, "pruned expired artifacts"),
                Err(err) => tracing::warn!(error = %err, "artifact pruning failed"),
            }
        }
    })
}
