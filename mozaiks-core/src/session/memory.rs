//! In-memory session store for self-host and tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::{
    ArtifactState, ChatMessage, ChatSession, ChatStatus, ResumeData, SessionError, SessionStore,
    SessionSummary,
};

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, ChatSession>,
    messages: HashMap<String, Vec<ChatMessage>>,
    artifacts: HashMap<String, ArtifactState>,
}

/// Reference [`SessionStore`] backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn session_key(app_id: &str, chat_id: &str) -> String {
        format!("{}:{}", app_id, chat_id)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn upsert_session(&self, session: &ChatSession) -> Result<(), SessionError> {
        let key = Self::session_key(&session.app_id, &session.chat_id);
        self.inner.write().sessions.insert(key, session.clone());
        Ok(())
    }

    async fn get_session(
        &self,
        app_id: &str,
        chat_id: &str,
    ) -> Result<Option<ChatSession>, SessionError> {
        Ok(self
            .inner
            .read()
            .sessions
            .get(&Self::session_key(app_id, chat_id))
            .cloned())
    }

    async fn update_status(
        &self,
        app_id: &str,
        chat_id: &str,
        status: ChatStatus,
        total_tokens: Option<u64>,
    ) -> Result<(), SessionError> {
        let mut inner = self.inner.write();
        let session = inner
            .sessions
            .get_mut(&Self::session_key(app_id, chat_id))
            .ok_or_else(|| SessionError::NotFound(chat_id.to_string()))?;

        // Terminal states are final; only in-progress sessions move.
        if !session.status.is_terminal() {
            session.status = status;
        }
        if let Some(tokens) = total_tokens {
            session.total_tokens = tokens;
        }
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn find_recent_session(
        &self,
        app_id: &str,
        user_id: &str,
        workflow_name: &str,
        client_request_id: &str,
        window: Duration,
    ) -> Result<Option<ChatSession>, SessionError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_default();
        Ok(self
            .inner
            .read()
            .sessions
            .values()
            .filter(|s| {
                s.app_id == app_id
                    && s.user_id == user_id
                    && s.workflow_name == workflow_name
                    && s.client_request_id.as_deref() == Some(client_request_id)
                    && s.status == ChatStatus::InProgress
                    && s.created_at >= cutoff
            })
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn append_message(&self, mut message: ChatMessage) -> Result<u64, SessionError> {
        let mut inner = self.inner.write();
        let key = Self::session_key(&message.app_id, &message.chat_id);
        let log = inner.messages.entry(key.clone()).or_default();
        let sequence_no = log.len() as u64 + 1;
        message.sequence_no = sequence_no;
        log.push(message);

        if let Some(session) = inner.sessions.get_mut(&key) {
            session.last_sequence_no = sequence_no;
            session.updated_at = Utc::now();
        }
        Ok(sequence_no)
    }

    async fn list_messages(
        &self,
        app_id: &str,
        chat_id: &str,
    ) -> Result<Vec<ChatMessage>, SessionError> {
        Ok(self
            .inner
            .read()
            .messages
            .get(&Self::session_key(app_id, chat_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_sessions(
        &self,
        app_id: &str,
        user_id: &str,
    ) -> Result<Vec<SessionSummary>, SessionError> {
        let inner = self.inner.read();
        let mut summaries: Vec<SessionSummary> = inner
            .sessions
            .values()
            .filter(|s| s.app_id == app_id && s.user_id == user_id)
            .map(|s| SessionSummary {
                chat_id: s.chat_id.clone(),
                workflow_name: s.workflow_name.clone(),
                status: s.status,
                created_at: s.created_at,
                updated_at: s.updated_at,
                message_count: inner
                    .messages
                    .get(&Self::session_key(&s.app_id, &s.chat_id))
                    .map(Vec::len)
                    .unwrap_or(0),
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn upsert_artifact(&self, artifact: &ArtifactState) -> Result<(), SessionError> {
        let key = format!("{}:{}", artifact.app_id, artifact.artifact_id);
        self.inner.write().artifacts.insert(key, artifact.clone());
        Ok(())
    }

    async fn get_artifact(
        &self,
        app_id: &str,
        artifact_id: &str,
    ) -> Result<Option<ArtifactState>, SessionError> {
        let key = format!("{}:{}", app_id, artifact_id);
        let artifact = self.inner.read().artifacts.get(&key).cloned();
        Ok(artifact.filter(|a| !a.is_expired()))
    }

    async fn resume(
        &self,
        app_id: &str,
        chat_id: &str,
    ) -> Result<Option<ResumeData>, SessionError> {
        let inner = self.inner.read();
        let Some(session) = inner
            .sessions
            .get(&Self::session_key(app_id, chat_id))
            .cloned()
        else {
            return Ok(None);
        };

        let messages = inner
            .messages
            .get(&Self::session_key(app_id, chat_id))
            .cloned()
            .unwrap_or_default();

        let mut artifacts: Vec<ArtifactState> = inner
            .artifacts
            .values()
            .filter(|a| a.app_id == app_id && a.chat_id == chat_id && !a.is_expired())
            .cloned()
            .collect();
        artifacts.sort_by(|a, b| a.artifact_id.cmp(&b.artifact_id));

        Ok(Some(ResumeData {
            session,
            messages,
            artifacts,
        }))
    }

    async fn has_completed_workflow(
        &self,
        app_id: &str,
        user_id: &str,
        workflow_name: &str,
    ) -> Result<bool, SessionError> {
        Ok(self.inner.read().sessions.values().any(|s| {
            s.app_id == app_id
                && s.user_id == user_id
                && s.workflow_name == workflow_name
                && s.status == ChatStatus::Completed
        }))
    }

    async fn prune_expired_artifacts(&self) -> Result<usize, SessionError> {
        let mut inner = self.inner.write();
        let before = inner.artifacts.len();
        inner.artifacts.retain(|_, artifact| !artifact.is_expired());
        Ok(before - inner.artifacts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MessageRole;

    fn session(chat_id: &str) -> ChatSession {
        ChatSession {
            chat_id: chat_id.to_string(),
            app_id: "a_1".to_string(),
            user_id: "u_1".to_string(),
            workflow_name: "notes".to_string(),
            status: ChatStatus::InProgress,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            cache_seed: "seed".to_string(),
            last_sequence_no: 0,
            resumed_from: None,
            client_request_id: Some("req-1".to_string()),
            total_tokens: 0,
        }
    }

    #[tokio::test]
    async fn test_sessions_scoped_by_app() {
        let store = MemoryStore::new();
        store.upsert_session(&session("c1")).await.unwrap();
        assert!(store.get_session("a_1", "c1").await.unwrap().is_some());
        assert!(store.get_session("a_2", "c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_message_sequencing_is_dense() {
        let store = MemoryStore::new();
        store.upsert_session(&session("c1")).await.unwrap();

        for n in 0..3 {
            let seq = store
                .append_message(ChatMessage::unsequenced(
                    "c1",
                    "a_1",
                    "Planner",
                    MessageRole::Agent,
                    format!("msg {}", n),
                ))
                .await
                .unwrap();
            assert_eq!(seq, n + 1);
        }

        let messages = store.list_messages("a_1", "c1").await.unwrap();
        let seqs: Vec<u64> = messages.iter().map(|m| m.sequence_no).collect();
        assert_eq!(seqs, vec![1, 2, 3]);

        let updated = store.get_session("a_1", "c1").await.unwrap().unwrap();
        assert_eq!(updated.last_sequence_no, 3);
    }

    #[tokio::test]
    async fn test_terminal_status_is_final() {
        let store = MemoryStore::new();
        store.upsert_session(&session("c1")).await.unwrap();
        store
            .update_status("a_1", "c1", ChatStatus::Cancelled, None)
            .await
            .unwrap();
        store
            .update_status("a_1", "c1", ChatStatus::Completed, None)
            .await
            .unwrap();
        let session = store.get_session("a_1", "c1").await.unwrap().unwrap();
        assert_eq!(session.status, ChatStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_idempotency_lookup() {
        let store = MemoryStore::new();
        store.upsert_session(&session("c1")).await.unwrap();

        let found = store
            .find_recent_session("a_1", "u_1", "notes", "req-1", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(found.unwrap().chat_id, "c1");

        let missing = store
            .find_recent_session("a_1", "u_1", "notes", "req-2", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_artifact_ttl() {
        let store = MemoryStore::new();
        let mut artifact = ArtifactState {
            artifact_id: "card_1".to_string(),
            chat_id: "c1".to_string(),
            app_id: "a_1".to_string(),
            workflow_name: "notes".to_string(),
            state: serde_json::json!({ "vote_status": "none" }),
            updated_at: Utc::now(),
            expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
        };
        store.upsert_artifact(&artifact).await.unwrap();

        // Expired reads miss, then pruning drops the row.
        assert!(store.get_artifact("a_1", "card_1").await.unwrap().is_none());
        assert_eq!(store.prune_expired_artifacts().await.unwrap(), 1);

        artifact.expires_at = None;
        store.upsert_artifact(&artifact).await.unwrap();
        assert!(store.get_artifact("a_1", "card_1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_resume_returns_messages_and_artifacts() {
        let store = MemoryStore::new();
        store.upsert_session(&session("c1")).await.unwrap();
        store
            .append_message(ChatMessage::unsequenced(
                "c1",
                "a_1",
                "user",
                MessageRole::User,
                "hello",
            ))
            .await
            .unwrap();
        store
            .upsert_artifact(&ArtifactState {
                artifact_id: "card_1".to_string(),
                chat_id: "c1".to_string(),
                app_id: "a_1".to_string(),
                workflow_name: "notes".to_string(),
                state: serde_json::json!({}),
                updated_at: Utc::now(),
                expires_at: None,
            })
            .await
            .unwrap();

        let resume = store.resume("a_1", "c1").await.unwrap().unwrap();
        assert_eq!(resume.messages.len(), 1);
        assert_eq!(resume.artifacts.len(), 1);
    }

    #[tokio::test]
    async fn test_completed_workflow_gate() {
        let store = MemoryStore::new();
        let mut completed = session("c1");
        completed.workflow_name = "onboarding".to_string();
        store.upsert_session(&completed).await.unwrap();
        assert!(!store
            .has_completed_workflow("a_1", "u_1", "onboarding")
            .await
            .unwrap());

        store
            .update_status("a_1", "c1", ChatStatus::Completed, None)
            .await
            .unwrap();
        assert!(store
            .has_completed_workflow("a_1", "u_1", "onboarding")
            .await
            .unwrap());
    }
}
