//! Workflow orchestrator: the turn-based run state machine.
//!
//! `start` performs the pre-flight protocol (capability, token, and
//! prerequisite gating plus idempotent reuse), persists the session, and
//! spawns the run loop. The loop itself lives in `run.rs`.

mod pending;
mod run;

pub use pending::{PendingUiCalls, RunHandle, RunRegistry, UserInput};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::entitlement::{EnforcementMode, EntitlementStore};
use crate::error::Error;
use crate::pipeline::EventDispatcher;
use crate::provider::ModelProvider;
use crate::session::{ChatSession, ChatStatus, SessionStore};
use crate::tool::ToolRegistry;
use crate::usage::{TokenCounters, UsageRecorder};
use crate::workflow::BundleLoader;

/// Start protocol input.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub app_id: String,
    pub workflow_name: String,
    pub user_id: String,
    pub client_request_id: Option<String>,
    pub force_new: bool,
    pub required_min_tokens: u64,
}

/// Start protocol outcome.
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub chat_id: String,
    pub cache_seed: String,
    pub reused: bool,
}

/// Shared collaborators the orchestrator drives.
pub struct OrchestratorDeps {
    pub bundles: Arc<BundleLoader>,
    pub tools: Arc<ToolRegistry>,
    pub provider: Arc<dyn ModelProvider>,
    pub entitlements: Arc<EntitlementStore>,
    pub store: Arc<dyn SessionStore>,
    pub dispatcher: Arc<EventDispatcher>,
    pub usage: Arc<UsageRecorder>,
    pub counters: Arc<TokenCounters>,
}

pub struct Orchestrator {
    pub(crate) config: OrchestratorConfig,
    pub(crate) bundles: Arc<BundleLoader>,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) provider: Arc<dyn ModelProvider>,
    pub(crate) entitlements: Arc<EntitlementStore>,
    pub(crate) store: Arc<dyn SessionStore>,
    pub(crate) dispatcher: Arc<EventDispatcher>,
    pub(crate) usage: Arc<UsageRecorder>,
    pub(crate) counters: Arc<TokenCounters>,
    pub(crate) runs: RunRegistry,
    pub(crate) ui_calls: Arc<PendingUiCalls>,
    pub(crate) run_slots: Arc<Semaphore>,
    /// Serializes the reuse-check-and-create sequence per idempotency
    /// key so concurrent starts cannot both miss the lookup.
    start_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, deps: OrchestratorDeps) -> Self {
        Self {
            run_slots: Arc::new(Semaphore::new(config.max_concurrent_runs)),
            ui_calls: Arc::new(PendingUiCalls::new(64)),
            runs: RunRegistry::new(),
            start_locks: Mutex::new(HashMap::new()),
            config,
            bundles: deps.bundles,
            tools: deps.tools,
            provider: deps.provider,
            entitlements: deps.entitlements,
            store: deps.store,
            dispatcher: deps.dispatcher,
            usage: deps.usage,
            counters: deps.counters,
        }
    }

    pub fn ui_calls(&self) -> &Arc<PendingUiCalls> {
        &self.ui_calls
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Deterministic seed for reproducibility and per-chat cache
    /// isolation.
    pub fn cache_seed(chat_id: &str) -> String {
        let digest = Sha256::digest(chat_id.as_bytes());
        hex::encode(digest)[..16].to_string()
    }

    /// Start or reuse a workflow run.
    pub async fn start(self: &Arc<Self>, request: StartRequest) -> Result<StartOutcome, Error> {
        let bundle = self.bundles.load(&request.app_id, &request.workflow_name)?;

        // Capability gate.
        let capability = bundle
            .required_capability
            .clone()
            .unwrap_or_else(|| format!("cap.workflow.{}", request.workflow_name));
        self.entitlements
            .require(&request.app_id, Some(&request.user_id), &capability)?;

        // Token availability gate.
        if request.required_min_tokens > 0 {
            let manifest = self
                .entitlements
                .get(&request.app_id, Some(&request.user_id));
            let bucket = &manifest.token_budget.total_tokens;
            if bucket.limit >= 0 && bucket.enforcement == EnforcementMode::Hard {
                let used = self.counters.used(&request.app_id, &request.user_id) as i64;
                if used + request.required_min_tokens as i64 > bucket.limit {
                    return Err(Error::InsufficientTokens {
                        required: request.required_min_tokens,
                    });
                }
            }
        }

        // Pack gating.
        for prerequisite in &bundle.prerequisites {
            let completed = self
                .store
                .has_completed_workflow(&request.app_id, &request.user_id, prerequisite)
                .await?;
            if !completed {
                return Err(Error::PrerequisiteNotMet {
                    workflow: prerequisite.clone(),
                });
            }
        }

        // Idempotent reuse. The per-key lock stays held until the new
        // session is persisted, so a concurrent start with the same key
        // either sees the existing session or waits for it to exist.
        let _reuse_guard = match (&request.client_request_id, request.force_new) {
            (Some(client_request_id), false) => {
                let guard = self
                    .reuse_lock(&request, client_request_id)
                    .lock_owned()
                    .await;
                if let Some(existing) = self
                    .store
                    .find_recent_session(
                        &request.app_id,
                        &request.user_id,
                        &request.workflow_name,
                        client_request_id,
                        self.config.idempotency_window,
                    )
                    .await?
                {
                    return Ok(StartOutcome {
                        chat_id: existing.chat_id,
                        cache_seed: existing.cache_seed,
                        reused: true,
                    });
                }
                Some(guard)
            }
            _ => None,
        };

        let chat_id = Uuid::new_v4().to_string();
        let cache_seed = Self::cache_seed(&chat_id);
        let now = chrono::Utc::now();
        let session = ChatSession {
            chat_id: chat_id.clone(),
            app_id: request.app_id.clone(),
            user_id: request.user_id.clone(),
            workflow_name: request.workflow_name.clone(),
            status: ChatStatus::InProgress,
            created_at: now,
            updated_at: now,
            cache_seed: cache_seed.clone(),
            last_sequence_no: 0,
            resumed_from: None,
            client_request_id: request.client_request_id.clone(),
            total_tokens: 0,
        };
        self.store.upsert_session(&session).await?;

        self.spawn_run(bundle, session, Vec::new());

        Ok(StartOutcome {
            chat_id,
            cache_seed,
            reused: false,
        })
    }

    /// Lock serializing starts that share an idempotency key. Stale
    /// entries are pruned opportunistically once the map grows.
    fn reuse_lock(&self, request: &StartRequest, client_request_id: &str) -> Arc<AsyncMutex<()>> {
        let key = format!(
            "{}:{}:{}:{}",
            request.app_id, request.user_id, request.workflow_name, client_request_id
        );
        let mut locks = self.start_locks.lock();
        if locks.len() > 1024 {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        locks.entry(key).or_default().clone()
    }

    /// Route a user message into a running chat.
    pub async fn submit_input(&self, chat_id: &str, text: String) -> bool {
        match self.runs.get(chat_id) {
            Some(handle) => handle.submit(UserInput { text }).await,
            None => false,
        }
    }

    /// Set the cancellation flag for a run.
    pub fn cancel(&self, chat_id: &str) -> bool {
        let cancelled = self.runs.cancel(chat_id);
        if cancelled {
            self.ui_calls.clear_chat(chat_id);
        }
        cancelled
    }

    /// Resolve a pending UI-tool waiter. False when no waiter matches.
    pub fn resolve_ui_response(&self, correlation_id: &str, response: serde_json::Value) -> bool {
        self.ui_calls.resolve(correlation_id, response)
    }

    pub fn is_running(&self, chat_id: &str) -> bool {
        self.runs.get(chat_id).is_some()
    }

    /// Revive the run loop for an in-progress session that has no live
    /// task (reconnect after a restart). The transcript is hydrated from
    /// persistence and the run resumes awaiting user input.
    pub async fn ensure_run(self: &Arc<Self>, app_id: &str, chat_id: &str) -> Result<bool, Error> {
        if self.is_running(chat_id) {
            return Ok(false);
        }
        let Some(resume) = self.store.resume(app_id, chat_id).await? else {
            return Ok(false);
        };
        if resume.session.status != ChatStatus::InProgress {
            return Ok(false);
        }

        let bundle = self.bundles.load(app_id, &resume.session.workflow_name)?;
        self.dispatcher
            .ensure_sequence_floor(chat_id, resume.session.last_sequence_no);
        self.spawn_run(bundle, resume.session, resume.messages);
        Ok(true)
    }
}
