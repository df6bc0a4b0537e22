//! Stateless action executor.
//!
//! Executes a tool outside any agent loop in response to an
//! `artifact.action` message, enforcing capabilities and producing
//! artifact state updates (replace snapshot or RFC 6902 patch).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use mozaiks_core::entitlement::EntitlementStore;
use mozaiks_core::events::{ArtifactUpdate, RuntimeEvent, UpdateMode};
use mozaiks_core::pipeline::EventDispatcher;
use mozaiks_core::session::{ArtifactState, SessionStore};
use mozaiks_core::tool::{ToolContext, ToolRegistry};
use mozaiks_core::Identity;

use crate::agui::JsonPatchOp;

/// Inbound `artifact.action` message body.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactAction {
    #[serde(default)]
    pub action_id: Option<String>,
    pub artifact_id: String,
    pub tool: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub context: ActionContext,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionContext {
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

pub struct ActionExecutor {
    tools: Arc<ToolRegistry>,
    entitlements: Arc<EntitlementStore>,
    store: Arc<dyn SessionStore>,
    dispatcher: Arc<EventDispatcher>,
    timeout: Duration,
    artifact_ttl: Option<Duration>,
}

impl ActionExecutor {
    pub fn new(
        tools: Arc<ToolRegistry>,
        entitlements: Arc<EntitlementStore>,
        store: Arc<dyn SessionStore>,
        dispatcher: Arc<EventDispatcher>,
        timeout: Duration,
        artifact_ttl: Option<Duration>,
    ) -> Self {
        Self {
            tools,
            entitlements,
            store,
            dispatcher,
            timeout,
            artifact_ttl,
        }
    }

    /// Run the action protocol. All failures surface as
    /// `artifact.action.failed` events with `rollback: true` so clients
    /// can revert optimistic updates.
    pub async fn execute(&self, action: ArtifactAction, identity: &Identity) {
        let action_id = action
            .action_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let chat_id = action.context.chat_id.clone();

        // The verified token wins over anything in the message context.
        if let Some(claimed_app) = &action.context.app_id {
            if self
                .entitlements
                .enforce_tenancy(
                    &identity.app_id,
                    claimed_app,
                    Some(&identity.user_id),
                    &format!("artifact:{}", action.artifact_id),
                )
                .is_err()
            {
                self.emit_failed(&identity.app_id, chat_id.as_deref(), &action, &action_id, "TENANT_ISOLATION")
                    .await;
                return;
            }
        }

        let capability = format!("cap.tool.{}", action.tool);
        if self
            .entitlements
            .require(&identity.app_id, Some(&identity.user_id), &capability)
            .is_err()
        {
            self.emit_failed(
                &identity.app_id,
                chat_id.as_deref(),
                &action,
                &action_id,
                "CAPABILITY_DENIED",
            )
            .await;
            return;
        }

        let Some(tool) = self.tools.get(&action.tool) else {
            self.emit_failed(
                &identity.app_id,
                chat_id.as_deref(),
                &action,
                &action_id,
                "TOOL_NOT_FOUND",
            )
            .await;
            return;
        };
        if !tool.invocable_stateless() {
            self.emit_failed(
                &identity.app_id,
                chat_id.as_deref(),
                &action,
                &action_id,
                "TOOL_NOT_INVOCABLE_STATELESS",
            )
            .await;
            return;
        }

        self.emit(
            &identity.app_id,
            chat_id.as_deref(),
            RuntimeEvent::ActionStarted {
                action_id: action_id.clone(),
                artifact_id: action.artifact_id.clone(),
                tool: action.tool.clone(),
            },
        )
        .await;

        let context = ToolContext {
            app_id: identity.app_id.clone(),
            user_id: identity.user_id.clone(),
            chat_id: chat_id.clone(),
            workflow_name: None,
            variables: Value::Null,
        };

        let outcome =
            tokio::time::timeout(self.timeout, tool.execute(action.params.clone(), context)).await;

        let result = match outcome {
            Err(_) => {
                self.emit_failed(
                    &identity.app_id,
                    chat_id.as_deref(),
                    &action,
                    &action_id,
                    "ACTION_TIMEOUT",
                )
                .await;
                return;
            }
            Ok(Err(err)) => {
                self.emit_failed(
                    &identity.app_id,
                    chat_id.as_deref(),
                    &action,
                    &action_id,
                    &err.to_string(),
                )
                .await;
                return;
            }
            Ok(Ok(value)) => value,
        };

        let artifact_update = parse_artifact_update(&result);
        if let Some(update) = &artifact_update {
            if let Err(err) = self
                .apply_update(identity, &action, chat_id.as_deref(), update)
                .await
            {
                self.emit_failed(&identity.app_id, chat_id.as_deref(), &action, &action_id, &err)
                    .await;
                return;
            }
        }

        self.emit(
            &identity.app_id,
            chat_id.as_deref(),
            RuntimeEvent::ActionCompleted {
                action_id,
                artifact_id: action.artifact_id.clone(),
                result: result
                    .get("result")
                    .cloned()
                    .unwrap_or_else(|| result.clone()),
                artifact_update,
            },
        )
        .await;
    }

    /// Persist the new artifact state: replace stores the snapshot,
    /// patch applies RFC 6902 operations to the current state.
    async fn apply_update(
        &self,
        identity: &Identity,
        action: &ArtifactAction,
        chat_id: Option<&str>,
        update: &ArtifactUpdate,
    ) -> Result<(), String> {
        let existing = self
            .store
            .get_artifact(&identity.app_id, &action.artifact_id)
            .await
            .map_err(|e| e.to_string())?;

        let new_state = match update.mode {
            UpdateMode::Replace => update.payload.clone(),
            UpdateMode::Patch => {
                let base = existing
                    .as_ref()
                    .map(|a| a.state.clone())
                    .unwrap_or(Value::Null);
                let ops: Vec<JsonPatchOp> = serde_json::from_value(update.payload.clone())
                    .map_err(|e| format!("malformed patch: {}", e))?;
                apply_patch(base, &ops)?
            }
        };

        let artifact = ArtifactState {
            artifact_id: action.artifact_id.clone(),
            chat_id: chat_id
                .map(str::to_string)
                .or_else(|| existing.as_ref().map(|a| a.chat_id.clone()))
                .unwrap_or_default(),
            app_id: identity.app_id.clone(),
            workflow_name: existing
                .as_ref()
                .map(|a| a.workflow_name.clone())
                .unwrap_or_default(),
            state: new_state,
            updated_at: Utc::now(),
            expires_at: self
                .artifact_ttl
                .map(|ttl| Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default()),
        };
        self.store
            .upsert_artifact(&artifact)
            .await
            .map_err(|e| e.to_string())
    }

    async fn emit(&self, app_id: &str, chat_id: Option<&str>, event: RuntimeEvent) {
        match chat_id {
            Some(chat_id) => {
                self.dispatcher.emit(app_id, chat_id, event).await;
            }
            None => {
                self.dispatcher.emit_global(app_id, event).await;
            }
        }
    }

    async fn emit_failed(
        &self,
        app_id: &str,
        chat_id: Option<&str>,
        action: &ArtifactAction,
        action_id: &str,
        error: &str,
    ) {
        self.emit(
            app_id,
            chat_id,
            RuntimeEvent::ActionFailed {
                action_id: action_id.to_string(),
                artifact_id: action.artifact_id.clone(),
                error: error.to_string(),
                rollback: true,
            },
        )
        .await;
    }
}

/// Extract an artifact update from a tool result shaped
/// `{ result, artifact_update: { mode, payload } }`.
fn parse_artifact_update(result: &Value) -> Option<ArtifactUpdate> {
    serde_json::from_value(result.get("artifact_update")?.clone()).ok()
}

/// Apply RFC 6902 add/remove/replace operations. Root replacement uses
/// `path: ""`.
pub fn apply_patch(mut state: Value, ops: &[JsonPatchOp]) -> Result<Value, String> {
    for op in ops {
        match op.op.as_str() {
            "replace" | "add" => {
                let value = op
                    .value
                    .clone()
                    .ok_or_else(|| format!("{} on {} requires a value", op.op, op.path))?;
                if op.path.is_empty() {
                    state = value;
                } else {
                    set_pointer(&mut state, &op.path, value)?;
                }
            }
            "remove" => {
                if op.path.is_empty() {
                    state = Value::Null;
                } else {
                    remove_pointer(&mut state, &op.path)?;
                }
            }
            other => return Err(format!("unsupported patch op: {}", other)),
        }
    }
    Ok(state)
}

fn split_pointer(path: &str) -> Result<(String, String), String> {
    if !path.starts_with('/') {
        return Err(format!("invalid JSON pointer: {}", path));
    }
    let idx = path.rfind('/').unwrap_or(0);
    let parent = path[..idx].to_string();
    let token = path[idx + 1..].replace("~1", "/").replace("~0", "~");
    Ok((parent, token))
}

fn set_pointer(state: &mut Value, path: &str, value: Value) -> Result<(), String> {
    let (parent_path, token) = split_pointer(path)?;
    let parent = state
        .pointer_mut(&parent_path)
        .ok_or_else(|| format!("path not found: {}", parent_path))?;
    match parent {
        Value::Object(map) => {
            map.insert(token, value);
            Ok(())
        }
        Value::Array(items) => {
            if token == "-" {
                items.push(value);
                return Ok(());
            }
            let index: usize = token
                .parse()
                .map_err(|_| format!("invalid array index: {}", token))?;
            if index > items.len() {
                return Err(format!("index out of bounds: {}", index));
            }
            if index == items.len() {
                items.push(value);
            } else {
                items[index] = value;
            }
            Ok(())
        }
        _ => Err(format!("cannot index into scalar at {}", parent_path)),
    }
}

fn remove_pointer(state: &mut Value, path: &str) -> Result<(), String> {
    let (parent_path, token) = split_pointer(path)?;
    let parent = state
        .pointer_mut(&parent_path)
        .ok_or_else(|| format!("path not found: {}", parent_path))?;
    match parent {
        Value::Object(map) => {
            map.remove(&token)
                .ok_or_else(|| format!("key not found: {}", token))?;
            Ok(())
        }
        Value::Array(items) => {
            let index: usize = token
                .parse()
                .map_err(|_| format!("invalid array index: {}", token))?;
            if index >= items.len() {
                return Err(format!("index out of bounds: {}", index));
            }
            items.remove(index);
            Ok(())
        }
        _ => Err(format!("cannot index into scalar at {}", parent_path)),
    }
}

#[cfg(test)]
#[path = "actions_tests.rs"]
mod tests;
