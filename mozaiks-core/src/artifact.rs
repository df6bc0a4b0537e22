//! Core-owned artifact primitives.
//!
//! Artifacts are data-driven payloads rendered by the client; the core
//! only defines the primitive kinds and the action schema their
//! `actions[]` entries follow. The concrete field schemas are additive
//! JSON objects carried inside `chat.tool_call` and state events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The artifact primitives the runtime ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    #[serde(rename = "core.markdown")]
    Markdown,
    #[serde(rename = "core.card")]
    Card,
    #[serde(rename = "core.list")]
    List,
    #[serde(rename = "core.table")]
    Table,
    #[serde(rename = "core.form")]
    Form,
    #[serde(rename = "core.composite")]
    Composite,
}

/// Whether an action targets the whole artifact or one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionScope {
    Artifact,
    Row,
}

/// One `actions[]` entry on an artifact payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSchema {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Tool executed by the stateless action executor.
    pub tool: String,
    #[serde(default)]
    pub params: Value,
    pub scope: ActionScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Confirmation prompt shown before dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm: Option<String>,
    /// Client applies the update optimistically and rolls back on
    /// `artifact.action.failed`.
    #[serde(default)]
    pub optimistic: bool,
}
