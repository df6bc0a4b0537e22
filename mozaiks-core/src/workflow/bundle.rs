//! Declarative workflow bundle model and validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::ToolDisplay;
use crate::provider::LlmProfile;

use super::schema::SchemaRegistry;
use super::BundleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    AgentTool,
    UiTool,
    LifecycleTool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleTrigger {
    BeforeChat,
    AfterChat,
    BeforeAgent,
    AfterAgent,
}

/// Client-side presentation of a UI tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiSpec {
    pub component: String,
    pub mode: ToolDisplay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    /// Agent name, or `*` for every agent.
    #[serde(default = "default_target")]
    pub target: String,
    pub kind: ToolKind,
    #[serde(default)]
    pub auto_invoke: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<UiSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<LifecycleTrigger>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_target() -> String {
    "*".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDef {
    pub name: String,
    pub system_prompt_template: String,
    pub llm_profile: LlmProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<String>,
    #[serde(default)]
    pub auto_tool_mode: bool,
    /// After this agent's turn the run pauses for the next user message.
    #[serde(default)]
    pub await_user_input: bool,
    /// Reaching this agent's turn ends the run once it completes.
    #[serde(default)]
    pub is_end_agent: bool,
}

/// Directed handoff edge, optionally conditional on a context variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRule {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// A parsed workflow bundle. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowBundle {
    pub name: String,
    pub agents: Vec<AgentDef>,
    #[serde(default)]
    pub tools: Vec<ToolDef>,
    #[serde(default)]
    pub handoffs: Vec<HandoffRule>,
    #[serde(default)]
    pub structured_outputs: SchemaRegistry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    /// Workflows that must have completed before this one starts.
    #[serde(default)]
    pub prerequisites: Vec<String>,
    /// Capability gating this workflow; defaults to
    /// `cap.workflow.<name>` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_capability: Option<String>,
    /// Accepted for forward compatibility; the graph adapter is not part
    /// of the core and these rules are ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_injection: Option<Value>,
}

impl WorkflowBundle {
    pub fn agent(&self, name: &str) -> Option<&AgentDef> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDef> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Tools bound to an agent: exact target match or `*`.
    pub fn tools_for(&self, agent: &str) -> Vec<&ToolDef> {
        self.tools
            .iter()
            .filter(|t| t.kind != ToolKind::LifecycleTool)
            .filter(|t| t.target == agent || t.target == "*")
            .collect()
    }

    pub fn lifecycle_tools(&self, trigger: LifecycleTrigger) -> Vec<&ToolDef> {
        self.tools
            .iter()
            .filter(|t| t.kind == ToolKind::LifecycleTool && t.trigger == Some(trigger))
            .collect()
    }

    /// Structural validation applied at load time.
    pub fn validate(&self) -> Result<(), BundleError> {
        if self.agents.is_empty() {
            return Err(BundleError::Invalid("bundle has no agents".to_string()));
        }

        let agent_exists = |name: &str| self.agents.iter().any(|a| a.name == name);

        for tool in &self.tools {
            if tool.target != "*" && !agent_exists(&tool.target) {
                return Err(BundleError::Invalid(format!(
                    "tool '{}' targets unknown agent '{}'",
                    tool.name, tool.target
                )));
            }
            match tool.kind {
                ToolKind::LifecycleTool => {
                    if tool.trigger.is_none() {
                        return Err(BundleError::Invalid(format!(
                            "lifecycle tool '{}' has no trigger",
                            tool.name
                        )));
                    }
                }
                ToolKind::UiTool => {
                    if tool.ui.is_none() {
                        return Err(BundleError::Invalid(format!(
                            "ui tool '{}' has no ui spec",
                            tool.name
                        )));
                    }
                    if tool.auto_invoke {
                        return Err(BundleError::Invalid(format!(
                            "ui tool '{}' cannot be auto-invoked",
                            tool.name
                        )));
                    }
                }
                ToolKind::AgentTool => {}
            }
        }

        for agent in &self.agents {
            if let Some(model) = &agent.structured_output {
                if !self.structured_outputs.contains(model) {
                    return Err(BundleError::Invalid(format!(
                        "agent '{}' references unknown structured output '{}'",
                        agent.name, model
                    )));
                }
            }
        }

        for rule in &self.handoffs {
            if !agent_exists(&rule.from) || !agent_exists(&rule.to) {
                return Err(BundleError::Invalid(format!(
                    "handoff {} -> {} references unknown agent",
                    rule.from, rule.to
                )));
            }
        }

        if let Some(initial) = &self.initial_agent {
            if !agent_exists(initial) {
                return Err(BundleError::Invalid(format!(
                    "initial agent '{}' not defined",
                    initial
                )));
            }
        }

        self.structured_outputs
            .check_integrity()
            .map_err(|e| BundleError::Invalid(e.to_string()))?;

        Ok(())
    }
}
