//! Agent/tool binding: materialize a bundle for one run.
//!
//! Binding resolves every by-name reference in a validated bundle into
//! an executable shape: effective system prompts, per-agent tool
//! subsets, structured-output schemas for the provider contract, and
//! the auto-tool map.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::workflow::{
    AgentDef, BundleError, LifecycleTrigger, ToolDef, ToolKind, WorkflowBundle,
};

/// Outcome of a lifecycle hook. Only a `before_chat` halt aborts a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookAction {
    Continue,
    Halt(String),
}

impl HookAction {
    /// Interpret a hook tool's JSON result.
    pub fn from_result(value: &Value) -> Self {
        if value["action"] == "halt" {
            let reason = value["reason"]
                .as_str()
                .unwrap_or("halted by before_chat hook")
                .to_string();
            Self::Halt(reason)
        } else {
            Self::Continue
        }
    }
}

/// One agent, ready to run.
#[derive(Debug, Clone)]
pub struct BoundAgent {
    pub def: AgentDef,
    /// Prompt with run variables substituted.
    pub system_prompt: String,
    /// Non-lifecycle tools visible to this agent.
    pub tools: Vec<ToolDef>,
    /// JSON schema constraining the model response, when a structured
    /// output is assigned.
    pub response_schema: Option<Value>,
    /// Tool invoked automatically when this agent's structured output
    /// validates.
    pub auto_tool: Option<String>,
}

/// A bundle materialized for one run.
#[derive(Debug, Clone)]
pub struct BoundWorkflow {
    pub bundle: Arc<WorkflowBundle>,
    pub agents: Vec<BoundAgent>,
    pub initial_agent: String,
    pub max_turns: u32,
}

impl BoundWorkflow {
    pub fn agent(&self, name: &str) -> Option<&BoundAgent> {
        self.agents.iter().find(|a| a.def.name == name)
    }

    pub fn lifecycle_tools(&self, trigger: LifecycleTrigger) -> Vec<ToolDef> {
        self.bundle
            .lifecycle_tools(trigger)
            .into_iter()
            .cloned()
            .collect()
    }

    /// First handoff rule from `agent` whose condition holds against the
    /// run variables (a condition names a variable that must be truthy).
    pub fn next_agent(&self, agent: &str, variables: &BTreeMap<String, Value>) -> Option<&str> {
        self.bundle
            .handoffs
            .iter()
            .filter(|rule| rule.from == agent)
            .find(|rule| match &rule.condition {
                None => true,
                Some(variable) => variables
                    .get(variable)
                    .map(is_truthy)
                    .unwrap_or(false),
            })
            .map(|rule| rule.to.as_str())
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => true,
    }
}

/// Substitute `{name}` placeholders from the run variables.
fn render_prompt(template: &str, variables: &BTreeMap<String, Value>) -> String {
    let mut rendered = template.to_string();
    for (name, value) in variables {
        let placeholder = format!("{{{}}}", name);
        if rendered.contains(&placeholder) {
            let replacement = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&placeholder, &replacement);
        }
    }
    rendered
}

/// Materialize a validated bundle with the given run variables.
pub fn bind(
    bundle: Arc<WorkflowBundle>,
    variables: &BTreeMap<String, Value>,
    default_max_turns: u32,
) -> Result<BoundWorkflow, BundleError> {
    let mut agents = Vec::with_capacity(bundle.agents.len());

    for def in &bundle.agents {
        let response_schema = match &def.structured_output {
            Some(model) => Some(
                bundle
                    .structured_outputs
                    .json_schema(model)
                    .map_err(|e| BundleError::Invalid(e.to_string()))?,
            ),
            None => None,
        };

        let auto_tool = def
            .structured_output
            .as_ref()
            .filter(|_| def.auto_tool_mode)
            .and_then(|_| {
                bundle
                    .tools
                    .iter()
                    .filter(|t| t.kind == ToolKind::AgentTool && t.auto_invoke)
                    .find(|t| t.target == def.name || t.target == "*")
                    .map(|t| t.name.clone())
            });

        agents.push(BoundAgent {
            system_prompt: render_prompt(&def.system_prompt_template, variables),
            tools: bundle.tools_for(&def.name).into_iter().cloned().collect(),
            response_schema,
            auto_tool,
            def: def.clone(),
        });
    }

    let initial_agent = bundle
        .initial_agent
        .clone()
        .unwrap_or_else(|| bundle.agents[0].name.clone());

    Ok(BoundWorkflow {
        max_turns: bundle.max_turns.unwrap_or(default_max_turns),
        initial_agent,
        agents,
        bundle,
    })
}
