//! Runtime tool contract and registry.
//!
//! Tool functions are registered by name at startup and resolved at
//! binding time; workflow bundles reference them declaratively. Every
//! execution receives a fresh [`ToolContext`] carrying the tenancy
//! identifiers, never shared mutable state.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Per-invocation context injected by the orchestrator or the action
/// executor.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub app_id: String,
    pub user_id: String,
    pub chat_id: Option<String>,
    pub workflow_name: Option<String>,
    /// Run context variables, empty for stateless invocations.
    pub variables: Value,
}

impl ToolContext {
    pub fn stateless(app_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            user_id: user_id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("tool requires an agent binding and cannot run statelessly")]
    NotInvocableStateless,

    #[error("tool timed out")]
    Timeout,

    #[error("{0}")]
    Execution(String),
}

impl From<String> for ToolError {
    fn from(s: String) -> Self {
        Self::Execution(s)
    }
}

impl From<&str> for ToolError {
    fn from(s: &str) -> Self {
        Self::Execution(s.to_string())
    }
}

/// Object-safe tool entry point.
///
/// Implementations execute over raw JSON; typed deserialization happens
/// inside `execute` so the registry can stay heterogeneous.
pub trait RuntimeTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// JSON schema for the tool's input, advertised to the model.
    fn input_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    /// Whether the tool may be invoked outside an agent loop by the
    /// stateless action executor.
    fn invocable_stateless(&self) -> bool {
        true
    }

    fn execute(
        &self,
        args: Value,
        context: ToolContext,
    ) -> BoxFuture<'_, Result<Value, ToolError>>;
}

/// A tool built from an async closure; the common way hosts register
/// behavior without a dedicated type.
pub struct FnTool<F> {
    name: String,
    description: String,
    schema: Value,
    stateless: bool,
    f: F,
}

impl<F> FnTool<F>
where
    F: Fn(Value, ToolContext) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            schema: serde_json::json!({ "type": "object" }),
            stateless: true,
            f,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn agent_only(mut self) -> Self {
        self.stateless = false;
        self
    }
}

impl<F> RuntimeTool for FnTool<F>
where
    F: Fn(Value, ToolContext) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        self.schema.clone()
    }

    fn invocable_stateless(&self) -> bool {
        self.stateless
    }

    fn execute(
        &self,
        args: Value,
        context: ToolContext,
    ) -> BoxFuture<'_, Result<Value, ToolError>> {
        (self.f)(args, context)
    }
}

/// Strongly-typed tool contract.
///
/// The input type's `JsonSchema` derive produces the schema advertised
/// to the model; [`box_tool`] erases the type for registry storage.
pub trait Tool: Send + Sync {
    type Input: DeserializeOwned + JsonSchema + Send;

    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn invocable_stateless(&self) -> bool {
        true
    }

    fn execute(
        &self,
        input: Self::Input,
        context: ToolContext,
    ) -> impl std::future::Future<Output = Result<Value, ToolError>> + Send;
}

/// Erase a typed [`Tool`] into a registry-storable [`RuntimeTool`].
pub fn box_tool<T: Tool + 'static>(tool: T) -> Arc<dyn RuntimeTool> {
    Arc::new(TypedToolAdapter(tool))
}

struct TypedToolAdapter<T>(T);

impl<T: Tool + 'static> RuntimeTool for TypedToolAdapter<T> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    fn input_schema(&self) -> Value {
        serde_json::to_value(schemars::schema_for!(T::Input))
            .unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
    }

    fn invocable_stateless(&self) -> bool {
        self.0.invocable_stateless()
    }

    fn execute(
        &self,
        args: Value,
        context: ToolContext,
    ) -> BoxFuture<'_, Result<Value, ToolError>> {
        Box::pin(async move {
            let input: T::Input = serde_json::from_value(args)
                .map_err(|e| ToolError::InvalidInput(e.to_string()))?;
            self.0.execute(input, context).await
        })
    }
}

/// Immutable-after-startup index of tool functions by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn RuntimeTool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Arc<dyn RuntimeTool>) {
        self.tools.write().insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RuntimeTool>> {
        self.tools.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }
}
