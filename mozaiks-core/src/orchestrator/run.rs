//! The run loop: agent turns, tool invocations, and termination.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::binding::{bind, BoundAgent, BoundWorkflow, HookAction};
use crate::entitlement::AuditResult;
use crate::events::{RunStatus, RunSummary, RuntimeEvent, ToolStatus};
use crate::provider::{ChatTurn, CompletionRequest, CompletionResponse, ProviderToolSpec};
use crate::session::{ChatMessage, ChatSession, MessageRole};
use crate::tool::ToolContext;
use crate::usage::UsageEvent;
use crate::workflow::{LifecycleTrigger, SchemaRegistry, ToolDef, ToolKind, WorkflowBundle};

use super::pending::{RunHandle, UserInput};
use super::Orchestrator;

/// Identifiers threaded through every emission of one run.
#[derive(Debug, Clone)]
struct RunIds {
    app_id: String,
    user_id: String,
    chat_id: String,
    workflow_name: String,
}

struct RunState {
    ids: RunIds,
    bound: BoundWorkflow,
    variables: BTreeMap<String, Value>,
    transcript: Vec<ChatTurn>,
    summary: RunSummary,
    handle: Arc<RunHandle>,
}

struct RunFailure {
    code: String,
    message: String,
}

impl RunFailure {
    fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl Orchestrator {
    pub(crate) fn spawn_run(
        self: &Arc<Self>,
        bundle: Arc<WorkflowBundle>,
        session: ChatSession,
        hydrate: Vec<ChatMessage>,
    ) {
        let (input_tx, input_rx) = mpsc::channel(16);
        let handle = Arc::new(RunHandle::new(&session.chat_id, input_tx));
        self.runs.insert(handle.clone());

        let orchestrator = self.clone();
        tokio::spawn(async move {
            // The global semaphore bounds concurrent runs per process.
            let Ok(_permit) = orchestrator.run_slots.clone().acquire_owned().await else {
                return;
            };
            orchestrator
                .run_loop(bundle, session, hydrate, handle, input_rx)
                .await;
        });
    }

    async fn run_loop(
        self: Arc<Self>,
        bundle: Arc<WorkflowBundle>,
        session: ChatSession,
        hydrate: Vec<ChatMessage>,
        handle: Arc<RunHandle>,
        mut input_rx: mpsc::Receiver<UserInput>,
    ) {
        let ids = RunIds {
            app_id: session.app_id.clone(),
            user_id: session.user_id.clone(),
            chat_id: session.chat_id.clone(),
            workflow_name: session.workflow_name.clone(),
        };

        let mut variables: BTreeMap<String, Value> = BTreeMap::new();
        variables.insert("app_id".into(), Value::String(ids.app_id.clone()));
        variables.insert("user_id".into(), Value::String(ids.user_id.clone()));
        variables.insert("chat_id".into(), Value::String(ids.chat_id.clone()));
        variables.insert(
            "workflow_name".into(),
            Value::String(ids.workflow_name.clone()),
        );
        variables.insert("cache_seed".into(), Value::String(session.cache_seed.clone()));

        let bound = match bind(bundle, &variables, self.config.max_turns) {
            Ok(bound) => bound,
            Err(err) => {
                self.emit_failure(&ids, "BUNDLE_INVALID", &err.to_string()).await;
                self.cleanup(&ids.chat_id);
                return;
            }
        };

        let resumed = !hydrate.is_empty();
        let mut state = RunState {
            transcript: hydrate.iter().filter_map(turn_from_message).collect(),
            ids,
            bound,
            variables,
            summary: RunSummary::default(),
            handle,
        };

        self.emit(
            &state.ids,
            RuntimeEvent::RunStarted {
                run_id: state.ids.chat_id.clone(),
                workflow_name: state.ids.workflow_name.clone(),
                status: RunStatus::InProgress,
            },
        )
        .await;

        if resumed {
            self.emit(
                &state.ids,
                RuntimeEvent::ResumeBoundary {
                    resumed_from: state.ids.chat_id.clone(),
                    message_count: state.transcript.len(),
                },
            )
            .await;
        }

        if let HookAction::Halt(reason) = self
            .run_lifecycle(&state, LifecycleTrigger::BeforeChat)
            .await
        {
            self.emit_failure(&state.ids, "HALTED", &reason).await;
            self.cleanup(&state.ids.chat_id);
            return;
        }

        let mut active = state.bound.initial_agent.clone();
        let mut awaiting_input = state.transcript.is_empty() || resumed;

        loop {
            if state.handle.is_cancelled() {
                self.emit_cancelled(&state.ids).await;
                self.cleanup(&state.ids.chat_id);
                return;
            }

            if awaiting_input {
                if !self.wait_for_input(&mut state, &mut input_rx, &active).await {
                    self.emit_cancelled(&state.ids).await;
                    self.cleanup(&state.ids.chat_id);
                    return;
                }
                awaiting_input = false;
                continue;
            }

            if state.summary.agent_turns >= state.bound.max_turns {
                break;
            }
            state.summary.agent_turns += 1;
            let turn = state.summary.agent_turns;

            let Some(agent) = state.bound.agent(&active).cloned() else {
                self.emit_failure(
                    &state.ids,
                    "INTERNAL_ERROR",
                    &format!("active agent '{}' not bound", active),
                )
                .await;
                self.cleanup(&state.ids.chat_id);
                return;
            };

            self.emit(
                &state.ids,
                RuntimeEvent::AgentStarted {
                    run_id: state.ids.chat_id.clone(),
                    agent: active.clone(),
                    turn,
                    status: RunStatus::InProgress,
                },
            )
            .await;
            self.run_lifecycle(&state, LifecycleTrigger::BeforeAgent).await;

            if let Err(failure) = self.agent_turn(&mut state, &agent).await {
                self.emit_failure(&state.ids, &failure.code, &failure.message)
                    .await;
                self.cleanup(&state.ids.chat_id);
                return;
            }

            self.emit(
                &state.ids,
                RuntimeEvent::AgentCompleted {
                    run_id: state.ids.chat_id.clone(),
                    agent: active.clone(),
                    turn,
                    status: RunStatus::Completed,
                },
            )
            .await;
            self.run_lifecycle(&state, LifecycleTrigger::AfterAgent).await;

            if agent.def.is_end_agent {
                break;
            }

            match state
                .bound
                .next_agent(&active, &state.variables)
                .map(str::to_string)
            {
                Some(next) => {
                    self.emit(
                        &state.ids,
                        RuntimeEvent::SelectSpeaker {
                            agent: next.clone(),
                            reason: Some(format!("handoff from {}", active)),
                        },
                    )
                    .await;
                    self.emit(
                        &state.ids,
                        RuntimeEvent::Handoff {
                            from_agent: active.clone(),
                            to_agent: next.clone(),
                        },
                    )
                    .await;
                    active = next;
                }
                None if agent.def.await_user_input => awaiting_input = true,
                None => break,
            }

            // Let other runs make progress between turns.
            tokio::task::yield_now().await;
        }

        self.run_lifecycle(&state, LifecycleTrigger::AfterChat).await;
        self.finish_completed(&state).await;
        self.cleanup(&state.ids.chat_id);
    }

    /// Wait for the next user message. Returns false on cancellation or
    /// a closed input channel.
    async fn wait_for_input(
        &self,
        state: &mut RunState,
        input_rx: &mut mpsc::Receiver<UserInput>,
        active: &str,
    ) -> bool {
        self.emit(
            &state.ids,
            RuntimeEvent::InputRequest {
                agent: active.to_string(),
                prompt: None,
            },
        )
        .await;

        let input = tokio::select! {
            input = input_rx.recv() => input,
            _ = state.handle.cancelled() => None,
        };
        let Some(input) = input else {
            return false;
        };

        let message = ChatMessage::unsequenced(
            state.ids.chat_id.clone(),
            state.ids.app_id.clone(),
            "user",
            MessageRole::User,
            input.text.clone(),
        );
        if let Err(err) = self.store.append_message(message).await {
            tracing::error!(error = %err, chat_id = %state.ids.chat_id, "failed to persist user message");
        }

        state.transcript.push(ChatTurn::user(input.text));
        self.emit(
            &state.ids,
            RuntimeEvent::InputAck {
                agent: active.to_string(),
            },
        )
        .await;
        true
    }

    async fn agent_turn(
        &self,
        state: &mut RunState,
        agent: &BoundAgent,
    ) -> Result<(), RunFailure> {
        let agent_name = agent.def.name.clone();
        let (delta_tx, mut delta_rx) = mpsc::unbounded_channel();

        let request = CompletionRequest {
            system: agent.system_prompt.clone(),
            messages: state.transcript.clone(),
            tools: self.tool_specs(agent),
            response_format: agent.response_schema.clone(),
            delta_sink: Some(delta_tx),
        };

        let response = match tokio::time::timeout(
            self.config.agent_turn_timeout,
            self.provider.complete(&agent.def.llm_profile, request),
        )
        .await
        {
            Err(_) => return Err(RunFailure::new("LLM_TIMEOUT", "agent turn timed out")),
            Ok(Err(err)) => return Err(RunFailure::new("LLM_ERROR", err.to_string())),
            Ok(Ok(response)) => response,
        };

        // Forward streamed chunks before the completed message.
        while let Ok(chunk) = delta_rx.try_recv() {
            self.emit(
                &state.ids,
                RuntimeEvent::Print {
                    content: chunk,
                    agent: agent_name.clone(),
                },
            )
            .await;
        }

        if let Some(usage) = response.usage {
            state.summary.input_tokens += usage.input_tokens;
            state.summary.output_tokens += usage.output_tokens;
            self.emit(
                &state.ids,
                RuntimeEvent::UsageDelta {
                    agent: agent_name.clone(),
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                },
            )
            .await;
        }

        if let Some(model_name) = agent.def.structured_output.clone() {
            let (data, content) = self
                .structured_output(state, agent, &model_name, &response)
                .await?;

            self.emit(
                &state.ids,
                RuntimeEvent::Text {
                    content: content.clone(),
                    agent: agent_name.clone(),
                    structured_output: Some(data.clone()),
                },
            )
            .await;
            state.transcript.push(ChatTurn::assistant(&content));

            self.emit(
                &state.ids,
                RuntimeEvent::StructuredOutputReady {
                    agent: agent_name.clone(),
                    model_name: model_name.clone(),
                    structured_data: data.clone(),
                    auto_tool_mode: agent.def.auto_tool_mode,
                },
            )
            .await;

            // Structured fields feed conditional handoffs.
            if let Some(fields) = data.as_object() {
                for (key, value) in fields {
                    state.variables.insert(key.clone(), value.clone());
                }
            }

            if let Some(auto_tool) = &agent.auto_tool {
                if let Some(def) = state.bound.bundle.tool(auto_tool).cloned() {
                    let call_id = Uuid::new_v4().to_string();
                    let result = self
                        .invoke_tool(
                            state.ids.clone(),
                            &state.variables,
                            &agent_name,
                            &def,
                            &call_id,
                            data.clone(),
                        )
                        .await;
                    state.transcript.push(ChatTurn::tool(result.to_string()));
                }
            }
        } else {
            self.emit(
                &state.ids,
                RuntimeEvent::Text {
                    content: response.content.clone(),
                    agent: agent_name.clone(),
                    structured_output: None,
                },
            )
            .await;
            state.transcript.push(ChatTurn::assistant(&response.content));

            if let Some(call) = &response.tool_call {
                match agent.tools.iter().find(|t| t.name == call.name).cloned() {
                    Some(def) => {
                        let call_id = if call.id.is_empty() {
                            Uuid::new_v4().to_string()
                        } else {
                            call.id.clone()
                        };
                        let result = self
                            .invoke_tool(
                                state.ids.clone(),
                                &state.variables,
                                &agent_name,
                                &def,
                                &call_id,
                                call.arguments.clone(),
                            )
                            .await;
                        state.transcript.push(ChatTurn::tool(result.to_string()));
                    }
                    None => {
                        self.emit_tool_error(
                            &state.ids,
                            &agent_name,
                            &call.id,
                            &call.name,
                            "tool is not bound to this agent",
                        )
                        .await;
                    }
                }
            }
        }

        Ok(())
    }

    fn tool_specs(&self, agent: &BoundAgent) -> Vec<ProviderToolSpec> {
        agent
            .tools
            .iter()
            .map(|def| ProviderToolSpec {
                name: def.name.clone(),
                description: def.description.clone().unwrap_or_default(),
                input_schema: self
                    .tools
                    .get(&def.name)
                    .map(|t| t.input_schema())
                    .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
            })
            .collect()
    }

    /// Validate structured output, retrying once with a corrective
    /// instruction before failing the run. Returns the validated data
    /// and the content string it was parsed from.
    async fn structured_output(
        &self,
        state: &RunState,
        agent: &BoundAgent,
        model_name: &str,
        first: &CompletionResponse,
    ) -> Result<(Value, String), RunFailure> {
        let registry = &state.bound.bundle.structured_outputs;
        match parse_and_validate(registry, model_name, &first.content) {
            Ok(data) => Ok((data, first.content.clone())),
            Err(detail) => {
                let corrective = format!(
                    "The previous response did not satisfy the '{}' schema: {}. \
                     Respond again with corrected JSON only.",
                    model_name, detail
                );
                let mut messages = state.transcript.clone();
                messages.push(ChatTurn::assistant(&first.content));
                messages.push(ChatTurn::user(corrective));

                let retry = CompletionRequest {
                    system: agent.system_prompt.clone(),
                    messages,
                    tools: Vec::new(),
                    response_format: agent.response_schema.clone(),
                    delta_sink: None,
                };
                let second = self
                    .provider
                    .complete(&agent.def.llm_profile, retry)
                    .await
                    .map_err(|e| RunFailure::new("LLM_ERROR", e.to_string()))?;

                parse_and_validate(registry, model_name, &second.content)
                    .map(|data| (data, second.content.clone()))
                    .map_err(|detail| RunFailure::new("STRUCTURED_OUTPUT_INVALID", detail))
            }
        }
    }

    /// Execute one tool invocation; failures become error results, never
    /// run aborts.
    async fn invoke_tool(
        &self,
        ids: RunIds,
        variables: &BTreeMap<String, Value>,
        agent_name: &str,
        def: &ToolDef,
        call_id: &str,
        args: Value,
    ) -> Value {
        self.emit(
            &ids,
            RuntimeEvent::OrchestrationToolStarted {
                run_id: ids.chat_id.clone(),
                call_id: call_id.to_string(),
                name: def.name.clone(),
                status: RunStatus::InProgress,
            },
        )
        .await;

        let capability = format!("cap.tool.{}", def.name);
        if self
            .entitlements
            .require(&ids.app_id, Some(&ids.user_id), &capability)
            .is_err()
        {
            let error = Value::from("CAPABILITY_DENIED");
            self.emit(
                &ids,
                RuntimeEvent::ToolCall {
                    call_id: call_id.to_string(),
                    name: def.name.clone(),
                    agent: agent_name.to_string(),
                    arguments: Some(args),
                    component_type: None,
                    display: None,
                    awaiting_response: false,
                },
            )
            .await;
            self.emit(
                &ids,
                RuntimeEvent::ToolResponse {
                    call_id: call_id.to_string(),
                    name: def.name.clone(),
                    agent: agent_name.to_string(),
                    result: None,
                    status: ToolStatus::Error,
                    error: Some("CAPABILITY_DENIED".to_string()),
                },
            )
            .await;
            self.emit_tool_finished(&ids, call_id, &def.name, RunStatus::Failed)
                .await;
            return serde_json::json!({ "status": "error", "message": error });
        }

        let outcome = match def.kind {
            ToolKind::UiTool => self.invoke_ui_tool(&ids, agent_name, def, call_id, args).await,
            ToolKind::AgentTool | ToolKind::LifecycleTool => {
                self.invoke_agent_tool(&ids, variables, agent_name, def, call_id, args)
                    .await
            }
        };

        let status = if outcome.get("status") == Some(&Value::from("error")) {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        self.emit_tool_finished(&ids, call_id, &def.name, status).await;
        outcome
    }

    async fn invoke_ui_tool(
        &self,
        ids: &RunIds,
        agent_name: &str,
        def: &ToolDef,
        call_id: &str,
        args: Value,
    ) -> Value {
        let ui = def.ui.as_ref();
        let receiver = match self.ui_calls.register(&ids.chat_id, call_id) {
            Ok(receiver) => receiver,
            Err(message) => {
                self.emit_tool_error(ids, agent_name, call_id, &def.name, &message)
                    .await;
                return serde_json::json!({ "status": "error", "message": message });
            }
        };

        self.emit(
            ids,
            RuntimeEvent::ToolCall {
                call_id: call_id.to_string(),
                name: def.name.clone(),
                agent: agent_name.to_string(),
                arguments: Some(args),
                component_type: ui.map(|u| u.component.clone()),
                display: ui.map(|u| u.mode),
                awaiting_response: true,
            },
        )
        .await;

        match tokio::time::timeout(self.config.ui_tool_timeout, receiver).await {
            Ok(Ok(response)) => {
                self.emit(
                    ids,
                    RuntimeEvent::ToolResponse {
                        call_id: call_id.to_string(),
                        name: def.name.clone(),
                        agent: agent_name.to_string(),
                        result: Some(response.clone()),
                        status: ToolStatus::Ok,
                        error: None,
                    },
                )
                .await;
                serde_json::json!({ "status": "ok", "result": response })
            }
            _ => {
                self.ui_calls.abandon(call_id);
                let message = "UI tool response timed out";
                self.emit(
                    ids,
                    RuntimeEvent::ToolResponse {
                        call_id: call_id.to_string(),
                        name: def.name.clone(),
                        agent: agent_name.to_string(),
                        result: None,
                        status: ToolStatus::Error,
                        error: Some(message.to_string()),
                    },
                )
                .await;
                serde_json::json!({ "status": "error", "message": message })
            }
        }
    }

    async fn invoke_agent_tool(
        &self,
        ids: &RunIds,
        variables: &BTreeMap<String, Value>,
        agent_name: &str,
        def: &ToolDef,
        call_id: &str,
        args: Value,
    ) -> Value {
        self.emit(
            ids,
            RuntimeEvent::ToolCall {
                call_id: call_id.to_string(),
                name: def.name.clone(),
                agent: agent_name.to_string(),
                arguments: Some(args.clone()),
                component_type: None,
                display: None,
                awaiting_response: false,
            },
        )
        .await;

        let Some(tool) = self.tools.get(&def.name) else {
            let message = format!("tool '{}' is not registered", def.name);
            self.emit(
                ids,
                RuntimeEvent::ToolResponse {
                    call_id: call_id.to_string(),
                    name: def.name.clone(),
                    agent: agent_name.to_string(),
                    result: None,
                    status: ToolStatus::Error,
                    error: Some(message.clone()),
                },
            )
            .await;
            return serde_json::json!({ "status": "error", "message": message });
        };

        let context = ToolContext {
            app_id: ids.app_id.clone(),
            user_id: ids.user_id.clone(),
            chat_id: Some(ids.chat_id.clone()),
            workflow_name: Some(ids.workflow_name.clone()),
            variables: serde_json::to_value(variables).unwrap_or(Value::Null),
        };

        match tool.execute(args, context).await {
            Ok(result) => {
                self.emit(
                    ids,
                    RuntimeEvent::ToolResponse {
                        call_id: call_id.to_string(),
                        name: def.name.clone(),
                        agent: agent_name.to_string(),
                        result: Some(result.clone()),
                        status: ToolStatus::Ok,
                        error: None,
                    },
                )
                .await;
                serde_json::json!({ "status": "ok", "result": result })
            }
            Err(err) => {
                let message = err.to_string();
                self.emit(
                    ids,
                    RuntimeEvent::ToolResponse {
                        call_id: call_id.to_string(),
                        name: def.name.clone(),
                        agent: agent_name.to_string(),
                        result: None,
                        status: ToolStatus::Error,
                        error: Some(message.clone()),
                    },
                )
                .await;
                serde_json::json!({ "status": "error", "message": message })
            }
        }
    }

    /// Execute lifecycle tools for a trigger. Only `before_chat` may
    /// abort, by returning a halt action.
    async fn run_lifecycle(&self, state: &RunState, trigger: LifecycleTrigger) -> HookAction {
        for def in state.bound.lifecycle_tools(trigger) {
            let Some(tool) = self.tools.get(&def.name) else {
                tracing::warn!(hook = %def.name, "lifecycle tool not registered");
                continue;
            };

            let context = ToolContext {
                app_id: state.ids.app_id.clone(),
                user_id: state.ids.user_id.clone(),
                chat_id: Some(state.ids.chat_id.clone()),
                workflow_name: Some(state.ids.workflow_name.clone()),
                variables: serde_json::to_value(&state.variables).unwrap_or(Value::Null),
            };

            match tool.execute(Value::Object(Default::default()), context).await {
                Ok(result) => {
                    if trigger == LifecycleTrigger::BeforeChat {
                        if let HookAction::Halt(reason) = HookAction::from_result(&result) {
                            return HookAction::Halt(reason);
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(hook = %def.name, error = %err, "lifecycle hook failed");
                    self.entitlements.audit().record(
                        &state.ids.app_id,
                        Some(&state.ids.user_id),
                        &format!("hook.{}", def.name),
                        AuditResult::Error,
                        Some(err.to_string()),
                    );
                }
            }
        }
        HookAction::Continue
    }

    async fn finish_completed(&self, state: &RunState) {
        let mut summary = state.summary.clone();
        summary.total_tokens = summary.input_tokens + summary.output_tokens;

        self.counters
            .add(&state.ids.app_id, &state.ids.user_id, summary.total_tokens);
        self.usage.record(UsageEvent::tokens(
            &state.ids.app_id,
            &state.ids.user_id,
            &state.ids.chat_id,
            summary.input_tokens,
            summary.output_tokens,
        ));

        self.emit(
            &state.ids,
            RuntimeEvent::UsageSummary {
                total_tokens: summary.total_tokens,
                input_tokens: summary.input_tokens,
                output_tokens: summary.output_tokens,
                cost: None,
            },
        )
        .await;
        self.emit(
            &state.ids,
            RuntimeEvent::RunCompleted {
                run_id: state.ids.chat_id.clone(),
                status: RunStatus::Completed,
                summary,
            },
        )
        .await;
    }

    async fn emit_failure(&self, ids: &RunIds, code: &str, message: &str) {
        self.emit(
            ids,
            RuntimeEvent::ChatError {
                message: message.to_string(),
                code: Some(code.to_string()),
            },
        )
        .await;
        self.emit(
            ids,
            RuntimeEvent::RunFailed {
                run_id: ids.chat_id.clone(),
                status: RunStatus::Failed,
                code: code.to_string(),
                message: message.to_string(),
            },
        )
        .await;
    }

    async fn emit_cancelled(&self, ids: &RunIds) {
        self.emit(
            ids,
            RuntimeEvent::RunCancelled {
                run_id: ids.chat_id.clone(),
                status: RunStatus::Cancelled,
            },
        )
        .await;
    }

    async fn emit_tool_error(
        &self,
        ids: &RunIds,
        agent_name: &str,
        call_id: &str,
        tool_name: &str,
        message: &str,
    ) {
        self.emit(
            ids,
            RuntimeEvent::ToolResponse {
                call_id: call_id.to_string(),
                name: tool_name.to_string(),
                agent: agent_name.to_string(),
                result: None,
                status: ToolStatus::Error,
                error: Some(message.to_string()),
            },
        )
        .await;
    }

    async fn emit_tool_finished(
        &self,
        ids: &RunIds,
        call_id: &str,
        name: &str,
        status: RunStatus,
    ) {
        self.emit(
            ids,
            RuntimeEvent::OrchestrationToolCompleted {
                run_id: ids.chat_id.clone(),
                call_id: call_id.to_string(),
                name: name.to_string(),
                status,
            },
        )
        .await;
    }

    async fn emit(&self, ids: &RunIds, event: RuntimeEvent) {
        self.dispatcher.emit(&ids.app_id, &ids.chat_id, event).await;
    }

    fn cleanup(&self, chat_id: &str) {
        self.runs.remove(chat_id);
        self.ui_calls.clear_chat(chat_id);
    }
}

fn turn_from_message(message: &ChatMessage) -> Option<ChatTurn> {
    match message.role {
        MessageRole::User => Some(ChatTurn::user(&message.content)),
        MessageRole::Agent => Some(ChatTurn::assistant(&message.content)),
        MessageRole::Tool => Some(ChatTurn::tool(&message.content)),
        MessageRole::System => None,
    }
}

fn parse_and_validate(
    registry: &SchemaRegistry,
    model_name: &str,
    content: &str,
) -> Result<Value, String> {
    let data: Value = serde_json::from_str(content)
        .map_err(|e| format!("response is not valid JSON: {}", e))?;
    registry.validate_value(model_name, &data).map_err(|errors| {
        errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    })?;
    Ok(data)
}
