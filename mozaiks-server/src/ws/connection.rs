//! WebSocket connection lifecycle: auth, replay, routing, heartbeats.

use std::borrow::Cow;
use std::collections::HashMap;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Deserialize;
use serde_json::Value;

use mozaiks_core::entitlement::AuditResult;
use mozaiks_core::session::ResumeData;

use crate::actions::{ActionContext, ArtifactAction};
use crate::agui::{AguiEvent, SnapshotMode};
use crate::state::AppState;

/// Close codes used by the chat transport.
const CLOSE_AUTH_REQUIRED: u16 = 4001;
const CLOSE_TENANCY_MISMATCH: u16 = 4003;
const CLOSE_POLICY: u16 = 1008;

const TOKEN_PROTOCOL_PREFIX: &str = "access_token.";

/// Inbound client → server messages.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientMessage {
    #[serde(rename = "user.input.submit")]
    UserInput { text: String },

    #[serde(rename = "ui.tool.response")]
    UiToolResponse {
        #[serde(alias = "event_id")]
        corr: String,
        #[serde(default)]
        response_data: Value,
    },

    #[serde(rename = "artifact.action")]
    Action {
        #[serde(default)]
        action_id: Option<String>,
        artifact_id: String,
        tool: String,
        #[serde(default)]
        params: Value,
        #[serde(default)]
        context: ActionContext,
    },

    #[serde(rename = "user.cancel")]
    Cancel {},

    #[serde(rename = "ping")]
    Ping {},
}

/// Extract the bearer token from the WebSocket subprotocol header, else
/// from the `access_token` query parameter.
fn socket_token(headers: &HeaderMap, params: &HashMap<String, String>) -> Option<String> {
    if let Some(protocols) = headers
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
    {
        for protocol in protocols.split(',') {
            if let Some(token) = protocol.trim().strip_prefix(TOKEN_PROTOCOL_PREFIX) {
                return Some(token.to_string());
            }
        }
    }
    params.get("access_token").cloned()
}

/// `GET /ws/{workflow_name}/{app_id}/{chat_id}/{user_id}`
pub async fn chat_socket(
    State(state): State<AppState>,
    Path((workflow_name, app_id, chat_id, user_id)): Path<(String, String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = socket_token(&headers, &params);
    ws.on_upgrade(move |socket| {
        handle_chat_socket(state, socket, workflow_name, app_id, chat_id, user_id, token)
    })
}

/// `GET /ws/notifications/{user_id_hint}` — auth and routing skeleton;
/// notification delivery is out of core scope.
pub async fn notification_socket(
    State(state): State<AppState>,
    Path(user_id_hint): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = socket_token(&headers, &params);
    ws.on_upgrade(move |mut socket| async move {
        let Some(token) = token else {
            close_with(&mut socket, CLOSE_AUTH_REQUIRED, "auth required").await;
            return;
        };
        let identity = match state.validator.validate(&token).await {
            Ok(identity) => identity,
            Err(_) => {
                close_with(&mut socket, CLOSE_AUTH_REQUIRED, "invalid token").await;
                return;
            }
        };
        if identity.user_id != user_id_hint {
            close_with(&mut socket, CLOSE_TENANCY_MISMATCH, "identity mismatch").await;
            return;
        }

        // Keep the connection alive for future notification routing.
        while let Some(Ok(message)) = socket.recv().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    })
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: Cow::Borrowed(reason),
        })))
        .await;
}

async fn handle_chat_socket(
    state: AppState,
    mut socket: WebSocket,
    _workflow_name: String,
    app_id: String,
    chat_id: String,
    user_id: String,
    token: Option<String>,
) {
    let Some(token) = token else {
        close_with(&mut socket, CLOSE_AUTH_REQUIRED, "auth required").await;
        return;
    };
    let identity = match state.validator.validate(&token).await {
        Ok(identity) => identity,
        Err(_) => {
            close_with(&mut socket, CLOSE_AUTH_REQUIRED, "invalid token").await;
            return;
        }
    };

    // The path identifiers must match the verified token.
    if identity.user_id != user_id {
        close_with(&mut socket, CLOSE_TENANCY_MISMATCH, "identity mismatch").await;
        return;
    }
    if identity.app_id != app_id {
        let _ = state.entitlements.enforce_tenancy(
            &identity.app_id,
            &app_id,
            Some(&identity.user_id),
            &format!("ws:{}", chat_id),
        );
        close_with(&mut socket, CLOSE_TENANCY_MISMATCH, "tenancy mismatch").await;
        return;
    }

    // Revive an in-progress run that lost its task (restart), then build
    // the replay preamble from persistence.
    if let Err(err) = state.orchestrator.ensure_run(&app_id, &chat_id).await {
        tracing::warn!(error = %err, chat_id = %chat_id, "run revival failed");
    }
    let preamble = match state.store.resume(&app_id, &chat_id).await {
        Ok(Some(resume)) => replay_preamble(&state, &app_id, &chat_id, &resume),
        _ => Vec::new(),
    };

    let mut outbound = state.connections.attach(&chat_id, preamble);
    let mut heartbeat = tokio::time::interval(state.connections.heartbeat_interval());
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.reset();

    loop {
        tokio::select! {
            payload = outbound.recv() => match payload {
                Some(payload) => {
                    if socket.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                // Sender dropped by the registry: backpressure hard cap.
                None => {
                    close_with(&mut socket, CLOSE_POLICY, "outbound queue overflow").await;
                    break;
                }
            },

            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(raw))) => {
                    handle_client_message(&state, &identity, &chat_id, &raw).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },

            _ = heartbeat.tick() => {
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.connections.detach(&chat_id);
    // Pending UI-tool waits die with the connection.
    state.orchestrator.ui_calls().clear_chat(&chat_id);
}

/// Snapshot replay sent before buffered and live events.
fn replay_preamble(
    state: &AppState,
    app_id: &str,
    chat_id: &str,
    resume: &ResumeData,
) -> Vec<String> {
    if !state.connections.agui_enabled() {
        return Vec::new();
    }

    let thread_id = format!("{}:{}", app_id, chat_id);
    let mut payloads = Vec::with_capacity(1 + resume.artifacts.len());

    let messages: Vec<Value> = resume
        .messages
        .iter()
        .filter_map(|m| serde_json::to_value(m).ok())
        .collect();
    payloads.push(snapshot_payload(
        app_id,
        chat_id,
        &AguiEvent::MessagesSnapshot {
            run_id: chat_id.to_string(),
            thread_id: thread_id.clone(),
            total_messages: messages.len(),
            messages,
            mode: SnapshotMode::Auto,
        },
    ));

    for artifact in &resume.artifacts {
        payloads.push(snapshot_payload(
            app_id,
            chat_id,
            &AguiEvent::StateSnapshot {
                run_id: chat_id.to_string(),
                thread_id: thread_id.clone(),
                artifact_id: artifact.artifact_id.clone(),
                state: artifact.state.clone(),
                workflow_name: artifact.workflow_name.clone(),
            },
        ));
    }

    payloads
}

fn snapshot_payload(app_id: &str, chat_id: &str, event: &AguiEvent) -> String {
    let mut value = serde_json::to_value(event).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.insert("chat_id".to_string(), Value::String(chat_id.to_string()));
        map.insert("app_id".to_string(), Value::String(app_id.to_string()));
        map.insert(
            "timestamp".to_string(),
            serde_json::to_value(chrono::Utc::now()).unwrap_or(Value::Null),
        );
    }
    value.to_string()
}

async fn handle_client_message(
    state: &AppState,
    identity: &mozaiks_core::Identity,
    chat_id: &str,
    raw: &str,
) {
    let message: ClientMessage = match serde_json::from_str(raw) {
        Ok(message) => message,
        Err(err) => {
            tracing::debug!(chat_id, error = %err, "unparseable client message");
            return;
        }
    };

    match message {
        ClientMessage::UserInput { text } => {
            if !state.orchestrator.submit_input(chat_id, text).await {
                tracing::debug!(chat_id, "input submitted with no live run");
            }
        }

        ClientMessage::UiToolResponse {
            corr,
            response_data,
        } => {
            // Late or unknown correlations are dropped and audited.
            if !state.orchestrator.resolve_ui_response(&corr, response_data) {
                state.entitlements.audit().record(
                    &identity.app_id,
                    Some(&identity.user_id),
                    "ui.tool.response",
                    AuditResult::Dropped,
                    Some(format!("no waiter for correlation {}", corr)),
                );
            }
        }

        ClientMessage::Action {
            action_id,
            artifact_id,
            tool,
            params,
            context,
        } => {
            let action = ArtifactAction {
                action_id,
                artifact_id,
                tool,
                params,
                context: ActionContext {
                    chat_id: context.chat_id.or_else(|| Some(chat_id.to_string())),
                    ..context
                },
            };
            let actions = state.actions.clone();
            let identity = identity.clone();
            tokio::spawn(async move {
                actions.execute(action, &identity).await;
            });
        }

        ClientMessage::Cancel {} => {
            state.orchestrator.cancel(chat_id);
        }

        ClientMessage::Ping {} => {}
    }
}
