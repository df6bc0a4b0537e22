//! OpenAI-compatible HTTP provider.

use std::time::Duration;

use serde_json::{json, Value};

use super::{
    retry_with_backoff, ChatTurn, CompletionRequest, CompletionResponse, LlmProfile,
    ModelProvider, ProviderError, ProviderToolCall, RetryConfig, TokenUsage, TurnRole,
};

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct HttpProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryConfig,
}

impl HttpProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn build_body(&self, profile: &LlmProfile, request: &CompletionRequest) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(json!({ "role": "system", "content": request.system }));
        }
        for turn in &request.messages {
            messages.push(json!({ "role": role_name(turn), "content": turn.content }));
        }

        let mut body = json!({
            "model": profile.model,
            "messages": messages,
        });
        if let Some(temperature) = profile.temperature {
            body["temperature"] = json!(temperature);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": tool.name,
                                "description": tool.description,
                                "parameters": tool.input_schema,
                            }
                        })
                    })
                    .collect(),
            );
        }
        if let Some(schema) = &request.response_format {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema["title"].as_str().unwrap_or("response"),
                    "schema": schema,
                    "strict": true,
                }
            });
        }
        body
    }

    fn parse_response(&self, body: Value) -> Result<CompletionResponse, ProviderError> {
        let message = &body["choices"][0]["message"];
        if message.is_null() {
            return Err(ProviderError::Model("response has no choices".to_string()));
        }

        let content = message["content"].as_str().unwrap_or_default().to_string();

        let tool_call = message["tool_calls"][0].as_object().map(|call| {
            let arguments = call
                .get("function")
                .and_then(|f| f["arguments"].as_str())
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or(Value::Null);
            ProviderToolCall {
                id: call
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                name: call
                    .get("function")
                    .and_then(|f| f["name"].as_str())
                    .unwrap_or_default()
                    .to_string(),
                arguments,
            }
        });

        let usage = body["usage"].as_object().map(|usage| TokenUsage {
            input_tokens: usage
                .get("prompt_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            output_tokens: usage
                .get("completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        });

        Ok(CompletionResponse {
            content,
            tool_call,
            usage,
        })
    }

    async fn send(&self, body: &Value) -> Result<Value, ProviderError> {
        let mut request = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Network(format!("request timed out: {}", e))
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| ProviderError::Model(format!("malformed response: {}", e)))
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(match status.as_u16() {
                401 | 403 => ProviderError::Authentication(detail),
                429 => ProviderError::RateLimited(detail),
                500..=599 => ProviderError::ServiceUnavailable(detail),
                _ => ProviderError::Model(format!("{}: {}", status, detail)),
            })
        }
    }
}

fn role_name(turn: &ChatTurn) -> &'static str {
    match turn.role {
        TurnRole::System => "system",
        TurnRole::User => "user",
        TurnRole::Assistant => "assistant",
        TurnRole::Tool => "tool",
    }
}

#[async_trait::async_trait]
impl ModelProvider for HttpProvider {
    async fn complete(
        &self,
        profile: &LlmProfile,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = self.build_body(profile, &request);
        let raw = retry_with_backoff(|| self.send(&body), &self.retry).await?;
        let response = self.parse_response(raw)?;

        // Non-streaming transport: surface the full content as one delta
        // so stream consumers still observe the text.
        if let Some(sink) = &request.delta_sink {
            if !response.content.is_empty() {
                let _ = sink.send(response.content.clone());
            }
        }

        Ok(response)
    }
}
