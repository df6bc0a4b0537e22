//! Background flusher forwarding usage batches to the platform.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;

use crate::config::{PlatformConfig, UsageConfig};
use crate::provider::{backoff_delay, RetryConfig};

use super::recorder::UsageRecorder;
use super::UsageEvent;

const MAX_SEND_ATTEMPTS: usize = 4;
const BASE_RETRY_DELAY_MS: u64 = 500;
const MAX_RETRY_DELAY_MS: u64 = 15_000;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Outbound platform client with client-credentials token caching.
pub struct PlatformClient {
    http: reqwest::Client,
    config: PlatformConfig,
    token: Mutex<Option<CachedToken>>,
}

impl PlatformClient {
    pub fn new(config: PlatformConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            token: Mutex::new(None),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.url.is_some()
    }

    async fn bearer(&self) -> Option<String> {
        let (Some(url), Some(client_id), Some(client_secret)) = (
            self.config.url.as_ref(),
            self.config.client_id.as_ref(),
            self.config.client_secret.as_ref(),
        ) else {
            return None;
        };

        if let Some(cached) = self.token.lock().as_ref() {
            if cached.expires_at > Instant::now() {
                return Some(cached.token.clone());
            }
        }

        let mut form = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", client_id.clone()),
            ("client_secret", client_secret.clone()),
        ];
        if let Some(scope) = &self.config.token_scope {
            form.push(("scope", scope.clone()));
        }

        let response: TokenResponse = self
            .http
            .post(format!("{}/oauth/token", url))
            .form(&form)
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?
            .json()
            .await
            .ok()?;

        let ttl = response.expires_in.unwrap_or(300).saturating_sub(30);
        *self.token.lock() = Some(CachedToken {
            token: response.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(ttl),
        });
        Some(response.access_token)
    }

    /// POST one batch; any 2xx is success.
    pub async fn send_usage_batch(&self, events: &[UsageEvent]) -> Result<(), String> {
        let url = self
            .config
            .url
            .as_ref()
            .map(|u| format!("{}/api/billing/usage-events", u))
            .ok_or_else(|| "platform URL not configured".to_string())?;

        let mut request = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "events": events }));
        if let Some(token) = self.bearer().await {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("billing collector returned {}", response.status()))
        }
    }
}

/// Drains the recorder at the lesser of the batch size and the interval.
pub struct UsageFlusher {
    recorder: Arc<UsageRecorder>,
    platform: Arc<PlatformClient>,
    config: UsageConfig,
}

impl UsageFlusher {
    pub fn new(
        recorder: Arc<UsageRecorder>,
        platform: Arc<PlatformClient>,
        config: UsageConfig,
    ) -> Self {
        Self {
            recorder,
            platform,
            config,
        }
    }

    /// Run until the surrounding task is aborted.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.flush_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = self.recorder.batch_ready() => {}
                }
                self.flush_once().await;
            }
        })
    }

    /// Drain and send pending batches. Failed batches are re-queued so a
    /// later pass (or overflow eviction) deals with them; callers are
    /// never blocked.
    pub async fn flush_once(&self) {
        loop {
            let batch = self.recorder.drain(self.config.flush_batch_size);
            if batch.is_empty() {
                return;
            }
            if !self.platform.is_configured() {
                // Self-host without a billing collector: consume locally.
                self.recorder.mark_flushed(batch.len() as u64);
                continue;
            }

            match self.send_with_retry(&batch).await {
                Ok(()) => self.recorder.mark_flushed(batch.len() as u64),
                Err(err) => {
                    tracing::warn!(error = %err, count = batch.len(), "usage flush failed");
                    self.recorder.requeue(batch);
                    return;
                }
            }
        }
    }

    async fn send_with_retry(&self, batch: &[UsageEvent]) -> Result<(), String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.platform.send_usage_batch(batch).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < MAX_SEND_ATTEMPTS => {
                    tokio::time::sleep(retry_delay(attempt)).await;
                    tracing::debug!(error = %err, attempt, "retrying usage batch");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Same half-jitter backoff the model providers use, bounded for the
/// flusher's cadence.
fn retry_delay(attempt: usize) -> Duration {
    backoff_delay(
        attempt,
        &RetryConfig {
            max_attempts: MAX_SEND_ATTEMPTS,
            base_delay_ms: BASE_RETRY_DELAY_MS,
            max_delay_ms: MAX_RETRY_DELAY_MS,
        },
    )
}
