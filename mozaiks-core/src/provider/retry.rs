//! Retry with exponential backoff for transient provider errors.

use std::time::Duration;

use rand::Rng;

use super::ProviderError;

/// Bounds for retrying transient provider errors.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 20_000,
        }
    }
}

/// Delay for a 1-based attempt.
///
/// The ceiling doubles per attempt up to `max_delay_ms`; the actual
/// delay is drawn uniformly from the upper half of that ceiling
/// (half-jitter), which keeps concurrent retries spread out without
/// letting any of them collapse toward zero.
pub fn backoff_delay(attempt: usize, config: &RetryConfig) -> Duration {
    let doublings = attempt.saturating_sub(1).min(16) as u32;
    let ceiling = config
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(doublings))
        .min(config.max_delay_ms);

    let floor = ceiling / 2;
    let delay_ms = rand::thread_rng().gen_range(floor..=ceiling);
    Duration::from_millis(delay_ms)
}

/// Retry an async provider operation on transient errors only.
pub async fn retry_with_backoff<F, Fut, T>(
    mut op: F,
    config: &RetryConfig,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if attempt >= config.max_attempts || !err.is_retryable() {
                    return Err(err);
                }
                let delay = backoff_delay(attempt, config);
                tracing::debug!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying provider call"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
