//! Error classification and jittered exponential backoff for provider calls.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One failure of a provider call, carrying exactly one kind. The retry
/// policy and the caller's exit-code mapping are driven by this tag alone.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("authentication error: {0}")]
    Auth(String),

    #[error("rate limited")]
    RateLimit,

    #[error("server error (status {status}): {body}")]
    Server { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("empty response from provider")]
    Empty,

    #[error("canceled")]
    Canceled,

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Only rate limits and server errors are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::RateLimit | ProviderError::Server { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ProviderError::Auth(_))
    }
}

/// Backoff schedule: delay before retry `k` is `base_delay * 2^k`, scaled by
/// a full-jitter factor in `[0.5, 1.5)`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt, so at most `max_retries + 1` calls.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy suitable for unit tests (no real waiting).
    pub fn instant() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        base.mul_f64(0.5 + rand::random::<f64>())
    }
}

/// Retries `f` per the policy. Non-retryable errors return after a single
/// attempt; cancellation short-circuits both the backoff wait and any
/// further attempts.
pub async fn retry_with_backoff<T, F, Fut>(
    ctx: &CancellationToken,
    policy: &RetryPolicy,
    mut f: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut last_err = ProviderError::Canceled;
    for attempt in 0..=policy.max_retries {
        if ctx.is_cancelled() {
            return Err(ProviderError::Canceled);
        }
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempt, "provider call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                if !e.is_retryable() {
                    return Err(e);
                }
                if attempt < policy.max_retries {
                    let delay = policy.delay(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "provider call failed, backing off"
                    );
                    tokio::select! {
                        _ = ctx.cancelled() => return Err(ProviderError::Canceled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                last_err = e;
            }
        }
    }
    Err(last_err)
}
