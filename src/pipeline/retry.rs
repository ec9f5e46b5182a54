//! Exponential-backoff retry for pipeline stages.
//!
//! The operation is re-invoked from scratch on every attempt, so when it is
//! a whole stage run each attempt leaves its own step record behind.

use std::future::Future;
use std::time::Duration;

use super::orchestrator::PipelineError;
use crate::agents::AgentError;

/// Message fragments that mark a failure as transient.
const TRANSIENT_PATTERNS: &[&str] = &[
    "429",
    "rate limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
    "network",
    "timeout",
    "timed out",
    "econnreset",
    "connection reset",
    "connection refused",
];

/// Retry policy for one kind of error.
pub struct RetryConfig<E> {
    /// Attempts allowed after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub is_retryable: fn(&E) -> bool,
}

impl<E> Clone for RetryConfig<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for RetryConfig<E> {}

impl<E> std::fmt::Debug for RetryConfig<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .finish_non_exhaustive()
    }
}

impl<E> RetryConfig<E> {
    pub fn new(max_retries: u32, base_delay: Duration, is_retryable: fn(&E) -> bool) -> Self {
        Self {
            max_retries,
            base_delay,
            is_retryable,
        }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << retry.min(16))
    }
}

impl RetryConfig<PipelineError> {
    /// Two retries starting at two seconds, for transient stage failures.
    pub fn for_stages() -> Self {
        Self::new(2, Duration::from_millis(2000), is_retryable_error)
    }
}

/// Runs `operation` until it succeeds, fails permanently or runs out of
/// retries. The operation receives the 0-based attempt number.
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig<E>, operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    with_retry_notify(config, operation, |_, _, _| {}).await
}

/// Like [`with_retry`], calling `on_retry(error, next_attempt, delay)`
/// before each backoff sleep.
pub async fn with_retry_notify<T, E, F, Fut, N>(
    config: &RetryConfig<E>,
    mut operation: F,
    mut on_retry: N,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    N: FnMut(&E, u32, Duration),
{
    let mut attempt = 0u32;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < config.max_retries && (config.is_retryable)(&err) => {
                let delay = config.delay_for(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient error, will retry"
                );
                attempt += 1;
                on_retry(&err, attempt, delay);
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// True when `message` names a rate limit, network fault or timeout.
pub fn is_transient_message(message: &str) -> bool {
    let message = message.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| message.contains(p))
}

/// Classifies pipeline errors for [`with_retry`].
///
/// Configuration, validation and storage failures are never retried; agent
/// failures are retried on HTTP 429 or a transient-looking message.
pub fn is_retryable_error(error: &PipelineError) -> bool {
    match error {
        PipelineError::Configuration(_)
        | PipelineError::InvalidInput { .. }
        | PipelineError::Storage(_)
        | PipelineError::Cancelled => false,
        PipelineError::Agent(AgentError::Llm(llm)) if llm.status_code() == Some(429) => true,
        PipelineError::Agent(_) | PipelineError::AgentFailed { .. } => {
            is_transient_message(&error.to_string())
        }
    }
}
