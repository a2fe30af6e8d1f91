//! Exponential backoff retry shared by evidence sources and agents.

use crate::config::RetryConfig;
use crate::error::{LlmError, SourceError};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Errors that can tell whether a retry may succeed.
pub trait Transient {
    /// Whether retrying after a backoff may succeed.
    fn is_transient(&self) -> bool;

    /// Server-provided minimum wait, if any.
    fn retry_after_secs(&self) -> Option<u64> {
        None
    }
}

impl Transient for LlmError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::Connection { .. } | LlmError::Timeout { .. }
        )
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            LlmError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl Transient for SourceError {
    fn is_transient(&self) -> bool {
        self.is_retryable()
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            SourceError::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

/// Run `operation`, retrying transient errors up to `config.max_retries` times.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
{
    with_retry_when(config, |e: &E| e.is_transient(), operation).await
}

/// Run `operation`, retrying every error for which `should_retry` holds.
///
/// Permanent errors and the error from the final attempt are returned as-is.
pub async fn with_retry_when<F, Fut, T, E, P>(
    config: &RetryConfig,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= config.max_retries || !should_retry(&e) {
                    return Err(e);
                }
                let backoff_ms = compute_backoff(config, attempt, e.retry_after_secs());
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms,
                    error = %e,
                    "Retrying after failure"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

/// Backoff before retry number `attempt + 1`: the larger of the server hint
/// and the exponential delay, never more than `max_backoff_ms`.
pub fn compute_backoff(config: &RetryConfig, attempt: u32, retry_after_secs: Option<u64>) -> u64 {
    let exponential = config.initial_backoff_ms as f64
        * config.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
    let capped = exponential.min(config.max_backoff_ms as f64).max(0.0) as u64;
    match retry_after_secs {
        Some(secs) => capped
            .max(secs.saturating_mul(1000))
            .min(config.max_backoff_ms),
        None => capped,
    }
}
