//! Bounded retry with exponential backoff for idempotent network calls.
//!
//! Never wrap `settle` in this: a settlement that timed out may already be on
//! chain.

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "initialDelayMs")]
    pub initial_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "maxDelayMs")]
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!(
                "multiplier must be a finite number >= 1, got {}",
                self.multiplier
            ));
        }
        Ok(())
    }

    /// Delay after `delay`, grown by the multiplier and capped at `max_delay`.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("Invalid retry policy: {0}")]
    InvalidConfig(String),
    #[error("Max attempts exceeded after {attempts} attempts: {last}")]
    MaxAttemptsExceeded { attempts: u32, last: E },
    #[error("Retry cancelled")]
    Cancelled,
    #[error("{0}")]
    NotRetryable(E),
}

impl<E> RetryError<E> {
    /// The operation's own error, if one was the reason for giving up.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::MaxAttemptsExceeded { last, .. } => Some(last),
            RetryError::NotRetryable(e) => Some(e),
            RetryError::InvalidConfig(_) | RetryError::Cancelled => None,
        }
    }
}

/// Runs `operation` until it succeeds, fails with an error `is_retryable`
/// rejects, runs out of attempts, or `cancel` fires.
///
/// Cancellation is checked before every attempt and interrupts the backoff
/// sleep. An invalid policy is reported before `operation` is ever called.
pub async fn retry<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    is_retryable: R,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    policy.validate().map_err(RetryError::InvalidConfig)?;
    let mut delay = policy.initial_delay.min(policy.max_delay);
    let mut attempts = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        attempts += 1;
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !is_retryable(&err) {
            return Err(RetryError::NotRetryable(err));
        }
        if attempts >= policy.max_attempts {
            return Err(RetryError::MaxAttemptsExceeded {
                attempts,
                last: err,
            });
        }
        tracing::debug!(attempts, delay_ms = delay.as_millis() as u64, "retrying after failure");
        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        delay = policy.next_delay(delay);
    }
}
