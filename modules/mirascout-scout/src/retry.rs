use std::fmt;
use std::future::Future;
use std::time::Duration;

use mirascout_common::RetryConfig;
use rand::Rng;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::session::TransportError;

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    /// Try again. A server-provided hint overrides the computed backoff.
    Retryable { delay_hint: Option<Duration> },
    Fatal,
}

/// A network step that did not succeed within its policy.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last_error: E,
    },
    #[error("{operation} failed: {error}")]
    Fatal { operation: String, error: E },
}

impl<E> RetryError<E> {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }

    pub fn error(&self) -> &E {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::Fatal { error, .. } => error,
        }
    }
}

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay, config.max_delay)
    }

    /// Retry immediately, `max_attempts` times in total.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff before retrying after failed attempt number `attempt` (1-based),
    /// without jitter: `base * 2^(attempt-1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Actual delay to sleep. A server hint wins over the computed value but is
    /// still capped at `max_delay`; computed backoff gets up to 25% jitter.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint.min(self.max_delay);
        }
        let backoff = self.backoff(attempt);
        let jitter_cap = backoff.as_millis() as u64 / 4;
        if jitter_cap == 0 {
            return backoff;
        }
        backoff + Duration::from_millis(rand::rng().random_range(0..=jitter_cap))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Default classification for transport failures: rate limiting, temporary
/// unavailability and transient transport errors are retried, everything
/// else is fatal.
pub fn classify_transport(error: &TransportError) -> Retryability {
    match error {
        TransportError::Status {
            status: 429 | 502 | 503 | 504,
            retry_after,
            ..
        } => Retryability::Retryable {
            delay_hint: *retry_after,
        },
        TransportError::Status { .. } => Retryability::Fatal,
        TransportError::Timeout(_) | TransportError::Connection(_) => {
            Retryability::Retryable { delay_hint: None }
        }
        TransportError::Protocol(_) => Retryability::Fatal,
    }
}

/// Run `op` until it succeeds, fails fatally, or the attempt budget is spent.
///
/// Never decides what a failure means for the run; it only reports it.
pub async fn with_retry<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
    classify: C,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> Retryability,
    E: fmt::Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match op().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        let delay_hint = match classify(&err) {
            Retryability::Fatal => {
                warn!(operation, attempt, error = %err, "Non-retryable failure");
                return Err(RetryError::Fatal {
                    operation: operation.to_string(),
                    error: err,
                });
            }
            Retryability::Retryable { delay_hint } => delay_hint,
        };

        if attempt >= policy.max_attempts {
            error!(
                operation,
                attempts = attempt,
                error = %err,
                "Retry budget exhausted"
            );
            return Err(RetryError::Exhausted {
                operation: operation.to_string(),
                attempts: attempt,
                last_error: err,
            });
        }

        let delay = policy.delay_for(attempt, delay_hint);
        warn!(
            operation,
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            hinted = delay_hint.is_some(),
            error = %err,
            "Retryable failure, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}
