use std::{fmt::Display, future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that know whether the failed call is worth repeating
pub trait Transient {
    /// Returns `true` if the same call may succeed later without any change on the caller side
    fn is_transient(&self) -> bool;
}

/// How long to wait between two consecutive attempts
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry
    Fixed { delay: Duration },
    /// Delay doubles on each retry, capped at `max_delay`
    Exponential {
        initial_delay: Duration,
        max_delay: Duration,
    },
}

impl Backoff {
    /// Delay slept before retry number `retry` (the first retry is `1`)
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential {
                initial_delay,
                max_delay,
            } => {
                let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
                initial_delay
                    .checked_mul(factor)
                    .map_or(*max_delay, |delay| delay.min(*max_delay))
            }
        }
    }
}

/// Bounded retry policy for calls against an eventually consistent or flaky collaborator.
///
/// At most `max_attempts` calls are made. The backoff delay is slept between attempts only,
/// never after the last one, so a call that succeeds on attempt `n` has slept exactly `n - 1`
/// times.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay schedule between attempts
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Constructor for a fixed-delay policy
    #[must_use]
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed { delay },
        }
    }

    /// Constructor for an exponential policy
    #[must_use]
    pub const fn exponential(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential {
                initial_delay,
                max_delay,
            },
        }
    }

    /// Runs `operation` until it yields a value, fails permanently or the attempts run out.
    ///
    /// # Arguments
    ///
    /// * `operation_name` - Name used in logs and errors
    /// * `operation` - Called with the 1-based attempt number. It resolves to:
    ///   - `Ok(Some(value))` when the call succeeded
    ///   - `Ok(None)` when the call went through but the value is not available yet
    ///   - `Err(e)` when the call failed; retried only if `e.is_transient()`
    ///
    /// # Errors
    ///
    /// * `RetryError::Exhausted` if no attempt produced a value
    /// * `RetryError::Permanent` on the first non transient error
    pub async fn run<T, E, F, Fut>(
        &self,
        operation_name: &'static str,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: Transient + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=max_attempts {
            match operation(attempt).await {
                Ok(Some(value)) => {
                    debug!(
                        target = "whispr-utils",
                        event = "retry_succeeded",
                        operation = operation_name,
                        attempt,
                        "Operation succeeded"
                    );
                    return Ok(value);
                }
                Ok(None) => {
                    debug!(
                        target = "whispr-utils",
                        event = "retry_value_unavailable",
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        "Value not available yet"
                    );
                }
                Err(error) if error.is_transient() => {
                    warn!(
                        target = "whispr-utils",
                        event = "retry_attempt_failed",
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        error = %error,
                        "Attempt failed with a transient error"
                    );
                    last_error = Some(error);
                }
                Err(error) => {
                    return Err(RetryError::Permanent {
                        operation: operation_name,
                        attempt,
                        error,
                    })
                }
            }
            if attempt < max_attempts {
                tokio::time::sleep(self.backoff.delay_for(attempt)).await;
            }
        }
        Err(RetryError::Exhausted {
            operation: operation_name,
            attempts: max_attempts,
            last_error,
        })
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("`{operation}` gave up after {attempts} attempts")]
    Exhausted {
        operation: &'static str,
        attempts: u32,
        last_error: Option<E>,
    },
    #[error("`{operation}` failed permanently on attempt {attempt}: {error}")]
    Permanent {
        operation: &'static str,
        attempt: u32,
        error: E,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts made before giving up
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Permanent { attempt, .. } => *attempt,
        }
    }
}
