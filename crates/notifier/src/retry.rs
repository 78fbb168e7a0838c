//! Bounded retry with fixed backoff.
//!
//! [`RetryExecutor::run`] drives an async operation up to
//! [`RetryPolicy::max_attempts`] times, sleeping [`RetryPolicy::backoff`]
//! between a failed attempt and the next one. Attempts are strictly
//! sequential. Only the last failure is returned; earlier ones are logged.
//!
//! The backoff wait races a [`CancellationToken`]. Cancellation is only
//! observed there, never while the operation itself is running.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use courier_common::config::AppConfig;
use courier_common::error::AppError;

/// Default number of attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(300);

/// Immutable retry configuration shared by every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    /// `max_attempts` must be at least 1 (a single attempt, no retry).
    pub fn new(max_attempts: u32, backoff: Duration) -> Result<Self, AppError> {
        if max_attempts < 1 {
            return Err(AppError::Config(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            backoff,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Self::new(config.retry_max_attempts, config.retry_backoff())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

/// Classifies failures for the executor.
///
/// A non-retryable failure ends the run immediately, whatever the attempts
/// left.
pub trait Retryable {
    fn is_retryable(&self) -> bool {
        true
    }
}

/// Terminal failure of a retried operation. Displays as the last failure.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed.
    #[error("{last}")]
    Exhausted { attempts: u32, last: E },

    /// The operation reported a failure that retrying cannot fix.
    #[error("{last}")]
    NonRetryable { attempt: u32, last: E },

    /// Shutdown was requested while waiting to retry.
    #[error("{last}")]
    Cancelled { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    /// Number of attempts actually made.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Cancelled { attempts, .. } => {
                *attempts
            }
            RetryError::NonRetryable { attempt, .. } => *attempt,
        }
    }

    pub fn last(&self) -> &E {
        match self {
            RetryError::Exhausted { last, .. }
            | RetryError::NonRetryable { last, .. }
            | RetryError::Cancelled { last, .. } => last,
        }
    }

    pub fn into_last(self) -> E {
        match self {
            RetryError::Exhausted { last, .. }
            | RetryError::NonRetryable { last, .. }
            | RetryError::Cancelled { last, .. } => last,
        }
    }
}

/// Stateless bounded-retry driver.
pub struct RetryExecutor;

impl RetryExecutor {
    /// Run `operation` under `policy`.
    ///
    /// Returns the attempt number that succeeded.
    pub async fn run<F, Fut, E>(
        operation_name: &str,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<u32, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Retryable + std::fmt::Display,
    {
        let max_attempts = policy.max_attempts();
        let mut attempt = 1;

        loop {
            if attempt > 1 {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    "Retry attempt"
                );
            }

            let err = match operation().await {
                Ok(()) => return Ok(attempt),
                Err(e) => e,
            };

            tracing::warn!(
                operation = operation_name,
                attempt,
                max_attempts,
                error = %err,
                "Attempt failed"
            );

            if !err.is_retryable() {
                return Err(RetryError::NonRetryable { attempt, last: err });
            }
            if attempt >= max_attempts {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        "Backoff interrupted by shutdown, giving up"
                    );
                    return Err(RetryError::Cancelled { attempts: attempt, last: err });
                }
                _ = tokio::time::sleep(policy.backoff()) => {}
            }

            attempt += 1;
        }
    }
}
