//! Bounded retries with a per-attempt timeout.
//!
//! Every LLM and GitHub call goes through [`retry`], so a hung connection can
//! never stall a pipeline cycle for longer than
//! `max_attempts * attempt_timeout` plus backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts,
            attempt_timeout,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }

    /// Single attempt, no backoff.
    pub fn once(attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            attempt_timeout,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before the attempt following attempt number `attempt` (1-based).
    ///
    /// Doubles each time up to `max_delay`, plus up to 25% jitter.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.0..0.25);
        base.mul_f64(1.0 + jitter)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("timed out after {attempts} attempt(s)")]
    TimedOut { attempts: u32 },

    #[error("failed after {attempts} attempt(s): {error}")]
    Failed { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::TimedOut { attempts } | RetryError::Failed { attempts, .. } => *attempts,
        }
    }
}

/// Run `attempt_fn` until it succeeds, fails with a non-retryable error, or
/// the policy's attempts are used up.
///
/// Timeouts are always retried. `attempt_fn` receives the 1-based attempt
/// number.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut attempt_fn: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = RetryError::TimedOut { attempts: 0 };

    for attempt in 1..=max_attempts {
        match tokio::time::timeout(policy.attempt_timeout, attempt_fn(attempt)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) => {
                warn!(
                    "{} failed (attempt {}/{}): {}",
                    operation, attempt, max_attempts, error
                );
                let retryable = is_retryable(&error);
                last_error = RetryError::Failed {
                    attempts: attempt,
                    error,
                };
                if !retryable {
                    return Err(last_error);
                }
            }
            Err(_) => {
                warn!(
                    "{} timed out after {:?} (attempt {}/{})",
                    operation, policy.attempt_timeout, attempt, max_attempts
                );
                last_error = RetryError::TimedOut { attempts: attempt };
            }
        }

        if attempt < max_attempts {
            tokio::time::sleep(policy.delay_after(attempt)).await;
        }
    }

    Err(last_error)
}
