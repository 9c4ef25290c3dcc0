//! Caller-side retry of whole commands with exponential backoff.
//!
//! The pipeline never retries by itself: a [`CommandError::Concurrency`]
//! means the decision was made on stale state, and only re-running the whole
//! command (load, diff, push) can fix that. [`retry_on_conflict`] does exactly
//! that for errors whose [`CommandError::is_retryable`] is true.
//!
//! # Example
//!
//! ```ignore
//! use sourced_iam_command::retry::{RetryPolicy, retry_on_conflict};
//!
//! let details = retry_on_conflict(RetryPolicy::default(), || {
//!     commands.change_org_member(&ctx, "org-1", "user-1", vec!["ORG_OWNER".into()])
//! })
//! .await?;
//! ```

use crate::error::CommandError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 20ms
/// - `max_delay`: 1 second
/// - `multiplier`: 2.0 (delay doubles each retry)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder starting from the defaults.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// Calculate delay for a given attempt number.
    ///
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let seconds = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(seconds).map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// Run `command` until it succeeds, fails with a non-retryable error, or
/// the policy's retries are exhausted.
///
/// # Errors
///
/// Returns the first non-retryable error, or the last error once
/// `max_retries` retries have failed.
pub async fn retry_on_conflict<F, Fut, T>(policy: RetryPolicy, command: F) -> Result<T, CommandError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CommandError>>,
{
    retry_with_predicate(policy, command, CommandError::is_retryable).await
}

/// Retry an async operation while `is_retryable` holds for its error.
///
/// # Errors
///
/// Returns the first error `is_retryable` rejects, or the last error once
/// retries are exhausted.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Command succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    return Err(err);
                }

                if attempt >= policy.max_retries {
                    tracing::error!(attempt, error = %err, "Command failed after max retries");
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Command failed, retrying"
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sourced_iam_core::aggregate::Sequence;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conflict() -> CommandError {
        CommandError::Concurrency {
            aggregate: "i1/org/o1".to_string(),
            expected: Sequence::new(1),
            actual: Sequence::new(2),
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy::builder().initial_delay(Duration::from_millis(1)).build()
    }

    #[test]
    fn delay_doubles_until_capped() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_millis(500))
            .build();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn retries_conflicts_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = retry_on_conflict(fast(), || {
            let c = Arc::clone(&counter);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(conflict())
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert!(matches!(result, Ok(7)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn validation_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), _> = retry_on_conflict(fast(), || {
            let c = Arc::clone(&counter);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(CommandError::PreconditionFailed("nothing changed".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(CommandError::PreconditionFailed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), _> = retry_on_conflict(fast(), || {
            let c = Arc::clone(&counter);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(conflict())
            }
        })
        .await;

        assert!(matches!(result, Err(CommandError::Concurrency { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
