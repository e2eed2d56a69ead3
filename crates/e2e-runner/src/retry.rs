//! Deadline-bounded retries for cloud-control-plane calls.
//!
//! Every call that talks to the cloud (login, subscription selection,
//! resource-group lookups, creation and deletion, storage account creation)
//! goes through [`retry`] so throttling and eventual-consistency errors are
//! absorbed the same way at every call site. The deadline is the only bound:
//! there is no maximum attempt count.

use anyhow::Result;
use backon::{BackoffBuilder, ConstantBuilder, ExponentialBuilder};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::defaults::{DEFAULT_RETRY_DELAY, DEFAULT_TIMEOUT_SECS};

/// Delay schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Sleep the same delay between every attempt
    Fixed,
    /// Double the delay after every attempt, capped at `max_delay`
    Exponential { max_delay: Duration },
}

/// Retry configuration shared by every cloud call in a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay between attempts (initial delay for exponential backoff)
    pub delay: Duration,
    /// Wall-clock budget after which the last failure is returned
    pub deadline: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RETRY_DELAY, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

impl RetryPolicy {
    /// Fixed delay between attempts until `deadline` elapses
    pub fn fixed(delay: Duration, deadline: Duration) -> Self {
        Self {
            delay,
            deadline,
            backoff: Backoff::Fixed,
        }
    }

    /// Exponential delay starting at `delay`, capped at `max_delay`
    pub fn exponential(delay: Duration, max_delay: Duration, deadline: Duration) -> Self {
        Self {
            delay,
            deadline,
            backoff: Backoff::Exponential { max_delay },
        }
    }

    fn delays(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        match self.backoff {
            Backoff::Fixed => Box::new(
                ConstantBuilder::default()
                    .with_delay(self.delay)
                    .with_max_times(usize::MAX)
                    .build(),
            ),
            Backoff::Exponential { max_delay } => Box::new(
                ExponentialBuilder::default()
                    .with_min_delay(self.delay)
                    .with_max_delay(max_delay)
                    .with_factor(2.0)
                    .with_max_times(usize::MAX)
                    .build(),
            ),
        }
    }

    fn fallback_delay(&self) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { max_delay } => max_delay,
        }
    }
}

/// Retry `operation` until it succeeds or `policy.deadline` elapses.
///
/// Every error is treated as transient. On timeout the last error is returned
/// with the operation name and attempt count attached as context.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation_name: &str, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_if(policy, operation_name, operation, |_| true).await
}

/// Like [`retry`], but errors for which `is_transient` returns `false` are
/// returned immediately instead of being retried.
pub async fn retry_if<T, F, Fut, P>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
    is_transient: P,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&anyhow::Error) -> bool,
{
    let start = Instant::now();
    let mut delays = policy.delays();
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let error = match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(operation = %operation_name, attempts, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !is_transient(&error) {
            debug!(operation = %operation_name, attempts, error = %error, "Permanent failure, not retrying");
            return Err(error);
        }

        let elapsed = start.elapsed();
        if elapsed >= policy.deadline {
            warn!(
                operation = %operation_name,
                attempts,
                deadline_secs = policy.deadline.as_secs(),
                error = %error,
                "Operation did not succeed before the deadline"
            );
            return Err(error.context(format!(
                "{operation_name} failed after {attempts} attempts over {:?}",
                elapsed
            )));
        }

        let delay = delays.next().unwrap_or_else(|| policy.fallback_delay());
        debug!(
            operation = %operation_name,
            attempt = attempts,
            delay_ms = delay.as_millis(),
            error = %error,
            "Operation failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
