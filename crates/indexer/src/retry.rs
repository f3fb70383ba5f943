//! Retry primitives.
//!
//! [`Failfast`] retries a unit of work until it succeeds. It never reports
//! failure: a stalled run is preferred over a silently skipped block range.
//! [`BoundedRetry`] gives up after a fixed number of attempts and is used where
//! the caller can record the failure and try again on a later run.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::clock::SharedClock;
use crate::config::{BackfillConfig, RetryConfig};

/// States of a failfast fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryState<T> {
    /// Running attempt `n` (1-based).
    Attempting(u32),
    /// Waiting before attempt `attempt + 1`.
    Backoff {
        /// Attempt that just failed.
        attempt: u32,
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// Finished on attempt `attempt`.
    Succeeded {
        /// Attempt that succeeded.
        attempt: u32,
        /// Result of the work.
        value: T,
    },
}

/// Capped exponential backoff: `base * 2^(attempt-1)`, at most `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub base: Duration,
    /// Upper bound; once reached every retry waits this long.
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            max: Duration::from_millis(600_000),
        }
    }
}

impl BackoffPolicy {
    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Infinite-retry wrapper around remote work.
#[derive(Clone)]
pub struct Failfast {
    clock: SharedClock,
    policy: BackoffPolicy,
    attempt_timeout: Duration,
}

impl std::fmt::Debug for Failfast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Failfast")
            .field("policy", &self.policy)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}

impl Failfast {
    /// Create a new failfast runner.
    pub fn new(clock: SharedClock, policy: BackoffPolicy, attempt_timeout: Duration) -> Self {
        Self {
            clock,
            policy,
            attempt_timeout,
        }
    }

    /// Create a runner from the `[retry]` configuration.
    pub fn from_config(clock: SharedClock, config: &RetryConfig) -> Self {
        Self::new(
            clock,
            BackoffPolicy {
                base: config.base_delay(),
                max: config.max_backoff(),
            },
            config.attempt_timeout(),
        )
    }

    /// The backoff policy.
    pub const fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Run `op` until it succeeds. Each attempt is bounded by the per-attempt
    /// timeout; a timeout counts as a failure.
    pub async fn run<T, E, F, Fut>(&self, description: &str, mut op: F) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut state = RetryState::Attempting(1);

        loop {
            state = match state {
                RetryState::Attempting(attempt) => {
                    let failure = match tokio::time::timeout(self.attempt_timeout, op()).await {
                        Ok(Ok(value)) => {
                            state = RetryState::Succeeded { attempt, value };
                            continue;
                        }
                        Ok(Err(e)) => e.to_string(),
                        Err(_) => format!("timed out after {:?}", self.attempt_timeout),
                    };
                    error!("{} attempt {} failed: {}", description, attempt, failure);
                    RetryState::Backoff {
                        attempt,
                        delay: self.policy.delay_for(attempt),
                    }
                }
                RetryState::Backoff { attempt, delay } => {
                    if delay >= self.policy.max {
                        warn!(
                            "{}: retrying in {:.1} minutes (max backoff reached, retrying until success)",
                            description,
                            delay.as_secs_f64() / 60.0
                        );
                    } else {
                        warn!("{}: retrying in {}s", description, delay.as_secs());
                    }
                    self.clock.sleep(delay).await;
                    RetryState::Attempting(attempt + 1)
                }
                RetryState::Succeeded { attempt, value } => {
                    if attempt > 1 {
                        info!("{} succeeded after {} attempts", description, attempt);
                    } else {
                        debug!("{} succeeded", description);
                    }
                    return value;
                }
            };
        }
    }
}

/// Result of a bounded retry that ran out of attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted {
    /// Attempts made.
    pub attempts: u32,
    /// Error of the final attempt.
    pub last_error: String,
}

impl Display for Exhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "failed after {} attempts: {}",
            self.attempts, self.last_error
        )
    }
}

/// Retry with a fixed attempt budget and linear backoff (`step * attempt`).
#[derive(Clone)]
pub struct BoundedRetry {
    clock: SharedClock,
    max_attempts: u32,
    step: Duration,
    attempt_timeout: Duration,
}

impl std::fmt::Debug for BoundedRetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedRetry")
            .field("max_attempts", &self.max_attempts)
            .field("step", &self.step)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}

impl BoundedRetry {
    /// Create a bounded retry.
    pub fn new(
        clock: SharedClock,
        max_attempts: u32,
        step: Duration,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            clock,
            max_attempts: max_attempts.max(1),
            step,
            attempt_timeout,
        }
    }

    /// Create from the `[backfill]` budget and the `[retry]` per-attempt timeout.
    pub fn from_config(
        clock: SharedClock,
        backfill: &BackfillConfig,
        retry: &RetryConfig,
    ) -> Self {
        Self::new(
            clock,
            backfill.max_attempts,
            Duration::from_millis(backfill.retry_delay_ms),
            retry.attempt_timeout(),
        )
    }

    /// Run `op` at most `max_attempts` times. An attempt that outlives the
    /// per-attempt timeout counts as failed.
    pub async fn run<T, E, F, Fut>(&self, description: &str, mut op: F) -> Result<T, Exhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            let failure = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {:?}", self.attempt_timeout),
            };
            if attempt >= self.max_attempts {
                warn!(
                    "{} failed after {} attempts: {}",
                    description, attempt, failure
                );
                return Err(Exhausted {
                    attempts: attempt,
                    last_error: failure,
                });
            }
            debug!("{} attempt {} failed: {}", description, attempt, failure);
            self.clock.sleep(self.step * attempt).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn clock() -> ManualClock {
        ManualClock::new(DateTime::<Utc>::from_timestamp(1_756_425_600, 0).unwrap())
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(10), Duration::from_secs(512));
        assert_eq!(policy.delay_for(11), Duration::from_secs(600));
        assert_eq!(policy.delay_for(500), Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_failfast_retries_until_success() {
        let clock = clock();
        let failfast = Failfast::new(
            Arc::new(clock.clone()),
            BackoffPolicy::default(),
            Duration::from_secs(30),
        );
        let calls = AtomicU32::new(0);

        let value = failfast
            .run("eth_getLogs", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 14 {
                    Err(format!("rate limited ({n})"))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(value, 14);
        let sleeps = clock.sleeps();
        assert_eq!(sleeps.len(), 13);
        assert_eq!(sleeps[0], Duration::from_secs(1));
        assert_eq!(sleeps[9], Duration::from_secs(512));
        assert!(sleeps[10..].iter().all(|d| *d == Duration::from_secs(600)));
    }

    #[tokio::test]
    async fn test_failfast_first_try_does_not_sleep() {
        let clock = clock();
        let failfast = Failfast::new(
            Arc::new(clock.clone()),
            BackoffPolicy::default(),
            Duration::from_secs(30),
        );
        let value = failfast
            .run("eth_blockNumber", || async { Ok::<_, String>(7u64) })
            .await;
        assert_eq!(value, 7);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failfast_times_out_hung_attempt() {
        let clock = clock();
        let failfast = Failfast::new(
            Arc::new(clock.clone()),
            BackoffPolicy::default(),
            Duration::from_secs(30),
        );
        let calls = AtomicU32::new(0);

        let value = failfast
            .run("eth_getBlockByNumber", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    std::future::pending::<()>().await;
                }
                Ok::<_, String>("block")
            })
            .await;

        assert_eq!(value, "block");
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);
    }

    #[tokio::test]
    async fn test_bounded_retry_linear_backoff_and_exhaustion() {
        let clock = clock();
        let retry = BoundedRetry::new(
            Arc::new(clock.clone()),
            3,
            Duration::from_millis(1_000),
            Duration::from_secs(30),
        );

        let result: Result<(), Exhausted> = retry
            .run("chunk 2000-2399", || async { Err::<(), _>("HTTP 503") })
            .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.last_error, "HTTP 503");
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(1_000), Duration::from_millis(2_000)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_retry_times_out_hung_attempts() {
        let clock = clock();
        let retry = BoundedRetry::new(
            Arc::new(clock.clone()),
            3,
            Duration::from_millis(1_000),
            Duration::from_secs(15),
        );
        let calls = AtomicU32::new(0);

        let result = retry
            .run("chunk 2400-2799", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                std::future::pending::<Result<(), String>>().await
            })
            .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert!(exhausted.last_error.contains("timed out"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_bounded_retry_recovers() {
        let clock = clock();
        let retry = BoundedRetry::new(
            Arc::new(clock.clone()),
            3,
            Duration::from_millis(1_000),
            Duration::from_secs(30),
        );
        let calls = AtomicU32::new(0);

        let result = retry
            .run("chunk", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("timeout")
                } else {
                    Ok(5)
                }
            })
            .await;

        assert_eq!(result, Ok(5));
        assert_eq!(clock.sleeps().len(), 1);
    }
}
