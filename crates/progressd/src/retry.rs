//! Retry with exponential backoff for remote sync calls.
//!
//! Every failed attempt is logged at warn with its attempt number; the
//! final error is returned to the caller, which keeps local state as is.

use std::future::Future;
use std::time::{Duration, Instant};

use progress_shared::ProgressError;
use rand::Rng;
use tracing::{debug, warn};

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Multiplier applied per attempt
    pub backoff_factor: f64,
    /// Random jitter as a fraction of the delay (0.1 = ±10%)
    pub jitter_percent: f64,
    /// Total attempts including the first
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter_percent: 0.1,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
        jitter_percent: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial_delay,
            max_delay,
            backoff_factor: backoff_factor.max(1.0),
            jitter_percent: jitter_percent.clamp(0.0, 1.0),
            max_attempts: max_attempts.max(1),
        }
    }

    /// No delays; used by tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, 1.0, 0.0, max_attempts)
    }

    /// Delay before retry number `attempt` (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let initial_ms = u64::try_from(self.initial_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);

        // 31 doublings is already far past any max_delay
        let exp = attempt.min(31) as i32;
        let base_ms = (initial_ms as f64 * self.backoff_factor.powi(exp)).min(max_ms as f64);

        let jitter = if self.jitter_percent > 0.0 && base_ms > 0.0 {
            let range = base_ms * self.jitter_percent;
            rand::thread_rng().gen_range(-range..=range)
        } else {
            0.0
        };

        Duration::from_millis((base_ms + jitter).max(0.0) as u64)
    }
}

/// Outcome of a retried operation
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ProgressError>,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Run `operation` until it succeeds or the policy is exhausted.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, operation: F) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProgressError>>,
{
    let mut operation = operation;
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", label, attempt);
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt + 1,
                    elapsed: start.elapsed(),
                };
            }
            Err(e) => {
                attempt += 1;
                warn!(
                    "{} failed (attempt {}/{}): {}",
                    label, attempt, policy.max_attempts, e
                );
                if attempt >= policy.max_attempts {
                    return RetryOutcome {
                        result: Err(e),
                        attempts: attempt,
                        elapsed: start.elapsed(),
                    };
                }
                tokio::time::sleep(policy.delay_for_attempt(attempt - 1)).await;
            }
        }
    }
}

/// Wrap a remote call in a timeout, turning expiry into a sync failure.
pub async fn with_timeout<T, Fut>(limit: Duration, label: &str, fut: Fut) -> Result<T, ProgressError>
where
    Fut: Future<Output = Result<T, ProgressError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProgressError::SyncFailure(format!(
            "{} timed out after {:?}",
            label, limit
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::new(
            Duration::from_millis(100),
            Duration::from_millis(1_000),
            2.0,
            0.0,
            5,
        );
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let d = policy.delay_for_attempt(0).as_millis();
            assert!((450..=550).contains(&d), "delay {} out of range", d);
        }
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let outcome = with_retry(&RetryPolicy::immediate(5), "op", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProgressError::SyncFailure("offline".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(outcome.result.unwrap(), 7);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let outcome: RetryOutcome<()> = with_retry(&RetryPolicy::immediate(3), "op", || async {
            Err(ProgressError::SyncFailure("offline".into()))
        })
        .await;
        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_timeout_is_sync_failure() {
        let result: Result<(), _> = with_timeout(Duration::from_millis(10), "slow", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ProgressError::SyncFailure(_))));
    }
}
