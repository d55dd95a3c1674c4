//! Retry policy with exponential backoff and optional jitter.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Bounded retry with capped exponential backoff.
///
/// `max_retries` counts retries after the first attempt, so an operation runs
/// at most `max_retries + 1` times. `RetryPolicy::none()` runs it exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first failure.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Spread each delay by ±30%.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn with_initial_backoff(mut self, duration: Duration) -> Self {
        self.initial_backoff = duration;
        self
    }

    pub fn with_max_backoff(mut self, duration: Duration) -> Self {
        self.max_backoff = duration;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Whether another attempt is allowed after `failures` consecutive failures.
    pub fn should_retry(&self, failures: u32) -> bool {
        failures <= self.max_retries
    }

    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn base_backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Delay before retry number `retry` (1-based), jitter applied if enabled.
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.base_backoff(retry);
        if !self.jitter {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-0.3..0.3);
        Duration::from_millis((base.as_millis() as f64 * factor) as u64).min(self.max_backoff)
    }
}

/// The last error of an operation that ran out of attempts.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub error: E,
}

/// Runs `operation` until it succeeds, `retryable` rejects the error, or the
/// policy is exhausted.
pub async fn with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    label: &str,
    retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> std::result::Result<T, Exhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    let mut attempts = 0;

    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !retryable(&error) || !policy.should_retry(attempts) {
                    return Err(Exhausted { attempts, error });
                }

                let delay = policy.backoff(attempts);
                warn!(
                    operation = label,
                    attempt = attempts,
                    max_retries = policy.max_retries,
                    error = %error,
                    "Retrying in {:?}",
                    delay
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries)
            .with_initial_backoff(Duration::from_millis(1))
            .with_jitter(false)
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::new(10)
            .with_initial_backoff(Duration::from_millis(100))
            .with_max_backoff(Duration::from_millis(500))
            .with_jitter(false);

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(9), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy::new(3).with_initial_backoff(Duration::from_millis(1000));
        for _ in 0..50 {
            let delay = policy.backoff(1);
            assert!(delay >= Duration::from_millis(700), "{delay:?}");
            assert!(delay <= Duration::from_millis(1300), "{delay:?}");
        }
    }

    #[test]
    fn test_none_never_retries() {
        let policy = RetryPolicy::none();
        assert!(!policy.should_retry(1));
    }

    #[tokio::test]
    async fn test_success_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_retry(&fast(3), "test", |_: &String| true, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("temporary".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let result = with_retry(&fast(2), "test", |_: &&str| true, || async {
            Err::<(), _>("down")
        })
        .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.error, "down");
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_retry(&fast(5), "test", |_: &&str| false, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("fatal") }
        })
        .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
