//! Exponential backoff for transient adapter failures.
//!
//! Only errors for which [`Error::is_retryable`] holds are retried: network
//! failures, timeouts, HTTP 5xx and 429. Authentication failures and other
//! client errors are returned on the first attempt.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use echolens_core::{defaults, Error, Result};

/// Retry policy shared by all adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    #[serde(with = "millis", rename = "initial_backoff_ms")]
    pub initial_backoff: Duration,
    #[serde(with = "millis", rename = "max_backoff_ms")]
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(defaults::RETRY_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(defaults::RETRY_MAX_BACKOFF_MS),
            multiplier: defaults::RETRY_BACKOFF_MULTIPLIER,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Backoff before retry number `retry` (1-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        let millis = (self.initial_backoff.as_millis() as f64 * factor)
            .min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    fn delay(&self, retry: u32) -> Duration {
        let base = self.backoff(retry);
        if !self.jitter {
            return base;
        }
        let spread = (base.as_millis() as u64) / 10;
        if spread == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            operation,
                            attempt,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "Adapter call succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient adapter failure, will retry after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if err.is_retryable() {
                        warn!(
                            operation,
                            attempt,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            error = %err,
                            "Adapter call failed: retries exhausted"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy::default()
            .with_initial_backoff(Duration::from_millis(1))
            .with_jitter(false)
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(10), Duration::from_millis(8000));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let d = policy.delay(1);
            assert!(d >= Duration::from_millis(500));
            assert!(d <= Duration::from_millis(550));
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = fast()
            .run("test", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Transient("503".to_string()))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = fast()
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Transient("timeout".to_string()))
            })
            .await;

        assert!(matches!(result, Err(Error::Transient(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = fast()
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Config("Authentication failed".to_string()))
            })
            .await;

        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_policy_deserializes_millis() {
        let policy: RetryPolicy =
            toml::from_str("max_attempts = 5\ninitial_backoff_ms = 100").unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(100));
        assert_eq!(policy.max_backoff, Duration::from_millis(8000));
    }
}
