//! Exponential backoff for transient storage faults

use super::error::StorageError;
use crate::config::RetryConfig;
use crate::infrastructure::telemetry::STORAGE_RETRIES_TOTAL;
use metrics::counter;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded exponential backoff with jitter
#[derive(Debug, Clone)]
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
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based), capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        // Up to 25% jitter so retries from concurrent finalizations spread out
        let jitter_ceiling = delay.as_millis() as u64 / 4;
        let jitter = if jitter_ceiling > 0 {
            rand::thread_rng().gen_range(0..=jitter_ceiling)
        } else {
            0
        };

        (delay + Duration::from_millis(jitter)).min(self.max_delay)
    }

    /// Run `operation`, retrying transient faults until the attempt budget runs out
    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} attempt {} failed: {}, retrying in {:?}",
                        operation_name, attempt, e, delay
                    );
                    counter!(STORAGE_RETRIES_TOTAL, "operation" => operation_name.to_string())
                        .increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(4))
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(1000));
        let first = policy.delay_for(1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));
        let third = policy.delay_for(3);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(500));
        assert_eq!(policy.delay_for(10), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let attempts = AtomicU32::new(0);
        let calls = &attempts;
        let result = fast_policy(3)
            .run("op", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(StorageError::Timeout("slow".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let attempts = AtomicU32::new(0);
        let calls = &attempts;
        let result: Result<(), _> = fast_policy(3)
            .run("op", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::Throttled("busy".into()))
            })
            .await;

        assert!(matches!(result, Err(StorageError::Throttled(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_fault_not_retried() {
        let attempts = AtomicU32::new(0);
        let calls = &attempts;
        let result: Result<(), _> = fast_policy(5)
            .run("op", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::BadRequest("nope".into()))
            })
            .await;

        assert!(matches!(result, Err(StorageError::BadRequest(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
