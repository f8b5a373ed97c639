//! Retry with exponential backoff
//!
//! Used for store and queue calls that hit a transient error, and for the
//! supervisor's respawn delays.

use sluice_store::{StoreError, StoreResult};
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

/// Exponential backoff policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy for store and queue calls
    pub const STORE: RetryPolicy = RetryPolicy {
        max_attempts: 5,
        initial_delay: Duration::from_millis(200),
        max_delay: Duration::from_secs(5),
    };

    /// Delay before retry number `retry` (0-based), doubling with a cap
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(31));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are exhausted
pub async fn retry_transient<T, F, Fut>(what: &str, policy: RetryPolicy, mut op: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("{} succeeded after {} attempt(s)", what, attempt);
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt - 1);
                warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {:?}",
                    what, attempt, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_transient() {
                    error!("{} failed after {} attempts", what, attempt);
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const FAST: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    };

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let policy = RetryPolicy::STORE;
        assert_eq!(policy.delay_for(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for(1), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(3200));
        assert_eq!(policy.delay_for(5), Duration::from_secs(5));
        assert_eq!(policy.delay_for(40), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = retry_transient("send", FAST, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StoreError::Unavailable("busy".to_string()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: StoreResult<()> = retry_transient("send", FAST, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("down".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: StoreResult<()> = retry_transient("send", FAST, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::NotFound("queue".to_string()))
        })
        .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
