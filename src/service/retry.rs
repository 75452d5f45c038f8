//! Bounded Retry
//!
//! Infrastructure failures (lock timeouts, storage faults, version
//! conflicts) are retried a fixed number of times with linear backoff.
//! Domain errors are terminal and returned immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::domain::error::CoreError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(50) }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Run `op`, retrying on retryable failures up to the policy's attempt count
pub async fn with_retry<T, Fut>(
    label: &str,
    policy: &RetryPolicy,
    mut op: impl FnMut() -> Fut,
) -> Result<T, CoreError>
where
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() || attempt >= policy.max_attempts => return Err(e),
            Err(e) => {
                warn!(op = label, attempt, error = %e, "retrying after unexpected failure");
                tokio::time::sleep(policy.delay(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::DomainError;
    use crate::lock::LockError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy { max_attempts: 3, base_delay: Duration::from_millis(1) }
    }

    fn infra_error() -> CoreError {
        LockError::WaitTimeout { name: "account:1".into(), waited_ms: 1 }.into()
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry("op", &fast_policy(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(infra_error())
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("op", &fast_policy(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(infra_error())
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_domain_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("op", &fast_policy(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DomainError::InsufficientBalance.into())
        })
        .await;
        assert!(result.unwrap_err().is_domain());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
