//! Explicit retry policy for storage writes.
//!
//! The policy object decouples "how often and how long to back off" from
//! the storage transport itself; the multi-tier store is the only consumer.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Bounded exponential retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    /// Delay before the first retry.
    pub min_delay: Duration,
    /// Ceiling on the backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries, for tests and latency-sensitive paths.
    #[must_use]
    pub const fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            min_delay: Duration::from_millis(0),
            max_delay: Duration::from_millis(0),
        }
    }

    /// Builds the backoff iterator backing this policy.
    pub(crate) fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backon::Retryable;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_retries_until_success() {
        let attempts = AtomicUsize::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };

        let result: Result<u32, &str> = (|| async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("transient")
            } else {
                Ok(7)
            }
        })
        .retry(policy.backoff())
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let attempts = AtomicUsize::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };

        let result: Result<u32, &str> = (|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err("permanent")
        })
        .retry(policy.backoff())
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_retries_policy() {
        let attempts = AtomicUsize::new(0);

        let result: Result<u32, &str> = (|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err("nope")
        })
        .retry(RetryPolicy::no_retries().backoff())
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
