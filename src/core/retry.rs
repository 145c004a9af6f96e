//! Generic retry policy with exponential backoff and jitter
//!
//! Every call to an unreliable external (page fetch, media download,
//! extractor subprocess) goes through this policy rather than a hand-rolled
//! loop at the call site.

use crate::error::VgrabError;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::warn;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt
    pub max_retries: u32,
    /// Base delay before the first retry
    pub base_delay: Duration,
    /// Ceiling for the backoff delay
    pub max_delay: Duration,
    /// Whether to add up to 10% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

/// Reusable retry executor
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

type BoxedAttempt<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, VgrabError>> + Send + 'a>>;

impl RetryPolicy {
    /// Create a policy with the default configuration
    pub fn new() -> Self {
        Self::with_config(RetryConfig::default())
    }

    /// Create a policy with a custom configuration
    pub fn with_config(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run an operation, retrying transient failures per `VgrabError::is_transient`
    pub async fn run<'a, F, T>(&self, context: &str, func: F) -> Result<T, VgrabError>
    where
        F: FnMut() -> BoxedAttempt<'a, T>,
    {
        self.run_with_classifier(context, func, VgrabError::is_transient)
            .await
    }

    /// Run an operation with a caller-supplied transience classifier.
    ///
    /// The classifier is consulted on every failure; a non-transient error
    /// propagates immediately without sleeping.
    pub async fn run_with_classifier<'a, F, T, C>(
        &self,
        context: &str,
        mut func: F,
        classifier: C,
    ) -> Result<T, VgrabError>
    where
        F: FnMut() -> BoxedAttempt<'a, T>,
        C: Fn(&VgrabError) -> bool,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match func().await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if !classifier(&error) || attempt == self.config.max_retries {
                        return Err(error);
                    }

                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        context,
                        attempt + 1,
                        self.config.max_retries + 1,
                        delay,
                        error
                    );
                    last_error = Some(error);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        // Unreachable: the loop always returns from its final iteration
        Err(last_error
            .unwrap_or_else(|| VgrabError::Internal("retry loop exhausted".to_string())))
    }

    /// Backoff delay for a zero-based attempt index
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        let capped = exp.min(self.config.max_delay);

        if self.config.jitter {
            let jitter_ms = (capped.as_millis() as f64 * 0.1 * rand::random::<f64>()) as u64;
            capped + Duration::from_millis(jitter_ms)
        } else {
            capped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::with_config(RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: false,
        })
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(10));
        assert!(config.jitter);
    }

    #[test]
    fn test_delay_is_capped_by_max_delay() {
        let policy = RetryPolicy::with_config(RetryConfig {
            max_retries: 8,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            jitter: false,
        });

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(300));
        assert_eq!(policy.delay_for_attempt(7), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let policy = fast_policy(3);
        let counter = Arc::new(AtomicU32::new(0));

        let result = policy
            .run("test op", {
                let counter = counter.clone();
                move || {
                    let counter = counter.clone();
                    Box::pin(async move {
                        let count = counter.fetch_add(1, Ordering::SeqCst);
                        if count < 3 {
                            Err(VgrabError::Timeout("flaky".to_string()))
                        } else {
                            Ok("done")
                        }
                    })
                }
            })
            .await;

        // Fails max_retries times then succeeds: max_retries + 1 attempts
        assert_eq!(result.unwrap(), "done");
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_exhausts_retries_and_propagates_last_error() {
        let policy = fast_policy(2);
        let counter = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = policy
            .run("test op", {
                let counter = counter.clone();
                move || {
                    let counter = counter.clone();
                    Box::pin(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(VgrabError::RateLimited)
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(VgrabError::RateLimited)));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_fails_after_one_attempt() {
        let policy = fast_policy(3);
        let counter = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = policy
            .run("test op", {
                let counter = counter.clone();
                move || {
                    let counter = counter.clone();
                    Box::pin(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(VgrabError::PrivateContent)
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(VgrabError::PrivateContent)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_custom_classifier_overrides_default() {
        let policy = fast_policy(2);
        let counter = Arc::new(AtomicU32::new(0));

        // Timeout is transient by default; classifier says otherwise
        let result: Result<(), _> = policy
            .run_with_classifier(
                "test op",
                {
                    let counter = counter.clone();
                    move || {
                        let counter = counter.clone();
                        Box::pin(async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            Err(VgrabError::Timeout("slow".to_string()))
                        })
                    }
                },
                |_| false,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
