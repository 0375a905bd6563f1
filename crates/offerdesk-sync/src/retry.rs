//! Exponential backoff retry for database and outbound HTTP calls.
//!
//! Non-retryable errors propagate untouched on the first attempt; the last
//! error is propagated unchanged when retries run out.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::provider::ProviderError;

type Classifier<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type RetryHook<E> = Arc<dyn Fn(u32, &E) + Send + Sync>;

/// Retry policy configuration, parameterized by the error type it
/// classifies.
pub struct RetryPolicy<E> {
    /// Maximum number of retry attempts (0 = no retries).
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Delay cap.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
    is_retryable: Classifier<E>,
    on_retry: Option<RetryHook<E>>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            backoff_factor: self.backoff_factor,
            is_retryable: Arc::clone(&self.is_retryable),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_factor", &self.backoff_factor)
            .finish_non_exhaustive()
    }
}

impl<E: std::fmt::Display> RetryPolicy<E> {
    /// Create a policy with an explicit error classifier.
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
        is_retryable: impl Fn(&E) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            backoff_factor,
            is_retryable: Arc::new(is_retryable),
            on_retry: None,
        }
    }

    /// Install a hook invoked before each retry sleep.
    #[must_use]
    pub fn with_on_retry(mut self, hook: impl Fn(u32, &E) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Delay before the retry following `attempt` (0-based):
    /// `min(base * factor^attempt, max)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        Duration::from_secs_f64(secs).min(self.max_delay)
    }

    /// Execute an async operation with retry.
    ///
    /// The closure is called until it succeeds, a non-retryable error is
    /// returned, or retries are exhausted. The final error is returned
    /// untouched so callers can match on it.
    pub async fn execute<F, Fut, T>(&self, operation: &str, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            operation,
                            attempt = attempt + 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if attempt >= self.max_retries || !(self.is_retryable)(&error) {
                        if attempt > 0 {
                            warn!(
                                operation,
                                attempts = attempt + 1,
                                error = %error,
                                "Giving up after retries"
                            );
                        }
                        return Err(error);
                    }

                    let delay = self.delay_for(attempt);
                    debug!(
                        operation,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after transient error"
                    );
                    if let Some(hook) = &self.on_retry {
                        hook(attempt, &error);
                    }

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl RetryPolicy<sqlx::Error> {
    /// Database profile: 3 retries, 1.5 s base, factor 2, retrying
    /// connection/timeout/pool-exhaustion class errors.
    #[must_use]
    pub fn database() -> Self {
        Self::new(
            3,
            Duration::from_millis(1500),
            Duration::from_secs(30),
            2.0,
            offerdesk_db::error::is_transient,
        )
    }
}

impl RetryPolicy<ProviderError> {
    /// Outbound-HTTP profile: 2 retries, 2 s base, factor 1.5, retrying
    /// timeout/network/5xx class errors.
    #[must_use]
    pub fn outbound() -> Self {
        Self::new(
            2,
            Duration::from_millis(2000),
            Duration::from_secs(30),
            1.5,
            ProviderError::is_retryable,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Fatal,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient"),
                TestError::Fatal => write!(f, "fatal"),
            }
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy<TestError> {
        RetryPolicy::new(
            max_retries,
            Duration::ZERO,
            Duration::ZERO,
            2.0,
            |e: &TestError| matches!(e, TestError::Transient),
        )
    }

    #[test]
    fn test_database_preset() {
        let policy = RetryPolicy::database();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(1500));
        assert!((policy.backoff_factor - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_outbound_preset() {
        let policy = RetryPolicy::outbound();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.base_delay, Duration::from_millis(2000));
        assert!((policy.backoff_factor - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_delay_exponential_and_capped() {
        let policy = RetryPolicy::<TestError>::new(
            5,
            Duration::from_secs(1),
            Duration::from_secs(5),
            2.0,
            |_| true,
        );
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(5)); // 8 capped to 5
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let policy = fast_policy(3);
        let result = policy
            .execute("op", || async { Ok::<_, TestError>(42) })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let policy = fast_policy(3);
        let calls = AtomicU32::new(0);
        let result = policy
            .execute("op", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(TestError::Transient)
                    } else {
                        Ok(99)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_propagates_on_first_attempt() {
        let policy = fast_policy(3);
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .execute("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Fatal) }
            })
            .await;
        assert!(matches!(result, Err(TestError::Fatal)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_last_error_propagates_untouched_when_exhausted() {
        let policy = fast_policy(2);
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .execute("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Transient) }
            })
            .await;
        assert!(matches!(result, Err(TestError::Transient)));
        assert_eq!(calls.load(Ordering::SeqCst), 3); // initial + 2 retries
    }

    #[tokio::test]
    async fn test_on_retry_hook_fires_per_retry() {
        let hooks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hooks);
        let policy = fast_policy(2).with_on_retry(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let _: Result<(), _> = policy
            .execute("op", || async { Err(TestError::Transient) })
            .await;
        assert_eq!(hooks.load(Ordering::SeqCst), 2);
    }
}
