//! Exponential backoff for transient provider failures.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use blockvault_core::config::RetryConfig;

use crate::error::CloudError;

/// Retry schedule for one provider call.
///
/// Sleeps double from `initial_wait` up to `max_wait`. Retrying stops
/// when the next sleep would reach the end of `budget` measured from the first
/// attempt; the call then fails with [`CloudError::RetryBudgetExhausted`].
/// Only [`CloudError::is_transient`] failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    initial_wait: Duration,
    max_wait: Duration,
    budget: Duration,
}

impl RetryPolicy {
    /// Build a policy from explicit durations.
    pub fn new(initial_wait: Duration, max_wait: Duration, budget: Duration) -> Self {
        Self {
            initial_wait,
            max_wait: max_wait.max(initial_wait),
            budget,
        }
    }

    /// Build a policy from configuration.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_wait_millis),
            Duration::from_secs(config.max_wait_seconds),
            Duration::from_secs(config.timeout_seconds),
        )
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, Duration::ZERO)
    }

    /// Sleep before retry number `retry` (zero-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.initial_wait.saturating_mul(factor).min(self.max_wait)
    }

    /// Run `call` until it succeeds, fails permanently or the budget is
    /// spent.
    pub async fn run<T, F, Fut>(&self, operation: &str, call: F) -> Result<T, CloudError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CloudError>>,
    {
        self.run_if(operation, CloudError::is_transient, call).await
    }

    /// Like [`run`](Self::run), retrying only the failures accepted by
    /// `retryable`. Any other failure is returned as is.
    pub async fn run_if<T, F, Fut>(
        &self,
        operation: &str,
        retryable: fn(&CloudError) -> bool,
        mut call: F,
    ) -> Result<T, CloudError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CloudError>>,
    {
        let deadline = Instant::now() + self.budget;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) if !retryable(&err) => return Err(err),
                Err(err) => err,
            };

            let delay = self.delay_for(attempts - 1);
            if Instant::now() + delay >= deadline {
                warn!(operation, attempts, error = %err, "Retry budget exhausted");
                return Err(CloudError::RetryBudgetExhausted {
                    operation: operation.to_string(),
                    attempts,
                    last: Box::new(err),
                });
            }

            warn!(
                operation,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient provider failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn unavailable() -> CloudError {
        CloudError::Http {
            status: 503,
            message: "busy".into(),
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(1),
            Duration::from_secs(8),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = policy();
        let delays: Vec<u64> = (0..6).map(|i| p.delay_for(i).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 8, 8]);
        assert_eq!(p.delay_for(40), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let started = Instant::now();

        let result = policy()
            .run("get_backup", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(unavailable())
                    } else {
                        Ok("available")
                    }
                }
            })
            .await;

        assert_eq!(result.expect("recovered"), "available");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = policy()
            .run("create_backup", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(CloudError::Http {
                        status: 400,
                        message: "bad volume".into(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(CloudError::Http { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let started = Instant::now();

        // Sleeps 1+2+4+8+8+8+8+8+8 = 55s fit in 60s, the next 8s would not.
        let result: Result<(), _> = policy()
            .run("get_quota", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(unavailable())
                }
            })
            .await;

        match result {
            Err(CloudError::RetryBudgetExhausted { attempts, last, .. }) => {
                assert_eq!(attempts, 10);
                assert!(last.is_transient());
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert_eq!(started.elapsed(), Duration::from_secs(55));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_policy() {
        let result: Result<(), _> = RetryPolicy::none().run("x", || async { Err(unavailable()) }).await;
        assert!(matches!(
            result,
            Err(CloudError::RetryBudgetExhausted { attempts: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_if_narrows_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = policy()
            .run_if("create_backup", CloudError::is_safe_to_resend, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(unavailable())
                }
            })
            .await;

        assert!(matches!(result, Err(CloudError::Http { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_if_retries_throttling() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = policy()
            .run_if("create_backup", CloudError::is_safe_to_resend, || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(CloudError::Http {
                            status: 429,
                            message: "slow down".into(),
                        })
                    } else {
                        Ok("b-1")
                    }
                }
            })
            .await;

        assert_eq!(result.expect("resent"), "b-1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
