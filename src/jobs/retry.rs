//! Retry of transient adapter failures

use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::RetryPolicy;
use crate::metrics::EngineMetrics;
use crate::Result;

/// Re-runs an operation while it fails with a transient error
pub struct RetryExecutor {
    policy: RetryPolicy,
    metrics: Option<Arc<EngineMetrics>>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run `operation` until it succeeds, fails permanently, or the retry budget runs out.
    ///
    /// Only errors for which [`crate::BackupError::is_transient`] holds are retried;
    /// the last error is returned unchanged.
    pub async fn execute<F, Fut, T>(&self, name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if retries > 0 {
                        info!(operation = name, retries = retries, "Operation succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(error) if error.is_transient() && retries < self.policy.max_retries => {
                    retries += 1;
                    let delay = self.policy.delay_for(retries);
                    warn!(
                        operation = name,
                        attempt = retries,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Transient failure, retrying"
                    );
                    if let Some(ref metrics) = self.metrics {
                        metrics.record_retry(name);
                    }
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BackupError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(100), Duration::from_millis(150))
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let result = RetryExecutor::new(policy(3))
            .execute("upload", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BackupError::Upload("connection reset".to_string()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms, then min(200ms, 150ms)
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(250) && waited < Duration::from_millis(260));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let err = RetryExecutor::new(policy(2))
            .execute("export", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(BackupError::Export("source offline".to_string()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::Export(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let metrics = Arc::new(EngineMetrics::new().unwrap());
        let err = RetryExecutor::new(policy(5))
            .with_metrics(metrics.clone())
            .execute("transform", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(BackupError::Compression("corrupt stream".to_string()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::Compression(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!metrics.gather_text().contains("operation=\"transform\""));
    }
}
