use crate::metrics::ServerMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Configuration for retry logic with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Amount of jitter to add (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Profile for latency-sensitive paths.
    pub fn fast() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }

    /// Profile for external-service reconnection.
    pub fn persistent() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            jitter_factor: 0.2,
        }
    }
}

/// Retry executor with exponential backoff and jitter
pub struct RetryExecutor {
    config: RetryConfig,
    metrics: Option<Arc<ServerMetrics>>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(config: RetryConfig, metrics: Arc<ServerMetrics>) -> Self {
        Self {
            config,
            metrics: Some(metrics),
        }
    }

    /// Execute an operation, retrying every failure up to the configured
    /// attempt limit.
    pub async fn execute<T, F, Fut, E>(&self, operation_name: &str, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Debug,
    {
        self.execute_with_condition(operation_name, operation, |_| true)
            .await
    }

    /// Execute an operation, retrying only while `retry_condition` holds.
    pub async fn execute_with_condition<T, F, Fut, E, R>(
        &self,
        operation_name: &str,
        operation: F,
        retry_condition: R,
    ) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Debug,
    {
        let mut attempt = 1;
        let mut delay = self.config.initial_delay;

        loop {
            if let Some(metrics) = &self.metrics {
                metrics.increment_retry_attempts();
            }

            debug!(
                operation = operation_name,
                attempt,
                max_attempts = self.config.max_attempts,
                "Executing operation attempt"
            );

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(
                            operation = operation_name,
                            attempt, "Operation succeeded after retry"
                        );
                        if let Some(metrics) = &self.metrics {
                            metrics.increment_retry_successes();
                        }
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if attempt >= self.config.max_attempts {
                        error!(
                            operation = operation_name,
                            attempt,
                            error = ?error,
                            "Operation failed after all retry attempts"
                        );
                        return Err(error);
                    }

                    if !retry_condition(&error) {
                        debug!(
                            operation = operation_name,
                            error = ?error,
                            "Error is not retryable, failing immediately"
                        );
                        return Err(error);
                    }

                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        error = ?error,
                        delay_ms = delay.as_millis() as u64,
                        "Operation failed, retrying after delay"
                    );

                    sleep(delay).await;

                    let next_delay = Duration::from_millis(
                        (delay.as_millis() as f64 * self.config.backoff_multiplier) as u64,
                    );
                    delay = std::cmp::min(next_delay, self.config.max_delay);

                    if self.config.jitter_factor > 0.0 {
                        let jitter = (delay.as_millis() as f64 * self.config.jitter_factor) as u64;
                        let jitter_amount = fastrand::u64(0..=jitter);
                        delay = Duration::from_millis(delay.as_millis() as u64 + jitter_amount);
                    }

                    attempt += 1;
                }
            }
        }
    }
}
