use super::types::RetryConfig;
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use tracing::{debug, warn};

/// Retries an operation with exponential backoff.
///
/// Used only while establishing the store connection at startup; request
/// path calls go through the circuit breaker and are never retried.
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `f` until it succeeds or `max_retries` retries have failed
    pub async fn execute<F, Fut, T, E>(&self, operation: &str, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut backoff = self.create_backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(operation, attempt, max_retries = self.config.max_retries, "Attempting");

            match f().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Succeeded after retries");
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if attempt > self.config.max_retries {
                        warn!(
                            operation,
                            attempt,
                            error = %e,
                            "Giving up after max retries"
                        );
                        return Err(e);
                    }

                    let Some(wait) = backoff.next_backoff() else {
                        warn!(operation, attempt, error = %e, "Backoff exhausted");
                        return Err(e);
                    };

                    warn!(
                        operation,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying after backoff"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.initial_backoff())
            .with_max_interval(self.config.max_backoff())
            .with_multiplier(self.config.backoff_multiplier)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }
}
