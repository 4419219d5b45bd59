//! Retry middleware with exponential backoff.
//!
//! Re-runs the rest of the chain on the same context when it fails with a
//! qualifying error. Each retry is recorded in the `_logs` metadata entry.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use velox_core::{BoxFuture, Error, Layer, Next, RequestContext, Result};

/// Predicate deciding whether an error qualifies for a retry.
pub type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Retry bounds and backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each following one.
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration.
    #[must_use]
    pub const fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Set the maximum number of retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay.
    #[must_use]
    pub const fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay before retry number `attempt` (1-based): `base_delay * 2^(attempt - 1)`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32
            .checked_pow(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Layer retrying failed downstream calls.
///
/// By default only [`Error::is_retryable`] errors are retried; anything else
/// propagates immediately. Once the retries are exhausted the last error is
/// returned unchanged. Backoff stops early when the request is cancelled.
///
/// # Example
///
/// ```ignore
/// use velox::middleware::{RetryConfig, RetryLayer};
/// use std::time::Duration;
///
/// let layer = RetryLayer::with_config(RetryConfig::new(5, Duration::from_millis(200)));
/// ```
#[derive(Clone)]
pub struct RetryLayer {
    config: RetryConfig,
    should_retry: RetryPredicate,
}

impl RetryLayer {
    /// Create a retry layer allowing `max_retries` retries with the default delay.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self::with_config(RetryConfig::default().with_max_retries(max_retries))
    }

    /// Create a retry layer from a configuration.
    #[must_use]
    pub fn with_config(config: RetryConfig) -> Self {
        Self {
            config,
            should_retry: Arc::new(Error::is_retryable),
        }
    }

    /// Replace the qualifying predicate.
    #[must_use]
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// The retry configuration.
    #[must_use]
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl Default for RetryLayer {
    fn default() -> Self {
        Self::with_config(RetryConfig::default())
    }
}

impl fmt::Debug for RetryLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryLayer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Layer for RetryLayer {
    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let max_retries = self.config.max_retries;
            let mut attempt = 0;

            loop {
                let error = match next.run(ctx).await {
                    Ok(()) => return Ok(()),
                    Err(error) => error,
                };

                if !(self.should_retry)(&error) {
                    return Err(error);
                }

                attempt += 1;
                if attempt > max_retries {
                    warn!(error = %error, attempts = attempt, "retries exhausted");
                    return Err(error);
                }

                let delay = self.config.backoff(attempt);
                ctx.metadata_mut()
                    .push_log(format!("Retry {attempt}/{max_retries} due to: {error}"));
                warn!(
                    attempt,
                    max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "retrying after failure"
                );

                let cancellation = ctx.cancellation().clone();
                tokio::select! {
                    () = cancellation.cancelled() => return Err(Error::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        })
    }

    fn name(&self) -> &str {
        "retry"
    }
}
