//! Request/response logging middleware.
//!
//! Logs every pipeline traversal through `tracing`. Failures are logged and
//! then propagated unchanged.

use std::time::Instant;

use tracing::{Instrument, Level, debug, info, span, warn};
use velox_core::{BoxFuture, Layer, Next, RequestContext, Result};

/// Log level for the logging middleware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    /// Log at debug level (messages and response text included).
    Debug,
    /// Log at info level (summary only).
    #[default]
    Info,
}

/// Layer that adds request/response logging.
///
/// # Example
///
/// ```ignore
/// use velox::middleware::LoggingLayer;
///
/// let engine = Engine::builder()
///     .layer(LoggingLayer::debug())
///     .backend(backend)
///     .build();
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingLayer {
    level: LogLevel,
}

impl LoggingLayer {
    /// Create a new logging layer with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a logging layer that logs at debug level.
    #[must_use]
    pub const fn debug() -> Self {
        Self {
            level: LogLevel::Debug,
        }
    }

    /// The configured level.
    #[must_use]
    pub const fn level(&self) -> LogLevel {
        self.level
    }
}

impl Layer for LoggingLayer {
    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<()>> {
        let span = span!(
            Level::INFO,
            "llm_request",
            model = %ctx.model(),
            session_id = %ctx.session_id(),
        );
        let level = self.level;

        Box::pin(
            async move {
                let start = Instant::now();

                match level {
                    LogLevel::Debug => debug!(
                        messages = ?ctx.messages(),
                        temperature = ctx.temperature(),
                        max_tokens = ?ctx.max_tokens(),
                        "sending request"
                    ),
                    LogLevel::Info => info!(messages = ctx.messages().len(), "sending request"),
                }

                let result = next.run(ctx).await;
                let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

                match &result {
                    Ok(()) => {
                        let metrics = ctx.metrics();
                        info!(
                            elapsed_ms,
                            total_tokens = metrics.total_tokens,
                            cost_usd = metrics.cost_usd,
                            "request completed"
                        );
                        if level == LogLevel::Debug {
                            debug!(response = ctx.response().unwrap_or_default(), "response");
                        }
                    }
                    Err(err) => warn!(error = %err, elapsed_ms, "request failed"),
                }

                result
            }
            .instrument(span),
        )
    }

    fn name(&self) -> &str {
        "logging"
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;

    use super::*;

    #[test]
    fn logging_layer_default() {
        check!(LoggingLayer::new().level() == LogLevel::Info);
    }

    #[test]
    fn logging_layer_debug() {
        check!(LoggingLayer::debug().level() == LogLevel::Debug);
    }
}
