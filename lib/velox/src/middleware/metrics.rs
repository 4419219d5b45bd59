//! Metrics middleware using the metrics crate facade.
//!
//! Records request, token and cost metrics using the `metrics` crate, which
//! allows integration with various metrics backends (Prometheus, `StatsD`, etc.).

use std::time::Instant;

use velox_core::{BoxFuture, Layer, Next, RequestContext, Result};

/// Labels used for metrics.
const LABEL_MODEL: &str = "model";
const LABEL_STATUS: &str = "status";

/// Metric names.
const METRIC_REQUESTS_TOTAL: &str = "llm_requests_total";
const METRIC_REQUEST_DURATION: &str = "llm_request_duration_seconds";
const METRIC_REQUESTS_IN_FLIGHT: &str = "llm_requests_in_flight";
const METRIC_TOKENS_TOTAL: &str = "llm_tokens_total";
const METRIC_COST_TOTAL: &str = "llm_cost_usd_total";

/// Holds one unit of the in-flight gauge, released on drop.
///
/// Dropping covers requests abandoned mid-flight, e.g. by an engine timeout.
struct InFlight;

impl InFlight {
    fn enter() -> Self {
        metrics::gauge!(METRIC_REQUESTS_IN_FLIGHT).increment(1.0);
        Self
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        metrics::gauge!(METRIC_REQUESTS_IN_FLIGHT).decrement(1.0);
    }
}

/// Layer that records LLM request metrics.
///
/// Records the following metrics:
/// - `llm_requests_total` (counter): Total number of requests, labeled by model and status
/// - `llm_request_duration_seconds` (histogram): Request duration in seconds, labeled by model
/// - `llm_requests_in_flight` (gauge): Number of requests currently in flight
/// - `llm_tokens_total` (counter): Tokens reported by successful requests, labeled by model
/// - `llm_cost_usd_total` (gauge, only ever incremented): Cost of successful requests in USD,
///   labeled by model
///
/// The model label is read after the request completes, so it reflects any
/// rerouting done by inner layers.
///
/// # Example
///
/// ```ignore
/// use velox::middleware::MetricsLayer;
///
/// let layer = MetricsLayer::new();
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsLayer {
    _private: (),
}

impl MetricsLayer {
    /// Create a new metrics layer.
    #[must_use]
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Layer for MetricsLayer {
    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<()>> {
        let start = Instant::now();
        let in_flight = InFlight::enter();

        Box::pin(async move {
            let result = next.run(ctx).await;

            drop(in_flight);

            let model = ctx.model().to_string();
            metrics::histogram!(METRIC_REQUEST_DURATION, LABEL_MODEL => model.clone())
                .record(start.elapsed().as_secs_f64());

            let status = if result.is_ok() { "ok" } else { "error" };
            metrics::counter!(
                METRIC_REQUESTS_TOTAL,
                LABEL_MODEL => model.clone(),
                LABEL_STATUS => status
            )
            .increment(1);

            if result.is_ok() {
                let usage = ctx.metrics();
                metrics::counter!(METRIC_TOKENS_TOTAL, LABEL_MODEL => model.clone())
                    .increment(usage.total_tokens);
                // Counters are integral; cost is tracked as a monotonically growing gauge.
                metrics::gauge!(METRIC_COST_TOTAL, LABEL_MODEL => model).increment(usage.cost_usd);
            }

            result
        })
    }

    fn name(&self) -> &str {
        "metrics"
    }
}
