//! Shadow execution against an alternate backend.
//!
//! Every request is forked and sent to a second backend on a detached task,
//! while the primary request continues down the chain. The shadow outcome is
//! only logged: it never changes, delays or fails the primary response.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, warn};
use velox_core::{Backend, BoxFuture, Layer, Next, RequestContext, Result};

/// Shadow execution settings.
#[derive(Debug, Clone)]
pub struct ShadowConfig {
    /// Label used in logs.
    pub name: String,
    /// Suffix appended to the primary model for the shadow request.
    pub model_suffix: String,
    /// How long [`Layer::shutdown`] waits for outstanding shadows before abandoning them.
    pub drain_timeout: Duration,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            name: "shadow".to_string(),
            model_suffix: "-shadow".to_string(),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl ShadowConfig {
    /// Set the label used in logs.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the model suffix.
    #[must_use]
    pub fn with_model_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.model_suffix = suffix.into();
        self
    }

    /// Set the drain timeout.
    #[must_use]
    pub const fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

/// Layer running a fire-and-forget shadow request per primary request.
///
/// Shadowing stops for good once [`Layer::shutdown`] has run: later requests,
/// including those carrying their own cancellation token and still served
/// by the primary backend, are no longer mirrored.
///
/// # Example
///
/// ```ignore
/// use velox::middleware::ShadowLayer;
///
/// let engine = Engine::builder()
///     .layer(ShadowLayer::new(candidate_backend))
///     .backend(production_backend)
///     .build();
/// ```
pub struct ShadowLayer {
    backend: Arc<dyn Backend>,
    config: ShadowConfig,
    tasks: TaskTracker,
    abandon: CancellationToken,
}

impl ShadowLayer {
    /// Create a shadow layer targeting `backend`.
    #[must_use]
    pub fn new<B: Backend>(backend: B) -> Self {
        Self::with_shared(Arc::new(backend))
    }

    /// Create a shadow layer targeting a shared backend.
    #[must_use]
    pub fn with_shared(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            config: ShadowConfig::default(),
            tasks: TaskTracker::new(),
            abandon: CancellationToken::new(),
        }
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ShadowConfig) -> Self {
        self.config = config;
        self
    }

    /// The shadow configuration.
    #[must_use]
    pub const fn config(&self) -> &ShadowConfig {
        &self.config
    }

    /// Number of shadow executions still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    fn spawn_shadow(&self, mut shadow: RequestContext) {
        if self.tasks.is_closed() {
            debug!(shadow = %self.config.name, "shadow layer shut down, skipping");
            return;
        }

        let backend = Arc::clone(&self.backend);
        let abandon = self.abandon.clone();
        let span = info_span!(
            "shadow",
            name = %self.config.name,
            model = %shadow.model(),
            session_id = %shadow.session_id(),
        );

        self.tasks.spawn(
            async move {
                let outcome = tokio::select! {
                    () = abandon.cancelled() => {
                        debug!("shadow execution abandoned");
                        return;
                    }
                    outcome = backend.generate(&mut shadow) => outcome,
                };

                match outcome {
                    Ok(()) => info!(
                        response = shadow.response().unwrap_or_default(),
                        latency_ms = shadow.metrics().latency_ms(),
                        cost_usd = shadow.metrics().cost_usd,
                        "shadow execution finished"
                    ),
                    Err(error) => warn!(error = %error, "shadow execution failed"),
                }
            }
            .instrument(span),
        );
    }
}

impl fmt::Debug for ShadowLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowLayer")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .field("in_flight", &self.tasks.len())
            .finish()
    }
}

impl Layer for ShadowLayer {
    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let model = format!("{}{}", ctx.model(), self.config.model_suffix);
            self.spawn_shadow(ctx.fork(model));

            next.run(ctx).await
        })
    }

    fn name(&self) -> &str {
        "shadow"
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.tasks.close();
            let drained = tokio::time::timeout(self.config.drain_timeout, self.tasks.wait()).await;
            if drained.is_err() {
                warn!(
                    pending = self.tasks.len(),
                    "shadow drain timed out, abandoning outstanding executions"
                );
                self.abandon.cancel();
                self.tasks.wait().await;
            }
        })
    }
}
