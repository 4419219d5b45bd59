//! The engine facade: one pipeline, its configuration and shutdown.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use velox_core::{
    Backend, CancellationToken, Error, Layer, Message, Pipeline, RequestContext, Result,
};

use crate::config::{EngineConfig, EngineConfigBuilder, RunOptions};
#[cfg(feature = "middleware-metrics")]
use crate::middleware::MetricsLayer;
use crate::middleware::{
    CacheLayer, CostLimiterLayer, LoggingLayer, PiiGuardLayer, RetryLayer, RouterLayer,
    ShadowLayer,
};

/// Runs requests through an ordered middleware pipeline.
///
/// Clones share the same layers, backend and shutdown signal.
///
/// # Example
///
/// ```ignore
/// use velox::{Engine, RunOptions};
/// use velox::backends::MockBackend;
///
/// let engine = Engine::builder()
///     .with_logging()
///     .with_retry(3)
///     .backend(MockBackend::default())
///     .build();
///
/// let answer = engine.prompt("Hello", RunOptions::new()).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Engine {
    pipeline: Pipeline,
    config: EngineConfig,
    shutdown: CancellationToken,
}

impl Engine {
    /// Create an engine with default configuration, no layers and no backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine with custom configuration.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Create a new engine builder.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Append a layer; it runs inside every layer added before it.
    pub fn add<L: Layer>(&mut self, layer: L) -> &mut Self {
        self.pipeline.add_layer(layer);
        self
    }

    /// Set (or replace) the backend.
    pub fn use_backend<B: Backend>(&mut self, backend: B) -> &mut Self {
        self.pipeline.set_backend(backend);
        self
    }

    /// The underlying pipeline.
    #[must_use]
    pub const fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Get the engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns `true` once [`Engine::shutdown`] was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn context(&self, messages: Vec<Message>, options: RunOptions) -> Result<RequestContext> {
        let RunOptions {
            model,
            temperature,
            max_tokens,
            session_id,
            metadata,
            cancellation,
        } = options;

        let mut builder = RequestContext::builder(messages)
            .model(model.unwrap_or_else(|| self.config.default_model.clone()))
            .temperature(temperature.unwrap_or(self.config.temperature))
            .metadata(metadata)
            .cancellation(
                cancellation
                    .as_ref()
                    .unwrap_or(&self.shutdown)
                    .child_token(),
            );
        if let Some(max_tokens) = max_tokens.or(self.config.max_tokens) {
            builder = builder.max_tokens(max_tokens);
        }
        if let Some(session_id) = session_id {
            builder = builder.session_id(session_id);
        }

        builder.build()
    }

    /// Run `messages` through the pipeline, returning the populated context.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] when `messages` is empty
    /// - [`Error::NoBackend`] when no backend is configured
    /// - [`Error::Timeout`] when the configured request timeout elapses; the
    ///   request's own token is cancelled first, a caller token passed in
    ///   [`RunOptions`] is left untouched
    /// - [`Error::Cancelled`] after [`Engine::shutdown`] or caller cancellation
    /// - any failure raised by a layer or the backend
    pub async fn run(&self, messages: Vec<Message>, options: RunOptions) -> Result<RequestContext> {
        let mut ctx = self.context(messages, options)?;

        match self.config.request_timeout {
            Some(limit) => {
                let Ok(outcome) = tokio::time::timeout(limit, self.pipeline.run(&mut ctx)).await
                else {
                    ctx.cancellation().cancel();
                    warn!(
                        session_id = %ctx.session_id(),
                        timeout_ms = duration_ms(limit),
                        "request timed out"
                    );
                    return Err(Error::Timeout);
                };
                outcome?;
            }
            None => self.pipeline.run(&mut ctx).await?,
        }

        Ok(ctx)
    }

    /// Send a single user message and return the response text.
    ///
    /// # Errors
    ///
    /// Same as [`Engine::run`].
    pub async fn prompt(&self, text: impl Into<String>, options: RunOptions) -> Result<String> {
        self.run(vec![Message::user(text)], options)
            .await?
            .into_response()
            .ok_or(Error::MissingResponse)
    }

    /// Cancel in-flight requests and release background work held by layers.
    ///
    /// Requests started afterwards fail with [`Error::Cancelled`], unless they
    /// carry their own cancellation token.
    pub async fn shutdown(&self) {
        info!(layers = self.pipeline.len(), "shutting down engine");
        self.shutdown.cancel();
        self.pipeline.shutdown().await;
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Builder for [`Engine`].
///
/// # Example
///
/// ```ignore
/// use velox::Engine;
/// use velox::middleware::CacheLayer;
/// use std::time::Duration;
///
/// // Helper methods
/// let engine = Engine::builder()
///     .request_timeout(Duration::from_secs(30))
///     .with_cache()
///     .with_retry(3)
///     .backend(backend)
///     .build();
///
/// // Raw layer access
/// let engine = Engine::builder()
///     .layer(CacheLayer::new())
///     .backend(backend)
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct EngineBuilder {
    config: EngineConfigBuilder,
    pipeline: Pipeline,
}

impl EngineBuilder {
    // ========================================================================
    // Core Configuration
    // ========================================================================

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config.into();
        self
    }

    /// Set the default model.
    #[must_use]
    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.config = self.config.default_model(model);
        self
    }

    /// Set the default sampling temperature.
    #[must_use]
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config = self.config.temperature(temperature);
        self
    }

    /// Set the default maximum output tokens.
    #[must_use]
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.config = self.config.max_tokens(max_tokens);
        self
    }

    /// Bound every request by `timeout`.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.request_timeout(timeout);
        self
    }

    // ========================================================================
    // Generic Layer API
    // ========================================================================

    /// Add a layer.
    ///
    /// Layers are applied in order: first added = outermost (processes requests first).
    #[must_use]
    pub fn layer<L: Layer>(mut self, layer: L) -> Self {
        self.pipeline.add_layer(layer);
        self
    }

    /// Add a layer already behind an [`Arc`], e.g. to keep a handle on it.
    #[must_use]
    pub fn shared_layer(mut self, layer: Arc<dyn Layer>) -> Self {
        self.pipeline.add_shared_layer(layer);
        self
    }

    /// Set the backend.
    #[must_use]
    pub fn backend<B: Backend>(mut self, backend: B) -> Self {
        self.pipeline.set_backend(backend);
        self
    }

    /// Set a backend already behind an [`Arc`].
    #[must_use]
    pub fn shared_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.pipeline.set_shared_backend(backend);
        self
    }

    // ========================================================================
    // Layer Helpers
    // ========================================================================

    /// Add request/response logging at info level.
    #[must_use]
    pub fn with_logging(self) -> Self {
        self.layer(LoggingLayer::new())
    }

    /// Add request/response logging at debug level.
    #[must_use]
    pub fn with_debug_logging(self) -> Self {
        self.layer(LoggingLayer::debug())
    }

    /// Add PII redaction with the default patterns.
    #[must_use]
    pub fn with_pii_guard(self) -> Self {
        self.layer(PiiGuardLayer::new())
    }

    /// Add an exact-match response cache.
    #[must_use]
    pub fn with_cache(self) -> Self {
        self.layer(CacheLayer::new())
    }

    /// Add retries with the default backoff.
    #[must_use]
    pub fn with_retry(self, max_retries: u32) -> Self {
        self.layer(RetryLayer::new(max_retries))
    }

    /// Route simple prompts to `cheap_model`.
    #[must_use]
    pub fn with_router(self, cheap_model: impl Into<String>) -> Self {
        self.layer(RouterLayer::new(cheap_model))
    }

    /// Add a per-session spend ceiling, in USD.
    #[must_use]
    pub fn with_cost_limit(self, max_cost_usd: f64) -> Self {
        self.layer(CostLimiterLayer::new(max_cost_usd))
    }

    /// Mirror every request to `backend` in the background.
    #[must_use]
    pub fn with_shadow<B: Backend>(self, backend: B) -> Self {
        self.layer(ShadowLayer::new(backend))
    }

    /// Add metrics middleware.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let engine = Engine::builder()
    ///     .with_metrics()
    ///     .backend(backend)
    ///     .build();
    /// ```
    #[cfg(feature = "middleware-metrics")]
    #[must_use]
    pub fn with_metrics(self) -> Self {
        self.layer(MetricsLayer::new())
    }

    // ========================================================================
    // Build
    // ========================================================================

    /// Build the engine.
    #[must_use]
    pub fn build(self) -> Engine {
        Engine {
            pipeline: self.pipeline,
            config: self.config.build(),
            shutdown: CancellationToken::new(),
        }
    }
}
