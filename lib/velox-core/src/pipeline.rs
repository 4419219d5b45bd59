//! Chain composition and execution.
//!
//! Layers run in insertion order: the first layer added sees the request
//! first and the response last. The chain is rebuilt from the current layer
//! list on every run, so adding a layer never affects a run already in flight.

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::Service;
use tracing::{Instrument, debug, info_span};

use crate::{Backend, BoxFuture, Error, Layer, Next, RequestContext, Result};

/// Ordered layers plus one terminal backend.
#[derive(Clone, Default)]
pub struct Pipeline {
    layers: Vec<Arc<dyn Layer>>,
    backend: Option<Arc<dyn Backend>>,
}

impl Pipeline {
    /// Creates an empty pipeline without a backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer; it runs inside every layer added before it.
    pub fn add_layer<L: Layer>(&mut self, layer: L) -> &mut Self {
        self.add_shared_layer(Arc::new(layer))
    }

    /// Appends a layer already behind an [`Arc`].
    pub fn add_shared_layer(&mut self, layer: Arc<dyn Layer>) -> &mut Self {
        self.layers.push(layer);
        self
    }

    /// Sets (or replaces) the backend.
    pub fn set_backend<B: Backend>(&mut self, backend: B) -> &mut Self {
        self.set_shared_backend(Arc::new(backend))
    }

    /// Sets (or replaces) the backend from an [`Arc`].
    pub fn set_shared_backend(&mut self, backend: Arc<dyn Backend>) -> &mut Self {
        self.backend = Some(backend);
        self
    }

    /// Returns `true` once a backend is configured.
    #[must_use]
    pub const fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Number of layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns `true` if no layer was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layer names, outermost first.
    #[must_use]
    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }

    /// Runs `ctx` through every layer and the backend.
    ///
    /// Failures surface unchanged unless a layer handles them.
    pub async fn run(&self, ctx: &mut RequestContext) -> Result<()> {
        let Some(backend) = self.backend.as_deref() else {
            return Err(Error::NoBackend);
        };

        let span = info_span!(
            "pipeline",
            session_id = %ctx.session_id(),
            model = %ctx.model(),
            layers = self.layers.len(),
        );

        async move {
            Next::new(&self.layers, backend).run(ctx).await?;

            if ctx.response().is_none() {
                return Err(Error::MissingResponse);
            }

            debug!(
                latency_ms = ctx.metrics().latency_ms(),
                total_tokens = ctx.metrics().total_tokens,
                cost_usd = ctx.metrics().cost_usd,
                "pipeline completed"
            );
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Lets every layer release its background work, outermost first.
    pub async fn shutdown(&self) {
        for layer in &self.layers {
            layer.shutdown().await;
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("layers", &self.layer_names())
            .field("backend", &self.backend.as_ref().map(|backend| backend.name()))
            .finish()
    }
}

// ============================================================================
// Tower Service Implementation
// ============================================================================

impl Service<RequestContext> for Pipeline {
    type Response = RequestContext;
    type Error = Error;
    type Future = BoxFuture<'static, Result<RequestContext>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut ctx: RequestContext) -> Self::Future {
        // Snapshot of the current chain; later additions don't affect this call
        let pipeline = self.clone();
        Box::pin(async move {
            pipeline.run(&mut ctx).await?;
            Ok(ctx)
        })
    }
}
