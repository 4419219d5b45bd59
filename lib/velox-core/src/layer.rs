//! Middleware capability and the remainder-of-chain handle.
//!
//! A [`Layer`] receives the request context and a [`Next`] handle onto
//! everything downstream (the remaining layers plus the backend). It may
//! transform the request, short-circuit, call `next` any number of times, or
//! inspect the populated context on the way back up.
//!
//! # Example
//!
//! ```ignore
//! use velox_core::{BoxFuture, Layer, Next, RequestContext, Result};
//!
//! struct Uppercase;
//!
//! impl Layer for Uppercase {
//!     fn process<'a>(
//!         &'a self,
//!         ctx: &'a mut RequestContext,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, Result<()>> {
//!         Box::pin(async move {
//!             next.run(ctx).await?;
//!             let shouted = ctx.response().unwrap_or_default().to_uppercase();
//!             ctx.set_response(shouted, None);
//!             Ok(())
//!         })
//!     }
//! }
//! ```

use std::fmt;
use std::future::{self, Future};
use std::pin::Pin;
use std::sync::Arc;

use crate::{Backend, Error, RequestContext, Result};

/// Boxed, sendable future used by layers and backends.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A link in the middleware chain.
///
/// On success the context must carry a response when `process` returns; the
/// pipeline reports [`Error::MissingResponse`] otherwise.
pub trait Layer: Send + Sync + 'static {
    /// Process the request, delegating downstream through `next`.
    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<()>>;

    /// Name used in traces and diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Releases background work owned by the layer.
    ///
    /// Called by [`Pipeline::shutdown`](crate::Pipeline::shutdown); the default does nothing.
    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(future::ready(()))
    }
}

/// Handle onto the rest of the chain.
///
/// `Next` is `Copy`: a layer may invoke it zero, one or many times.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    layers: &'a [Arc<dyn Layer>],
    backend: &'a dyn Backend,
}

impl<'a> Next<'a> {
    /// Creates a handle running `layers` in order, then `backend`.
    #[must_use]
    pub fn new(layers: &'a [Arc<dyn Layer>], backend: &'a dyn Backend) -> Self {
        Self { layers, backend }
    }

    /// Runs the remaining layers and the backend on `ctx`.
    ///
    /// Refuses to start when the context has been cancelled.
    pub fn run<'b>(self, ctx: &'b mut RequestContext) -> BoxFuture<'b, Result<()>>
    where
        'a: 'b,
    {
        if ctx.is_cancelled() {
            return Box::pin(future::ready(Err(Error::Cancelled)));
        }

        match self.layers.split_first() {
            Some((layer, rest)) => layer.process(
                ctx,
                Next {
                    layers: rest,
                    backend: self.backend,
                },
            ),
            None => self.backend.generate(ctx),
        }
    }

    /// Number of layers left before the backend.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.layers.len()
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.layers.len())
            .field("backend", &self.backend.name())
            .finish()
    }
}
