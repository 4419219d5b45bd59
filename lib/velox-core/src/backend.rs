//! Terminal backend capability.

use std::sync::Arc;

use crate::{BoxFuture, RequestContext, Result};

/// The model backend, always the last link of the chain.
///
/// On success an implementation must populate the response text and usage
/// through [`RequestContext::set_response`]. Transport, authentication and
/// payload shape are entirely the implementation's concern.
pub trait Backend: Send + Sync + 'static {
    /// Generate a response for `ctx`.
    fn generate<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Result<()>>;

    /// Name used in traces and diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<B: Backend + ?Sized> Backend for Arc<B> {
    fn generate<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Result<()>> {
        (**self).generate(ctx)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
