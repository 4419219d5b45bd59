//! Closure adapter.

use std::fmt;

use velox_core::{Backend, BoxFuture, RequestContext, Result};

/// Backend backed by a closure returning a boxed future.
///
/// # Example
///
/// ```ignore
/// use velox::backends::backend_fn;
///
/// let backend = backend_fn(|ctx| {
///     Box::pin(async move {
///         ctx.set_response("X", None);
///         Ok(())
///     })
/// });
/// ```
pub struct FnBackend<F> {
    name: String,
    f: F,
}

impl<F> FnBackend<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    /// Wrap `f`.
    #[must_use]
    pub fn new(f: F) -> Self {
        Self {
            name: "fn".to_string(),
            f,
        }
    }

    /// Set the name used in traces.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<F> fmt::Debug for FnBackend<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnBackend")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<F> Backend for FnBackend<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    fn generate<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Result<()>> {
        (self.f)(ctx)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Shorthand for [`FnBackend::new`].
#[must_use]
pub fn backend_fn<F>(f: F) -> FnBackend<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    FnBackend::new(f)
}
