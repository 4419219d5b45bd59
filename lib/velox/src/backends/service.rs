//! Tower service adapter.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use tower::{Service, ServiceExt};
use velox_core::{Backend, BoxFuture, Error, RequestContext, Result};

/// Backend delegating to a `tower::Service` taking and returning the context.
///
/// The service is cloned for every call, so the backend can be shared
/// across concurrent requests. This allows any tower middleware stack
/// (timeouts, concurrency limits, ...) to terminate a velox pipeline.
///
/// # Example
///
/// ```ignore
/// use tower::ServiceBuilder;
/// use velox::backends::ServiceBackend;
///
/// let service = ServiceBuilder::new()
///     .concurrency_limit(4)
///     .service(provider_service);
/// let backend = ServiceBackend::new(service);
/// ```
pub struct ServiceBackend<S> {
    inner: Mutex<S>,
}

impl<S> ServiceBackend<S> {
    /// Wrap `service`.
    #[must_use]
    pub const fn new(service: S) -> Self {
        Self {
            inner: Mutex::new(service),
        }
    }
}

impl<S> fmt::Debug for ServiceBackend<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBackend").finish_non_exhaustive()
    }
}

impl<S> Backend for ServiceBackend<S>
where
    S: Service<RequestContext, Response = RequestContext, Error = Error> + Clone + Send + 'static,
    S::Future: Send,
{
    fn generate<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Result<()>> {
        // Lock, clone the service, and release the lock immediately
        let service = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        Box::pin(async move {
            *ctx = service.oneshot(ctx.clone()).await?;
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "service"
    }
}
