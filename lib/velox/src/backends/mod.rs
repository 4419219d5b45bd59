//! Reference backends.
//!
//! Real provider adapters live outside this crate: anything implementing
//! [`Backend`](velox_core::Backend) can terminate a pipeline.
//!
//! - [`MockBackend`] - Deterministic echo backend for tests and demos
//! - [`ServiceBackend`] - Adapts a `tower::Service` into a backend
//! - [`FnBackend`] - Adapts an async closure into a backend

mod func;
mod mock;
mod service;

pub use func::{FnBackend, backend_fn};
pub use mock::MockBackend;
pub use service::ServiceBackend;
