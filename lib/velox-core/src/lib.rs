//! Core types and traits for the velox LLM middleware pipeline.
//!
//! This crate provides the foundational types used by velox:
//! - [`Message`] and [`Role`] - Chat messages
//! - [`RequestContext`] and [`UsageMetrics`] - The unit of work and its telemetry
//! - [`Metadata`] - Open key/value channel between layers and the caller
//! - [`Layer`] and [`Next`] - Middleware capability and remainder-of-chain handle
//! - [`Backend`] - Terminal model backend capability
//! - [`Pipeline`] - Chain composition and execution
//! - [`Error`] and [`Result`] - Error handling

mod backend;
mod context;
mod error;
mod layer;
mod message;
pub mod metadata;
mod pipeline;
pub mod prelude;

pub use backend::Backend;
pub use context::{
    DEFAULT_MODEL, DEFAULT_TEMPERATURE, RequestContext, RequestContextBuilder, UsageMetrics,
};
pub use error::{Error, Result};
pub use layer::{BoxFuture, Layer, Next};
pub use message::{Message, Role};
pub use metadata::Metadata;
pub use pipeline::Pipeline;

// Re-export for callers wiring cancellation into requests
pub use tokio_util::sync::CancellationToken;
