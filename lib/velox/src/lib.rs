//! Composable async middleware pipeline for LLM requests.
//!
//! Stack reusable layers (caching, retries, cost limits, routing, shadow
//! traffic, redaction, tooling) in front of any model backend.
//!
//! # Example
//!
//! ```ignore
//! use velox::prelude::*;
//! use velox::backends::MockBackend;
//!
//! let engine = Engine::builder()
//!     .with_logging()
//!     .with_cache()
//!     .with_retry(3)
//!     .backend(MockBackend::default())
//!     .build();
//!
//! let ctx = engine
//!     .run(vec![Message::user("Hello")], RunOptions::new().model("gpt-4"))
//!     .await?;
//! println!("{}", ctx.response().unwrap_or_default());
//! ```
//!
//! Layers are called in insertion order on the way in and in reverse order on
//! the way out. See [`middleware`] for the reference layers and [`backends`]
//! for the reference backends.

pub mod backends;
mod config;
mod engine;
pub mod middleware;
pub mod prelude;

pub use config::{EngineConfig, EngineConfigBuilder, RunOptions};
pub use engine::{Engine, EngineBuilder};

// Re-export tower for service composition
pub use tower;

// Re-export core types
pub use velox_core::{
    Backend, BoxFuture, CancellationToken, DEFAULT_MODEL, DEFAULT_TEMPERATURE, Error, Layer,
    Message, Metadata, Next, Pipeline, RequestContext, RequestContextBuilder, Result, Role,
    UsageMetrics, metadata,
};
