//! Prelude module for convenient imports.
//!
//! This module re-exports the most commonly used types
//! for easy glob importing:
//!
//! ```ignore
//! use velox::prelude::*;
//! ```

pub use crate::{
    Backend, BoxFuture, CancellationToken, Engine, EngineConfig, Error, Layer, Message, Metadata,
    Next, Pipeline, RequestContext, Result, Role, RunOptions, UsageMetrics, metadata::keys,
};
pub use serde_json::{Value, json};
