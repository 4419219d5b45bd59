//! Prelude module for convenient imports.
//!
//! This module re-exports the most commonly used types
//! for easy glob importing:
//!
//! ```ignore
//! use velox_core::prelude::*;
//! ```

pub use crate::{
    Backend, BoxFuture, Error, Layer, Message, Metadata, Next, Pipeline, RequestContext, Result,
    Role, UsageMetrics, metadata::keys,
};
