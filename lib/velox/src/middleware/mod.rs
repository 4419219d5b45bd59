//! Reference middleware layers for the velox pipeline.
//!
//! Every layer implements [`velox_core::Layer`] and can be added to an
//! [`Engine`](crate::Engine) or a raw [`Pipeline`](velox_core::Pipeline).
//! Layers run in insertion order: the first layer added sees the request
//! first and the response last.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `middleware-metrics` | [`MetricsLayer`] and the `.with_metrics()` helper |
//!
//! # Available Layers
//!
//! - [`CacheLayer`] - Serves repeated prompts from a [`ResponseCache`]
//! - [`RetryLayer`] - Retries retryable failures with exponential backoff
//! - [`ShadowLayer`] - Mirrors requests to a second backend in the background
//! - [`CostLimiterLayer`] - Enforces spend ceilings through a [`SpendLedger`]
//! - [`RouterLayer`] - Sends simple prompts to a cheaper model
//! - [`LoggingLayer`] - Logs requests/responses using `tracing`
//! - [`PiiGuardLayer`] - Redacts PII from outgoing messages
//! - [`ToolingLayer`] - Advertises tools and executes tool-call responses
//!
//! # Ordering
//!
//! Order matters. A typical stack:
//!
//! ```ignore
//! use velox::Engine;
//!
//! let engine = Engine::builder()
//!     .with_logging()       // sees everything, including cache hits
//!     .with_pii_guard()     // redact before anything is cached or sent
//!     .with_cache()         // keys on the redacted prompt
//!     .with_cost_limit(1.0) // cache hits are free and skip the budget check
//!     .with_retry(3)        // retries only the backend call
//!     .backend(backend)
//!     .build();
//! ```

mod cache;
mod cost;
mod logging;
#[cfg(feature = "middleware-metrics")]
mod metrics;
mod pii_guard;
mod retry;
mod router;
mod shadow;
mod tooling;

pub use cache::{CacheKey, CacheLayer, ResponseCache};
pub use cost::{BudgetMode, CostLimiterLayer, SpendLedger};
pub use logging::{LogLevel, LoggingLayer};
#[cfg(feature = "middleware-metrics")]
pub use metrics::MetricsLayer;
pub use pii_guard::{DEFAULT_PII_PATTERNS, PiiGuardLayer, REDACTED};
pub use retry::{RetryConfig, RetryLayer, RetryPredicate};
pub use router::{DEFAULT_CHEAP_MODEL, PromptClassifier, RouterLayer, SimplePromptHeuristic};
pub use shadow::{ShadowConfig, ShadowLayer};
pub use tooling::{ToolHandler, ToolingLayer};
