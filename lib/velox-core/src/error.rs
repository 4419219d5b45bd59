//! Error types for velox.

use derive_more::{Display, Error};

/// Main error type for velox operations.
///
/// Layers that do not handle a failure must return it unchanged, so the
/// caller always sees the original cause.
#[derive(Debug, Display, Error)]
pub enum Error {
    /// The pipeline was run before a backend was configured.
    #[display("no backend configured")]
    NoBackend,

    /// Failure raised by a backend while generating a response.
    #[display("backend error: {message}")]
    Backend {
        /// Error message reported by the backend.
        message: String,
    },

    /// The backend (or the engine request timeout) took too long.
    #[display("request timeout")]
    Timeout,

    /// The session spend ceiling was reached before the request ran.
    #[display("budget exceeded for session {session_id}: spent ${spent:.6} of ${limit:.6}")]
    BudgetExceeded {
        /// Session whose budget is exhausted.
        session_id: String,
        /// Accumulated spend for the session, in USD.
        spent: f64,
        /// Configured ceiling, in USD.
        limit: f64,
    },

    /// The request itself is malformed (e.g. no messages).
    #[display("invalid request: {_0}")]
    InvalidRequest(#[error(not(source))] String),

    /// A redaction pattern failed to compile.
    #[display("invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Compiler error message.
        message: String,
    },

    /// An in-process transform failed unexpectedly.
    #[display("layer '{layer}' failed: {message}")]
    Layer {
        /// Name of the failing layer.
        layer: String,
        /// Error message.
        message: String,
    },

    /// The chain completed successfully without populating a response.
    #[display("pipeline completed without a response")]
    MissingResponse,

    /// The request was cancelled by its caller.
    #[display("request cancelled")]
    Cancelled,
}

/// Result type alias using [`crate::Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a backend error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Create a budget exceeded error.
    #[must_use]
    pub fn budget_exceeded(session_id: impl Into<String>, spent: f64, limit: f64) -> Self {
        Self::BudgetExceeded {
            session_id: session_id.into(),
            spent,
            limit,
        }
    }

    /// Create an invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create an invalid pattern error.
    #[must_use]
    pub fn invalid_pattern(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Create a layer error.
    #[must_use]
    pub fn layer(layer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Layer {
            layer: layer.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if a retry layer may re-attempt the request.
    ///
    /// Only backend failures and timeouts qualify.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::Timeout)
    }

    /// Returns `true` if this is a budget exceeded error.
    #[must_use]
    pub const fn is_budget_exceeded(&self) -> bool {
        matches!(self, Self::BudgetExceeded { .. })
    }

    /// Returns `true` if this is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` if this is a timeout error.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Returns `true` if the pipeline itself is misconfigured.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::NoBackend | Self::InvalidPattern { .. })
    }
}
