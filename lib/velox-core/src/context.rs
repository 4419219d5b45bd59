//! The request context threaded through every layer.
//!
//! A [`RequestContext`] is created once per top-level request. Layers mutate it
//! in place on the way in (routing, redaction) and inspect it on the way out
//! (caching, cost tracking). Background executions must work on a
//! [`RequestContext::fork`] so they never race with the primary path.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{Error, Message, Metadata, Result};

/// Model identifier meaning "let the backend pick".
pub const DEFAULT_MODEL: &str = "default";

/// Sampling temperature used when the caller does not set one.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Token, cost and latency telemetry for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageMetrics {
    /// Total tokens (prompt + completion).
    pub total_tokens: u64,
    /// Prompt tokens.
    pub prompt_tokens: u64,
    /// Completion tokens.
    pub completion_tokens: u64,
    /// Accumulated cost in USD.
    pub cost_usd: f64,
    /// Wall-clock time since the request started.
    pub latency: Duration,
}

impl UsageMetrics {
    /// Creates usage from token counts and cost; the total is derived.
    #[must_use]
    pub const fn new(prompt_tokens: u64, completion_tokens: u64, cost_usd: f64) -> Self {
        Self {
            total_tokens: prompt_tokens + completion_tokens,
            prompt_tokens,
            completion_tokens,
            cost_usd,
            latency: Duration::ZERO,
        }
    }

    /// Latency in milliseconds.
    #[must_use]
    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }
}

/// The unit of work flowing through the pipeline.
#[derive(Debug, Clone)]
pub struct RequestContext {
    messages: Vec<Message>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    session_id: String,
    metadata: Metadata,
    response: Option<String>,
    metrics: UsageMetrics,
    started_at: Instant,
    cancellation: CancellationToken,
}

impl RequestContext {
    /// Creates a context for `messages` targeting `model`.
    ///
    /// Fails with [`Error::InvalidRequest`] when `messages` is empty.
    pub fn new(messages: Vec<Message>, model: impl Into<String>) -> Result<Self> {
        Self::builder(messages).model(model).build()
    }

    /// Creates a new [`RequestContextBuilder`].
    #[must_use]
    pub fn builder(messages: Vec<Message>) -> RequestContextBuilder {
        RequestContextBuilder::new(messages)
    }

    /// Conversation messages, never empty.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Mutable access to the messages (content rewrites only, the slice cannot shrink).
    pub fn messages_mut(&mut self) -> &mut [Message] {
        &mut self.messages
    }

    /// The most recent message.
    #[must_use]
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The most recent user-authored message.
    #[must_use]
    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|message| message.is_user())
    }

    /// Target model identifier.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Replaces the target model.
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    /// Sampling temperature.
    #[must_use]
    pub const fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Maximum output tokens.
    #[must_use]
    pub const fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }

    /// Session identifier used to partition stateful layers.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Layer/caller metadata.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mutable layer/caller metadata.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Response text, once populated.
    #[must_use]
    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    /// Consumes the context, returning the response text.
    #[must_use]
    pub fn into_response(self) -> Option<String> {
        self.response
    }

    /// Usage telemetry.
    #[must_use]
    pub const fn metrics(&self) -> &UsageMetrics {
        &self.metrics
    }

    /// Mutable usage telemetry, for layers adding cost of their own.
    pub fn metrics_mut(&mut self) -> &mut UsageMetrics {
        &mut self.metrics
    }

    /// When the request started.
    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Time elapsed since the request started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Cancellation token observed by the pipeline and long-running layers.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns `true` once the caller cancelled the request.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Populates the response.
    ///
    /// Token counts from `usage` replace the current ones, cost accumulates,
    /// and latency is recomputed from the request start.
    pub fn set_response(&mut self, content: impl Into<String>, usage: Option<UsageMetrics>) {
        self.response = Some(content.into());
        if let Some(usage) = usage {
            self.metrics.total_tokens = usage.total_tokens;
            self.metrics.prompt_tokens = usage.prompt_tokens;
            self.metrics.completion_tokens = usage.completion_tokens;
            self.metrics.cost_usd += usage.cost_usd;
        }
        self.metrics.latency = self.started_at.elapsed();
    }

    /// Independent snapshot for a concurrent background execution.
    ///
    /// Keeps messages, sampling parameters, session and a copy of the
    /// metadata; targets `model`, restarts the clock, clears the output and
    /// uses a fresh cancellation token.
    #[must_use]
    pub fn fork(&self, model: impl Into<String>) -> Self {
        Self {
            messages: self.messages.clone(),
            model: model.into(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            session_id: self.session_id.clone(),
            metadata: self.metadata.clone(),
            response: None,
            metrics: UsageMetrics::default(),
            started_at: Instant::now(),
            cancellation: CancellationToken::new(),
        }
    }
}

/// Builder for [`RequestContext`].
#[derive(Debug, Clone)]
pub struct RequestContextBuilder {
    messages: Vec<Message>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    session_id: Option<String>,
    metadata: Metadata,
    cancellation: Option<CancellationToken>,
}

impl RequestContextBuilder {
    /// Creates a builder for `messages`.
    #[must_use]
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            model: None,
            temperature: None,
            max_tokens: None,
            session_id: None,
            metadata: Metadata::new(),
            cancellation: None,
        }
    }

    /// Sets the target model (defaults to [`DEFAULT_MODEL`]).
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the maximum output tokens.
    #[must_use]
    pub const fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Sets the session identifier (defaults to a random UUID).
    #[must_use]
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Sets the initial metadata.
    #[must_use]
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Builds the context, starting its clock.
    pub fn build(self) -> Result<RequestContext> {
        if self.messages.is_empty() {
            return Err(Error::invalid_request("at least one message is required"));
        }

        Ok(RequestContext {
            messages: self.messages,
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: self.max_tokens,
            session_id: self
                .session_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            metadata: self.metadata,
            response: None,
            metrics: UsageMetrics::default(),
            started_at: Instant::now(),
            cancellation: self.cancellation.unwrap_or_default(),
        })
    }
}
