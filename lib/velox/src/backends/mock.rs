//! Deterministic backend for tests and demos.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use velox_core::{Backend, BoxFuture, Error, Message, RequestContext, Result, UsageMetrics};

/// Backend echoing the last message after a fixed latency.
///
/// The response is `"{text} (Echo: {last message})"` with 5 prompt and 5
/// completion tokens costing $0.0001. The first `fail_count` calls fail with a
/// retryable backend error.
///
/// Clones share their call counter.
#[derive(Debug, Clone)]
pub struct MockBackend {
    response_text: String,
    latency: Duration,
    fail_count: u32,
    usage: UsageMetrics,
    echo: bool,
    calls: Arc<AtomicU32>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new("Mock Response")
    }
}

impl MockBackend {
    /// Mock answering with `response_text`.
    #[must_use]
    pub fn new(response_text: impl Into<String>) -> Self {
        Self {
            response_text: response_text.into(),
            latency: Duration::from_millis(100),
            fail_count: 0,
            usage: UsageMetrics::new(5, 5, 0.0001),
            echo: true,
            calls: Arc::default(),
        }
    }

    /// Set the simulated latency.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the first `fail_count` calls.
    #[must_use]
    pub const fn with_failures(mut self, fail_count: u32) -> Self {
        self.fail_count = fail_count;
        self
    }

    /// Set the usage reported with each response.
    #[must_use]
    pub const fn with_usage(mut self, usage: UsageMetrics) -> Self {
        self.usage = usage;
        self
    }

    /// Answer with the bare response text, without the echo suffix.
    #[must_use]
    pub const fn without_echo(mut self) -> Self {
        self.echo = false;
        self
    }

    /// Number of calls received so far, failed ones included.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn render(&self, ctx: &RequestContext) -> String {
        if !self.echo {
            return self.response_text.clone();
        }
        let last = ctx.last_message().map(Message::content).unwrap_or_default();
        format!("{} (Echo: {last})", self.response_text)
    }
}

impl Backend for MockBackend {
    fn generate<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            if call < self.fail_count {
                return Err(Error::backend("simulated provider error"));
            }

            let response = self.render(ctx);
            ctx.set_response(response, Some(self.usage));
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::*;

    fn context(text: &str) -> RequestContext {
        RequestContext::new(vec![Message::user(text)], "m").expect("context")
    }

    #[tokio::test(start_paused = true)]
    async fn echoes_last_message() {
        let backend = MockBackend::default();
        let mut ctx = context("hello");

        backend.generate(&mut ctx).await.expect("generate");

        check!(ctx.response() == Some("Mock Response (Echo: hello)"));
        check!(ctx.metrics().total_tokens == 10);
        check!(ctx.metrics().prompt_tokens == 5);
        check!(ctx.metrics().completion_tokens == 5);
        check!(ctx.metrics().cost_usd == 0.0001);
        check!(backend.calls() == 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fails_leading_calls() {
        let backend = MockBackend::default().with_failures(2);
        let mut ctx = context("hello");

        let_assert!(Err(error) = backend.generate(&mut ctx).await);
        check!(error.is_retryable());
        check!(backend.generate(&mut ctx).await.is_err());
        check!(backend.generate(&mut ctx).await.is_ok());
        check!(backend.calls() == 3);
    }

    #[tokio::test]
    async fn without_echo_and_latency() {
        let backend = MockBackend::new("X")
            .without_echo()
            .with_latency(Duration::ZERO);
        let mut ctx = context("ignored");

        backend.generate(&mut ctx).await.expect("generate");

        check!(ctx.response() == Some("X"));
    }

    #[test]
    fn clones_share_counter() {
        let backend = MockBackend::default();
        let clone = backend.clone();
        backend.calls.fetch_add(1, Ordering::SeqCst);

        check!(clone.calls() == 1);
    }
}
