//! Integration tests for the reference middleware layers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert2::{check, let_assert};
use serde_json::json;
use velox::backends::{MockBackend, backend_fn};
use velox::metadata::keys;
use velox::middleware::{
    CacheLayer, CostLimiterLayer, PiiGuardLayer, ResponseCache, RetryConfig, RetryLayer,
    RouterLayer, ShadowConfig, ShadowLayer, SpendLedger, ToolingLayer,
};
use velox::{CancellationToken, Engine, Error, Message, RunOptions, UsageMetrics};

fn user(text: &str) -> Vec<Message> {
    vec![Message::user(text)]
}

fn instant_backend() -> MockBackend {
    MockBackend::default().with_latency(Duration::ZERO)
}

fn fast_retry(max_retries: u32) -> RetryLayer {
    RetryLayer::with_config(RetryConfig::new(max_retries, Duration::from_millis(10)))
}

// ============================================================================
// Cache
// ============================================================================

/// Test that a repeated prompt is served from the cache at zero cost.
#[tokio::test(start_paused = true)]
async fn test_cache_hit_is_free() {
    let backend = MockBackend::default();
    let engine = Engine::builder()
        .with_cache()
        .backend(backend.clone())
        .build();
    let options = RunOptions::new().model("gpt-4");

    let first = engine.run(user("hi"), options.clone()).await.expect("first");
    let second = engine.run(user("hi"), options).await.expect("second");

    check!(first.metadata().get_bool(keys::CACHE_HIT) == Some(false));
    check!(first.metrics().cost_usd == 0.0001);
    check!(second.metadata().get_bool(keys::CACHE_HIT) == Some(true));
    check!(second.metrics().cost_usd == 0.0);
    check!(second.metrics().total_tokens == 0);
    check!(second.response() == first.response());
    check!(backend.calls() == 1);
}

/// Test that the cache key includes the model.
#[tokio::test(start_paused = true)]
async fn test_cache_key_includes_model() {
    let backend = MockBackend::default();
    let engine = Engine::builder()
        .with_cache()
        .backend(backend.clone())
        .build();

    engine
        .run(user("hi"), RunOptions::new().model("a"))
        .await
        .expect("a");
    let other = engine
        .run(user("hi"), RunOptions::new().model("b"))
        .await
        .expect("b");

    check!(other.metadata().get_bool(keys::CACHE_HIT) == Some(false));
    check!(backend.calls() == 2);
}

/// Test that a failed miss never populates the cache.
#[tokio::test(start_paused = true)]
async fn test_cache_failed_miss_not_stored() {
    let store = Arc::new(ResponseCache::new());
    let backend = MockBackend::default().with_failures(1);
    let engine = Engine::builder()
        .layer(CacheLayer::with_store(Arc::clone(&store)))
        .backend(backend.clone())
        .build();

    let_assert!(Err(Error::Backend { .. }) = engine.run(user("hi"), RunOptions::new()).await);
    check!(store.is_empty());

    let ctx = engine.run(user("hi"), RunOptions::new()).await.expect("retry by hand");
    check!(ctx.metadata().get_bool(keys::CACHE_HIT) == Some(false));
    check!(store.len() == 1);
    check!(store.misses() == 2);
    check!(backend.calls() == 2);
}

// ============================================================================
// Retry
// ============================================================================

/// Test that N failures followed by a success yield N log entries.
#[tokio::test(start_paused = true)]
async fn test_retry_recovers_and_logs() {
    let backend = MockBackend::default().with_failures(2);
    let engine = Engine::builder()
        .layer(fast_retry(3))
        .backend(backend.clone())
        .build();

    let ctx = engine.run(user("hi"), RunOptions::new()).await.expect("run");

    check!(ctx.response() == Some("Mock Response (Echo: hi)"));
    check!(
        ctx.metadata().logs()
            == [
                "Retry 1/3 due to: backend error: simulated provider error",
                "Retry 2/3 due to: backend error: simulated provider error",
            ]
    );
    check!(backend.calls() == 3);
}

/// Test that exhausted retries re-raise the original failure after M+1 attempts.
#[tokio::test(start_paused = true)]
async fn test_retry_exhausted() {
    let backend = instant_backend().with_failures(u32::MAX);
    let engine = Engine::builder()
        .layer(fast_retry(2))
        .backend(backend.clone())
        .build();

    let_assert!(
        Err(Error::Backend { message }) = engine.run(user("hi"), RunOptions::new()).await
    );
    check!(message == "simulated provider error");
    check!(backend.calls() == 3);
}

/// Test that non-retryable failures are attempted only once.
#[tokio::test]
async fn test_retry_skips_non_retryable() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let engine = Engine::builder()
        .layer(fast_retry(3))
        .backend(backend_fn(move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(Error::invalid_request("bad payload")) })
        }))
        .build();

    let_assert!(Err(Error::InvalidRequest(_)) = engine.run(user("hi"), RunOptions::new()).await);
    check!(calls.load(Ordering::SeqCst) == 1);
}

/// Test that the backoff wait gives up when the request is cancelled.
#[tokio::test(start_paused = true)]
async fn test_retry_backoff_observes_cancellation() {
    let engine = Engine::builder()
        .layer(RetryLayer::with_config(RetryConfig::new(
            5,
            Duration::from_secs(60),
        )))
        .backend(instant_backend().with_failures(u32::MAX))
        .build();
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let result = engine
        .run(user("hi"), RunOptions::new().cancellation(token))
        .await;

    let_assert!(Err(Error::Cancelled) = result);
}

// ============================================================================
// Shadow
// ============================================================================

/// Test that the primary response does not wait for a slow shadow.
#[tokio::test(start_paused = true)]
async fn test_shadow_does_not_delay_primary() {
    let shadow = MockBackend::new("shadow").with_latency(Duration::from_secs(30));
    let engine = Engine::builder()
        .with_shadow(shadow.clone())
        .backend(instant_backend())
        .build();

    let start = tokio::time::Instant::now();
    let ctx = engine.run(user("hi"), RunOptions::new()).await.expect("run");

    check!(start.elapsed() < Duration::from_secs(1));
    check!(ctx.response() == Some("Mock Response (Echo: hi)"));

    // Shutdown abandons the shadow after the drain timeout
    engine.shutdown().await;
    check!(shadow.calls() == 1);
}

/// Test that a failing shadow never affects the primary result.
#[tokio::test(start_paused = true)]
async fn test_shadow_failure_is_contained() {
    let shadow = instant_backend().with_failures(u32::MAX);
    let engine = Engine::builder()
        .with_shadow(shadow.clone())
        .backend(instant_backend())
        .build();

    let ctx = engine.run(user("hi"), RunOptions::new()).await.expect("run");
    engine.shutdown().await;

    check!(ctx.response() == Some("Mock Response (Echo: hi)"));
    check!(shadow.calls() == 1);
}

/// Test that the shadow sees a fork targeting the suffixed model.
#[tokio::test]
async fn test_shadow_targets_suffixed_model() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let shadow = backend_fn(move |ctx| {
        recorder
            .lock()
            .expect("seen lock")
            .push((ctx.model().to_string(), ctx.session_id().to_string()));
        Box::pin(async move {
            ctx.set_response("shadow", None);
            Ok(())
        })
    });
    let layer = ShadowLayer::new(shadow).with_config(
        ShadowConfig::default()
            .with_model_suffix("-candidate")
            .with_drain_timeout(Duration::from_secs(1)),
    );
    let engine = Engine::builder()
        .layer(layer)
        .backend(instant_backend())
        .build();

    let ctx = engine
        .run(user("hi"), RunOptions::new().model("gpt-4").session_id("s-1"))
        .await
        .expect("run");
    engine.shutdown().await;

    check!(ctx.model() == "gpt-4");
    let seen = seen.lock().expect("seen lock").clone();
    check!(seen == [("gpt-4-candidate".to_string(), "s-1".to_string())]);
}

/// Test that requests served after shutdown are no longer shadowed.
#[tokio::test]
async fn test_shadow_stops_after_shutdown() {
    let shadow = instant_backend();
    let engine = Engine::builder()
        .with_shadow(shadow.clone())
        .backend(instant_backend())
        .build();

    engine.run(user("before"), RunOptions::new()).await.expect("before");
    engine.shutdown().await;
    let own = RunOptions::new().cancellation(CancellationToken::new());
    let ctx = engine.run(user("after"), own).await.expect("after");

    check!(ctx.response() == Some("Mock Response (Echo: after)"));
    check!(shadow.calls() == 1);
}

// ============================================================================
// Cost limiter
// ============================================================================

/// Test that an exhausted session fails before reaching the backend.
#[tokio::test]
async fn test_cost_limit_blocks_exhausted_session() {
    let backend = instant_backend();
    let engine = Engine::builder()
        .with_cost_limit(0.00015)
        .backend(backend.clone())
        .build();
    let session = RunOptions::new().session_id("s");

    engine.run(user("one"), session.clone()).await.expect("one");
    engine.run(user("two"), session.clone()).await.expect("two");
    let_assert!(
        Err(Error::BudgetExceeded { session_id, .. }) = engine.run(user("three"), session).await
    );

    check!(session_id == "s");
    check!(backend.calls() == 2);

    let other = engine.run(user("four"), RunOptions::new().session_id("other")).await;
    check!(other.is_ok());
}

/// Test that concurrent charges on one session are never lost.
///
/// The backend latency makes every request pass the budget check before
/// any of them is charged.
#[tokio::test(start_paused = true)]
async fn test_cost_limit_concurrent_charges() {
    let ledger = Arc::new(SpendLedger::new());
    let engine = Engine::builder()
        .layer(CostLimiterLayer::new(1_000.0).with_ledger(Arc::clone(&ledger)))
        .backend(
            MockBackend::default()
                .with_latency(Duration::from_millis(10))
                .with_usage(UsageMetrics::new(1, 1, 0.5)),
        )
        .build();
    let start = tokio::time::Instant::now();

    let handles = (0..32)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .run(
                        user(&format!("request {i}")),
                        RunOptions::new().session_id("shared"),
                    )
                    .await
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.await.expect("join").expect("run");
    }

    check!(start.elapsed() < Duration::from_millis(20));
    check!(ledger.spent("shared") == 16.0);
}

/// Test that per-request mode flags expensive requests without charging.
#[tokio::test]
async fn test_cost_limit_per_request_flags() {
    let layer = CostLimiterLayer::per_request(0.00005);
    let ledger = Arc::clone(layer.ledger());
    let engine = Engine::builder()
        .layer(layer)
        .backend(instant_backend())
        .build();

    let ctx = engine.run(user("hi"), RunOptions::new()).await.expect("run");

    check!(ctx.metadata().get_bool(keys::OVER_BUDGET) == Some(true));
    check!(ledger.sessions() == 0);
}

// ============================================================================
// Router
// ============================================================================

/// Test that a short prompt is rerouted to the cheap model.
#[tokio::test]
async fn test_router_reroutes_simple_prompt() {
    let engine = Engine::builder()
        .layer(RouterLayer::default())
        .backend(instant_backend())
        .build();

    let ctx = engine
        .run(user("What is 2+2?"), RunOptions::new().model("gpt-4"))
        .await
        .expect("run");

    check!(ctx.model() == "gpt-3.5-turbo");
    check!(ctx.metadata().get_str(keys::ORIGINAL_MODEL) == Some("gpt-4"));
    check!(ctx.metadata().get_str(keys::ROUTED_BY) == Some("router"));
}

/// Test that a retried request keeps the model the caller asked for.
#[tokio::test(start_paused = true)]
async fn test_router_inside_retry_keeps_original_model() {
    let backend = instant_backend().with_failures(1);
    let engine = Engine::builder()
        .layer(fast_retry(2))
        .layer(RouterLayer::default())
        .backend(backend.clone())
        .build();

    let ctx = engine
        .run(user("What is 2+2?"), RunOptions::new().model("gpt-4"))
        .await
        .expect("run");

    check!(backend.calls() == 2);
    check!(ctx.model() == "gpt-3.5-turbo");
    check!(ctx.metadata().get_str(keys::ORIGINAL_MODEL) == Some("gpt-4"));
    check!(ctx.metadata().get_str(keys::ROUTED_BY) == Some("router"));
}

/// Test that long or complex prompts keep their model.
#[tokio::test]
async fn test_router_keeps_complex_prompt() {
    let engine = Engine::builder()
        .with_router("cheap")
        .backend(instant_backend())
        .build();
    let long = "x".repeat(50);

    let ctx = engine
        .run(user(&long), RunOptions::new().model("gpt-4"))
        .await
        .expect("long");
    check!(ctx.model() == "gpt-4");
    check!(!ctx.metadata().contains_key(keys::ORIGINAL_MODEL));

    let ctx = engine
        .run(user("Explain TCP"), RunOptions::new().model("gpt-4"))
        .await
        .expect("keyword");
    check!(ctx.model() == "gpt-4");
}

// ============================================================================
// PII guard
// ============================================================================

/// Test that PII is redacted before the backend sees the messages.
#[tokio::test]
async fn test_pii_redacted_before_backend() {
    let seen = Arc::new(Mutex::new(String::new()));
    let recorder = Arc::clone(&seen);
    let engine = Engine::builder()
        .layer(PiiGuardLayer::new())
        .backend(backend_fn(move |ctx| {
            let content = ctx
                .last_message()
                .map(|message| message.content().to_string())
                .unwrap_or_default();
            *recorder.lock().expect("seen lock") = content;
            Box::pin(async move {
                ctx.set_response("ok", None);
                Ok(())
            })
        }))
        .build();

    let ctx = engine
        .run(user("My email is test@example.com, please help."), RunOptions::new())
        .await
        .expect("run");

    check!(*seen.lock().expect("seen lock") == "My email is [REDACTED], please help.");
    check!(ctx.messages()[0].content() == "My email is [REDACTED], please help.");
    check!(ctx.metadata().get(keys::PII_REDACTIONS) == Some(&json!(1)));
}

// ============================================================================
// Tooling
// ============================================================================

/// Test that a tool-call response runs the registered handler.
#[tokio::test]
async fn test_tooling_executes_registered_tool() {
    let tooling = ToolingLayer::new().tool(
        "add",
        json!({"name": "add", "parameters": {"a": "integer", "b": "integer"}}),
        |args| {
            let a = args["a"].as_i64().unwrap_or_default();
            let b = args["b"].as_i64().unwrap_or_default();
            Ok(json!(a + b))
        },
    );
    let engine = Engine::builder()
        .layer(tooling)
        .backend(
            MockBackend::new(r#"{"tool": "add", "args": {"a": 2, "b": 3}}"#)
                .without_echo()
                .with_latency(Duration::ZERO),
        )
        .build();

    let ctx = engine.run(user("add 2 and 3"), RunOptions::new()).await.expect("run");

    check!(ctx.metadata().get_str(keys::TOOL_EXECUTED) == Some("add"));
    check!(ctx.metadata().get(keys::TOOL_RESULT) == Some(&json!(5)));
    let_assert!(Some(tools) = ctx.metadata().get(keys::AVAILABLE_TOOLS));
    check!(tools[0]["name"] == "add");
}

/// Test that plain text responses are left untouched.
#[tokio::test]
async fn test_tooling_ignores_plain_responses() {
    let engine = Engine::builder()
        .layer(ToolingLayer::new().tool("noop", json!({}), |_| Ok(json!(null))))
        .backend(instant_backend())
        .build();

    let ctx = engine.run(user("hi"), RunOptions::new()).await.expect("run");

    check!(ctx.response() == Some("Mock Response (Echo: hi)"));
    check!(!ctx.metadata().contains_key(keys::TOOL_EXECUTED));
}
