//! Quickstart
//!
//! Builds an engine with the reference layers in front of the mock backend
//! and sends a few prompts through it.

// Demo-specific lint allowances
#![allow(clippy::print_stdout)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use velox::backends::MockBackend;
use velox::middleware::{
    CostLimiterLayer, PiiGuardLayer, RetryConfig, RetryLayer, SpendLedger, ToolingLayer,
};
use velox::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .init();

    let ledger = Arc::new(SpendLedger::new());
    let tools = ToolingLayer::new().tool(
        "weather",
        json!({"name": "weather", "parameters": {"city": "string"}}),
        |args| Ok(json!({"city": args.get("city"), "forecast": "sunny"})),
    );

    let engine = Engine::builder()
        .default_model("gpt-4")
        .request_timeout(Duration::from_secs(10))
        .with_logging()
        .with_metrics()
        .layer(PiiGuardLayer::new())
        .with_cache()
        .layer(CostLimiterLayer::new(0.001).with_ledger(Arc::clone(&ledger)))
        .with_router("gpt-3.5-turbo")
        .with_shadow(MockBackend::new("Shadow Response"))
        .layer(RetryLayer::with_config(RetryConfig::new(
            3,
            Duration::from_millis(100),
        )))
        .layer(tools)
        .backend(MockBackend::default().with_failures(1))
        .build();

    println!("[1] Flaky backend, recovered by retry");
    let ctx = engine
        .run(
            vec![Message::user("Hello, my email is test@example.com")],
            RunOptions::new().session_id("demo"),
        )
        .await?;
    println!("    response: {}", ctx.response().unwrap_or_default());
    println!("    model:    {}", ctx.model());
    println!("    logs:     {:?}", ctx.metadata().logs());

    println!("[2] Same prompt again, served from cache");
    let ctx = engine
        .run(
            vec![Message::user("Hello, my email is test@example.com")],
            RunOptions::new().session_id("demo"),
        )
        .await?;
    println!(
        "    cache_hit: {:?}, cost: ${:.6}",
        ctx.metadata().get_bool(keys::CACHE_HIT),
        ctx.metrics().cost_usd
    );

    println!("[3] A complex prompt keeps its model");
    let answer = engine
        .prompt(
            "Explain step-by-step how a middleware pipeline works",
            RunOptions::new().session_id("demo"),
        )
        .await?;
    println!("    response: {answer}");

    println!("    session spend: ${:.6}", ledger.spent("demo"));

    engine.shutdown().await;
    Ok(())
}
