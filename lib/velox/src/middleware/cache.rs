//! Exact-match response cache.
//!
//! Responses are keyed by the target model and the most recent user message.
//! The key is computed from the context as this layer sees it, so transforms
//! applied by outer layers (rerouting, redaction) are part of the key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;
use velox_core::metadata::keys;
use velox_core::{BoxFuture, Layer, Message, Next, RequestContext, Result, UsageMetrics};

/// Cache key: (model, most recent user message content).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    model: String,
    prompt: String,
}

impl CacheKey {
    /// Creates a key from its parts.
    #[must_use]
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
        }
    }

    /// Key for `ctx`, falling back to the last message when no user message exists.
    #[must_use]
    pub fn for_context(ctx: &RequestContext) -> Self {
        let prompt = ctx
            .last_user_message()
            .or_else(|| ctx.last_message())
            .map(Message::content)
            .unwrap_or_default();
        Self::new(ctx.model(), prompt)
    }

    /// Model part of the key.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Prompt part of the key.
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

/// Thread-safe response table with hit/miss counters.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<CacheKey, String>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, String>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up `key`, counting the hit or miss.
    pub fn lookup(&self, key: &CacheKey) -> Option<String> {
        let found = self.entries().get(key).cloned();
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Stores `response` under `key`.
    pub fn insert(&self, key: CacheKey, response: impl Into<String>) {
        self.entries().insert(key, response.into());
    }

    /// Returns `true` if `key` has a stored response.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries().contains_key(key)
    }

    /// Number of stored responses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Drops every stored response.
    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Number of lookups served from the table.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of lookups that fell through.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// Layer serving repeated prompts from a [`ResponseCache`].
///
/// A hit short-circuits the chain with zero usage and tags
/// `cache_hit = true`; a miss calls downstream and stores the response.
/// Failures never populate the cache.
///
/// # Example
///
/// ```ignore
/// use velox::middleware::CacheLayer;
///
/// let engine = Engine::builder()
///     .layer(CacheLayer::new())
///     .backend(backend)
///     .build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct CacheLayer {
    store: Arc<ResponseCache>,
}

impl CacheLayer {
    /// Create a cache layer with its own empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache layer backed by `store`.
    #[must_use]
    pub const fn with_store(store: Arc<ResponseCache>) -> Self {
        Self { store }
    }

    /// The backing table.
    #[must_use]
    pub const fn store(&self) -> &Arc<ResponseCache> {
        &self.store
    }
}

impl Layer for CacheLayer {
    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let key = CacheKey::for_context(ctx);

            if let Some(cached) = self.store.lookup(&key) {
                debug!(model = %key.model(), "cache hit");
                ctx.set_response(cached, Some(UsageMetrics::default()));
                ctx.metadata_mut().insert(keys::CACHE_HIT, true);
                return Ok(());
            }

            next.run(ctx).await?;

            if let Some(response) = ctx.response() {
                self.store.insert(key, response);
            }
            ctx.metadata_mut().insert(keys::CACHE_HIT, false);
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "cache"
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;

    use super::*;

    #[test]
    fn key_uses_last_user_message() {
        let ctx = RequestContext::new(
            vec![Message::user("question"), Message::assistant("answer")],
            "gpt-4",
        )
        .expect("context");

        let key = CacheKey::for_context(&ctx);
        check!(key == CacheKey::new("gpt-4", "question"));
    }

    #[test]
    fn key_falls_back_to_last_message() {
        let ctx =
            RequestContext::new(vec![Message::system("only system")], "m").expect("context");

        check!(CacheKey::for_context(&ctx).prompt() == "only system");
    }

    #[test]
    fn key_is_exact_match() {
        check!(CacheKey::new("m", "Hello") != CacheKey::new("m", "hello"));
        check!(CacheKey::new("a", "x") != CacheKey::new("b", "x"));
    }

    #[test]
    fn store_counts_hits_and_misses() {
        let cache = ResponseCache::new();
        let key = CacheKey::new("m", "p");

        check!(cache.lookup(&key).is_none());
        cache.insert(key.clone(), "r");
        check!(cache.lookup(&key).as_deref() == Some("r"));

        check!(cache.hits() == 1);
        check!(cache.misses() == 1);
        check!(cache.len() == 1);

        cache.clear();
        check!(cache.is_empty());
    }
}
