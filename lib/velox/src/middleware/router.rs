//! Model routing for simple prompts.
//!
//! Short prompts without complexity markers are sent to a cheaper model.
//! Routing only rewrites the request; the response is left untouched.

use std::fmt;
use std::sync::Arc;

use tracing::debug;
use velox_core::metadata::keys;
use velox_core::{BoxFuture, Layer, Message, Next, RequestContext, Result};

/// Default cheaper model targeted by the router.
pub const DEFAULT_CHEAP_MODEL: &str = "gpt-3.5-turbo";

/// Decides whether a prompt is simple enough for a cheaper model.
pub trait PromptClassifier: Send + Sync + 'static {
    /// Returns `true` when `prompt` can be rerouted.
    fn is_simple(&self, prompt: &str) -> bool;
}

impl<F> PromptClassifier for F
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    fn is_simple(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// Length and keyword heuristic.
///
/// A prompt is simple when it is shorter than `threshold_chars` characters
/// and contains none of the `keywords` (case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimplePromptHeuristic {
    threshold_chars: usize,
    keywords: Vec<String>,
}

impl Default for SimplePromptHeuristic {
    fn default() -> Self {
        Self {
            threshold_chars: 50,
            keywords: ["explain", "analyze", "complex", "detailed", "step-by-step"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl SimplePromptHeuristic {
    /// Default heuristic: under 50 characters, no complexity keyword.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the length threshold, in characters.
    #[must_use]
    pub const fn with_threshold(mut self, threshold_chars: usize) -> Self {
        self.threshold_chars = threshold_chars;
        self
    }

    /// Replace the complexity keywords.
    #[must_use]
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords
            .into_iter()
            .map(|keyword| keyword.into().to_lowercase())
            .collect();
        self
    }

    /// The length threshold, in characters.
    #[must_use]
    pub const fn threshold(&self) -> usize {
        self.threshold_chars
    }
}

impl PromptClassifier for SimplePromptHeuristic {
    fn is_simple(&self, prompt: &str) -> bool {
        if prompt.chars().count() >= self.threshold_chars {
            return false;
        }
        let lowered = prompt.to_lowercase();
        !self
            .keywords
            .iter()
            .any(|keyword| lowered.contains(keyword.as_str()))
    }
}

/// Layer rewriting the model of simple requests.
///
/// When rerouting, the requested model is kept under `original_model` and
/// `routed_by` is set to `"router"`. A context that already carries
/// `original_model` (for instance when a retry layer runs the router again)
/// keeps its first recorded model.
///
/// # Example
///
/// ```ignore
/// use velox::middleware::{RouterLayer, SimplePromptHeuristic};
///
/// let layer = RouterLayer::new("gpt-4o-mini")
///     .with_classifier(SimplePromptHeuristic::new().with_threshold(80));
/// ```
#[derive(Clone)]
pub struct RouterLayer {
    cheap_model: String,
    classifier: Arc<dyn PromptClassifier>,
}

impl RouterLayer {
    /// Route simple prompts to `cheap_model` using the default heuristic.
    #[must_use]
    pub fn new(cheap_model: impl Into<String>) -> Self {
        Self {
            cheap_model: cheap_model.into(),
            classifier: Arc::new(SimplePromptHeuristic::default()),
        }
    }

    /// Replace the classifier.
    #[must_use]
    pub fn with_classifier<C: PromptClassifier>(mut self, classifier: C) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// The cheap target model.
    #[must_use]
    pub fn cheap_model(&self) -> &str {
        &self.cheap_model
    }

    fn reroute(&self, ctx: &mut RequestContext) {
        let Some(prompt) = ctx.last_user_message().map(Message::content) else {
            return;
        };
        if !self.classifier.is_simple(prompt) {
            return;
        }

        let original = ctx.model().to_string();
        debug!(from = %original, to = %self.cheap_model, "routing simple prompt");
        let metadata = ctx.metadata_mut();
        if !metadata.contains_key(keys::ORIGINAL_MODEL) {
            metadata.insert(keys::ORIGINAL_MODEL, original);
            metadata.insert(keys::ROUTED_BY, "router");
        }
        ctx.set_model(self.cheap_model.clone());
    }
}

impl Default for RouterLayer {
    fn default() -> Self {
        Self::new(DEFAULT_CHEAP_MODEL)
    }
}

impl fmt::Debug for RouterLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterLayer")
            .field("cheap_model", &self.cheap_model)
            .finish_non_exhaustive()
    }
}

impl Layer for RouterLayer {
    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<()>> {
        self.reroute(ctx);
        next.run(ctx)
    }

    fn name(&self) -> &str {
        "router"
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;

    use super::*;

    #[test]
    fn heuristic_short_prompt_is_simple() {
        let heuristic = SimplePromptHeuristic::new();
        check!(heuristic.is_simple("What is 2+2?"));
    }

    #[test]
    fn heuristic_threshold_is_exclusive() {
        let heuristic = SimplePromptHeuristic::new().with_threshold(5);
        check!(heuristic.is_simple("abcd"));
        check!(!heuristic.is_simple("abcde"));
    }

    #[test]
    fn heuristic_counts_characters_not_bytes() {
        let heuristic = SimplePromptHeuristic::new().with_threshold(5);
        check!(heuristic.is_simple("éééé"));
    }

    #[test]
    fn heuristic_keywords_are_case_insensitive() {
        let heuristic = SimplePromptHeuristic::new();
        check!(!heuristic.is_simple("Explain DNS"));
        check!(!heuristic.is_simple("a STEP-BY-STEP guide"));
    }

    #[test]
    fn custom_keywords() {
        let heuristic = SimplePromptHeuristic::new().with_keywords(["Prove"]);
        check!(!heuristic.is_simple("prove it"));
        check!(heuristic.is_simple("explain it"));
    }

    #[test]
    fn closures_are_classifiers() {
        let layer = RouterLayer::default().with_classifier(|prompt: &str| prompt == "hi");
        check!(layer.classifier.is_simple("hi"));
        check!(!layer.classifier.is_simple("hello"));
        check!(layer.cheap_model() == DEFAULT_CHEAP_MODEL);
    }

    #[test]
    fn reroute_records_original_model() {
        let layer = RouterLayer::default();
        let mut ctx = RequestContext::new(vec![Message::user("hi")], "gpt-4").expect("context");

        layer.reroute(&mut ctx);

        check!(ctx.model() == "gpt-3.5-turbo");
        check!(ctx.metadata().get_str(keys::ORIGINAL_MODEL) == Some("gpt-4"));
        check!(ctx.metadata().get_str(keys::ROUTED_BY) == Some("router"));
    }

    #[test]
    fn reroute_twice_keeps_first_model() {
        let layer = RouterLayer::default();
        let mut ctx = RequestContext::new(vec![Message::user("hi")], "gpt-4").expect("context");

        layer.reroute(&mut ctx);
        layer.reroute(&mut ctx);

        check!(ctx.model() == "gpt-3.5-turbo");
        check!(ctx.metadata().get_str(keys::ORIGINAL_MODEL) == Some("gpt-4"));
    }

    #[test]
    fn reroute_ignores_contexts_without_user_message() {
        let layer = RouterLayer::default();
        let mut ctx = RequestContext::new(vec![Message::system("hi")], "gpt-4").expect("context");

        layer.reroute(&mut ctx);

        check!(ctx.model() == "gpt-4");
        check!(!ctx.metadata().contains_key(keys::ORIGINAL_MODEL));
    }
}
