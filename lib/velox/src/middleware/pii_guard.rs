//! PII redaction before messages leave the process.

use regex::Regex;
use tracing::debug;
use velox_core::metadata::keys;
use velox_core::{BoxFuture, Error, Layer, Next, RequestContext, Result};

/// Replacement text for redacted matches.
pub const REDACTED: &str = "[REDACTED]";

/// Default patterns: email addresses and phone numbers.
pub const DEFAULT_PII_PATTERNS: &[&str] = &[
    r"[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9.-]+",
    r"\b(?:\+\d{1,3}[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b",
];

/// Layer rewriting every message content, replacing PII matches.
///
/// Patterns apply in order, each to the output of the previous one.
/// The number of replacements is recorded under `pii_redactions`.
///
/// # Example
///
/// ```ignore
/// use velox::middleware::PiiGuardLayer;
///
/// let layer = PiiGuardLayer::with_patterns([r"\b\d{3}-\d{2}-\d{4}\b"])?;
/// ```
#[derive(Debug, Clone)]
pub struct PiiGuardLayer {
    patterns: Vec<Regex>,
    replacement: String,
}

impl PiiGuardLayer {
    /// Create a guard with the [`DEFAULT_PII_PATTERNS`].
    ///
    /// # Panics
    ///
    /// Never: the default patterns are known to compile.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::with_patterns(DEFAULT_PII_PATTERNS.iter().copied())
            .expect("default PII patterns are valid")
    }

    /// Create a guard with custom patterns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] for the first pattern that fails to compile.
    pub fn with_patterns<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                Regex::new(pattern).map_err(|err| Error::invalid_pattern(pattern, err.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            patterns,
            replacement: REDACTED.to_string(),
        })
    }

    /// Set the replacement text.
    #[must_use]
    pub fn with_replacement(mut self, replacement: impl Into<String>) -> Self {
        self.replacement = replacement.into();
        self
    }

    /// Redact `text`, returning the new text and the number of replacements.
    #[must_use]
    pub fn redact(&self, text: &str) -> (String, usize) {
        let mut redacted = text.to_string();
        let mut count = 0;

        for pattern in &self.patterns {
            let matches = pattern.find_iter(&redacted).count();
            if matches > 0 {
                count += matches;
                redacted = pattern
                    .replace_all(&redacted, regex::NoExpand(&self.replacement))
                    .into_owned();
            }
        }

        (redacted, count)
    }
}

impl Default for PiiGuardLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for PiiGuardLayer {
    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<()>> {
        let mut redactions = 0;
        for message in ctx.messages_mut() {
            let (content, count) = self.redact(message.content());
            if count > 0 {
                message.set_content(content);
                redactions += count;
            }
        }

        if redactions > 0 {
            debug!(redactions, "redacted PII from messages");
        }
        ctx.metadata_mut().insert(keys::PII_REDACTIONS, redactions);

        next.run(ctx)
    }

    fn name(&self) -> &str {
        "pii_guard"
    }
}
