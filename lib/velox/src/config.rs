//! Engine configuration and per-request options.

use std::time::Duration;

use serde_json::Value;
use velox_core::{CancellationToken, DEFAULT_MODEL, DEFAULT_TEMPERATURE, Metadata};

/// Configuration for the [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Model used when a request does not name one.
    pub default_model: String,
    /// Sampling temperature used when a request does not set one.
    pub temperature: f32,
    /// Maximum output tokens used when a request does not set one.
    pub max_tokens: Option<u32>,
    /// Upper bound for a whole pipeline traversal, if any.
    pub request_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
            request_timeout: None,
        }
    }
}

impl EngineConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    default_model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    request_timeout: Option<Duration>,
}

impl EngineConfigBuilder {
    /// Set the default model.
    #[must_use]
    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Set the default sampling temperature.
    #[must_use]
    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the default maximum output tokens.
    #[must_use]
    pub const fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            default_model: self.default_model.unwrap_or(defaults.default_model),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
            request_timeout: self.request_timeout.or(defaults.request_timeout),
        }
    }
}

impl From<EngineConfig> for EngineConfigBuilder {
    fn from(config: EngineConfig) -> Self {
        Self {
            default_model: Some(config.default_model),
            temperature: Some(config.temperature),
            max_tokens: config.max_tokens,
            request_timeout: config.request_timeout,
        }
    }
}

/// Per-request overrides for [`Engine::run`](crate::Engine::run).
///
/// Anything left unset falls back to the [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub(crate) model: Option<String>,
    pub(crate) temperature: Option<f32>,
    pub(crate) max_tokens: Option<u32>,
    pub(crate) session_id: Option<String>,
    pub(crate) metadata: Metadata,
    pub(crate) cancellation: Option<CancellationToken>,
}

impl RunOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Target model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sampling temperature.
    #[must_use]
    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Maximum output tokens.
    #[must_use]
    pub const fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Session identifier; requests sharing one share a budget.
    #[must_use]
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Adds a metadata entry visible to every layer.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key, value);
        self
    }

    /// Uses a caller-owned cancellation token instead of the engine's.
    ///
    /// The request runs under a child of `token`: cancelling `token` cancels
    /// the request, while an engine timeout leaves `token` untouched. A caller
    /// token is not cancelled by [`Engine::shutdown`](crate::Engine::shutdown).
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;

    use super::*;

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        check!(config.default_model == DEFAULT_MODEL);
        check!(config.temperature == DEFAULT_TEMPERATURE);
        check!(config.max_tokens.is_none());
        check!(config.request_timeout.is_none());
    }

    #[test]
    fn builder_overrides() {
        let config = EngineConfig::builder()
            .default_model("gpt-4o")
            .temperature(0.2)
            .max_tokens(256)
            .request_timeout(Duration::from_secs(5))
            .build();

        check!(config.default_model == "gpt-4o");
        check!(config.temperature == 0.2);
        check!(config.max_tokens == Some(256));
        check!(config.request_timeout == Some(Duration::from_secs(5)));
    }

    #[test]
    fn builder_from_config_keeps_values() {
        let config = EngineConfig::builder().default_model("m").max_tokens(8).build();
        let rebuilt = EngineConfigBuilder::from(config).temperature(0.1).build();

        check!(rebuilt.default_model == "m");
        check!(rebuilt.max_tokens == Some(8));
        check!(rebuilt.temperature == 0.1);
    }

    #[test]
    fn run_options_collect_metadata() {
        let options = RunOptions::new()
            .model("m")
            .session_id("s")
            .metadata("tenant", "acme");

        check!(options.model.as_deref() == Some("m"));
        check!(options.session_id.as_deref() == Some("s"));
        check!(options.metadata.get_str("tenant") == Some("acme"));
    }
}
