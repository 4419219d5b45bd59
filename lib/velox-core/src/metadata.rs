//! Open key/value metadata shared between layers and the caller.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known metadata keys written by the reference layers.
pub mod keys {
    /// `bool`: whether the response was served from the cache.
    pub const CACHE_HIT: &str = "cache_hit";
    /// `string`: the model requested before a router rewrote it.
    pub const ORIGINAL_MODEL: &str = "original_model";
    /// `string`: name of the layer that rerouted the model.
    pub const ROUTED_BY: &str = "routed_by";
    /// `array<string>`: human-readable log entries (retry attempts, ...).
    pub const LOGS: &str = "_logs";
    /// `bool`: the request cost reached the per-request ceiling.
    pub const OVER_BUDGET: &str = "over_budget";
    /// `array`: tool definitions offered to the backend.
    pub const AVAILABLE_TOOLS: &str = "available_tools";
    /// `string`: name of the tool executed from the response.
    pub const TOOL_EXECUTED: &str = "tool_executed";
    /// `any`: value returned by the executed tool.
    pub const TOOL_RESULT: &str = "tool_result";
    /// `integer`: number of PII matches redacted from the messages.
    pub const PII_REDACTIONS: &str = "pii_redactions";
}

/// String-keyed map of heterogeneous JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    /// Creates empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Boolean value for `key`, if present and a boolean.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// String value for `key`, if present and a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Returns `true` if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Appends an entry to the [`keys::LOGS`] array.
    ///
    /// A non-array value already stored under the key is kept as the first entry.
    pub fn push_log(&mut self, entry: impl Into<String>) {
        let slot = self
            .0
            .entry(keys::LOGS)
            .or_insert_with(|| Value::Array(Vec::new()));
        if !slot.is_array() {
            let previous = slot.take();
            *slot = Value::Array(vec![previous]);
        }
        if let Value::Array(entries) = slot {
            entries.push(Value::String(entry.into()));
        }
    }

    /// Entries of the [`keys::LOGS`] array.
    #[must_use]
    pub fn logs(&self) -> Vec<&str> {
        self.0
            .get(keys::LOGS)
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

impl From<Map<String, Value>> for Metadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}
