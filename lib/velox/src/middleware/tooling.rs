//! Tool advertisement and execution of tool-call responses.
//!
//! Registered tool definitions are published under `available_tools` before
//! the request goes downstream. A response of the form
//! `{"tool": "<name>", "args": {...}}` naming a registered tool is executed
//! locally and its result stored under `tool_result`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};
use velox_core::metadata::keys;
use velox_core::{BoxFuture, Layer, Next, RequestContext, Result};

/// Handler invoked with the tool-call arguments.
pub type ToolHandler = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

struct Tool {
    definition: Value,
    handler: ToolHandler,
}

/// Tool call emitted by a backend.
#[derive(Debug, Deserialize)]
struct ToolCall {
    tool: String,
    #[serde(default)]
    args: Value,
}

impl ToolCall {
    /// Parses a response that looks like a tool call.
    fn parse(response: &str) -> Option<Self> {
        let trimmed = response.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    }
}

/// Layer advertising tools and running the one a response asks for.
///
/// Responses that are not tool calls, or that name an unknown tool, are left
/// untouched. A failing handler fails the request with its own error.
///
/// # Example
///
/// ```ignore
/// use serde_json::json;
/// use velox::middleware::ToolingLayer;
///
/// let layer = ToolingLayer::new().tool(
///     "add",
///     json!({"name": "add", "parameters": {"a": "number", "b": "number"}}),
///     |args| Ok(json!(args["a"].as_f64().unwrap_or_default() + args["b"].as_f64().unwrap_or_default())),
/// );
/// ```
#[derive(Default)]
pub struct ToolingLayer {
    tools: BTreeMap<String, Tool>,
}

impl ToolingLayer {
    /// Create a layer without tools.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` with its JSON `definition` and `handler`.
    ///
    /// Registering a name twice replaces the previous tool.
    #[must_use]
    pub fn tool<F>(mut self, name: impl Into<String>, definition: Value, handler: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.tools.insert(
            name.into(),
            Tool {
                definition,
                handler: Arc::new(handler),
            },
        );
        self
    }

    /// Registered tool names, sorted.
    #[must_use]
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    fn definitions(&self) -> Value {
        Value::Array(
            self.tools
                .values()
                .map(|tool| tool.definition.clone())
                .collect(),
        )
    }

    fn execute(&self, ctx: &mut RequestContext) -> Result<()> {
        let Some(call) = ctx.response().and_then(ToolCall::parse) else {
            return Ok(());
        };
        let Some(tool) = self.tools.get(&call.tool) else {
            debug!(tool = %call.tool, "response names an unknown tool");
            return Ok(());
        };

        let args = if call.args.is_null() {
            Value::Object(Map::new())
        } else {
            call.args
        };
        let result = (tool.handler)(&args)?;
        info!(tool = %call.tool, "executed tool");

        let metadata = ctx.metadata_mut();
        metadata.insert(keys::TOOL_EXECUTED, call.tool);
        metadata.insert(keys::TOOL_RESULT, result);
        Ok(())
    }
}

impl fmt::Debug for ToolingLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolingLayer")
            .field("tools", &self.tool_names())
            .finish()
    }
}

impl Layer for ToolingLayer {
    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if !self.tools.is_empty() {
                ctx.metadata_mut()
                    .insert(keys::AVAILABLE_TOOLS, self.definitions());
            }

            next.run(ctx).await?;
            self.execute(ctx)
        })
    }

    fn name(&self) -> &str {
        "tooling"
    }
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};
    use serde_json::json;
    use velox_core::{Error, Message};

    use super::*;

    fn layer() -> ToolingLayer {
        ToolingLayer::new().tool("echo", json!({"name": "echo"}), |args| Ok(args.clone()))
    }

    fn answered(response: &str) -> RequestContext {
        let mut ctx = RequestContext::new(vec![Message::user("go")], "m").expect("context");
        ctx.set_response(response, None);
        ctx
    }

    #[test]
    fn parse_tool_call() {
        let_assert!(Some(call) = ToolCall::parse(r#"  {"tool": "echo", "args": {"x": 1}}"#));
        check!(call.tool == "echo");
        check!(call.args == json!({"x": 1}));
    }

    #[test]
    fn parse_rejects_plain_text() {
        check!(ToolCall::parse("hello").is_none());
        check!(ToolCall::parse("{not json").is_none());
        check!(ToolCall::parse(r#"{"name": "echo"}"#).is_none());
    }

    #[test]
    fn execute_registered_tool() {
        let mut ctx = answered(r#"{"tool": "echo", "args": {"x": 1}}"#);
        layer().execute(&mut ctx).expect("execute");

        check!(ctx.metadata().get_str(keys::TOOL_EXECUTED) == Some("echo"));
        check!(ctx.metadata().get(keys::TOOL_RESULT) == Some(&json!({"x": 1})));
    }

    #[test]
    fn missing_args_default_to_empty_object() {
        let mut ctx = answered(r#"{"tool": "echo"}"#);
        layer().execute(&mut ctx).expect("execute");

        check!(ctx.metadata().get(keys::TOOL_RESULT) == Some(&json!({})));
    }

    #[test]
    fn unknown_tool_is_ignored() {
        let mut ctx = answered(r#"{"tool": "nope"}"#);
        layer().execute(&mut ctx).expect("execute");

        check!(!ctx.metadata().contains_key(keys::TOOL_EXECUTED));
    }

    #[test]
    fn failing_handler_propagates() {
        let layer = ToolingLayer::new().tool("boom", json!({}), |_| Err(Error::layer("tooling", "boom")));
        let mut ctx = answered(r#"{"tool": "boom"}"#);

        let_assert!(Err(Error::Layer { .. }) = layer.execute(&mut ctx));
    }

    #[test]
    fn tool_names_are_sorted() {
        let layer = layer().tool("add", json!({}), |_| Ok(Value::Null));
        check!(layer.tool_names() == ["add", "echo"]);
    }
}
