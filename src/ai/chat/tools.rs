//! Tools the model can call during a turn
//!
//! A [`Tool`] couples a JSON schema (advertised to the model) with an async
//! handler. The [`ToolRegistry`] is built once, keeps registration order and
//! is the single dispatch point for calls coming back from the model.
//!
//! Default tools:
//! - read_file / write_file / list_directory / search_files / create_directory
//!   (see `tools_filesystem`)
//! - web_search (see `tools_web`)

use super::tool_conversion::tool_spec;
use super::tools_filesystem::filesystem_tools;
use super::tools_web::{WebSearchConfig, WebSearchTool};
use crate::ai::types::{ToolCall, ToolSpec};
use crate::rate_limit::RateLimiter;
use crate::security::{SecurityError, SecurityGuard};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Failure of a single tool call
///
/// Rendered into the tool message the model sees; only `Cancelled` ends
/// the turn.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    NotFound(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error("{0}")]
    RateLimited(String),

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Http(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

/// Per-call execution context
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Bail out early when the turn was cancelled
    pub fn check_cancelled(&self) -> Result<(), ToolError> {
        if self.cancel.is_cancelled() {
            Err(ToolError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object
    fn parameters(&self) -> Value;

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError>;
}

/// Decode a tool's typed argument struct
pub fn decode_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// Ordered, immutable set of tools
pub struct ToolRegistry {
    tools: IndexMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Build a registry; two tools sharing a name is an error
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Result<Self, ToolError> {
        let mut map: IndexMap<String, Arc<dyn Tool>> = IndexMap::with_capacity(tools.len());
        for tool in tools {
            let name = tool.name().to_string();
            if map.contains_key(&name) {
                return Err(ToolError::Failed(format!("duplicate tool name: {}", name)));
            }
            map.insert(name, tool);
        }
        Ok(Self { tools: map })
    }

    /// Registry with no tools; requests then omit `tools`
    pub fn empty() -> Self {
        Self {
            tools: IndexMap::new(),
        }
    }

    /// The filesystem tools plus web search
    pub fn with_default_tools(
        guard: Arc<SecurityGuard>,
        limiter: Arc<RateLimiter>,
        web: WebSearchConfig,
    ) -> Result<Self, ToolError> {
        let mut tools = filesystem_tools(guard);
        tools.push(Arc::new(WebSearchTool::new(limiter, web)?));
        Self::new(tools)
    }

    /// Tool entries for the request body, in registration order
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|tool| tool_spec(tool.as_ref())).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run one call requested by the model
    pub async fn dispatch(
        &self,
        call: &ToolCall,
        cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(call.name())
            .ok_or_else(|| ToolError::NotFound(call.name().to_string()))?;

        let args = parse_arguments(call.arguments())?;
        check_required(&tool.parameters(), &args)?;

        debug!(tool = call.name(), id = %call.id, "Executing tool");

        let ctx = ToolContext::new(cancel.clone());
        ctx.check_cancelled()?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ToolError::Cancelled),
            result = tool.execute(Value::Object(args), &ctx) => result,
        }
    }
}

/// Arguments text to a JSON object; empty text means no arguments
fn parse_arguments(raw: &str) -> Result<Map<String, Value>, ToolError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ToolError::InvalidArguments(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(ToolError::InvalidArguments(e.to_string())),
    }
}

fn check_required(schema: &Value, args: &Map<String, Value>) -> Result<(), ToolError> {
    let Some(required) = schema.get("required").and_then(|r| r.as_array()) else {
        return Ok(());
    };

    for field in required.iter().filter_map(|f| f.as_str()) {
        match args.get(field) {
            None | Some(Value::Null) => {
                return Err(ToolError::InvalidArguments(format!(
                    "missing required parameter '{}'",
                    field
                )))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    struct EchoTool;

    #[derive(Deserialize)]
    struct EchoArgs {
        text: String,
        #[serde(default)]
        times: Option<usize>,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo text back"
        }

        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" },
                    "times": { "type": "integer" }
                },
                "required": ["text"]
            })
        }

        async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String, ToolError> {
            let args: EchoArgs = decode_args(args)?;
            Ok(args.text.repeat(args.times.unwrap_or(1)))
        }
    }

    struct NoArgsTool;

    #[async_trait]
    impl Tool for NoArgsTool {
        fn name(&self) -> &str {
            "ping"
        }

        fn description(&self) -> &str {
            "Reply pong"
        }

        fn parameters(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }

        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<String, ToolError> {
            Ok("pong".to_string())
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new(vec![Arc::new(EchoTool), Arc::new(NoArgsTool)]).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_by_name() {
        let call = ToolCall::new("call_1", "echo", r#"{"text": "ab", "times": 2}"#);
        let out = registry().dispatch(&call, &CancellationToken::new()).await.unwrap();
        assert_eq!(out, "abab");
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let call = ToolCall::new("call_1", "nope", "{}");
        let err = registry()
            .dispatch(&call, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn test_empty_arguments_mean_empty_object() {
        let call = ToolCall::new("call_1", "ping", "");
        let out = registry().dispatch(&call, &CancellationToken::new()).await.unwrap();
        assert_eq!(out, "pong");
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let reg = registry();
        let cancel = CancellationToken::new();

        let err = reg
            .dispatch(&ToolCall::new("c", "echo", "{not json"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let err = reg
            .dispatch(&ToolCall::new("c", "echo", "[1, 2]"), &cancel)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("an array"));

        let err = reg
            .dispatch(&ToolCall::new("c", "echo", r#"{"times": 3}"#), &cancel)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid arguments: missing required parameter 'text'"
        );

        // Right field name, wrong type: caught by the typed decode
        let err = reg
            .dispatch(&ToolCall::new("c", "echo", r#"{"text": 5}"#), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_cancelled_dispatch() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = registry()
            .dispatch(&ToolCall::new("c", "ping", "{}"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = ToolRegistry::new(vec![Arc::new(EchoTool), Arc::new(EchoTool)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_specs_keep_registration_order() {
        let reg = registry();
        let specs = reg.specs();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].function.name, "echo");
        assert_eq!(specs[1].function.name, "ping");
        assert_eq!(reg.names(), vec!["echo", "ping"]);
        assert!(ToolRegistry::empty().is_empty());
    }
}
