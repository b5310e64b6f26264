//! Conversion between tools and the OpenAI wire format
//!
//! Tool definition:
//! ```json
//! {
//!     "type": "function",
//!     "function": {
//!         "name": "read_file",
//!         "description": "Read the contents of a file",
//!         "parameters": { "type": "object", "properties": {...} }
//!     }
//! }
//! ```
//!
//! Tool results go back as messages with role "tool":
//! ```json
//! { "role": "tool", "tool_call_id": "call_abc123", "content": "..." }
//! ```

use super::tools::{Tool, ToolError};
use crate::ai::types::{FunctionSpec, Message, ToolCall, ToolSpec};
use serde_json::{json, Value};

/// Advertised form of a tool
pub fn tool_spec(tool: &dyn Tool) -> ToolSpec {
    let mut parameters = tool.parameters();
    if !parameters.is_object() {
        parameters = json!({ "type": "object", "properties": {} });
    }

    ToolSpec {
        kind: "function".to_string(),
        function: FunctionSpec {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters,
        },
    }
}

/// Tool message answering `call`
///
/// Failures are reported to the model as text so it can recover.
pub fn tool_result_message(call: &ToolCall, result: &Result<String, ToolError>) -> Message {
    let content = match result {
        Ok(output) => output.clone(),
        Err(e) => format!("Error executing tool {}: {}", call.name(), e),
    };
    Message::tool(call.id.clone(), content)
}

/// Parsed arguments of a call, `{}` when absent or unparseable
pub fn call_arguments(call: &ToolCall) -> Value {
    serde_json::from_str(call.arguments()).unwrap_or_else(|_| json!({}))
}
