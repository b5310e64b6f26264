//! Wire types for the OpenAI-compatible chat completions API
//!
//! These mirror the JSON exchanged with the server. [`Message`] doubles as
//! the conversation record kept by the session, so it is also what an
//! external store persists.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::ops::AddAssign;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Message in conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Assistant message requesting tool calls
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::with_role(Role::Assistant, content)
        }
    }

    /// Tool result answering the call with id `tool_call_id`
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(Role::Tool, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Function call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Some servers omit it; see [`ToolCall::fallback_id`]
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: function_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Id given to the call at `index` when the server sent none
    pub fn fallback_id(index: usize) -> String {
        format!("call_{}", index)
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn arguments(&self) -> &str {
        &self.function.arguments
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON text; some servers send an object, which is re-encoded
    #[serde(default, deserialize_with = "arguments_as_text")]
    pub arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

/// Tool advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Request body for `POST {base}/chat/completions`
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub temperature: f64,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    #[serde(skip_serializing_if = "<[ToolSpec]>::is_empty")]
    pub tools: &'a [ToolSpec],
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: Message,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Token usage reported by the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Why the model stopped producing output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    /// Synthetic: the session hit its iteration cap
    MaxIterations,
    Other(String),
}

impl FinishReason {
    pub fn from_wire(reason: Option<&str>) -> Self {
        match reason {
            Some("stop") | None => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("tool_calls") | Some("function_call") => FinishReason::ToolCalls,
            Some("content_filter") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::MaxIterations => "max_iterations",
            FinishReason::Other(other) => other,
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one model call, streaming or not
#[derive(Debug, Clone)]
pub struct Completion {
    pub message: Message,
    pub finish_reason: Option<String>,
    pub usage: Usage,
}

/// Incremental output of a streaming call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFragment {
    /// Intermediate reasoning, never part of the answer
    Thinking(String),
    /// Answer text
    Content(String),
}

impl StreamFragment {
    pub fn text(&self) -> &str {
        match self {
            StreamFragment::Thinking(text) | StreamFragment::Content(text) => text,
        }
    }

    pub fn is_thinking(&self) -> bool {
        matches!(self, StreamFragment::Thinking(_))
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ModelList {
    #[serde(default)]
    pub data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ModelEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn arguments_as_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(text) => text,
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assistant_message_with_null_content() {
        let msg: Message = serde_json::from_value(json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": { "name": "list_directory", "arguments": "{\"path\": \".\"}" }
            }]
        }))
        .unwrap();

        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content, "");
        assert_eq!(msg.tool_calls.len(), 1);
        assert_eq!(msg.tool_calls[0].name(), "list_directory");
        assert_eq!(msg.tool_calls[0].arguments(), "{\"path\": \".\"}");
    }

    #[test]
    fn test_object_arguments_are_reencoded() {
        let call: ToolCall = serde_json::from_value(json!({
            "id": "call_2",
            "function": { "name": "read_file", "arguments": { "path": "a.txt" } }
        }))
        .unwrap();

        assert_eq!(call.kind, "function");
        let parsed: Value = serde_json::from_str(call.arguments()).unwrap();
        assert_eq!(parsed["path"], "a.txt");
    }

    #[test]
    fn test_tool_message_serialization() {
        let value = serde_json::to_value(Message::tool("call_1", "done")).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "call_1");
        assert_eq!(value["content"], "done");
        assert!(value.get("tool_calls").is_none());
    }

    #[test]
    fn test_request_omits_stream_and_empty_tools() {
        let messages = vec![Message::user("Hello")];
        let request = ChatCompletionRequest {
            model: "test-model",
            messages: &messages,
            temperature: 0.7,
            max_tokens: 100,
            stream: false,
            tools: &[],
        };

        let value = serde_json::to_value(request).unwrap();
        assert_eq!(value["model"], "test-model");
        assert_eq!(value["messages"][0]["content"], "Hello");
        assert_eq!(value["max_tokens"], 100);
        assert!(value.get("stream").is_none());
        assert!(value.get("tools").is_none());

        let value = serde_json::to_value(ChatCompletionRequest {
            stream: true,
            ..request
        })
        .unwrap();
        assert_eq!(value["stream"], true);
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(FinishReason::from_wire(Some("stop")), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire(None), FinishReason::Stop);
        assert_eq!(
            FinishReason::from_wire(Some("tool_calls")),
            FinishReason::ToolCalls
        );
        assert_eq!(FinishReason::MaxIterations.to_string(), "max_iterations");
        assert_eq!(FinishReason::from_wire(Some("eos")).as_str(), "eos");
    }

    #[test]
    fn test_usage_accumulates() {
        let mut total = Usage::default();
        total += Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        };
        total += Usage {
            prompt_tokens: 20,
            completion_tokens: 1,
            total_tokens: 21,
        };
        assert_eq!(total.total_tokens, 36);
        assert_eq!(total.prompt_tokens, 30);
    }
}
