//! Agentic chat session
//!
//! Implements the tool loop:
//! 1. Model answers the conversation so far
//! 2. Requested tool calls are executed, results appended as tool messages
//! 3. Repeat until the model answers without tool calls (or the cap is hit)

use super::history::{set_system_message, trim_history};
use super::tool_conversion::{call_arguments, tool_result_message};
use super::tools::{ToolError, ToolRegistry};
use super::tools_web::WebSearchConfig;
use crate::ai::client::{ChatCompletion, CompletionClient};
use crate::ai::types::{
    ChatCompletionRequest, FinishReason, Message, StreamFragment, ToolSpec, Usage,
};
use crate::config::{clamp_max_tokens, clamp_temperature, SessionConfig};
use crate::error::ChatError;
use crate::rate_limit::RateLimiter;
use crate::security::{SecurityGuard, SecurityPolicy};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const TOOLS_USED_NOTE: &str = "\n\n[Tools were used to generate this response]";

/// Outcome of one turn
#[derive(Debug, Clone, PartialEq)]
pub struct AgenticResponse {
    pub content: String,
    /// True when any tool ran during the turn
    pub used_tools: bool,
    pub finish_reason: FinishReason,
    /// Summed over every model call of the turn
    pub usage: Usage,
}

impl AgenticResponse {
    /// Content for display, noting when tools contributed
    pub fn format_response(&self) -> String {
        if self.used_tools {
            format!("{}{}", self.content, TOOLS_USED_NOTE)
        } else {
            self.content.clone()
        }
    }
}

struct SessionState {
    history: Vec<Message>,
    model: String,
    temperature: f64,
    max_tokens: u32,
    history_limit: usize,
    max_iterations: usize,
}

/// One conversation with a model and its tools
///
/// Turns are serialized: a turn holds the state lock from the user message
/// to the final answer.
pub struct ChatSession {
    backend: Arc<dyn ChatCompletion>,
    tools: Arc<ToolRegistry>,
    specs: Vec<ToolSpec>,
    state: Mutex<SessionState>,
}

impl ChatSession {
    pub fn new(
        backend: Arc<dyn ChatCompletion>,
        tools: Arc<ToolRegistry>,
        config: &SessionConfig,
    ) -> Self {
        let config = config.clone().normalized();

        let mut history = Vec::new();
        if let Some(prompt) = config.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            history.push(Message::system(prompt));
        }

        Self {
            specs: tools.specs(),
            backend,
            tools,
            state: Mutex::new(SessionState {
                history,
                model: config.model,
                temperature: config.temperature,
                max_tokens: config.max_tokens,
                history_limit: config.history_limit,
                max_iterations: config.max_iterations,
            }),
        }
    }

    /// HTTP backend plus the default tool set
    pub fn from_config(config: &SessionConfig) -> Result<Self, ChatError> {
        let backend = CompletionClient::new(
            config.base_url.clone(),
            config.api_key.clone(),
            config.timeout,
        )?;

        let policy = match &config.root {
            Some(root) => SecurityPolicy::new(root.clone()),
            None => SecurityPolicy::for_working_dir().map_err(|e| {
                ChatError::Config(format!("cannot resolve working directory: {}", e))
            })?,
        };

        let web = WebSearchConfig {
            brave_api_key: config.brave_api_key.clone(),
            ..WebSearchConfig::default()
        };
        let tools = ToolRegistry::with_default_tools(
            Arc::new(SecurityGuard::new(policy)),
            Arc::new(RateLimiter::default()),
            web,
        )
        .map_err(|e| ChatError::Config(e.to_string()))?;

        Ok(Self::new(Arc::new(backend), Arc::new(tools), config))
    }

    /// Send a user message and run the tool loop to completion
    pub async fn send_message(
        &self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<AgenticResponse, ChatError> {
        self.run_turn(input, cancel, None).await
    }

    /// Like [`send_message`](Self::send_message), streaming every model call
    ///
    /// Thinking and content fragments reach `on_fragment` as they arrive.
    pub async fn send_message_stream<F>(
        &self,
        input: &str,
        cancel: &CancellationToken,
        mut on_fragment: F,
    ) -> Result<AgenticResponse, ChatError>
    where
        F: FnMut(StreamFragment) + Send,
    {
        self.run_turn(input, cancel, Some(&mut on_fragment)).await
    }

    async fn run_turn(
        &self,
        input: &str,
        cancel: &CancellationToken,
        mut on_fragment: Option<&mut (dyn FnMut(StreamFragment) + Send)>,
    ) -> Result<AgenticResponse, ChatError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        state.history.push(Message::user(input));
        trim_history(&mut state.history, state.history_limit);

        let mut used_tools = false;
        let mut usage = Usage::default();
        let mut last_content = String::new();

        for iteration in 0..state.max_iterations {
            if cancel.is_cancelled() {
                return Err(ChatError::Cancelled);
            }

            debug!(
                iteration = iteration + 1,
                max_iterations = state.max_iterations,
                messages = state.history.len(),
                "Requesting completion"
            );

            let request = ChatCompletionRequest {
                model: &state.model,
                messages: &state.history,
                temperature: state.temperature,
                max_tokens: state.max_tokens,
                stream: on_fragment.is_some(),
                tools: &self.specs,
            };

            let completion = match on_fragment.as_deref_mut() {
                Some(sink) => self.backend.complete_stream(&request, cancel, sink).await?,
                None => self.backend.complete(&request, cancel).await?,
            };

            usage += completion.usage;
            let message = completion.message;
            last_content = message.content.clone();

            if !message.has_tool_calls() {
                state.history.push(message);
                let finish_reason = FinishReason::from_wire(completion.finish_reason.as_deref());
                info!(
                    iterations = iteration + 1,
                    used_tools,
                    total_tokens = usage.total_tokens,
                    "Turn complete"
                );
                return Ok(AgenticResponse {
                    content: last_content,
                    used_tools,
                    finish_reason,
                    usage,
                });
            }

            used_tools = true;
            let calls = message.tool_calls.clone();
            let assistant_index = state.history.len();
            state.history.push(message);

            for call in &calls {
                debug!(
                    tool = call.name(),
                    id = %call.id,
                    args = %call_arguments(call),
                    "Tool call requested"
                );

                let result = self.tools.dispatch(call, cancel).await;
                match &result {
                    Err(ToolError::Cancelled) => {
                        // Drop the unanswered tool calls so the history stays sendable
                        state.history.truncate(assistant_index);
                        return Err(ChatError::Cancelled);
                    }
                    Err(e) => warn!(tool = call.name(), error = %e, "Tool call failed"),
                    Ok(output) => debug!(tool = call.name(), bytes = output.len(), "Tool call succeeded"),
                }

                state.history.push(tool_result_message(call, &result));
            }
        }

        warn!(
            max_iterations = state.max_iterations,
            "Iteration cap reached before a final answer"
        );

        Ok(AgenticResponse {
            content: last_content,
            used_tools,
            finish_reason: FinishReason::MaxIterations,
            usage,
        })
    }

    pub async fn set_temperature(&self, temperature: f64) {
        self.state.lock().await.temperature = clamp_temperature(temperature);
    }

    pub async fn temperature(&self) -> f64 {
        self.state.lock().await.temperature
    }

    pub async fn set_max_tokens(&self, max_tokens: u32) {
        self.state.lock().await.max_tokens = clamp_max_tokens(max_tokens);
    }

    pub async fn max_tokens(&self) -> u32 {
        self.state.lock().await.max_tokens
    }

    pub async fn set_model(&self, model: impl Into<String>) {
        self.state.lock().await.model = model.into();
    }

    pub async fn model(&self) -> String {
        self.state.lock().await.model.clone()
    }

    /// Replace the leading system message or insert one
    pub async fn set_system_message(&self, content: &str) {
        set_system_message(&mut self.state.lock().await.history, content);
    }

    /// Copy of the conversation
    pub async fn history(&self) -> Vec<Message> {
        self.state.lock().await.history.clone()
    }

    /// Replace the conversation, e.g. with one restored from storage
    pub async fn set_history(&self, history: Vec<Message>) {
        let mut state = self.state.lock().await;
        let limit = state.history_limit;
        state.history = history;
        trim_history(&mut state.history, limit);
    }

    pub async fn clear_history(&self) {
        self.state.lock().await.history.clear();
    }

    /// Models offered by the server
    pub async fn list_models(&self) -> Result<Vec<String>, ChatError> {
        self.backend.list_models().await
    }

    /// Pretty JSON describing the model, endpoint and tools
    pub async fn model_info(&self) -> Result<String, ChatError> {
        let model = self.model().await;
        let info = json!({
            "name": model,
            "type": "OpenAI Compatible",
            "base_url": self.backend.endpoint(),
            "tools_count": self.tools.len(),
            "tools": self.tools.names(),
        });
        Ok(serde_json::to_string_pretty(&info)?)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.names()
    }
}
