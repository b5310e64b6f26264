//! Client for OpenAI-compatible chat completion endpoints
//!
//! [`ChatCompletion`] is the seam the session talks to. [`CompletionClient`]
//! implements it over HTTP for LM Studio, Ollama, vLLM and anything else that
//! speaks `/v1/chat/completions`.

use super::http_client;
use super::stream::decode_event_stream;
use super::types::{
    ChatCompletionRequest, ChatCompletionResponse, Completion, ModelList, StreamFragment,
    ToolCall,
};
use crate::error::ChatError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Backend able to answer chat completion requests
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Single request, full response
    async fn complete(
        &self,
        request: &ChatCompletionRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Completion, ChatError>;

    /// Streaming request; text deltas are handed to `on_fragment` as they arrive
    async fn complete_stream(
        &self,
        request: &ChatCompletionRequest<'_>,
        cancel: &CancellationToken,
        on_fragment: &mut (dyn FnMut(StreamFragment) + Send),
    ) -> Result<Completion, ChatError>;

    /// Identifiers of the models the server offers
    async fn list_models(&self) -> Result<Vec<String>, ChatError>;

    /// Base URL requests are sent to
    fn endpoint(&self) -> &str;
}

/// HTTP implementation of [`ChatCompletion`]
pub struct CompletionClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl CompletionClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ChatError> {
        let mut base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(ChatError::Config("base URL is empty".to_string()));
        }
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(Self {
            client: http_client::completion_client(timeout)?,
            base_url,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }

    /// Send a request, racing it against cancellation
    async fn send(
        &self,
        builder: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<Response, ChatError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
            response = self.authorize(builder).send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatCompletion for CompletionClient {
    async fn complete(
        &self,
        request: &ChatCompletionRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Completion, ChatError> {
        if cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }

        let request = ChatCompletionRequest {
            stream: false,
            ..*request
        };

        debug!(
            model = request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending chat completion request"
        );

        let builder = self
            .client
            .post(self.url("chat/completions"))
            .header("Content-Type", "application/json")
            .json(&request);
        let response = self.send(builder, cancel).await?;

        let text = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
            text = response.text() => text?,
        };
        let parsed: ChatCompletionResponse = serde_json::from_str(&text)?;

        let usage = parsed.usage.unwrap_or_default();
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(ChatError::EmptyResponse)?;

        let mut message = choice.message;
        for (idx, call) in message.tool_calls.iter_mut().enumerate() {
            if call.id.is_empty() {
                call.id = ToolCall::fallback_id(idx);
            }
        }

        Ok(Completion {
            message,
            finish_reason: choice.finish_reason,
            usage,
        })
    }

    async fn complete_stream(
        &self,
        request: &ChatCompletionRequest<'_>,
        cancel: &CancellationToken,
        on_fragment: &mut (dyn FnMut(StreamFragment) + Send),
    ) -> Result<Completion, ChatError> {
        if cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }

        let request = ChatCompletionRequest {
            stream: true,
            ..*request
        };

        debug!(
            model = request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending streaming chat completion request"
        );

        let builder = self
            .client
            .post(self.url("chat/completions"))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&request);
        let response = self.send(builder, cancel).await?;

        decode_event_stream(response.bytes_stream(), cancel, on_fragment).await
    }

    async fn list_models(&self) -> Result<Vec<String>, ChatError> {
        let builder = self.client.get(self.url("models"));
        let response = self.send(builder, &CancellationToken::new()).await?;
        let text = response.text().await?;
        let list: ModelList = serde_json::from_str(&text)?;

        Ok(list
            .data
            .into_iter()
            .filter_map(|entry| entry.id.or(entry.name))
            .filter(|id| !id.is_empty())
            .collect())
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }
}
