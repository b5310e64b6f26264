//! Turn-level errors
//!
//! Anything in here aborts the current turn and reaches the caller. Tool
//! failures never end up here; they are fed back to the model as tool
//! messages (see `ai::chat::tools::ToolError`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("no response choices returned")]
    EmptyResponse,

    #[error("error reading streaming response: {0}")]
    Stream(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ChatError {
    /// True for failures caused by the remote endpoint or the connection to it
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ChatError::Http(_)
                | ChatError::Api { .. }
                | ChatError::Decode(_)
                | ChatError::EmptyResponse
                | ChatError::Stream(_)
        )
    }
}
