//! Agentic chat against OpenAI-compatible local model servers
//!
//! The model can call tools mid-conversation: sandboxed filesystem access
//! and rate-limited web search. [`ChatSession`] runs the loop; everything
//! else is plumbing it depends on.

pub mod ai;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod security;

pub use ai::chat::{AgenticResponse, ChatSession, Tool, ToolContext, ToolError, ToolRegistry};
pub use ai::client::{ChatCompletion, CompletionClient};
pub use ai::types::{FinishReason, Message, Role, StreamFragment, ToolCall, Usage};
pub use config::SessionConfig;
pub use error::ChatError;
pub use rate_limit::RateLimiter;
pub use security::{SecurityError, SecurityGuard, SecurityPolicy};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// Default: warn for most crates, info for this one.
/// Use RUST_LOG=debug for per-iteration and per-tool logs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,agentic_chat=info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
