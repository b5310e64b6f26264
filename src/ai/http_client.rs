//! Shared HTTP client construction
//!
//! One client per session so TLS sessions and pooled connections are reused
//! across every model call of a turn.

use crate::error::ChatError;
use reqwest::Client;
use std::time::Duration;

/// User-Agent sent on every request
pub const USER_AGENT: &str = concat!("agentic-chat/", env!("CARGO_PKG_VERSION"));

/// Client for chat completion calls
///
/// `timeout` bounds the whole request, including a streamed body, so it
/// should comfortably exceed the longest expected generation.
pub fn completion_client(timeout: Duration) -> Result<Client, ChatError> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(8)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .tcp_nodelay(true)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {}", e)))
}

/// Client for short tool requests (web search)
pub fn tool_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .user_agent(USER_AGENT)
        .build()
}
