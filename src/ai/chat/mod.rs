//! Agentic chat
//!
//! A [`ChatSession`] drives the conversation with the model and runs the
//! tools it asks for:
//! - read, write, list, search and create files inside a sandbox root
//! - search the web (rate limited)

pub mod history;
pub mod session;
pub mod tool_conversion;
pub mod tools;
pub mod tools_filesystem;
pub mod tools_web;


pub use session::{AgenticResponse, ChatSession};
pub use tools::{decode_args, Tool, ToolContext, ToolError, ToolRegistry};
pub use tools_web::WebSearchConfig;
