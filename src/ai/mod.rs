pub mod chat;
pub mod client;
pub mod http_client;
pub mod stream;
pub mod types;

pub use chat::*;
pub use client::*;
pub use types::*;
