//! Wire format and upstream client for the Messages API

mod client;
pub mod request;
mod response;

pub use client::{extract_api_key, ProxyClient};
pub use request::{
    ChatRequest, ContentBlock, ImageSource, Message, Role, SystemPrompt, ToolDefinition,
};
pub use response::{ChatResponse, Usage};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
