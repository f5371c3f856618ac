//! Ask-AI assistant: explains a run to the operator, never drives it
//!
//! [`session::AskAiSession`] keeps the conversation and builds the system prompt from the
//! current run. Requests go through [`proxy::ChatProxy`], which holds the API key and talks
//! to an OpenAI-compatible completions endpoint via [`openai::ChatCompletions`].

pub mod openai;
pub mod prompt;
pub mod proxy;
pub mod session;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    /// Parse a wire role; anything unrecognised is treated as the user
    pub fn from_wire(role: Option<&str>) -> Self {
        match role {
            Some("system") => ChatRole::System,
            Some("assistant") => ChatRole::Assistant,
            _ => ChatRole::User,
        }
    }
}

/// A message as sent to the completions API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

pub use openai::{ChatCompletions, CompletionRequest, CompletionResponse, OpenAiClient, UpstreamError};
pub use prompt::{build_system_prompt, PromptContext, RunContext, UserRef};
pub use proxy::{ChatProxy, ProxyError, ProxyResponse};
pub use session::{AskAiSession, ChatResponse};
