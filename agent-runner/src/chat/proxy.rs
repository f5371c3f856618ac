//! Server-side handler for Ask-AI requests
//!
//! The handler owns the API key. Callers send `{ messages, agentContext? }` and get back
//! `{ reply }` or `{ error }` with an HTTP-style status. Upstream details are logged and
//! never returned.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};

use super::openai::{ChatCompletions, CompletionRequest, UpstreamError};
use super::{ChatMessage, ChatRole};
use crate::config::Config;

pub const FALLBACK_REPLY: &str = "Sorry, I did not receive a valid response.";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProxyError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("AI service is not configured. Please set the AI_AGENT_API_KEY environment variable.")]
    NotConfigured,

    #[error("Invalid request: messages array is required")]
    MissingMessages,

    #[error("Invalid request: no valid messages provided")]
    NoValidMessages,

    #[error("Failed to get response from AI service")]
    Upstream(#[source] UpstreamError),

    #[error("An unexpected error occurred. Please try again later.")]
    Unexpected(#[source] UpstreamError),
}

impl ProxyError {
    pub fn status(&self) -> u16 {
        match self {
            ProxyError::MethodNotAllowed => 405,
            ProxyError::MissingMessages | ProxyError::NoValidMessages => 400,
            ProxyError::NotConfigured | ProxyError::Upstream(_) | ProxyError::Unexpected(_) => 500,
        }
    }
}

impl From<UpstreamError> for ProxyError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Status { .. } => ProxyError::Upstream(err),
            UpstreamError::Transport(_) | UpstreamError::Decode(_) => ProxyError::Unexpected(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProxyResponse {
    pub status: u16,
    pub body: Value,
}

impl ProxyResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct ChatProxy {
    client: Arc<dyn ChatCompletions>,
    api_key: Option<String>,
    model: String,
}

impl ChatProxy {
    pub fn new(client: Arc<dyn ChatCompletions>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.into(),
        }
    }

    pub fn from_config(client: Arc<dyn ChatCompletions>, config: &Config) -> Self {
        Self::new(client, config.api_key.clone(), config.model.clone())
    }

    /// Handle one request, mapping every outcome to a status and JSON body
    pub async fn handle(&self, method: &str, body: &[u8]) -> ProxyResponse {
        match self.process(method, body).await {
            Ok(reply) => ProxyResponse {
                status: 200,
                body: json!({ "reply": reply }),
            },
            Err(err) => ProxyResponse {
                status: err.status(),
                body: json!({ "error": err.to_string() }),
            },
        }
    }

    pub async fn process(&self, method: &str, body: &[u8]) -> Result<String, ProxyError> {
        if !method.eq_ignore_ascii_case("POST") {
            return Err(ProxyError::MethodNotAllowed);
        }

        let api_key = match &self.api_key {
            Some(key) => key,
            None => {
                error!("AI_AGENT_API_KEY is not set");
                return Err(ProxyError::NotConfigured);
            }
        };

        let messages = sanitize_messages(body)?;
        let request = CompletionRequest::new(self.model.clone(), messages);

        let response = self.client.complete(api_key, &request).await.map_err(|err| {
            warn!(error = %err, "Chat completion failed");
            ProxyError::from(err)
        })?;

        Ok(response
            .reply()
            .map(str::to_string)
            .unwrap_or_else(|| FALLBACK_REPLY.to_string()))
    }
}

/// Keep messages with non-blank string content, trimmed; a missing role means the user
fn sanitize_messages(body: &[u8]) -> Result<Vec<ChatMessage>, ProxyError> {
    let body: Value = serde_json::from_slice(body).map_err(|_| ProxyError::MissingMessages)?;
    let raw = body
        .get("messages")
        .and_then(Value::as_array)
        .filter(|messages| !messages.is_empty())
        .ok_or(ProxyError::MissingMessages)?;

    let messages: Vec<ChatMessage> = raw
        .iter()
        .filter_map(|msg| {
            let content = msg.get("content")?.as_str()?.trim();
            if content.is_empty() {
                return None;
            }
            let role = ChatRole::from_wire(msg.get("role").and_then(Value::as_str));
            Some(ChatMessage::new(role, content))
        })
        .collect();

    if messages.is_empty() {
        return Err(ProxyError::NoValidMessages);
    }
    Ok(messages)
}
