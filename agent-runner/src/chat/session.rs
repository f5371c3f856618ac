use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use super::prompt::{build_system_prompt, PromptContext, RunContext, UserRef};
use super::proxy::{ChatProxy, FALLBACK_REPLY};
use super::{ChatMessage, ChatRole};

const NOT_CONFIGURED_REPLY: &str = "AI assistant is not configured. Please contact your administrator to set up the AI_AGENT_API_KEY environment variable.";

/// Outcome of one request through the proxy
#[derive(Debug, Clone, PartialEq)]
pub enum ChatResponse {
    Success { content: String },
    Error(String),
}

impl ChatResponse {
    /// Text shown to the operator; failures become an apology, never an error
    pub fn into_reply(self) -> String {
        match self {
            ChatResponse::Success { content } => content,
            ChatResponse::Error(error) if error.contains("API key") || error.contains("API_KEY") => {
                NOT_CONFIGURED_REPLY.to_string()
            }
            ChatResponse::Error(error) => format!(
                "Sorry, I encountered an error: {}. Please try again later.",
                error.trim_end_matches('.')
            ),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AgentContextBody<'a> {
    agent_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_user: Option<&'a UserRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_user: Option<&'a UserRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_summary: Option<&'a RunContext>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestBody<'a> {
    messages: Vec<ChatMessage>,
    agent_context: AgentContextBody<'a>,
}

/// Conversation with the assistant about one agent
pub struct AskAiSession {
    /// Message history, greeting first
    pub messages: Vec<ChatMessage>,
    context: PromptContext,
    proxy: Arc<ChatProxy>,
}

impl AskAiSession {
    pub fn new(proxy: Arc<ChatProxy>, context: PromptContext) -> Self {
        let greeting = format!(
            "Hi! I can explain what {} does and walk you through the proposed changes.\n\nI can't run or approve anything myself; use the run controls for that.",
            context.agent_name
        );
        Self {
            messages: vec![ChatMessage::new(ChatRole::Assistant, greeting)],
            context,
            proxy,
        }
    }

    pub fn context(&self) -> &PromptContext {
        &self.context
    }

    /// Replace the run details the prompt is built from
    pub fn set_context(&mut self, context: PromptContext) {
        self.context = context;
    }

    /// Send a user message and append the assistant's reply to the history
    pub async fn ask(&mut self, text: &str) -> &ChatMessage {
        let text = text.trim();
        if !text.is_empty() {
            self.messages.push(ChatMessage::new(ChatRole::User, text));
        }

        let reply = self.send().await.into_reply();
        self.messages.push(ChatMessage::new(ChatRole::Assistant, reply));
        &self.messages[self.messages.len() - 1]
    }

    async fn send(&self) -> ChatResponse {
        let mut messages = vec![ChatMessage::new(
            ChatRole::System,
            build_system_prompt(&self.context),
        )];
        messages.extend(self.messages.iter().map(|m| {
            let role = match m.role {
                ChatRole::System => ChatRole::User,
                role => role,
            };
            ChatMessage::new(role, m.content.clone())
        }));

        let body = RequestBody {
            messages,
            agent_context: AgentContextBody {
                agent_name: &self.context.agent_name,
                source_user: self.context.source.as_ref(),
                target_user: self.context.target.as_ref(),
                run_summary: self.context.run.as_ref(),
            },
        };
        let bytes = match serde_json::to_vec(&body) {
            Ok(bytes) => bytes,
            Err(e) => return ChatResponse::Error(e.to_string()),
        };

        let response = self.proxy.handle("POST", &bytes).await;
        debug!(status = response.status, "Ask-AI response");

        if response.is_success() {
            let content = response
                .body
                .get("reply")
                .and_then(|r| r.as_str())
                .filter(|r| !r.is_empty())
                .unwrap_or(FALLBACK_REPLY);
            return ChatResponse::Success {
                content: content.to_string(),
            };
        }

        match response.body.get("error").and_then(|e| e.as_str()) {
            Some(error) => ChatResponse::Error(error.to_string()),
            None => ChatResponse::Error(format!(
                "API request failed with status {}",
                response.status
            )),
        }
    }
}
