//! Chat-model providers behind a single blocking interface.

use serde::{Deserialize, Serialize};

use crate::config::ModelCallConfig;
use crate::error::ProviderError;

pub mod anthropic;
pub mod openai;

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user.
    User,
    /// The assistant.
    Assistant,
}

impl Role {
    /// Wire name shared by the OpenAI and Anthropic APIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message of a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Speaker.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Builds a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Builds an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Request envelope shared by the providers.
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    /// System instruction.
    pub system: &'a str,
    /// Conversation, oldest first; the last message is the one to answer.
    pub messages: &'a [ChatMessage],
    /// Sampling settings.
    pub call: ModelCallConfig,
}

/// Trait implemented by concrete chat-model providers.
pub trait LlmProvider: Send + Sync {
    /// Returns the model's text reply.
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, ProviderError>;
}
