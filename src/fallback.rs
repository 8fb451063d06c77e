//! General-knowledge answers for questions the document cannot answer.

use std::sync::Arc;
use std::time::Instant;

use crate::config::ModelCallConfig;
use crate::error::{FallbackError, ProviderError};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::session::ConversationTurn;

const FALLBACK_SYSTEM: &str = "You are a warm, knowledgeable assistant. The user's uploaded document \
does not cover their latest question, so answer it from your general knowledge. Explain clearly, \
add helpful context or examples where they make the answer easier to follow, and keep a friendly tone.";

/// Reply used when the fallback model call itself fails.
pub const APOLOGY: &str =
    "I'm sorry, I wasn't able to come up with an answer just now. Please try asking again in a moment.";

/// Answers from general knowledge with a short window of prior conversation.
pub struct FallbackResponder {
    llm: Arc<dyn LlmProvider>,
    call: ModelCallConfig,
    history_window: usize,
}

impl FallbackResponder {
    /// `history_window` bounds how many prior turns reach the prompt.
    pub fn new(llm: Arc<dyn LlmProvider>, call: ModelCallConfig, history_window: usize) -> Self {
        Self {
            llm,
            call,
            history_window,
        }
    }

    /// `prior` holds the conversation before `query`, oldest first.
    pub fn respond(&self, query: &str, prior: &[ConversationTurn]) -> Result<String, FallbackError> {
        let started = Instant::now();
        let messages = self.build_messages(query, prior);
        let answer = self
            .llm
            .complete(&CompletionRequest {
                system: FALLBACK_SYSTEM,
                messages: &messages,
                call: self.call,
            })
            .map_err(FallbackError)?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(FallbackError(ProviderError::Decode(
                "fallback model returned an empty answer".into(),
            )));
        }
        tracing::debug!(
            history = messages.len() - 1,
            latency_ms = started.elapsed().as_secs_f64() * 1000.0,
            "general-knowledge answer"
        );
        Ok(answer.to_string())
    }

    fn build_messages(&self, query: &str, prior: &[ConversationTurn]) -> Vec<ChatMessage> {
        let skip = prior.len().saturating_sub(self.history_window);
        let mut messages: Vec<ChatMessage> = prior[skip..]
            .iter()
            .map(ConversationTurn::to_message)
            .collect();
        messages.push(ChatMessage::user(query.trim()));
        messages
    }
}
