//! Anthropic messages API client.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{ChatMessage, CompletionRequest, LlmProvider, Role};
use crate::error::ProviderError;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";

/// Blocking Anthropic messages client.
pub struct AnthropicProvider {
    model: String,
    client: Client,
}

impl AnthropicProvider {
    /// Builds a client with the key and API version headers preset.
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing Anthropic API key");
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key.trim()).context("invalid Anthropic API key")?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build Anthropic HTTP client")?;
        Ok(Self { model, client })
    }
}

impl LlmProvider for AnthropicProvider {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, ProviderError> {
        let messages = alternate_turns(request.messages);
        let body = AnthropicRequest {
            model: &self.model,
            system: request.system,
            max_tokens: request.call.max_tokens(),
            temperature: request.call.temperature(),
            messages: messages
                .iter()
                .map(|message| AnthropicMessage {
                    role: message.role.as_str(),
                    content: vec![AnthropicContentBlock {
                        kind: "text",
                        text: &message.content,
                    }],
                })
                .collect(),
        };
        let resp = self.client.post(MESSAGES_URL).json(&body).send()?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ProviderError::Status { status, body: text });
        }
        let parsed: AnthropicResponse = resp.json()?;
        let answer = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicResponseBlock::Text { text } => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        if answer.is_empty() {
            return Err(ProviderError::Decode(
                "Anthropic response missing text content".into(),
            ));
        }
        Ok(answer)
    }
}

/// The messages API requires a leading user turn and strictly alternating roles.
fn alternate_turns(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut out: Vec<ChatMessage> = Vec::with_capacity(messages.len());
    for message in messages
        .iter()
        .skip_while(|message| message.role == Role::Assistant)
    {
        match out.last_mut() {
            Some(last) if last.role == message.role => {
                last.content.push_str("\n\n");
                last.content.push_str(&message.content);
            }
            _ => out.push(message.clone()),
        }
    }
    out
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    system: &'a str,
    max_tokens: usize,
    temperature: f32,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: Vec<AnthropicContentBlock<'a>>,
}

#[derive(Serialize)]
struct AnthropicContentBlock<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_assistant_turns_dropped_and_runs_merged() {
        let turns = vec![
            ChatMessage::assistant("stale"),
            ChatMessage::user("first"),
            ChatMessage::user("second"),
            ChatMessage::assistant("reply"),
        ];
        let merged = alternate_turns(&turns);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].content, "first\n\nsecond");
        assert_eq!(merged[1].role, Role::Assistant);
    }

    #[test]
    fn non_text_blocks_ignored() {
        let raw = r#"{"content":[{"type":"tool_use","id":"x"},{"type":"text","text":"hi"}]}"#;
        let parsed: AnthropicResponse = serde_json::from_str(raw).expect("json");
        assert_eq!(parsed.content.len(), 2);
        assert!(matches!(parsed.content[1], AnthropicResponseBlock::Text { .. }));
    }
}
