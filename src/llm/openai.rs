//! OpenAI chat completions client.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{CompletionRequest, LlmProvider};
use crate::error::ProviderError;

/// OpenAI-compatible chat completions client.
pub struct OpenAiProvider {
    client: Client,
    endpoint: String,
    model: String,
}

impl OpenAiProvider {
    /// `base_url` is the API root, e.g. `https://api.openai.com/v1`.
    pub fn new(api_key: String, base_url: String, model: String, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing OpenAI API key");
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build OpenAI HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model,
        })
    }
}

impl LlmProvider for OpenAiProvider {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, ProviderError> {
        let body = build_body(&self.model, request);
        let resp = self.client.post(&self.endpoint).json(&body).send()?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ProviderError::Status { status, body });
        }
        let parsed: ChatResponse = resp.json()?;
        Ok(parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

fn build_body<'a>(model: &'a str, request: &'a CompletionRequest<'_>) -> ChatRequest<'a> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    messages.push(WireMessage {
        role: "system",
        content: request.system,
    });
    messages.extend(request.messages.iter().map(|message| WireMessage {
        role: message.role.as_str(),
        content: &message.content,
    }));
    ChatRequest {
        model,
        temperature: request.call.temperature(),
        max_tokens: request.call.max_tokens(),
        messages,
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelCallConfig;
    use crate::llm::ChatMessage;

    #[test]
    fn system_message_goes_first() {
        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let request = CompletionRequest {
            system: "be nice",
            messages: &history,
            call: ModelCallConfig::new(0.3, 64).expect("call"),
        };
        let body = serde_json::to_value(build_body("gpt-4o-mini", &request)).expect("json");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][2]["role"], "assistant");
        assert_eq!(body["max_tokens"], 64);
    }

    #[test]
    fn null_content_parses_as_empty() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).expect("json");
        assert!(parsed.choices[0].message.content.is_none());
    }
}
