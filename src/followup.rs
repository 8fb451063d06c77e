//! Suggested continuation questions appended to answers.

use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::config::ModelCallConfig;
use crate::error::FollowUpError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

/// Prefix on every suggested question.
pub const MARKER: &str = "💡 ";

/// Header line introducing the suggestions in a rendered reply.
pub const HEADER: &str = "You might also ask:";

const FOLLOWUP_SYSTEM: &str =
    "You suggest short follow-up questions a curious reader might ask next. Reply with questions only.";

const GENERIC_SUGGESTIONS: &[&str] = &[
    "Can you explain that in more detail?",
    "Could you give me an example?",
    "What else should I know about this topic?",
];

/// Generates follow-up questions, or a fixed generic list when that fails.
pub struct FollowUpGenerator {
    llm: Arc<dyn LlmProvider>,
    call: ModelCallConfig,
    answer_chars: usize,
    count: usize,
}

impl FollowUpGenerator {
    /// `answer_chars` bounds how much of the answer reaches the prompt; `count` caps the questions.
    pub fn new(llm: Arc<dyn LlmProvider>, call: ModelCallConfig, answer_chars: usize, count: usize) -> Self {
        Self {
            llm,
            call,
            answer_chars,
            count,
        }
    }

    /// Marker-prefixed lines for `answer`, or `None` when the answer already ends with a question.
    pub fn suggestions(&self, query: &str, answer: &str) -> Option<Vec<String>> {
        if self.count == 0 || answer.trim_end().ends_with('?') {
            return None;
        }
        match self.generate(query, answer) {
            Ok(lines) => Some(lines),
            Err(err) => {
                tracing::warn!(error = %err, "follow-up generation failed; using generic suggestions");
                Some(self.generic())
            }
        }
    }

    /// Asks the model for questions and cleans its output.
    pub fn generate(&self, query: &str, answer: &str) -> Result<Vec<String>, FollowUpError> {
        let prompt = build_prompt(query, &truncate_chars(answer, self.answer_chars), self.count);
        let messages = [ChatMessage::user(prompt)];
        let raw = self
            .llm
            .complete(&CompletionRequest {
                system: FOLLOWUP_SYSTEM,
                messages: &messages,
                call: self.call,
            })
            .map_err(FollowUpError::Model)?;
        let lines: Vec<String> = raw
            .lines()
            .filter_map(clean_line)
            .take(self.count)
            .map(|line| format!("{MARKER}{line}"))
            .collect();
        if lines.is_empty() {
            return Err(FollowUpError::Empty);
        }
        Ok(lines)
    }

    fn generic(&self) -> Vec<String> {
        GENERIC_SUGGESTIONS
            .iter()
            .take(self.count)
            .map(|line| format!("{MARKER}{line}"))
            .collect()
    }
}

/// Block appended to a reply; empty when there are no lines.
pub fn render(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    format!("\n\n{HEADER}\n{}", lines.join("\n"))
}

fn build_prompt(question: &str, answer: &str, count: usize) -> String {
    let mut prompt = String::new();
    prompt.push_str("Question:\n");
    prompt.push_str(question.trim());
    prompt.push_str("\n\nAnswer:\n");
    prompt.push_str(answer.trim());
    prompt.push_str(&format!(
        "\n\nSuggest up to {count} short follow-up questions, one per line, without numbering."
    ));
    prompt
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

fn list_prefix() -> &'static Regex {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    PREFIX.get_or_init(|| {
        Regex::new(r"^(?:[-*•·]+\s*|\d+[.):](?:\s+|$)|\(\d+\)\s*|💡\s*)").expect("static list prefix pattern")
    })
}

fn clean_line(line: &str) -> Option<String> {
    let mut current = line.trim();
    // Models occasionally stack a bullet on top of numbering.
    while let Some(found) = list_prefix().find(current) {
        if found.end() == 0 {
            break;
        }
        current = current[found.end()..].trim_start();
    }
    let current = current.trim_matches('"').trim();
    if current.is_empty() {
        None
    } else {
        Some(current.to_string())
    }
}
