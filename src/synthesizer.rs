//! Grounded answers over retrieved chunks and the "no info" classifier.

use std::sync::Arc;
use std::time::Instant;

use crate::config::{ClassifierConfig, ModelCallConfig};
use crate::error::SynthesisError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::vector_index::ScoredChunk;

const GROUNDING_SYSTEM: &str = "You are a careful assistant answering questions about a document the user uploaded. \
Use only the supplied context passages. Answer directly and naturally; never write phrases such as \
\"the document says\" or \"according to the context\".";

/// Outcome of a grounded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grounded {
    /// The model produced an answer that passed classification.
    Answer(String),
    /// Retrieval was empty or the answer carried no information.
    NoInfo,
}

/// Builds the grounding prompt and calls the model on it.
pub struct Synthesizer {
    llm: Arc<dyn LlmProvider>,
    call: ModelCallConfig,
    classifier: NoInfoClassifier,
}

impl Synthesizer {
    /// Creates a synthesizer calling `llm` with the grounding settings.
    pub fn new(llm: Arc<dyn LlmProvider>, call: ModelCallConfig, classifier: NoInfoClassifier) -> Self {
        Self {
            llm,
            call,
            classifier,
        }
    }

    /// Raw model answer for `query` over `chunks`. Conversation history is not sent.
    pub fn synthesize(&self, query: &str, chunks: &[ScoredChunk]) -> Result<String, SynthesisError> {
        let started = Instant::now();
        let prompt = build_prompt(query, &render_context(chunks), self.classifier.sentinel());
        let messages = [ChatMessage::user(prompt)];
        let answer = self
            .llm
            .complete(&CompletionRequest {
                system: GROUNDING_SYSTEM,
                messages: &messages,
                call: self.call,
            })
            .map_err(SynthesisError::Model)?;
        tracing::debug!(
            chunks = chunks.len(),
            answer_chars = answer.chars().count(),
            latency_ms = started.elapsed().as_secs_f64() * 1000.0,
            "grounded answer"
        );
        Ok(answer)
    }

    /// Synthesizes and classifies in one step. Empty retrieval never reaches the model.
    pub fn answer(&self, query: &str, chunks: &[ScoredChunk]) -> Result<Grounded, SynthesisError> {
        if chunks.is_empty() {
            return Ok(Grounded::NoInfo);
        }
        let answer = self.synthesize(query, chunks)?;
        if self.classifier.classify(&answer) {
            Ok(Grounded::NoInfo)
        } else {
            Ok(Grounded::Answer(answer.trim().to_string()))
        }
    }
}

fn build_prompt(question: &str, context_block: &str, sentinel: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str("Context:\n");
    prompt.push_str(context_block);
    prompt.push_str("\n\nQuestion:\n");
    prompt.push_str(question.trim());
    prompt.push_str("\n\nInstructions:\n1. Answer only from the context above.\n");
    prompt.push_str(&format!(
        "2. If the context does not contain the answer, reply with exactly {sentinel} and nothing else.\n"
    ));
    prompt.push_str("3. Do not mention the context or the document in your answer.\n");
    prompt
}

fn render_context(chunks: &[ScoredChunk]) -> String {
    let mut out = String::new();
    for (idx, hit) in chunks.iter().enumerate() {
        out.push_str(&format!(
            "[passage {} | page {}]\n{}\n\n",
            idx + 1,
            hit.chunk.page,
            hit.chunk.text.trim()
        ));
    }
    out.trim_end().to_string()
}

/// Decides whether a grounded answer should be replaced by a general-knowledge one.
#[derive(Debug, Clone)]
pub struct NoInfoClassifier {
    sentinel: String,
    min_answer_chars: usize,
    negative_phrase_max_chars: usize,
    negative_phrases: Vec<String>,
}

impl NoInfoClassifier {
    /// Lowercases the configured phrases once up front.
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            sentinel: config.sentinel.clone(),
            min_answer_chars: config.min_answer_chars,
            negative_phrase_max_chars: config.negative_phrase_max_chars,
            negative_phrases: config
                .negative_phrases
                .iter()
                .map(|phrase| phrase.to_lowercase())
                .filter(|phrase| !phrase.trim().is_empty())
                .collect(),
        }
    }

    /// Token the grounding prompt asks for.
    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    /// True when `answer` carries no usable information.
    ///
    /// The sentinel match is case-sensitive; phrase matches are not. Lengths are
    /// counted in chars after trimming.
    pub fn classify(&self, answer: &str) -> bool {
        if answer.contains(&self.sentinel) {
            return true;
        }
        let trimmed = answer.trim();
        let len = trimmed.chars().count();
        if len < self.min_answer_chars {
            return true;
        }
        if len >= self.negative_phrase_max_chars {
            return false;
        }
        let lowered = trimmed.to_lowercase();
        self.negative_phrases
            .iter()
            .any(|phrase| lowered.contains(phrase.as_str()))
    }
}

impl Default for NoInfoClassifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}
