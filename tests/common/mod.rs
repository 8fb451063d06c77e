#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use docchat::embedder::hashing::HashingEmbedder;
use docchat::embedder::EmbeddingProvider;
use docchat::llm::{CompletionRequest, LlmProvider};
use docchat::{ChatService, ProviderError, ServiceConfig, NO_DOCUMENT_INFO};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

pub const FALLBACK_ANSWER: &str = "Speaking generally, that depends on a few factors worth explaining.";

/// Which prompt a call belonged to, recognised from the prompt text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Grounding,
    Fallback,
    FollowUp,
}

/// Chat model fake: grounded calls answer when a rule's fact is in the context,
/// follow-up calls return two numbered questions, everything else is fallback.
pub struct ScriptedLlm {
    rules: Vec<(String, String, String)>,
    pub fail_grounding: AtomicBool,
    pub fail_fallback: AtomicBool,
    pub fail_followup: AtomicBool,
    pub grounding_prompts: Mutex<Vec<String>>,
    calls: Mutex<Vec<CallKind>>,
    total: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fail_grounding: AtomicBool::new(false),
            fail_fallback: AtomicBool::new(false),
            fail_followup: AtomicBool::new(false),
            grounding_prompts: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            total: AtomicUsize::new(0),
        }
    }

    /// When the question mentions `keyword` and the context contains `fact`, answer with `answer`.
    pub fn rule(mut self, keyword: &str, fact: &str, answer: &str) -> Self {
        self.rules
            .push((keyword.to_lowercase(), fact.to_string(), answer.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<CallKind> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn count(&self, kind: CallKind) -> usize {
        self.calls().into_iter().filter(|call| *call == kind).count()
    }

    fn classify(prompt: &str) -> CallKind {
        if prompt.starts_with("Context:") {
            CallKind::Grounding
        } else if prompt.contains("follow-up questions") {
            CallKind::FollowUp
        } else {
            CallKind::Fallback
        }
    }

    fn unavailable() -> ProviderError {
        ProviderError::Status {
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            body: "scripted outage".into(),
        }
    }
}

impl LlmProvider for ScriptedLlm {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, ProviderError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        let prompt = request
            .messages
            .last()
            .map(|message| message.content.clone())
            .unwrap_or_default();
        let kind = Self::classify(&prompt);
        self.calls.lock().expect("lock").push(kind);
        match kind {
            CallKind::Grounding => {
                self.grounding_prompts
                    .lock()
                    .expect("lock")
                    .push(prompt.clone());
                if self.fail_grounding.load(Ordering::SeqCst) {
                    return Err(ProviderError::Timeout);
                }
                let (context, question) = prompt
                    .split_once("\n\nQuestion:\n")
                    .unwrap_or((prompt.as_str(), ""));
                let question = question.to_lowercase();
                let answer = self
                    .rules
                    .iter()
                    .find(|(keyword, fact, _)| question.contains(keyword) && context.contains(fact))
                    .map(|(_, _, answer)| answer.clone())
                    .unwrap_or_else(|| NO_DOCUMENT_INFO.to_string());
                Ok(answer)
            }
            CallKind::Fallback => {
                if self.fail_fallback.load(Ordering::SeqCst) {
                    return Err(Self::unavailable());
                }
                Ok(FALLBACK_ANSWER.to_string())
            }
            CallKind::FollowUp => {
                if self.fail_followup.load(Ordering::SeqCst) {
                    return Err(Self::unavailable());
                }
                Ok("1. Is it safe to take daily?\n2. What about children?".to_string())
            }
        }
    }
}

pub fn aspirin_llm() -> Arc<ScriptedLlm> {
    Arc::new(
        ScriptedLlm::new()
            .rule("aspirin", "325mg", "The recommended aspirin dosage is 325mg.")
            .rule("capital", "Sylvania", "The capital of Freedonia is Sylvania."),
    )
}

/// Hashing embedder that returns provider errors while `failing` is set.
pub struct SwitchableEmbedder {
    inner: HashingEmbedder,
    pub failing: AtomicBool,
}

impl SwitchableEmbedder {
    pub fn new() -> Self {
        Self {
            inner: HashingEmbedder::new(512, 8).expect("embedder"),
            failing: AtomicBool::new(false),
        }
    }
}

impl EmbeddingProvider for SwitchableEmbedder {
    fn batch_size(&self) -> usize {
        self.inner.batch_size()
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ScriptedLlm::unavailable());
        }
        self.inner.embed_batch(inputs)
    }
}

pub fn service_with(llm: Arc<ScriptedLlm>) -> ChatService {
    let embedder = Arc::new(HashingEmbedder::new(512, 8).expect("embedder"));
    ChatService::new(&ServiceConfig::default(), embedder, llm)
}

pub fn service_with_embedder(llm: Arc<ScriptedLlm>, embedder: Arc<SwitchableEmbedder>) -> ChatService {
    ChatService::new(&ServiceConfig::default(), embedder, llm)
}

/// Builds a PDF with one line of text per page.
pub fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let encoded = content.encode().expect("encode content");
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).expect("save pdf");
    out
}

pub fn aspirin_pdf() -> Vec<u8> {
    pdf_with_pages(&[
        "Aspirin dosage: 325mg",
        "The quarterly garden club meeting covers tulip bulbs and compost.",
    ])
}

pub fn freedonia_pdf() -> Vec<u8> {
    pdf_with_pages(&[
        "The capital of Freedonia is Sylvania",
        "Freedonia exports cheese and violins.",
    ])
}
