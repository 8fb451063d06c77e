//! The chat service: uploads build session indices, chat turns route between
//! grounded answers, general knowledge and a fixed apology.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use crate::chunker::Chunker;
use crate::config::ServiceConfig;
use crate::embedder::EmbeddingProvider;
use crate::error::{ChatError, EmbeddingError, SynthesisError, UploadError};
use crate::extractor::extract_pages;
use crate::fallback::{FallbackResponder, APOLOGY};
use crate::followup::{self, FollowUpGenerator};
use crate::indexer::Indexer;
use crate::llm::{LlmProvider, Role};
use crate::retriever::Retriever;
use crate::session::{lock, ConversationTurn, SessionStore};
use crate::synthesizer::{Grounded, NoInfoClassifier, Synthesizer};
use crate::vector_index::{InMemoryBackend, IndexBackend, ScoredChunk, VectorIndex, DEFAULT_NAMESPACE};

/// Prefix on answers grounded in the session's document.
pub const DOCUMENT_MARKER: &str = "📄 ";

/// Prefix on answers produced from general knowledge.
pub const GENERAL_MARKER: &str = "🌐 (General knowledge, not from your document) ";

/// Where a reply came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Grounded in retrieved chunks.
    Document,
    /// General-knowledge fallback.
    GeneralKnowledge,
    /// Every model call failed; fixed apology.
    Apology,
}

impl Provenance {
    /// Stable label for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Document => "document",
            Provenance::GeneralKnowledge => "general_knowledge",
            Provenance::Apology => "apology",
        }
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
    /// Display name derived from the file name.
    pub suggested_name: String,
    /// Session that now owns the index.
    pub session_id: Uuid,
    /// Pages in the PDF.
    pub pages: usize,
    /// Chunks indexed.
    pub chunks: usize,
}

/// Result of a chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatReply {
    /// Rendered reply, marker and follow-ups included.
    pub reply: String,
    /// Session the turn was recorded in.
    pub session_id: Uuid,
    /// Which path produced the answer.
    pub provenance: Provenance,
    /// Retained history after the turn.
    pub history: Vec<ConversationTurn>,
}

/// Liveness snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
    /// Always `"ok"` while the process serves requests.
    pub status: &'static str,
    /// Sessions currently held.
    pub sessions: usize,
    /// Whether a default document is loaded.
    pub default_index: bool,
}

/// Owns every pipeline stage plus the session store.
pub struct ChatService {
    chunker: Chunker,
    indexer: Indexer,
    retriever: Retriever,
    synthesizer: Synthesizer,
    fallback: FallbackResponder,
    followups: FollowUpGenerator,
    sessions: SessionStore,
    history_window: usize,
}

impl ChatService {
    /// Builds a service backed by in-memory indices.
    pub fn new(
        config: &ServiceConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
    ) -> Self {
        Self::with_backend(config, embedder, Arc::new(InMemoryBackend), llm)
    }

    /// Builds a service with a custom index backend.
    pub fn with_backend(
        config: &ServiceConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        backend: Arc<dyn IndexBackend>,
        llm: Arc<dyn LlmProvider>,
    ) -> Self {
        let conversation = &config.conversation;
        Self {
            chunker: Chunker::new(&config.chunking),
            indexer: Indexer::new(Arc::clone(&embedder), backend, config.indexing.embed_workers),
            retriever: Retriever::new(
                embedder,
                config.retrieval.top_k,
                config.retrieval.query_cache_size,
            ),
            synthesizer: Synthesizer::new(
                Arc::clone(&llm),
                config.grounding,
                NoInfoClassifier::new(&config.classifier),
            ),
            fallback: FallbackResponder::new(
                Arc::clone(&llm),
                config.fallback,
                conversation.history_window,
            ),
            followups: FollowUpGenerator::new(
                llm,
                config.followup,
                conversation.followup_answer_chars,
                conversation.followup_count,
            ),
            sessions: SessionStore::new(&config.sessions),
            history_window: conversation.history_window,
        }
    }

    /// Session store backing this service.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Indexes `bytes` and publishes the index to `session_id`, replacing any earlier upload.
    ///
    /// Nothing is published unless every chunk embedded successfully.
    pub fn upload_document(
        &self,
        bytes: &[u8],
        file_name: Option<&str>,
        session_id: Uuid,
    ) -> Result<UploadReceipt, UploadError> {
        let started = Instant::now();
        let (index, pages) = self.index_document(session_id, bytes)?;
        let chunks = index.len();
        self.sessions
            .attach_index(session_id, index, file_name.map(str::to_string));
        tracing::info!(
            %session_id,
            pages,
            chunks,
            latency_ms = started.elapsed().as_secs_f64() * 1000.0,
            "document uploaded"
        );
        Ok(UploadReceipt {
            suggested_name: suggested_name(file_name),
            session_id,
            pages,
            chunks,
        })
    }

    /// Indexes `bytes` as the document shared by sessions that never upload.
    pub fn load_default_document(
        &self,
        bytes: &[u8],
        file_name: Option<&str>,
    ) -> Result<UploadReceipt, UploadError> {
        let (index, pages) = self.index_document(DEFAULT_NAMESPACE, bytes)?;
        let chunks = index.len();
        self.sessions.set_default_index(index);
        tracing::info!(pages, chunks, "default document loaded");
        Ok(UploadReceipt {
            suggested_name: suggested_name(file_name),
            session_id: DEFAULT_NAMESPACE,
            pages,
            chunks,
        })
    }

    fn index_document(
        &self,
        namespace: Uuid,
        bytes: &[u8],
    ) -> Result<(Arc<dyn VectorIndex>, usize), UploadError> {
        let pages = extract_pages(bytes)?;
        let chunks = self.chunker.chunk_pages(&pages);
        if chunks.is_empty() {
            return Err(UploadError::EmptyDocument);
        }
        let index = self.indexer.build_index(namespace, chunks)?;
        Ok((index, pages.len()))
    }

    /// Answers one message in `session_id`, creating the session when needed.
    ///
    /// Model failures never surface here: they route to fallback or the apology.
    pub fn chat(&self, session_id: Uuid, message: &str) -> Result<ChatReply, ChatError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let started = Instant::now();
        let handle = self.sessions.get_or_create(session_id);
        let mut session = lock(&handle);

        let prior = session.recent(self.history_window);
        session.push_turn(Role::User, message);
        let index = session.index().or_else(|| self.sessions.default_index());

        let (provenance, answer) = self.route(index.as_deref(), message, &prior);
        let reply = self.render(provenance, message, &answer);
        session.push_turn(Role::Assistant, reply.clone());
        let history = session.history().iter().cloned().collect();
        drop(session);

        tracing::info!(
            %session_id,
            provenance = provenance.as_str(),
            latency_ms = started.elapsed().as_secs_f64() * 1000.0,
            "chat turn"
        );
        Ok(ChatReply {
            reply,
            session_id,
            provenance,
            history,
        })
    }

    /// Chunks the session would retrieve for `query`, without calling a model.
    pub fn retrieve_context(
        &self,
        session_id: Uuid,
        query: &str,
    ) -> Result<Vec<ScoredChunk>, EmbeddingError> {
        match self.sessions.index_for(session_id) {
            Some(index) => self.retriever.retrieve(index.as_ref(), query),
            None => Ok(Vec::new()),
        }
    }

    /// Liveness snapshot.
    pub fn health(&self) -> Health {
        Health {
            status: "ok",
            sessions: self.sessions.len(),
            default_index: self.sessions.default_index().is_some(),
        }
    }

    fn route(
        &self,
        index: Option<&dyn VectorIndex>,
        message: &str,
        prior: &[ConversationTurn],
    ) -> (Provenance, String) {
        let grounded = match index {
            Some(index) => self.ground(index, message).unwrap_or_else(|err| {
                tracing::warn!(error = %err, "grounded answer failed; using general knowledge");
                Grounded::NoInfo
            }),
            None => Grounded::NoInfo,
        };
        if let Grounded::Answer(answer) = grounded {
            return (Provenance::Document, answer);
        }
        match self.fallback.respond(message, prior) {
            Ok(answer) => (Provenance::GeneralKnowledge, answer),
            Err(err) => {
                tracing::warn!(error = %err, "fallback answer failed; replying with apology");
                (Provenance::Apology, APOLOGY.to_string())
            }
        }
    }

    fn ground(&self, index: &dyn VectorIndex, message: &str) -> Result<Grounded, SynthesisError> {
        let chunks = self.retriever.retrieve(index, message)?;
        self.synthesizer.answer(message, &chunks)
    }

    fn render(&self, provenance: Provenance, message: &str, answer: &str) -> String {
        let marker = match provenance {
            Provenance::Document => DOCUMENT_MARKER,
            Provenance::GeneralKnowledge => GENERAL_MARKER,
            Provenance::Apology => return answer.to_string(),
        };
        let suggestions = self
            .followups
            .suggestions(message, answer)
            .map(|lines| followup::render(&lines))
            .unwrap_or_default();
        format!("{marker}{answer}{suggestions}")
    }
}

/// File stem plus `Bot`, or `DocumentBot` without a usable name.
pub fn suggested_name(file_name: Option<&str>) -> String {
    let stem = file_name
        .and_then(|name| Path::new(name.trim()).file_stem())
        .and_then(|stem| stem.to_str())
        .map(str::trim)
        .filter(|stem| !stem.is_empty());
    match stem {
        Some(stem) => format!("{stem}Bot"),
        None => "DocumentBot".to_string(),
    }
}
