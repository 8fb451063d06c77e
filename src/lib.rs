#![warn(missing_docs)]
//! Document-grounded chat: upload a PDF, ask questions about it, and fall back
//! to general knowledge when the document has no answer.

pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod extractor;
pub mod fallback;
pub mod followup;
pub mod http;
pub mod indexer;
pub mod llm;
pub mod retriever;
pub mod service;
pub mod session;
pub mod synthesizer;
pub mod vector_index;

pub use chunker::{Chunker, TextChunk};
pub use config::{
    ChunkingConfig, ClassifierConfig, ConversationConfig, ModelCallConfig, RetrievalConfig,
    ServiceArgs, ServiceConfig, SessionConfig, TokenScheme, NO_DOCUMENT_INFO,
};
pub use embedder::EmbeddingProvider;
pub use error::{
    ChatError, ConfigError, EmbeddingError, ExtractionError, FallbackError, FollowUpError,
    ProviderError, SynthesisError, UploadError,
};
pub use extractor::{extract_pages, PageText};
pub use llm::{ChatMessage, CompletionRequest, LlmProvider, Role};
pub use service::{ChatReply, ChatService, Health, Provenance, UploadReceipt};
pub use session::{ConversationTurn, SessionStore, SHARED_SESSION_ID};
pub use synthesizer::NoInfoClassifier;
pub use vector_index::{Chunk, InMemoryBackend, IndexBackend, ScoredChunk, VectorIndex};
