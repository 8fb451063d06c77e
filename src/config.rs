//! Tunable knobs for the chat pipeline plus the command-line surface shared by the binaries.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, ValueEnum};

use crate::embedder::hashing::HashingEmbedder;
use crate::embedder::openai::OpenAiEmbedder;
use crate::embedder::qdrant::QdrantEmbedder;
use crate::embedder::EmbeddingProvider;
use crate::error::ConfigError;
use crate::llm::anthropic::AnthropicProvider;
use crate::llm::openai::OpenAiProvider;
use crate::llm::LlmProvider;

/// Token counting scheme used when windowing page text.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum TokenScheme {
    /// Runs of non-whitespace characters.
    #[default]
    Whitespace,
    /// Word runs plus individual punctuation marks.
    WordPunct,
}

/// How page text is windowed into chunks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Tokens per chunk.
    pub chunk_size: usize,
    /// Tokens shared by consecutive chunks of the same page.
    pub chunk_overlap: usize,
    /// Tokenizer used to count tokens.
    pub token_scheme: TokenScheme,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
            token_scheme: TokenScheme::Whitespace,
        }
    }
}

/// Upload-time embedding parallelism.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexingConfig {
    /// Worker threads embedding batches concurrently.
    pub embed_workers: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self { embed_workers: 2 }
    }
}

/// Retrieval knobs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetrievalConfig {
    /// Chunks returned per query.
    pub top_k: usize,
    /// Query embeddings kept in the LRU cache (0 disables caching).
    pub query_cache_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            query_cache_size: 256,
        }
    }
}

/// Sampling settings for one kind of model call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelCallConfig {
    temperature: f32,
    max_tokens: usize,
}

impl ModelCallConfig {
    /// Builds a validated call config. Temperature must lie in `0.0..=2.0`.
    pub fn new(temperature: f32, max_tokens: usize) -> Result<Self, ConfigError> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::invalid(
                "temperature",
                format!("{temperature} is outside 0.0..=2.0"),
            ));
        }
        if max_tokens == 0 {
            return Err(ConfigError::invalid("max-tokens", "must be positive"));
        }
        Ok(Self {
            temperature,
            max_tokens,
        })
    }

    /// Sampling temperature.
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Upper bound on generated tokens.
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }
}

/// Thresholds and phrases that decide whether a grounded answer carried no information.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassifierConfig {
    /// Token the grounding prompt asks the model to emit when the chunks lack an answer.
    pub sentinel: String,
    /// Answers shorter than this (in chars, trimmed) always count as "no info".
    pub min_answer_chars: usize,
    /// Negative phrases only count when the answer is shorter than this.
    pub negative_phrase_max_chars: usize,
    /// Case-insensitive phrases signalling the model found nothing.
    pub negative_phrases: Vec<String>,
}

/// Sentinel emitted by the grounding prompt when the chunks cannot answer.
pub const NO_DOCUMENT_INFO: &str = "NO_DOCUMENT_INFO";

const DEFAULT_NEGATIVE_PHRASES: &[&str] = &[
    "i don't know",
    "i do not know",
    "not mentioned",
    "no information",
    "does not contain",
    "doesn't contain",
    "does not mention",
    "not provided",
    "unable to find",
    "cannot find",
    "can't find",
    "no relevant",
    "not specified",
];

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            sentinel: NO_DOCUMENT_INFO.to_string(),
            min_answer_chars: 20,
            negative_phrase_max_chars: 200,
            negative_phrases: DEFAULT_NEGATIVE_PHRASES
                .iter()
                .map(|phrase| phrase.to_string())
                .collect(),
        }
    }
}

/// Conversation-shaping limits for fallback and follow-up prompts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationConfig {
    /// Prior turns supplied to the fallback prompt.
    pub history_window: usize,
    /// Answer prefix (in chars) supplied to the follow-up prompt.
    pub followup_answer_chars: usize,
    /// Follow-up questions requested per turn.
    pub followup_count: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            history_window: 4,
            followup_answer_chars: 500,
            followup_count: 3,
        }
    }
}

/// Session retention policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Sessions kept before the least recently used one is evicted.
    pub max_sessions: usize,
    /// Idle time after which a session is dropped (`None` keeps sessions until evicted by capacity).
    pub session_ttl: Option<Duration>,
    /// Turns kept per session; the oldest are dropped beyond this.
    pub max_history_turns: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 1024,
            session_ttl: Some(Duration::from_secs(60 * 60 * 24)),
            max_history_turns: 200,
        }
    }
}

/// Everything the chat service needs apart from its providers.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceConfig {
    /// Chunk windowing.
    pub chunking: ChunkingConfig,
    /// Embedding parallelism.
    pub indexing: IndexingConfig,
    /// Retrieval.
    pub retrieval: RetrievalConfig,
    /// Grounded-answer call.
    pub grounding: ModelCallConfig,
    /// General-knowledge call.
    pub fallback: ModelCallConfig,
    /// Follow-up question call.
    pub followup: ModelCallConfig,
    /// "No info" detection.
    pub classifier: ClassifierConfig,
    /// Prompt shaping.
    pub conversation: ConversationConfig,
    /// Session retention.
    pub sessions: SessionConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            indexing: IndexingConfig::default(),
            retrieval: RetrievalConfig::default(),
            grounding: ModelCallConfig {
                temperature: 0.2,
                max_tokens: 400,
            },
            fallback: ModelCallConfig {
                temperature: 0.7,
                max_tokens: 500,
            },
            followup: ModelCallConfig {
                temperature: 0.7,
                max_tokens: 150,
            },
            classifier: ClassifierConfig::default(),
            conversation: ConversationConfig::default(),
            sessions: SessionConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Checks cross-field constraints that the individual types cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunking.chunk_size == 0 {
            return Err(ConfigError::invalid("chunk-size", "must be positive"));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(ConfigError::invalid(
                "chunk-overlap",
                format!(
                    "{} must be smaller than chunk-size {}",
                    self.chunking.chunk_overlap, self.chunking.chunk_size
                ),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::invalid("top-k", "must be positive"));
        }
        if self.indexing.embed_workers == 0 {
            return Err(ConfigError::invalid("embed-workers", "must be positive"));
        }
        if self.classifier.sentinel.trim().is_empty() {
            return Err(ConfigError::invalid("sentinel", "must not be blank"));
        }
        if self.classifier.negative_phrase_max_chars < self.classifier.min_answer_chars {
            return Err(ConfigError::invalid(
                "negative-phrase-max-chars",
                "must be at least min-answer-chars",
            ));
        }
        if self.sessions.max_sessions == 0 {
            return Err(ConfigError::invalid("max-sessions", "must be positive"));
        }
        if self.sessions.max_history_turns == 0 {
            return Err(ConfigError::invalid("max-history-turns", "must be positive"));
        }
        Ok(())
    }
}

/// Embedding backends selectable from the command line.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum EmbeddingProviderKind {
    /// OpenAI-compatible `/embeddings` endpoint.
    Openai,
    /// Qdrant Cloud inference endpoint.
    Qdrant,
    /// Local feature-hashing embedder (no network).
    Hashing,
}

/// Chat model backends selectable from the command line.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LlmProviderKind {
    /// OpenAI chat completions.
    Openai,
    /// Anthropic messages.
    Anthropic,
}

/// Command-line options shared by every binary that builds a chat service.
#[derive(Args, Debug, Clone)]
pub struct ServiceArgs {
    /// Tokens per chunk
    #[arg(long, env = "DOCCHAT_CHUNK_SIZE", default_value_t = 1000)]
    pub chunk_size: usize,

    /// Tokens shared by consecutive chunks of a page
    #[arg(long, env = "DOCCHAT_CHUNK_OVERLAP", default_value_t = 100)]
    pub chunk_overlap: usize,

    /// Token counting scheme for chunking
    #[arg(long, env = "DOCCHAT_TOKEN_SCHEME", value_enum, default_value = "whitespace")]
    pub token_scheme: TokenScheme,

    /// Worker threads embedding uploads
    #[arg(long, env = "DOCCHAT_EMBED_WORKERS", default_value_t = 2)]
    pub embed_workers: usize,

    /// Chunks retrieved per question
    #[arg(long, env = "DOCCHAT_TOP_K", default_value_t = 3)]
    pub top_k: usize,

    /// Cached query embeddings (0 disables caching)
    #[arg(long, default_value_t = 256)]
    pub query_cache_size: usize,

    /// Temperature for grounded answers
    #[arg(long, default_value_t = 0.2)]
    pub grounding_temperature: f32,

    /// Max tokens for grounded answers
    #[arg(long, default_value_t = 400)]
    pub grounding_max_tokens: usize,

    /// Temperature for general-knowledge answers
    #[arg(long, default_value_t = 0.7)]
    pub fallback_temperature: f32,

    /// Max tokens for general-knowledge answers
    #[arg(long, default_value_t = 500)]
    pub fallback_max_tokens: usize,

    /// Temperature for follow-up suggestions
    #[arg(long, default_value_t = 0.7)]
    pub followup_temperature: f32,

    /// Max tokens for follow-up suggestions
    #[arg(long, default_value_t = 150)]
    pub followup_max_tokens: usize,

    /// Answers shorter than this many chars trigger fallback
    #[arg(long, default_value_t = 20)]
    pub min_answer_chars: usize,

    /// Negative phrases trigger fallback only below this many chars
    #[arg(long, default_value_t = 200)]
    pub negative_phrase_max_chars: usize,

    /// Negative phrases, comma separated (defaults to the built-in list)
    #[arg(long, env = "DOCCHAT_NEGATIVE_PHRASES")]
    pub negative_phrases: Option<String>,

    /// Prior turns included in fallback prompts
    #[arg(long, default_value_t = 4)]
    pub history_window: usize,

    /// Answer chars included in follow-up prompts
    #[arg(long, default_value_t = 500)]
    pub followup_answer_chars: usize,

    /// Follow-up questions requested per turn
    #[arg(long, default_value_t = 3)]
    pub followup_count: usize,

    /// Sessions kept in memory before LRU eviction
    #[arg(long, env = "DOCCHAT_MAX_SESSIONS", default_value_t = 1024)]
    pub max_sessions: usize,

    /// Idle seconds before a session expires (0 disables expiry)
    #[arg(long, env = "DOCCHAT_SESSION_TTL_SECS", default_value_t = 86_400)]
    pub session_ttl_secs: u64,

    /// Turns kept per session
    #[arg(long, default_value_t = 200)]
    pub max_history_turns: usize,

    /// Embedding backend
    #[arg(long, env = "DOCCHAT_EMBEDDING_PROVIDER", value_enum, default_value = "openai")]
    pub embedding_provider: EmbeddingProviderKind,

    /// Chat model backend
    #[arg(long, env = "DOCCHAT_LLM_PROVIDER", value_enum, default_value = "openai")]
    pub llm_provider: LlmProviderKind,

    /// OpenAI API key (embeddings and/or chat)
    #[arg(long, env = "OPENAI_API_KEY")]
    pub openai_api_key: Option<String>,

    /// Base URL for OpenAI-compatible endpoints
    #[arg(long, env = "DOCCHAT_OPENAI_BASE", default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,

    /// OpenAI embedding model
    #[arg(
        long,
        env = "DOCCHAT_OPENAI_EMBEDDING_MODEL",
        default_value = "text-embedding-3-small"
    )]
    pub openai_embedding_model: String,

    /// Optional embedding dimension override
    #[arg(long, env = "DOCCHAT_OPENAI_DIMENSIONS")]
    pub openai_dimensions: Option<usize>,

    /// OpenAI chat model
    #[arg(long, env = "DOCCHAT_OPENAI_CHAT_MODEL", default_value = "gpt-4o-mini")]
    pub openai_chat_model: String,

    /// Anthropic API key
    #[arg(long, env = "ANTHROPIC_API_KEY")]
    pub anthropic_api_key: Option<String>,

    /// Anthropic model identifier
    #[arg(
        long,
        env = "DOCCHAT_ANTHROPIC_MODEL",
        default_value = "claude-3-5-haiku-latest"
    )]
    pub anthropic_model: String,

    /// Qdrant API key
    #[arg(long, env = "QDRANT_API_KEY")]
    pub qdrant_api_key: Option<String>,

    /// Qdrant inference endpoint
    #[arg(long, env = "DOCCHAT_QDRANT_ENDPOINT")]
    pub qdrant_endpoint: Option<String>,

    /// Qdrant embedding model
    #[arg(
        long,
        env = "DOCCHAT_QDRANT_MODEL",
        default_value = "sentence-transformers/all-minilm-l6-v2"
    )]
    pub qdrant_model: String,

    /// Dimensions of the local hashing embedder
    #[arg(long, default_value_t = 512)]
    pub hashing_dimensions: usize,

    /// Max inputs per embedding request
    #[arg(long, env = "DOCCHAT_EMBED_BATCH", default_value_t = 32)]
    pub embed_batch_size: usize,

    /// Seconds before provider requests time out
    #[arg(long, env = "DOCCHAT_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Attempts for transient embedding errors
    #[arg(long, default_value_t = 5)]
    pub max_retries: usize,
}

impl ServiceArgs {
    /// Converts the parsed flags into a validated [`ServiceConfig`].
    pub fn build_config(&self) -> Result<ServiceConfig, ConfigError> {
        let negative_phrases = match &self.negative_phrases {
            Some(raw) => split_list(raw),
            None => ClassifierConfig::default().negative_phrases,
        };
        let config = ServiceConfig {
            chunking: ChunkingConfig {
                chunk_size: self.chunk_size,
                chunk_overlap: self.chunk_overlap,
                token_scheme: self.token_scheme,
            },
            indexing: IndexingConfig {
                embed_workers: self.embed_workers,
            },
            retrieval: RetrievalConfig {
                top_k: self.top_k,
                query_cache_size: self.query_cache_size,
            },
            grounding: ModelCallConfig::new(self.grounding_temperature, self.grounding_max_tokens)?,
            fallback: ModelCallConfig::new(self.fallback_temperature, self.fallback_max_tokens)?,
            followup: ModelCallConfig::new(self.followup_temperature, self.followup_max_tokens)?,
            classifier: ClassifierConfig {
                sentinel: NO_DOCUMENT_INFO.to_string(),
                min_answer_chars: self.min_answer_chars,
                negative_phrase_max_chars: self.negative_phrase_max_chars,
                negative_phrases,
            },
            conversation: ConversationConfig {
                history_window: self.history_window,
                followup_answer_chars: self.followup_answer_chars,
                followup_count: self.followup_count,
            },
            sessions: SessionConfig {
                max_sessions: self.max_sessions,
                session_ttl: (self.session_ttl_secs > 0)
                    .then(|| Duration::from_secs(self.session_ttl_secs)),
                max_history_turns: self.max_history_turns,
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Instantiates the selected embedding backend.
    pub fn build_embedder(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        let batch_size = self.embed_batch_size.max(1);
        let max_retries = self.max_retries.max(1);
        let embedder: Arc<dyn EmbeddingProvider> = match self.embedding_provider {
            EmbeddingProviderKind::Openai => {
                let key = self
                    .openai_api_key
                    .clone()
                    .ok_or_else(|| anyhow!("OPENAI_API_KEY must be set for OpenAI embeddings"))?;
                Arc::new(OpenAiEmbedder::new(
                    key,
                    self.openai_base_url.clone(),
                    self.openai_embedding_model.clone(),
                    self.openai_dimensions,
                    self.timeout(),
                    max_retries,
                    batch_size,
                )?)
            }
            EmbeddingProviderKind::Qdrant => {
                let key = self
                    .qdrant_api_key
                    .clone()
                    .ok_or_else(|| anyhow!("QDRANT_API_KEY must be set for Qdrant embeddings"))?;
                let endpoint = self.qdrant_endpoint.clone().ok_or_else(|| {
                    anyhow!("DOCCHAT_QDRANT_ENDPOINT must be set for Qdrant embeddings")
                })?;
                Arc::new(QdrantEmbedder::new(
                    key,
                    endpoint,
                    self.qdrant_model.clone(),
                    self.timeout(),
                    max_retries,
                    batch_size,
                )?)
            }
            EmbeddingProviderKind::Hashing => Arc::new(
                HashingEmbedder::new(self.hashing_dimensions, batch_size)
                    .context("invalid hashing embedder settings")?,
            ),
        };
        Ok(embedder)
    }

    /// Instantiates the selected chat model backend.
    pub fn build_llm(&self) -> Result<Arc<dyn LlmProvider>> {
        let llm: Arc<dyn LlmProvider> = match self.llm_provider {
            LlmProviderKind::Openai => {
                let key = self
                    .openai_api_key
                    .clone()
                    .ok_or_else(|| anyhow!("OPENAI_API_KEY must be set for the OpenAI provider"))?;
                Arc::new(OpenAiProvider::new(
                    key,
                    self.openai_base_url.clone(),
                    self.openai_chat_model.clone(),
                    self.timeout(),
                )?)
            }
            LlmProviderKind::Anthropic => {
                let key = self.anthropic_api_key.clone().ok_or_else(|| {
                    anyhow!("ANTHROPIC_API_KEY must be set for the Anthropic provider")
                })?;
                Arc::new(AnthropicProvider::new(
                    key,
                    self.anthropic_model.clone(),
                    self.timeout(),
                )?)
            }
        };
        Ok(llm)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
