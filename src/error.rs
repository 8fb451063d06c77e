//! Error taxonomy shared by the pipeline stages.
//!
//! Only [`UploadError`] and [`ChatError`] cross the service boundary. The
//! chat-time errors ([`SynthesisError`], [`FallbackError`], [`FollowUpError`])
//! are recovered inside the service and only ever logged.

use reqwest::StatusCode;
use thiserror::Error;

/// Failures talking to an embedding or language-model provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The request exceeded the configured client timeout.
    #[error("provider request timed out")]
    Timeout,
    /// Connection, TLS or request-building failure.
    #[error("provider transport error: {0}")]
    Transport(String),
    /// The provider answered with a non-success status.
    #[error("provider returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: StatusCode,
        /// Response body, or a placeholder when unreadable.
        body: String,
    },
    /// The response body did not match the expected schema.
    #[error("failed to decode provider response: {0}")]
    Decode(String),
    /// The request was refused before sending (batch too large, empty key, ...).
    #[error("provider rejected input: {0}")]
    Rejected(String),
    /// The provider answered, but with the wrong number or shape of results.
    #[error("provider response mismatch: {0}")]
    Mismatch(String),
}

impl ProviderError {
    /// Whether re-submitting the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            Self::Decode(_) | Self::Rejected(_) | Self::Mismatch(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// The PDF could not be turned into page text.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Reading the file from disk failed.
    #[error("failed to read PDF: {0}")]
    Io(#[from] std::io::Error),
    /// The bytes are not a parseable PDF.
    #[error("failed to parse PDF: {0}")]
    Parse(String),
    /// The document parsed but contains no pages.
    #[error("PDF contains no pages")]
    NoPages,
    /// A page's content stream could not be decoded to text.
    #[error("failed to extract text from page {page}: {reason}")]
    Page {
        /// 1-based page number.
        page: u32,
        /// Underlying decoder message.
        reason: String,
    },
}

/// Embedding or index construction failed; the upload is rejected as a whole.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The embedding provider failed.
    #[error("embedding provider failed: {0}")]
    Provider(#[from] ProviderError),
    /// The provider returned vectors the index cannot accept.
    #[error("invalid embedding: {0}")]
    InvalidVector(String),
    /// An embedding worker stopped before returning its batch.
    #[error("embedding worker failed: {0}")]
    Worker(String),
}

impl EmbeddingError {
    /// Whether re-submitting the upload may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(err) => err.is_retryable(),
            Self::InvalidVector(_) => false,
            Self::Worker(_) => true,
        }
    }
}

/// The grounded-answer path failed; the turn is routed to fallback.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Embedding the query failed.
    #[error("query embedding failed: {0}")]
    Retrieval(#[from] EmbeddingError),
    /// The language model call failed.
    #[error("grounded answer call failed: {0}")]
    Model(#[source] ProviderError),
}

/// The general-knowledge call failed; the turn gets a fixed apology.
#[derive(Debug, Error)]
#[error("fallback answer call failed: {0}")]
pub struct FallbackError(#[source] pub ProviderError);

/// Follow-up generation failed; generic suggestions are used instead.
#[derive(Debug, Error)]
pub enum FollowUpError {
    /// The language model call failed.
    #[error("follow-up call failed: {0}")]
    Model(#[source] ProviderError),
    /// The model answered but no usable question survived cleanup.
    #[error("follow-up response contained no questions")]
    Empty,
}

/// User-visible upload failures.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The PDF was unreadable.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    /// Embedding failed; nothing was published.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    /// The PDF parsed but produced no text to index.
    #[error("PDF contains no extractable text")]
    EmptyDocument,
}

/// User-visible chat failures. Model failures never appear here.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    /// The message was missing or blank.
    #[error("message must not be empty")]
    EmptyMessage,
}

/// Invalid configuration detected at startup.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A numeric or textual setting is outside its allowed range.
    #[error("invalid `{field}`: {reason}")]
    Invalid {
        /// Setting name as exposed on the command line.
        field: &'static str,
        /// Human-readable constraint.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
