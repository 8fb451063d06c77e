//! Session-scoped chunk storage with cosine similarity search.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::EmbeddingError;

/// Namespace of the optional shared default document.
pub const DEFAULT_NAMESPACE: Uuid = Uuid::nil();

/// Retrieval unit. Immutable once built; shared with results through `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Unique identifier, fresh per upload.
    pub id: Uuid,
    /// Position in the upload's flat chunk sequence.
    pub index: usize,
    /// 1-based page the chunk was cut from.
    pub page: u32,
    /// Session (index namespace) that owns the chunk.
    pub session_id: Uuid,
    /// Chunk text.
    pub text: String,
}

/// A chunk paired with its similarity to a query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// Matched chunk.
    pub chunk: Arc<Chunk>,
    /// Cosine similarity in `-1.0..=1.0`.
    pub score: f32,
}

/// Read-only similarity index owned by one session.
pub trait VectorIndex: Send + Sync {
    /// Session id the index is scoped to.
    fn namespace(&self) -> Uuid;

    /// Number of stored chunks.
    fn len(&self) -> usize;

    /// Whether the index holds no chunks.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up to `k` chunks by decreasing similarity; ties keep chunk order.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, EmbeddingError>;
}

/// Builds complete indices; a returned index is final and safe to publish.
pub trait IndexBackend: Send + Sync {
    /// Builds an index over `entries` for `namespace`. Fails without side effects.
    fn build(
        &self,
        namespace: Uuid,
        entries: Vec<(Chunk, Vec<f32>)>,
    ) -> Result<Arc<dyn VectorIndex>, EmbeddingError>;
}

/// Brute-force cosine index kept in memory.
#[derive(Debug)]
pub struct InMemoryIndex {
    namespace: Uuid,
    dimensions: usize,
    chunks: Vec<Arc<Chunk>>,
    vectors: Vec<Vec<f32>>,
}

impl InMemoryIndex {
    /// Validates and normalizes `entries`; every vector must share one dimension.
    pub fn build(
        namespace: Uuid,
        entries: Vec<(Chunk, Vec<f32>)>,
    ) -> Result<Self, EmbeddingError> {
        let dimensions = entries.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut chunks = Vec::with_capacity(entries.len());
        let mut vectors = Vec::with_capacity(entries.len());
        for (chunk, vector) in entries {
            if chunk.session_id != namespace {
                return Err(EmbeddingError::InvalidVector(format!(
                    "chunk {} belongs to session {}, not {}",
                    chunk.id, chunk.session_id, namespace
                )));
            }
            if vector.is_empty() || vector.len() != dimensions {
                return Err(EmbeddingError::InvalidVector(format!(
                    "chunk {} has {} dimensions, expected {}",
                    chunk.index,
                    vector.len(),
                    dimensions
                )));
            }
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(EmbeddingError::InvalidVector(format!(
                    "chunk {} has non-finite components",
                    chunk.index
                )));
            }
            chunks.push(Arc::new(chunk));
            vectors.push(normalize(vector));
        }
        Ok(Self {
            namespace,
            dimensions,
            chunks,
            vectors,
        })
    }
}

impl VectorIndex for InMemoryIndex {
    fn namespace(&self) -> Uuid {
        self.namespace
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, EmbeddingError> {
        if self.chunks.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimensions {
            return Err(EmbeddingError::InvalidVector(format!(
                "query has {} dimensions, index expects {}",
                query.len(),
                self.dimensions
            )));
        }
        let query = normalize(query.to_vec());
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(idx, vector)| (idx, dot(&query, vector)))
            .collect();
        scored.sort_by(|a, b| match b.1.total_cmp(&a.1) {
            Ordering::Equal => self.chunks[a.0].index.cmp(&self.chunks[b.0].index),
            other => other,
        });
        scored.truncate(k);
        Ok(scored
            .into_iter()
            .map(|(idx, score)| ScoredChunk {
                chunk: Arc::clone(&self.chunks[idx]),
                score,
            })
            .collect())
    }
}

/// [`IndexBackend`] producing [`InMemoryIndex`] instances.
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryBackend;

impl IndexBackend for InMemoryBackend {
    fn build(
        &self,
        namespace: Uuid,
        entries: Vec<(Chunk, Vec<f32>)>,
    ) -> Result<Arc<dyn VectorIndex>, EmbeddingError> {
        Ok(Arc::new(InMemoryIndex::build(namespace, entries)?))
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}
