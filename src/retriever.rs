//! Query embedding plus top-k lookup against a session index.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::embedder::EmbeddingProvider;
use crate::error::EmbeddingError;
use crate::vector_index::{ScoredChunk, VectorIndex};

/// Embeds queries (with an optional LRU cache) and searches indices without mutating them.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    top_k: usize,
    cache: Option<Mutex<LruCache<String, Arc<Vec<f32>>>>>,
}

impl Retriever {
    /// `cache_size` of zero disables query caching.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, top_k: usize, cache_size: usize) -> Self {
        Self {
            embedder,
            top_k: top_k.max(1),
            cache: NonZeroUsize::new(cache_size).map(|capacity| Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Top chunks for `query` using the configured `k`.
    pub fn retrieve(
        &self,
        index: &dyn VectorIndex,
        query: &str,
    ) -> Result<Vec<ScoredChunk>, EmbeddingError> {
        self.retrieve_k(index, query, self.top_k)
    }

    /// Top `k` chunks for `query`, most similar first.
    pub fn retrieve_k(
        &self,
        index: &dyn VectorIndex,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, EmbeddingError> {
        if index.is_empty() {
            return Ok(Vec::new());
        }
        let embedding = self.embed_query(query)?;
        index.search(&embedding, k)
    }

    fn embed_query(&self, query: &str) -> Result<Arc<Vec<f32>>, EmbeddingError> {
        let key = query.trim().to_string();
        if let Some(cache) = &self.cache {
            if let Some(hit) = lock_cache(cache).get(&key).cloned() {
                return Ok(hit);
            }
        }
        let embedding = Arc::new(self.embedder.embed_one(&key)?);
        if let Some(cache) = &self.cache {
            lock_cache(cache).put(key, Arc::clone(&embedding));
        }
        Ok(embedding)
    }
}

fn lock_cache<T>(cache: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // A poisoned cache only means a panic mid-insert; the cached vectors are still valid.
    cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::hashing::HashingEmbedder;
    use crate::error::ProviderError;
    use crate::vector_index::{Chunk, InMemoryIndex};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingEmbedder {
        inner: HashingEmbedder,
        calls: AtomicUsize,
    }

    impl EmbeddingProvider for CountingEmbedder {
        fn batch_size(&self) -> usize {
            8
        }

        fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed_batch(inputs)
        }
    }

    fn index_of(embedder: &dyn EmbeddingProvider, texts: &[&str]) -> InMemoryIndex {
        let session = Uuid::new_v4();
        let entries = texts
            .iter()
            .enumerate()
            .map(|(index, text)| {
                let chunk = Chunk {
                    id: Uuid::new_v4(),
                    index,
                    page: 1,
                    session_id: session,
                    text: text.to_string(),
                };
                (chunk, embedder.embed_one(text).expect("embed"))
            })
            .collect();
        InMemoryIndex::build(session, entries).expect("index")
    }

    #[test]
    fn caches_repeated_queries() {
        let embedder = Arc::new(CountingEmbedder {
            inner: HashingEmbedder::new(256, 8).expect("embedder"),
            calls: AtomicUsize::new(0),
        });
        let index = index_of(embedder.as_ref(), &["aspirin dosage 325mg", "weather report"]);
        let before = embedder.calls.load(Ordering::SeqCst);
        let retriever = Retriever::new(embedder.clone(), 1, 8);

        let first = retriever.retrieve(&index, "aspirin dosage").expect("retrieve");
        let second = retriever.retrieve(&index, " aspirin dosage ").expect("retrieve");
        assert_eq!(first[0].chunk.index, 0);
        assert_eq!(second[0].chunk.id, first[0].chunk.id);
        assert_eq!(embedder.calls.load(Ordering::SeqCst) - before, 1);
    }

    #[test]
    fn empty_index_skips_embedding() {
        let embedder = Arc::new(CountingEmbedder {
            inner: HashingEmbedder::new(64, 8).expect("embedder"),
            calls: AtomicUsize::new(0),
        });
        let index = InMemoryIndex::build(Uuid::new_v4(), Vec::new()).expect("index");
        let retriever = Retriever::new(embedder.clone(), 3, 0);
        assert!(retriever.retrieve(&index, "anything").expect("ok").is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }
}
