//! Local feature-hashing embedder: no network, deterministic, lexical similarity only.

use std::collections::HashMap;

use anyhow::Result;
use crc32fast::Hasher as Crc32;

use super::{ensure_batch_fits, EmbeddingProvider};
use crate::error::ProviderError;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "does", "for", "from", "how", "in",
    "is", "it", "of", "on", "or", "that", "the", "this", "to", "was", "what", "when", "where",
    "which", "who", "why", "with",
];

/// Hashes lowercased terms into a fixed number of buckets with sublinear term weighting.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    batch_size: usize,
}

impl HashingEmbedder {
    /// Builds an embedder producing `dimensions`-long unit vectors.
    pub fn new(dimensions: usize, batch_size: usize) -> Result<Self> {
        anyhow::ensure!(dimensions >= 16, "hashing embedder needs at least 16 dimensions");
        Ok(Self {
            dimensions,
            batch_size: batch_size.max(1),
        })
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut counts: HashMap<String, u32> = HashMap::new();
        for term in text
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|term| !term.is_empty())
        {
            let term = term.to_lowercase();
            if STOPWORDS.contains(&term.as_str()) {
                continue;
            }
            *counts.entry(term).or_default() += 1;
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for (term, count) in counts {
            let mut hasher = Crc32::new();
            hasher.update(term.as_bytes());
            let bucket = hasher.finalize() as usize % self.dimensions;
            vector[bucket] += 1.0 + (count as f32).ln();
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        ensure_batch_fits(inputs.len(), self.batch_size)?;
        Ok(inputs.iter().map(|text| self.embed_text(text)).collect())
    }
}
