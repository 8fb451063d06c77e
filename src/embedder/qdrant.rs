//! Qdrant Cloud Inference embedding client.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{ensure_batch_fits, send_with_retry, EmbeddingProvider};
use crate::error::ProviderError;

/// Blocking client for a Qdrant inference endpoint.
#[derive(Clone)]
pub struct QdrantEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    max_retries: usize,
    batch_size: usize,
}

impl QdrantEmbedder {
    /// Builds a client.
    ///
    /// # Arguments
    /// * `api_key` - Value for the `api-key` header
    /// * `endpoint` - Full inference endpoint, e.g. `https://cluster-id.cloud.qdrant.io/inference/text`
    /// * `model` - Model identifier advertised by the cluster
    pub fn new(
        api_key: String,
        endpoint: String,
        model: String,
        timeout: Duration,
        max_retries: usize,
        batch_size: usize,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing Qdrant API key");
        anyhow::ensure!(
            endpoint.starts_with("http://") || endpoint.starts_with("https://"),
            "Qdrant endpoint must be an http(s) URL"
        );
        anyhow::ensure!(!model.trim().is_empty(), "missing Qdrant model name");
        let mut headers = HeaderMap::new();
        headers.insert(
            "api-key",
            HeaderValue::from_str(api_key.trim()).context("invalid Qdrant API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build Qdrant HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model,
            max_retries: max_retries.max(1),
            batch_size: batch_size.max(1),
        })
    }
}

impl EmbeddingProvider for QdrantEmbedder {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        ensure_batch_fits(inputs.len(), self.batch_size)?;
        let request = InferenceRequest {
            model: &self.model,
            inputs,
        };
        let resp = send_with_retry(self.max_retries, || {
            self.client.post(&self.endpoint).json(&request)
        })?;
        let payload: InferenceResponse = resp.json()?;
        payload.into_embeddings(inputs.len())
    }
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    model: &'a str,
    #[serde(rename = "input")]
    inputs: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    #[serde(default)]
    data: Vec<InferenceData>,
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct InferenceData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

impl InferenceResponse {
    /// Accepts either the `data` (OpenAI-style) or bare `embeddings` payload shape.
    fn into_embeddings(self, expected: usize) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mismatch = |got: usize| {
            ProviderError::Mismatch(format!(
                "Qdrant returned {got} embeddings for {expected} inputs"
            ))
        };
        if !self.data.is_empty() {
            if self.data.len() != expected {
                return Err(mismatch(self.data.len()));
            }
            let mut data = self.data;
            data.sort_by_key(|d| d.index.unwrap_or(0));
            return Ok(data.into_iter().map(|d| d.embedding).collect());
        }
        if !self.embeddings.is_empty() {
            if self.embeddings.len() != expected {
                return Err(mismatch(self.embeddings.len()));
            }
            return Ok(self.embeddings);
        }
        Err(ProviderError::Decode(
            "Qdrant response missing embedding payloads".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bare_embeddings_shape() {
        let raw = r#"{"embeddings":[[0.1,0.2],[0.3,0.4]]}"#;
        let payload: InferenceResponse = serde_json::from_str(raw).expect("json");
        let vectors = payload.into_embeddings(2).expect("vectors");
        assert_eq!(vectors[1], vec![0.3, 0.4]);
    }

    #[test]
    fn empty_payload_is_decode_error() {
        let payload: InferenceResponse = serde_json::from_str("{}").expect("json");
        assert!(matches!(
            payload.into_embeddings(1),
            Err(ProviderError::Decode(_))
        ));
    }

    #[test]
    fn endpoint_must_be_http() {
        let result = QdrantEmbedder::new(
            "key".into(),
            "ftp://cluster".into(),
            "model".into(),
            Duration::from_secs(1),
            1,
            4,
        );
        assert!(result.is_err());
    }
}
