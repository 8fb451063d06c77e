//! Embedding providers behind a single blocking interface.

use std::thread;
use std::time::Duration;

use reqwest::blocking::{RequestBuilder, Response};

use crate::error::ProviderError;

pub mod hashing;
pub mod openai;
pub mod qdrant;

/// Turns text into vectors. Implementations must be safe to share across worker threads.
pub trait EmbeddingProvider: Send + Sync {
    /// Largest batch accepted by [`EmbeddingProvider::embed_batch`].
    fn batch_size(&self) -> usize;

    /// Embeds `inputs`, returning one vector per input in the same order.
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Embeds a single string.
    fn embed_one(&self, input: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vectors = self.embed_batch(&[input])?;
        vectors
            .pop()
            .ok_or_else(|| ProviderError::Mismatch("provider returned no embedding".into()))
    }
}

pub(crate) fn ensure_batch_fits(len: usize, max: usize) -> Result<(), ProviderError> {
    if len > max {
        return Err(ProviderError::Rejected(format!(
            "batch of {len} exceeds configured max {max}"
        )));
    }
    Ok(())
}

/// Sends a request, retrying throttling, server errors and transient transport failures
/// with capped exponential backoff. `build` is invoked once per attempt.
pub(crate) fn send_with_retry<F>(max_retries: usize, build: F) -> Result<Response, ProviderError>
where
    F: Fn() -> RequestBuilder,
{
    let max_retries = max_retries.max(1);
    let mut attempt = 0usize;
    loop {
        let outcome = match build().send() {
            Ok(resp) if resp.status().is_success() => return Ok(resp),
            Ok(resp) => {
                let status = resp.status();
                let body = resp
                    .text()
                    .unwrap_or_else(|_| "<body unavailable>".to_string());
                ProviderError::Status { status, body }
            }
            Err(err) => ProviderError::from(err),
        };
        if outcome.is_retryable() && attempt + 1 < max_retries {
            attempt += 1;
            tracing::debug!(attempt, error = %outcome, "retrying embedding request");
            thread::sleep(retry_backoff(attempt));
            continue;
        }
        return Err(outcome);
    }
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}
