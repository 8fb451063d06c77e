//! Upload-time embedding and index construction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender};
use uuid::Uuid;

use crate::chunker::TextChunk;
use crate::embedder::EmbeddingProvider;
use crate::error::EmbeddingError;
use crate::vector_index::{Chunk, IndexBackend, VectorIndex};

/// Embeds chunk batches across worker threads and builds a fresh index per session.
#[derive(Clone)]
pub struct Indexer {
    embedder: Arc<dyn EmbeddingProvider>,
    backend: Arc<dyn IndexBackend>,
    workers: usize,
}

struct EmbeddingTask<'a> {
    id: usize,
    inputs: Vec<&'a str>,
}

type EmbeddingResult = (usize, Result<Vec<Vec<f32>>, EmbeddingError>);

impl Indexer {
    /// Creates an indexer using `workers` embedding threads (at least one).
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        backend: Arc<dyn IndexBackend>,
        workers: usize,
    ) -> Self {
        Self {
            embedder,
            backend,
            workers: workers.max(1),
        }
    }

    /// Provider used for chunk and query embeddings.
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Embeds every chunk and returns a complete index scoped to `session_id`.
    ///
    /// Any failure discards all work; no partially built index is returned.
    pub fn build_index(
        &self,
        session_id: Uuid,
        chunks: Vec<TextChunk>,
    ) -> Result<Arc<dyn VectorIndex>, EmbeddingError> {
        let started = Instant::now();
        let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        let vectors = self.embed_all(&texts)?;
        if vectors.len() != chunks.len() {
            return Err(EmbeddingError::InvalidVector(format!(
                "embedding count {} mismatched chunk count {}",
                vectors.len(),
                chunks.len()
            )));
        }

        let entries: Vec<(Chunk, Vec<f32>)> = chunks
            .into_iter()
            .enumerate()
            .zip(vectors)
            .map(|((index, chunk), vector)| {
                let record = Chunk {
                    id: Uuid::new_v4(),
                    index,
                    page: chunk.page,
                    session_id,
                    text: chunk.text,
                };
                (record, vector)
            })
            .collect();
        let index = self.backend.build(session_id, entries)?;
        tracing::info!(
            %session_id,
            chunks = index.len(),
            latency_ms = started.elapsed().as_secs_f64() * 1000.0,
            "built session index"
        );
        Ok(index)
    }

    fn embed_all(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let batch_size = self.embedder.batch_size().max(1);
        let batches: Vec<&[&str]> = texts.chunks(batch_size).collect();
        let batch_count = batches.len();
        let worker_count = self.workers.min(batch_count);

        let (task_tx, task_rx) = unbounded::<EmbeddingTask<'_>>();
        let (result_tx, result_rx) = unbounded::<EmbeddingResult>();
        for (id, batch) in batches.into_iter().enumerate() {
            task_tx
                .send(EmbeddingTask {
                    id,
                    inputs: batch.to_vec(),
                })
                .map_err(|_| EmbeddingError::Worker("task queue closed".into()))?;
        }
        drop(task_tx);

        let cancelled = AtomicBool::new(false);
        let embedder = self.embedder.as_ref();
        thread::scope(|scope| {
            for worker_id in 0..worker_count {
                let rx = task_rx.clone();
                let tx = result_tx.clone();
                let cancelled = &cancelled;
                scope.spawn(move || worker_loop(worker_id, embedder, rx, tx, cancelled));
            }
        });
        drop(result_tx);

        let mut ordered: Vec<Option<Vec<Vec<f32>>>> = vec![None; batch_count];
        let mut first_error: Option<EmbeddingError> = None;
        for (id, result) in result_rx.iter() {
            match result {
                Ok(vectors) => ordered[id] = Some(vectors),
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        if let Some(err) = first_error {
            tracing::warn!(error = %err, "embedding failed; upload rejected");
            return Err(err);
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for (id, batch) in ordered.into_iter().enumerate() {
            let batch =
                batch.ok_or_else(|| EmbeddingError::Worker(format!("batch {id} never finished")))?;
            vectors.extend(batch);
        }
        Ok(vectors)
    }
}

fn worker_loop(
    worker_id: usize,
    embedder: &dyn EmbeddingProvider,
    receiver: Receiver<EmbeddingTask<'_>>,
    sender: Sender<EmbeddingResult>,
    cancelled: &AtomicBool,
) {
    for task in receiver.iter() {
        if cancelled.load(Ordering::Acquire) {
            break;
        }
        tracing::debug!(worker_id, batch = task.id, inputs = task.inputs.len(), "embedding batch");
        let result = embedder
            .embed_batch(&task.inputs)
            .map_err(EmbeddingError::from)
            .and_then(|vectors| {
                if vectors.len() == task.inputs.len() {
                    Ok(vectors)
                } else {
                    Err(EmbeddingError::InvalidVector(format!(
                        "batch {} returned {} vectors for {} inputs",
                        task.id,
                        vectors.len(),
                        task.inputs.len()
                    )))
                }
            });
        if result.is_err() {
            cancelled.store(true, Ordering::Release);
        }
        if sender.send((task.id, result)).is_err() {
            break;
        }
    }
}
