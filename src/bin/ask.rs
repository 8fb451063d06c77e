use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use docchat::error::ProviderError;
use docchat::llm::{CompletionRequest, LlmProvider};
use docchat::{ChatService, ScoredChunk, ServiceArgs};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "docchat-ask",
    about = "Index one PDF and answer a single question about it"
)]
struct AskCli {
    /// PDF to index
    #[arg(long)]
    pdf: PathBuf,

    /// Question to answer
    #[arg(long)]
    query: String,

    /// Only print the retrieved context (skip LLM calls)
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    #[command(flatten)]
    service: ServiceArgs,
}

/// Stands in for a chat model when only retrieval is requested.
struct OfflineLlm;

impl LlmProvider for OfflineLlm {
    fn complete(&self, _request: &CompletionRequest<'_>) -> Result<String, ProviderError> {
        Err(ProviderError::Rejected("dry run: no chat model configured".into()))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = AskCli::parse();
    let config = cli
        .service
        .build_config()
        .context("invalid service configuration")?;
    let embedder = cli.service.build_embedder()?;
    let llm: Arc<dyn LlmProvider> = if cli.dry_run {
        Arc::new(OfflineLlm)
    } else {
        cli.service.build_llm()?
    };
    let service = ChatService::new(&config, embedder, llm);

    let bytes = fs::read(&cli.pdf).with_context(|| format!("failed to read {}", cli.pdf.display()))?;
    let file_name = cli.pdf.file_name().and_then(|name| name.to_str());
    let session_id = Uuid::new_v4();
    let receipt = service
        .upload_document(&bytes, file_name, session_id)
        .with_context(|| format!("failed to index {}", cli.pdf.display()))?;
    println!(
        "{}: indexed {} pages into {} chunks",
        receipt.suggested_name, receipt.pages, receipt.chunks
    );

    let chunks = service
        .retrieve_context(session_id, &cli.query)
        .context("failed to retrieve context")?;
    println!("--- Retrieved Context ---\n{}\n", render_context(&chunks));
    if cli.dry_run {
        println!("dry-run enabled; skipping LLM call.");
        return Ok(());
    }

    let reply = service
        .chat(session_id, &cli.query)
        .context("question rejected")?;
    println!("--- Answer ---\n{}", reply.reply);
    Ok(())
}

fn render_context(chunks: &[ScoredChunk]) -> String {
    if chunks.is_empty() {
        return "(no matching chunks)".to_string();
    }
    let mut out = String::new();
    for (idx, hit) in chunks.iter().enumerate() {
        out.push_str(&format!(
            "[{}] page {} | chunk {} | score {:.3}\n{}\n\n",
            idx + 1,
            hit.chunk.page,
            hit.chunk.index,
            hit.score,
            hit.chunk.text.trim()
        ));
    }
    out.trim_end().to_string()
}
