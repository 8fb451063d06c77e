use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use docchat::http::{router, AppState, RateLimiter};
use docchat::{ChatService, ServiceArgs};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "docchat-server",
    about = "HTTP service answering questions about uploaded PDFs"
)]
struct ServerCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "DOCCHAT_BIND", default_value = "127.0.0.1:5000")]
    bind: String,

    /// PDF indexed at startup and used by sessions that never upload.
    #[arg(long, env = "DOCCHAT_DEFAULT_PDF")]
    default_pdf: Option<PathBuf>,

    /// Largest accepted request body in bytes.
    #[arg(long, env = "DOCCHAT_MAX_UPLOAD_BYTES", default_value_t = 32 * 1024 * 1024)]
    max_upload_bytes: usize,

    /// Max requests per minute allowed (0 disables rate limiting).
    #[arg(long, default_value_t = 120)]
    max_requests_per_minute: u32,

    /// Rate-limit burst size (tokens available instantly).
    #[arg(long, default_value_t = 12)]
    rate_limit_burst: u32,

    /// Seconds between sweeps for idle sessions (0 disables the sweeper).
    #[arg(long, default_value_t = 300)]
    session_sweep_secs: u64,

    #[command(flatten)]
    service: ServiceArgs,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = ServerCli::parse();
    let config = cli
        .service
        .build_config()
        .context("invalid service configuration")?;

    // Providers hold blocking HTTP clients, which must be built and dropped
    // outside the async runtime.
    let embedder = cli.service.build_embedder()?;
    let llm = cli.service.build_llm()?;
    let service = Arc::new(ChatService::new(&config, embedder, llm));

    if let Some(path) = &cli.default_pdf {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let file_name = path.file_name().and_then(|name| name.to_str());
        let receipt = service
            .load_default_document(&bytes, file_name)
            .with_context(|| format!("failed to index default document {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            pages = receipt.pages,
            chunks = receipt.chunks,
            "default document ready"
        );
    }

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let state = AppState::new(
        Arc::clone(&service),
        RateLimiter::new(cli.max_requests_per_minute, cli.rate_limit_burst),
    );
    let app = router(state, cli.max_upload_bytes);
    let sweep_every = Duration::from_secs(cli.session_sweep_secs);
    runtime.block_on(serve(addr, app, Arc::clone(&service), sweep_every))?;
    drop(runtime);
    drop(service);
    Ok(())
}

async fn serve(
    addr: SocketAddr,
    app: axum::Router,
    service: Arc<ChatService>,
    sweep_every: Duration,
) -> Result<()> {
    if !sweep_every.is_zero() {
        let sweeper = Arc::clone(&service);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sweeper.sessions().evict_expired();
            }
        });
    }
    drop(service);

    tracing::info!(%addr, "docchat-server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .await
        .context("server shutdown")?;
    Ok(())
}
