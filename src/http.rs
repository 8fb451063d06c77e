//! JSON-over-HTTP surface for [`ChatService`].
//!
//! Core calls are blocking, so every handler hops onto the blocking pool.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{ChatError, UploadError};
use crate::llm::Role;
use crate::service::{ChatService, Health, Provenance};
use crate::session::SHARED_SESSION_ID;

/// Message returned with every successful upload.
pub const UPLOAD_MESSAGE: &str = "File uploaded and processed successfully";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    service: Arc<ChatService>,
    rate_limiter: Option<RateLimiter>,
}

impl AppState {
    /// `rate_limiter` of `None` disables throttling.
    pub fn new(service: Arc<ChatService>, rate_limiter: Option<RateLimiter>) -> Self {
        Self {
            service,
            rate_limiter,
        }
    }
}

/// Routes: `GET /health`, `POST /upload_pdf`, `POST /chat`.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/upload_pdf", post(upload_pdf))
        .route("/chat", post(chat))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    reply: String,
    session_id: Uuid,
    provenance: Provenance,
    history: Vec<(Role, String)>,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    message: &'static str,
    session_id: Uuid,
    suggested_name: String,
    pages: usize,
    chunks: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(state.service.health())
}

async fn chat(
    State(state): State<AppState>,
    request: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = request.map_err(|rejection| bad_request(rejection.body_text()))?;
    let message = request
        .message
        .filter(|message| !message.trim().is_empty())
        .ok_or_else(|| bad_request(ChatError::EmptyMessage.to_string()))?;
    let session_id = parse_session_id(request.session_id.as_deref())?;
    throttle(&state).await?;

    let start = Instant::now();
    let service = Arc::clone(&state.service);
    let reply = tokio::task::spawn_blocking(move || service.chat(session_id, &message))
        .await
        .map_err(|err| internal_error(format!("chat task join error: {err}")))?
        .map_err(|err| match err {
            ChatError::EmptyMessage => bad_request(err.to_string()),
        })?;
    tracing::debug!(
        %session_id,
        latency_ms = start.elapsed().as_secs_f64() * 1000.0,
        "chat request served"
    );
    Ok(Json(ChatResponse {
        reply: reply.reply,
        session_id: reply.session_id,
        provenance: reply.provenance,
        history: reply
            .history
            .into_iter()
            .map(|turn| (turn.role, turn.text))
            .collect(),
    }))
}

async fn upload_pdf(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut multipart = multipart.map_err(|rejection| bad_request(rejection.body_text()))?;
    throttle(&state).await?;

    let mut file: Option<(Option<String>, Vec<u8>)> = None;
    let mut session_field: Option<String> = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some((file_name, bytes.to_vec()));
            }
            Some("session_id") => {
                session_field = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }
    let (file_name, bytes) = file.ok_or_else(|| bad_request("No file part"))?;
    if file_name.as_deref().is_some_and(|name| name.trim().is_empty()) || bytes.is_empty() {
        return Err(bad_request("No selected file"));
    }
    let session_id = parse_session_id(session_field.as_deref())?;

    let service = Arc::clone(&state.service);
    let receipt = tokio::task::spawn_blocking(move || {
        service.upload_document(&bytes, file_name.as_deref(), session_id)
    })
    .await
    .map_err(|err| internal_error(format!("upload task join error: {err}")))?
    .map_err(upload_error)?;
    Ok(Json(UploadResponse {
        message: UPLOAD_MESSAGE,
        session_id: receipt.session_id,
        suggested_name: receipt.suggested_name,
        pages: receipt.pages,
        chunks: receipt.chunks,
    }))
}

/// Absent or blank ids start a fresh session, `default` names the shared
/// session, anything else must parse.
fn parse_session_id(raw: Option<&str>) -> Result<Uuid, ApiError> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => Ok(Uuid::new_v4()),
        Some(raw) if raw.eq_ignore_ascii_case("default") => Ok(SHARED_SESSION_ID),
        Some(raw) => Uuid::parse_str(raw)
            .map_err(|err| bad_request(format!("invalid session_id {raw:?}: {err}"))),
    }
}

async fn throttle(state: &AppState) -> Result<(), ApiError> {
    if let Some(limiter) = &state.rate_limiter {
        if !limiter.acquire().await {
            return Err(too_many_requests("rate limit exceeded"));
        }
    }
    Ok(())
}

fn upload_error(err: UploadError) -> ApiError {
    let status = match &err {
        UploadError::Extraction(_) | UploadError::EmptyDocument => StatusCode::UNPROCESSABLE_ENTITY,
        UploadError::Embedding(_) => StatusCode::BAD_GATEWAY,
    };
    tracing::warn!(error = %err, status = status.as_u16(), "upload rejected");
    error_body(status, err.to_string())
}

fn multipart_error(err: MultipartError) -> ApiError {
    error_body(err.status(), err.body_text())
}

fn bad_request(message: impl Into<String>) -> ApiError {
    error_body(StatusCode::BAD_REQUEST, message)
}

fn too_many_requests(message: impl Into<String>) -> ApiError {
    error_body(StatusCode::TOO_MANY_REQUESTS, message)
}

fn internal_error(message: impl Into<String>) -> ApiError {
    error_body(StatusCode::INTERNAL_SERVER_ERROR, message)
}

fn error_body(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

/// Token bucket shared across chat and upload requests.
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<RateState>>,
    capacity: f64,
    refill_per_sec: f64,
}

struct RateState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// `None` when either limit is zero (throttling disabled).
    pub fn new(max_per_minute: u32, burst: u32) -> Option<Self> {
        if max_per_minute == 0 || burst == 0 {
            return None;
        }
        let capacity = burst as f64;
        Some(Self {
            state: Arc::new(Mutex::new(RateState {
                tokens: capacity,
                last_refill: Instant::now(),
            })),
            capacity,
            refill_per_sec: max_per_minute as f64 / 60.0,
        })
    }

    /// Takes one token if available.
    pub async fn acquire(&self) -> bool {
        let mut guard = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(guard.last_refill).as_secs_f64();
        guard.last_refill = now;
        guard.tokens = (guard.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        if guard.tokens >= 1.0 {
            guard.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
