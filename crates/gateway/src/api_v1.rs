//! HTTP API v1.
//!
//! Endpoints (nested under `/api/v1`):
//!
//! - `POST   /chat/stream`:     Chat, reply streamed as plain text
//! - `POST   /chat/events`:     Chat, reply streamed as SSE events
//! - `GET    /events`:          SSE stream of pipeline domain events
//! - `GET    /settings`:        Budget, model and persona settings
//! - `GET    /settings/prompt`: Current persona directive
//! - `POST   /settings/prompt`: Replace the persona directive
//! - `GET    /messages`:        Stored messages of one session
//! - `GET    /sessions`:        Session summaries, newest first
//! - `GET    /sources`:         Indexed sources
//! - `POST   /sources`:         Index a plain-text source
//! - `GET    /sources/{id}`:    Full text of one source
//! - `DELETE /sources/{id}`:    Remove one source
//! - `POST   /sources/clear`:   Remove every source
//! - `GET    /status`:          Engine and index status

use axum::{
    Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderName, StatusCode, header},
    response::sse::{Event as SseEvent, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tracing::{error, info};

use ragline_core::{
    ConversationMessage, HistoryError, PipelineError, ScopeFilter, SessionId, SessionSummary,
};
use ragline_pipeline::{ChatRequest, StreamEvent};
use ragline_retrieval::SourceInfo;

use crate::SharedState;

/// Appended to a plain-text stream that failed after it started.
pub const ERROR_MARKER: &str = "\n[error] ";

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/api/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat/stream", post(chat_stream_handler))
        .route("/chat/events", post(chat_events_handler))
        .route("/events", get(event_stream_handler))
        .route("/settings", get(settings_handler))
        .route("/settings/prompt", get(get_prompt_handler))
        .route("/settings/prompt", post(set_prompt_handler))
        .route("/messages", get(messages_handler))
        .route("/sessions", get(sessions_handler))
        .route("/sources", get(list_sources_handler))
        .route("/sources", post(ingest_source_handler))
        .route("/sources/clear", post(clear_sources_handler))
        .route(
            "/sources/{id}",
            get(source_text_handler).delete(delete_source_handler),
        )
        .route("/status", get(status_handler))
        .with_state(state)
}

// ── Errors ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A failed request, rendered as `{ "error": ... }` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::EmptyInput => StatusCode::BAD_REQUEST,
            PipelineError::BudgetExhausted { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PipelineError::WorkerGone(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, err.to_string())
    }
}

impl From<HistoryError> for ApiError {
    fn from(err: HistoryError) -> Self {
        let status = match &err {
            HistoryError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            HistoryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

// ── Chat ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatBody {
    messages: Vec<ConversationMessage>,
    #[serde(default)]
    selected_file_ids: Option<Vec<String>>,
    #[serde(default)]
    session_id: Option<String>,
}

impl ChatBody {
    fn into_request(self) -> ChatRequest {
        ChatRequest {
            conversation: self.messages,
            scope: ScopeFilter::from(self.selected_file_ids),
            session_id: self.session_id.as_deref().map(SessionId::from),
        }
    }
}

/// `POST /api/v1/chat/stream`: reply streamed as `text/plain`.
///
/// A failure after the first byte ends the body with [`ERROR_MARKER`]
/// followed by the message.
async fn chat_stream_handler(
    State(state): State<SharedState>,
    Json(body): Json<ChatBody>,
) -> Result<Response, ApiError> {
    info!(turns = body.messages.len(), "chat/stream request");

    let response = state.pipeline.stream(body.into_request()).await?;
    let session_id = response.session_id.to_string();
    let text = ReceiverStream::new(response.events).filter_map(text_frame);

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        [(HeaderName::from_static("x-session-id"), session_id)],
        Body::from_stream(text),
    )
        .into_response())
}

fn text_frame(event: StreamEvent) -> Option<Result<String, Infallible>> {
    match event {
        StreamEvent::Chunk { content } => Some(Ok(content)),
        StreamEvent::Error { message } => Some(Ok(format!("{ERROR_MARKER}{message}"))),
        StreamEvent::Done { .. } => None,
    }
}

/// `POST /api/v1/chat/events`: reply streamed as SSE `chunk`/`done`/`error`.
async fn chat_events_handler(
    State(state): State<SharedState>,
    Json(body): Json<ChatBody>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    info!(turns = body.messages.len(), "chat/events SSE request");

    let response = state.pipeline.stream(body.into_request()).await?;
    let stream = ReceiverStream::new(response.events).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event.event_type()).data(data))
    });

    Ok(Sse::new(stream))
}

/// `GET /api/v1/events`: SSE stream of domain events.
async fn event_stream_handler(
    State(state): State<SharedState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.pipeline.events().subscribe();
    let stream = BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|event| {
            let data = serde_json::to_string(event.as_ref()).unwrap_or_default();
            Ok(SseEvent::default().event(event.name()).data(data))
        });

    Sse::new(stream)
}

// ── Settings ──────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct SettingsResponse {
    context_limit: usize,
    max_output_tokens: u32,
    safe_limit: usize,
    max_passages: usize,
    engine: String,
    model: String,
    persona: String,
}

async fn settings_handler(State(state): State<SharedState>) -> Json<SettingsResponse> {
    Json(SettingsResponse {
        context_limit: state.config.budget.context_window,
        max_output_tokens: state.pipeline.max_output_tokens(),
        safe_limit: state.pipeline.allocator().safe_limit(),
        max_passages: state.config.retrieval.max_passages,
        engine: state.pipeline.executor().engine_name().into(),
        model: state.config.engine.model.clone(),
        persona: state.pipeline.persona().await,
    })
}

#[derive(Serialize, Deserialize)]
struct PromptBody {
    persona: String,
}

async fn get_prompt_handler(State(state): State<SharedState>) -> Json<PromptBody> {
    Json(PromptBody {
        persona: state.pipeline.persona().await,
    })
}

async fn set_prompt_handler(
    State(state): State<SharedState>,
    Json(body): Json<PromptBody>,
) -> Json<PromptBody> {
    state.pipeline.set_persona(body.persona).await;
    Json(PromptBody {
        persona: state.pipeline.persona().await,
    })
}

// ── History ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct MessagesQuery {
    session_id: String,
}

#[derive(Serialize, Deserialize)]
struct MessagesResponse {
    session_id: String,
    messages: Vec<ConversationMessage>,
    count: usize,
}

async fn messages_handler(
    State(state): State<SharedState>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let session = SessionId::from(query.session_id.as_str());
    let messages = state.pipeline.history().messages(&session).await?;

    Ok(Json(MessagesResponse {
        session_id: query.session_id,
        count: messages.len(),
        messages,
    }))
}

#[derive(Serialize, Deserialize)]
struct SessionsResponse {
    sessions: Vec<SessionSummary>,
    count: usize,
}

async fn sessions_handler(
    State(state): State<SharedState>,
) -> Result<Json<SessionsResponse>, ApiError> {
    let sessions = state.pipeline.history().sessions().await?;
    Ok(Json(SessionsResponse {
        count: sessions.len(),
        sessions,
    }))
}

// ── Sources ───────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct SourceListResponse {
    sources: Vec<SourceInfo>,
    count: usize,
}

async fn list_sources_handler(State(state): State<SharedState>) -> Json<SourceListResponse> {
    let sources = state.sources.sources().await;
    Json(SourceListResponse {
        count: sources.len(),
        sources,
    })
}

/// Already-extracted plain text of one document.
#[derive(Deserialize)]
struct IngestSourceRequest {
    source_id: String,
    text: String,
}

#[derive(Serialize, Deserialize)]
struct IngestSourceResponse {
    source_id: String,
    chunks: usize,
}

async fn ingest_source_handler(
    State(state): State<SharedState>,
    Json(req): Json<IngestSourceRequest>,
) -> Result<(StatusCode, Json<IngestSourceResponse>), ApiError> {
    let chunks = state
        .sources
        .ingest(&req.source_id, &req.text)
        .await
        .map_err(|e| {
            error!(source_id = %req.source_id, error = %e, "Source ingestion failed");
            ApiError::new(StatusCode::BAD_REQUEST, e.to_string())
        })?;

    Ok((
        StatusCode::CREATED,
        Json(IngestSourceResponse {
            source_id: req.source_id,
            chunks,
        }),
    ))
}

/// `GET /api/v1/sources/{id}`: the source text exactly as ingested.
async fn source_text_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let text = state.sources.source_text(&id).await.ok_or_else(|| {
        ApiError::new(StatusCode::NOT_FOUND, format!("Source not found: {id}"))
    })?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response())
}

async fn delete_source_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.sources.delete_source(&id).await {
        Ok(Json(serde_json::json!({ "removed": id })))
    } else {
        Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("Source not found: {id}"),
        ))
    }
}

async fn clear_sources_handler(State(state): State<SharedState>) -> Json<serde_json::Value> {
    state.sources.clear().await;
    Json(serde_json::json!({ "message": "All sources removed" }))
}

// ── Status ────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct StatusResponse {
    status: String,
    version: String,
    uptime_secs: u64,
    engine: String,
    engine_busy: bool,
    queue_depth: usize,
    indexed_sources: usize,
    indexed_chunks: usize,
}

async fn status_handler(State(state): State<SharedState>) -> Json<StatusResponse> {
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.start_time)
        .num_seconds()
        .max(0) as u64;
    let executor = state.pipeline.executor();

    Json(StatusResponse {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: uptime,
        engine: executor.engine_name().into(),
        engine_busy: executor.is_busy(),
        queue_depth: executor.queue_depth(),
        indexed_sources: state.sources.sources().await.len(),
        indexed_chunks: state.sources.chunk_count().await,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────
