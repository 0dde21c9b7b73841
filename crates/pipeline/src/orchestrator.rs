//! The pipeline orchestrator: format, retrieve, budget, invoke, stream, persist.
//!
//! One [`Pipeline`] serves every request. Each call to [`Pipeline::stream`]
//! runs the pre-stream stages inline, so their failures come back as `Err`.
//! Once the engine starts, a relay task forwards fragments as
//! [`StreamEvent`]s and handles completion, persistence and cancellation.

use chrono::Utc;
use futures::StreamExt;
use ragline_config::AppConfig;
use ragline_core::{
    ConversationMessage, DomainEvent, EngineError, EventBus, HistoryStore, PipelineError,
    Retriever, RetrievedPassage, Role, ScopeFilter, SessionId,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::budget::{BudgetAllocator, BudgetReport};
use crate::executor::{FragmentStream, InferenceExecutor};
use crate::format::format_conversation;
use crate::stream_event::StreamEvent;

const EVENT_BUFFER: usize = 32;

/// Lifecycle of one request, logged as each state is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Formatting,
    Retrieving,
    Budgeting,
    Queued,
    Streaming,
    Completed,
    Failed,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Formatting => "formatting",
            Self::Retrieving => "retrieving",
            Self::Budgeting => "budgeting",
            Self::Queued => "queued",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

fn enter(request_id: &str, state: RequestState) {
    debug!(request_id, state = state.as_str(), "Request state");
}

/// One chat request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Caller turns, oldest first.
    pub conversation: Vec<ConversationMessage>,
    /// Sources retrieval may draw from. Empty means no retrieval.
    pub scope: ScopeFilter,
    /// Session the exchange is persisted under; a fresh one when absent.
    pub session_id: Option<SessionId>,
}

impl ChatRequest {
    pub fn new(conversation: Vec<ConversationMessage>) -> Self {
        Self {
            conversation,
            ..Default::default()
        }
    }

    pub fn with_scope(mut self, scope: ScopeFilter) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// A started response. Events end with exactly one `Done` or `Error`,
/// unless the receiver is dropped first.
pub struct ChatResponse {
    pub request_id: String,
    pub session_id: SessionId,
    pub events: mpsc::Receiver<StreamEvent>,
}

impl ChatResponse {
    /// Drain the stream into the full reply text.
    pub async fn collect_text(mut self) -> Result<String, PipelineError> {
        let mut text = String::new();
        while let Some(event) = self.events.recv().await {
            match event {
                StreamEvent::Chunk { content } => text.push_str(&content),
                StreamEvent::Done { full_text, .. } => return Ok(full_text),
                StreamEvent::Error { message } => {
                    return Err(PipelineError::Inference(EngineError::Generation(message)));
                }
            }
        }
        Err(PipelineError::WorkerGone(format!(
            "stream ended without completion after {} chars",
            text.chars().count()
        )))
    }
}

/// The RAG pipeline.
pub struct Pipeline {
    executor: Arc<InferenceExecutor>,
    retriever: Arc<dyn Retriever>,
    history: Arc<dyn HistoryStore>,
    allocator: BudgetAllocator,
    persona: RwLock<String>,
    max_output_tokens: u32,
    events: Arc<EventBus>,
}

impl Pipeline {
    pub fn new(
        executor: Arc<InferenceExecutor>,
        retriever: Arc<dyn Retriever>,
        history: Arc<dyn HistoryStore>,
        allocator: BudgetAllocator,
    ) -> Self {
        Self {
            executor,
            retriever,
            history,
            allocator,
            persona: RwLock::new(String::new()),
            max_output_tokens: 512,
            events: Arc::new(EventBus::default()),
        }
    }

    /// Build a pipeline from configuration. Reserved output tokens double
    /// as the generation ceiling.
    pub fn from_config(
        config: &AppConfig,
        executor: Arc<InferenceExecutor>,
        retriever: Arc<dyn Retriever>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        let max_output_tokens =
            u32::try_from(config.budget.reserved_output_tokens).unwrap_or(u32::MAX);
        Self::new(
            executor,
            retriever,
            history,
            BudgetAllocator::from_config(&config.budget),
        )
        .with_persona(config.persona.directive.clone())
        .with_max_output_tokens(max_output_tokens)
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = RwLock::new(persona.into());
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub async fn persona(&self) -> String {
        self.persona.read().await.clone()
    }

    /// Replace the persona directive. Requests already formatted keep theirs.
    pub async fn set_persona(&self, persona: impl Into<String>) {
        let persona = persona.into();
        info!(chars = persona.chars().count(), "Persona directive updated");
        *self.persona.write().await = persona;
    }

    pub fn executor(&self) -> &InferenceExecutor {
        &self.executor
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub fn allocator(&self) -> &BudgetAllocator {
        &self.allocator
    }

    pub fn max_output_tokens(&self) -> u32 {
        self.max_output_tokens
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Run a request up to the start of generation.
    ///
    /// `EmptyInput` and `BudgetExhausted` are returned before the engine is
    /// touched. Everything after that arrives on the returned event stream.
    pub async fn stream(&self, request: ChatRequest) -> Result<ChatResponse, PipelineError> {
        let request_id = Uuid::new_v4().to_string();
        let session_id = request.session_id.clone().unwrap_or_default();

        match self.prepare(&request_id, session_id, request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                enter(&request_id, RequestState::Failed);
                warn!(request_id = %request_id, error = %e, "Request rejected");
                self.events.publish(DomainEvent::RequestFailed {
                    request_id,
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(e)
            }
        }
    }

    /// Run a request to completion and return the reply text.
    pub async fn complete(&self, request: ChatRequest) -> Result<String, PipelineError> {
        self.stream(request).await?.collect_text().await
    }

    async fn prepare(
        &self,
        request_id: &str,
        session_id: SessionId,
        request: ChatRequest,
    ) -> Result<ChatResponse, PipelineError> {
        enter(request_id, RequestState::Formatting);
        let persona = self.persona.read().await.clone();
        let formatted = format_conversation(&request.conversation, &persona)?;

        self.events.publish(DomainEvent::RequestAccepted {
            request_id: request_id.to_string(),
            turns: request.conversation.len(),
            scoped_sources: request.scope.len(),
            timestamp: Utc::now(),
        });

        enter(request_id, RequestState::Retrieving);
        let passages = self.retrieve(request_id, &request).await;

        enter(request_id, RequestState::Budgeting);
        let prompt = self.allocator.allocate(&formatted, &passages);
        let report = prompt.report.clone();
        self.events.publish(DomainEvent::PromptBudgeted {
            request_id: request_id.to_string(),
            total_tokens: report.total_tokens,
            safe_limit: report.safe_limit,
            turns_dropped: report.turns_dropped(),
            passages_kept: report.passages_kept(),
            passage_truncated: report.passage_truncated(),
            timestamp: Utc::now(),
        });
        if !prompt.is_viable() {
            return Err(PipelineError::BudgetExhausted {
                safe_limit: report.safe_limit,
                required: report.required_tokens,
            });
        }

        enter(request_id, RequestState::Queued);
        let fragments = self
            .executor
            .submit(prompt.messages, self.max_output_tokens)
            .await?;

        enter(request_id, RequestState::Streaming);
        let query_turn = request
            .conversation
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .cloned();

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let relay = Relay {
            request_id: request_id.to_string(),
            session_id: session_id.clone(),
            engine: self.executor.engine_name().to_string(),
            query_turn,
            report,
            history: self.history.clone(),
            events: self.events.clone(),
        };
        tokio::spawn(relay.run(fragments, tx));

        Ok(ChatResponse {
            request_id: request_id.to_string(),
            session_id,
            events: rx,
        })
    }

    /// Passages for the latest user turn. Failures degrade to none.
    async fn retrieve(&self, request_id: &str, request: &ChatRequest) -> Vec<RetrievedPassage> {
        let Some(query) = ragline_core::latest_user_text(&request.conversation) else {
            return Vec::new();
        };

        match self.retriever.retrieve(query, &request.scope).await {
            Ok(Some(passages)) => {
                debug!(request_id, passages = passages.len(), "Retrieved passages");
                passages
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(
                    request_id,
                    retriever = self.retriever.name(),
                    error = %e,
                    "Retrieval failed, continuing without context"
                );
                self.events.publish(DomainEvent::RetrievalDegraded {
                    request_id: request_id.to_string(),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                Vec::new()
            }
        }
    }
}

/// Everything the relay task needs after the request has been handed off.
struct Relay {
    request_id: String,
    session_id: SessionId,
    engine: String,
    query_turn: Option<ConversationMessage>,
    report: BudgetReport,
    history: Arc<dyn HistoryStore>,
    events: Arc<EventBus>,
}

impl Relay {
    async fn run(self, mut fragments: FragmentStream, tx: mpsc::Sender<StreamEvent>) {
        let started = Instant::now();
        let mut full_text = String::new();
        let mut count = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = tx.closed() => {
                    self.cancelled(count);
                    return;
                }
                next = fragments.next() => next,
            };

            match next {
                Some(Ok(content)) => {
                    full_text.push_str(&content);
                    count += 1;
                    if tx.send(StreamEvent::Chunk { content }).await.is_err() {
                        self.cancelled(count - 1);
                        return;
                    }
                }
                Some(Err(e)) => {
                    let err = PipelineError::Inference(e);
                    self.failed(&err, count);
                    let _ = tx
                        .send(StreamEvent::Error {
                            message: err.to_string(),
                        })
                        .await;
                    return;
                }
                None => break,
            }
        }
        drop(fragments);

        enter(&self.request_id, RequestState::Completed);
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            request_id = %self.request_id,
            fragments = count,
            duration_ms,
            "Response completed"
        );
        self.events.publish(DomainEvent::ResponseCompleted {
            request_id: self.request_id.clone(),
            engine: self.engine.clone(),
            fragments: count,
            duration_ms,
            timestamp: Utc::now(),
        });

        self.persist(&full_text).await;

        let _ = tx
            .send(StreamEvent::Done {
                request_id: self.request_id.clone(),
                session_id: self.session_id.to_string(),
                full_text,
                fragments: count,
                stats: self.report,
            })
            .await;
    }

    async fn persist(&self, reply: &str) {
        let turns = self
            .query_turn
            .iter()
            .cloned()
            .chain(std::iter::once(ConversationMessage::assistant(reply)));

        for turn in turns {
            if let Err(e) = self.history.append(&self.session_id, turn).await {
                error!(
                    request_id = %self.request_id,
                    session_id = %self.session_id,
                    store = self.history.name(),
                    error = %e,
                    "Failed to persist exchange"
                );
                self.events.publish(DomainEvent::PersistenceFailed {
                    request_id: self.request_id.clone(),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                return;
            }
        }
    }

    fn cancelled(&self, delivered: usize) {
        info!(
            request_id = %self.request_id,
            fragments_delivered = delivered,
            "Consumer went away, cancelling generation"
        );
        self.events.publish(DomainEvent::ResponseCancelled {
            request_id: self.request_id.clone(),
            fragments_delivered: delivered,
            timestamp: Utc::now(),
        });
    }

    fn failed(&self, err: &PipelineError, delivered: usize) {
        enter(&self.request_id, RequestState::Failed);
        error!(
            request_id = %self.request_id,
            fragments_delivered = delivered,
            error = %err,
            "Generation failed mid-stream"
        );
        self.events.publish(DomainEvent::RequestFailed {
            request_id: self.request_id.clone(),
            error_message: err.to_string(),
            timestamp: Utc::now(),
        });
    }
}
