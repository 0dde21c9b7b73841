//! Domain event system: the pipeline's observability collaborator.
//!
//! Events are published when a request changes state or when a non-fatal
//! failure is recovered locally. Subscribers (log streams, tests) react
//! without coupling to the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A chat request was accepted by the pipeline
    RequestAccepted {
        request_id: String,
        turns: usize,
        scoped_sources: usize,
        timestamp: DateTime<Utc>,
    },

    /// Retrieval failed and the request continued without augmentation
    RetrievalDegraded {
        request_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// The budget allocator produced a prompt
    PromptBudgeted {
        request_id: String,
        total_tokens: usize,
        safe_limit: usize,
        turns_dropped: usize,
        passages_kept: usize,
        passage_truncated: bool,
        timestamp: DateTime<Utc>,
    },

    /// Generation finished and the full reply was produced
    ResponseCompleted {
        request_id: String,
        engine: String,
        fragments: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The caller went away before generation finished
    ResponseCancelled {
        request_id: String,
        fragments_delivered: usize,
        timestamp: DateTime<Utc>,
    },

    /// A request failed terminally
    RequestFailed {
        request_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// Writing a completed exchange to the history store failed
    PersistenceFailed {
        request_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Short event name for log streams.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestAccepted { .. } => "request_accepted",
            Self::RetrievalDegraded { .. } => "retrieval_degraded",
            Self::PromptBudgeted { .. } => "prompt_budgeted",
            Self::ResponseCompleted { .. } => "response_completed",
            Self::ResponseCancelled { .. } => "response_cancelled",
            Self::RequestFailed { .. } => "request_failed",
            Self::PersistenceFailed { .. } => "persistence_failed",
        }
    }
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
