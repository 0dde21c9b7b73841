//! Request-level streaming events.
//!
//! `StreamEvent` wraps engine fragments into events the gateway forwards to
//! clients as plain text or SSE:
//! - `chunk` carries partial text from the engine
//! - `done` marks successful completion and carries final metadata
//! - `error` marks a mid-stream failure; no further events follow

use serde::{Deserialize, Serialize};

use crate::budget::BudgetReport;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Partial text from the engine.
    Chunk { content: String },

    /// The stream is complete.
    Done {
        request_id: String,
        session_id: String,
        full_text: String,
        fragments: usize,
        stats: BudgetReport,
    },

    /// Generation failed after streaming began.
    Error { message: String },
}

impl StreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk { .. })
    }
}
