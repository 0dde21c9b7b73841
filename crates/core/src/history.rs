//! HistoryStore trait: persistence of completed exchanges.
//!
//! The pipeline hands every finished exchange to a history store. Failures
//! here never affect a stream that was already delivered.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HistoryError;
use crate::message::{ConversationMessage, SessionId};

/// A one-line overview of a stored session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session identifier
    pub id: SessionId,
    /// Text of the first user message (falls back to the first message)
    pub title: String,
    /// Timestamp of the last message
    pub timestamp: DateTime<Utc>,
    /// Text of the last message
    pub last_message: String,
}

/// The core HistoryStore trait.
///
/// Implementations: in-memory (default), test doubles that fail on demand.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// The backend name (e.g., "in_memory").
    fn name(&self) -> &str;

    /// Append one message to a session.
    async fn append(
        &self,
        session: &SessionId,
        message: ConversationMessage,
    ) -> Result<(), HistoryError>;

    /// All messages of a session in chronological order.
    async fn messages(&self, session: &SessionId)
    -> Result<Vec<ConversationMessage>, HistoryError>;

    /// Summaries of every session, most recently active first.
    async fn sessions(&self) -> Result<Vec<SessionSummary>, HistoryError>;
}
