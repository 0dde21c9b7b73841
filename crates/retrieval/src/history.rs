//! In-memory history store, useful for testing and ephemeral deployments.

use async_trait::async_trait;
use ragline_core::{
    ConversationMessage, HistoryError, HistoryStore, Role, SessionId, SessionSummary,
};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Stores every session's messages in a map. Nothing survives a restart.
pub struct InMemoryHistory {
    sessions: RwLock<HashMap<SessionId, Vec<ConversationMessage>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

fn summarize(id: &SessionId, messages: &[ConversationMessage]) -> Option<SessionSummary> {
    let mut ordered: Vec<&ConversationMessage> = messages.iter().collect();
    ordered.sort_by_key(|m| m.timestamp);

    let last = ordered.last()?;
    let title = ordered
        .iter()
        .find(|m| m.role == Role::User)
        .or_else(|| ordered.first())
        .map(|m| m.text.clone())
        .unwrap_or_default();

    Some(SessionSummary {
        id: id.clone(),
        title,
        timestamp: last.timestamp,
        last_message: last.text.clone(),
    })
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append(
        &self,
        session: &SessionId,
        message: ConversationMessage,
    ) -> Result<(), HistoryError> {
        self.sessions
            .write()
            .await
            .entry(session.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn messages(
        &self,
        session: &SessionId,
    ) -> Result<Vec<ConversationMessage>, HistoryError> {
        let sessions = self.sessions.read().await;
        let mut messages = sessions
            .get(session)
            .cloned()
            .ok_or_else(|| HistoryError::SessionNotFound(session.to_string()))?;
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }

    async fn sessions(&self) -> Result<Vec<SessionSummary>, HistoryError> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<SessionSummary> = sessions
            .iter()
            .filter_map(|(id, messages)| summarize(id, messages))
            .collect();
        summaries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(summaries)
    }
}
