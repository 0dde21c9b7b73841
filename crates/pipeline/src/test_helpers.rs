//! Shared test doubles for executor and orchestrator tests.

use async_trait::async_trait;
use ragline_core::{
    ConversationMessage, EngineError, FragmentIter, HistoryError, HistoryStore, InferenceEngine,
    PromptMessage, RetrievalError, RetrievedPassage, Retriever, Role, ScopeFilter, SessionId,
    SessionSummary,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Everything a [`RecordingEngine`] observed, shared with the test.
#[derive(Default)]
pub struct EngineLog {
    events: Mutex<Vec<String>>,
    prompts: Mutex<Vec<Vec<PromptMessage>>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    pulled: AtomicUsize,
}

impl EngineLog {
    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> Vec<Vec<PromptMessage>> {
        self.prompts.lock().unwrap().clone()
    }

    /// Highest number of generations ever in flight at once.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Fragments pulled from the engine across all generations.
    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }
}

/// An engine stub that records every generation and sleeps per fragment.
///
/// The label of a generation is the text of the last user message. Labels
/// `"panic"`, `"fail"` and `"midfail"` trigger failures.
pub struct RecordingEngine {
    log: Arc<EngineLog>,
    fragments: usize,
    delay: Duration,
}

impl RecordingEngine {
    pub fn new(fragments: usize, delay: Duration) -> (Self, Arc<EngineLog>) {
        let log = Arc::new(EngineLog::default());
        (
            Self {
                log: log.clone(),
                fragments,
                delay,
            },
            log,
        )
    }
}

impl InferenceEngine for RecordingEngine {
    fn name(&self) -> &str {
        "recording"
    }

    fn generate<'a>(
        &'a mut self,
        prompt: &[PromptMessage],
        _max_output_tokens: u32,
    ) -> Result<FragmentIter<'a>, EngineError> {
        let label = prompt
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        match label.as_str() {
            "panic" => panic!("engine exploded"),
            "fail" => return Err(EngineError::Generation("model refused".into())),
            _ => {}
        }

        self.log.prompts.lock().unwrap().push(prompt.to_vec());
        self.log.record(format!("start:{label}"));
        let now = self.log.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.max_active.fetch_max(now, Ordering::SeqCst);

        Ok(Box::new(RecordingIter {
            log: self.log.clone(),
            fail_midway: label == "midfail",
            label,
            remaining: self.fragments,
            produced: 0,
            delay: self.delay,
        }))
    }
}

struct RecordingIter {
    log: Arc<EngineLog>,
    label: String,
    remaining: usize,
    produced: usize,
    delay: Duration,
    fail_midway: bool,
}

impl Iterator for RecordingIter {
    type Item = Result<String, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        std::thread::sleep(self.delay);
        self.remaining -= 1;
        self.log.pulled.fetch_add(1, Ordering::SeqCst);

        if self.fail_midway && self.produced == 1 {
            self.remaining = 0;
            return Some(Err(EngineError::Generation("ran out of memory".into())));
        }
        self.produced += 1;
        Some(Ok(format!("{}-{} ", self.label, self.produced)))
    }
}

impl Drop for RecordingIter {
    fn drop(&mut self) {
        self.log.active.fetch_sub(1, Ordering::SeqCst);
        self.log.record(format!("end:{}", self.label));
    }
}

/// A retriever returning fixed passages for any non-empty scope.
pub struct FixedRetriever {
    pub passages: Vec<RetrievedPassage>,
    pub queries: Mutex<Vec<String>>,
}

impl FixedRetriever {
    pub fn new(passages: Vec<RetrievedPassage>) -> Self {
        Self {
            passages,
            queries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Retriever for FixedRetriever {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn retrieve(
        &self,
        query: &str,
        scope: &ScopeFilter,
    ) -> Result<Option<Vec<RetrievedPassage>>, RetrievalError> {
        self.queries.lock().unwrap().push(query.to_string());
        if scope.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.passages.clone()))
    }
}

/// A retriever whose index is always down.
pub struct FailingRetriever;

#[async_trait]
impl Retriever for FailingRetriever {
    fn name(&self) -> &str {
        "failing"
    }

    async fn retrieve(
        &self,
        _query: &str,
        _scope: &ScopeFilter,
    ) -> Result<Option<Vec<RetrievedPassage>>, RetrievalError> {
        Err(RetrievalError::Unavailable("connection refused".into()))
    }
}

/// A history store that rejects every write.
pub struct FailingHistory;

#[async_trait]
impl HistoryStore for FailingHistory {
    fn name(&self) -> &str {
        "failing"
    }

    async fn append(
        &self,
        _session: &SessionId,
        _message: ConversationMessage,
    ) -> Result<(), HistoryError> {
        Err(HistoryError::Storage("disk full".into()))
    }

    async fn messages(
        &self,
        session: &SessionId,
    ) -> Result<Vec<ConversationMessage>, HistoryError> {
        Err(HistoryError::SessionNotFound(session.to_string()))
    }

    async fn sessions(&self) -> Result<Vec<SessionSummary>, HistoryError> {
        Ok(vec![])
    }
}
