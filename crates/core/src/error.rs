//! Error types for the ragline domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] aggregates them.
//!
//! Propagation policy:
//! - [`RetrievalError`] and [`HistoryError`] are recovered locally by the
//!   pipeline (logged and published, never surfaced to the caller).
//! - [`PipelineError`] values are fatal to the request.

use thiserror::Error;

/// The top-level error type for all ragline operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures raised by an inference engine.
///
/// The message is the engine's own diagnostic text.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Model failed to load: {0}")]
    LoadFailed(String),

    #[error("Prompt rejected by engine: {0}")]
    MalformedPrompt(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Engine panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Index unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

/// Request-fatal failures of the prompt pipeline.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("No conversation turns supplied")]
    EmptyInput,

    #[error(
        "Prompt does not fit the context budget: newest turn needs {required} tokens, {safe_limit} available"
    )]
    BudgetExhausted { safe_limit: usize, required: usize },

    #[error("Inference failed: {0}")]
    Inference(#[from] EngineError),

    #[error("Inference worker unavailable: {0}")]
    WorkerGone(String),
}

impl PipelineError {
    /// Whether this failure happened before the engine was ever invoked.
    pub fn is_pre_stream(&self) -> bool {
        matches!(self, Self::EmptyInput | Self::BudgetExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_displays_diagnostic() {
        let err = Error::Engine(EngineError::Generation("out of memory".into()));
        assert!(err.to_string().contains("out of memory"));
    }

    #[test]
    fn budget_error_displays_numbers() {
        let err = PipelineError::BudgetExhausted {
            safe_limit: 80,
            required: 120,
        };
        let text = err.to_string();
        assert!(text.contains("80"));
        assert!(text.contains("120"));
    }

    #[test]
    fn pre_stream_classification() {
        assert!(PipelineError::EmptyInput.is_pre_stream());
        assert!(
            PipelineError::BudgetExhausted {
                safe_limit: 0,
                required: 1
            }
            .is_pre_stream()
        );
        assert!(!PipelineError::Inference(EngineError::Generation("x".into())).is_pre_stream());
        assert!(!PipelineError::WorkerGone("gone".into()).is_pre_stream());
    }

    #[test]
    fn engine_error_converts_into_pipeline_error() {
        let err: PipelineError = EngineError::MalformedPrompt("empty".into()).into();
        assert!(matches!(err, PipelineError::Inference(_)));
    }
}
