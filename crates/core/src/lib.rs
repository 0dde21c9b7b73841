//! # ragline core
//!
//! Domain types, traits, and error definitions for the ragline
//! retrieval-augmented inference pipeline. This crate has **no framework
//! dependencies**: it defines the model every other crate implements against.
//!
//! ## Seams
//!
//! Each external collaborator is a trait here, implemented elsewhere:
//! - [`InferenceEngine`]: one loaded model, blocking and not reentrant
//! - [`Retriever`]: scoped passage retrieval from a vector index
//! - [`HistoryStore`]: persistence of completed exchanges
//!
//! Test doubles substitute any of them without touching global state.

pub mod engine;
pub mod error;
pub mod event;
pub mod history;
pub mod message;
pub mod passage;
pub mod retrieval;

// Re-export key types at crate root for ergonomics
pub use engine::{FragmentIter, InferenceEngine};
pub use error::{EngineError, Error, HistoryError, PipelineError, Result, RetrievalError};
pub use event::{DomainEvent, EventBus};
pub use history::{HistoryStore, SessionSummary};
pub use message::{ConversationMessage, PromptMessage, Role, SessionId, latest_user_text};
pub use passage::{RetrievedPassage, ScopeFilter};
pub use retrieval::Retriever;
