//! Retriever trait: scoped passage retrieval from a vector index.

use async_trait::async_trait;

use crate::error::RetrievalError;
use crate::passage::{RetrievedPassage, ScopeFilter};

/// The core retrieval trait.
///
/// Implementations must be safe for concurrent reads; the pipeline never
/// serializes retrieval calls.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// The backend name (e.g., "in_memory").
    fn name(&self) -> &str;

    /// Return passages ranked by similarity to `query`, restricted to `scope`.
    ///
    /// Returns `Ok(None)` when `scope` is empty: retrieval only runs when the
    /// caller explicitly selects documents. The result length is bounded by
    /// the implementation's configured maximum.
    async fn retrieve(
        &self,
        query: &str,
        scope: &ScopeFilter,
    ) -> Result<Option<Vec<RetrievedPassage>>, RetrievalError>;
}
