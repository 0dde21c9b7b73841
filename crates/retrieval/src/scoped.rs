//! ScopedRetriever: the default `Retriever` implementation.

use async_trait::async_trait;
use ragline_config::RetrievalConfig;
use ragline_core::{Retriever, RetrievalError, RetrievedPassage, ScopeFilter};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::embed::{Embedder, HashingEmbedder};
use crate::index::{IndexedChunk, SourceInfo, VectorIndex, split_into_chunks};
use crate::vector::vector_search;

/// Retrieves passages from an in-memory [`VectorIndex`], restricted to the
/// caller's scope.
///
/// Reads take a shared lock, so concurrent requests never wait on each other.
pub struct ScopedRetriever {
    index: RwLock<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    max_passages: usize,
    chunk_chars: usize,
    min_score: f32,
}

impl ScopedRetriever {
    pub fn new(config: &RetrievalConfig) -> Self {
        Self::with_embedder(config, Arc::new(HashingEmbedder::new(config.embedding_dims)))
    }

    pub fn with_embedder(config: &RetrievalConfig, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            index: RwLock::new(VectorIndex::new()),
            embedder,
            max_passages: config.max_passages,
            chunk_chars: config.chunk_chars,
            min_score: config.min_score,
        }
    }

    /// Index a document under `source_id`, replacing any earlier version.
    ///
    /// Returns the number of chunks stored.
    pub async fn ingest(&self, source_id: &str, text: &str) -> Result<usize, RetrievalError> {
        if source_id.trim().is_empty() {
            return Err(RetrievalError::QueryFailed(
                "source id must not be empty".into(),
            ));
        }

        // Embed outside the lock
        let chunks = split_into_chunks(text, self.chunk_chars)
            .into_iter()
            .map(|text| {
                Ok(IndexedChunk {
                    source_id: source_id.to_string(),
                    embedding: self.embedder.embed(&text)?,
                    text,
                })
            })
            .collect::<Result<Vec<_>, RetrievalError>>()?;

        let count = chunks.len();
        self.index.write().await.insert_source(source_id, text, chunks);
        info!(source_id, chunks = count, "Indexed source");
        Ok(count)
    }

    /// The full text a source was ingested with.
    pub async fn source_text(&self, source_id: &str) -> Option<String> {
        self.index.read().await.source_text(source_id).map(str::to_string)
    }

    pub async fn sources(&self) -> Vec<SourceInfo> {
        self.index.read().await.sources()
    }

    /// Remove one source. Returns whether it existed.
    pub async fn delete_source(&self, source_id: &str) -> bool {
        let removed = self.index.write().await.remove_source(source_id);
        if removed {
            info!(source_id, "Removed source");
        }
        removed
    }

    pub async fn clear(&self) {
        self.index.write().await.clear();
        info!("Cleared vector index");
    }

    pub async fn chunk_count(&self) -> usize {
        self.index.read().await.chunk_count()
    }
}

#[async_trait]
impl Retriever for ScopedRetriever {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn retrieve(
        &self,
        query: &str,
        scope: &ScopeFilter,
    ) -> Result<Option<Vec<RetrievedPassage>>, RetrievalError> {
        if scope.is_empty() {
            return Ok(None);
        }

        let query_embedding = self.embedder.embed(query)?;
        let index = self.index.read().await;
        let passages = vector_search(
            index.chunks(),
            &query_embedding,
            scope,
            self.max_passages,
            self.min_score,
        );

        debug!(
            scope = scope.len(),
            returned = passages.len(),
            "Scoped retrieval complete"
        );
        Ok(Some(passages))
    }
}
