//! Retrieval and history storage implementations for ragline.
//!
//! - [`ScopedRetriever`]: the default `Retriever`, an in-memory
//!   [`VectorIndex`] queried with hashed bag-of-words embeddings
//! - [`InMemoryHistory`]: the default `HistoryStore`

pub mod embed;
pub mod history;
pub mod index;
pub mod scoped;
pub mod vector;

pub use embed::{Embedder, HashingEmbedder};
pub use history::InMemoryHistory;
pub use index::{IndexedChunk, SourceInfo, VectorIndex, split_into_chunks};
pub use scoped::ScopedRetriever;
pub use vector::{cosine_similarity, vector_search};
