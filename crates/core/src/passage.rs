//! Retrieval scope and passage types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A caller-supplied restriction of retrieval to a subset of indexed sources.
///
/// Identifiers are opaque. An empty filter means "no retrieval augmentation".
/// Backed by an ordered set so iteration order is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeFilter(BTreeSet<String>);

impl ScopeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.0.contains(source_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn insert(&mut self, source_id: impl Into<String>) {
        self.0.insert(source_id.into());
    }
}

impl<S: Into<String>> FromIterator<S> for ScopeFilter {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl From<Option<Vec<String>>> for ScopeFilter {
    fn from(ids: Option<Vec<String>>) -> Self {
        ids.map(|v| v.into_iter().collect()).unwrap_or_default()
    }
}

/// A ranked chunk of document text returned by similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    /// The passage text.
    pub text: String,
    /// The source (document) this passage was indexed under.
    pub source_id: String,
    /// Similarity to the query as reported by the index.
    #[serde(default)]
    pub score: f32,
}

impl RetrievedPassage {
    pub fn new(source_id: impl Into<String>, text: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            source_id: source_id.into(),
            score,
        }
    }
}
