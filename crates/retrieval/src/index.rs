//! In-memory vector index of document chunks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One embedded chunk of a source document.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub source_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Summary of an indexed source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub source_id: String,
    pub chunks: usize,
    pub chars: usize,
    pub ingested_at: DateTime<Utc>,
}

/// Chunks stored in insertion order, grouped by source. The raw text of each
/// source is kept alongside so it can be shown back verbatim.
///
/// Not synchronized; [`crate::ScopedRetriever`] guards it with a lock.
#[derive(Debug, Default)]
pub struct VectorIndex {
    chunks: Vec<IndexedChunk>,
    sources: BTreeMap<String, SourceInfo>,
    texts: BTreeMap<String, String>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the chunks of a source, replacing any earlier version of it.
    pub fn insert_source(&mut self, source_id: &str, text: &str, chunks: Vec<IndexedChunk>) {
        self.remove_source(source_id);
        self.texts.insert(source_id.to_string(), text.to_string());
        let chars = chunks.iter().map(|c| c.text.chars().count()).sum();
        self.sources.insert(
            source_id.to_string(),
            SourceInfo {
                source_id: source_id.to_string(),
                chunks: chunks.len(),
                chars,
                ingested_at: Utc::now(),
            },
        );
        self.chunks.extend(chunks);
    }

    /// Remove a source and its chunks. Returns whether it was present.
    pub fn remove_source(&mut self, source_id: &str) -> bool {
        if self.sources.remove(source_id).is_none() {
            return false;
        }
        self.texts.remove(source_id);
        self.chunks.retain(|c| c.source_id != source_id);
        true
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.sources.clear();
        self.texts.clear();
    }

    /// The text a source was ingested with, unchanged.
    pub fn source_text(&self, source_id: &str) -> Option<&str> {
        self.texts.get(source_id).map(String::as_str)
    }

    pub fn chunks(&self) -> &[IndexedChunk] {
        &self.chunks
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Sources sorted by id.
    pub fn sources(&self) -> Vec<SourceInfo> {
        self.sources.values().cloned().collect()
    }
}

/// Split text into chunks of at most `max_chars` characters.
///
/// Breaks on whitespace; runs of whitespace collapse to one space. A single
/// word longer than `max_chars` is split mid-word.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if word_len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            chunks.extend(chars.chunks(max_chars).map(|piece| piece.iter().collect()));
            continue;
        }

        let needed = if current.is_empty() {
            word_len
        } else {
            current_len + 1 + word_len
        };
        if needed > max_chars {
            chunks.push(std::mem::take(&mut current));
            current.push_str(word);
            current_len = word_len;
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
            current_len = needed;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(source: &str, text: &str) -> IndexedChunk {
        IndexedChunk {
            source_id: source.into(),
            text: text.into(),
            embedding: vec![1.0],
        }
    }

    #[test]
    fn chunks_respect_max_chars() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let chunks = split_into_chunks(text, 12);
        assert!(chunks.iter().all(|c| c.chars().count() <= 12));
        assert_eq!(chunks.join(" "), text);
        assert_eq!(chunks[0], "alpha beta");
    }

    #[test]
    fn long_word_is_split() {
        let chunks = split_into_chunks("tiny abcdefghijkl end", 5);
        assert_eq!(chunks, vec!["tiny", "abcde", "fghij", "kl", "end"]);
    }

    #[test]
    fn whitespace_only_text_yields_nothing() {
        assert!(split_into_chunks(" \n\t ", 10).is_empty());
    }

    #[test]
    fn multibyte_text_counts_chars() {
        let chunks = split_into_chunks("héllo wörld", 5);
        assert_eq!(chunks, vec!["héllo", "wörld"]);
    }

    #[test]
    fn reinserting_source_replaces_chunks() {
        let mut index = VectorIndex::new();
        index.insert_source("a", "one two", vec![chunk("a", "one"), chunk("a", "two")]);
        index.insert_source("b", "three", vec![chunk("b", "three")]);
        index.insert_source("a", "four", vec![chunk("a", "four")]);

        assert_eq!(index.chunk_count(), 2);
        let sources = index.sources();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].source_id, "a");
        assert_eq!(sources[0].chunks, 1);
        assert_eq!(sources[0].chars, 4);
        assert_eq!(index.source_text("a"), Some("four"));
    }

    #[test]
    fn source_text_keeps_original_layout() {
        let mut index = VectorIndex::new();
        let text = "Title\n\n  indented   line\n";
        let chunks = split_into_chunks(text, 100)
            .into_iter()
            .map(|c| chunk("doc.txt", &c))
            .collect();
        index.insert_source("doc.txt", text, chunks);

        assert_eq!(index.chunks()[0].text, "Title indented line");
        assert_eq!(index.source_text("doc.txt"), Some(text));
        assert_eq!(index.source_text("other.txt"), None);
    }

    #[test]
    fn remove_and_clear() {
        let mut index = VectorIndex::new();
        index.insert_source("a", "one", vec![chunk("a", "one")]);
        index.insert_source("b", "two", vec![chunk("b", "two")]);

        assert!(index.remove_source("a"));
        assert_eq!(index.source_text("a"), None);
        assert!(!index.remove_source("a"));
        assert_eq!(index.chunk_count(), 1);

        index.clear();
        assert_eq!(index.chunk_count(), 0);
        assert_eq!(index.source_text("b"), None);
        assert!(index.sources().is_empty());
    }
}
