//! Vector similarity and ranking utilities.
//!
//! Pure-Rust implementations of:
//! - Cosine similarity
//! - Scoped similarity search over indexed chunks

use ragline_core::{RetrievedPassage, ScopeFilter};

use crate::index::IndexedChunk;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank chunks from the sources in `scope` by cosine similarity to a query
/// embedding.
///
/// Returns passages sorted by descending similarity with `score` set. Only
/// chunks meeting `min_score` are included. The sort is stable, so equal
/// scores keep insertion order.
pub fn vector_search(
    chunks: &[IndexedChunk],
    query_embedding: &[f32],
    scope: &ScopeFilter,
    limit: usize,
    min_score: f32,
) -> Vec<RetrievedPassage> {
    let mut scored: Vec<(f32, &IndexedChunk)> = chunks
        .iter()
        .filter(|chunk| scope.contains(&chunk.source_id))
        .filter_map(|chunk| {
            let sim = cosine_similarity(&chunk.embedding, query_embedding);
            (sim >= min_score).then_some((sim, chunk))
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
        .into_iter()
        .map(|(score, chunk)| RetrievedPassage::new(&chunk.source_id, &chunk.text, score))
        .collect()
}
