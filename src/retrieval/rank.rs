//! Reranking: cosine similarity, greedy MMR, near-duplicate removal.

use std::sync::Arc;

use super::chunk::Chunk;

/// Cosine similarity between two vectors. Zero when either is empty or
/// zero-length.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Greedy Maximal Marginal Relevance selection.
///
/// Seeds with the highest-scored candidate, then repeatedly picks the
/// candidate maximizing `λ·relevance + (1−λ)·diversity`, where diversity is
/// one minus the maximum cosine similarity to anything already selected.
/// Stops after `top_k` selections.
#[must_use]
pub fn mmr_select(
    candidates: &[(Arc<Chunk>, f64)],
    lambda: f32,
    top_k: usize,
) -> Vec<Arc<Chunk>> {
    let mut selected: Vec<Arc<Chunk>> = Vec::new();
    let mut remaining: Vec<(Arc<Chunk>, f64)> = candidates.to_vec();

    while !remaining.is_empty() && selected.len() < top_k {
        let best_idx = if selected.is_empty() {
            0
        } else {
            let mut best_idx = 0;
            let mut best_score = f64::NEG_INFINITY;
            for (idx, (chunk, relevance)) in remaining.iter().enumerate() {
                let max_sim = selected
                    .iter()
                    .map(|s| cosine_similarity(&chunk.embedding, &s.embedding))
                    .fold(0.0f32, f32::max);
                let diversity = f64::from(1.0 - max_sim);
                let mmr = f64::from(lambda) * relevance + f64::from(1.0 - lambda) * diversity;
                if mmr > best_score {
                    best_score = mmr;
                    best_idx = idx;
                }
            }
            best_idx
        };
        selected.push(remaining.remove(best_idx).0);
    }

    selected
}

/// Drops chunks whose cosine similarity to any retained chunk exceeds the
/// threshold, preserving order.
#[must_use]
pub fn drop_near_duplicates(chunks: Vec<Arc<Chunk>>, threshold: f32) -> Vec<Arc<Chunk>> {
    let mut kept: Vec<Arc<Chunk>> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let duplicate = kept
            .iter()
            .any(|k| cosine_similarity(&chunk.embedding, &k.embedding) > threshold);
        if !duplicate {
            kept.push(chunk);
        }
    }
    kept
}
