//! Vector similarity and rank fusion utilities.
//!
//! Pure-Rust implementations of:
//! - Cosine similarity
//! - Brute-force similarity ranking over records with embeddings
//! - Reciprocal Rank Fusion (RRF) for merging ranked id lists

use std::collections::HashMap;

use opsclaw_core::memory::{MemoryRecord, SearchFilter};

/// Standard RRF smoothing constant.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length, empty, or the lengths differ.
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

/// Rank records by cosine similarity to a query embedding.
///
/// Only records that carry an embedding and pass `filter` are ranked.
/// Ties keep input order.
pub fn rank_by_similarity<'a, I>(
    records: I,
    query_embedding: &[f32],
    filter: &SearchFilter,
    limit: usize,
) -> Vec<MemoryRecord>
where
    I: IntoIterator<Item = &'a MemoryRecord>,
{
    let mut scored: Vec<(f32, &MemoryRecord)> = records
        .into_iter()
        .filter(|r| filter.admits(r))
        .filter_map(|r| {
            let emb = r.embedding.as_ref()?;
            Some((cosine_similarity(emb, query_embedding), r))
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored.into_iter().map(|(_, r)| r.clone()).collect()
}

/// One fused result.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub id: String,
    pub score: f64,
}

/// Reciprocal Rank Fusion: merge ranked id lists.
///
/// An id at 0-based rank `r` in a list contributes `1 / (k + r + 1)`;
/// contributions are summed across lists. The result is sorted by summed
/// score, descending. Equal scores keep first-seen order, scanning the
/// lists in the order given.
pub fn reciprocal_rank_fusion(lists: &[Vec<String>], k: f64) -> Vec<FusedHit> {
    let mut hits: Vec<FusedHit> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for list in lists {
        for (rank, id) in list.iter().enumerate() {
            let contribution = 1.0 / (k + rank as f64 + 1.0);
            match index.get(id.as_str()) {
                Some(&i) => hits[i].score += contribution,
                None => {
                    index.insert(id.as_str(), hits.len());
                    hits.push(FusedHit {
                        id: id.clone(),
                        score: contribution,
                    });
                }
            }
        }
    }

    // Vec::sort_by is stable, so insertion order breaks ties.
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits
}
