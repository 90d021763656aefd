//! Reciprocal rank fusion of ranked result lists

use crate::store::SearchResult;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Merge ranked lists with reciprocal rank fusion.
///
/// Each chunk scores `Σ 1/(k + rank_i)` over the lists it appears in, with
/// ranks starting at 0. The union is ordered by fused score, ties broken by
/// the best rank any list gave the chunk, then by chunk id so the order is
/// deterministic. The returned results carry the fused score in `similarity`.
pub fn reciprocal_rank_fusion(lists: &[Vec<SearchResult>], k: u32) -> Vec<SearchResult> {
    struct Entry {
        result: SearchResult,
        score: f64,
        best_rank: usize,
    }

    let mut entries: HashMap<Uuid, Entry> = HashMap::new();

    for list in lists {
        for (rank, result) in list.iter().enumerate() {
            let contribution = 1.0 / (k as f64 + rank as f64);
            entries
                .entry(result.chunk_id)
                .and_modify(|entry| {
                    entry.score += contribution;
                    entry.best_rank = entry.best_rank.min(rank);
                })
                .or_insert_with(|| Entry {
                    result: result.clone(),
                    score: contribution,
                    best_rank: rank,
                });
        }
    }

    let mut merged: Vec<Entry> = entries.into_values().collect();
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.best_rank.cmp(&b.best_rank))
            .then_with(|| a.result.chunk_id.cmp(&b.result.chunk_id))
    });

    debug!(
        lists = lists.len(),
        merged = merged.len(),
        "Fused result lists"
    );

    merged
        .into_iter()
        .map(|entry| {
            let mut result = entry.result;
            result.similarity = entry.score;
            result
        })
        .collect()
}
