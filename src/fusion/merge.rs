//! Weighted rank fusion across method buckets (and across query slots).

use std::collections::HashMap;

use super::types::{RankedList, ScoredId, WeightMap};

/// Merge weighted ranked lists into one list of at most `top_k` entries.
///
/// `score(id) = Σ weight(method) * score(id in method)` over every list containing `id`;
/// methods absent from `weights` weigh 1.0 and empty lists are skipped.
///
/// Ties keep the order in which ids were first accumulated while walking `buckets`
/// in iteration order, so callers must pass an ordered iterator (a `MethodBucket`
/// walks in method-name order).
pub fn merge_ranked<'a, I>(buckets: I, weights: &WeightMap, top_k: usize) -> RankedList
where
    I: IntoIterator<Item = (&'a String, &'a RankedList)>,
{
    if top_k == 0 {
        return Vec::new();
    }

    let mut merged: RankedList = Vec::new();
    let mut slot_of: HashMap<i64, usize> = HashMap::new();

    for (method, items) in buckets {
        if items.is_empty() {
            continue;
        }
        let weight = weights.get(method).copied().unwrap_or(1.0);
        for item in items {
            let slot = *slot_of.entry(item.id).or_insert_with(|| {
                merged.push(ScoredId::new(item.id, 0.0));
                merged.len() - 1
            });
            merged[slot].score += weight * item.score;
        }
    }

    // `sort_by` is stable: equal scores stay in discovery order.
    merged.sort_by(|a, b| b.score.total_cmp(&a.score));
    merged.truncate(top_k);
    merged
}
