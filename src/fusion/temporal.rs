//! Ordered multi-query ("temporal") matching.
//!
//! Keyframe ids stand in for capture order: a tuple `(a, b[, c])` is valid when
//! `a.id < b.id < c.id` and, while the locality index is available, every element
//! comes from the same source video as `a`. Tuples are ranked by the sum of their
//! element scores, ties in discovery order.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::locality::LocalityIndex;
use super::types::{MethodBucket, RankedList, ScoredId};

/// Number of query-variant groups always present in the grouped form.
pub const VARIANT_GROUPS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("temporal grouping needs 2 or 3 query slots, got {0}")]
    InvalidSlotCount(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemporalTuple {
    pub items: Vec<ScoredId>,
    pub score: f64,
}

impl TemporalTuple {
    fn new(items: Vec<ScoredId>) -> Self {
        let score = items.iter().map(|s| s.score).sum();
        Self { items, score }
    }
}

/// Every ordered, same-source tuple across `slots`, best aggregate score first.
///
/// # Errors
///
/// [`GroupError::InvalidSlotCount`] unless there are exactly 2 or 3 slots.
pub fn group_temporal(
    slots: &[&[ScoredId]],
    locality: &LocalityIndex,
) -> Result<Vec<TemporalTuple>, GroupError> {
    let n = slots.len();
    if !(2..=3).contains(&n) {
        return Err(GroupError::InvalidSlotCount(n));
    }

    let check_locality = locality.is_available();
    let mut tuples = Vec::new();

    for &a in slots[0] {
        let source = locality.lookup(a.id);
        if check_locality && source.is_none() {
            continue;
        }
        let same_source = |id: i64| !check_locality || locality.lookup(id) == source;

        for &b in slots[1].iter().filter(|b| b.id > a.id && same_source(b.id)) {
            if n == 2 {
                tuples.push(TemporalTuple::new(vec![a, b]));
                continue;
            }
            for &c in slots[2].iter().filter(|c| c.id > b.id && same_source(c.id)) {
                tuples.push(TemporalTuple::new(vec![a, b, c]));
            }
        }
    }

    tuples.sort_by(|x, y| y.score.total_cmp(&x.score));
    Ok(tuples)
}

/// What one temporal slot contributes to the grouped form.
#[derive(Debug, Clone, Default)]
pub struct SlotLists {
    /// Fused list per query variant, in variant order.
    pub variants: Vec<RankedList>,
    /// Per-method lists, already merged across variants.
    pub per_method: MethodBucket,
    /// Every method of every variant fused into one list.
    pub fused: RankedList,
}

/// Run [`group_temporal`] independently over each slice of the slot results.
///
/// Groups: `ensemble_qx_{i}` pairs the i-th query variant of every slot,
/// `ensemble_qx_x` pairs the fully fused lists, and one group per method name
/// pairs that method's lists. Slots missing a slice contribute an empty list.
pub fn group_by_slice(
    slots: &[SlotLists],
    locality: &LocalityIndex,
) -> Result<BTreeMap<String, Vec<TemporalTuple>>, GroupError> {
    let n = slots.len();
    if !(2..=3).contains(&n) {
        return Err(GroupError::InvalidSlotCount(n));
    }

    let mut groups = BTreeMap::new();

    for i in 0..VARIANT_GROUPS {
        let lists: Vec<&[ScoredId]> = slots
            .iter()
            .map(|s| s.variants.get(i).map(Vec::as_slice).unwrap_or_default())
            .collect();
        groups.insert(format!("ensemble_qx_{i}"), group_temporal(&lists, locality)?);
    }

    let fused: Vec<&[ScoredId]> = slots.iter().map(|s| s.fused.as_slice()).collect();
    groups.insert("ensemble_qx_x".to_string(), group_temporal(&fused, locality)?);

    let methods: BTreeSet<&String> = slots.iter().flat_map(|s| s.per_method.keys()).collect();
    for method in methods {
        let lists: Vec<&[ScoredId]> = slots
            .iter()
            .map(|s| s.per_method.get(method).map(Vec::as_slice).unwrap_or_default())
            .collect();
        groups.insert(method.clone(), group_temporal(&lists, locality)?);
    }

    Ok(groups)
}
