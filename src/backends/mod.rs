//! Retrieval backend boundary.
//!
//! Every backend is a black box taking text or an image and returning ranked
//! `(id, score)` hits. Adapters convert their payloads into [`ScoredId`] at this
//! boundary so the fusion core never inspects backend-specific shapes.

pub mod http;
#[cfg(test)]
pub(crate) mod mock;

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::fusion::{Method, RankedList, ScoredId};

pub use http::HttpBackend;

#[derive(Debug, Clone)]
pub enum ImageInput {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub enum BackendQuery {
    Text(String),
    Image(ImageInput),
}

impl BackendQuery {
    pub fn text(query: impl Into<String>) -> Self {
        BackendQuery::Text(query.into())
    }
}

/// Failure of one backend call. Zero hits is `Ok(vec![])`, never an error.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend returned status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid backend response: {0}")]
    Decode(String),

    #[error("timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),

    #[error("backend panicked: {0}")]
    Panicked(String),

    #[error("unsupported query: {0}")]
    Unsupported(String),
}

/// One retrieval method's search collaborator.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &BackendQuery, top_k: usize) -> Result<RankedList, BackendError>;
}

/// Configured backend per method. Methods without an entry are treated as "no data".
pub type Backends = BTreeMap<Method, Arc<dyn SearchBackend>>;

/// Convert raw backend hits (`{"id": .., "score": ..}`) into a [`RankedList`].
///
/// Hits without an integer id are dropped, a missing, non-numeric, non-finite or
/// negative score becomes 0.0, and repeated ids keep their first (best-ranked)
/// occurrence.
pub fn normalize_hits(raw: &[Value]) -> RankedList {
    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(|hit| {
            let id = parse_id(hit.get("id")?)?;
            let score = hit.get("score").and_then(parse_score).unwrap_or(0.0);
            Some(ScoredId::new(id, score))
        })
        .filter(|s| seen.insert(s.id))
        .collect()
}

fn parse_id(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_score(v: &Value) -> Option<f64> {
    let score = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    score.filter(|s| s.is_finite() && *s >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::{MethodBucket, WeightMap, merge_ranked};
    use serde_json::json;

    #[test]
    fn normalize_keeps_valid_hits_in_order() {
        let raw = vec![
            json!({"id": 3, "score": 0.9}),
            json!({"id": "7", "score": "0.5"}),
            json!({"id": 8}),
        ];
        assert_eq!(
            normalize_hits(&raw),
            vec![
                ScoredId::new(3, 0.9),
                ScoredId::new(7, 0.5),
                ScoredId::new(8, 0.0)
            ]
        );
    }

    #[test]
    fn normalize_drops_missing_or_bad_ids() {
        let raw = vec![
            json!({"score": 0.9}),
            json!({"id": "frame-1", "score": 0.5}),
            json!({"id": null, "score": 0.5}),
            json!({"id": 1.5, "score": 0.5}),
            json!({"id": 2, "score": "n/a"}),
        ];
        assert_eq!(normalize_hits(&raw), vec![ScoredId::new(2, 0.0)]);
    }

    #[test]
    fn normalize_zeroes_non_finite_and_negative_scores() {
        let raw = vec![
            json!({"id": 1, "score": 0.99}),
            json!({"id": 2, "score": "NaN"}),
            json!({"id": 3, "score": "inf"}),
            json!({"id": 4, "score": "-inf"}),
            json!({"id": 5, "score": -1}),
        ];
        let hits = normalize_hits(&raw);
        assert_eq!(hits[0], ScoredId::new(1, 0.99));
        assert!(hits[1..].iter().all(|s| s.score == 0.0), "got {hits:?}");

        let bucket = MethodBucket::from([("clip_h14".to_string(), hits)]);
        let merged = merge_ranked(&bucket, &WeightMap::new(), 10);
        assert_eq!(merged[0].id, 1);
    }

    #[test]
    fn normalize_keeps_first_occurrence_of_repeated_id() {
        let raw = vec![json!({"id": 4, "score": 0.8}), json!({"id": 4, "score": 0.1})];
        assert_eq!(normalize_hits(&raw), vec![ScoredId::new(4, 0.8)]);
    }

    #[test]
    fn timeout_error_mentions_duration() {
        let err = BackendError::Timeout(Duration::from_secs(2));
        assert_eq!(err.to_string(), "timed out after 2s");
    }
}
