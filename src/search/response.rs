use std::collections::BTreeMap;

use serde::Serialize;

use crate::fusion::{MethodBucket, RankedList, SlotLists, TemporalTuple};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mode {
    Image,
    Scene,
    Temporal,
    ImageSearch,
    TemporalImageSearch,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub per_method: MethodBucket,
    pub ensemble_all_methods: RankedList,
}

/// Result of a single-slot (Image or Scene) search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub mode: Mode,
    /// `query_{i}` per query variant.
    pub per_query: BTreeMap<String, QueryResult>,
    pub ensemble_per_method_across_queries: MethodBucket,
    pub ensemble_all_queries_all_methods: RankedList,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchResponse {
    pub fn failed(mode: Mode, error: impl Into<String>) -> Self {
        Self {
            mode,
            per_query: BTreeMap::new(),
            ensemble_per_method_across_queries: MethodBucket::new(),
            ensemble_all_queries_all_methods: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// The lists this slot contributes to temporal grouping.
    pub fn slot_lists(&self) -> SlotLists {
        SlotLists {
            variants: self
                .per_query
                .values()
                .map(|q| q.ensemble_all_methods.clone())
                .collect(),
            per_method: self.ensemble_per_method_across_queries.clone(),
            fused: self.ensemble_all_queries_all_methods.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TemporalResult {
    Flat {
        objects: Vec<TemporalTuple>,
    },
    /// Serialized inline: each group name is a top-level key of the response.
    Grouped(BTreeMap<String, Vec<TemporalTuple>>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemporalResponse {
    pub mode: Mode,
    #[serde(flatten)]
    pub result: TemporalResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageSearchResponse {
    pub mode: Mode,
    pub image_search: RankedList,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SearchOutcome {
    Single(SearchResponse),
    Temporal(TemporalResponse),
    Image(ImageSearchResponse),
}

impl SearchOutcome {
    pub fn mode(&self) -> Mode {
        match self {
            SearchOutcome::Single(r) => r.mode,
            SearchOutcome::Temporal(r) => r.mode,
            SearchOutcome::Image(r) => r.mode,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            SearchOutcome::Single(r) => r.error.as_deref(),
            SearchOutcome::Temporal(r) => r.error.as_deref(),
            SearchOutcome::Image(r) => r.error.as_deref(),
        }
    }
}

/// `"name: reason; name: reason"`, or `None` when nothing failed.
pub fn failure_summary(failures: &BTreeMap<String, String>) -> Option<String> {
    if failures.is_empty() {
        return None;
    }
    Some(
        failures
            .iter()
            .map(|(name, reason)| format!("{name}: {reason}"))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::ScoredId;
    use serde_json::json;

    #[test]
    fn failed_response_serializes_error() {
        let v = serde_json::to_value(SearchResponse::failed(Mode::Scene, "ASR text is required"))
            .unwrap();
        assert_eq!(v["mode"], "Scene");
        assert_eq!(v["error"], "ASR text is required");
    }

    #[test]
    fn flat_temporal_serializes_objects_inline() {
        let resp = TemporalResponse {
            mode: Mode::Temporal,
            result: TemporalResult::Flat { objects: vec![] },
            error: None,
        };
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"mode": "Temporal", "objects": []})
        );
    }

    #[test]
    fn grouped_temporal_serializes_groups_at_top_level() {
        let resp = TemporalResponse {
            mode: Mode::Temporal,
            result: TemporalResult::Grouped(BTreeMap::from([
                ("ensemble_qx_x".to_string(), vec![]),
                ("ocr".to_string(), vec![]),
            ])),
            error: None,
        };
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"mode": "Temporal", "ensemble_qx_x": [], "ocr": []})
        );
    }

    #[test]
    fn image_search_response_shape() {
        let resp = ImageSearchResponse {
            mode: Mode::ImageSearch,
            image_search: vec![ScoredId::new(3, 0.5)],
            error: None,
        };
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"mode": "ImageSearch", "image_search": [{"id": 3, "score": 0.5}]})
        );
    }

    #[test]
    fn summary_joins_in_name_order() {
        let failures = BTreeMap::from([
            ("ocr".to_string(), "timed out after 1s".to_string()),
            ("beit3".to_string(), "backend returned status 500: x".to_string()),
        ]);
        assert_eq!(
            failure_summary(&failures).as_deref(),
            Some("beit3: backend returned status 500: x; ocr: timed out after 1s")
        );
        assert_eq!(failure_summary(&BTreeMap::new()), None);
    }

    #[test]
    fn slot_lists_follow_variant_order() {
        let mut per_query = BTreeMap::new();
        per_query.insert(
            "query_1".to_string(),
            QueryResult {
                per_method: MethodBucket::new(),
                ensemble_all_methods: vec![ScoredId::new(2, 0.2)],
            },
        );
        per_query.insert(
            "query_0".to_string(),
            QueryResult {
                per_method: MethodBucket::new(),
                ensemble_all_methods: vec![ScoredId::new(1, 0.1)],
            },
        );
        let resp = SearchResponse {
            mode: Mode::Image,
            per_query,
            ensemble_per_method_across_queries: MethodBucket::new(),
            ensemble_all_queries_all_methods: vec![ScoredId::new(9, 0.9)],
            error: None,
        };
        let lists = resp.slot_lists();
        assert_eq!(lists.variants[0], vec![ScoredId::new(1, 0.1)]);
        assert_eq!(lists.variants[1], vec![ScoredId::new(2, 0.2)]);
        assert_eq!(lists.fused, vec![ScoredId::new(9, 0.9)]);
    }
}
