//! Scripted backends for orchestration tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{BackendError, BackendQuery, SearchBackend};
use crate::fusion::{RankedList, ScoredId};

enum Behavior {
    Hits(RankedList),
    Fail,
    Panic,
    Slow(Duration, RankedList),
}

pub(crate) struct MockBackend {
    behavior: Behavior,
    queries: Mutex<Vec<String>>,
}

impl MockBackend {
    fn with(behavior: Behavior) -> Self {
        Self {
            behavior,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn hits(items: &[(i64, f64)]) -> Self {
        Self::with(Behavior::Hits(to_list(items)))
    }

    pub(crate) fn empty() -> Self {
        Self::with(Behavior::Hits(Vec::new()))
    }

    pub(crate) fn failing() -> Self {
        Self::with(Behavior::Fail)
    }

    pub(crate) fn panicking() -> Self {
        Self::with(Behavior::Panic)
    }

    pub(crate) fn slow(delay: Duration, items: &[(i64, f64)]) -> Self {
        Self::with(Behavior::Slow(delay, to_list(items)))
    }

    /// Text of every query received; image queries are recorded as `<image>`.
    pub(crate) fn captured_queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

fn to_list(items: &[(i64, f64)]) -> RankedList {
    items.iter().map(|&(id, s)| ScoredId::new(id, s)).collect()
}

#[async_trait]
impl SearchBackend for MockBackend {
    async fn search(&self, query: &BackendQuery, top_k: usize) -> Result<RankedList, BackendError> {
        let text = match query {
            BackendQuery::Text(t) => t.clone(),
            BackendQuery::Image(_) => "<image>".to_string(),
        };
        self.queries.lock().unwrap().push(text);

        match &self.behavior {
            Behavior::Hits(list) => Ok(list.iter().take(top_k).copied().collect()),
            Behavior::Fail => Err(BackendError::Status {
                code: 503,
                message: "unavailable".into(),
            }),
            Behavior::Panic => panic!("backend exploded"),
            Behavior::Slow(delay, list) => {
                tokio::time::sleep(*delay).await;
                Ok(list.iter().take(top_k).copied().collect())
            }
        }
    }
}
