//! Fan one query slot out to its enabled retrieval methods.
//!
//! Each method runs under a timeout and a panic guard, so one misbehaving
//! backend only removes its own entry from the bucket. Results are keyed in a
//! `BTreeMap`, which makes the bucket independent of completion order.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::backends::{BackendError, BackendQuery, Backends, SearchBackend};
use crate::fusion::{Method, MethodBucket, RankedList};

pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct MethodCall {
    pub method: Method,
    pub enabled: bool,
    pub query: BackendQuery,
}

impl MethodCall {
    pub fn new(method: Method, query: BackendQuery) -> Self {
        Self {
            method,
            enabled: true,
            query,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchLimits {
    /// Upper bound on concurrently running methods. `<= 1` runs them one by one.
    pub workers: usize,
    pub timeout: Duration,
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// Methods that returned at least one hit.
    pub bucket: MethodBucket,
    /// Method name → failure reason.
    pub failures: BTreeMap<String, String>,
}

impl DispatchOutcome {
    fn record(&mut self, method: Method, result: Result<RankedList, BackendError>) {
        match result {
            Ok(list) if list.is_empty() => debug!(method = %method, "no hits"),
            Ok(list) => {
                debug!(method = %method, hits = list.len(), "method complete");
                self.bucket.insert(method.name().to_string(), list);
            }
            Err(e) => {
                warn!(method = %method, error = %e, "method failed, omitting from results");
                self.failures.insert(method.name().to_string(), e.to_string());
            }
        }
    }
}

/// Run every enabled call against its backend and collect the non-empty results.
///
/// Calls whose method has no configured backend are skipped as "no data".
/// Failures, timeouts and panics land in [`DispatchOutcome::failures`] and never
/// affect sibling calls.
pub async fn dispatch(
    backends: &Backends,
    calls: &[MethodCall],
    top_k: usize,
    limits: DispatchLimits,
) -> DispatchOutcome {
    let jobs: Vec<BoxFuture<'static, (Method, Result<RankedList, BackendError>)>> = calls
        .iter()
        .filter(|c| c.enabled)
        .filter_map(|c| match backends.get(&c.method) {
            Some(backend) => Some(guarded_job(
                c.method,
                Arc::clone(backend),
                c.query.clone(),
                top_k,
                limits.timeout,
            )),
            None => {
                debug!(method = %c.method, "no backend configured, skipping");
                None
            }
        })
        .collect();

    let mut outcome = DispatchOutcome::default();
    if jobs.is_empty() {
        return outcome;
    }

    let budget = jobs.len().min(limits.workers);

    let results: Vec<(Method, Result<RankedList, BackendError>)> = if budget <= 1 {
        let mut results = Vec::with_capacity(jobs.len());
        for job in jobs {
            results.push(job.await);
        }
        results
    } else {
        stream::iter(jobs).buffer_unordered(budget).collect().await
    };

    for (method, result) in results {
        outcome.record(method, result);
    }
    outcome
}

fn guarded_job(
    method: Method,
    backend: Arc<dyn SearchBackend>,
    query: BackendQuery,
    top_k: usize,
    timeout: Duration,
) -> BoxFuture<'static, (Method, Result<RankedList, BackendError>)> {
    async move {
        let result = run_guarded(backend.as_ref(), &query, top_k, timeout).await;
        (method, result)
    }
    .boxed()
}

async fn run_guarded(
    backend: &dyn SearchBackend,
    query: &BackendQuery,
    top_k: usize,
    timeout: Duration,
) -> Result<RankedList, BackendError> {
    let call = AssertUnwindSafe(backend.search(query, top_k)).catch_unwind();
    match tokio::time::timeout(timeout, call).await {
        Err(_) => Err(BackendError::Timeout(timeout)),
        Ok(Err(payload)) => Err(BackendError::Panicked(panic_message(payload.as_ref()))),
        Ok(Ok(result)) => result,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
