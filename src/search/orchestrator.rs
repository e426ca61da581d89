use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::backends::{BackendQuery, Backends};
use crate::dispatch::{DispatchLimits, MethodCall, dispatch};
use crate::fusion::{
    LocalityIndex, Method, MethodBucket, RankedList, SlotLists, WeightMap, WeightTable,
    group_by_slice, group_temporal, merge_ranked,
};
use crate::translate::{TranslateError, Translator};

use super::SearchError;
use super::request::{
    Grouping, ImageSearchRequest, MethodFlags, QuerySlot, Route, SearchRequest, route,
};
use super::response::{
    ImageSearchResponse, Mode, QueryResult, SearchOutcome, SearchResponse, TemporalResponse,
    TemporalResult, failure_summary,
};

const TRANSLATE_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);
const MAX_VARIANTS: usize = 3;

/// Weights applied in Image mode before the resolved weights are laid over them.
const IMAGE_MODE_WEIGHTS: [(Method, f64); 7] = [
    (Method::ClipH14, 1.0),
    (Method::ClipBigg14, 1.0),
    (Method::Siglip2, 1.0),
    (Method::Beit3, 0.8),
    (Method::Ocr, 0.8),
    (Method::Gg, 0.6),
    (Method::ImgCap, 0.8),
];

/// Result-count cut-offs per request shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopK {
    pub normal: usize,
    pub single_method: usize,
    pub temporal: usize,
    pub image: usize,
}

impl Default for TopK {
    fn default() -> Self {
        Self {
            normal: 112,
            single_method: 168,
            temporal: 100,
            image: 200,
        }
    }
}

/// Per-request cut-offs: hits asked from each backend and length of fused lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub top_k_each: usize,
    pub top_k_final: usize,
}

impl Limits {
    fn uniform(k: usize) -> Self {
        Self {
            top_k_each: k,
            top_k_final: k,
        }
    }

    /// Temporal requests use the temporal cut-off, single searches with exactly
    /// one active method the single-method one, everything else the normal one.
    pub fn for_request(top_k: &TopK, route: &Route, active_methods: usize) -> Self {
        if route.is_temporal() {
            Self::uniform(top_k.temporal)
        } else if active_methods == 1 {
            Self::uniform(top_k.single_method)
        } else {
            Self::uniform(top_k.normal)
        }
    }
}

pub struct Orchestrator {
    backends: Backends,
    weights: Arc<WeightTable>,
    locality: Arc<LocalityIndex>,
    translator: Option<Arc<dyn Translator>>,
    top_k: TopK,
    dispatch: DispatchLimits,
    permits: Semaphore,
    retry_backoff: Duration,
}

impl Orchestrator {
    pub fn new(backends: Backends, weights: Arc<WeightTable>, locality: Arc<LocalityIndex>) -> Self {
        Self {
            backends,
            weights,
            locality,
            translator: None,
            top_k: TopK::default(),
            dispatch: DispatchLimits::default(),
            permits: Semaphore::new(4),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn with_top_k(mut self, top_k: TopK) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_dispatch_limits(mut self, limits: DispatchLimits) -> Self {
        self.dispatch = limits;
        self
    }

    /// Bound on concurrently running searches.
    pub fn with_max_concurrency(mut self, permits: usize) -> Self {
        self.permits = Semaphore::new(permits.max(1));
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn weights(&self) -> &WeightTable {
        &self.weights
    }

    /// Route a text request and run it.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchOutcome, SearchError> {
        let route = route(request)?;
        let limits = Limits::for_request(&self.top_k, &route, request.active_methods().len());
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SearchError::ShuttingDown)?;

        info!(
            route = route_name(&route),
            top_k = limits.top_k_final,
            "search started"
        );

        let outcome = match route {
            Route::Scene { asr } => SearchOutcome::Single(self.search_scene(&asr, limits).await),
            Route::Image(slot) => {
                SearchOutcome::Single(self.search_image(&slot, request, limits).await.0)
            }
            Route::Temporal(slots) => {
                SearchOutcome::Temporal(self.search_temporal(&slots, request, limits).await?)
            }
        };
        Ok(outcome)
    }

    /// ASR-only search through the `asr` method with weight 1.0.
    pub async fn search_scene(&self, asr: &str, limits: Limits) -> SearchResponse {
        let asr = asr.trim();
        if asr.is_empty() {
            return SearchResponse::failed(Mode::Scene, "ASR text is required");
        }

        let calls = [MethodCall::new(Method::Asr, BackendQuery::text(asr))];
        let outcome = dispatch(&self.backends, &calls, limits.top_k_each, self.dispatch).await;
        let weights = WeightMap::from([(Method::Asr.name().to_string(), 1.0)]);

        assemble(
            Mode::Scene,
            vec![outcome.bucket],
            &weights,
            limits.top_k_final,
            &outcome.failures,
        )
    }

    /// Single-slot search over the slot's enabled methods, fused per query variant
    /// and across variants. Also returns the failed methods by name.
    async fn search_image(
        &self,
        slot: &QuerySlot,
        request: &SearchRequest,
        limits: Limits,
    ) -> (SearchResponse, BTreeMap<String, String>) {
        let flags = slot.flags;
        let ocr = slot.ocr.as_deref();
        let original = slot.query.as_deref();

        let mut active: Vec<&str> = flags.enabled().map(Method::name).collect();
        if ocr.is_some() {
            active.push(Method::Ocr.name());
        }
        let weights = self.image_weights(&active, request.weight_config.as_deref());

        let wants_translation = flags.any_query_method() || ocr.is_some();
        let variants = match original {
            Some(query) if request.use_trans && wants_translation => {
                self.query_variants(query, request.expand).await
            }
            Some(query) => vec![query.to_string()],
            None => vec![String::new()],
        };

        let mut buckets = Vec::with_capacity(variants.len());
        let mut failures = BTreeMap::new();
        for (i, variant) in variants.iter().enumerate() {
            let calls = image_calls(flags, variant, original, ocr, i == 0);
            let outcome = dispatch(&self.backends, &calls, limits.top_k_each, self.dispatch).await;
            buckets.push(outcome.bucket);
            failures.extend(outcome.failures);
        }

        let response = assemble(Mode::Image, buckets, &weights, limits.top_k_final, &failures);
        (response, failures)
    }

    fn image_weights(&self, active: &[&str], config_name: Option<&str>) -> WeightMap {
        let mut weights: WeightMap = IMAGE_MODE_WEIGHTS
            .iter()
            .map(|&(m, w)| (m.name().to_string(), w))
            .collect();
        let resolved = self.weights.resolve(active, config_name);
        if !resolved.is_empty() {
            let (config, _) = self.weights.suggest(active);
            debug!(config = %config, weights = ?resolved, "weight configuration selected");
            weights.extend(resolved);
        }
        weights
    }

    /// Each slot runs as its own single search, then slot lists are matched
    /// into ordered tuples.
    async fn search_temporal(
        &self,
        slots: &[QuerySlot],
        request: &SearchRequest,
        limits: Limits,
    ) -> Result<TemporalResponse, SearchError> {
        let responses =
            join_all(slots.iter().map(|slot| self.search_image(slot, request, limits))).await;

        let mut failures = BTreeMap::new();
        for (i, (_, slot_failures)) in responses.iter().enumerate() {
            for (name, reason) in slot_failures {
                failures.insert(format!("q{i}.{name}"), reason.clone());
            }
        }

        let lists: Vec<SlotLists> = responses.iter().map(|(r, _)| r.slot_lists()).collect();
        let result = self.group(&lists, request.grouping)?;

        Ok(TemporalResponse {
            mode: Mode::Temporal,
            result,
            error: failure_summary(&failures),
        })
    }

    fn group(&self, lists: &[SlotLists], grouping: Grouping) -> Result<TemporalResult, SearchError> {
        let result = match grouping {
            Grouping::Flat => {
                let fused: Vec<&[_]> = lists.iter().map(|l| l.fused.as_slice()).collect();
                TemporalResult::Flat {
                    objects: group_temporal(&fused, &self.locality)?,
                }
            }
            Grouping::PerGroup => {
                TemporalResult::Grouped(group_by_slice(lists, &self.locality)?)
            }
        };
        Ok(result)
    }

    /// Query-by-image. One image returns its ranked hits; 2–3 images are searched
    /// one by one and matched into ordered tuples.
    pub async fn search_by_image(
        &self,
        request: &ImageSearchRequest,
    ) -> Result<SearchOutcome, SearchError> {
        let n = request.images.len();
        if !(1..=3).contains(&n) {
            return Err(SearchError::InvalidRequest(format!(
                "image search takes 1 to 3 images, got {n}"
            )));
        }
        let top_k = request.top_k.unwrap_or(self.top_k.image);
        let method = request.model.method();
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SearchError::ShuttingDown)?;

        info!(images = n, method = %method, top_k, "image search started");

        let searches = request.images.iter().map(|image| async move {
            let calls = [MethodCall::new(method, BackendQuery::Image(image.clone()))];
            dispatch(&self.backends, &calls, top_k, self.dispatch).await
        });
        let outcomes = join_all(searches).await;

        let mut failures = BTreeMap::new();
        let mut results: Vec<RankedList> = Vec::with_capacity(n);
        for (i, mut outcome) in outcomes.into_iter().enumerate() {
            for (name, reason) in outcome.failures {
                let key = if n == 1 { name } else { format!("q{i}.{name}") };
                failures.insert(key, reason);
            }
            results.push(outcome.bucket.remove(method.name()).unwrap_or_default());
        }

        if n == 1 {
            let image_search = results.pop().unwrap_or_default();
            return Ok(SearchOutcome::Image(ImageSearchResponse {
                mode: Mode::ImageSearch,
                image_search,
                error: failure_summary(&failures),
            }));
        }

        let lists: Vec<SlotLists> = results
            .into_iter()
            .map(|list| SlotLists {
                variants: vec![list.clone()],
                per_method: MethodBucket::new(),
                fused: list,
            })
            .collect();
        Ok(SearchOutcome::Temporal(TemporalResponse {
            mode: Mode::TemporalImageSearch,
            result: self.group(&lists, request.grouping)?,
            error: failure_summary(&failures),
        }))
    }

    /// The translated query, followed by expansions when requested.
    async fn query_variants(&self, query: &str, expand: bool) -> Vec<String> {
        let base = self.translate_with_retry(query).await;
        let mut variants = vec![base];
        if !expand {
            return variants;
        }
        let Some(translator) = &self.translator else {
            return variants;
        };
        match translator.expand(&variants[0]).await {
            Ok(extra) => {
                for v in extra {
                    let v = v.trim();
                    if variants.len() < MAX_VARIANTS
                        && !v.is_empty()
                        && !variants.iter().any(|known| known == v)
                    {
                        variants.push(v.to_string());
                    }
                }
            }
            Err(e) => warn!(error = %e, "query expansion failed, using the base query only"),
        }
        variants
    }

    /// Up to three translation attempts; the original query is used when all fail.
    async fn translate_with_retry(&self, query: &str) -> String {
        let Some(translator) = &self.translator else {
            debug!("no translator configured, using the original query");
            return query.to_string();
        };

        for attempt in 0..TRANSLATE_ATTEMPTS {
            match translator.translate(query).await {
                Ok(text) if !text.trim().is_empty() => {
                    debug!(attempt = attempt + 1, "query translated");
                    return text.trim().to_string();
                }
                Ok(_) => warn!(attempt = attempt + 1, "empty translation"),
                Err(e @ (TranslateError::AllKeysExhausted | TranslateError::NoKeys)) => {
                    warn!(error = %e, "translation unavailable");
                    break;
                }
                Err(e) => warn!(attempt = attempt + 1, error = %e, "translation failed"),
            }
            if attempt + 1 < TRANSLATE_ATTEMPTS {
                tokio::time::sleep(jittered_backoff(attempt, self.retry_backoff)).await;
            }
        }

        warn!("using the original query");
        query.to_string()
    }
}

fn route_name(route: &Route) -> &'static str {
    match route {
        Route::Scene { .. } => "scene",
        Route::Image(_) => "image",
        Route::Temporal(_) => "temporal",
    }
}

/// Method calls for one query variant.
///
/// The web method always receives the untranslated query and OCR receives the
/// OCR text; both only run with the first variant since their input does not vary.
fn image_calls(
    flags: MethodFlags,
    variant: &str,
    original: Option<&str>,
    ocr: Option<&str>,
    first_variant: bool,
) -> Vec<MethodCall> {
    let has_query = !variant.is_empty();
    let mut calls: Vec<MethodCall> = flags
        .query_methods()
        .into_iter()
        .map(|(method, on)| {
            MethodCall::new(method, BackendQuery::text(variant)).enabled(on && has_query)
        })
        .collect();

    calls.push(
        MethodCall::new(Method::Ocr, BackendQuery::text(ocr.unwrap_or_default()))
            .enabled(first_variant && ocr.is_some()),
    );
    calls.push(
        MethodCall::new(Method::Gg, BackendQuery::text(original.unwrap_or_default()))
            .enabled(first_variant && flags.gg && original.is_some()),
    );
    calls
}

/// Build the response from per-variant buckets: per-variant fusion, per-method
/// fusion across variants and one list fusing every method of every variant.
fn assemble(
    mode: Mode,
    buckets: Vec<MethodBucket>,
    weights: &WeightMap,
    top_k: usize,
    failures: &BTreeMap<String, String>,
) -> SearchResponse {
    let mut combined = MethodBucket::new();
    for bucket in &buckets {
        for (method, list) in bucket {
            combined.entry(method.clone()).or_default().extend_from_slice(list);
        }
    }

    let per_method = combined
        .iter()
        .map(|(method, list)| {
            let weight = weights.get(method).copied().unwrap_or(1.0);
            let only = WeightMap::from([(method.clone(), weight)]);
            (method.clone(), merge_ranked([(method, list)], &only, top_k))
        })
        .collect();

    let fused = merge_ranked(&combined, weights, top_k);

    let per_query = buckets
        .into_iter()
        .enumerate()
        .map(|(i, bucket)| {
            let ensemble_all_methods = merge_ranked(&bucket, weights, top_k);
            (
                format!("query_{i}"),
                QueryResult {
                    per_method: bucket,
                    ensemble_all_methods,
                },
            )
        })
        .collect();

    SearchResponse {
        mode,
        per_query,
        ensemble_per_method_across_queries: per_method,
        ensemble_all_queries_all_methods: fused,
        error: failure_summary(failures),
    }
}

/// Equal jitter backoff: base/2 + rand(0, base/2), base doubling per attempt.
fn jittered_backoff(attempt: u32, initial: Duration) -> Duration {
    let base = initial.as_millis() as u64 * 2u64.pow(attempt);
    let half = base / 2;
    Duration::from_millis(half + fastrand::u64(..half.max(1)))
}
