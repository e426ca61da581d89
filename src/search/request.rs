use std::collections::BTreeSet;

use crate::backends::ImageInput;
use crate::fusion::Method;

use super::SearchError;

/// Upper bound on query slots in one request.
pub const MAX_SLOTS: usize = 3;

/// Visual and web methods a slot can switch on. OCR is implied by OCR text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodFlags {
    pub clip_h14: bool,
    pub clip_bigg14: bool,
    pub beit3: bool,
    pub siglip2: bool,
    pub img_cap: bool,
    pub gg: bool,
}

impl MethodFlags {
    /// Methods fed with the (possibly translated) query text.
    pub fn query_methods(self) -> [(Method, bool); 5] {
        [
            (Method::ClipH14, self.clip_h14),
            (Method::ClipBigg14, self.clip_bigg14),
            (Method::Beit3, self.beit3),
            (Method::Siglip2, self.siglip2),
            (Method::ImgCap, self.img_cap),
        ]
    }

    pub fn enabled(self) -> impl Iterator<Item = Method> {
        self.query_methods()
            .into_iter()
            .chain([(Method::Gg, self.gg)])
            .filter_map(|(m, on)| on.then_some(m))
    }

    pub fn any_query_method(self) -> bool {
        self.query_methods().iter().any(|&(_, on)| on)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySlot {
    pub query: Option<String>,
    pub ocr: Option<String>,
    pub flags: MethodFlags,
}

/// Shape of temporal results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Grouping {
    /// One tuple list built from each slot's fully fused list.
    Flat,
    /// Named tuple groups per query variant, per method and for the fused lists.
    #[default]
    PerGroup,
}

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    /// Ordered query slots; blank texts are already normalized to `None`.
    pub slots: Vec<QuerySlot>,
    pub asr: Option<String>,
    pub use_trans: bool,
    /// Add paraphrased and context-augmented variants of each query.
    pub expand: bool,
    pub weight_config: Option<String>,
    pub grouping: Grouping,
}

impl SearchRequest {
    /// Distinct method names switched on anywhere in the request.
    pub fn active_methods(&self) -> BTreeSet<Method> {
        let mut active: BTreeSet<Method> = self.slots.iter().flat_map(|s| s.flags.enabled()).collect();
        if self.slots.iter().any(|s| s.ocr.is_some()) {
            active.insert(Method::Ocr);
        }
        if self.asr.is_some() {
            active.insert(Method::Asr);
        }
        active
    }
}

/// Where a request is sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Scene { asr: String },
    /// One query slot through the text/image fusion path.
    Image(QuerySlot),
    /// 2–3 slots matched into ordered tuples.
    Temporal(Vec<QuerySlot>),
}

impl Route {
    pub fn is_temporal(&self) -> bool {
        matches!(self, Route::Temporal(_))
    }
}

/// Decide the search mode for `request`.
///
/// ASR text wins. A lone OCR text with no query is an OCR-only search, a lone
/// query is a single search using its own slot's flags and OCR, and anything
/// else is temporal. Temporal slots keep the flags of their original position.
pub fn route(request: &SearchRequest) -> Result<Route, SearchError> {
    if request.slots.len() > MAX_SLOTS {
        return Err(SearchError::InvalidRequest(format!(
            "at most {MAX_SLOTS} query slots are supported, got {}",
            request.slots.len()
        )));
    }

    if let Some(asr) = &request.asr {
        return Ok(Route::Scene { asr: asr.clone() });
    }

    let with_query: Vec<&QuerySlot> = request.slots.iter().filter(|s| s.query.is_some()).collect();
    let ocr_texts: Vec<&String> = request.slots.iter().filter_map(|s| s.ocr.as_ref()).collect();

    if with_query.is_empty() {
        return match ocr_texts.len() {
            0 => Err(SearchError::InvalidRequest(
                "request has no query, OCR or ASR text".into(),
            )),
            1 => Ok(Route::Image(ocr_only(ocr_texts[0]))),
            _ => Ok(Route::Temporal(
                ocr_texts.into_iter().map(|t| ocr_only(t)).collect(),
            )),
        };
    }

    if with_query.len() == 1 {
        return Ok(Route::Image(with_query[0].clone()));
    }

    Ok(Route::Temporal(with_query.into_iter().cloned().collect()))
}

fn ocr_only(text: &str) -> QuerySlot {
    QuerySlot {
        query: None,
        ocr: Some(text.to_string()),
        flags: MethodFlags::default(),
    }
}

/// Visual model used for query-by-image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImageModel {
    #[default]
    Siglip2,
    ClipH14,
}

impl ImageModel {
    pub fn method(self) -> Method {
        match self {
            ImageModel::Siglip2 => Method::Siglip2,
            ImageModel::ClipH14 => Method::ClipH14,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageSearchRequest {
    /// One image for a plain search, 2–3 for a temporal image search.
    pub images: Vec<ImageInput>,
    pub model: ImageModel,
    pub top_k: Option<usize>,
    pub grouping: Grouping,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(query: Option<&str>, ocr: Option<&str>) -> QuerySlot {
        QuerySlot {
            query: query.map(str::to_string),
            ocr: ocr.map(str::to_string),
            flags: MethodFlags::default(),
        }
    }

    fn request(slots: Vec<QuerySlot>) -> SearchRequest {
        SearchRequest {
            slots,
            ..Default::default()
        }
    }

    #[test]
    fn asr_routes_to_scene() {
        let mut req = request(vec![slot(Some("a dog"), None)]);
        req.asr = Some("hello world".into());
        assert_eq!(
            route(&req).unwrap(),
            Route::Scene {
                asr: "hello world".into()
            }
        );
    }

    #[test]
    fn single_ocr_without_query_is_ocr_only() {
        let req = request(vec![slot(None, None), slot(None, Some("EXIT"))]);
        assert_eq!(route(&req).unwrap(), Route::Image(slot(None, Some("EXIT"))));
    }

    #[test]
    fn single_query_keeps_its_slot() {
        let mut second = slot(Some("a boat"), Some("SALE"));
        second.flags.clip_h14 = true;
        let req = request(vec![slot(None, Some("ignored")), second.clone()]);
        assert_eq!(route(&req).unwrap(), Route::Image(second));
    }

    #[test]
    fn several_queries_are_temporal_with_own_flags() {
        let mut a = slot(Some("sunrise"), None);
        a.flags.siglip2 = true;
        let mut c = slot(Some("sunset"), None);
        c.flags.beit3 = true;
        let req = request(vec![a.clone(), slot(None, None), c.clone()]);

        let route = route(&req).unwrap();
        assert!(route.is_temporal());
        assert_eq!(route, Route::Temporal(vec![a, c]));
    }

    #[test]
    fn several_ocr_texts_without_query_are_temporal_ocr() {
        let req = request(vec![slot(None, Some("A")), slot(None, Some("B"))]);
        assert_eq!(
            route(&req).unwrap(),
            Route::Temporal(vec![slot(None, Some("A")), slot(None, Some("B"))])
        );
    }

    #[test]
    fn empty_request_is_rejected() {
        let err = route(&request(vec![slot(None, None)])).unwrap_err();
        assert!(matches!(err, SearchError::InvalidRequest(_)));
        assert!(route(&request(vec![])).is_err());
    }

    #[test]
    fn too_many_slots_are_rejected() {
        let req = request(vec![slot(Some("a"), None); 4]);
        assert!(matches!(route(&req), Err(SearchError::InvalidRequest(_))));
    }

    #[test]
    fn active_methods_span_all_slots() {
        let mut a = slot(Some("x"), Some("ocr"));
        a.flags.clip_h14 = true;
        let mut b = slot(Some("y"), None);
        b.flags.clip_h14 = true;
        b.flags.gg = true;
        let active = request(vec![a, b]).active_methods();
        assert_eq!(
            active.into_iter().collect::<Vec<_>>(),
            [Method::ClipH14, Method::Ocr, Method::Gg]
        );
    }
}
