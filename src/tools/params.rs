use std::collections::BTreeMap;
use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::backends::ImageInput;
use crate::fusion::{Method, WeightMap};
use crate::search::{
    Grouping, ImageModel, ImageSearchRequest, MethodFlags, QuerySlot, SearchRequest,
};

/// Temporal result shape.
#[derive(Debug, Clone, Copy, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GroupingParam {
    /// One tuple list from each slot's fully fused ranking ("C").
    #[serde(alias = "C")]
    Flat,
    /// Named tuple groups per query variant, per method and fused ("B").
    #[default]
    #[serde(alias = "B")]
    Grouped,
}

impl From<GroupingParam> for Grouping {
    fn from(value: GroupingParam) -> Self {
        match value {
            GroupingParam::Flat => Grouping::Flat,
            GroupingParam::Grouped => Grouping::PerGroup,
        }
    }
}

/// Field names follow the retrieval web API: index `i` of every list belongs to query slot `i`.
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct SearchParams {
    /// Query texts, one per slot (1 for a single search, 2-3 for temporal). Use null or "" for an empty slot.
    #[serde(default)]
    pub queries: Vec<Option<String>>,
    /// OCR texts aligned with `queries`
    #[serde(default, rename = "OCR")]
    pub ocr: Vec<Option<String>>,
    /// Speech transcript; when present the request becomes an ASR scene search
    #[serde(default, rename = "ASR")]
    pub asr: Option<String>,
    /// Per-slot CLIP ViT-H/14 switch
    #[serde(default, rename = "ClipH14")]
    pub clip_h14: Vec<bool>,
    /// Per-slot CLIP ViT-bigG/14 switch
    #[serde(default, rename = "ClipBigg14")]
    pub clip_bigg14: Vec<bool>,
    /// Per-slot BEiT-3 switch
    #[serde(default, rename = "Beit3")]
    pub beit3: Vec<bool>,
    /// Per-slot SigLIP2 switch
    #[serde(default, rename = "SigLip2")]
    pub siglip2: Vec<bool>,
    /// Per-slot image-caption search switch
    #[serde(default, rename = "ImageCap")]
    pub img_cap: Vec<bool>,
    /// Per-slot web image search switch
    #[serde(default, rename = "GoogleSearch")]
    pub gg: Vec<bool>,
    /// Translate queries to English before searching (default: true)
    pub use_trans: Option<bool>,
    /// Also search a paraphrased and a context-augmented variant of each query (default: false)
    pub expand: Option<bool>,
    /// Named weight configuration to use instead of the automatic choice
    pub weight_config: Option<String>,
    /// Temporal result shape: "grouped" (default) or "flat"
    pub grouping: Option<GroupingParam>,
}

impl SearchParams {
    /// Normalize into a [`SearchRequest`]: texts are trimmed and blanks dropped.
    pub fn into_request(self) -> SearchRequest {
        let n = self.queries.len().max(self.ocr.len());
        let flag = |list: &[bool], i: usize| list.get(i).copied().unwrap_or(false);

        let slots = (0..n)
            .map(|i| QuerySlot {
                query: self.queries.get(i).and_then(|q| non_blank(q.as_deref())),
                ocr: self.ocr.get(i).and_then(|o| non_blank(o.as_deref())),
                flags: MethodFlags {
                    clip_h14: flag(&self.clip_h14, i),
                    clip_bigg14: flag(&self.clip_bigg14, i),
                    beit3: flag(&self.beit3, i),
                    siglip2: flag(&self.siglip2, i),
                    img_cap: flag(&self.img_cap, i),
                    gg: flag(&self.gg, i),
                },
            })
            .collect();

        SearchRequest {
            slots,
            asr: non_blank(self.asr.as_deref()),
            use_trans: self.use_trans.unwrap_or(true),
            expand: self.expand.unwrap_or(false),
            weight_config: non_blank(self.weight_config.as_deref()),
            grouping: self.grouping.unwrap_or_default().into(),
        }
    }
}

fn non_blank(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, Copy, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ImageModelParam {
    #[default]
    Siglip2,
    ClipH14,
}

impl From<ImageModelParam> for ImageModel {
    fn from(value: ImageModelParam) -> Self {
        match value {
            ImageModelParam::Siglip2 => ImageModel::Siglip2,
            ImageModelParam::ClipH14 => ImageModel::ClipH14,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ImageParam {
    /// Path of a keyframe or uploaded image readable by the backend
    pub path: Option<String>,
    /// Base64-encoded image bytes (standard alphabet)
    pub base64: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ImageSearchParams {
    /// 1 image for a plain search, 2-3 images (in temporal order) for a temporal image search
    pub images: Vec<ImageParam>,
    /// Visual model: "siglip2" (default) or "clip_h14"
    pub model: Option<ImageModelParam>,
    /// Results per image (default: 200)
    pub top_k: Option<usize>,
    /// Temporal result shape: "grouped" (default) or "flat"
    pub grouping: Option<GroupingParam>,
}

impl ImageSearchParams {
    pub fn into_request(self) -> Result<ImageSearchRequest, String> {
        let images = self
            .images
            .into_iter()
            .enumerate()
            .map(|(i, image)| image_input(i, image))
            .collect::<Result<Vec<_>, _>>()?;
        if self.top_k == Some(0) {
            return Err("top_k must be at least 1".into());
        }
        Ok(ImageSearchRequest {
            images,
            model: self.model.unwrap_or_default().into(),
            top_k: self.top_k,
            grouping: self.grouping.unwrap_or_default().into(),
        })
    }
}

fn image_input(index: usize, image: ImageParam) -> Result<ImageInput, String> {
    let path = non_blank(image.path.as_deref());
    let encoded = non_blank(image.base64.as_deref());
    match (path, encoded) {
        (Some(path), None) => Ok(ImageInput::Path(PathBuf::from(path))),
        (None, Some(encoded)) => STANDARD
            .decode(encoded.as_bytes())
            .map(ImageInput::Bytes)
            .map_err(|e| format!("images[{index}]: invalid base64: {e}")),
        (Some(_), Some(_)) => Err(format!(
            "images[{index}]: give either path or base64, not both"
        )),
        (None, None) => Err(format!("images[{index}]: path or base64 is required")),
    }
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct WeightConfigsParams {
    /// Show the weights of this configuration
    pub name: Option<String>,
    /// Show which configuration would be picked for these method names
    pub active_methods: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddWeightConfigParams {
    /// Configuration name, usable as `weight_config` in search
    pub name: String,
    /// Method name → non-negative weight (e.g. {"clip_h14": 1.0, "ocr": 0.6})
    pub weights: BTreeMap<String, f64>,
}

impl AddWeightConfigParams {
    pub fn validate(self) -> Result<(String, WeightMap), String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err("name must not be empty".into());
        }
        if self.weights.is_empty() {
            return Err("weights must name at least one method".into());
        }
        for (method, weight) in &self.weights {
            method.parse::<Method>().map_err(|e| e.to_string())?;
            if !weight.is_finite() || *weight < 0.0 {
                return Err(format!("weight for '{method}' must be a non-negative number"));
            }
        }
        Ok((name.to_string(), self.weights))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn search_params_use_api_field_names() {
        let params: SearchParams = serde_json::from_value(json!({
            "queries": ["  a red car ", null, "a bridge"],
            "OCR": ["", "STOP"],
            "ClipH14": [true, false, true],
            "GoogleSearch": [false, false, true],
            "use_trans": false,
            "grouping": "C"
        }))
        .unwrap();

        let req = params.into_request();
        assert_eq!(req.slots.len(), 3);
        assert_eq!(req.slots[0].query.as_deref(), Some("a red car"));
        assert_eq!(req.slots[0].ocr, None);
        assert_eq!(req.slots[1].query, None);
        assert_eq!(req.slots[1].ocr.as_deref(), Some("STOP"));
        assert!(req.slots[2].flags.clip_h14 && req.slots[2].flags.gg);
        assert!(!req.slots[1].flags.clip_h14);
        assert!(!req.use_trans);
        assert_eq!(req.grouping, Grouping::Flat);
    }

    #[test]
    fn search_params_defaults() {
        let req = SearchParams {
            asr: Some("   ".into()),
            weight_config: Some("".into()),
            ..Default::default()
        }
        .into_request();
        assert!(req.slots.is_empty());
        assert_eq!(req.asr, None);
        assert_eq!(req.weight_config, None);
        assert!(req.use_trans);
        assert!(!req.expand);
        assert_eq!(req.grouping, Grouping::PerGroup);
    }

    #[test]
    fn image_params_decode_base64() {
        let params: ImageSearchParams = serde_json::from_value(json!({
            "images": [{"base64": "aGVsbG8="}, {"path": "L01/V001/12.jpg"}],
            "model": "clip_h14"
        }))
        .unwrap();
        let req = params.into_request().unwrap();
        assert!(matches!(&req.images[0], ImageInput::Bytes(b) if b == b"hello"));
        assert!(matches!(&req.images[1], ImageInput::Path(p) if p == &PathBuf::from("L01/V001/12.jpg")));
        assert_eq!(req.model, ImageModel::ClipH14);
        assert_eq!(req.top_k, None);
    }

    #[test]
    fn image_params_reject_bad_entries() {
        let both = ImageSearchParams {
            images: vec![ImageParam {
                path: Some("a.jpg".into()),
                base64: Some("aGVsbG8=".into()),
            }],
            model: None,
            top_k: None,
            grouping: None,
        };
        assert!(both.into_request().unwrap_err().contains("not both"));

        let garbage = ImageSearchParams {
            images: vec![ImageParam {
                path: None,
                base64: Some("%%%".into()),
            }],
            model: None,
            top_k: None,
            grouping: None,
        };
        assert!(garbage.into_request().unwrap_err().contains("base64"));
    }

    #[test]
    fn add_weight_config_validation() {
        let ok = AddWeightConfigParams {
            name: " night ".into(),
            weights: BTreeMap::from([("clip_h14".into(), 1.0), ("ocr".into(), 0.4)]),
        };
        let (name, weights) = ok.validate().unwrap();
        assert_eq!(name, "night");
        assert_eq!(weights.len(), 2);

        let unknown = AddWeightConfigParams {
            name: "x".into(),
            weights: BTreeMap::from([("dalle".into(), 1.0)]),
        };
        assert!(unknown.validate().is_err());

        let negative = AddWeightConfigParams {
            name: "x".into(),
            weights: BTreeMap::from([("ocr".into(), -0.1)]),
        };
        assert!(negative.validate().unwrap_err().contains("non-negative"));
    }
}
