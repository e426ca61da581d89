use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One hit from any backend. `id` lives in the keyframe id space shared by every method.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredId {
    pub id: i64,
    pub score: f64,
}

impl ScoredId {
    pub fn new(id: i64, score: f64) -> Self {
        Self { id, score }
    }
}

/// Hits from one backend call, best first. Ids are unique within a list.
pub type RankedList = Vec<ScoredId>;

/// Method name → ranked list for one query slot.
///
/// A key is present only when the method was enabled and returned hits;
/// iteration is in method-name order, which fixes the tie-break order used by fusion.
pub type MethodBucket = BTreeMap<String, RankedList>;

/// Method name → fusion weight. Missing methods weigh 1.0.
pub type WeightMap = BTreeMap<String, f64>;

/// Retrieval methods known to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    ClipH14,
    ClipBigg14,
    Beit3,
    Siglip2,
    ImgCap,
    Ocr,
    Gg,
    Asr,
}

impl Method {
    pub const ALL: [Method; 8] = [
        Method::ClipH14,
        Method::ClipBigg14,
        Method::Beit3,
        Method::Siglip2,
        Method::ImgCap,
        Method::Ocr,
        Method::Gg,
        Method::Asr,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Method::ClipH14 => "clip_h14",
            Method::ClipBigg14 => "clip_bigg14",
            Method::Beit3 => "beit3",
            Method::Siglip2 => "siglip2",
            Method::ImgCap => "img_cap",
            Method::Ocr => "ocr",
            Method::Gg => "gg",
            Method::Asr => "asr",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown retrieval method: {0}")]
pub struct UnknownMethod(pub String);

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.name() == s.trim())
            .ok_or_else(|| UnknownMethod(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_round_trip_through_from_str() {
        for m in Method::ALL {
            assert_eq!(m.name().parse::<Method>().unwrap(), m);
        }
    }

    #[test]
    fn unknown_method_is_rejected() {
        let err = "clip_vit".parse::<Method>().unwrap_err();
        assert!(err.to_string().contains("clip_vit"));
    }

    #[test]
    fn bucket_iterates_in_name_order() {
        let mut bucket = MethodBucket::new();
        bucket.insert("ocr".into(), vec![ScoredId::new(1, 0.1)]);
        bucket.insert("clip_h14".into(), vec![ScoredId::new(2, 0.2)]);
        bucket.insert("gg".into(), vec![ScoredId::new(3, 0.3)]);

        let keys: Vec<_> = bucket.keys().map(String::as_str).collect();
        assert_eq!(keys, ["clip_h14", "gg", "ocr"]);
    }
}
