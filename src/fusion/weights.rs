//! Per-method fusion weights: a curated table keyed by method combination,
//! with a synthesized fallback for combinations the table does not cover.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use super::types::WeightMap;

/// Default weight per method, used to synthesize weights for uncovered combinations.
const BASE_WEIGHTS: &[(&str, f64)] = &[
    ("clip_h14", 1.0),
    ("clip_bigg14", 1.0),
    ("img_cap", 0.8),
    ("beit3", 1.0),
    ("ocr", 0.8),
    ("gg", 0.6),
];

/// Curated weights for 1- to 6-method combinations.
///
/// Names are the underscore-joined method names in any order (`clip_h14_clip_bigg14`);
/// automatic lookup goes through the canonical sorted key of each entry's methods.
const CURATED_CONFIGS: &[(&str, &[(&str, f64)])] = &[
    ("clip_h14", &[("clip_h14", 1.0)]),
    ("clip_bigg14", &[("clip_bigg14", 1.0)]),
    ("img_cap", &[("img_cap", 1.0)]),
    ("beit3", &[("beit3", 1.0)]),
    ("ocr", &[("ocr", 1.0)]),
    ("gg", &[("gg", 1.0)]),
    ("clip_h14_clip_bigg14", &[("clip_h14", 0.6), ("clip_bigg14", 0.4)]),
    ("clip_h14_img_cap", &[("clip_h14", 0.7), ("img_cap", 0.5)]),
    ("clip_h14_beit3", &[("clip_h14", 0.5), ("beit3", 0.5)]),
    ("clip_h14_ocr", &[("clip_h14", 0.7), ("ocr", 0.7)]),
    ("clip_h14_gg", &[("clip_h14", 0.8), ("gg", 0.6)]),
    ("clip_bigg14_img_cap", &[("clip_bigg14", 0.6), ("img_cap", 0.5)]),
    ("clip_bigg14_beit3", &[("clip_bigg14", 0.7), ("beit3", 0.6)]),
    ("clip_bigg14_ocr", &[("clip_bigg14", 0.6), ("ocr", 0.5)]),
    ("clip_bigg14_gg", &[("clip_bigg14", 0.7), ("gg", 0.4)]),
    ("img_cap_beit3", &[("img_cap", 0.6), ("beit3", 0.5)]),
    ("img_cap_ocr", &[("img_cap", 0.6), ("ocr", 0.6)]),
    ("img_cap_gg", &[("img_cap", 0.6), ("gg", 0.4)]),
    ("beit3_ocr", &[("beit3", 0.5), ("ocr", 0.5)]),
    ("beit3_gg", &[("beit3", 0.6), ("gg", 0.4)]),
    ("ocr_gg", &[("ocr", 0.6), ("gg", 0.4)]),
    (
        "clip_h14_clip_bigg14_img_cap",
        &[("clip_h14", 0.5), ("clip_bigg14", 0.4), ("img_cap", 0.4)],
    ),
    (
        "clip_h14_clip_bigg14_beit3",
        &[("clip_h14", 0.6), ("clip_bigg14", 0.5), ("beit3", 0.4)],
    ),
    (
        "clip_h14_img_cap_beit3",
        &[("clip_h14", 0.6), ("img_cap", 0.5), ("beit3", 0.4)],
    ),
    (
        "clip_h14_img_cap_ocr",
        &[("clip_h14", 0.6), ("img_cap", 0.5), ("ocr", 0.4)],
    ),
    (
        "clip_h14_img_cap_gg",
        &[("clip_h14", 0.7), ("img_cap", 0.5), ("gg", 0.3)],
    ),
    (
        "clip_h14_beit3_ocr",
        &[("clip_h14", 0.6), ("beit3", 0.4), ("ocr", 0.4)],
    ),
    (
        "clip_bigg14_img_cap_beit3",
        &[("clip_bigg14", 0.5), ("img_cap", 0.4), ("beit3", 0.4)],
    ),
    (
        "clip_h14_clip_bigg14_img_cap_beit3",
        &[
            ("clip_h14", 0.5),
            ("clip_bigg14", 0.4),
            ("img_cap", 0.4),
            ("beit3", 0.3),
        ],
    ),
    (
        "clip_h14_clip_bigg14_img_cap_ocr",
        &[
            ("clip_h14", 0.5),
            ("clip_bigg14", 0.4),
            ("img_cap", 0.4),
            ("ocr", 0.3),
        ],
    ),
    (
        "clip_h14_img_cap_beit3_ocr",
        &[("clip_h14", 0.6), ("img_cap", 0.4), ("beit3", 0.3), ("ocr", 0.3)],
    ),
    (
        "clip_h14_img_cap_beit3_gg",
        &[("clip_h14", 0.6), ("img_cap", 0.4), ("beit3", 0.3), ("gg", 0.2)],
    ),
    (
        "clip_h14_clip_bigg14_img_cap_beit3_ocr",
        &[
            ("clip_h14", 0.5),
            ("clip_bigg14", 0.4),
            ("img_cap", 0.4),
            ("beit3", 0.3),
            ("ocr", 0.3),
        ],
    ),
    (
        "clip_h14_clip_bigg14_img_cap_beit3_gg",
        &[
            ("clip_h14", 0.5),
            ("clip_bigg14", 0.4),
            ("img_cap", 0.4),
            ("beit3", 0.3),
            ("gg", 0.2),
        ],
    ),
    (
        "clip_h14_clip_bigg14_img_cap_beit3_ocr_gg",
        &[
            ("clip_h14", 0.5),
            ("clip_bigg14", 0.4),
            ("img_cap", 0.4),
            ("beit3", 0.3),
            ("ocr", 0.3),
            ("gg", 0.2),
        ],
    ),
];

#[derive(Debug, thiserror::Error)]
pub enum WeightsFileError {
    #[error("failed to read weights file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid weights file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config '{config}' has a negative weight for '{method}'")]
    NegativeWeight { config: String, method: String },
}

fn to_map(entries: &[(&str, f64)]) -> WeightMap {
    entries.iter().map(|&(m, w)| (m.to_string(), w)).collect()
}

/// Named configurations plus the canonical combination key → name index.
#[derive(Debug, Default)]
struct Configs {
    by_name: BTreeMap<String, WeightMap>,
    by_combination: BTreeMap<String, String>,
}

impl Configs {
    fn insert(&mut self, name: String, weights: WeightMap) {
        let methods: BTreeSet<&str> = weights.keys().map(String::as_str).collect();
        if spells_combination(&name, &methods) {
            self.by_combination
                .insert(combination_key(&methods), name.clone());
        }
        self.by_name.insert(name, weights);
    }

    fn for_combination(&self, key: &str) -> Option<(&str, &WeightMap)> {
        let name = self.by_combination.get(key)?;
        self.by_name.get(name).map(|w| (name.as_str(), w))
    }
}

/// Weight configuration table shared by every request.
///
/// Immutable after startup except for [`WeightTable::add_config`], which only adds.
#[derive(Debug)]
pub struct WeightTable {
    configs: RwLock<Configs>,
    base: WeightMap,
}

impl Default for WeightTable {
    fn default() -> Self {
        Self::curated()
    }
}

impl WeightTable {
    pub fn new(configs: BTreeMap<String, WeightMap>, base: WeightMap) -> Self {
        let mut table = Configs::default();
        for (name, weights) in configs {
            table.insert(name, weights);
        }
        Self {
            configs: RwLock::new(table),
            base,
        }
    }

    /// The built-in curated table and base weights.
    pub fn curated() -> Self {
        let configs = CURATED_CONFIGS
            .iter()
            .map(|&(name, entries)| (name.to_string(), to_map(entries)))
            .collect();
        Self::new(configs, to_map(BASE_WEIGHTS))
    }

    /// Resolve the weights for a set of active methods.
    ///
    /// A known `config_name` wins and is returned unfiltered. Otherwise the sorted,
    /// underscore-joined method set is looked up and restricted to the active methods;
    /// uncovered combinations fall back to base weights (1.0 for unknown methods).
    pub fn resolve<S: AsRef<str>>(&self, active: &[S], config_name: Option<&str>) -> WeightMap {
        let configs = self.configs.read().unwrap_or_else(PoisonError::into_inner);

        if let Some(config) = config_name.and_then(|name| configs.by_name.get(name)) {
            return config.clone();
        }

        let active = sorted_methods(active);
        if active.is_empty() {
            return WeightMap::new();
        }

        let key = combination_key(&active);
        match configs.for_combination(&key) {
            Some((_, config)) => config
                .iter()
                .filter(|(method, _)| active.contains(method.as_str()))
                .map(|(m, w)| (m.clone(), *w))
                .collect(),
            None => {
                debug!(key = %key, "no curated weights, synthesizing from base weights");
                self.synthesize(&active)
            }
        }
    }

    /// Name and weights that [`WeightTable::resolve`] would pick, for diagnostics.
    ///
    /// The name is the matching configuration's name, `"dynamic"` for synthesized
    /// weights, or `"default"` (with the base weights) when no method is active.
    pub fn suggest<S: AsRef<str>>(&self, active: &[S]) -> (String, WeightMap) {
        let active = sorted_methods(active);
        if active.is_empty() {
            return ("default".to_string(), self.base.clone());
        }
        let key = combination_key(&active);
        let configs = self.configs.read().unwrap_or_else(PoisonError::into_inner);
        match configs.for_combination(&key) {
            Some((name, config)) => (name.to_string(), config.clone()),
            None => ("dynamic".to_string(), self.synthesize(&active)),
        }
    }

    pub fn available_configs(&self) -> Vec<String> {
        let configs = self.configs.read().unwrap_or_else(PoisonError::into_inner);
        configs.by_name.keys().cloned().collect()
    }

    pub fn config_details(&self, name: &str) -> Option<WeightMap> {
        let configs = self.configs.read().unwrap_or_else(PoisonError::into_inner);
        configs.by_name.get(name).cloned()
    }

    /// Register (or replace) a named configuration. Configurations are never removed.
    ///
    /// A config whose name spells its own method set (in any order) also becomes the
    /// automatic choice for that combination.
    pub fn add_config(&self, name: impl Into<String>, weights: WeightMap) {
        let mut configs = self.configs.write().unwrap_or_else(PoisonError::into_inner);
        configs.insert(name.into(), weights);
    }

    /// Merge named configurations from a JSON file shaped `{name: {method: weight}}`.
    pub fn extend_from_file(&self, path: &Path) -> Result<usize, WeightsFileError> {
        let raw = std::fs::read_to_string(path)?;
        let extra: BTreeMap<String, WeightMap> = serde_json::from_str(&raw)?;

        for (config, weights) in &extra {
            if let Some((method, _)) = weights.iter().find(|(_, w)| **w < 0.0) {
                return Err(WeightsFileError::NegativeWeight {
                    config: config.clone(),
                    method: method.clone(),
                });
            }
        }

        let count = extra.len();
        for (name, weights) in extra {
            self.add_config(name, weights);
        }
        Ok(count)
    }

    fn synthesize(&self, active: &BTreeSet<&str>) -> WeightMap {
        active
            .iter()
            .map(|m| (m.to_string(), self.base.get(*m).copied().unwrap_or(1.0)))
            .collect()
    }
}

fn sorted_methods<S: AsRef<str>>(active: &[S]) -> BTreeSet<&str> {
    active.iter().map(|m| m.as_ref()).collect()
}

fn combination_key(active: &BTreeSet<&str>) -> String {
    active.iter().copied().collect::<Vec<_>>().join("_")
}

/// Whether `name` is the methods in `methods` joined by `_`, in any order.
fn spells_combination(name: &str, methods: &BTreeSet<&str>) -> bool {
    if methods.is_empty() {
        return false;
    }
    methods.iter().any(|m| {
        let Some(rest) = name.strip_prefix(m) else {
            return false;
        };
        let mut left = methods.clone();
        left.remove(m);
        if left.is_empty() {
            rest.is_empty()
        } else {
            rest.strip_prefix('_')
                .is_some_and(|rest| spells_combination(rest, &left))
        }
    })
}
