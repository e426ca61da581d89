//! Process settings from command-line flags and environment variables.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use url::Url;

use crate::dispatch::DispatchLimits;
use crate::fusion::Method;
use crate::search::TopK;
use crate::translate::client::DEFAULT_MODEL;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("backend spec '{0}' must look like method=url")]
    MalformedBackend(String),

    #[error(transparent)]
    UnknownMethod(#[from] crate::fusion::types::UnknownMethod),

    #[error("backend URL for {method} is invalid: {reason}")]
    InvalidUrl { method: String, reason: String },

    #[error("backend {0} is configured more than once")]
    DuplicateBackend(String),

    #[error("{0} must be at least 1")]
    Zero(&'static str),
}

/// Multi-model video keyframe search over MCP stdio.
#[derive(Debug, Clone, Parser)]
#[command(name = "keyframe-fusion", version, about)]
pub struct Settings {
    /// Search endpoint per method, as method=url (repeatable or comma separated)
    #[arg(long = "backend", env = "FUSION_BACKENDS", value_delimiter = ',')]
    pub backends: Vec<String>,

    /// Keyframe id → path JSON used to group ids by source video
    #[arg(
        long,
        env = "KEYFRAME_METADATA",
        default_value = "data/metadata/path_keyframe.json"
    )]
    pub metadata_path: PathBuf,

    /// Folder name that precedes the video folder in keyframe paths
    #[arg(long, env = "FUSION_LOCALITY_MARKER", default_value = "keyframe")]
    pub locality_marker: String,

    /// Extra weight configurations, JSON shaped {name: {method: weight}}
    #[arg(long, env = "FUSION_WEIGHTS_FILE")]
    pub weights_file: Option<PathBuf>,

    #[arg(long, env = "TOPK_NORMAL", default_value_t = 112)]
    pub topk_normal: usize,

    #[arg(long, env = "TOPK_NORMAL_SINGLE_METHOD", default_value_t = 168)]
    pub topk_single_method: usize,

    #[arg(long, env = "TOPK_TEMPORAL", default_value_t = 100)]
    pub topk_temporal: usize,

    /// Default hits per image for query-by-image
    #[arg(long, env = "TOPK_IS", default_value_t = 200)]
    pub topk_image: usize,

    /// Methods searched concurrently for one query
    #[arg(long, env = "FUSION_METHOD_WORKERS", default_value_t = 8)]
    pub method_workers: usize,

    /// Per-method timeout
    #[arg(long, env = "FUSION_METHOD_TIMEOUT_SECS", default_value_t = 30)]
    pub method_timeout_secs: u64,

    /// Searches served concurrently
    #[arg(long, env = "MAX_CONCURRENCY", default_value_t = 4)]
    pub max_concurrency: usize,

    /// Gemini API keys for query translation, comma separated
    #[arg(long, env = "GEMINI_KEYS", value_delimiter = ',', hide_env_values = true)]
    pub gemini_keys: Vec<String>,

    #[arg(long, env = "GEMINI_MODEL_NAME", default_value = DEFAULT_MODEL)]
    pub gemini_model: String,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = [
            ("topk-normal", self.topk_normal),
            ("topk-single-method", self.topk_single_method),
            ("topk-temporal", self.topk_temporal),
            ("topk-image", self.topk_image),
            ("method-workers", self.method_workers),
            ("max-concurrency", self.max_concurrency),
        ];
        if let Some(&(name, _)) = limits.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero(name));
        }
        if self.method_timeout_secs == 0 {
            return Err(ConfigError::Zero("method-timeout-secs"));
        }
        self.backend_endpoints().map(|_| ())
    }

    /// Parse `--backend` specs into one endpoint per method.
    pub fn backend_endpoints(&self) -> Result<BTreeMap<Method, Url>, ConfigError> {
        let mut endpoints = BTreeMap::new();
        for spec in self.backends.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            let (method, url) = parse_backend_spec(spec)?;
            if endpoints.insert(method, url).is_some() {
                return Err(ConfigError::DuplicateBackend(method.to_string()));
            }
        }
        Ok(endpoints)
    }

    pub fn top_k(&self) -> TopK {
        TopK {
            normal: self.topk_normal,
            single_method: self.topk_single_method,
            temporal: self.topk_temporal,
            image: self.topk_image,
        }
    }

    pub fn dispatch_limits(&self) -> DispatchLimits {
        DispatchLimits {
            workers: self.method_workers,
            timeout: Duration::from_secs(self.method_timeout_secs),
        }
    }
}

fn parse_backend_spec(spec: &str) -> Result<(Method, Url), ConfigError> {
    let (method, url) = spec
        .split_once('=')
        .ok_or_else(|| ConfigError::MalformedBackend(spec.to_string()))?;
    let method: Method = method.parse()?;
    let invalid = |reason: String| ConfigError::InvalidUrl {
        method: method.to_string(),
        reason,
    };

    let url = Url::parse(url.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    Ok((method, url))
}
