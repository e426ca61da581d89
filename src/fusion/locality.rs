//! Keyframe id → source video lookup used to keep temporal tuples inside one video.
//!
//! Built once at startup from the id→path metadata file. The parsed mapping is
//! cached next to the source as `<name>.locality.json` and reused while the
//! source's modification time is unchanged.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum LocalityError {
    #[error("failed to read metadata: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed metadata: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed metadata: expected an object of id → path")]
    NotAnObject,
}

/// Id → locality key (source video folder).
///
/// `Unavailable` means the metadata could not be loaded; callers then skip the
/// locality constraint entirely instead of failing.
#[derive(Debug, Clone)]
pub enum LocalityIndex {
    Available(HashMap<i64, String>),
    Unavailable,
}

impl LocalityIndex {
    /// Build from `source`, degrading to [`LocalityIndex::Unavailable`] on any error.
    pub fn build(source: &Path, marker: &str) -> Self {
        match load(source, marker) {
            Ok(groups) => {
                info!(entries = groups.len(), path = %source.display(), "locality index ready");
                LocalityIndex::Available(groups)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %source.display(),
                    "locality index unavailable, same-video constraint disabled"
                );
                LocalityIndex::Unavailable
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, LocalityIndex::Available(_))
    }

    pub fn lookup(&self, id: i64) -> Option<&str> {
        match self {
            LocalityIndex::Available(groups) => groups.get(&id).map(String::as_str),
            LocalityIndex::Unavailable => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            LocalityIndex::Available(groups) => groups.len(),
            LocalityIndex::Unavailable => 0,
        }
    }
}

impl FromIterator<(i64, String)> for LocalityIndex {
    fn from_iter<T: IntoIterator<Item = (i64, String)>>(iter: T) -> Self {
        LocalityIndex::Available(iter.into_iter().collect())
    }
}

#[derive(Serialize, Deserialize)]
struct CachedGroups {
    source_mtime: SystemTime,
    marker: String,
    groups: HashMap<i64, String>,
}

fn sidecar_path(source: &Path) -> PathBuf {
    source.with_extension("locality.json")
}

fn load(source: &Path, marker: &str) -> Result<HashMap<i64, String>, LocalityError> {
    let mtime = fs::metadata(source)?.modified()?;
    let sidecar = sidecar_path(source);

    if let Some(groups) = read_cached(&sidecar, mtime, marker) {
        debug!(path = %sidecar.display(), "locality index loaded from cache");
        return Ok(groups);
    }

    let raw = fs::read_to_string(source)?;
    let groups = parse_groups(&raw, marker)?;

    let cached = CachedGroups {
        source_mtime: mtime,
        marker: marker.to_string(),
        groups,
    };
    if let Err(e) = write_cached(&sidecar, &cached) {
        warn!(error = %e, path = %sidecar.display(), "failed to write locality cache");
    }
    Ok(cached.groups)
}

fn read_cached(sidecar: &Path, mtime: SystemTime, marker: &str) -> Option<HashMap<i64, String>> {
    let raw = fs::read_to_string(sidecar).ok()?;
    let cached: CachedGroups = serde_json::from_str(&raw).ok()?;
    (cached.source_mtime == mtime && cached.marker == marker).then_some(cached.groups)
}

fn write_cached(sidecar: &Path, cached: &CachedGroups) -> Result<(), LocalityError> {
    fs::write(sidecar, serde_json::to_vec(cached)?)?;
    Ok(())
}

/// Parse `{ "<id>": "<path>" }`, keeping entries whose path contains `marker`
/// followed by a folder. Ids that are not integers are skipped.
fn parse_groups(raw: &str, marker: &str) -> Result<HashMap<i64, String>, LocalityError> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Object(entries) = value else {
        return Err(LocalityError::NotAnObject);
    };

    let mut groups = HashMap::with_capacity(entries.len());
    for (id, path) in entries {
        let Ok(id) = id.trim().parse::<i64>() else {
            continue;
        };
        let path = match path {
            Value::String(s) => s,
            other => other.to_string(),
        };
        if let Some(folder) = folder_after_marker(&path, marker) {
            groups.insert(id, folder);
        }
    }
    Ok(groups)
}

/// The path segment right after the first `marker` segment, with `\` normalized to `/`.
fn folder_after_marker(path: &str, marker: &str) -> Option<String> {
    let normalized = path.replace('\\', "/");
    let mut parts = normalized.split('/');
    parts.by_ref().find(|p| *p == marker)?;
    parts.next().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_follows_marker() {
        assert_eq!(
            folder_after_marker("data/keyframe/L21_V001/001.jpg", "keyframe").as_deref(),
            Some("L21_V001")
        );
        assert_eq!(
            folder_after_marker(r"data\keyframe\L02_V010\17.webp", "keyframe").as_deref(),
            Some("L02_V010")
        );
    }

    #[test]
    fn folder_missing_when_marker_absent_or_last() {
        assert_eq!(folder_after_marker("data/frames/L21_V001/1.jpg", "keyframe"), None);
        assert_eq!(folder_after_marker("data/keyframe", "keyframe"), None);
    }

    #[test]
    fn parse_skips_bad_ids_and_unmarked_paths() {
        let raw = r#"{
            "1": "kf/keyframe/L01_V001/1.jpg",
            "2": "kf/keyframe/L01_V002/4.jpg",
            "x": "kf/keyframe/L01_V003/1.jpg",
            "3": "elsewhere/L01_V001/2.jpg"
        }"#;
        let groups = parse_groups(raw, "keyframe").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&1], "L01_V001");
        assert_eq!(groups[&2], "L01_V002");
    }

    #[test]
    fn parse_rejects_non_object() {
        let err = parse_groups("[1, 2]", "keyframe").unwrap_err();
        assert!(matches!(err, LocalityError::NotAnObject));
    }

    #[test]
    fn missing_file_degrades_to_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let index = LocalityIndex::build(&dir.path().join("missing.json"), "keyframe");
        assert!(!index.is_available());
        assert_eq!(index.lookup(1), None);
    }

    #[test]
    fn malformed_file_degrades_to_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("path_keyframe.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(!LocalityIndex::build(&path, "keyframe").is_available());
    }

    #[test]
    fn build_writes_and_reuses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("path_keyframe.json");
        fs::write(&path, r#"{"10": "keyframe/V1/a.jpg", "11": "keyframe/V2/b.jpg"}"#).unwrap();

        let index = LocalityIndex::build(&path, "keyframe");
        assert_eq!(index.len(), 2);
        assert_eq!(index.lookup(10), Some("V1"));

        let sidecar = sidecar_path(&path);
        assert!(sidecar.exists());

        // A cache entry recorded against the current mtime is trusted as-is.
        let mtime = fs::metadata(&path).unwrap().modified().unwrap();
        let doctored = CachedGroups {
            source_mtime: mtime,
            marker: "keyframe".into(),
            groups: HashMap::from([(10, "cached".to_string())]),
        };
        write_cached(&sidecar, &doctored).unwrap();
        assert_eq!(LocalityIndex::build(&path, "keyframe").lookup(10), Some("cached"));
    }

    #[test]
    fn stale_cache_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("path_keyframe.json");
        fs::write(&path, r#"{"10": "keyframe/V1/a.jpg"}"#).unwrap();

        let stale = CachedGroups {
            source_mtime: SystemTime::UNIX_EPOCH,
            marker: "keyframe".into(),
            groups: HashMap::from([(10, "stale".to_string())]),
        };
        write_cached(&sidecar_path(&path), &stale).unwrap();

        assert_eq!(LocalityIndex::build(&path, "keyframe").lookup(10), Some("V1"));
    }

    #[test]
    fn collects_from_pairs() {
        let index: LocalityIndex = [(1, "A".to_string()), (2, "B".to_string())]
            .into_iter()
            .collect();
        assert!(index.is_available());
        assert_eq!(index.lookup(2), Some("B"));
        assert_eq!(index.lookup(3), None);
    }
}
