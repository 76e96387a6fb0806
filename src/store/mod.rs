//! Persisted application map — `~/opened-files.log`.
//!
//! The file is a single JSON object keyed by application id. It is
//! always rewritten in full (temp file + rename), never appended to.
//! Reads favour availability: a missing, unreadable, or corrupt file
//! loads as an empty map so the daemon keeps running and rebuilds it.
//!
//! [`StateStore`] does the file work synchronously. [`StoreHandle`]
//! (see `writer`) serialises merges through one writer thread.

pub mod writer;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use writer::{StoreHandle, spawn_writer};

/// Most recent snapshot for one application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    pub windows: Vec<u64>,
    pub uris: Vec<String>,
}

/// Full persisted state, keyed by application id.
pub type AppMap = BTreeMap<String, AppRecord>;

/// Persistence failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize state: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("store writer has stopped")]
    Closed,
}

/// File-backed application map.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted map, strictly.
    ///
    /// A missing file is an empty map; anything else that goes wrong is
    /// an error.
    pub fn try_load(&self) -> Result<AppMap, StoreError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(AppMap::new()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if text.trim().is_empty() {
            return Ok(AppMap::new());
        }
        serde_json::from_str(&text).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Read the persisted map, treating any failure as empty state.
    pub fn load(&self) -> AppMap {
        self.try_load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "discarding unreadable state, starting empty");
            AppMap::new()
        })
    }

    /// Replace the persisted map with `map`.
    ///
    /// Writes a sibling temp file and renames it over the target, so a
    /// crash mid-write leaves either the old or the new content.
    pub fn save(&self, map: &AppMap) -> Result<(), StoreError> {
        let mut text = serde_json::to_string_pretty(map).map_err(StoreError::Serialize)?;
        text.push('\n');

        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let tmp = self.tmp_path();
        std::fs::write(&tmp, text).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(|source| {
            let _ = std::fs::remove_file(&tmp);
            write_err(source)
        })
    }

    /// Load, overwrite the entry for `app_id`, save. Last write wins.
    pub fn merge(&self, app_id: &str, record: AppRecord) -> Result<(), StoreError> {
        let mut map = self.load();
        map.insert(app_id.to_string(), record);
        self.save(&map)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("opened-files.log"));
        (dir, store)
    }

    fn record(windows: &[u64], uris: &[&str]) -> AppRecord {
        AppRecord {
            windows: windows.to_vec(),
            uris: uris.iter().map(|u| u.to_string()).collect(),
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let (_dir, store) = store();
        assert!(store.load().is_empty());
        assert!(store.try_load().unwrap().is_empty());
    }

    #[test]
    fn invalid_json_loads_empty_and_merge_rebuilds() {
        let (_dir, store) = store();
        std::fs::write(store.path(), "{not json").unwrap();

        assert!(matches!(store.try_load(), Err(StoreError::Parse { .. })));
        assert!(store.load().is_empty());

        store
            .merge("org.example.Editor", record(&[42], &["/home/u/a.txt"]))
            .unwrap();
        let map = store.try_load().unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["org.example.Editor"], record(&[42], &["/home/u/a.txt"]));
    }

    #[test]
    fn wrong_shape_is_parse_error() {
        let (_dir, store) = store();
        std::fs::write(store.path(), r#"{"app": {"windows": "nope"}}"#).unwrap();
        assert!(matches!(store.try_load(), Err(StoreError::Parse { .. })));
        assert!(store.load().is_empty());
    }

    #[test]
    fn persisted_schema() {
        let (_dir, store) = store();
        store
            .merge("org.example.Editor", record(&[42], &["/home/u/a.txt"]))
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!({
                "org.example.Editor": { "windows": [42], "uris": ["/home/u/a.txt"] }
            })
        );
    }

    #[test]
    fn merge_overwrites_whole_record() {
        let (_dir, store) = store();
        store.merge("app", record(&[1, 2], &["a", "b"])).unwrap();
        store.merge("app", record(&[3], &[])).unwrap();

        assert_eq!(store.load()["app"], record(&[3], &[]));
    }

    #[test]
    fn merge_keeps_other_keys() {
        let (_dir, store) = store();
        store.merge("one", record(&[1], &["a"])).unwrap();
        store.merge("two", record(&[2], &["b"])).unwrap();

        let map = store.load();
        assert_eq!(map["one"], record(&[1], &["a"]));
        assert_eq!(map["two"], record(&[2], &["b"]));
    }

    #[test]
    fn merge_is_idempotent() {
        let (_dir, store) = store();
        store.merge("app", record(&[7], &["x"])).unwrap();
        let once = std::fs::read(store.path()).unwrap();
        store.merge("app", record(&[7], &["x"])).unwrap();
        let twice = std::fs::read(store.path()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn save_of_load_is_stable() {
        let (_dir, store) = store();
        store.merge("b.app", record(&[2], &["y"])).unwrap();
        store.merge("a.app", record(&[1], &["x"])).unwrap();
        let before = std::fs::read(store.path()).unwrap();

        store.save(&store.load()).unwrap();
        assert_eq!(std::fs::read(store.path()).unwrap(), before);
    }

    #[test]
    fn save_creates_parent_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested/state.json"));
        store.save(&AppMap::new()).unwrap();

        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "{}\n");
        assert!(!dir.path().join("nested/state.json.tmp").exists());
    }

    #[test]
    fn write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "").unwrap();
        let store = StateStore::new(blocker.join("state.json"));

        assert!(matches!(
            store.merge("app", AppRecord::default()),
            Err(StoreError::Write { .. })
        ));
    }
}
