use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::{KeyValueStore, StoreError};

/// Durable store backed by a single JSON document.
///
/// The whole map is rewritten on every mutation through a sibling temp file
/// and a rename, so readers never see a half-written document.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: parking_lot::RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    /// Opens the store at `path`; a missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Arc<Self>, StoreError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| StoreError::Codec {
                key: path.display().to_string(),
                source,
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        debug!(target: "tab_store", path = %path.display(), keys = entries.len(), "opened file store");
        Ok(Arc::new(Self {
            path,
            entries: parking_lot::RwLock::new(entries),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.display().to_string(),
            source,
        };
        let body = serde_json::to_vec_pretty(entries).map_err(|source| StoreError::Codec {
            key: self.path.display().to_string(),
            source,
        })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, body).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)
    }

    fn mutate(
        &self,
        apply: impl FnOnce(&mut BTreeMap<String, String>) -> bool,
    ) -> Result<(), StoreError> {
        let mut guard = self.entries.write();
        let mut next = guard.clone();
        if !apply(&mut next) {
            return Ok(());
        }
        self.flush(&next)?;
        *guard = next;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.mutate(|map| {
            map.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.mutate(|map| map.remove(key).is_some())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.mutate(|map| {
            let changed = !map.is_empty();
            map.clear();
            changed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("tab-store-{}", uuid::Uuid::new_v4()))
            .join("origin.json")
    }

    #[test]
    fn missing_file_opens_empty() {
        let path = scratch_path();
        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("timerState").unwrap(), None);
        assert!(!path.exists());
    }

    #[test]
    fn values_survive_reopen() {
        let path = scratch_path();
        {
            let store = FileStore::open(&path).unwrap();
            store.set("timerState", r#"{"secondsRemaining":12}"#).unwrap();
            store.set("timerImage", "data:image/png;base64,AA==").unwrap();
            store.remove("timerImage").unwrap();
        }
        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("timerState").unwrap().as_deref(),
            Some(r#"{"secondsRemaining":12}"#)
        );
        assert_eq!(reopened.get("timerImage").unwrap(), None);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn corrupt_document_is_a_codec_error() {
        let path = scratch_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{oops").unwrap();
        let err = FileStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Codec { .. }));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn clear_empties_the_document() {
        let path = scratch_path();
        let store = FileStore::open(&path).unwrap();
        store.set("a", "1").unwrap();
        store.clear().unwrap();
        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("a").unwrap(), None);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
