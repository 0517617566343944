//! Filesystem backends.
//!
//! [`DocumentStore`] is the structured primary tier: one JSON document per
//! database/object-store pair holding every key. [`KeyFileStore`] is the simple
//! fallback tier: one plain file per key. Both write through a temporary file
//! and a rename so readers never observe a half-written value.

use std::fs;
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};

use super::{KeyValueStore, StorageError, StorageResult};

/// Database directory used by the identity store.
pub const DEFAULT_DATABASE: &str = "device_fp";
/// Object store (document) name inside the database.
pub const DEFAULT_OBJECT_STORE: &str = "kv";

/// JSON document store at `<root>/<database>/<object_store>.json`.
#[derive(Debug)]
pub struct DocumentStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl DocumentStore {
    /// Opens (lazily) the document for `database`/`object_store` under `root`.
    ///
    /// Nothing is touched on disk until the first write.
    #[must_use]
    pub fn new(root: impl AsRef<Path>, database: &str, object_store: &str) -> Self {
        Self {
            path: root
                .as_ref()
                .join(database)
                .join(format!("{object_store}.json")),
            write_lock: Mutex::new(()),
        }
    }

    /// Document path on disk.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> StorageResult<Map<String, Value>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StorageError::Corrupted(format!(
                "{} is not a JSON object",
                self.path.display()
            ))),
            Err(err) => Err(StorageError::Corrupted(format!(
                "{}: {err}",
                self.path.display()
            ))),
        }
    }
}

impl KeyValueStore for DocumentStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self
            .load()?
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::Lock("mutex poisoned".to_string()))?;
        let mut document = match self.load() {
            Ok(document) => document,
            Err(StorageError::Corrupted(reason)) => {
                log::warn!("overwriting unreadable document store: {reason}");
                Map::new()
            }
            Err(err) => return Err(err),
        };
        document.insert(key.to_string(), Value::String(value.to_string()));
        let bytes = serde_json::to_vec(&Value::Object(document))
            .map_err(|err| StorageError::Corrupted(err.to_string()))?;
        write_atomic(&self.path, &bytes)
    }
}

/// One file per key under a directory.
#[derive(Debug, Clone)]
pub struct KeyFileStore {
    dir: PathBuf,
}

impl KeyFileStore {
    /// Stores keys as files directly under `dir`.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key == "." || key == ".." {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(key))
    }
}

impl KeyValueStore for KeyFileStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        match fs::read_to_string(self.key_path(key)?) {
            Ok(value) => Ok(Some(value.trim_end().to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        write_atomic(&self.key_path(key)?, value.as_bytes())
    }
}

/// Writes through a uniquely named sibling temp file, then renames it over
/// `path`. Concurrent writers each rename a complete file.
fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_store_round_trip_and_merge() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(dir.path(), DEFAULT_DATABASE, DEFAULT_OBJECT_STORE);
        assert_eq!(store.get("deviceId").unwrap(), None);

        store.set("deviceId", "abc").unwrap();
        store.set("other", "xyz").unwrap();

        assert_eq!(store.get("deviceId").unwrap().as_deref(), Some("abc"));
        assert_eq!(store.get("other").unwrap().as_deref(), Some("xyz"));
        assert!(dir.path().join("device_fp").join("kv.json").exists());
    }

    #[test]
    fn test_document_store_reports_corruption_then_recovers_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(dir.path(), "db", "kv");
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), b"not json").unwrap();

        assert!(matches!(
            store.get("deviceId"),
            Err(StorageError::Corrupted(_))
        ));

        store.set("deviceId", "abc").unwrap();
        assert_eq!(store.get("deviceId").unwrap().as_deref(), Some("abc"));
    }

    #[test]
    fn test_document_store_overwrites_non_object_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(dir.path(), "db", "kv");
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), b"[1, 2, 3]").unwrap();

        store.set("deviceId", "abc").unwrap();
        assert_eq!(store.get("deviceId").unwrap().as_deref(), Some("abc"));
    }

    #[test]
    fn test_key_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyFileStore::new(dir.path().join("kv"));
        assert_eq!(store.get("deviceId").unwrap(), None);
        store.set("deviceId", "abc").unwrap();
        assert_eq!(store.get("deviceId").unwrap().as_deref(), Some("abc"));
        assert_eq!(
            fs::read_to_string(dir.path().join("kv").join("deviceId")).unwrap(),
            "abc"
        );
    }

    #[test]
    fn test_concurrent_key_file_writes_never_leave_partial_values() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyFileStore::new(dir.path().join("kv"));
        let values: Vec<String> = (1..=8).map(|n| "x".repeat(n * 512)).collect();

        std::thread::scope(|scope| {
            for value in &values {
                let store = &store;
                scope.spawn(move || {
                    for _ in 0..25 {
                        store.set("deviceId", value).unwrap();
                    }
                });
            }
        });

        let stored = store.get("deviceId").unwrap().unwrap();
        assert!(values.contains(&stored));
        let entries: Vec<_> = fs::read_dir(dir.path().join("kv"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec!["deviceId"]);
    }

    #[test]
    fn test_key_file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyFileStore::new(dir.path());
        assert!(matches!(
            store.set("../escape", "x"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(store.get(""), Err(StorageError::InvalidKey(_))));
    }
}
