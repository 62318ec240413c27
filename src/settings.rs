//! Durable key-value persistence for a named settings scope
//!
//! Each scope owns exactly one JSON object stored as `<dir>/<scope>.json`.
//! Mutations are in-memory only until `commit()`; commits write to a
//! temporary file and atomically rename over the real one, so a crash
//! mid-write never corrupts the previous on-disk state.

use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Typed persistence failure, surfaced to the frontend as a boolean outcome
/// but kept structured for diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn parse(path: &Path, source: serde_json::Error) -> Self {
        Self::Parse {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Key-value store backed by one JSON file per named scope
#[derive(Debug)]
pub struct SettingsStore {
    dir: PathBuf,
    path: PathBuf,
    doc: Map<String, Value>,
}

impl SettingsStore {
    /// Create a store for `scope` under `dir`. Nothing is read until `load()`.
    pub fn new(dir: impl Into<PathBuf>, scope: &str) -> Self {
        let dir = dir.into();
        let path = Self::scope_path(&dir, scope);
        Self {
            dir,
            path,
            doc: Map::new(),
        }
    }

    fn scope_path(dir: &Path, scope: &str) -> PathBuf {
        dir.join(format!("{scope}.{}", crate::constants::settings::FILE_EXT))
    }

    /// Path of the backing file for this scope
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory document with the parsed backing file.
    ///
    /// A missing file yields an empty document and `Ok`; an unreadable or
    /// unparsable file yields a typed error so the caller can log the cause
    /// before falling back to an empty document. Idempotent, last call wins.
    pub fn load(&mut self) -> Result<(), StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No settings file yet, starting empty");
                self.doc = Map::new();
                return Ok(());
            }
            Err(e) => {
                self.doc = Map::new();
                return Err(StoreError::io(&self.path, e));
            }
        };

        match serde_json::from_str::<Map<String, Value>>(&contents) {
            Ok(doc) => {
                debug!(path = %self.path.display(), keys = doc.len(), "Loaded settings");
                self.doc = doc;
                Ok(())
            }
            Err(e) => {
                self.doc = Map::new();
                Err(StoreError::parse(&self.path, e))
            }
        }
    }

    /// Serialize the whole document and atomically replace the backing file.
    pub fn commit(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;

        let json = serde_json::to_string_pretty(&Value::Object(self.doc.clone()))
            .map_err(|e| StoreError::parse(&self.path, e))?;

        // Write to a sibling tmp file first, then rename over the real file.
        // A failed write leaves the previous on-disk document intact.
        let tmp = self.path.with_extension("json.tmp");
        if let Err(e) = fs::write(&tmp, &json) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io(&tmp, e));
        }
        fs::rename(&tmp, &self.path).map_err(|e| StoreError::io(&self.path, e))?;

        debug!(path = %self.path.display(), "Committed settings");
        Ok(())
    }

    /// Get the value at `key`, if present
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.doc.get(key)
    }

    /// Get the value at `key`, cloned, or `default` when absent
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.doc.get(key).cloned().unwrap_or(default)
    }

    /// Insert or overwrite `key`. Does not persist; call `commit()`.
    pub fn set(&mut self, key: &str, value: Value) {
        self.doc.insert(key.to_string(), value);
    }

    /// Serialize `value` and insert it at `key`. Does not persist.
    pub fn set_json<T: serde::Serialize>(&mut self, key: &str, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value).map_err(|e| StoreError::parse(&self.path, e))?;
        self.doc.insert(key.to_string(), value);
        Ok(())
    }

    /// Remove `key` if present and commit immediately.
    ///
    /// Used only for one-shot legacy-key cleanup, hence the eager commit.
    pub fn delete(&mut self, key: &str) -> Result<(), StoreError> {
        if self.doc.remove(key).is_some() {
            self.commit()?;
        }
        Ok(())
    }

    /// Whether `key` exists in the document
    pub fn contains(&self, key: &str) -> bool {
        self.doc.contains_key(key)
    }

    /// Write the current in-memory document to an arbitrary path
    pub fn export_to(&self, dest: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&Value::Object(self.doc.clone()))
            .map_err(|e| StoreError::parse(dest, e))?;
        fs::write(dest, json).map_err(|e| StoreError::io(dest, e))?;
        info!(path = %dest.display(), "Exported settings");
        Ok(())
    }

    /// Parse a JSON file and replace the in-memory document wholesale.
    ///
    /// The caller is responsible for suspending saves afterwards so stale
    /// in-memory domain state cannot clobber the imported document.
    pub fn import_from(&mut self, src: &Path) -> Result<(), StoreError> {
        let contents = fs::read_to_string(src).map_err(|e| StoreError::io(src, e))?;
        let doc = serde_json::from_str::<Map<String, Value>>(&contents)
            .map_err(|e| StoreError::parse(src, e))?;
        self.doc = doc;
        self.commit()?;
        info!(path = %src.display(), "Imported settings");
        Ok(())
    }

    /// Write the current document verbatim to a second scope in the same
    /// settings directory. On failure the partial file is best-effort removed.
    pub fn clone_to(&self, scope: &str) -> Result<(), StoreError> {
        let dest = Self::scope_path(&self.dir, scope);
        if let Err(e) = self.export_to(&dest) {
            if let Err(rm) = fs::remove_file(&dest) {
                if rm.kind() != ErrorKind::NotFound {
                    warn!(path = %dest.display(), error = ?rm, "Could not remove partial backup");
                }
            }
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> SettingsStore {
        SettingsStore::new(dir.path(), "test")
    }

    #[test]
    fn test_fresh_store_returns_default() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        s.load().unwrap();

        assert_eq!(s.get("anything"), None);
        assert_eq!(s.get_or("anything", json!([])), json!([]));
    }

    #[test]
    fn test_durability_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        s.load().unwrap();
        s.set("tabs", json!({"id": {"title": "Favorites"}}));
        s.commit().unwrap();

        let mut reopened = store(&dir);
        reopened.load().unwrap();
        assert_eq!(
            reopened.get_or("tabs", json!({})),
            json!({"id": {"title": "Favorites"}})
        );
    }

    #[test]
    fn test_load_is_idempotent_last_call_wins() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        s.load().unwrap();
        s.set("key", json!(1));
        s.commit().unwrap();

        // Un-committed edits are discarded by a reload
        s.set("key", json!(2));
        s.load().unwrap();
        assert_eq!(s.get_or("key", json!(0)), json!(1));
    }

    #[test]
    fn test_unparsable_file_yields_parse_error_and_empty_doc() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("test.json"), "{not json").unwrap();

        let mut s = store(&dir);
        let err = s.load().unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
        assert_eq!(s.get("anything"), None);
    }

    #[test]
    fn test_commit_leaves_no_tmp_file() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        s.load().unwrap();
        s.set("key", json!(true));
        s.commit().unwrap();

        assert!(dir.path().join("test.json").exists());
        assert!(!dir.path().join("test.json.tmp").exists());
    }

    #[test]
    fn test_delete_commits_immediately() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        s.load().unwrap();
        s.set("legacy", json!([1, 2, 3]));
        s.commit().unwrap();
        s.delete("legacy").unwrap();

        let mut reopened = store(&dir);
        reopened.load().unwrap();
        assert!(!reopened.contains("legacy"));
    }

    #[test]
    fn test_export_and_import() {
        let dir = TempDir::new().unwrap();
        let backup = dir.path().join("backup.json");

        let mut s = store(&dir);
        s.load().unwrap();
        s.set("tags", json!([{"tag": 7, "string": "Indie"}]));
        s.export_to(&backup).unwrap();

        let mut other = SettingsStore::new(dir.path(), "other");
        other.load().unwrap();
        other.import_from(&backup).unwrap();
        assert_eq!(
            other.get_or("tags", json!([])),
            json!([{"tag": 7, "string": "Indie"}])
        );
    }

    #[test]
    fn test_import_missing_file_fails_without_touching_doc() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        s.load().unwrap();
        s.set("key", json!("kept"));

        let err = s.import_from(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert_eq!(s.get_or("key", json!(null)), json!("kept"));
    }

    #[test]
    fn test_clone_to_writes_sibling_scope() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        s.load().unwrap();
        s.set("usersDict", json!({}));
        s.clone_to("backup_20240101").unwrap();

        let mut cloned = SettingsStore::new(dir.path(), "backup_20240101");
        cloned.load().unwrap();
        assert!(cloned.contains("usersDict"));
    }
}
