//! # Toolset Registry & Persistent Cache
//!
//! The process-wide set of identified toolsets, keyed by canonical compiler
//! path, plus its on-disk snapshot (`detected-toolsets.json`). Registration
//! is first-writer-wins: a later identification of the same compiler is a
//! no-op that returns the existing entry. Snapshot writes are coalesced
//! behind a dirty flag and performed atomically (temp file, then rename), so
//! the file on disk is never half-written.

use crate::constants::DETECTED_TOOLSETS_FILENAME;
use crate::models::{SerializedToolset, Toolset};
use indexmap::IndexMap;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Filesystem error on snapshot '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize the toolset snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Default)]
pub struct ToolsetRegistry {
    toolsets: Mutex<IndexMap<String, Arc<Toolset>>>,
    storage_path: Mutex<Option<PathBuf>>,
    dirty: AtomicBool,
}

impl ToolsetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The canonical registry key for a compiler path.
    pub fn canonical_key(path: &Path) -> String {
        match dunce::canonicalize(path) {
            Ok(canonical) => canonical.display().to_string(),
            Err(_) => dunce::simplified(path).display().to_string(),
        }
    }

    /// Registers a toolset under its canonical path. The first writer wins;
    /// a duplicate registration returns the already-present entry untouched.
    pub fn register(&self, toolset: Toolset) -> Arc<Toolset> {
        let key = Self::canonical_key(toolset.compiler_path());
        let mut toolsets = self.toolsets.lock().unwrap();
        if let Some(existing) = toolsets.get(&key) {
            log::trace!("Toolset for '{}' already registered.", key);
            return existing.clone();
        }
        log::debug!("Registering toolset '{}' at '{}'.", toolset.name(), key);
        let entry = Arc::new(toolset);
        toolsets.insert(key, entry.clone());
        drop(toolsets);
        self.mark_dirty();
        entry
    }

    pub fn get(&self, compiler_path: &Path) -> Option<Arc<Toolset>> {
        let key = Self::canonical_key(compiler_path);
        self.toolsets.lock().unwrap().get(&key).cloned()
    }

    /// A point-in-time copy of the registry contents.
    pub fn snapshot(&self) -> IndexMap<String, Arc<Toolset>> {
        self.toolsets.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.toolsets.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every registered toolset (explicit reset only).
    pub fn reset(&self) {
        self.toolsets.lock().unwrap().clear();
    }

    pub fn set_storage_path(&self, path: Option<PathBuf>) {
        *self.storage_path.lock().unwrap() = path;
    }

    /// Flags that the registry changed; the next `flush` writes once for
    /// any number of marks.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// Serializes the registry to `<storage>/detected-toolsets.json` if
    /// anything changed since the last write. The write goes to a temp file
    /// first and is renamed into place.
    pub fn flush(&self) -> Result<(), RegistryError> {
        if !self.dirty.swap(false, Ordering::Relaxed) {
            return Ok(());
        }
        let Some(storage) = self.storage_path.lock().unwrap().clone() else {
            return Ok(());
        };

        let serialized: IndexMap<String, SerializedToolset> = self
            .snapshot()
            .iter()
            .map(|(key, toolset)| (key.clone(), toolset.to_serialized()))
            .collect();
        let text = serde_json::to_string_pretty(&serialized)?;

        let target = storage.join(DETECTED_TOOLSETS_FILENAME);
        let io_error = |e: std::io::Error| RegistryError::Io {
            path: target.display().to_string(),
            source: e,
        };
        std::fs::create_dir_all(&storage).map_err(io_error)?;
        let temp = storage.join(format!("{}.tmp", DETECTED_TOOLSETS_FILENAME));
        std::fs::write(&temp, text).map_err(io_error)?;
        std::fs::rename(&temp, &target).map_err(io_error)?;
        log::debug!("Wrote toolset snapshot to '{}'.", target.display());
        Ok(())
    }

    /// Rehydrates toolsets from the snapshot file, if one exists. Corrupt
    /// files and malformed entries are treated as absent; entries whose
    /// compiler path disappeared are dropped.
    pub fn load_cached_entries(&self) -> usize {
        let Some(storage) = self.storage_path.lock().unwrap().clone() else {
            return 0;
        };
        let path = storage.join(DETECTED_TOOLSETS_FILENAME);
        let Ok(text) = std::fs::read_to_string(&path) else {
            return 0;
        };
        let Ok(entries) = serde_json::from_str::<IndexMap<String, Value>>(&text) else {
            log::warn!("Toolset snapshot at '{}' is corrupt; ignoring.", path.display());
            return 0;
        };

        let mut loaded = 0;
        let mut toolsets = self.toolsets.lock().unwrap();
        for (key, entry) in entries {
            let Ok(serialized) = serde_json::from_value::<SerializedToolset>(entry) else {
                log::debug!("Dropping malformed snapshot entry '{}'.", key);
                continue;
            };
            let Some(toolset) = Toolset::from_serialized(serialized) else {
                log::debug!("Dropping stale snapshot entry '{}'.", key);
                continue;
            };
            if !toolsets.contains_key(&key) {
                toolsets.insert(key, Arc::new(toolset));
                loaded += 1;
            }
        }
        log::debug!("Rehydrated {} toolset(s) from '{}'.", loaded, path.display());
        loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DefinitionFile;
    use serde_json::json;

    #[cfg(unix)]
    fn fake_compiler(dir: &Path, name: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn definition(name: &str) -> DefinitionFile {
        DefinitionFile::from_value(json!({
            "name": name,
            "intellisense": { "version": "1.0", "architecture": "x64", "hostArchitecture": "x64" }
        }))
        .unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_first_registration_wins() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = fake_compiler(dir.path(), "gcc");

        let registry = ToolsetRegistry::new();
        let first = registry.register(Toolset::new(compiler.clone(), definition("first")));
        let second = registry.register(Toolset::new(compiler, definition("second")));
        assert_eq!(registry.len(), 1);
        assert_eq!(first.definition().name(), "first");
        assert_eq!(second.definition().name(), "first");
    }

    #[cfg(unix)]
    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = tempfile::tempdir().unwrap();
        let compiler = fake_compiler(dir.path(), "gcc");

        let registry = ToolsetRegistry::new();
        registry.set_storage_path(Some(storage.path().to_path_buf()));
        let toolset = registry.register(Toolset::new(compiler, definition("gcc")));
        toolset.store_query("-v".to_string(), "gcc version 13".to_string());
        toolset.store_analysis("-O2".to_string(), json!({ "language": "c" }));
        registry.mark_dirty();
        registry.flush().unwrap();

        let restored = ToolsetRegistry::new();
        restored.set_storage_path(Some(storage.path().to_path_buf()));
        assert_eq!(restored.load_cached_entries(), 1);
        let (_, rehydrated) = restored.snapshot().into_iter().next().unwrap();
        assert_eq!(rehydrated.definition().name(), "gcc");
        assert_eq!(
            rehydrated.cached_query("-v").as_deref(),
            Some("gcc version 13")
        );
        assert_eq!(
            rehydrated.cached_analysis("-O2"),
            Some(json!({ "language": "c" }))
        );
    }

    #[test]
    fn test_corrupt_snapshot_is_treated_as_absent() {
        let storage = tempfile::tempdir().unwrap();
        std::fs::write(
            storage.path().join(DETECTED_TOOLSETS_FILENAME),
            b"{ corrupt",
        )
        .unwrap();

        let registry = ToolsetRegistry::new();
        registry.set_storage_path(Some(storage.path().to_path_buf()));
        assert_eq!(registry.load_cached_entries(), 0);
        assert!(registry.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_entries_are_dropped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let storage = tempfile::tempdir().unwrap();
        let compiler = fake_compiler(dir.path(), "clang");

        let registry = ToolsetRegistry::new();
        registry.set_storage_path(Some(storage.path().to_path_buf()));
        registry.register(Toolset::new(compiler.clone(), definition("clang")));
        registry.flush().unwrap();

        std::fs::remove_file(&compiler).unwrap();

        let restored = ToolsetRegistry::new();
        restored.set_storage_path(Some(storage.path().to_path_buf()));
        assert_eq!(restored.load_cached_entries(), 0);
    }

    #[test]
    fn test_flush_without_changes_is_a_no_op() {
        let storage = tempfile::tempdir().unwrap();
        let registry = ToolsetRegistry::new();
        registry.set_storage_path(Some(storage.path().to_path_buf()));
        registry.flush().unwrap();
        assert!(!storage.path().join(DETECTED_TOOLSETS_FILENAME).exists());
    }
}
