// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local key-value store: timeline mappings, the stable client id, and the
//! user profile, persisted as one JSON file with atomic writes.
//!
//! When the file cannot be opened or written the store degrades to
//! memory-only and warns once; everything keeps working for the lifetime of
//! the process, nothing survives it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// File-backed key-value store.
pub struct KvStore {
    path: Option<PathBuf>,
    data: Mutex<HashMap<String, serde_json::Value>>,
}

impl KvStore {
    /// Open (or create) the store under the given data directory.
    pub fn open(data_dir: &Path) -> Self {
        let path = data_dir.join("local.json");
        match Self::load(data_dir, &path) {
            Ok(data) => Self { path: Some(path), data: Mutex::new(data) },
            Err(e) => {
                tracing::warn!(err = %e, "local storage unavailable, running memory-only");
                Self::memory()
            }
        }
    }

    /// A store that never touches disk.
    pub fn memory() -> Self {
        Self { path: None, data: Mutex::new(HashMap::new()) }
    }

    /// True when writes reach disk.
    pub fn is_durable(&self) -> bool {
        self.path.is_some()
    }

    fn load(data_dir: &Path, path: &Path) -> anyhow::Result<HashMap<String, serde_json::Value>> {
        std::fs::create_dir_all(data_dir)?;
        if !path.exists() {
            // Probe writability up front so the degraded mode surfaces at
            // open time, not on the first write.
            std::fs::write(path, "{}")?;
            return Ok(HashMap::new());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.lock().get(key).cloned()
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_owned))
    }

    pub fn set(&self, key: &str, value: serde_json::Value) {
        let snapshot = {
            let mut data = self.lock();
            data.insert(key.to_owned(), value);
            data.clone()
        };
        self.save(&snapshot);
    }

    pub fn set_string(&self, key: &str, value: &str) {
        self.set(key, serde_json::Value::String(value.to_owned()));
    }

    pub fn remove(&self, key: &str) {
        let snapshot = {
            let mut data = self.lock();
            data.remove(key);
            data.clone()
        };
        self.save(&snapshot);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, serde_json::Value>> {
        self.data.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Atomic write (tmp + rename), best-effort.
    fn save(&self, data: &HashMap<String, serde_json::Value>) {
        let Some(path) = &self.path else {
            return;
        };
        let Ok(json) = serde_json::to_string_pretty(data) else {
            return;
        };
        let tmp = path.with_extension("tmp");
        if std::fs::write(&tmp, json).and_then(|()| std::fs::rename(&tmp, path)).is_err() {
            tracing::debug!(path = %path.display(), "key-value save failed");
        }
    }
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
