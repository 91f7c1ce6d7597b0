// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker persistence: load/save the snapshot as JSON with atomic writes.

use std::path::{Path, PathBuf};

use crate::broker::BrokerSnapshot;

/// File-backed broker storage.
#[derive(Debug, Clone)]
pub struct BrokerStorage {
    path: PathBuf,
}

impl BrokerStorage {
    /// Open storage under the given data directory, creating it as needed.
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self { path: data_dir.join("broker.json") })
    }

    /// Load the persisted snapshot. A missing file is an empty broker.
    pub fn load(&self) -> anyhow::Result<BrokerSnapshot> {
        if !self.path.exists() {
            return Ok(BrokerSnapshot::default());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        let snapshot: BrokerSnapshot = serde_json::from_str(&contents)?;
        Ok(snapshot)
    }

    /// Save a snapshot atomically (write tmp + rename).
    pub fn save(&self, snapshot: &BrokerSnapshot) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(snapshot)?;
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Delete persisted state. Test-route reset only.
    pub fn wipe(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
