// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Replicated-document wire types: ops, stamps, updates, state vectors.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The named maps inside one puzzle document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocMap {
    Entries,
    Verified,
    Errors,
    Settings,
    Durations,
    Puzzle,
}

impl DocMap {
    pub const ALL: [DocMap; 6] = [
        DocMap::Entries,
        DocMap::Verified,
        DocMap::Errors,
        DocMap::Settings,
        DocMap::Durations,
        DocMap::Puzzle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entries => "entries",
            Self::Verified => "verified",
            Self::Errors => "errors",
            Self::Settings => "settings",
            Self::Durations => "durations",
            Self::Puzzle => "puzzle",
        }
    }
}

/// Lamport stamp: per-document counter plus the writing client id.
/// Total order: counter first, client id as tiebreak.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Stamp {
    pub counter: u64,
    pub client: String,
}

/// One keyed write. `value: None` is a tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Op {
    pub map: DocMap,
    pub key: String,
    pub value: Option<serde_json::Value>,
    pub stamp: Stamp,
}

/// Per-client high-water marks: which ops a replica has seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVector(pub HashMap<String, u64>);

impl StateVector {
    pub fn seen(&self, stamp: &Stamp) -> bool {
        self.0.get(&stamp.client).is_some_and(|&c| c >= stamp.counter)
    }

    pub fn observe(&mut self, stamp: &Stamp) {
        let entry = self.0.entry(stamp.client.clone()).or_insert(0);
        *entry = (*entry).max(stamp.counter);
    }
}

/// A batch of ops in log order. Application is idempotent and commutative,
/// so re-running an exchange converges without duplication.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub ops: Vec<Op>,
}

impl Update {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Where an applied op came from, carried on observer events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

/// Observer event: one visible map change.
#[derive(Debug, Clone)]
pub struct DocEvent {
    pub map: DocMap,
    pub key: String,
    pub value: Option<serde_json::Value>,
    pub origin: Origin,
}

/// Grid cell key, `"{row},{col}"`.
pub fn cell_key(row: u16, col: u16) -> String {
    format!("{row},{col}")
}

/// Inverse of [`cell_key`].
pub fn parse_cell_key(key: &str) -> Option<(u16, u16)> {
    let (row, col) = key.split_once(',')?;
    Some((row.parse().ok()?, col.parse().ok()?))
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
