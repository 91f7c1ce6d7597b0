// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Awareness: transient presence shared over the peer transport's side
//! channel. Identity, color, and cursor per client; kept in memory only,
//! never entering the replicated document, cleared on disconnect.
//!
//! Each client's state carries an update counter so a late or reordered
//! broadcast can never regress newer state.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Cursor direction along a word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Across,
    Down,
}

/// A collaborator's cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub row: u16,
    pub col: u16,
    pub direction: Direction,
}

/// Identity part of the awareness state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Full per-client awareness state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwarenessState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

/// One client's state as it travels between peers. `state: None` announces
/// departure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwarenessEntry {
    pub tag: String,
    pub clock: u64,
    pub state: Option<AwarenessState>,
}

/// Change notification: which client tags appeared, moved, or left.
#[derive(Debug, Clone, Default)]
pub struct AwarenessChange {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl AwarenessChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

struct Slot {
    state: AwarenessState,
    clock: u64,
}

struct AwarenessInner {
    local: Slot,
    peers: HashMap<String, Slot>,
}

/// Awareness table for one transport.
pub struct Awareness {
    tag: String,
    inner: Mutex<AwarenessInner>,
    changes: broadcast::Sender<AwarenessChange>,
}

impl Awareness {
    pub fn new(tag: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            tag: tag.into(),
            inner: Mutex::new(AwarenessInner {
                local: Slot { state: AwarenessState::default(), clock: 0 },
                peers: HashMap::new(),
            }),
            changes,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn changes(&self) -> broadcast::Receiver<AwarenessChange> {
        self.changes.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, AwarenessInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Update the local state. Returns the entry to broadcast.
    pub fn set_local(&self, state: AwarenessState) -> AwarenessEntry {
        let mut inner = self.lock();
        inner.local.clock += 1;
        inner.local.state = state.clone();
        AwarenessEntry { tag: self.tag.clone(), clock: inner.local.clock, state: Some(state) }
    }

    pub fn local_state(&self) -> AwarenessState {
        self.lock().local.state.clone()
    }

    /// The full table (local included) for the initial exchange with a new
    /// peer. A local state that was never set stays out: there is nothing
    /// to announce, and an empty entry would read as a nameless join.
    pub fn snapshot(&self) -> Vec<AwarenessEntry> {
        let inner = self.lock();
        let mut entries = Vec::new();
        if inner.local.clock > 0 {
            entries.push(AwarenessEntry {
                tag: self.tag.clone(),
                clock: inner.local.clock,
                state: Some(inner.local.state.clone()),
            });
        }
        entries.extend(inner.peers.iter().map(|(tag, slot)| AwarenessEntry {
            tag: tag.clone(),
            clock: slot.clock,
            state: Some(slot.state.clone()),
        }));
        entries
    }

    /// The departure entry broadcast when this client leaves.
    pub fn depart_entry(&self) -> AwarenessEntry {
        let mut inner = self.lock();
        inner.local.clock += 1;
        AwarenessEntry { tag: self.tag.clone(), clock: inner.local.clock, state: None }
    }

    /// Integrate remote entries. Stale clocks are ignored; `state: None`
    /// removes the peer. Fires one change event covering the batch.
    pub fn apply(&self, entries: &[AwarenessEntry]) -> AwarenessChange {
        let mut change = AwarenessChange::default();
        {
            let mut inner = self.lock();
            for entry in entries {
                if entry.tag == self.tag {
                    continue;
                }
                match (&entry.state, inner.peers.get_mut(&entry.tag)) {
                    (Some(state), Some(slot)) => {
                        if entry.clock > slot.clock {
                            slot.clock = entry.clock;
                            if slot.state != *state {
                                slot.state = state.clone();
                                change.updated.push(entry.tag.clone());
                            }
                        }
                    }
                    (Some(state), None) => {
                        inner.peers.insert(
                            entry.tag.clone(),
                            Slot { state: state.clone(), clock: entry.clock },
                        );
                        change.added.push(entry.tag.clone());
                    }
                    (None, Some(slot)) => {
                        if entry.clock > slot.clock {
                            inner.peers.remove(&entry.tag);
                            change.removed.push(entry.tag.clone());
                        }
                    }
                    (None, None) => {}
                }
            }
        }
        if !change.is_empty() {
            let _ = self.changes.send(change.clone());
        }
        change
    }

    /// Drop a peer whose connection went away without a departure entry.
    pub fn remove_peer(&self, tag: &str) {
        let removed = {
            let mut inner = self.lock();
            inner.peers.remove(tag).is_some()
        };
        if removed {
            let change =
                AwarenessChange { removed: vec![tag.to_owned()], ..AwarenessChange::default() };
            let _ = self.changes.send(change);
        }
    }

    /// Drop every peer. Used at transport teardown.
    pub fn clear(&self) {
        let removed: Vec<String> = {
            let mut inner = self.lock();
            inner.peers.drain().map(|(tag, _)| tag).collect()
        };
        if !removed.is_empty() {
            let _ = self.changes.send(AwarenessChange { removed, ..AwarenessChange::default() });
        }
    }

    /// Current peer states (local excluded).
    pub fn peer_states(&self) -> Vec<(String, AwarenessState)> {
        self.lock().peers.iter().map(|(tag, slot)| (tag.clone(), slot.state.clone())).collect()
    }
}

#[cfg(test)]
#[path = "awareness_tests.rs"]
mod tests;
