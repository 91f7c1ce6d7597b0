// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-puzzle replicated document.
//!
//! Six named last-writer-wins maps inside one op-based CRDT: `entries`,
//! `verified`, `errors`, `settings`, `durations`, `puzzle`. Concurrent
//! writers are ordered by Lamport stamp; replicas exchange deltas keyed by
//! state vectors. Construction replays the local op log, so the document is
//! ready the moment `open` returns and the peer transport can attach without
//! advertising an empty replica.

pub mod store;
pub mod types;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use base64::Engine;
use tokio::sync::broadcast;

use crate::doc::store::DocStore;
use crate::doc::types::{cell_key, DocEvent, DocMap, Op, Origin, Stamp, StateVector, Update};

/// How a cell became immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifiedKind {
    Checked,
    Revealed,
}

impl VerifiedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checked => "checked",
            Self::Revealed => "revealed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "checked" => Some(Self::Checked),
            "revealed" => Some(Self::Revealed),
            _ => None,
        }
    }
}

/// Result of checking one cell against its solution letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Entry matched; the cell is now locked.
    Verified,
    /// Entry present but wrong; flagged in `errors`.
    Wrong,
    /// Nothing entered; checking skips the cell.
    Empty,
    /// Already locked; re-checks are no-ops.
    AlreadyVerified,
}

/// One live register: the winning value (None = tombstone) and its stamp.
struct Register {
    value: Option<serde_json::Value>,
    stamp: Stamp,
}

struct DocInner {
    maps: HashMap<DocMap, HashMap<String, Register>>,
    log: Vec<Op>,
    sv: StateVector,
    lamport: u64,
    store: DocStore,
}

impl DocInner {
    /// Apply one op to the registers. Returns true when the visible value
    /// of the key changed. Stale ops (lower stamp than the current winner)
    /// still enter the log so delta sync stays gap-free.
    fn apply_op(&mut self, op: &Op) -> bool {
        self.log.push(op.clone());
        self.sv.observe(&op.stamp);

        let registers = self.maps.entry(op.map).or_default();
        match registers.get_mut(&op.key) {
            Some(existing) if existing.stamp >= op.stamp => false,
            Some(existing) => {
                let changed = existing.value != op.value;
                existing.value = op.value.clone();
                existing.stamp = op.stamp.clone();
                changed
            }
            None => {
                registers.insert(
                    op.key.clone(),
                    Register { value: op.value.clone(), stamp: op.stamp.clone() },
                );
                op.value.is_some()
            }
        }
    }

    fn get(&self, map: DocMap, key: &str) -> Option<serde_json::Value> {
        self.maps.get(&map)?.get(key)?.value.clone()
    }
}

/// The replicated document for one puzzle.
pub struct PuzzleDoc {
    puzzle_id: String,
    client: String,
    inner: Mutex<DocInner>,
    events: broadcast::Sender<DocEvent>,
    updates: broadcast::Sender<Update>,
    durable: bool,
    destroyed: AtomicBool,
}

impl PuzzleDoc {
    /// Open the document, replaying the durable log. When `open` returns
    /// the replica is ready; attach transports only after this point.
    pub fn open(puzzle_id: impl Into<String>, client: impl Into<String>, store: DocStore) -> Self {
        let durable = store.is_durable();
        let mut inner =
            DocInner { maps: HashMap::new(), log: Vec::new(), sv: StateVector::default(), lamport: 0, store };

        for op in inner.store.replay() {
            if inner.sv.seen(&op.stamp) {
                continue;
            }
            inner.lamport = inner.lamport.max(op.stamp.counter);
            // Replay goes through the registers but not back into the log
            // file; `apply_op` only touches the in-memory log.
            inner.apply_op(&op);
        }

        let (events, _) = broadcast::channel(1024);
        let (updates, _) = broadcast::channel(1024);
        Self {
            puzzle_id: puzzle_id.into(),
            client: client.into(),
            inner: Mutex::new(inner),
            events,
            updates,
            durable,
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn puzzle_id(&self) -> &str {
        &self.puzzle_id
    }

    pub fn client_id(&self) -> &str {
        &self.client
    }

    /// False when the op log could not be opened and edits live only in
    /// memory.
    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Subscribe to visible map changes. Dropping the receiver
    /// unsubscribes; doing so twice is naturally a no-op.
    pub fn observe(&self) -> broadcast::Receiver<DocEvent> {
        self.events.subscribe()
    }

    /// Subscribe to locally-originated updates, for transport fan-out.
    pub fn updates(&self) -> broadcast::Receiver<Update> {
        self.updates.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, DocInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- Sync surface ---------------------------------------------------------

    pub fn state_vector(&self) -> StateVector {
        self.lock().sv.clone()
    }

    /// Ops the remote replica has not seen, in log order.
    pub fn diff(&self, remote: &StateVector) -> Update {
        let inner = self.lock();
        Update { ops: inner.log.iter().filter(|op| !remote.seen(&op.stamp)).cloned().collect() }
    }

    /// Apply a remote update. Idempotent: already-seen ops are skipped.
    /// Returns the number of newly-integrated ops.
    pub fn apply(&self, update: &Update) -> usize {
        if self.destroyed.load(Ordering::Acquire) {
            return 0;
        }
        let mut fired = Vec::new();
        let mut integrated = 0usize;
        {
            let mut inner = self.lock();
            for op in &update.ops {
                if inner.sv.seen(&op.stamp) {
                    continue;
                }
                inner.lamport = inner.lamport.max(op.stamp.counter);
                let changed = inner.apply_op(op);
                inner.store.append(op);
                integrated += 1;
                if changed {
                    fired.push(DocEvent {
                        map: op.map,
                        key: op.key.clone(),
                        value: op.value.clone(),
                        origin: Origin::Remote,
                    });
                }
            }
        }
        for event in fired {
            let _ = self.events.send(event);
        }
        integrated
    }

    fn write(&self, map: DocMap, key: String, value: Option<serde_json::Value>) {
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }
        let op = {
            let mut inner = self.lock();
            inner.lamport += 1;
            let op = Op {
                map,
                key,
                value,
                stamp: Stamp { counter: inner.lamport, client: self.client.clone() },
            };
            inner.apply_op(&op);
            inner.store.append(&op);
            op
        };
        let _ = self.events.send(DocEvent {
            map: op.map,
            key: op.key.clone(),
            value: op.value.clone(),
            origin: Origin::Local,
        });
        let _ = self.updates.send(Update { ops: vec![op] });
    }

    // -- Reads ----------------------------------------------------------------

    pub fn get(&self, map: DocMap, key: &str) -> Option<serde_json::Value> {
        self.lock().get(map, key)
    }

    /// Live (non-tombstoned) contents of one map.
    pub fn snapshot(&self, map: DocMap) -> HashMap<String, serde_json::Value> {
        let inner = self.lock();
        inner
            .maps
            .get(&map)
            .map(|registers| {
                registers
                    .iter()
                    .filter_map(|(k, r)| r.value.clone().map(|v| (k.clone(), v)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn entry(&self, row: u16, col: u16) -> Option<String> {
        self.get(DocMap::Entries, &cell_key(row, col))?.as_str().map(str::to_owned)
    }

    pub fn verified(&self, row: u16, col: u16) -> Option<VerifiedKind> {
        VerifiedKind::parse(self.get(DocMap::Verified, &cell_key(row, col))?.as_str()?)
    }

    pub fn has_error(&self, row: u16, col: u16) -> bool {
        self.get(DocMap::Errors, &cell_key(row, col)).is_some()
    }

    // -- Grid operations ------------------------------------------------------

    /// Type a letter. Verified cells silently consume the keystroke and
    /// return false so the caller advances the cursor past them.
    pub fn enter_letter(&self, row: u16, col: u16, letter: char) -> bool {
        if self.verified(row, col).is_some() {
            return false;
        }
        let value = letter.to_ascii_uppercase().to_string();
        self.write(DocMap::Entries, cell_key(row, col), Some(value.into()));
        true
    }

    /// Backspace. Refused on verified cells.
    pub fn erase_letter(&self, row: u16, col: u16) -> bool {
        if self.verified(row, col).is_some() {
            return false;
        }
        self.write(DocMap::Entries, cell_key(row, col), None);
        true
    }

    /// Check one cell against its solution letter.
    pub fn check_cell(&self, row: u16, col: u16, solution: char) -> CheckOutcome {
        if self.verified(row, col).is_some() {
            return CheckOutcome::AlreadyVerified;
        }
        let key = cell_key(row, col);
        let Some(entry) = self.entry(row, col) else {
            return CheckOutcome::Empty;
        };
        if entry.eq_ignore_ascii_case(&solution.to_string()) {
            self.write(DocMap::Verified, key.clone(), Some(VerifiedKind::Checked.as_str().into()));
            if self.has_error(row, col) {
                self.write(DocMap::Errors, key, None);
            }
            CheckOutcome::Verified
        } else {
            self.write(DocMap::Errors, key, Some(true.into()));
            CheckOutcome::Wrong
        }
    }

    /// Reveal one cell: overwrite with the solution letter and lock it.
    pub fn reveal_cell(&self, row: u16, col: u16, solution: char) {
        if self.verified(row, col).is_some() {
            return;
        }
        let key = cell_key(row, col);
        self.write(DocMap::Entries, key.clone(), Some(solution.to_ascii_uppercase().to_string().into()));
        self.write(DocMap::Verified, key.clone(), Some(VerifiedKind::Revealed.as_str().into()));
        if self.has_error(row, col) {
            self.write(DocMap::Errors, key, None);
        }
    }

    // -- Settings, durations, payload -----------------------------------------

    pub fn set_setting(&self, name: &str, value: serde_json::Value) {
        self.write(DocMap::Settings, name.to_owned(), Some(value));
    }

    pub fn setting(&self, name: &str) -> Option<serde_json::Value> {
        self.get(DocMap::Settings, name)
    }

    /// Record this client's accumulated play time. Writes are dropped unless
    /// they increase the stored value, keeping per-client durations
    /// monotone.
    pub fn record_duration(&self, client_id: &str, ms: u64) {
        let current =
            self.get(DocMap::Durations, client_id).and_then(|v| v.as_u64()).unwrap_or(0);
        if ms > current {
            self.write(DocMap::Durations, client_id.to_owned(), Some(ms.into()));
        }
    }

    /// Aggregate play time: the element-wise max across clients, "wall time
    /// somebody was actively solving".
    pub fn max_duration(&self) -> u64 {
        self.snapshot(DocMap::Durations).values().filter_map(|v| v.as_u64()).max().unwrap_or(0)
    }

    /// Publish the puzzle payload for late joiners. Write-once: returns
    /// false if a payload is already present.
    pub fn share_puzzle_payload(&self, payload: &[u8]) -> bool {
        if self.get(DocMap::Puzzle, "data").is_some() {
            return false;
        }
        let encoded = base64::engine::general_purpose::STANDARD.encode(payload);
        self.write(DocMap::Puzzle, "data".to_owned(), Some(encoded.into()));
        true
    }

    /// The bootstrap payload, if any peer shared one.
    pub fn puzzle_payload(&self) -> Option<Vec<u8>> {
        let encoded = self.get(DocMap::Puzzle, "data")?;
        base64::engine::general_purpose::STANDARD.decode(encoded.as_str()?).ok()
    }

    // -- Lifecycle ------------------------------------------------------------

    /// Wipe this replica: registers, log, durable storage. The shared
    /// timeline is untouched — other replicas keep their history.
    pub fn clear_local(&self) {
        let mut inner = self.lock();
        inner.maps.clear();
        inner.log.clear();
        inner.sv = StateVector::default();
        inner.lamport = 0;
        inner.store.truncate();
    }

    /// Tear down. Idempotent; later writes and applies are no-ops.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
#[path = "doc_tests.rs"]
mod tests;
