// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-puzzle durable op log.
//!
//! Every applied op is appended as one JSONL line to
//! `<data_dir>/docs/puzzle-{id}.log`; construction replays the file before
//! the document reports ready. A log that cannot be opened degrades the
//! document to memory-only with a one-time warning.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::doc::types::Op;

/// File-backed append-only op log.
pub struct DocStore {
    path: Option<PathBuf>,
}

impl DocStore {
    /// Open the log for a puzzle, creating the directory as needed.
    pub fn open(data_dir: &Path, puzzle_id: &str) -> Self {
        let dir = data_dir.join("docs");
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!(err = %e, "op log unavailable, document is memory-only");
            return Self::memory();
        }
        Self { path: Some(dir.join(log_name(puzzle_id))) }
    }

    /// A log that never touches disk.
    pub fn memory() -> Self {
        Self { path: None }
    }

    pub fn is_durable(&self) -> bool {
        self.path.is_some()
    }

    /// Replay all logged ops in append order. Damaged lines are skipped.
    pub fn replay(&self) -> Vec<Op> {
        let Some(path) = &self.path else {
            return Vec::new();
        };
        let Ok(contents) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        contents.lines().filter_map(|line| serde_json::from_str(line).ok()).collect()
    }

    /// Append one op, best-effort.
    pub fn append(&self, op: &Op) {
        let Some(path) = &self.path else {
            return;
        };
        let Ok(mut line) = serde_json::to_string(op) else {
            return;
        };
        line.push('\n');
        let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(path) else {
            return;
        };
        let _ = file.write_all(line.as_bytes());
    }

    /// Drop all logged ops. Used by "reset puzzle" and fresh-start joins.
    pub fn truncate(&self) {
        if let Some(path) = &self.path {
            let _ = std::fs::remove_file(path);
        }
    }

    /// Logged-op count for the local-progress probe, without constructing a
    /// document.
    pub fn update_count(data_dir: &Path, puzzle_id: &str) -> usize {
        let path = data_dir.join("docs").join(log_name(puzzle_id));
        match std::fs::read_to_string(path) {
            Ok(contents) => contents.lines().filter(|l| !l.is_empty()).count(),
            Err(_) => 0,
        }
    }
}

fn log_name(puzzle_id: &str) -> String {
    format!("puzzle-{puzzle_id}.log")
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
