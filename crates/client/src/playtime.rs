// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Play-time aggregator.
//!
//! Each client advances its own counter in the `durations` map while the
//! solver is actively looking at the puzzle; pausing (the page-hidden
//! analog) stops the clock and resuming resets the tick origin so hidden
//! time is never counted. The displayed aggregate is the max across
//! clients, not the sum — "wall time somebody was actively solving".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::doc::PuzzleDoc;

const TICK: Duration = Duration::from_secs(1);

struct TickState {
    last_tick: Option<Instant>,
    total_ms: u64,
    written_ms: u64,
}

/// Per-client play clock bound to one document.
pub struct PlayClock {
    doc: Arc<PuzzleDoc>,
    client_id: String,
    active: AtomicBool,
    state: Mutex<TickState>,
}

impl PlayClock {
    /// Seed the counter from the document (a returning client continues
    /// where it left off) and start active.
    pub fn new(doc: Arc<PuzzleDoc>, client_id: impl Into<String>) -> Self {
        let client_id = client_id.into();
        let seed = doc
            .get(crate::doc::types::DocMap::Durations, &client_id)
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Self {
            doc,
            client_id,
            active: AtomicBool::new(true),
            state: Mutex::new(TickState { last_tick: None, total_ms: seed, written_ms: seed }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TickState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The solver looked away: stop counting.
    pub fn pause(&self) {
        self.active.store(false, Ordering::Release);
        self.lock().last_tick = None;
    }

    /// Back to solving. The tick origin resets so paused time is skipped.
    pub fn resume(&self) {
        self.lock().last_tick = Some(Instant::now());
        self.active.store(true, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Local accumulated play time.
    pub fn local_ms(&self) -> u64 {
        self.lock().total_ms
    }

    /// Advance by elapsed wall time and publish into the document when the
    /// value changed.
    pub fn tick(&self) {
        if !self.is_active() {
            return;
        }
        let now = Instant::now();
        let write = {
            let mut state = self.lock();
            if let Some(last) = state.last_tick {
                state.total_ms += now.duration_since(last).as_millis() as u64;
            }
            state.last_tick = Some(now);
            if state.total_ms > state.written_ms {
                state.written_ms = state.total_ms;
                Some(state.total_ms)
            } else {
                None
            }
        };
        if let Some(ms) = write {
            self.doc.record_duration(&self.client_id, ms);
        }
    }

    /// Run the 1 s ticker until cancelled.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) {
        let clock = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = interval.tick() => clock.tick(),
                }
            }
        });
    }
}

#[cfg(test)]
#[path = "playtime_tests.rs"]
mod tests;
