// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relay time source with a test-only forward offset.
//!
//! All TTL arithmetic goes through [`Clock::now_ms`] so the `/__test__/advance`
//! route can fast-forward sweeps without real waiting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Epoch-millisecond clock. Cloning shares the offset.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    offset_ms: Arc<AtomicU64>,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time in epoch milliseconds, including any simulated advance.
    pub fn now_ms(&self) -> u64 {
        let wall = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        wall + self.offset_ms.load(Ordering::Relaxed)
    }

    /// Advance simulated time. Only reachable through the test subroutes.
    pub fn advance(&self, ms: u64) {
        self.offset_ms.fetch_add(ms, Ordering::Relaxed);
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
