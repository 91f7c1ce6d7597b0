// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic TTL alarm.
//!
//! Runs the three broker sweeps (stale connections, expired visitors,
//! inactive rooms) on a fixed interval. When the broker is completely empty
//! the alarm parks itself and is re-armed by the next accepted connection.

use std::sync::Arc;

use crate::broker::SweepReport;
use crate::state::RelayState;

/// Spawn the sweeper task. Lives until shutdown.
pub fn spawn_sweeper(state: Arc<RelayState>) {
    tokio::spawn(async move {
        let interval = state.config.sweep_interval();
        loop {
            let empty = state.broker.lock().await.is_empty();
            if empty {
                tokio::select! {
                    _ = state.activity.notified() => {}
                    _ = state.shutdown.cancelled() => return,
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = state.shutdown.cancelled() => return,
            }
            run_sweep(&state).await;
        }
    });
}

/// Run one sweep pass now. Shared with the `/__test__/alarm` route.
pub async fn run_sweep(state: &RelayState) -> SweepReport {
    let now = state.clock.now_ms();
    let mut broker = state.broker.lock().await;
    let report = broker.sweep(&state.config, now);
    if !report.is_empty() {
        state.persist(&broker);
        tracing::info!(
            closed = report.closed_connections,
            visitors = report.removed_visitors,
            rooms = report.removed_rooms,
            "sweep retired stale state"
        );
    }
    report
}
