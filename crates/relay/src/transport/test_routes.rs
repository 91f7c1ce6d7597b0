// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test-only subroutes under `/__test__/`.
//!
//! Mounted only with `--test-routes`; production builds of the router never
//! see these. They expose the knobs the end-to-end suites need: a storage
//! snapshot, a manual sweep trigger, simulated-time advancement, forced
//! hibernation, and a full reset.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::state::RelayState;
use crate::sweep::run_sweep;

pub fn router() -> Router<Arc<RelayState>> {
    Router::new()
        .route("/storage", get(storage_snapshot))
        .route("/alarm", post(trigger_alarm))
        .route("/advance", post(advance_clock))
        .route("/hibernate", post(hibernate))
        .route("/reset", post(reset))
}

/// `GET /__test__/storage` — persisted records plus live connection count.
async fn storage_snapshot(State(state): State<Arc<RelayState>>) -> Json<serde_json::Value> {
    let broker = state.broker.lock().await;
    let snapshot = broker.snapshot();
    Json(serde_json::json!({
        "visitors": snapshot.visitors,
        "rooms": snapshot.rooms,
        "live_connections": broker.live_connections(),
    }))
}

/// `POST /__test__/alarm` — run one sweep pass immediately.
async fn trigger_alarm(State(state): State<Arc<RelayState>>) -> Json<serde_json::Value> {
    let report = run_sweep(&state).await;
    Json(serde_json::json!({
        "closed_connections": report.closed_connections,
        "removed_visitors": report.removed_visitors,
        "removed_rooms": report.removed_rooms,
    }))
}

#[derive(Debug, Deserialize)]
struct AdvanceBody {
    ms: u64,
}

/// `POST /__test__/advance {"ms": ...}` — fast-forward the relay clock.
async fn advance_clock(
    State(state): State<Arc<RelayState>>,
    Json(body): Json<AdvanceBody>,
) -> Json<serde_json::Value> {
    state.clock.advance(body.ms);
    Json(serde_json::json!({ "now_ms": state.clock.now_ms() }))
}

/// `POST /__test__/hibernate` — drop in-memory attachments, as if the
/// hosting runtime suspended the broker.
async fn hibernate(State(state): State<Arc<RelayState>>) -> Json<serde_json::Value> {
    let mut broker = state.broker.lock().await;
    broker.hibernate();
    Json(serde_json::json!({ "hibernated": true }))
}

/// `POST /__test__/reset` — clear broker and persisted state.
async fn reset(State(state): State<Arc<RelayState>>) -> Json<serde_json::Value> {
    let mut broker = state.broker.lock().await;
    broker.reset();
    if let Some(storage) = &state.storage {
        storage.wipe();
    }
    Json(serde_json::json!({ "reset": true }))
}
