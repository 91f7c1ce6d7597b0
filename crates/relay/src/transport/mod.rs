// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the relay.

pub mod test_routes;
pub mod ws;

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::RelayState;

/// Build the axum `Router`. Test subroutes are mounted only when enabled in
/// the configuration.
pub fn build_router(state: Arc<RelayState>) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/signaling", get(ws::ws_handler));

    if state.config.test_routes {
        router = router.nest("/__test__", test_routes::router());
    }

    router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /healthz` — liveness probe.
async fn healthz(
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> Json<serde_json::Value> {
    let broker = state.broker.lock().await;
    Json(serde_json::json!({
        "status": "ok",
        "live_connections": broker.live_connections(),
    }))
}
