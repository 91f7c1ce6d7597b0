// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signaling relay for collaborative puzzle sessions.
//!
//! A room-scoped publish/subscribe broker: clients subscribe to topics,
//! publishes fan out to current subscribers (sender included) stamped with
//! the live subscriber count, and TTL sweeps retire stale connections,
//! expired visitor records, and inactive rooms. Puzzle content never crosses
//! this service — payloads are opaque.

pub mod broker;
pub mod clock;
pub mod config;
pub mod msg;
pub mod state;
pub mod storage;
pub mod sweep;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::state::RelayState;
use crate::sweep::spawn_sweeper;
use crate::transport::build_router;

/// Run the relay until shutdown.
pub async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    if config.test_routes {
        tracing::warn!("test subroutes enabled; do not expose this relay publicly");
    }

    let state = Arc::new(RelayState::new(config, shutdown.clone())?);
    spawn_sweeper(Arc::clone(&state));

    tracing::info!("relay listening on {addr}");
    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}
