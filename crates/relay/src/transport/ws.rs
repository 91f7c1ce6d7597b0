// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `GET /signaling` — WebSocket endpoint for the room broker.
//!
//! One task per connection. Inbound frames are dispatched to the broker in
//! arrival order; outbound frames arrive on a per-connection channel so
//! fan-out never blocks on a slow socket.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::broker::{ConnId, Outbound};
use crate::msg::ClientFrame;
use crate::state::RelayState;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    State(state): State<Arc<RelayState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(state, socket))
}

/// Per-connection event loop.
async fn handle_connection(state: Arc<RelayState>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut outbound_rx) = mpsc::unbounded_channel();

    let (conn_id, visitor_id) = {
        let mut broker = state.broker.lock().await;
        broker.accept(tx, state.clock.now_ms())
    };
    // notify_one stores a permit, so an accept that races the sweeper's
    // park still re-arms it.
    state.activity.notify_one();
    tracing::debug!(visitor = %visitor_id, "connection accepted");

    loop {
        tokio::select! {
            out = outbound_rx.recv() => {
                match out {
                    Some(Outbound::Frame(json)) => {
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close(code)) => {
                        let frame = CloseFrame { code, reason: "idle".into() };
                        let _ = ws_tx.send(Message::Close(Some(frame))).await;
                        break;
                    }
                    None => break,
                }
            }
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(_)) | None => break,
                };
                match msg {
                    Message::Text(text) => {
                        handle_frame(&state, conn_id, &text).await;
                    }
                    Message::Close(_) => break,
                    // Binary frames are ignored; pings are answered by axum.
                    _ => {}
                }
            }
        }
    }

    let mut broker = state.broker.lock().await;
    broker.disconnect(conn_id, state.clock.now_ms());
    state.persist(&broker);
    tracing::debug!(visitor = %visitor_id, "connection closed");
}

/// Parse and dispatch one inbound frame. Malformed JSON and frames without
/// a `type` are dropped without closing the connection.
async fn handle_frame(state: &RelayState, conn_id: ConnId, text: &str) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(err = %e, "dropping malformed frame");
            return;
        }
    };

    let now = state.clock.now_ms();
    let mut broker = state.broker.lock().await;
    match frame {
        ClientFrame::Subscribe { topics } => {
            broker.subscribe(conn_id, topics, now);
            state.persist(&broker);
        }
        ClientFrame::Unsubscribe { topics } => {
            broker.unsubscribe(conn_id, topics, now);
            state.persist(&broker);
        }
        ClientFrame::Publish { topic, payload } => {
            broker.publish(conn_id, topic, payload, now);
        }
        ClientFrame::Ping {} => {
            broker.ping(conn_id, now);
        }
    }
}
