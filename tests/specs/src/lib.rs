// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end session specs.
//!
//! Starts an in-process relay on an ephemeral port and stacks real client
//! components (document, signaling client, peer transport) against it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use across::config::SessionConfig;
use across::doc::store::DocStore;
use across::doc::PuzzleDoc;
use across::peer::awareness::Awareness;
use across::peer::PeerTransport;
use across::session::session_tag;
use across::signal::SignalClient;
use acrossrelay::config::RelayConfig;
use acrossrelay::state::RelayState;
use acrossrelay::transport::build_router;

/// An in-process relay. Shuts down on drop.
pub struct RelayHarness {
    /// `ws://…/signaling` URL for clients.
    pub url: String,
    pub state: Arc<RelayState>,
    shutdown: CancellationToken,
}

impl Drop for RelayHarness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Start a relay on an ephemeral port with test routes enabled.
pub async fn start_relay() -> anyhow::Result<RelayHarness> {
    let config = RelayConfig { test_routes: true, ..RelayConfig::default() };
    let shutdown = CancellationToken::new();
    let state = Arc::new(RelayState::new(config, shutdown.clone())?);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let router = build_router(Arc::clone(&state));
    let serve_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router)
            .with_graceful_shutdown(serve_shutdown.cancelled_owned())
            .await;
    });

    Ok(RelayHarness { url: format!("ws://{addr}/signaling"), state, shutdown })
}

/// A full client stack wired to one relay and one room.
pub struct ClientStack {
    pub doc: Arc<PuzzleDoc>,
    pub awareness: Arc<Awareness>,
    pub signal: Arc<SignalClient>,
    pub transport: PeerTransport,
}

impl ClientStack {
    pub async fn close(&self) {
        self.transport.destroy().await;
        self.signal.shutdown();
        self.doc.destroy();
    }
}

/// Stack a client on an existing (ready) document.
pub async fn stack_on(
    relay_url: &str,
    doc: Arc<PuzzleDoc>,
    room: &str,
) -> anyhow::Result<ClientStack> {
    let signal = Arc::new(SignalClient::connect(relay_url, Duration::from_secs(30)));
    let awareness = Arc::new(Awareness::new(session_tag()));
    let transport = PeerTransport::start(
        Arc::clone(&doc),
        Arc::clone(&awareness),
        Arc::clone(&signal),
        room,
        "127.0.0.1",
    )
    .await?;
    Ok(ClientStack { doc, awareness, signal, transport })
}

/// Open a memory-backed document and stack a client on it.
pub async fn memory_stack(
    relay_url: &str,
    puzzle_id: &str,
    client_id: &str,
    room: &str,
) -> anyhow::Result<ClientStack> {
    let doc = Arc::new(PuzzleDoc::open(puzzle_id, client_id, DocStore::memory()));
    stack_on(relay_url, doc, room).await
}

/// Session configuration pointing at the harness relay.
pub fn client_config(relay_url: &str, data_dir: &std::path::Path) -> SessionConfig {
    SessionConfig::default().with_relay_url(relay_url).with_data_dir(data_dir)
}

/// Poll until `probe` returns true or the deadline passes.
pub async fn eventually<F, Fut>(timeout: Duration, what: &str, probe: F) -> anyhow::Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if probe().await {
            return Ok(());
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
