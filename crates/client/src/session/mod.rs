// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session identity and the join protocol.
//!
//! A session URL names `(puzzle id, timeline id)`; the local
//! `timeline:{puzzleId}` mapping remembers which collaborative thread this
//! installation last shared or joined. Opening a URL runs the join
//! protocol: direct attach when timelines agree, a three-way user choice on
//! collision (merge / fresh start / cancel), and payload bootstrap for
//! joiners with no local copy of the puzzle.

pub mod locator;

use std::sync::Arc;
use std::time::Duration;

use crate::config::SessionConfig;
use crate::doc::store::DocStore;
use crate::doc::types::DocMap;
use crate::doc::PuzzleDoc;
use crate::error::JoinFailure;
use crate::peer::awareness::Awareness;
use crate::peer::PeerTransport;
use crate::session::locator::{timeline_token, SessionLocator};
use crate::signal::SignalClient;
use crate::storage::KvStore;

const CLIENT_ID_KEY: &str = "client-id";

/// What the join protocol decided for a given URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinPlan {
    /// Timelines agree (or there is nothing to lose): attach directly.
    Attach,
    /// Local progress exists under a different timeline. The user decides:
    /// merge, fresh start, or cancel.
    Collision { local_timeline: Option<String> },
    /// No local copy of the puzzle: attach and wait for the payload.
    Bootstrap,
}

/// The user's answer to a collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionChoice {
    /// Attach as-is; the CRDT unions the two histories.
    Merge,
    /// Wipe local progress for this puzzle, then attach.
    FreshStart,
    /// Stay in the library.
    Cancel,
}

/// A live collaborative session: the document plus everything stacked on
/// it. The application owns the document; the transport is constructed
/// after the document is ready and destroyed before it.
pub struct Session {
    pub doc: Arc<PuzzleDoc>,
    pub awareness: Arc<Awareness>,
    pub signal: Arc<SignalClient>,
    pub transport: PeerTransport,
}

impl Session {
    /// Ordered teardown of the whole stack. Idempotent at every layer.
    pub async fn close(&self) {
        self.transport.destroy().await;
        self.signal.shutdown();
        self.doc.destroy();
    }
}

/// Long-lived manager for local identity, timeline mappings, and joins.
pub struct SessionManager {
    config: SessionConfig,
    kv: KvStore,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        let kv = KvStore::open(&config.data_dir);
        Self { config, kv }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn kv(&self) -> &KvStore {
        &self.kv
    }

    /// Stable per-installation client id, minted once.
    pub fn client_id(&self) -> String {
        if let Some(id) = self.kv.get_string(CLIENT_ID_KEY) {
            return id;
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.kv.set_string(CLIENT_ID_KEY, &id);
        id
    }

    // -- Timeline mappings ----------------------------------------------------

    pub fn local_timeline(&self, puzzle_id: &str) -> Option<String> {
        self.kv.get_string(&format!("timeline:{puzzle_id}"))
    }

    pub fn set_local_timeline(&self, puzzle_id: &str, timeline_id: &str) {
        self.kv.set_string(&format!("timeline:{puzzle_id}"), timeline_id);
    }

    // -- Local puzzle/payload bookkeeping -------------------------------------

    /// Logged-update probe: has this installation edited the puzzle?
    pub fn has_local_progress(&self, puzzle_id: &str) -> bool {
        DocStore::update_count(&self.config.data_dir, puzzle_id) > 0
    }

    pub fn has_local_puzzle(&self, puzzle_id: &str) -> bool {
        self.kv.get(&format!("payload:{puzzle_id}")).is_some()
    }

    pub fn store_payload(&self, puzzle_id: &str, payload: &[u8]) {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(payload);
        self.kv.set_string(&format!("payload:{puzzle_id}"), &encoded);
    }

    pub fn load_payload(&self, puzzle_id: &str) -> Option<Vec<u8>> {
        use base64::Engine;
        let encoded = self.kv.get_string(&format!("payload:{puzzle_id}"))?;
        base64::engine::general_purpose::STANDARD.decode(encoded).ok()
    }

    // -- Sharing --------------------------------------------------------------

    /// First share mints a timeline, publishes the payload into the document
    /// for late joiners, and returns the session URL. Subsequent shares of
    /// the same puzzle return the same timeline.
    pub fn share(&self, doc: &PuzzleDoc, payload: &[u8]) -> SessionLocator {
        let puzzle_id = doc.puzzle_id().to_owned();
        let timeline_id = match self.local_timeline(&puzzle_id) {
            Some(t) => t,
            None => {
                let t = timeline_token();
                self.set_local_timeline(&puzzle_id, &t);
                t
            }
        };
        doc.share_puzzle_payload(payload);
        self.store_payload(&puzzle_id, payload);
        SessionLocator::Puzzle { puzzle_id, timeline_id }
    }

    /// Mint a new timeline for the puzzle, keeping progress. Participants on
    /// the old timeline are abandoned, not invalidated — the old room stays
    /// joinable.
    pub fn reset_sharing(&self, puzzle_id: &str) -> String {
        let timeline = timeline_token();
        self.set_local_timeline(puzzle_id, &timeline);
        timeline
    }

    // -- Join protocol --------------------------------------------------------

    /// Decide how to handle an opened session URL.
    pub fn plan_join(&self, locator: &SessionLocator) -> JoinPlan {
        let SessionLocator::Puzzle { puzzle_id, timeline_id } = locator else {
            // Legacy rooms carry no timeline bookkeeping.
            return JoinPlan::Attach;
        };

        let local = self.local_timeline(puzzle_id);
        if local.as_deref() == Some(timeline_id.as_str()) {
            return JoinPlan::Attach;
        }
        if self.has_local_progress(puzzle_id) {
            return JoinPlan::Collision { local_timeline: local };
        }
        if !self.has_local_puzzle(puzzle_id) {
            return JoinPlan::Bootstrap;
        }
        JoinPlan::Attach
    }

    /// Apply the user's collision choice, returning the follow-up plan.
    /// `Merge` attaches as-is; `FreshStart` wipes local progress first.
    pub fn resolve_collision(
        &self,
        locator: &SessionLocator,
        choice: CollisionChoice,
    ) -> Result<JoinPlan, JoinFailure> {
        match choice {
            CollisionChoice::Merge => Ok(JoinPlan::Attach),
            CollisionChoice::FreshStart => {
                if let SessionLocator::Puzzle { puzzle_id, .. } = locator {
                    self.fresh_start(puzzle_id);
                }
                Ok(JoinPlan::Attach)
            }
            CollisionChoice::Cancel => Err(JoinFailure::Cancelled),
        }
    }

    /// Wipe local progress for a puzzle.
    pub fn fresh_start(&self, puzzle_id: &str) {
        DocStore::open(&self.config.data_dir, puzzle_id).truncate();
    }

    /// Open the document and attach the full stack for a session URL.
    /// Records the timeline mapping for puzzle locators.
    pub async fn attach(&self, locator: &SessionLocator) -> anyhow::Result<Session> {
        if let SessionLocator::Puzzle { puzzle_id, timeline_id } = locator {
            self.set_local_timeline(puzzle_id, timeline_id);
        }

        let doc_id = locator.doc_id().to_owned();
        let store = DocStore::open(&self.config.data_dir, &doc_id);
        let doc = Arc::new(PuzzleDoc::open(doc_id, self.client_id(), store));
        if !doc.is_durable() {
            tracing::warn!("document storage unavailable; edits will not survive this process");
        }

        let signal =
            Arc::new(SignalClient::connect(self.config.relay_url.clone(), self.config.ping_interval));
        let awareness = Arc::new(Awareness::new(session_tag()));
        let transport = PeerTransport::start(
            Arc::clone(&doc),
            Arc::clone(&awareness),
            Arc::clone(&signal),
            locator.room_key(),
            &self.config.peer_host,
        )
        .await?;

        Ok(Session { doc, awareness, signal, transport })
    }

    /// Wait for the puzzle payload to arrive through sync. On success the
    /// payload is also cached locally so the next open skips bootstrap.
    pub async fn await_bootstrap(
        &self,
        session: &Session,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, JoinFailure> {
        let timeout = timeout.unwrap_or(self.config.bootstrap_timeout);
        let mut events = session.doc.observe();

        // Check after subscribing: the payload may already have synced.
        if let Some(payload) = session.doc.puzzle_payload() {
            self.store_payload(session.doc.puzzle_id(), &payload);
            return Ok(payload);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let event = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return Err(JoinFailure::BootstrapTimeout),
                event = events.recv() => event,
            };
            match event {
                Ok(event) if event.map == DocMap::Puzzle && event.key == "data" => {
                    if let Some(payload) = session.doc.puzzle_payload() {
                        self.store_payload(session.doc.puzzle_id(), &payload);
                        return Ok(payload);
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                    // Missed events: re-check directly.
                    if let Some(payload) = session.doc.puzzle_payload() {
                        self.store_payload(session.doc.puzzle_id(), &payload);
                        return Ok(payload);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    return Err(JoinFailure::BootstrapTimeout);
                }
            }
        }
    }
}

/// Random per-transport peer tag. Distinct from the stable client id: two
/// windows of the same installation are two peers.
pub fn session_tag() -> String {
    use rand::Rng;
    rand::rng().sample_iter(rand::distr::Alphanumeric).take(16).map(char::from).collect()
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
