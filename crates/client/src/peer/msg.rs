// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Peer link frames and mesh-negotiation payloads.
//!
//! A peer link is one stream of JSON-line frames carrying both logical
//! channels: document sync (`sync_step1` / `sync_step2` / `update`) and
//! awareness. Mesh negotiation (who dials whom) happens before any link
//! exists, as opaque payloads on the room's signaling topic.

use serde::{Deserialize, Serialize};

use crate::doc::types::{StateVector, Update};
use crate::peer::awareness::AwarenessEntry;

/// Frames exchanged over an established peer link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PeerFrame {
    /// First frame in each direction: identifies the peer.
    Hello { tag: String },
    /// Step 1 of the sync handshake: my state vector.
    SyncStep1 { sv: StateVector },
    /// Step 2: the ops your state vector is missing.
    SyncStep2 { update: Update },
    /// Incremental broadcast of local edits.
    Update { update: Update },
    /// Awareness side channel.
    Awareness { entries: Vec<AwarenessEntry> },
    /// Clean departure.
    Bye {},
}

/// Mesh negotiation messages on the `sync:<room>` signaling topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshMsg {
    pub kind: MeshKind,
    pub from: String,
    /// Advertised listener address; absent on `leave`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeshKind {
    /// "I just joined the room; here is where to reach me."
    Join,
    /// Answer to a join from a peer already present.
    Welcome,
    /// Clean room departure.
    Leave,
}

/// Awareness entries carried over the signaling fallback topic, so cursors
/// appear even before direct links establish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwarenessGossip {
    pub from: String,
    pub entries: Vec<AwarenessEntry>,
}

/// Encode a struct as a publish payload map.
pub fn to_payload<T: Serialize>(value: &T) -> serde_json::Map<String, serde_json::Value> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    }
}

/// Decode a publish payload map back into a struct. `None` on shape
/// mismatch — protocol errors are dropped, never surfaced.
pub fn from_payload<T: for<'de> Deserialize<'de>>(
    payload: &serde_json::Map<String, serde_json::Value>,
) -> Option<T> {
    serde_json::from_value(serde_json::Value::Object(payload.clone())).ok()
}

#[cfg(test)]
#[path = "msg_tests.rs"]
mod tests;
