// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signaling wire protocol: internally-tagged JSON frames.
//!
//! Clients send `subscribe` / `unsubscribe` / `publish` / `ping`; the relay
//! answers `pong` and re-broadcasts `publish` stamped with the live
//! subscriber count. Publish payloads are opaque to the relay and ride a
//! flattened map.

use serde::{Deserialize, Serialize};

/// Client → relay frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe {
        topics: Vec<String>,
    },
    Unsubscribe {
        topics: Vec<String>,
    },
    Publish {
        topic: String,
        #[serde(flatten)]
        payload: serde_json::Map<String, serde_json::Value>,
    },
    Ping {},
}

/// Relay → client frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Pong {},
    Publish {
        topic: String,
        /// Subscriber count at the moment of broadcast, sender included.
        clients: usize,
        #[serde(flatten)]
        payload: serde_json::Map<String, serde_json::Value>,
    },
}

/// Room id carried by a topic, e.g. `sync:puzzle:abc:def` → `puzzle:abc:def`.
///
/// Returns `None` for topics outside the `awareness:`/`sync:` namespaces;
/// those never touch room bookkeeping.
pub fn topic_room(topic: &str) -> Option<&str> {
    topic
        .strip_prefix("sync:")
        .or_else(|| topic.strip_prefix("awareness:"))
        .filter(|room| !room.is_empty())
}

#[cfg(test)]
#[path = "msg_tests.rs"]
mod tests;
