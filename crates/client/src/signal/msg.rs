// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client side of the signaling wire protocol.

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
        /// Subscriber count at broadcast time; clients use it to sense room
        /// population.
        clients: usize,
        #[serde(flatten)]
        payload: serde_json::Map<String, serde_json::Value>,
    },
}

/// A re-broadcast publish as surfaced to transport subscribers.
#[derive(Debug, Clone)]
pub struct PublishEvent {
    pub topic: String,
    pub clients: usize,
    pub payload: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
#[path = "msg_tests.rs"]
mod tests;
