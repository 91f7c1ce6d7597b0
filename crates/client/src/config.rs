// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Client-side configuration for a collaborative session stack.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket URL of the signaling relay.
    pub relay_url: String,
    /// Root directory for local durable state (op logs, key-value store).
    pub data_dir: PathBuf,
    /// Host to bind the peer listener on.
    pub peer_host: String,
    /// Keep-alive interval toward the relay. Must stay under the relay's
    /// staleness TTL.
    pub ping_interval: Duration,
    /// How long a bootstrapping joiner waits for the puzzle payload.
    pub bootstrap_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:9090/signaling".to_owned(),
            data_dir: PathBuf::from(".across"),
            peer_host: "127.0.0.1".to_owned(),
            ping_interval: Duration::from_secs(30),
            bootstrap_timeout: Duration::from_secs(30),
        }
    }
}

impl SessionConfig {
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = url.into();
        self
    }
}
