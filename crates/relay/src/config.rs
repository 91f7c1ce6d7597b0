// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the signaling relay.
#[derive(Debug, Clone, clap::Parser)]
pub struct RelayConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "ACROSS_RELAY_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9090, env = "ACROSS_RELAY_PORT")]
    pub port: u16,

    /// Directory for persisted room/visitor records. If unset, the relay
    /// keeps state in memory only and nothing survives a restart.
    #[arg(long, env = "ACROSS_RELAY_DATA_DIR")]
    pub data_dir: Option<std::path::PathBuf>,

    /// Sweep interval in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "ACROSS_RELAY_SWEEP_MS")]
    pub sweep_ms: u64,

    /// Close a connection after this many seconds without a message.
    #[arg(long, default_value_t = 90, env = "ACROSS_RELAY_STALE_SECS")]
    pub stale_secs: u64,

    /// Retain a disconnected visitor record for this many seconds.
    #[arg(long, default_value_t = 180, env = "ACROSS_RELAY_RECONNECT_WINDOW_SECS")]
    pub reconnect_window_secs: u64,

    /// Delete an inactive room after this many seconds.
    #[arg(long, default_value_t = 21_600, env = "ACROSS_RELAY_ROOM_TTL_SECS")]
    pub room_ttl_secs: u64,

    /// Mount the `/__test__/` subroutes (storage snapshot, manual sweep,
    /// simulated time). Never enable in production.
    #[arg(long, hide = true, env = "ACROSS_RELAY_TEST_ROUTES")]
    pub test_routes: bool,
}

impl RelayConfig {
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sweep_ms)
    }

    pub fn stale_after_ms(&self) -> u64 {
        self.stale_secs * 1000
    }

    pub fn reconnect_window_ms(&self) -> u64 {
        self.reconnect_window_secs * 1000
    }

    pub fn room_ttl_ms(&self) -> u64 {
        self.room_ttl_secs * 1000
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 9090,
            data_dir: None,
            sweep_ms: 60_000,
            stale_secs: 90,
            reconnect_window_secs: 180,
            room_ttl_secs: 21_600,
            test_routes: false,
        }
    }
}
