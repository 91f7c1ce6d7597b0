// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::clock::Clock;
use crate::config::RelayConfig;
use crate::storage::BrokerStorage;

/// Shared relay state.
///
/// The broker sits behind a single mutex: per-room storage is single-writer
/// by construction, and the lock is never held across an await point.
pub struct RelayState {
    pub config: RelayConfig,
    pub clock: Clock,
    pub broker: Mutex<Broker>,
    pub storage: Option<BrokerStorage>,
    /// Wakes the parked sweeper when a connection arrives.
    pub activity: Notify,
    pub shutdown: CancellationToken,
}

impl RelayState {
    /// Build relay state, restoring persisted broker records when a data
    /// directory is configured.
    pub fn new(config: RelayConfig, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let clock = Clock::new();
        let (storage, broker) = match &config.data_dir {
            Some(dir) => {
                let storage = BrokerStorage::open(dir)?;
                let snapshot = storage.load()?;
                let broker = Broker::from_snapshot(snapshot, clock.now_ms());
                (Some(storage), broker)
            }
            None => (None, Broker::new()),
        };
        Ok(Self {
            config,
            clock,
            broker: Mutex::new(broker),
            storage,
            activity: Notify::new(),
            shutdown,
        })
    }

    /// Persist the broker's snapshot, best-effort.
    pub fn persist(&self, broker: &Broker) {
        let Some(storage) = &self.storage else {
            return;
        };
        if let Err(e) = storage.save(&broker.snapshot()) {
            tracing::warn!(err = %e, "failed to persist broker state");
        }
    }
}
