// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signaling client: a long-lived channel to the relay.
//!
//! Commands are enqueued on an unbounded channel, so callers never block and
//! messages queue while the socket is opening or down. The run loop redials
//! with jittered exponential backoff, re-sends the full subscription set
//! after every reconnect (the relay forgets it past the reconnect window),
//! flushes publishes queued while offline, and pings under the relay's
//! staleness TTL. A missed pong never forces a reconnect; only socket close
//! does.

pub mod msg;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::signal::msg::{ClientFrame, PublishEvent, ServerFrame};

const INITIAL_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Connection state, reported on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    Disconnected,
    Connecting,
    Connected,
}

enum Command {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    Publish { topic: String, payload: serde_json::Map<String, serde_json::Value> },
    /// Short-circuit the backoff sleep (the visibility-change fast path).
    Poke,
}

/// Handle to the signaling run loop.
pub struct SignalClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    publishes: broadcast::Sender<PublishEvent>,
    status_rx: watch::Receiver<ConnStatus>,
    cancel: CancellationToken,
}

impl SignalClient {
    /// Spawn the client task for the given relay URL.
    pub fn connect(url: impl Into<String>, ping_interval: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (publishes, _) = broadcast::channel(256);
        let (status_tx, status_rx) = watch::channel(ConnStatus::Connecting);
        let cancel = CancellationToken::new();

        tokio::spawn(run_loop(
            url.into(),
            cmd_rx,
            publishes.clone(),
            status_tx,
            cancel.clone(),
            ping_interval,
        ));

        Self { cmd_tx, publishes, status_rx, cancel }
    }

    pub fn subscribe(&self, topics: Vec<String>) {
        let _ = self.cmd_tx.send(Command::Subscribe(topics));
    }

    pub fn unsubscribe(&self, topics: Vec<String>) {
        let _ = self.cmd_tx.send(Command::Unsubscribe(topics));
    }

    pub fn publish(&self, topic: impl Into<String>, payload: serde_json::Map<String, serde_json::Value>) {
        let _ = self.cmd_tx.send(Command::Publish { topic: topic.into(), payload });
    }

    /// Trigger an immediate redial if the channel is down.
    pub fn reconnect_now(&self) {
        let _ = self.cmd_tx.send(Command::Poke);
    }

    /// Subscribe to re-broadcast publishes.
    pub fn publishes(&self) -> broadcast::Receiver<PublishEvent> {
        self.publishes.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<ConnStatus> {
        self.status_rx.clone()
    }

    /// Stop the run loop. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SignalClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_loop(
    url: String,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    publishes: broadcast::Sender<PublishEvent>,
    status_tx: watch::Sender<ConnStatus>,
    cancel: CancellationToken,
    ping_interval: Duration,
) {
    let mut backoff_ms = INITIAL_BACKOFF_MS;
    // Subscription set survives reconnects; publishes queue while offline.
    let mut topics: Vec<String> = Vec::new();
    let mut queued: Vec<ClientFrame> = Vec::new();

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let _ = status_tx.send(ConnStatus::Connecting);

        match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _)) => {
                backoff_ms = INITIAL_BACKOFF_MS;
                let _ = status_tx.send(ConnStatus::Connected);
                tracing::debug!(url = %url, "signaling channel open");

                let (mut write, mut read) = stream.split();

                // Re-send subscriptions before flushing queued traffic. A
                // send failure here leaves the socket broken; the select
                // loop notices immediately and falls into backoff.
                if !topics.is_empty() {
                    let frame = ClientFrame::Subscribe { topics: topics.clone() };
                    let _ = send_frame(&mut write, &frame).await;
                }
                let pending: Vec<ClientFrame> = queued.drain(..).collect();
                for frame in pending {
                    if send_frame(&mut write, &frame).await.is_err() {
                        queued.push(frame);
                    }
                }

                let mut ping = tokio::time::interval(ping_interval);
                ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                ping.tick().await; // immediate first tick

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            let _ = write.send(Message::Close(None)).await;
                            let _ = status_tx.send(ConnStatus::Disconnected);
                            return;
                        }
                        _ = ping.tick() => {
                            if send_frame(&mut write, &ClientFrame::Ping {}).await.is_err() {
                                break;
                            }
                        }
                        cmd = cmd_rx.recv() => {
                            match cmd {
                                Some(Command::Subscribe(new)) => {
                                    for topic in &new {
                                        if !topics.contains(topic) {
                                            topics.push(topic.clone());
                                        }
                                    }
                                    let frame = ClientFrame::Subscribe { topics: new };
                                    if send_frame(&mut write, &frame).await.is_err() {
                                        break;
                                    }
                                }
                                Some(Command::Unsubscribe(gone)) => {
                                    topics.retain(|t| !gone.contains(t));
                                    let frame = ClientFrame::Unsubscribe { topics: gone };
                                    if send_frame(&mut write, &frame).await.is_err() {
                                        break;
                                    }
                                }
                                Some(Command::Publish { topic, payload }) => {
                                    let frame = ClientFrame::Publish { topic, payload };
                                    if send_frame(&mut write, &frame).await.is_err() {
                                        // Retried after reconnect.
                                        queued.push(frame);
                                        break;
                                    }
                                }
                                Some(Command::Poke) => {}
                                None => return,
                            }
                        }
                        msg = read.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    match serde_json::from_str::<ServerFrame>(&text) {
                                        Ok(ServerFrame::Publish { topic, clients, payload }) => {
                                            let _ = publishes.send(PublishEvent { topic, clients, payload });
                                        }
                                        Ok(ServerFrame::Pong {}) => {}
                                        Err(e) => {
                                            tracing::debug!(err = %e, "dropping malformed relay frame");
                                        }
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => {
                                    tracing::debug!("signaling channel closed");
                                    break;
                                }
                                Some(Err(e)) => {
                                    tracing::debug!(err = %e, "signaling channel error");
                                    break;
                                }
                                _ => {} // binary/ping/pong ignored
                            }
                        }
                    }
                }
            }
            Err(e) => {
                tracing::debug!(url = %url, err = %e, backoff_ms, "signaling dial failed");
            }
        }

        let _ = status_tx.send(ConnStatus::Connecting);

        // Jittered backoff; commands arriving meanwhile are buffered, a
        // poke redials immediately.
        let delay = jittered(backoff_ms);
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = status_tx.send(ConnStatus::Disconnected);
                    return;
                }
                _ = &mut sleep => break,
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Subscribe(new)) => {
                            for topic in new {
                                if !topics.contains(&topic) {
                                    topics.push(topic);
                                }
                            }
                        }
                        Some(Command::Unsubscribe(gone)) => {
                            topics.retain(|t| !gone.contains(t));
                        }
                        Some(Command::Publish { topic, payload }) => {
                            queued.push(ClientFrame::Publish { topic, payload });
                        }
                        Some(Command::Poke) => break,
                        None => return,
                    }
                }
            }
        }
        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
    }

    let _ = status_tx.send(ConnStatus::Disconnected);
}

/// Backoff delay with ±50% jitter so reconnect storms spread out.
fn jittered(base_ms: u64) -> Duration {
    let low = base_ms / 2;
    let delay = low + rand::rng().random_range(0..=base_ms.saturating_sub(low).max(1));
    Duration::from_millis(delay)
}

async fn send_frame<S>(write: &mut S, frame: &ClientFrame) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let Ok(json) = serde_json::to_string(frame) else {
        return Err(());
    };
    write.send(Message::Text(json.into())).await.map_err(|_| ())
}
