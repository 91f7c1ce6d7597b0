// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Room broker: visitor records, topic subscriptions, publish fan-out.
//!
//! A single broker instance serves every room and relies on topic isolation
//! (`sync:<room>` / `awareness:<room>`). All rooms being small, subscriber
//! lookup is a scan over connected visitors; the scan is also what makes the
//! topic-filtering guarantee easy to audit: a frame reaches exactly the
//! connections whose visitor record lists the topic at dispatch time.
//!
//! The broker itself is synchronous; the WebSocket layer holds it behind one
//! `tokio::sync::Mutex`, which serializes all cross-connection mutation.

use std::collections::HashMap;

use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::RelayConfig;
use crate::msg::{topic_room, ServerFrame};

/// Identifies a live connection within this process.
pub type ConnId = u64;

/// Outbound instructions for a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Send a text frame.
    Frame(String),
    /// Close the socket with the given code.
    Close(u16),
}

/// Persisted record for a connection that visited the relay.
///
/// Survives socket close for the reconnect window so a resumed broker can
/// reinstate subscriptions from the connection's tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitorRecord {
    pub visitor_id: String,
    pub subscribed_topics: Vec<String>,
    pub connected_at: u64,
    pub last_seen: u64,
    pub is_connected: bool,
}

/// Per-room bookkeeping.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RoomMeta {
    pub created_at: u64,
    pub last_activity_at: u64,
}

/// Serializable broker state: what survives restarts and hibernation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerSnapshot {
    pub visitors: IndexMap<String, VisitorRecord>,
    pub rooms: IndexMap<String, RoomMeta>,
}

/// A live connection. `attached` is the in-memory binding to a visitor
/// record; hibernation drops it while `tag` (the visitor id stamped at
/// accept) survives with the socket task.
struct Conn {
    tag: String,
    attached: bool,
    tx: mpsc::UnboundedSender<Outbound>,
}

/// What a sweep pass did, for logging and tests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub closed_connections: usize,
    pub removed_visitors: usize,
    pub removed_rooms: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.closed_connections == 0 && self.removed_visitors == 0 && self.removed_rooms == 0
    }
}

#[derive(Default)]
pub struct Broker {
    next_conn_id: ConnId,
    conns: HashMap<ConnId, Conn>,
    visitors: IndexMap<String, VisitorRecord>,
    rooms: IndexMap<String, RoomMeta>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a broker from persisted state. Previously-live visitors are
    /// marked disconnected; their sockets did not survive the restart, and
    /// the reconnect-window sweep will retire the records.
    pub fn from_snapshot(snapshot: BrokerSnapshot, now_ms: u64) -> Self {
        let mut visitors = snapshot.visitors;
        for record in visitors.values_mut() {
            if record.is_connected {
                record.is_connected = false;
                record.last_seen = record.last_seen.max(now_ms.saturating_sub(1));
            }
        }
        Self { next_conn_id: 0, conns: HashMap::new(), visitors, rooms: snapshot.rooms }
    }

    /// Accept a new connection: mint a visitor id, tag the connection with
    /// it, and register the visitor record.
    pub fn accept(&mut self, tx: mpsc::UnboundedSender<Outbound>, now_ms: u64) -> (ConnId, String) {
        let conn_id = self.next_conn_id;
        self.next_conn_id += 1;

        let visitor_id = visitor_token();
        self.visitors.insert(
            visitor_id.clone(),
            VisitorRecord {
                visitor_id: visitor_id.clone(),
                subscribed_topics: Vec::new(),
                connected_at: now_ms,
                last_seen: now_ms,
                is_connected: true,
            },
        );
        self.conns.insert(conn_id, Conn { tag: visitor_id.clone(), attached: true, tx });
        (conn_id, visitor_id)
    }

    /// Reinstate every detached connection from its tag and the persisted
    /// visitor records. Called lazily by the first frame after a resume, so
    /// early frames route through the rebuild instead of being dropped.
    fn rebuild_attachments(&mut self, now_ms: u64) {
        let mut rebuilt = 0usize;
        for conn in self.conns.values_mut() {
            if conn.attached {
                continue;
            }
            let record =
                self.visitors.entry(conn.tag.clone()).or_insert_with(|| VisitorRecord {
                    visitor_id: conn.tag.clone(),
                    subscribed_topics: Vec::new(),
                    connected_at: now_ms,
                    last_seen: now_ms,
                    is_connected: true,
                });
            record.is_connected = true;
            conn.attached = true;
            rebuilt += 1;
        }
        if rebuilt > 0 {
            tracing::info!(rebuilt, "reinstated connection attachments after resume");
        }
    }

    fn touch(&mut self, conn_id: ConnId, now_ms: u64) -> Option<String> {
        if self.conns.get(&conn_id).is_some_and(|c| !c.attached) {
            self.rebuild_attachments(now_ms);
        }
        let tag = self.conns.get(&conn_id)?.tag.clone();
        if let Some(record) = self.visitors.get_mut(&tag) {
            record.last_seen = now_ms;
            record.is_connected = true;
        }
        Some(tag)
    }

    fn touch_room(&mut self, topic: &str, now_ms: u64) {
        let Some(room) = topic_room(topic) else {
            return;
        };
        let meta = self
            .rooms
            .entry(room.to_owned())
            .or_insert(RoomMeta { created_at: now_ms, last_activity_at: now_ms });
        meta.last_activity_at = now_ms;
    }

    /// Append topics to the visitor's subscription set (dedup).
    pub fn subscribe(&mut self, conn_id: ConnId, topics: Vec<String>, now_ms: u64) {
        let Some(tag) = self.touch(conn_id, now_ms) else {
            return;
        };
        for topic in &topics {
            self.touch_room(topic, now_ms);
        }
        if let Some(record) = self.visitors.get_mut(&tag) {
            for topic in topics {
                if !record.subscribed_topics.contains(&topic) {
                    record.subscribed_topics.push(topic);
                }
            }
        }
    }

    pub fn unsubscribe(&mut self, conn_id: ConnId, topics: Vec<String>, now_ms: u64) {
        let Some(tag) = self.touch(conn_id, now_ms) else {
            return;
        };
        if let Some(record) = self.visitors.get_mut(&tag) {
            record.subscribed_topics.retain(|t| !topics.contains(t));
        }
    }

    /// Broadcast a publish to every connection whose visitor is subscribed
    /// to the topic at this moment — sender included. Fan-out is best-effort:
    /// a full or closed channel drops that recipient's frame only.
    pub fn publish(
        &mut self,
        conn_id: ConnId,
        topic: String,
        payload: serde_json::Map<String, serde_json::Value>,
        now_ms: u64,
    ) {
        if self.touch(conn_id, now_ms).is_none() {
            return;
        }
        self.touch_room(&topic, now_ms);

        let recipients: Vec<&Conn> = self
            .conns
            .values()
            .filter(|conn| {
                conn.attached
                    && self
                        .visitors
                        .get(&conn.tag)
                        .is_some_and(|r| r.is_connected && r.subscribed_topics.contains(&topic))
            })
            .collect();

        let frame = ServerFrame::Publish { topic, clients: recipients.len(), payload };
        let Ok(json) = serde_json::to_string(&frame) else {
            return;
        };
        for conn in recipients {
            let _ = conn.tx.send(Outbound::Frame(json.clone()));
        }
    }

    /// Answer a ping and refresh the visitor's liveness stamp.
    pub fn ping(&mut self, conn_id: ConnId, now_ms: u64) {
        if self.touch(conn_id, now_ms).is_none() {
            return;
        }
        let Some(conn) = self.conns.get(&conn_id) else {
            return;
        };
        let Ok(json) = serde_json::to_string(&ServerFrame::Pong {}) else {
            return;
        };
        let _ = conn.tx.send(Outbound::Frame(json));
    }

    /// Socket closed: drop the connection, keep the visitor record for the
    /// reconnect window.
    pub fn disconnect(&mut self, conn_id: ConnId, now_ms: u64) {
        let Some(conn) = self.conns.remove(&conn_id) else {
            return;
        };
        if let Some(record) = self.visitors.get_mut(&conn.tag) {
            record.is_connected = false;
            record.last_seen = now_ms;
        }
    }

    /// Drop every in-memory attachment, keeping sockets and persisted
    /// records. Models the hosting runtime suspending the broker; the next
    /// inbound frame triggers [`Broker::rebuild_attachments`].
    pub fn hibernate(&mut self) {
        for conn in self.conns.values_mut() {
            conn.attached = false;
        }
    }

    /// The three TTL passes: stale connections, expired visitor records,
    /// inactive rooms.
    pub fn sweep(&mut self, config: &RelayConfig, now_ms: u64) -> SweepReport {
        let mut report = SweepReport::default();

        // Stale connections: no message within the staleness TTL.
        let stale: Vec<ConnId> = self
            .conns
            .iter()
            .filter(|(_, conn)| {
                self.visitors
                    .get(&conn.tag)
                    .is_some_and(|r| now_ms.saturating_sub(r.last_seen) > config.stale_after_ms())
            })
            .map(|(id, _)| *id)
            .collect();
        for conn_id in stale {
            if let Some(conn) = self.conns.get(&conn_id) {
                let _ = conn.tx.send(Outbound::Close(1000));
            }
            self.disconnect(conn_id, now_ms);
            report.closed_connections += 1;
        }

        // Visitor records past the reconnect window.
        let before = self.visitors.len();
        self.visitors.retain(|_, record| {
            record.is_connected
                || now_ms.saturating_sub(record.last_seen) <= config.reconnect_window_ms()
        });
        report.removed_visitors = before - self.visitors.len();

        // Inactive rooms with no remaining live subscriber.
        let dead_rooms: Vec<String> = self
            .rooms
            .iter()
            .filter(|(room, meta)| {
                now_ms.saturating_sub(meta.last_activity_at) > config.room_ttl_ms()
                    && !self.visitors.values().any(|record| {
                        record.is_connected
                            && record
                                .subscribed_topics
                                .iter()
                                .any(|t| topic_room(t) == Some(room.as_str()))
                    })
            })
            .map(|(room, _)| room.clone())
            .collect();
        for room in dead_rooms {
            self.rooms.shift_remove(&room);
            report.removed_rooms += 1;
        }

        report
    }

    /// True when nothing remains to sweep: the alarm parks itself.
    pub fn is_empty(&self) -> bool {
        self.conns.is_empty() && self.visitors.is_empty() && self.rooms.is_empty()
    }

    pub fn live_connections(&self) -> usize {
        self.conns.len()
    }

    /// Persisted view. Only visitors that subscribed to at least one topic
    /// are written out; a connection that never subscribed has nothing to
    /// reinstate.
    pub fn snapshot(&self) -> BrokerSnapshot {
        let visitors = self
            .visitors
            .iter()
            .filter(|(_, record)| !record.subscribed_topics.is_empty())
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect();
        BrokerSnapshot { visitors, rooms: self.rooms.clone() }
    }

    /// Clear everything. Test-route reset only.
    pub fn reset(&mut self) {
        for conn in self.conns.values() {
            let _ = conn.tx.send(Outbound::Close(1000));
        }
        self.conns.clear();
        self.visitors.clear();
        self.rooms.clear();
    }
}

/// 16-char alphanumeric visitor id.
fn visitor_token() -> String {
    rand::rng().sample_iter(rand::distr::Alphanumeric).take(16).map(char::from).collect()
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
