// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tokio::sync::mpsc;

use crate::broker::{Broker, BrokerSnapshot, Outbound};
use crate::config::RelayConfig;

fn config() -> RelayConfig {
    RelayConfig::default()
}

struct TestConn {
    id: u64,
    tag: String,
    rx: mpsc::UnboundedReceiver<Outbound>,
}

fn connect(broker: &mut Broker, now: u64) -> TestConn {
    let (tx, rx) = mpsc::unbounded_channel();
    let (id, tag) = broker.accept(tx, now);
    TestConn { id, tag, rx }
}

fn drain_frames(conn: &mut TestConn) -> Vec<serde_json::Value> {
    let mut frames = Vec::new();
    while let Ok(out) = conn.rx.try_recv() {
        if let Outbound::Frame(json) = out {
            if let Ok(value) = serde_json::from_str(&json) {
                frames.push(value);
            }
        }
    }
    frames
}

fn payload(pairs: &[(&str, &str)]) -> serde_json::Map<String, serde_json::Value> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), serde_json::Value::String((*v).to_owned())))
        .collect()
}

#[test]
fn publish_reaches_subscribers_including_sender() {
    let mut broker = Broker::new();
    let mut a = connect(&mut broker, 0);
    let mut b = connect(&mut broker, 0);

    broker.subscribe(a.id, vec!["sync:r1".to_owned()], 1);
    broker.subscribe(b.id, vec!["sync:r1".to_owned()], 1);
    broker.publish(a.id, "sync:r1".to_owned(), payload(&[("from", "a")]), 2);

    let at_a = drain_frames(&mut a);
    let at_b = drain_frames(&mut b);
    assert_eq!(at_a.len(), 1, "sender must receive its own publish");
    assert_eq!(at_b.len(), 1);
    assert_eq!(at_a[0]["clients"], 2);
    assert_eq!(at_b[0]["from"], "a");
}

#[test]
fn publish_never_reaches_unsubscribed_topics() {
    let mut broker = Broker::new();
    let mut a = connect(&mut broker, 0);
    let mut b = connect(&mut broker, 0);

    broker.subscribe(a.id, vec!["sync:r1".to_owned()], 1);
    broker.subscribe(b.id, vec!["awareness:r1".to_owned()], 1);
    broker.publish(a.id, "sync:r1".to_owned(), payload(&[("from", "a")]), 2);

    assert_eq!(drain_frames(&mut a).len(), 1);
    assert!(drain_frames(&mut b).is_empty(), "b is not subscribed to sync:r1");
}

#[test]
fn unsubscribe_stops_delivery() {
    let mut broker = Broker::new();
    let mut a = connect(&mut broker, 0);
    let mut b = connect(&mut broker, 0);

    broker.subscribe(a.id, vec!["sync:r1".to_owned()], 1);
    broker.subscribe(b.id, vec!["sync:r1".to_owned()], 1);
    broker.unsubscribe(b.id, vec!["sync:r1".to_owned()], 2);
    broker.publish(a.id, "sync:r1".to_owned(), payload(&[]), 3);

    let at_a = drain_frames(&mut a);
    assert_eq!(at_a.len(), 1);
    assert_eq!(at_a[0]["clients"], 1);
    assert!(drain_frames(&mut b).is_empty());
}

#[test]
fn duplicate_subscribe_does_not_double_deliver() {
    let mut broker = Broker::new();
    let mut a = connect(&mut broker, 0);

    broker.subscribe(a.id, vec!["sync:r1".to_owned()], 1);
    broker.subscribe(a.id, vec!["sync:r1".to_owned()], 1);
    broker.publish(a.id, "sync:r1".to_owned(), payload(&[]), 2);

    assert_eq!(drain_frames(&mut a).len(), 1);
}

#[test]
fn ping_answers_pong() {
    let mut broker = Broker::new();
    let mut a = connect(&mut broker, 0);
    broker.ping(a.id, 5);
    let frames = drain_frames(&mut a);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "pong");
}

#[test]
fn stale_connection_is_closed_with_1000() {
    let config = config();
    let mut broker = Broker::new();
    let mut a = connect(&mut broker, 0);
    broker.subscribe(a.id, vec!["sync:r1".to_owned()], 0);

    let report = broker.sweep(&config, config.stale_after_ms() + 1);
    assert_eq!(report.closed_connections, 1);
    let closed = a.rx.try_recv();
    assert!(matches!(closed, Ok(Outbound::Close(1000))), "got {closed:?}");
    assert_eq!(broker.live_connections(), 0);
}

#[test]
fn visitor_record_expires_after_reconnect_window() {
    let config = config();
    let mut broker = Broker::new();
    let a = connect(&mut broker, 0);
    broker.subscribe(a.id, vec!["sync:r1".to_owned()], 0);
    broker.disconnect(a.id, 1_000);

    // Within the window the record survives.
    let report = broker.sweep(&config, 1_000 + config.reconnect_window_ms());
    assert_eq!(report.removed_visitors, 0);

    let report = broker.sweep(&config, 1_000 + config.reconnect_window_ms() + 1);
    assert_eq!(report.removed_visitors, 1);
}

#[test]
fn inactive_room_is_deleted_only_without_live_subscribers() {
    let config = config();
    let mut broker = Broker::new();
    let a = connect(&mut broker, 0);
    broker.subscribe(a.id, vec!["sync:r1".to_owned()], 0);

    // A live, non-stale subscriber keeps the room past its TTL. Pings
    // refresh the visitor, not the room.
    let now = config.room_ttl_ms() + 1;
    broker.ping(a.id, now - 1);
    let report = broker.sweep(&config, now);
    assert_eq!(report.removed_rooms, 0);

    // Once the connection closes, the inactive room is eligible.
    broker.disconnect(a.id, now);
    let report = broker.sweep(&config, now + 1);
    assert_eq!(report.removed_rooms, 1);
}

#[test]
fn hibernation_rebuilds_subscriptions_from_records() {
    let mut broker = Broker::new();
    let mut a = connect(&mut broker, 0);
    let mut b = connect(&mut broker, 0);
    broker.subscribe(a.id, vec!["sync:r1".to_owned()], 1);
    broker.subscribe(b.id, vec!["sync:r1".to_owned()], 1);

    broker.hibernate();

    // First frame after resume routes through the rebuild path: b's publish
    // still reaches both subscribers.
    broker.publish(b.id, "sync:r1".to_owned(), payload(&[("from", "b")]), 2);
    assert_eq!(drain_frames(&mut a).len(), 1);
    assert_eq!(drain_frames(&mut b).len(), 1);
}

#[test]
fn snapshot_skips_visitors_without_topics() {
    let mut broker = Broker::new();
    let a = connect(&mut broker, 0);
    let _idle = connect(&mut broker, 0);
    broker.subscribe(a.id, vec!["sync:r1".to_owned()], 1);

    let snapshot = broker.snapshot();
    assert_eq!(snapshot.visitors.len(), 1);
    assert!(snapshot.visitors.contains_key(&a.tag));
    assert_eq!(snapshot.rooms.len(), 1);
}

#[test]
fn restart_marks_loaded_visitors_disconnected() {
    let mut broker = Broker::new();
    let a = connect(&mut broker, 0);
    broker.subscribe(a.id, vec!["sync:r1".to_owned()], 1);
    let snapshot = broker.snapshot();

    let restored = Broker::from_snapshot(snapshot, 10);
    let again = restored.snapshot();
    let record = again.visitors.get(&a.tag);
    assert!(record.is_some_and(|r| !r.is_connected));
}

#[test]
fn reset_clears_everything() {
    let mut broker = Broker::new();
    let a = connect(&mut broker, 0);
    broker.subscribe(a.id, vec!["sync:r1".to_owned()], 1);
    broker.reset();
    assert!(broker.is_empty());
}

#[test]
fn sweep_on_empty_snapshot_restore_is_quiet() {
    let mut broker = Broker::from_snapshot(BrokerSnapshot::default(), 0);
    let report = broker.sweep(&config(), u64::MAX / 2);
    assert!(report.is_empty());
    assert!(broker.is_empty());
}
