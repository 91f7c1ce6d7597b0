// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relay broker specs over real WebSockets: topic filtering, loopback
//! publish with subscriber counts, keep-alive, malformed-frame isolation,
//! hibernation recovery, and the TTL sweeps.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use across_specs::start_relay;
use acrossrelay::sweep::run_sweep;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn dial(url: &str) -> anyhow::Result<Socket> {
    let (socket, _) = tokio_tungstenite::connect_async(url).await?;
    Ok(socket)
}

async fn send_json(socket: &mut Socket, value: serde_json::Value) -> anyhow::Result<()> {
    socket.send(Message::Text(value.to_string().into())).await?;
    Ok(())
}

/// Read the next text frame as JSON, or time out.
async fn recv_json(socket: &mut Socket, wait: Duration) -> anyhow::Result<serde_json::Value> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let msg = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => anyhow::bail!("timed out waiting for a frame"),
            msg = socket.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text).map_err(|e| anyhow::anyhow!("{e}"));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => anyhow::bail!("socket error: {e}"),
            None => anyhow::bail!("socket closed"),
        }
    }
}

/// Assert that no text frame arrives within the window.
async fn assert_silent(socket: &mut Socket, window: Duration) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let msg = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return Ok(()),
            msg = socket.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => anyhow::bail!("unexpected frame: {text}"),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return Ok(()),
        }
    }
}

#[tokio::test]
async fn publish_loops_back_with_subscriber_count() -> anyhow::Result<()> {
    let relay = start_relay().await?;
    let mut a = dial(&relay.url).await?;
    let mut b = dial(&relay.url).await?;

    send_json(&mut a, serde_json::json!({"type":"subscribe","topics":["sync:r1"]})).await?;
    send_json(&mut b, serde_json::json!({"type":"subscribe","topics":["sync:r1"]})).await?;
    // Pings round-trip, guaranteeing the subscribes are processed.
    send_json(&mut a, serde_json::json!({"type":"ping"})).await?;
    send_json(&mut b, serde_json::json!({"type":"ping"})).await?;
    recv_json(&mut a, Duration::from_secs(5)).await?;
    recv_json(&mut b, Duration::from_secs(5)).await?;

    send_json(
        &mut a,
        serde_json::json!({"type":"publish","topic":"sync:r1","from":"a","kind":"hello"}),
    )
    .await?;

    let at_a = recv_json(&mut a, Duration::from_secs(5)).await?;
    assert_eq!(at_a["type"], "publish", "sender receives its own publish");
    assert_eq!(at_a["clients"], 2);
    assert_eq!(at_a["from"], "a");

    let at_b = recv_json(&mut b, Duration::from_secs(5)).await?;
    assert_eq!(at_b["kind"], "hello");
    Ok(())
}

#[tokio::test]
async fn unsubscribed_topics_are_never_delivered() -> anyhow::Result<()> {
    let relay = start_relay().await?;
    let mut a = dial(&relay.url).await?;
    let mut b = dial(&relay.url).await?;

    send_json(&mut a, serde_json::json!({"type":"subscribe","topics":["sync:r1"]})).await?;
    send_json(&mut b, serde_json::json!({"type":"subscribe","topics":["awareness:r1"]})).await?;
    send_json(&mut b, serde_json::json!({"type":"ping"})).await?;
    recv_json(&mut b, Duration::from_secs(5)).await?;

    send_json(&mut a, serde_json::json!({"type":"publish","topic":"sync:r1","from":"a"})).await?;

    let at_a = recv_json(&mut a, Duration::from_secs(5)).await?;
    assert_eq!(at_a["clients"], 1, "only the sender subscribes to sync:r1");
    assert_silent(&mut b, Duration::from_millis(300)).await?;
    Ok(())
}

#[tokio::test]
async fn malformed_and_binary_frames_are_ignored() -> anyhow::Result<()> {
    let relay = start_relay().await?;
    let mut a = dial(&relay.url).await?;

    a.send(Message::Text("{not json".into())).await?;
    a.send(Message::Text("{\"topics\":[]}".into())).await?; // no type
    a.send(Message::Binary(vec![0, 1, 2].into())).await?;

    // The connection survives all three.
    send_json(&mut a, serde_json::json!({"type":"ping"})).await?;
    let pong = recv_json(&mut a, Duration::from_secs(5)).await?;
    assert_eq!(pong["type"], "pong");
    Ok(())
}

#[tokio::test]
async fn hibernation_rebuilds_from_persisted_records() -> anyhow::Result<()> {
    let relay = start_relay().await?;
    let mut a = dial(&relay.url).await?;
    let mut b = dial(&relay.url).await?;

    send_json(&mut a, serde_json::json!({"type":"subscribe","topics":["sync:r1"]})).await?;
    send_json(&mut b, serde_json::json!({"type":"subscribe","topics":["sync:r1"]})).await?;
    send_json(&mut a, serde_json::json!({"type":"ping"})).await?;
    send_json(&mut b, serde_json::json!({"type":"ping"})).await?;
    recv_json(&mut a, Duration::from_secs(5)).await?;
    recv_json(&mut b, Duration::from_secs(5)).await?;

    relay.state.broker.lock().await.hibernate();

    // The first frame after resume routes through the rebuild path.
    send_json(&mut b, serde_json::json!({"type":"publish","topic":"sync:r1","from":"b"})).await?;
    let at_a = recv_json(&mut a, Duration::from_secs(5)).await?;
    assert_eq!(at_a["from"], "b");
    assert_eq!(at_a["clients"], 2);
    Ok(())
}

#[tokio::test]
async fn stale_connections_are_closed_by_the_alarm() -> anyhow::Result<()> {
    let relay = start_relay().await?;
    let mut a = dial(&relay.url).await?;
    send_json(&mut a, serde_json::json!({"type":"subscribe","topics":["sync:r1"]})).await?;
    send_json(&mut a, serde_json::json!({"type":"ping"})).await?;
    recv_json(&mut a, Duration::from_secs(5)).await?;

    relay.state.clock.advance(91_000);
    let report = run_sweep(&relay.state).await;
    assert_eq!(report.closed_connections, 1);

    // The socket observes the close.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let msg = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => anyhow::bail!("close never arrived"),
            msg = a.next() => msg,
        };
        match msg {
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(_)) => break,
        }
    }
    Ok(())
}

#[tokio::test]
async fn visitor_records_expire_after_the_reconnect_window() -> anyhow::Result<()> {
    let relay = start_relay().await?;
    {
        let mut a = dial(&relay.url).await?;
        send_json(&mut a, serde_json::json!({"type":"subscribe","topics":["sync:r1"]})).await?;
        send_json(&mut a, serde_json::json!({"type":"ping"})).await?;
        recv_json(&mut a, Duration::from_secs(5)).await?;
        a.close(None).await?;
    }

    // Wait for the relay to register the disconnect.
    across_specs::eventually(Duration::from_secs(5), "disconnect bookkeeping", || async {
        relay.state.broker.lock().await.live_connections() == 0
    })
    .await?;

    // Inside the window the record is retained for reconnect.
    let report = run_sweep(&relay.state).await;
    assert_eq!(report.removed_visitors, 0);
    assert_eq!(relay.state.broker.lock().await.snapshot().visitors.len(), 1);

    relay.state.clock.advance(181_000);
    let report = run_sweep(&relay.state).await;
    assert_eq!(report.removed_visitors, 1);
    assert!(relay.state.broker.lock().await.snapshot().visitors.is_empty());
    Ok(())
}
