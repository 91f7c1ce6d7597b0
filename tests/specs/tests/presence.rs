// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Presence specs: cursor sharing and crowding, join/leave notifications,
//! and color assignment from observed awareness.

use std::sync::Arc;
use std::time::Duration;

use across::peer::awareness::{AwarenessState, Cursor, Direction, UserInfo};
use across::presence::{
    cell_highlights, pick_color, taken_colors, GridShape, PresenceNote, PresenceTracker, PALETTE,
};
use across_specs::{eventually, memory_stack, start_relay};

const WAIT: Duration = Duration::from_secs(10);

fn identity(name: &str, color: &str, cursor: Option<Cursor>) -> AwarenessState {
    AwarenessState {
        user: Some(UserInfo { name: name.to_owned(), color: color.to_owned(), avatar: None }),
        cursor,
    }
}

fn at_origin() -> Option<Cursor> {
    Some(Cursor { row: 0, col: 0, direction: Direction::Across })
}

#[tokio::test]
async fn three_peers_on_one_cell_crowd_it() -> anyhow::Result<()> {
    let relay = start_relay().await?;
    let room = "puzzle:p-crowd:t1";
    let a = memory_stack(&relay.url, "p-crowd", "ca", room).await?;
    let b = memory_stack(&relay.url, "p-crowd", "cb", room).await?;
    let c = memory_stack(&relay.url, "p-crowd", "cc", room).await?;

    a.transport.set_local_awareness(identity("A", PALETTE[0], at_origin())).await;
    b.transport.set_local_awareness(identity("B", PALETTE[1], at_origin())).await;
    c.transport.set_local_awareness(identity("C", PALETTE[2], at_origin())).await;

    // From A's seat: both B and C focus (0,0).
    let a_awareness = Arc::clone(&a.awareness);
    eventually(WAIT, "a to see both collaborator cursors", || {
        let awareness = Arc::clone(&a_awareness);
        async move {
            let on_origin = awareness
                .peer_states()
                .iter()
                .filter(|(_, s)| s.cursor.map(|c| (c.row, c.col)) == Some((0, 0)))
                .count();
            on_origin == 2
        }
    })
    .await?;

    let shape = GridShape::new(5, 5, []);
    let highlights = cell_highlights(&shape, &a.awareness.peer_states());
    let origin = highlights.get(&(0, 0)).cloned().unwrap_or_default();
    assert_eq!(origin.colors.len(), 2, "B's and C's colors combine in the border");
    assert!(origin.colors.contains(&PALETTE[1].to_owned()));
    assert!(origin.colors.contains(&PALETTE[2].to_owned()));

    a.close().await;
    b.close().await;
    c.close().await;
    Ok(())
}

#[tokio::test]
async fn join_and_leave_are_announced_once() -> anyhow::Result<()> {
    let relay = start_relay().await?;
    let room = "puzzle:p-notes:t1";
    let a = memory_stack(&relay.url, "p-notes", "ca", room).await?;
    let mut changes = a.awareness.changes();
    let mut tracker = PresenceTracker::new();
    // Connected alone: arm the tracker with the empty initial state.
    tracker.note(&Default::default(), &a.awareness);

    let b = memory_stack(&relay.url, "p-notes", "cb", room).await?;
    b.transport.set_local_awareness(identity("Sly Lynx", PALETTE[1], None)).await;

    let mut notes = Vec::new();
    let deadline = tokio::time::Instant::now() + WAIT;
    while !notes.contains(&PresenceNote::Joined("Sly Lynx".to_owned())) {
        let change = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => anyhow::bail!("no join note"),
            change = changes.recv() => change,
        };
        if let Ok(change) = change {
            notes.extend(tracker.note(&change, &a.awareness));
        }
    }

    b.close().await;
    let deadline = tokio::time::Instant::now() + WAIT;
    while !notes.contains(&PresenceNote::Left("Sly Lynx".to_owned())) {
        let change = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => anyhow::bail!("no leave note"),
            change = changes.recv() => change,
        };
        if let Ok(change) = change {
            notes.extend(tracker.note(&change, &a.awareness));
        }
    }

    a.close().await;
    Ok(())
}

#[tokio::test]
async fn colors_assign_first_free_from_observed_peers() -> anyhow::Result<()> {
    let relay = start_relay().await?;
    let room = "puzzle:p-colors:t1";
    let a = memory_stack(&relay.url, "p-colors", "ca", room).await?;
    let b = memory_stack(&relay.url, "p-colors", "cb", room).await?;

    a.transport
        .set_local_awareness(identity("A", pick_color(a.transport.tag(), &[]), None))
        .await;

    let b_awareness = Arc::clone(&b.awareness);
    eventually(WAIT, "b to observe a's color", || {
        let awareness = Arc::clone(&b_awareness);
        async move { !taken_colors(&awareness).is_empty() }
    })
    .await?;

    let taken = taken_colors(&b.awareness);
    assert_eq!(taken, vec![PALETTE[0].to_owned()], "a took the first slot");
    let b_color = pick_color(b.transport.tag(), &taken);
    assert_eq!(b_color, PALETTE[1], "b takes the first free slot");

    a.close().await;
    b.close().await;
    Ok(())
}
