// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end convergence scenarios: basic sync, payload bootstrap for late
//! joiners, offline resilience, collision merge, and the verified-cell lock
//! across peers.

use std::sync::Arc;
use std::time::Duration;

use across::doc::store::DocStore;
use across::doc::PuzzleDoc;
use across::session::locator::{puzzle_id_for, SessionLocator};
use across::session::{CollisionChoice, JoinPlan, SessionManager};
use across_specs::{client_config, eventually, memory_stack, stack_on, start_relay};

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn basic_sync_between_two_peers() -> anyhow::Result<()> {
    let relay = start_relay().await?;
    let room = "puzzle:p-basic:t1";
    let a = memory_stack(&relay.url, "p-basic", "client-a", room).await?;
    let b = memory_stack(&relay.url, "p-basic", "client-b", room).await?;

    a.doc.enter_letter(0, 0, 'a');

    let b_doc = Arc::clone(&b.doc);
    eventually(WAIT, "b to see the letter", || {
        let doc = Arc::clone(&b_doc);
        async move { doc.entry(0, 0).as_deref() == Some("A") }
    })
    .await?;

    a.close().await;
    b.close().await;
    Ok(())
}

#[tokio::test]
async fn late_joiner_bootstraps_the_puzzle_payload() -> anyhow::Result<()> {
    let relay = start_relay().await?;
    let payload = b"opaque puzzle bytes".to_vec();
    let puzzle_id = puzzle_id_for(&payload);

    // Sharer: has the puzzle, shares it, solves a cell.
    let dir_a = tempfile::tempdir()?;
    let mgr_a = SessionManager::new(client_config(&relay.url, dir_a.path()));
    let doc_a = PuzzleDoc::open(
        puzzle_id.clone(),
        mgr_a.client_id(),
        DocStore::open(dir_a.path(), &puzzle_id),
    );
    let locator = mgr_a.share(&doc_a, &payload);
    doc_a.enter_letter(0, 0, 'x');
    doc_a.destroy();
    let session_a = mgr_a.attach(&locator).await?;

    // Joiner: empty local storage, must bootstrap.
    let dir_b = tempfile::tempdir()?;
    let mgr_b = SessionManager::new(client_config(&relay.url, dir_b.path()));
    assert_eq!(mgr_b.plan_join(&locator), JoinPlan::Bootstrap);
    let session_b = mgr_b.attach(&locator).await?;

    let received = mgr_b.await_bootstrap(&session_b, Some(WAIT)).await?;
    assert_eq!(received, payload);
    assert!(mgr_b.has_local_puzzle(&puzzle_id), "payload is cached for the next open");

    let b_doc = Arc::clone(&session_b.doc);
    eventually(WAIT, "b to see the sharer's entry", || {
        let doc = Arc::clone(&b_doc);
        async move { doc.entry(0, 0).as_deref() == Some("X") }
    })
    .await?;

    session_a.close().await;
    session_b.close().await;
    Ok(())
}

#[tokio::test]
async fn bootstrap_times_out_without_a_sharer() -> anyhow::Result<()> {
    let relay = start_relay().await?;
    let locator = SessionLocator::Puzzle {
        puzzle_id: "p-nobody-home".to_owned(),
        timeline_id: "t-alone".to_owned(),
    };

    let dir = tempfile::tempdir()?;
    let mgr = SessionManager::new(client_config(&relay.url, dir.path()));
    assert_eq!(mgr.plan_join(&locator), JoinPlan::Bootstrap);
    let session = mgr.attach(&locator).await?;

    let result = mgr.await_bootstrap(&session, Some(Duration::from_millis(400))).await;
    assert_eq!(result, Err(across::error::JoinFailure::BootstrapTimeout));

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn offline_edits_replay_on_reconnect() -> anyhow::Result<()> {
    let relay = start_relay().await?;
    let room = "puzzle:p-offline:t1";
    let doc_a = Arc::new(PuzzleDoc::open("p-offline", "client-a", DocStore::memory()));
    let a = stack_on(&relay.url, Arc::clone(&doc_a), room).await?;
    let b = memory_stack(&relay.url, "p-offline", "client-b", room).await?;

    a.doc.enter_letter(0, 0, 'a');
    let b_doc = Arc::clone(&b.doc);
    eventually(WAIT, "first letter to sync", || {
        let doc = Arc::clone(&b_doc);
        async move { doc.entry(0, 0).is_some() }
    })
    .await?;

    // The network drops: tear down a's transport, keep editing locally.
    a.transport.destroy().await;
    a.signal.shutdown();
    doc_a.enter_letter(0, 1, 'b');

    // The network returns: a re-attaches on the same (still ready) document.
    let a2 = stack_on(&relay.url, Arc::clone(&doc_a), room).await?;

    let b_doc = Arc::clone(&b.doc);
    eventually(WAIT, "offline edit to replay", || {
        let doc = Arc::clone(&b_doc);
        async move {
            doc.entry(0, 0).as_deref() == Some("A") && doc.entry(0, 1).as_deref() == Some("B")
        }
    })
    .await?;

    a2.close().await;
    b.close().await;
    Ok(())
}

#[tokio::test]
async fn collision_merge_unions_both_timelines() -> anyhow::Result<()> {
    let relay = start_relay().await?;
    let payload = b"collision puzzle".to_vec();
    let puzzle_id = puzzle_id_for(&payload);

    // A shares under timeline T1 with one entry.
    let dir_a = tempfile::tempdir()?;
    let mgr_a = SessionManager::new(client_config(&relay.url, dir_a.path()));
    let doc_a = PuzzleDoc::open(
        puzzle_id.clone(),
        mgr_a.client_id(),
        DocStore::open(dir_a.path(), &puzzle_id),
    );
    let locator = mgr_a.share(&doc_a, &payload);
    doc_a.enter_letter(0, 0, 'a');
    doc_a.destroy();
    let session_a = mgr_a.attach(&locator).await?;

    // B solved the same puzzle locally under its own thread.
    let dir_b = tempfile::tempdir()?;
    let mgr_b = SessionManager::new(client_config(&relay.url, dir_b.path()));
    mgr_b.store_payload(&puzzle_id, &payload);
    mgr_b.set_local_timeline(&puzzle_id, "t-solo");
    {
        let doc_b = PuzzleDoc::open(
            puzzle_id.clone(),
            mgr_b.client_id(),
            DocStore::open(dir_b.path(), &puzzle_id),
        );
        doc_b.enter_letter(0, 2, 'c');
        doc_b.destroy();
    }

    // Opening A's URL collides; B chooses merge.
    let plan = mgr_b.plan_join(&locator);
    assert!(matches!(plan, JoinPlan::Collision { .. }), "got {plan:?}");
    assert_eq!(mgr_b.resolve_collision(&locator, CollisionChoice::Merge), Ok(JoinPlan::Attach));
    let session_b = mgr_b.attach(&locator).await?;

    let (a_doc, b_doc) = (Arc::clone(&session_a.doc), Arc::clone(&session_b.doc));
    eventually(WAIT, "both peers to hold the union", || {
        let (a, b) = (Arc::clone(&a_doc), Arc::clone(&b_doc));
        async move {
            a.entry(0, 0).as_deref() == Some("A")
                && a.entry(0, 2).as_deref() == Some("C")
                && b.entry(0, 0).as_deref() == Some("A")
                && b.entry(0, 2).as_deref() == Some("C")
        }
    })
    .await?;

    session_a.close().await;
    session_b.close().await;
    Ok(())
}

#[tokio::test]
async fn verified_lock_holds_on_every_peer() -> anyhow::Result<()> {
    let relay = start_relay().await?;
    let room = "puzzle:p-verify:t1";
    let a = memory_stack(&relay.url, "p-verify", "client-a", room).await?;
    let b = memory_stack(&relay.url, "p-verify", "client-b", room).await?;

    a.doc.enter_letter(1, 1, 'k');
    a.doc.check_cell(1, 1, 'k');

    let b_doc = Arc::clone(&b.doc);
    eventually(WAIT, "verification to propagate", || {
        let doc = Arc::clone(&b_doc);
        async move { doc.verified(1, 1).is_some() }
    })
    .await?;

    assert!(!b.doc.enter_letter(1, 1, 'z'), "verified cell refuses typing on the other peer");
    assert_eq!(b.doc.entry(1, 1).as_deref(), Some("K"));

    a.close().await;
    b.close().await;
    Ok(())
}
