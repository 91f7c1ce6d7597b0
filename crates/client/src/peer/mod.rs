// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Peer mesh transport.
//!
//! Built on a ready document. Discovers peers for the room through the
//! signaling topics, then establishes direct links and exchanges deltas:
//! on link open both sides swap state vectors (`sync_step1`/`sync_step2`),
//! after which local edits broadcast incrementally. The exchange is
//! idempotent — re-running it after a partial sync converges without
//! duplication, because the document skips already-seen ops.
//!
//! The dial rule is deterministic: of any pair, the lexicographically
//! smaller tag dials the other's advertised address, so no pair ever races
//! into duplicate links.

pub mod awareness;
pub mod msg;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

use crate::doc::PuzzleDoc;
use crate::peer::awareness::{Awareness, AwarenessState};
use crate::peer::msg::{from_payload, to_payload, AwarenessGossip, MeshKind, MeshMsg, PeerFrame};
use crate::signal::msg::PublishEvent;
use crate::signal::{ConnStatus, SignalClient};

/// Maximum JSON-line frame on a peer link. Puzzle payload bootstrap rides
/// inside an update, so this is generous.
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Connection state for the in-app indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    Disconnected,
    Connecting,
    Connected,
}

pub fn sync_topic(room: &str) -> String {
    format!("sync:{room}")
}

pub fn awareness_topic(room: &str) -> String {
    format!("awareness:{room}")
}

struct Inner {
    room: String,
    tag: String,
    addr: String,
    doc: Arc<PuzzleDoc>,
    awareness: Arc<Awareness>,
    signal: Arc<SignalClient>,
    links: Mutex<HashMap<String, mpsc::UnboundedSender<PeerFrame>>>,
    status_tx: watch::Sender<TransportStatus>,
    cancel: CancellationToken,
    destroyed: AtomicBool,
}

/// Mesh transport for one session. Owned by the session: constructed after
/// the document is ready, destroyed before the document.
pub struct PeerTransport {
    inner: Arc<Inner>,
    status_rx: watch::Receiver<TransportStatus>,
}

impl PeerTransport {
    /// Bind the peer listener, subscribe the room topics, and announce
    /// ourselves. The document must already have replayed its log.
    pub async fn start(
        doc: Arc<PuzzleDoc>,
        awareness: Arc<Awareness>,
        signal: Arc<SignalClient>,
        room: impl Into<String>,
        peer_host: &str,
    ) -> anyhow::Result<Self> {
        let room = room.into();
        let listener = TcpListener::bind((peer_host, 0)).await?;
        let addr = listener.local_addr()?.to_string();
        let tag = awareness.tag().to_owned();

        let (status_tx, status_rx) = watch::channel(TransportStatus::Connecting);
        let inner = Arc::new(Inner {
            room: room.clone(),
            tag,
            addr,
            doc,
            awareness,
            signal,
            links: Mutex::new(HashMap::new()),
            status_tx,
            cancel: CancellationToken::new(),
            destroyed: AtomicBool::new(false),
        });

        inner
            .signal
            .subscribe(vec![sync_topic(&room), awareness_topic(&room)]);

        // Take the receivers before announcing, so an instant welcome can't
        // slip past the signal loop.
        let publishes = inner.signal.publishes();
        let signal_status = inner.signal.status();
        tokio::spawn(accept_loop(Arc::clone(&inner), listener));
        tokio::spawn(signal_loop(Arc::clone(&inner), publishes, signal_status));
        tokio::spawn(update_loop(Arc::clone(&inner)));

        inner.signal.publish(
            sync_topic(&room),
            to_payload(&MeshMsg {
                kind: MeshKind::Join,
                from: inner.tag.clone(),
                addr: Some(inner.addr.clone()),
            }),
        );

        Ok(Self { inner, status_rx })
    }

    pub fn room(&self) -> &str {
        &self.inner.room
    }

    pub fn tag(&self) -> &str {
        &self.inner.tag
    }

    pub fn status(&self) -> watch::Receiver<TransportStatus> {
        self.status_rx.clone()
    }

    pub async fn connected_peers(&self) -> Vec<String> {
        self.inner.links.lock().await.keys().cloned().collect()
    }

    /// Update and broadcast the local awareness state (cursor move, identity
    /// change). Reaches direct links and, as a fallback for peers still
    /// negotiating, the awareness signaling topic.
    pub async fn set_local_awareness(&self, state: AwarenessState) {
        if self.inner.destroyed.load(Ordering::Acquire) {
            return;
        }
        let entry = self.inner.awareness.set_local(state);
        broadcast_frame(&self.inner, PeerFrame::Awareness { entries: vec![entry.clone()] }).await;
        self.inner.signal.publish(
            awareness_topic(&self.inner.room),
            to_payload(&AwarenessGossip { from: self.inner.tag.clone(), entries: vec![entry] }),
        );
    }

    /// Ordered teardown: stop awareness, close links, unsubscribe topics,
    /// cancel timers and tasks. Idempotent.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = &self.inner;

        // 1. Awareness: final departure entry, then clear the table.
        let entry = inner.awareness.depart_entry();
        broadcast_frame(inner, PeerFrame::Awareness { entries: vec![entry.clone()] }).await;
        inner.signal.publish(
            awareness_topic(&inner.room),
            to_payload(&AwarenessGossip { from: inner.tag.clone(), entries: vec![entry] }),
        );
        inner.signal.publish(
            sync_topic(&inner.room),
            to_payload(&MeshMsg { kind: MeshKind::Leave, from: inner.tag.clone(), addr: None }),
        );
        inner.awareness.clear();

        // 2. Close data channels.
        {
            let mut links = inner.links.lock().await;
            for (_, tx) in links.drain() {
                let _ = tx.send(PeerFrame::Bye {});
            }
        }

        // 3. Unsubscribe the room topics.
        inner
            .signal
            .unsubscribe(vec![sync_topic(&inner.room), awareness_topic(&inner.room)]);

        // 4. Cancel tasks and any pending reconnect timers.
        inner.cancel.cancel();
        let _ = inner.status_tx.send(TransportStatus::Disconnected);
    }
}

async fn broadcast_frame(inner: &Inner, frame: PeerFrame) {
    let links = inner.links.lock().await;
    for tx in links.values() {
        let _ = tx.send(frame.clone());
    }
}

/// Accept inbound peer links.
async fn accept_loop(inner: Arc<Inner>, listener: TcpListener) {
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => return,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        tokio::spawn(run_link(Arc::clone(&inner), stream));
                    }
                    Err(e) => {
                        tracing::debug!(err = %e, "peer accept failed");
                    }
                }
            }
        }
    }
}

/// Consume signaling traffic: mesh negotiation, awareness fallback, and
/// relay connection-state transitions.
async fn signal_loop(
    inner: Arc<Inner>,
    mut publishes: tokio::sync::broadcast::Receiver<PublishEvent>,
    mut status: watch::Receiver<ConnStatus>,
) {
    let sync = sync_topic(&inner.room);
    let awareness = awareness_topic(&inner.room);

    // Seed from the relay's current state; `changed()` only reports
    // transitions after this point.
    let _ = inner.status_tx.send(map_status(*status.borrow_and_update()));

    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => return,
            event = publishes.recv() => {
                let event = match event {
                    Ok(e) => e,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                };
                handle_publish(&inner, &sync, &awareness, event).await;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    return;
                }
                let conn = *status.borrow_and_update();
                let _ = inner.status_tx.send(map_status(conn));
                if conn == ConnStatus::Connected {
                    // Re-mesh after a relay reconnect: peers that joined
                    // while we were away answer the fresh announce.
                    inner.signal.publish(
                        sync.clone(),
                        to_payload(&MeshMsg {
                            kind: MeshKind::Join,
                            from: inner.tag.clone(),
                            addr: Some(inner.addr.clone()),
                        }),
                    );
                }
            }
        }
    }
}

async fn handle_publish(inner: &Arc<Inner>, sync: &str, awareness: &str, event: PublishEvent) {
    if event.topic == sync {
        let Some(mesh) = from_payload::<MeshMsg>(&event.payload) else {
            return;
        };
        if mesh.from == inner.tag {
            return; // loopback echo
        }
        match mesh.kind {
            MeshKind::Join => {
                inner.signal.publish(
                    sync.to_owned(),
                    to_payload(&MeshMsg {
                        kind: MeshKind::Welcome,
                        from: inner.tag.clone(),
                        addr: Some(inner.addr.clone()),
                    }),
                );
                maybe_dial(inner, &mesh).await;
            }
            MeshKind::Welcome => {
                maybe_dial(inner, &mesh).await;
            }
            MeshKind::Leave => {
                inner.links.lock().await.remove(&mesh.from);
                inner.awareness.remove_peer(&mesh.from);
            }
        }
    } else if event.topic == awareness {
        let Some(gossip) = from_payload::<AwarenessGossip>(&event.payload) else {
            return;
        };
        if gossip.from != inner.tag {
            inner.awareness.apply(&gossip.entries);
        }
    }
}

fn map_status(conn: ConnStatus) -> TransportStatus {
    match conn {
        ConnStatus::Connected => TransportStatus::Connected,
        ConnStatus::Connecting => TransportStatus::Connecting,
        ConnStatus::Disconnected => TransportStatus::Disconnected,
    }
}

/// Dial a peer if the deterministic rule elects us and no link exists yet.
/// The connect runs in its own task so a dead address never stalls the
/// signal loop.
async fn maybe_dial(inner: &Arc<Inner>, mesh: &MeshMsg) {
    let Some(addr) = mesh.addr.clone() else {
        return;
    };
    if inner.tag >= mesh.from {
        return; // the other side dials
    }
    if inner.links.lock().await.contains_key(&mesh.from) {
        return;
    }
    let inner = Arc::clone(inner);
    let peer = mesh.from.clone();
    tokio::spawn(async move {
        match TcpStream::connect(&addr).await {
            Ok(stream) => run_link(inner, stream).await,
            Err(e) => {
                tracing::debug!(peer = %peer, err = %e, "peer dial failed");
            }
        }
    });
}

/// Forward locally-originated document updates to every link.
async fn update_loop(inner: Arc<Inner>) {
    let mut updates = inner.doc.updates();
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => return,
            update = updates.recv() => {
                match update {
                    Ok(update) => {
                        broadcast_frame(&inner, PeerFrame::Update { update }).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }
}

/// Drive one peer link: hello handshake, initial sync + awareness exchange,
/// then frame pumping until the link drops.
async fn run_link(inner: Arc<Inner>, stream: TcpStream) {
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));

    if send(&mut framed, &PeerFrame::Hello { tag: inner.tag.clone() }).await.is_err() {
        return;
    }
    let remote = match hello_handshake(&mut framed).await {
        Some(tag) => tag,
        None => return,
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<PeerFrame>();
    {
        let mut links = inner.links.lock().await;
        links.insert(remote.clone(), tx.clone());
    }
    tracing::debug!(peer = %remote, room = %inner.room, "peer link established");

    // Initial exchange: state vector and the known awareness table.
    let step1 = PeerFrame::SyncStep1 { sv: inner.doc.state_vector() };
    if send(&mut framed, &step1).await.is_err() {
        cleanup_link(&inner, &remote, &tx).await;
        return;
    }
    let entries = inner.awareness.snapshot();
    if !entries.is_empty()
        && send(&mut framed, &PeerFrame::Awareness { entries }).await.is_err()
    {
        cleanup_link(&inner, &remote, &tx).await;
        return;
    }

    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => {
                let _ = send(&mut framed, &PeerFrame::Bye {}).await;
                break;
            }
            out = rx.recv() => {
                let Some(frame) = out else { break };
                let closing = matches!(frame, PeerFrame::Bye {});
                if send(&mut framed, &frame).await.is_err() || closing {
                    break;
                }
            }
            msg = framed.next() => {
                let line = match msg {
                    Some(Ok(line)) => line,
                    Some(Err(_)) | None => break,
                };
                let frame: PeerFrame = match serde_json::from_str(&line) {
                    Ok(f) => f,
                    Err(e) => {
                        tracing::debug!(err = %e, "dropping malformed peer frame");
                        continue;
                    }
                };
                match frame {
                    PeerFrame::SyncStep1 { sv } => {
                        let update = inner.doc.diff(&sv);
                        if !update.is_empty()
                            && send(&mut framed, &PeerFrame::SyncStep2 { update }).await.is_err()
                        {
                            break;
                        }
                    }
                    PeerFrame::SyncStep2 { update } | PeerFrame::Update { update } => {
                        inner.doc.apply(&update);
                    }
                    PeerFrame::Awareness { entries } => {
                        inner.awareness.apply(&entries);
                    }
                    PeerFrame::Bye {} => break,
                    PeerFrame::Hello { .. } => {}
                }
            }
        }
    }

    cleanup_link(&inner, &remote, &tx).await;
    tracing::debug!(peer = %remote, "peer link closed");
}

/// Wait for the remote hello. Anything else first is a protocol violation
/// and drops the link.
async fn hello_handshake(framed: &mut Framed<TcpStream, LinesCodec>) -> Option<String> {
    let handshake = tokio::time::timeout(std::time::Duration::from_secs(10), framed.next());
    match handshake.await {
        Ok(Some(Ok(line))) => match serde_json::from_str(&line) {
            Ok(PeerFrame::Hello { tag }) => Some(tag),
            _ => None,
        },
        _ => None,
    }
}

/// Remove the link table entry — but only if it is still ours; a
/// replacement link established meanwhile stays.
async fn cleanup_link(inner: &Arc<Inner>, remote: &str, tx: &mpsc::UnboundedSender<PeerFrame>) {
    let mut links = inner.links.lock().await;
    if links.get(remote).is_some_and(|current| current.same_channel(tx)) {
        links.remove(remote);
    }
    drop(links);
    inner.awareness.remove_peer(remote);
}

async fn send(
    framed: &mut Framed<TcpStream, LinesCodec>,
    frame: &PeerFrame,
) -> Result<(), ()> {
    let Ok(json) = serde_json::to_string(frame) else {
        return Err(());
    };
    framed.send(json).await.map_err(|_| ())
}
