// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Headless collaborator: share a puzzle payload or join a session URL
//! from the terminal and watch the session converge. No grid rendering —
//! this is the embedder surface exercised without a UI.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use across::config::SessionConfig;
use across::doc::store::DocStore;
use across::doc::PuzzleDoc;
use across::peer::awareness::{AwarenessState, UserInfo};
use across::playtime::PlayClock;
use across::presence::{load_profile, pick_color, taken_colors, PresenceTracker};
use across::session::locator::{puzzle_id_for, SessionLocator};
use across::session::{CollisionChoice, JoinPlan, Session, SessionManager};

#[derive(Debug, Parser)]
#[command(name = "across", about = "Headless collaborative puzzle peer")]
struct Cli {
    /// WebSocket URL of the signaling relay.
    #[arg(long, default_value = "ws://127.0.0.1:9090/signaling", env = "ACROSS_RELAY_URL")]
    relay_url: String,

    /// Local data directory.
    #[arg(long, default_value = ".across", env = "ACROSS_DATA_DIR")]
    data_dir: PathBuf,

    /// Nickname shown to collaborators. Random if unset.
    #[arg(long, env = "ACROSS_NICKNAME")]
    nickname: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Share a puzzle payload and host the session.
    Share {
        /// Path to the opaque puzzle payload.
        payload: PathBuf,
    },
    /// Join a session URL (`#puzzle=…&timeline=…` or legacy `#room=…`).
    Join {
        url: String,
        /// What to do if local progress collides with the session timeline.
        #[arg(long, value_parser = ["merge", "fresh-start", "cancel"], default_value = "cancel")]
        on_collision: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = SessionConfig::default()
        .with_relay_url(cli.relay_url.clone())
        .with_data_dir(cli.data_dir.clone());
    let manager = SessionManager::new(config.clone());
    let nickname = cli.nickname.clone();

    let session = match cli.command {
        Command::Share { payload } => {
            let bytes = std::fs::read(&payload)?;
            let puzzle_id = puzzle_id_for(&bytes);
            let doc = PuzzleDoc::open(
                puzzle_id.clone(),
                manager.client_id(),
                DocStore::open(&config.data_dir, &puzzle_id),
            );
            let locator = manager.share(&doc, &bytes);
            doc.destroy(); // the attach below reopens it with the log intact
            info!("session url: {}", locator.encode());
            manager.attach(&locator).await?
        }
        Command::Join { url, on_collision } => {
            let fragment = url.split_once('#').map(|(_, f)| f).unwrap_or(&url);
            let Some(locator) = SessionLocator::parse(fragment) else {
                anyhow::bail!("unrecognized session url");
            };

            let plan = match manager.plan_join(&locator) {
                JoinPlan::Collision { local_timeline } => {
                    info!(
                        local = local_timeline.as_deref().unwrap_or("(none)"),
                        "local progress is on another timeline"
                    );
                    let choice = match on_collision.as_str() {
                        "merge" => CollisionChoice::Merge,
                        "fresh-start" => CollisionChoice::FreshStart,
                        _ => CollisionChoice::Cancel,
                    };
                    manager.resolve_collision(&locator, choice)?
                }
                plan => plan,
            };

            let session = manager.attach(&locator).await?;
            if plan == JoinPlan::Bootstrap {
                info!("joining: waiting for the puzzle payload…");
                let payload = manager.await_bootstrap(&session, None).await?;
                info!(bytes = payload.len(), "puzzle received");
            }
            session
        }
    };

    watch_session(&manager, &session, nickname).await;
    session.close().await;
    Ok(())
}

/// Announce our identity, then log document and presence traffic until
/// Ctrl-C.
async fn watch_session(manager: &SessionManager, session: &Session, nickname: Option<String>) {
    let nickname = nickname.unwrap_or_else(|| load_profile(manager.kv()).nickname);
    let color = pick_color(session.transport.tag(), &taken_colors(&session.awareness));
    session
        .transport
        .set_local_awareness(AwarenessState {
            user: Some(UserInfo { name: nickname.clone(), color: color.to_owned(), avatar: None }),
            cursor: None,
        })
        .await;
    info!(%nickname, color, room = session.transport.room(), "attached");

    let play = Arc::new(PlayClock::new(Arc::clone(&session.doc), manager.client_id()));
    let ticker = CancellationToken::new();
    play.resume();
    play.spawn(ticker.clone());

    let mut doc_events = session.doc.observe();
    let mut presence_changes = session.awareness.changes();
    let mut tracker = PresenceTracker::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = doc_events.recv() => {
                if let Ok(event) = event {
                    let value = event.value.clone().unwrap_or_default();
                    info!(map = event.map.as_str(), key = %event.key, value = %value, "change");
                }
            }
            change = presence_changes.recv() => {
                if let Ok(change) = change {
                    for note in tracker.note(&change, &session.awareness) {
                        info!(?note, "presence");
                    }
                }
            }
        }
    }
    ticker.cancel();
}
