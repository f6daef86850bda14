//! Local demo of a shape room.
//!
//! Usage:
//!   cargo run -p ripple-room --bin ripple-demo -- [--sessions 3] [--seconds 2] [--tick-hz 60] [--seed 42]
//!
//! Spawns a room task, joins a few sessions, grows the first shape with a
//! `self-radius` message, lets the simulation run, then has everyone leave
//! and shuts the room down. Patches are logged as they are published; set
//! `RUST_LOG=debug` to see every one.

use std::env;
use std::time::Duration;

use anyhow::Context;
use ripple_room::prelude::*;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct DemoArgs {
    sessions: usize,
    seconds: u64,
    tick_hz: u32,
    seed: Option<u64>,
}

fn parse_args() -> DemoArgs {
    let mut args = DemoArgs {
        sessions: 3,
        seconds: 2,
        tick_hz: 60,
        seed: None,
    };
    let argv: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--sessions" if i + 1 < argv.len() => {
                args.sessions = argv[i + 1].parse().unwrap_or(3);
                i += 2;
            }
            "--seconds" if i + 1 < argv.len() => {
                args.seconds = argv[i + 1].parse().unwrap_or(2);
                i += 2;
            }
            "--tick-hz" if i + 1 < argv.len() => {
                args.tick_hz = argv[i + 1].parse().unwrap_or(60);
                i += 2;
            }
            "--seed" if i + 1 < argv.len() => {
                args.seed = argv[i + 1].parse().ok();
                i += 2;
            }
            _ => i += 1,
        }
    }
    args
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();
    info!(?args, "starting demo room");

    let room = Room::on_create(&json!({
        "tickRateHz": args.tick_hz,
        "seed": args.seed,
    }))
    .context("create room")?;
    let tick = room.config().tick_config();
    let (handle, task) = spawn_room(room, tick);

    // Log patches as they come in.
    let mut patches = handle.subscribe();
    let watcher = tokio::spawn(async move {
        let mut received = 0u64;
        loop {
            match patches.recv().await {
                Ok(patch) => {
                    received += 1;
                    if !patch.is_empty() {
                        debug!(tick = patch.tick, changes = patch.changes.len(), hash = %patch.hash, "patch");
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "patch subscriber lagged"),
                Err(RecvError::Closed) => break,
            }
        }
        received
    });

    let sessions: Vec<SessionId> = (0..args.sessions)
        .map(|i| SessionId::new(format!("session-{i}")))
        .collect();
    for session in &sessions {
        let entity = handle
            .join(session.clone(), JoinOptions::default())
            .await
            .with_context(|| format!("join {session}"))?;
        info!(%session, %entity, "joined");
    }

    if let Some(first) = sessions.first() {
        handle
            .send_message(first.clone(), SELF_RADIUS, json!({ "radius": 40 }))
            .await
            .context("send self-radius")?;
    }

    tokio::time::sleep(Duration::from_secs(args.seconds)).await;

    let state = handle.full_state().await.context("fetch state")?;
    for entity in &state.entities {
        let position = entity.component("Position").map(|c| &c.fields);
        info!(entity = %entity.id, ?position, "entity");
    }
    info!(tick = state.tick, entities = state.entities.len(), hash = %state.hash(), "state");

    for session in &sessions {
        handle
            .leave(session.clone())
            .await
            .with_context(|| format!("leave {session}"))?;
    }

    handle.shutdown().await;
    drop(handle);
    task.await.context("room task")?;
    let received = watcher.await.context("patch watcher")?;
    info!(received, "demo finished");
    Ok(())
}
