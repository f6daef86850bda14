//! Async room driver.
//!
//! [`spawn_room`] moves a [`Room`] into a tokio task that owns it. The task
//! multiplexes two inputs:
//!
//! - host events (join, leave, message, state requests, shutdown) arriving on
//!   a bounded mpsc channel from any number of [`RoomHandle`]s,
//! - a fixed-rate [`interval`](tokio::time::interval) that drives
//!   [`Room::update`]. Missed ticks are skipped, never queued, so an overrun
//!   tick does not cause a burst. The tick after an overrun is given the
//!   whole elapsed time as its `dt`.
//!
//! Every tick's [`StatePatch`] is broadcast to subscribers. The room shuts
//! down on an explicit [`RoomHandle::shutdown`], on a fatal tick error, or
//! once every handle has been dropped.

use std::sync::Arc;

use ripple_ecs::entity::EntityId;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::TickConfig;
use crate::error::RoomError;
use crate::projector::{StatePatch, SyncState};
use crate::room::Room;
use crate::session::{JoinOptions, SessionId};

/// Capacity of the host event channel.
const EVENT_CAPACITY: usize = 256;
/// Patches a slow subscriber may fall behind before it starts missing them.
const PATCH_CAPACITY: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, RoomError>>;

#[derive(Debug)]
enum HostEvent {
    Join {
        session: SessionId,
        options: JoinOptions,
        reply: Reply<EntityId>,
    },
    Leave {
        session: SessionId,
        reply: Reply<EntityId>,
    },
    Message {
        session: SessionId,
        kind: String,
        payload: serde_json::Value,
        reply: Reply<()>,
    },
    FullState {
        reply: Reply<SyncState>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

// ---------------------------------------------------------------------------
// RoomHandle
// ---------------------------------------------------------------------------

/// Cloneable handle to a running room task.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    events: mpsc::Sender<HostEvent>,
    patches: broadcast::Sender<Arc<StatePatch>>,
}

impl RoomHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> HostEvent) -> Result<T, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(make(reply))
            .await
            .map_err(|_| RoomError::Closed)?;
        rx.await.map_err(|_| RoomError::Closed)?
    }

    /// Bind `session` to a new entity. Returns the reserved entity id.
    pub async fn join(&self, session: SessionId, options: JoinOptions) -> Result<EntityId, RoomError> {
        self.request(|reply| HostEvent::Join {
            session,
            options,
            reply,
        })
        .await
    }

    pub async fn leave(&self, session: SessionId) -> Result<EntityId, RoomError> {
        self.request(|reply| HostEvent::Leave { session, reply }).await
    }

    pub async fn send_message(
        &self,
        session: SessionId,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<(), RoomError> {
        let kind = kind.to_owned();
        self.request(|reply| HostEvent::Message {
            session,
            kind,
            payload,
            reply,
        })
        .await
    }

    /// The last published state, for a late joiner.
    pub async fn full_state(&self) -> Result<SyncState, RoomError> {
        self.request(|reply| HostEvent::FullState { reply }).await
    }

    /// Receive every patch published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StatePatch>> {
        self.patches.subscribe()
    }

    /// Dispose the room and wait until it has published its final patch.
    /// Calling it on a room that is already gone is not an error.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.events.send(HostEvent::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Whether the room task has stopped.
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Move `room` into a new task ticking at `tick.interval`.
///
/// Must be called from within a tokio runtime.
pub fn spawn_room(room: Room, tick: TickConfig) -> (RoomHandle, JoinHandle<()>) {
    let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
    let (patches_tx, _) = broadcast::channel(PATCH_CAPACITY);
    let handle = RoomHandle {
        events: events_tx,
        patches: patches_tx.clone(),
    };
    let task = tokio::spawn(run_room(room, tick, events_rx, patches_tx));
    (handle, task)
}

fn publish(patches: &broadcast::Sender<Arc<StatePatch>>, patch: StatePatch) {
    // No subscribers is fine.
    let _ = patches.send(Arc::new(patch));
}

async fn run_room(
    mut room: Room,
    tick: TickConfig,
    mut events: mpsc::Receiver<HostEvent>,
    patches: broadcast::Sender<Arc<StatePatch>>,
) {
    let mut interval = time::interval(tick.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_tick: Option<Instant> = None;
    info!(interval_ms = tick.interval.as_millis() as u64, "room driver started");

    loop {
        tokio::select! {
            biased;

            _ = interval.tick() => {
                // The interval reports the missed deadline, not the wakeup.
                let now = Instant::now();
                let dt = last_tick.map_or(0.0, |prev| (now - prev).as_secs_f64());
                last_tick = Some(now);
                match room.update(dt) {
                    Ok(patch) => publish(&patches, patch),
                    Err(e) => {
                        error!(error = %e, "room update failed -- stopping driver");
                        if let Some(patch) = room.shutdown() {
                            publish(&patches, patch);
                        }
                        break;
                    }
                }
            }

            event = events.recv() => {
                let Some(event) = event else {
                    info!("all room handles dropped");
                    if let Some(patch) = room.shutdown() {
                        publish(&patches, patch);
                    }
                    break;
                };
                match event {
                    HostEvent::Join { session, options, reply } => {
                        let _ = reply.send(room.on_join(session, &options));
                    }
                    HostEvent::Leave { session, reply } => {
                        let _ = reply.send(room.on_leave(&session));
                    }
                    HostEvent::Message { session, kind, payload, reply } => {
                        let _ = reply.send(room.on_message(&session, &kind, payload));
                    }
                    HostEvent::FullState { reply } => {
                        let _ = reply.send(Ok(room.state().clone()));
                    }
                    HostEvent::Shutdown { reply } => {
                        if let Some(patch) = room.shutdown() {
                            publish(&patches, patch);
                        }
                        let _ = reply.send(());
                        break;
                    }
                }
            }
        }
    }

    // Events still queued behind a shutdown get `Closed`.
    events.close();
    while let Ok(event) = events.try_recv() {
        warn!("dropping host event queued after shutdown");
        drop(event);
    }
    info!(ticks = room.tick_count(), "room driver stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
