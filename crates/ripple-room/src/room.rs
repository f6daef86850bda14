//! The room: one simulation and the callbacks the hosting layer drives it
//! with.
//!
//! A [`Room`] wires the [`TickLoop`], the [`SessionBinder`] and the
//! [`StateProjector`] together. The host calls
//!
//! - [`Room::on_create`] once with the creation options,
//! - [`Room::on_join`], [`Room::on_leave`] and [`Room::on_message`] as
//!   clients come and go,
//! - [`Room::update`] on every timer tick,
//! - [`Room::shutdown`] when the room is disposed.
//!
//! Join, leave and message only queue work. `update` applies it, runs the
//! systems and returns the state patch to publish.

use ripple_ecs::entity::EntityId;
use ripple_ecs::world::World;
use tracing::{error, info};

use crate::components::register_all;
use crate::config::RoomConfig;
use crate::error::RoomError;
use crate::messages::MessageHandlers;
use crate::projector::{StatePatch, StateProjector, SyncState};
use crate::session::{EntityFactory, JoinOptions, RandomShapeFactory, SessionBinder, SessionId};
use crate::systems::install_movement;
use crate::tick::{TickDiagnostics, TickLoop};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Running,
    /// Disposed; the final patch has not been handed out yet.
    Disposed,
    /// Disposed and the final patch was taken.
    Closed,
}

/// One simulation room.
#[derive(Debug)]
pub struct Room {
    config: RoomConfig,
    tick_loop: TickLoop,
    binder: SessionBinder,
    projector: StateProjector,
    lifecycle: Lifecycle,
    final_patch: Option<StatePatch>,
}

impl Room {
    /// Create a room from the host's creation options (a JSON object, or
    /// `null` for the defaults).
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::InvalidOptions`] if the options do not parse or
    /// are out of range.
    pub fn on_create(options: &serde_json::Value) -> Result<Self, RoomError> {
        let config = RoomConfig::from_options(options)?;
        let factory = Box::new(RandomShapeFactory::new(&config));
        Self::with_factory(config, factory)
    }

    /// Create a room with a custom entity factory.
    pub fn with_factory(config: RoomConfig, factory: Box<dyn EntityFactory>) -> Result<Self, RoomError> {
        config.validate()?;
        let mut world = World::with_config(config.world_config());
        register_all(&mut world)?;
        let mut tick_loop = TickLoop::new(world);
        install_movement(&mut tick_loop)?;

        let binder = SessionBinder::new(factory, MessageHandlers::with_builtins());
        info!(
            tick_rate_hz = config.tick_rate_hz,
            bound_width = config.bound_width,
            bound_height = config.bound_height,
            seed = ?config.seed,
            "room created"
        );
        Ok(Self {
            config,
            tick_loop,
            binder,
            projector: StateProjector::new(),
            lifecycle: Lifecycle::Running,
            final_patch: None,
        })
    }

    fn ensure_running(&self) -> Result<(), RoomError> {
        match self.lifecycle {
            Lifecycle::Running => Ok(()),
            Lifecycle::Disposed | Lifecycle::Closed => Err(RoomError::Disposed),
        }
    }

    /// Bind `session` to a new entity. The entity appears in the state after
    /// the next [`update`](Self::update).
    pub fn on_join(&mut self, session: SessionId, options: &JoinOptions) -> Result<EntityId, RoomError> {
        self.ensure_running()?;
        self.binder
            .on_join(session, options, self.tick_loop.world_mut())
    }

    /// Unbind `session`. Its entity is destroyed at the next update.
    pub fn on_leave(&mut self, session: &SessionId) -> Result<EntityId, RoomError> {
        self.ensure_running()?;
        self.binder.on_leave(session)
    }

    /// Queue a client message for its handler.
    pub fn on_message(
        &mut self,
        session: &SessionId,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<(), RoomError> {
        self.ensure_running()?;
        self.binder.on_message(session, kind, payload)
    }

    /// Run one tick of `dt` seconds and return what changed.
    ///
    /// # Errors
    ///
    /// - [`RoomError::Disposed`] after shutdown.
    /// - A fatal [`RoomError::Ecs`] if the world's id invariant broke. The
    ///   room disposes itself before returning it.
    pub fn update(&mut self, dt: f64) -> Result<StatePatch, RoomError> {
        self.ensure_running()?;
        let started = self.tick_loop.begin_tick(&mut self.binder).map(|_| ());
        if let Err(e) = started {
            error!(error = %e, "fatal error at tick start -- disposing room");
            let patch = self.dispose();
            self.final_patch = Some(patch);
            return Err(e.into());
        }
        self.tick_loop.run_systems(dt);
        Ok(self
            .projector
            .publish(self.tick_loop.world(), self.tick_loop.tick_count()))
    }

    /// Dispose the room and return the final patch.
    ///
    /// Pending leaves are carried out, pending joins are discarded and every
    /// remaining entity is destroyed, so the final state is empty. Returns
    /// `None` once the final patch has been handed out.
    pub fn shutdown(&mut self) -> Option<StatePatch> {
        match self.lifecycle {
            Lifecycle::Running => {
                let patch = self.dispose();
                self.lifecycle = Lifecycle::Closed;
                Some(patch)
            }
            Lifecycle::Disposed => {
                self.lifecycle = Lifecycle::Closed;
                self.final_patch.take()
            }
            Lifecycle::Closed => None,
        }
    }

    fn dispose(&mut self) -> StatePatch {
        self.lifecycle = Lifecycle::Disposed;
        let commands = self.tick_loop.flush_commands();
        let sessions = self.binder.shutdown(self.tick_loop.world_mut());
        let purged = self.tick_loop.world_mut().destroy_all();
        info!(
            flushed_leaves = sessions.flushed_leaves,
            discarded_joins = sessions.discarded_joins,
            commands = commands.success_count,
            purged,
            "room disposed"
        );
        self.projector
            .publish(self.tick_loop.world(), self.tick_loop.tick_count())
    }

    // -- accessors ----------------------------------------------------------

    /// The last published state.
    pub fn state(&self) -> &SyncState {
        self.projector.full_state()
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        self.tick_loop.world()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_loop.tick_count()
    }

    pub fn is_disposed(&self) -> bool {
        self.lifecycle != Lifecycle::Running
    }

    /// The entity bound to `session`, if any.
    pub fn entity_of(&self, session: &SessionId) -> Option<EntityId> {
        self.binder.entity_of(session)
    }

    pub fn session_count(&self) -> usize {
        self.binder.session_count()
    }

    pub fn last_diagnostics(&self) -> &TickDiagnostics {
        self.tick_loop.last_diagnostics()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
