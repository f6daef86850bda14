//! Session binder: maps remote sessions to entities.
//!
//! The hosting layer calls [`SessionBinder::on_join`], [`on_leave`] and
//! [`on_message`] as events arrive, at any point between or during ticks.
//! The binder only records intents. They are applied to the [`World`] in
//! arrival order by [`SessionBinder::drain`], which the tick loop calls at
//! the start of every tick.
//!
//! A join reserves the entity id immediately so the caller learns it right
//! away; the entity becomes alive at the next drain. A leave unbinds the
//! session immediately and destroys the entity at the next drain.
//!
//! [`on_leave`]: SessionBinder::on_leave
//! [`on_message`]: SessionBinder::on_message

use std::collections::{HashMap, VecDeque};
use std::fmt;

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use ripple_ecs::component::{Component, ComponentRegistry, FieldKind};
use ripple_ecs::entity::EntityId;
use ripple_ecs::world::{ComponentBundle, World};
use ripple_ecs::EcsError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::components::{NetworkIdentity, Position, Primitive, Renderable, Shape, Velocity};
use crate::config::RoomConfig;
use crate::error::RoomError;
use crate::messages::MessageHandlers;

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Opaque identifier the hosting layer assigns to a connected client.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({:?})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Join options and the entity factory
// ---------------------------------------------------------------------------

/// Options a client sends with its join request. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinOptions {
    pub primitive: Option<Primitive>,
    pub color: Option<String>,
}

/// Builds the initial component set of a joining session's entity.
pub trait EntityFactory: Send {
    /// Build the components for `entity`, which is reserved but not alive.
    fn build(
        &mut self,
        entity: EntityId,
        session: &SessionId,
        options: &JoinOptions,
        registry: &ComponentRegistry,
    ) -> Result<ComponentBundle, EcsError>;
}

/// Spawns a randomly placed, randomly moving shape.
///
/// The generator is a seeded PCG, so a fixed seed reproduces every spawn.
#[derive(Debug, Clone)]
pub struct RandomShapeFactory {
    rng: Pcg64,
    bound_width: f64,
    bound_height: f64,
    speed: f64,
    default_radius: f64,
}

impl RandomShapeFactory {
    /// Seeded from `config.seed`, or from OS entropy when unset.
    pub fn new(config: &RoomConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => Pcg64::seed_from_u64(seed),
            None => Pcg64::from_entropy(),
        };
        Self {
            rng,
            bound_width: config.bound_width,
            bound_height: config.bound_height,
            speed: config.speed,
            default_radius: config.default_radius,
        }
    }

    /// Velocity component in `[-speed, speed)`.
    fn axis_velocity(&mut self) -> f64 {
        self.speed * (2.0 * self.rng.gen::<f64>() - 1.0)
    }

    fn random_color(&mut self) -> String {
        format!("#{:06x}", self.rng.gen_range(0..=0x00ff_ffffu32))
    }
}

impl EntityFactory for RandomShapeFactory {
    fn build(
        &mut self,
        entity: EntityId,
        session: &SessionId,
        options: &JoinOptions,
        registry: &ComponentRegistry,
    ) -> Result<ComponentBundle, EcsError> {
        let velocity = Velocity {
            x: self.axis_velocity(),
            y: self.axis_velocity(),
        };
        let random_primitive = if self.rng.gen::<f64>() >= 0.5 {
            Primitive::Circle
        } else {
            Primitive::Box
        };
        let random_color = self.random_color();
        let shape = Shape {
            primitive: options.primitive.unwrap_or(random_primitive),
            color: options.color.clone().unwrap_or(random_color),
            radius: self.default_radius,
        };
        let position = Position {
            x: self.rng.gen::<f64>() * self.bound_width,
            y: self.rng.gen::<f64>() * self.bound_height,
        };

        let network_id =
            i64::try_from(entity.to_raw()).map_err(|_| EcsError::SchemaMismatch {
                component: NetworkIdentity::TAG.to_owned(),
                field: "networkId".to_owned(),
                expected: FieldKind::Int64,
            })?;

        let mut bundle = ComponentBundle::new();
        bundle.add(
            registry,
            NetworkIdentity {
                session_id: session.to_string(),
                network_id,
            },
        )?;
        bundle.add(registry, velocity)?;
        bundle.add(registry, shape)?;
        bundle.add(registry, position)?;
        bundle.add(registry, Renderable)?;
        Ok(bundle)
    }
}

// ---------------------------------------------------------------------------
// Pending events
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum SessionEvent {
    Join {
        session: SessionId,
        entity: EntityId,
        bundle: ComponentBundle,
    },
    Leave {
        session: SessionId,
        entity: EntityId,
    },
    Message {
        session: SessionId,
        entity: EntityId,
        kind: String,
        payload: serde_json::Value,
    },
}

/// What one [`SessionBinder::drain`] applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub joined: usize,
    pub left: usize,
    pub messages: usize,
    /// Events that could not be applied and were logged.
    pub rejected: usize,
}

/// What [`SessionBinder::shutdown`] did with the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Deferred destructions that were carried out.
    pub flushed_leaves: usize,
    /// Joins whose entity never became alive.
    pub discarded_joins: usize,
    pub dropped_messages: usize,
}

// ---------------------------------------------------------------------------
// SessionBinder
// ---------------------------------------------------------------------------

/// Keeps the session <-> entity mapping and the queue of pending events.
pub struct SessionBinder {
    by_session: HashMap<SessionId, EntityId>,
    by_entity: HashMap<EntityId, SessionId>,
    /// Joins, leaves and messages in arrival order.
    pending: VecDeque<SessionEvent>,
    factory: Box<dyn EntityFactory>,
    handlers: MessageHandlers,
}

impl fmt::Debug for SessionBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBinder")
            .field("sessions", &self.by_session.len())
            .field("pending", &self.pending.len())
            .field("handlers", &self.handlers)
            .finish()
    }
}

impl SessionBinder {
    pub fn new(factory: Box<dyn EntityFactory>, handlers: MessageHandlers) -> Self {
        Self {
            by_session: HashMap::new(),
            by_entity: HashMap::new(),
            pending: VecDeque::new(),
            factory,
            handlers,
        }
    }

    /// Bind `session` to a new entity and queue its creation.
    ///
    /// The returned id is reserved now and becomes alive at the next
    /// [`drain`](Self::drain).
    ///
    /// # Errors
    ///
    /// - [`RoomError::SessionAlreadyBound`] if the session owns an entity.
    /// - [`RoomError::Ecs`] if the factory cannot build the components.
    pub fn on_join(
        &mut self,
        session: SessionId,
        options: &JoinOptions,
        world: &mut World,
    ) -> Result<EntityId, RoomError> {
        if let Some(&entity) = self.by_session.get(&session) {
            return Err(RoomError::SessionAlreadyBound { session, entity });
        }

        let entity = world.reserve_entity();
        let bundle = match self.factory.build(entity, &session, options, world.registry()) {
            Ok(bundle) => bundle,
            Err(e) => {
                world.release_reservation(entity);
                return Err(e.into());
            }
        };

        self.by_session.insert(session.clone(), entity);
        self.by_entity.insert(entity, session.clone());
        info!(session = %session, entity = %entity, "session joined");
        self.pending.push_back(SessionEvent::Join {
            session,
            entity,
            bundle,
        });
        Ok(entity)
    }

    /// Unbind `session` and queue destruction of its entity.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::SessionNotBound`] if the session owns no entity.
    pub fn on_leave(&mut self, session: &SessionId) -> Result<EntityId, RoomError> {
        let entity = self
            .by_session
            .remove(session)
            .ok_or_else(|| RoomError::SessionNotBound {
                session: session.clone(),
            })?;
        self.by_entity.remove(&entity);
        info!(session = %session, entity = %entity, "session left");
        self.pending.push_back(SessionEvent::Leave {
            session: session.clone(),
            entity,
        });
        Ok(entity)
    }

    /// Queue a message for its handler.
    ///
    /// Messages of a kind with no registered handler are logged and dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::SessionNotBound`] if the session owns no entity.
    pub fn on_message(
        &mut self,
        session: &SessionId,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<(), RoomError> {
        let entity = *self
            .by_session
            .get(session)
            .ok_or_else(|| RoomError::SessionNotBound {
                session: session.clone(),
            })?;
        if !self.handlers.contains(kind) {
            warn!(session = %session, kind = %kind, "no handler for message kind -- dropped");
            return Ok(());
        }
        self.pending.push_back(SessionEvent::Message {
            session: session.clone(),
            entity,
            kind: kind.to_owned(),
            payload,
        });
        Ok(())
    }

    /// Apply every pending event to `world`, in arrival order.
    ///
    /// Bindings whose entity was destroyed by other means are dropped too.
    ///
    /// # Errors
    ///
    /// Returns the error of a join that breached id uniqueness. The world
    /// must not be ticked again after that.
    pub fn drain(&mut self, world: &mut World) -> Result<DrainReport, EcsError> {
        let mut report = DrainReport::default();
        while let Some(event) = self.pending.pop_front() {
            match event {
                SessionEvent::Join {
                    session,
                    entity,
                    bundle,
                } => match world.spawn_reserved(entity, bundle) {
                    Ok(()) => {
                        report.joined += 1;
                        debug!(session = %session, entity = %entity, "entity spawned");
                    }
                    Err(e) if e.is_fatal() => {
                        tracing::error!(
                            session = %session,
                            entity = %entity,
                            error = %e,
                            "entity id collision -- aborting room"
                        );
                        return Err(e);
                    }
                    Err(e) => {
                        report.rejected += 1;
                        warn!(session = %session, entity = %entity, error = %e, "join could not be applied");
                        self.unbind_entity(entity);
                    }
                },
                SessionEvent::Leave { session, entity } => {
                    if world.is_alive(entity) {
                        if let Err(e) = world.destroy(entity) {
                            report.rejected += 1;
                            warn!(session = %session, entity = %entity, error = %e, "leave could not be applied");
                            continue;
                        }
                        info!(session = %session, entity = %entity, "leave applied");
                    } else {
                        world.release_reservation(entity);
                    }
                    report.left += 1;
                }
                SessionEvent::Message {
                    session,
                    entity,
                    kind,
                    payload,
                } => {
                    if !world.is_alive(entity) {
                        report.rejected += 1;
                        warn!(session = %session, entity = %entity, kind = %kind, "message target is gone -- dropped");
                        continue;
                    }
                    match self
                        .handlers
                        .dispatch(world, &session, entity, &kind, &payload)
                    {
                        Ok(_) => report.messages += 1,
                        Err(e) => {
                            report.rejected += 1;
                            warn!(session = %session, kind = %kind, error = %e, "malformed message payload -- ignored");
                        }
                    }
                }
            }
        }
        self.forget_dead(world);
        Ok(report)
    }

    /// Empty the queue for room shutdown.
    ///
    /// Pending leaves are carried out, pending joins are discarded (their
    /// reserved ids are never reused), and pending messages are dropped.
    /// Every binding is removed.
    pub fn shutdown(&mut self, world: &mut World) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        for event in self.pending.drain(..) {
            match event {
                SessionEvent::Join { entity, .. } => {
                    world.release_reservation(entity);
                    report.discarded_joins += 1;
                }
                SessionEvent::Leave { entity, .. } => {
                    if world.is_alive(entity) && world.destroy(entity).is_ok() {
                        report.flushed_leaves += 1;
                    } else {
                        world.release_reservation(entity);
                    }
                }
                SessionEvent::Message { .. } => report.dropped_messages += 1,
            }
        }
        self.by_session.clear();
        self.by_entity.clear();
        report
    }

    fn unbind_entity(&mut self, entity: EntityId) {
        if let Some(session) = self.by_entity.remove(&entity) {
            self.by_session.remove(&session);
        }
    }

    fn forget_dead(&mut self, world: &World) {
        let dead: Vec<EntityId> = self
            .by_entity
            .keys()
            .copied()
            .filter(|e| !world.is_alive(*e) && !world.entities().is_reserved(*e))
            .collect();
        for entity in dead {
            if let Some(session) = self.by_entity.remove(&entity) {
                info!(session = %session, entity = %entity, "entity destroyed -- session unbound");
                self.by_session.remove(&session);
            }
        }
    }

    /// The entity bound to `session`, if any.
    pub fn entity_of(&self, session: &SessionId) -> Option<EntityId> {
        self.by_session.get(session).copied()
    }

    /// The session bound to `entity`, if any.
    pub fn session_of(&self, entity: EntityId) -> Option<&SessionId> {
        self.by_entity.get(&entity)
    }

    /// Number of bound sessions.
    pub fn session_count(&self) -> usize {
        self.by_session.len()
    }

    /// Number of events waiting for the next drain.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn handlers(&self) -> &MessageHandlers {
        &self.handlers
    }

    pub fn handlers_mut(&mut self) -> &mut MessageHandlers {
        &mut self.handlers
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
