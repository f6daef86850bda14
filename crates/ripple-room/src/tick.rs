//! The tick loop: the room's system scheduler.
//!
//! The [`TickLoop`] owns the [`World`] and drives it forward. Each tick:
//!
//! 1. Deferred commands queued by systems last tick are applied (FIFO).
//! 2. The session binder's pending joins, leaves and messages are applied in
//!    arrival order.
//! 3. Every system's query is snapshotted.
//! 4. Systems run once each, in registration order, against their snapshot.
//!    Component data is mutated in place and later systems see it.
//!
//! Steps 1-3 are [`TickLoop::begin_tick`], step 4 is
//! [`TickLoop::run_systems`]. [`TickLoop::run_tick`] does both. Between the
//! two the snapshots are fixed: a leave that arrives then only enqueues.
//!
//! A system that returns an error or panics is logged and skipped; the
//! remaining systems still run.
//!
//! # Example
//!
//! ```
//! use ripple_room::prelude::*;
//!
//! let mut world = World::new();
//! let position = world.register_component::<Position>().unwrap();
//! let mut tick_loop = TickLoop::new(world);
//! let query = tick_loop.world_mut().register_query(&[position]).unwrap();
//!
//! tick_loop.add_system("noop", query, |_ctx| Ok(()));
//!
//! let mut binder = SessionBinder::new(
//!     Box::new(RandomShapeFactory::new(&RoomConfig::default())),
//!     MessageHandlers::new(),
//! );
//! tick_loop.run_ticks(&mut binder, 10, 1.0 / 60.0).unwrap();
//! assert_eq!(tick_loop.tick_count(), 10);
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use ripple_ecs::command::{ApplyReport, CommandBuffer};
use ripple_ecs::component::Component;
use ripple_ecs::entity::EntityId;
use ripple_ecs::query::QueryId;
use ripple_ecs::world::{World, WorldConfig};
use ripple_ecs::EcsError;
use tracing::{debug, error, warn};

use crate::session::{DrainReport, SessionBinder};

// ---------------------------------------------------------------------------
// TickDiagnostics
// ---------------------------------------------------------------------------

/// Timing and outcome of the last tick.
#[derive(Debug, Clone, Default)]
pub struct TickDiagnostics {
    /// Wall-clock time per system, in execution order.
    pub system_times: Vec<(String, Duration)>,
    /// Names of systems that returned an error or panicked.
    pub failed_systems: Vec<String>,
    /// Time spent applying commands and session events.
    pub drain_time: Duration,
    /// Whole tick, drain included.
    pub total_time: Duration,
    pub commands: ApplyReport,
    pub drain: DrainReport,
}

// ---------------------------------------------------------------------------
// SystemContext
// ---------------------------------------------------------------------------

/// What a system sees while it runs.
///
/// Structural changes (destroy, attach, detach) go through
/// [`commands`](Self::commands) and take effect at the next tick.
pub struct SystemContext<'a> {
    world: &'a mut World,
    commands: &'a mut CommandBuffer,
    entities: &'a [EntityId],
    dt: f64,
    tick: u64,
}

impl<'a> SystemContext<'a> {
    /// The system's query matches as of tick start, in ascending id order.
    pub fn entities(&self) -> &'a [EntityId] {
        self.entities
    }

    /// Seconds since the previous tick.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Number of the tick being run, starting at 1.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn config(&self) -> &WorldConfig {
        self.world.config()
    }

    pub fn world(&self) -> &World {
        self.world
    }

    pub fn get<T: Component>(&self, entity: EntityId) -> Option<&T> {
        self.world.get::<T>(entity)
    }

    pub fn get_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.world.get_mut::<T>(entity)
    }

    /// Queue for deferred structural changes.
    pub fn commands(&mut self) -> &mut CommandBuffer {
        self.commands
    }
}

/// A system function. Runs once per tick.
pub type SystemFn = fn(&mut SystemContext<'_>) -> anyhow::Result<()>;

#[derive(Debug)]
struct RegisteredSystem {
    name: String,
    query: QueryId,
    func: SystemFn,
}

// ---------------------------------------------------------------------------
// TickLoop
// ---------------------------------------------------------------------------

/// Runs registered systems over the world, one tick at a time.
pub struct TickLoop {
    world: World,
    /// Commands queued by systems, applied at the next tick start.
    commands: CommandBuffer,
    /// In registration order.
    systems: Vec<RegisteredSystem>,
    /// Per-system query matches for the current tick, aligned with `systems`.
    snapshots: Vec<Vec<EntityId>>,
    /// Set by `begin_tick`, consumed by `run_systems`.
    pending: Option<TickStart>,
    tick_counter: u64,
    last_diagnostics: TickDiagnostics,
}

#[derive(Debug)]
struct TickStart {
    started: Instant,
    drain_time: Duration,
    commands: ApplyReport,
    drain: DrainReport,
}

impl std::fmt::Debug for TickLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickLoop")
            .field("tick_counter", &self.tick_counter)
            .field("systems", &self.system_names())
            .field("entities", &self.world.entity_count())
            .finish()
    }
}

impl TickLoop {
    /// Create a tick loop over `world`. The tick counter starts at 0.
    pub fn new(world: World) -> Self {
        Self {
            world,
            commands: CommandBuffer::new(),
            systems: Vec::new(),
            snapshots: Vec::new(),
            pending: None,
            tick_counter: 0,
            last_diagnostics: TickDiagnostics::default(),
        }
    }

    /// Register a system to run each tick over `query`'s matches.
    ///
    /// Systems run in registration order.
    ///
    /// # Panics
    ///
    /// - If a system with the same name is already registered.
    /// - If `query` was not registered on this loop's world.
    pub fn add_system(&mut self, name: &str, query: QueryId, func: SystemFn) {
        assert!(
            !self.systems.iter().any(|s| s.name == name),
            "duplicate system name: {name:?}"
        );
        assert!(
            self.world.queries().query(query).is_some(),
            "system {name:?} uses unregistered query {query:?}"
        );
        self.systems.push(RegisteredSystem {
            name: name.to_owned(),
            query,
            func,
        });
    }

    /// Apply deferred commands and session events, then snapshot every
    /// system's query.
    ///
    /// # Errors
    ///
    /// Returns the fatal error of a join that breached id uniqueness. Nothing
    /// else fails here; rejected events and commands are logged.
    pub fn begin_tick(&mut self, binder: &mut SessionBinder) -> Result<&DrainReport, EcsError> {
        let started = Instant::now();
        let commands = self.commands.apply(&mut self.world);
        let drain = binder.drain(&mut self.world)?;
        self.take_snapshots();
        let start = self.pending.insert(TickStart {
            started,
            drain_time: started.elapsed(),
            commands,
            drain,
        });
        Ok(&start.drain)
    }

    fn take_snapshots(&mut self) {
        self.snapshots = self
            .systems
            .iter()
            .map(|s| self.world.queries().snapshot(s.query))
            .collect();
    }

    /// Run every system once against the snapshots from
    /// [`begin_tick`](Self::begin_tick), then advance the tick counter.
    ///
    /// If `begin_tick` was not called, snapshots are taken now and no events
    /// are applied. A negative or non-finite `dt` is treated as zero.
    pub fn run_systems(&mut self, dt: f64) -> &TickDiagnostics {
        let start = match self.pending.take() {
            Some(start) => start,
            None => {
                self.take_snapshots();
                TickStart {
                    started: Instant::now(),
                    drain_time: Duration::ZERO,
                    commands: ApplyReport::default(),
                    drain: DrainReport::default(),
                }
            }
        };
        let dt = if dt.is_finite() && dt >= 0.0 {
            dt
        } else {
            warn!(dt, "invalid delta time -- using 0");
            0.0
        };
        let tick = self.tick_counter + 1;

        let mut system_times = Vec::with_capacity(self.systems.len());
        let mut failed_systems = Vec::new();
        for (system, entities) in self.systems.iter().zip(&self.snapshots) {
            self.commands.set_issuer(&system.name);
            let mut ctx = SystemContext {
                world: &mut self.world,
                commands: &mut self.commands,
                entities,
                dt,
                tick,
            };
            let sys_start = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (system.func)(&mut ctx)));
            system_times.push((system.name.clone(), sys_start.elapsed()));

            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{e:#}")),
                Err(payload) => Some(format!("panicked: {}", panic_message(payload.as_ref()))),
            };
            if let Some(reason) = failure {
                error!(system = %system.name, tick, error = %reason, "system failed -- skipped for this tick");
                failed_systems.push(system.name.clone());
            }
        }
        self.commands.clear_issuer();
        self.tick_counter = tick;

        self.last_diagnostics = TickDiagnostics {
            system_times,
            failed_systems,
            drain_time: start.drain_time,
            total_time: start.started.elapsed(),
            commands: start.commands,
            drain: start.drain,
        };
        debug!(
            tick,
            entities = self.world.entity_count(),
            failed = self.last_diagnostics.failed_systems.len(),
            total_us = self.last_diagnostics.total_time.as_micros() as u64,
            "tick complete"
        );
        &self.last_diagnostics
    }

    /// One full tick: [`begin_tick`](Self::begin_tick) then
    /// [`run_systems`](Self::run_systems).
    pub fn run_tick(&mut self, binder: &mut SessionBinder, dt: f64) -> Result<&TickDiagnostics, EcsError> {
        self.begin_tick(binder)?;
        Ok(self.run_systems(dt))
    }

    /// Run `count` ticks with a fixed `dt`. Returns the tick count reached.
    pub fn run_ticks(&mut self, binder: &mut SessionBinder, count: u64, dt: f64) -> Result<u64, EcsError> {
        for _ in 0..count {
            self.run_tick(binder, dt)?;
        }
        Ok(self.tick_counter)
    }

    /// Apply whatever systems queued, then discard the tick snapshots.
    /// Used at shutdown.
    pub fn flush_commands(&mut self) -> ApplyReport {
        self.pending = None;
        self.snapshots.clear();
        self.commands.apply(&mut self.world)
    }

    // -- accessors ----------------------------------------------------------

    /// Number of completed ticks.
    pub fn tick_count(&self) -> u64 {
        self.tick_counter
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable access to the world, for setup and tests.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// Names of all systems, in execution order.
    pub fn system_names(&self) -> Vec<&str> {
        self.systems.iter().map(|s| s.name.as_str()).collect()
    }

    /// Snapshot a system is working from this tick.
    pub fn snapshot_of(&self, system: &str) -> Option<&[EntityId]> {
        let idx = self.systems.iter().position(|s| s.name == system)?;
        self.snapshots.get(idx).map(Vec::as_slice)
    }

    /// Commands waiting for the next tick.
    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    pub fn last_diagnostics(&self) -> &TickDiagnostics {
        &self.last_diagnostics
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{register_all, Position, Velocity};
    use crate::config::RoomConfig;
    use crate::messages::MessageHandlers;
    use crate::session::RandomShapeFactory;
    use ripple_ecs::world::ComponentBundle;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn setup() -> (TickLoop, SessionBinder, QueryId) {
        let mut world = World::new();
        register_all(&mut world).unwrap();
        let position = world.component_id::<Position>().unwrap();
        let query = world.register_query(&[position]).unwrap();
        let binder = SessionBinder::new(
            Box::new(RandomShapeFactory::new(&RoomConfig {
                seed: Some(1),
                ..RoomConfig::default()
            })),
            MessageHandlers::with_builtins(),
        );
        (TickLoop::new(world), binder, query)
    }

    fn spawn_at(tick_loop: &mut TickLoop, x: f64) -> EntityId {
        let world = tick_loop.world_mut();
        let mut bundle = ComponentBundle::new();
        bundle.add(world.registry(), Position { x, y: 0.0 }).unwrap();
        bundle.add(world.registry(), Velocity { x: 1.0, y: 0.0 }).unwrap();
        world.spawn(bundle).unwrap()
    }

    // -- registration -------------------------------------------------------

    #[test]
    fn new_tick_loop_starts_at_zero() {
        let (tick_loop, _, _) = setup();
        assert_eq!(tick_loop.tick_count(), 0);
        assert_eq!(tick_loop.system_count(), 0);
    }

    #[test]
    fn add_systems_in_order() {
        let (mut tick_loop, _, q) = setup();
        tick_loop.add_system("alpha", q, |_| Ok(()));
        tick_loop.add_system("beta", q, |_| Ok(()));
        tick_loop.add_system("gamma", q, |_| Ok(()));
        assert_eq!(tick_loop.system_names(), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    #[should_panic(expected = "duplicate system name")]
    fn duplicate_system_name_panics() {
        let (mut tick_loop, _, q) = setup();
        tick_loop.add_system("movement", q, |_| Ok(()));
        tick_loop.add_system("movement", q, |_| Ok(()));
    }

    // -- execution order ----------------------------------------------------

    static ORDER_COUNTER: AtomicU64 = AtomicU64::new(0);
    static SYSTEM_A_ORDER: AtomicU64 = AtomicU64::new(u64::MAX);
    static SYSTEM_B_ORDER: AtomicU64 = AtomicU64::new(u64::MAX);

    fn system_a(_ctx: &mut SystemContext<'_>) -> anyhow::Result<()> {
        SYSTEM_A_ORDER.store(ORDER_COUNTER.fetch_add(1, Ordering::SeqCst), Ordering::SeqCst);
        Ok(())
    }

    fn system_b(_ctx: &mut SystemContext<'_>) -> anyhow::Result<()> {
        SYSTEM_B_ORDER.store(ORDER_COUNTER.fetch_add(1, Ordering::SeqCst), Ordering::SeqCst);
        Ok(())
    }

    #[test]
    fn systems_execute_in_registration_order() {
        let (mut tick_loop, mut binder, q) = setup();
        tick_loop.add_system("A", q, system_a);
        tick_loop.add_system("B", q, system_b);
        tick_loop.run_tick(&mut binder, 0.0).unwrap();

        let a = SYSTEM_A_ORDER.load(Ordering::SeqCst);
        let b = SYSTEM_B_ORDER.load(Ordering::SeqCst);
        assert!(a < b, "system A ({a}) should run before system B ({b})");
    }

    // -- in-place mutation is visible to later systems ----------------------

    fn double_x(ctx: &mut SystemContext<'_>) -> anyhow::Result<()> {
        for &e in ctx.entities() {
            if let Some(p) = ctx.get_mut::<Position>(e) {
                p.x *= 2.0;
            }
        }
        Ok(())
    }

    fn add_one(ctx: &mut SystemContext<'_>) -> anyhow::Result<()> {
        for &e in ctx.entities() {
            if let Some(p) = ctx.get_mut::<Position>(e) {
                p.x += 1.0;
            }
        }
        Ok(())
    }

    #[test]
    fn later_systems_see_earlier_mutations() {
        let (mut tick_loop, mut binder, q) = setup();
        let e = spawn_at(&mut tick_loop, 3.0);
        tick_loop.add_system("double", q, double_x);
        tick_loop.add_system("add", q, add_one);
        tick_loop.run_tick(&mut binder, 0.0).unwrap();
        assert_eq!(tick_loop.world().get::<Position>(e).unwrap().x, 7.0);
    }

    // -- failure isolation --------------------------------------------------

    fn failing(_ctx: &mut SystemContext<'_>) -> anyhow::Result<()> {
        anyhow::bail!("boom")
    }

    fn panicking(_ctx: &mut SystemContext<'_>) -> anyhow::Result<()> {
        panic!("kaboom")
    }

    #[test]
    fn failing_systems_do_not_stop_the_tick() {
        let (mut tick_loop, mut binder, q) = setup();
        let e = spawn_at(&mut tick_loop, 1.0);
        tick_loop.add_system("fails", q, failing);
        tick_loop.add_system("panics", q, panicking);
        tick_loop.add_system("add", q, add_one);

        let diag = tick_loop.run_tick(&mut binder, 0.0).unwrap();
        assert_eq!(diag.failed_systems, vec!["fails".to_owned(), "panics".to_owned()]);
        assert_eq!(diag.system_times.len(), 3);
        assert_eq!(tick_loop.world().get::<Position>(e).unwrap().x, 2.0);
        assert_eq!(tick_loop.tick_count(), 1);
    }

    // -- deferred commands --------------------------------------------------

    fn reaper(ctx: &mut SystemContext<'_>) -> anyhow::Result<()> {
        for &e in ctx.entities() {
            let x = ctx.get::<Position>(e).map_or(0.0, |p| p.x);
            if x > 100.0 {
                ctx.commands().destroy(e);
            }
        }
        Ok(())
    }

    #[test]
    fn system_commands_apply_at_next_tick() {
        let (mut tick_loop, mut binder, q) = setup();
        let doomed = spawn_at(&mut tick_loop, 500.0);
        let alive = spawn_at(&mut tick_loop, 5.0);
        tick_loop.add_system("reaper", q, reaper);

        tick_loop.run_tick(&mut binder, 0.0).unwrap();
        assert!(tick_loop.world().is_alive(doomed));
        assert_eq!(tick_loop.pending_commands(), 1);

        let diag = tick_loop.run_tick(&mut binder, 0.0).unwrap();
        assert_eq!(diag.commands.success_count, 1);
        assert!(!tick_loop.world().is_alive(doomed));
        assert!(tick_loop.world().is_alive(alive));
    }

    // -- snapshots ----------------------------------------------------------

    #[test]
    fn snapshot_is_fixed_for_the_tick() {
        let (mut tick_loop, mut binder, q) = setup();
        tick_loop.add_system("noop", q, |_| Ok(()));
        let e = spawn_at(&mut tick_loop, 0.0);

        tick_loop.begin_tick(&mut binder).unwrap();
        assert_eq!(tick_loop.snapshot_of("noop"), Some(&[e][..]));
        tick_loop.run_systems(0.0);
        assert_eq!(tick_loop.tick_count(), 1);
    }

    #[test]
    fn run_systems_without_begin_tick_still_snapshots() {
        let (mut tick_loop, _, q) = setup();
        tick_loop.add_system("add", q, add_one);
        let e = spawn_at(&mut tick_loop, 0.0);
        tick_loop.run_systems(0.0);
        assert_eq!(tick_loop.world().get::<Position>(e).unwrap().x, 1.0);
    }

    #[test]
    fn diagnostics_report_timing() {
        let (mut tick_loop, mut binder, q) = setup();
        tick_loop.add_system("noop", q, |_| Ok(()));
        let diag = tick_loop.run_tick(&mut binder, 0.016).unwrap();
        assert_eq!(diag.system_times[0].0, "noop");
        assert!(diag.total_time >= diag.drain_time);
        assert!(diag.failed_systems.is_empty());
    }

    #[test]
    fn run_ticks_counts() {
        let (mut tick_loop, mut binder, _) = setup();
        assert_eq!(tick_loop.run_ticks(&mut binder, 5, 0.01).unwrap(), 5);
    }
}
