//! Command buffer for deferred structural changes.
//!
//! Systems read a fixed entity snapshot for the whole tick, so they may not
//! create or destroy entities, or attach and detach components, while the
//! tick runs. They queue those changes in a [`CommandBuffer`] instead. The
//! buffer is applied in FIFO order at the next tick boundary, before any
//! queued session events.
//!
//! Each command records which system issued it, so a failed application can
//! be traced back in the logs.
//!
//! # Example
//!
//! ```
//! use ripple_ecs::prelude::*;
//!
//! let mut world = World::new();
//! let entity = world.create().unwrap();
//!
//! let mut cmds = CommandBuffer::new();
//! cmds.set_issuer("reaper");
//! cmds.destroy(entity);
//! assert!(world.is_alive(entity));
//!
//! let report = cmds.apply(&mut world);
//! assert_eq!(report.success_count, 1);
//! assert!(!world.is_alive(entity));
//! ```

use tracing::warn;

use crate::component::ComponentTypeId;
use crate::entity::EntityId;
use crate::world::{ComponentBundle, World};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// The mutation a command performs.
#[derive(Debug)]
pub enum CommandKind {
    /// Destroy the target entity.
    Destroy,
    /// Attach every component in the bundle to the target.
    Insert { bundle: ComponentBundle },
    /// Detach one component type from the target.
    Remove { component: ComponentTypeId },
}

/// A single deferred mutation.
#[derive(Debug)]
pub struct Command {
    pub target: EntityId,
    pub kind: CommandKind,
    /// Name of the system that queued it, if any.
    pub issued_by: Option<String>,
    /// Position within the buffer (set on insertion).
    pub command_index: u32,
}

// ---------------------------------------------------------------------------
// ApplyReport
// ---------------------------------------------------------------------------

/// Summary of one [`CommandBuffer::apply`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub success_count: usize,
    /// Commands skipped because the target was gone or the change was
    /// invalid. Each one is logged at `warn`.
    pub failed_count: usize,
}

// ---------------------------------------------------------------------------
// CommandBuffer
// ---------------------------------------------------------------------------

/// Collects commands during a tick and applies them in insertion order.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
    next_index: u32,
    issuer: Option<String>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute subsequently queued commands to `name`.
    pub fn set_issuer(&mut self, name: &str) {
        self.issuer = Some(name.to_owned());
    }

    /// Stop attributing commands to a system.
    pub fn clear_issuer(&mut self) {
        self.issuer = None;
    }

    fn push(&mut self, target: EntityId, kind: CommandKind) {
        let command_index = self.next_index;
        self.next_index += 1;
        self.commands.push(Command {
            target,
            kind,
            issued_by: self.issuer.clone(),
            command_index,
        });
    }

    /// Queue destruction of `target`.
    pub fn destroy(&mut self, target: EntityId) {
        self.push(target, CommandKind::Destroy);
    }

    /// Queue attaching `bundle` to `target`.
    pub fn insert(&mut self, target: EntityId, bundle: ComponentBundle) {
        self.push(target, CommandKind::Insert { bundle });
    }

    /// Queue detaching `component` from `target`.
    pub fn remove(&mut self, target: EntityId, component: ComponentTypeId) {
        self.push(target, CommandKind::Remove { component });
    }

    /// Queued commands in insertion order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Drop every queued command without applying it.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.next_index = 0;
    }

    /// Apply every queued command to `world` in insertion order, then clear
    /// the buffer.
    ///
    /// Commands whose target is no longer alive, or whose change is invalid,
    /// are logged and skipped. Later commands still run.
    pub fn apply(&mut self, world: &mut World) -> ApplyReport {
        let commands = std::mem::take(&mut self.commands);
        self.next_index = 0;

        let mut report = ApplyReport::default();
        for cmd in commands {
            let target = cmd.target;
            let index = cmd.command_index;
            let issued_by = cmd.issued_by;
            let result: Result<(), EcsError> = match cmd.kind {
                CommandKind::Destroy => world.destroy(target),
                CommandKind::Insert { bundle } => world.insert_bundle(target, bundle),
                CommandKind::Remove { component } => world.remove_by_id(target, component),
            };
            match result {
                Ok(()) => report.success_count += 1,
                Err(e) => {
                    report.failed_count += 1;
                    warn!(
                        command_index = index,
                        entity = %target,
                        issued_by = issued_by.as_deref().unwrap_or("-"),
                        error = %e,
                        "deferred command failed -- skipped"
                    );
                }
            }
        }
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
