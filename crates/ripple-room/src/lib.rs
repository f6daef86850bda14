//! Ripple Room -- networked shape simulation on top of [`ripple_ecs`].
//!
//! A [`Room`](room::Room) owns one world and drives it at a fixed tick rate.
//! Client sessions are bound to entities by the
//! [`SessionBinder`](session::SessionBinder), systems run in a deterministic
//! order under the [`TickLoop`](tick::TickLoop), and after each tick the
//! [`StateProjector`](projector::StateProjector) publishes a field-level
//! patch of what clients can see. [`spawn_room`](driver::spawn_room) runs a
//! room as a tokio task.
//!
//! # Quick Start
//!
//! ```
//! use ripple_room::prelude::*;
//!
//! let mut room = Room::on_create(&serde_json::json!({ "seed": 7 })).unwrap();
//! let player = room.on_join("player-1".into(), &JoinOptions::default()).unwrap();
//!
//! let patch = room.update(1.0 / 60.0).unwrap();
//! assert_eq!(patch.changes.len(), 1);
//! assert!(room.state().entity(player).is_some());
//!
//! room.on_message(&"player-1".into(), SELF_RADIUS, serde_json::json!({ "radius": 40 }))
//!     .unwrap();
//! room.update(1.0 / 60.0).unwrap();
//! assert_eq!(room.world().get::<Shape>(player).unwrap().radius, 40.0);
//!
//! let last = room.shutdown().unwrap();
//! assert!(room.state().entities.is_empty());
//! assert!(!last.is_empty());
//! ```

#![deny(unsafe_code)]

pub mod components;
pub mod config;
pub mod driver;
pub mod error;
pub mod messages;
pub mod projector;
pub mod room;
pub mod session;
pub mod systems;
pub mod tick;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the ECS crate for convenience.
pub use ripple_ecs;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common room usage.
pub mod prelude {
    // Re-export everything from the ECS prelude.
    pub use ripple_ecs::prelude::*;

    // Shape room components.
    pub use crate::components::{
        register_all, NetworkIdentity, Position, Primitive, Renderable, Shape, Velocity,
    };

    pub use crate::config::{RoomConfig, TickConfig};
    pub use crate::driver::{spawn_room, RoomHandle};
    pub use crate::error::{MessageError, RoomError};
    pub use crate::messages::{MessageContext, MessageHandlerFn, MessageHandlers, SELF_RADIUS};
    pub use crate::projector::{
        ComponentState, EntityState, StateChange, StatePatch, StateProjector, SyncState,
    };
    pub use crate::room::Room;
    pub use crate::session::{
        DrainReport, EntityFactory, JoinOptions, RandomShapeFactory, SessionBinder, SessionId,
        ShutdownReport,
    };
    pub use crate::systems::install_movement;
    pub use crate::tick::{SystemContext, SystemFn, TickDiagnostics, TickLoop};
}
