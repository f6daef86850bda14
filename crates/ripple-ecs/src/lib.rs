//! Ripple ECS -- sparse entity component store with incrementally maintained
//! queries.
//!
//! Entities are plain monotonically assigned ids. Component values live in
//! one ordered column per registered type, and every registered query keeps
//! a cached match set that is updated on each structural change. A
//! [`CommandBuffer`](command::CommandBuffer) lets systems defer structural
//! changes to the next tick boundary.
//!
//! # Quick Start
//!
//! ```
//! use ripple_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize)]
//! struct Position { x: f64, y: f64 }
//!
//! impl Component for Position {
//!     const TAG: &'static str = "Position";
//!     const FIELDS: &'static [FieldSchema] = &[
//!         FieldSchema::new("x", FieldKind::Number),
//!         FieldSchema::new("y", FieldKind::Number),
//!     ];
//! }
//!
//! let mut world = World::new();
//! let position = world.register_component::<Position>().unwrap();
//! let moving = world.register_query(&[position]).unwrap();
//!
//! let entity = world.create().unwrap();
//! world.add(entity, Position { x: 0.0, y: 0.0 }).unwrap();
//!
//! assert_eq!(world.queries().snapshot(moving), vec![entity]);
//! assert_eq!(world.get::<Position>(entity), Some(&Position { x: 0.0, y: 0.0 }));
//! ```

#![deny(unsafe_code)]

pub mod command;
pub mod component;
pub mod entity;
pub mod query;
pub mod storage;
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EcsError {
    /// The entity is not alive (destroyed, never created, or only reserved).
    #[error("entity {entity} does not exist")]
    NotFound { entity: entity::EntityId },

    /// The entity is alive but carries no component of that type.
    #[error("entity {entity} has no '{component}' component")]
    ComponentNotFound {
        entity: entity::EntityId,
        component: String,
    },

    /// The entity (or bundle, when `entity` is `None`) already holds a
    /// component of that type.
    #[error("duplicate '{component}' component on {entity:?}")]
    DuplicateComponent {
        entity: Option<entity::EntityId>,
        component: String,
    },

    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },

    /// A component type was referenced that has not been registered.
    #[error("component type '{name}' not registered")]
    UnknownComponent { name: String },

    #[error("component tag '{tag}' is already registered by another type")]
    DuplicateComponentTag { tag: String },

    /// An id was activated while already alive. The id allocator is broken
    /// and the owning simulation must not continue.
    #[error("entity id {entity} collides with a live entity")]
    IdCollision { entity: entity::EntityId },

    /// A component's serialized form does not match its declared schema.
    #[error("component '{component}' field '{field}' is not a {expected:?}")]
    SchemaMismatch {
        component: String,
        field: String,
        expected: component::FieldKind,
    },
}

impl EcsError {
    /// Whether this error means the world can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::IdCollision { .. })
    }
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::command::{ApplyReport, Command, CommandBuffer, CommandKind};
    pub use crate::component::{
        Component, ComponentInfo, ComponentRegistry, ComponentTypeId, FieldKind, FieldSchema,
        FieldValue,
    };
    pub use crate::entity::{Entity, EntityId, EntityRegistry};
    pub use crate::query::{Query, QueryId, QueryIndex};
    pub use crate::storage::ComponentStore;
    pub use crate::world::{ComponentBundle, ProjectedComponent, World, WorldConfig};
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
