//! Component types simulated by the shape room.

use ripple_ecs::component::{Component, FieldKind, FieldSchema};
use ripple_ecs::world::World;
use ripple_ecs::EcsError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Component for Position {
    const TAG: &'static str = "Position";
    const FIELDS: &'static [FieldSchema] = &[
        FieldSchema::new("x", FieldKind::Number),
        FieldSchema::new("y", FieldKind::Number),
    ];
}

/// Units per second on each axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub x: f64,
    pub y: f64,
}

impl Component for Velocity {
    const TAG: &'static str = "Velocity";
    const FIELDS: &'static [FieldSchema] = &[
        FieldSchema::new("x", FieldKind::Number),
        FieldSchema::new("y", FieldKind::Number),
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    Circle,
    Box,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub primitive: Primitive,
    /// `#rrggbb`.
    pub color: String,
    /// Published as given; never range-checked.
    pub radius: f64,
}

impl Component for Shape {
    const TAG: &'static str = "Shape";
    const FIELDS: &'static [FieldSchema] = &[
        FieldSchema::new("primitive", FieldKind::String),
        FieldSchema::new("color", FieldKind::String),
        FieldSchema::new("radius", FieldKind::Number),
    ];
}

/// Links an entity to the session that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkIdentity {
    pub session_id: String,
    pub network_id: i64,
}

impl Component for NetworkIdentity {
    const TAG: &'static str = "NetworkIdentity";
    const FIELDS: &'static [FieldSchema] = &[
        FieldSchema::new("sessionId", FieldKind::String),
        FieldSchema::new("networkId", FieldKind::Int64),
    ];
}

/// Marks an entity as drawable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Renderable;

impl Component for Renderable {
    const TAG: &'static str = "Renderable";
    const FIELDS: &'static [FieldSchema] = &[];
}

/// Register every room component on `world`, in publication order.
pub fn register_all(world: &mut World) -> Result<(), EcsError> {
    world.register_component::<NetworkIdentity>()?;
    world.register_component::<Velocity>()?;
    world.register_component::<Position>()?;
    world.register_component::<Shape>()?;
    world.register_component::<Renderable>()?;
    Ok(())
}
