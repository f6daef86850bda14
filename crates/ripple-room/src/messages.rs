//! Client message handlers, keyed by message kind.
//!
//! Handlers run at the tick boundary, in arrival order with joins and
//! leaves, and may only touch the issuing session's own entity through the
//! [`MessageContext`].

use std::collections::HashMap;

use ripple_ecs::component::Component;
use ripple_ecs::entity::EntityId;
use ripple_ecs::world::World;

use crate::components::Shape;
use crate::error::MessageError;
use crate::session::SessionId;

/// Message kind that sets the sender's shape radius.
pub const SELF_RADIUS: &str = "self-radius";

// ---------------------------------------------------------------------------
// MessageContext
// ---------------------------------------------------------------------------

/// What a handler may see and change.
pub struct MessageContext<'a> {
    world: &'a mut World,
    session: &'a SessionId,
    entity: EntityId,
    kind: &'a str,
}

impl<'a> MessageContext<'a> {
    pub(crate) fn new(
        world: &'a mut World,
        session: &'a SessionId,
        entity: EntityId,
        kind: &'a str,
    ) -> Self {
        Self {
            world,
            session,
            entity,
            kind,
        }
    }

    pub fn session(&self) -> &SessionId {
        self.session
    }

    /// The sender's entity.
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn kind(&self) -> &str {
        self.kind
    }

    /// A component of the sender's entity.
    pub fn get<T: Component>(&self) -> Option<&T> {
        self.world.get::<T>(self.entity)
    }

    pub fn get_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.world.get_mut::<T>(self.entity)
    }
}

// ---------------------------------------------------------------------------
// MessageHandlers
// ---------------------------------------------------------------------------

/// A message handler. Errors are logged and the message is dropped.
pub type MessageHandlerFn = fn(&mut MessageContext<'_>, &serde_json::Value) -> Result<(), MessageError>;

/// Dispatch table from message kind to handler.
#[derive(Default)]
pub struct MessageHandlers {
    handlers: HashMap<String, MessageHandlerFn>,
}

impl std::fmt::Debug for MessageHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("MessageHandlers").field("kinds", &kinds).finish()
    }
}

impl MessageHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table with the built-in handlers registered.
    pub fn with_builtins() -> Self {
        let mut handlers = Self::new();
        handlers.register(SELF_RADIUS, self_radius);
        handlers
    }

    /// Register a handler for `kind`.
    ///
    /// # Panics
    ///
    /// Panics if `kind` already has a handler.
    pub fn register(&mut self, kind: &str, handler: MessageHandlerFn) {
        assert!(
            !self.handlers.contains_key(kind),
            "duplicate message handler: {kind:?}"
        );
        self.handlers.insert(kind.to_owned(), handler);
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Run the handler for `kind` against the sender's entity.
    ///
    /// Returns `Ok(false)` if no handler is registered for `kind`.
    pub fn dispatch(
        &self,
        world: &mut World,
        session: &SessionId,
        entity: EntityId,
        kind: &str,
        payload: &serde_json::Value,
    ) -> Result<bool, MessageError> {
        let Some(handler) = self.handlers.get(kind) else {
            return Ok(false);
        };
        let mut ctx = MessageContext::new(world, session, entity, kind);
        handler(&mut ctx, payload)?;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Built-in handlers
// ---------------------------------------------------------------------------

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// `{ "radius": number }`: set the sender's shape radius.
///
/// The value is taken as given, without range checks. Entities without a
/// [`Shape`] are left alone.
pub fn self_radius(ctx: &mut MessageContext<'_>, payload: &serde_json::Value) -> Result<(), MessageError> {
    let raw = payload.get("radius").ok_or_else(|| MessageError::MissingField {
        kind: ctx.kind().to_owned(),
        field: "radius".to_owned(),
    })?;
    let radius = raw.as_f64().ok_or_else(|| MessageError::WrongType {
        kind: ctx.kind().to_owned(),
        field: "radius".to_owned(),
        expected: "number",
        found: json_type_name(raw).to_owned(),
    })?;

    let entity = ctx.entity();
    if let Some(shape) = ctx.get_mut::<Shape>() {
        shape.radius = radius;
        tracing::debug!(entity = %entity, radius, "shape radius updated");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
