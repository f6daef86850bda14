//! Error types for the room layer.

use ripple_ecs::entity::EntityId;
use ripple_ecs::EcsError;

use crate::session::SessionId;

/// Errors surfaced to the hosting layer by [`Room`](crate::room::Room) and
/// [`RoomHandle`](crate::driver::RoomHandle).
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The session has no entity bound to it.
    #[error("session '{session}' is not bound to an entity")]
    SessionNotBound { session: SessionId },

    /// The session already owns an entity.
    #[error("session '{session}' is already bound to entity {entity}")]
    SessionAlreadyBound { session: SessionId, entity: EntityId },

    /// Room creation options were malformed or out of range.
    #[error("invalid room options: {reason}")]
    InvalidOptions { reason: String },

    /// The room has been shut down (or aborted) and accepts no more work.
    #[error("room has been disposed")]
    Disposed,

    /// The driver task is gone.
    #[error("room driver is closed")]
    Closed,

    #[error(transparent)]
    Ecs(#[from] EcsError),
}

impl RoomError {
    /// Whether the room had to abort because of this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Ecs(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// Why a message handler rejected a payload.
///
/// Handler errors are logged and the message is dropped. The sending session
/// is never disconnected for it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MessageError {
    #[error("payload for '{kind}' is missing field '{field}'")]
    MissingField { kind: String, field: String },

    #[error("payload field '{field}' for '{kind}' must be {expected}, got {found}")]
    WrongType {
        kind: String,
        field: String,
        expected: &'static str,
        found: String,
    },
}
