//! Entity identifiers and the entity registry.
//!
//! An [`EntityId`] is a plain 64-bit counter value. Ids are issued in strictly
//! increasing order and are never recycled, so a stale id held by a session,
//! a patch consumer or a queued command can never alias a newer entity.
//!
//! Ids go through two states before they die:
//!
//! - **reserved**: issued by [`EntityRegistry::reserve`] but not yet alive.
//!   Joins reserve an id immediately and become alive at the next tick
//!   boundary.
//! - **alive**: made live by [`EntityRegistry::activate`] (or directly by
//!   [`EntityRegistry::create`]).
//!
//! Destruction goes through [`World::destroy`](crate::world::World::destroy)
//! so component data and query membership are purged in the same call.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::EcsError;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A monotonically assigned entity identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Reconstruct from a raw `u64`.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// Liveness view of an issued entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entity {
    pub id: EntityId,
    pub alive: bool,
}

// ---------------------------------------------------------------------------
// EntityRegistry
// ---------------------------------------------------------------------------

/// Issues entity ids and tracks which of them are alive.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    /// Next id to hand out. Never decreases.
    next_id: u64,
    /// Alive ids, ordered so iteration follows creation order.
    alive: BTreeSet<EntityId>,
    /// Issued but not yet alive.
    reserved: HashSet<EntityId>,
}

impl EntityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next unused id without making it alive.
    pub fn reserve(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        self.reserved.insert(id);
        id
    }

    /// Make a reserved id alive.
    ///
    /// # Errors
    ///
    /// - [`EcsError::IdCollision`] if the id is already alive. This is an
    ///   invariant breach and is fatal for the owning room.
    /// - [`EcsError::NotFound`] if the id was never reserved, or the
    ///   reservation was released.
    pub fn activate(&mut self, id: EntityId) -> Result<(), EcsError> {
        if self.alive.contains(&id) {
            return Err(EcsError::IdCollision { entity: id });
        }
        if !self.reserved.remove(&id) {
            return Err(EcsError::NotFound { entity: id });
        }
        self.alive.insert(id);
        Ok(())
    }

    /// Issue a fresh id and make it alive immediately.
    pub fn create(&mut self) -> Result<EntityId, EcsError> {
        let id = self.reserve();
        self.activate(id)?;
        Ok(id)
    }

    /// Drop a reservation that will never be activated. The id stays retired.
    ///
    /// Returns `false` if `id` was not reserved.
    pub fn release(&mut self, id: EntityId) -> bool {
        self.reserved.remove(&id)
    }

    /// Mark an alive id as dead.
    ///
    /// Only [`World`](crate::world::World) calls this, right before purging
    /// the entity's component records and query membership.
    pub(crate) fn destroy(&mut self, id: EntityId) -> Result<(), EcsError> {
        if self.alive.remove(&id) {
            Ok(())
        } else {
            Err(EcsError::NotFound { entity: id })
        }
    }

    /// Returns `true` if `id` is currently alive.
    pub fn is_alive(&self, id: EntityId) -> bool {
        self.alive.contains(&id)
    }

    /// Returns `true` if `id` is reserved and waiting for activation.
    pub fn is_reserved(&self, id: EntityId) -> bool {
        self.reserved.contains(&id)
    }

    /// Liveness view of any id this registry has issued.
    pub fn entity(&self, id: EntityId) -> Option<Entity> {
        (id.0 < self.next_id).then(|| Entity {
            id,
            alive: self.alive.contains(&id),
        })
    }

    /// Number of alive entities.
    pub fn alive_count(&self) -> usize {
        self.alive.len()
    }

    /// Number of ids issued so far (alive, reserved, or dead).
    pub fn issued_count(&self) -> u64 {
        self.next_id
    }

    /// Alive ids in ascending order.
    pub fn iter_alive(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.alive.iter().copied()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
