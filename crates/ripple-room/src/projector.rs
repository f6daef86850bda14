//! State projector: turns the world into the state clients see.
//!
//! After every tick the projector reduces each alive entity to its
//! components' schema fields ([`SyncState`]) and diffs that against the
//! previous publication. The result is a [`StatePatch`] with field-level
//! granularity: unchanged entities, components and fields produce nothing.
//!
//! Late joiners take [`StateProjector::full_state`] and apply patches from
//! there.

use std::collections::BTreeMap;

use ripple_ecs::component::FieldValue;
use ripple_ecs::entity::EntityId;
use ripple_ecs::world::{ProjectedComponent, World};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Published state
// ---------------------------------------------------------------------------

/// One component as clients see it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentState {
    pub tag: &'static str,
    /// `(field name, value)` in schema order.
    pub fields: Vec<(&'static str, FieldValue)>,
}

impl From<ProjectedComponent> for ComponentState {
    fn from(c: ProjectedComponent) -> Self {
        Self {
            tag: c.tag,
            fields: c.fields,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    pub id: EntityId,
    /// In component registration order.
    pub components: Vec<ComponentState>,
}

impl EntityState {
    pub fn component(&self, tag: &str) -> Option<&ComponentState> {
        self.components.iter().find(|c| c.tag == tag)
    }
}

/// The full synchronized state after a tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncState {
    pub tick: u64,
    /// Alive entities in ascending id order.
    pub entities: Vec<EntityState>,
}

impl SyncState {
    pub fn entity(&self, id: EntityId) -> Option<&EntityState> {
        self.entities
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|idx| &self.entities[idx])
    }

    /// BLAKE3 hash of the entity data, as lowercase hex. The tick number is
    /// not included, so identical worlds hash equal at any tick.
    pub fn hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for entity in &self.entities {
            hasher.update(&entity.id.to_raw().to_le_bytes());
            hasher.update(&(entity.components.len() as u64).to_le_bytes());
            for component in &entity.components {
                hash_str(&mut hasher, component.tag);
                hasher.update(&(component.fields.len() as u64).to_le_bytes());
                for (name, value) in &component.fields {
                    hash_str(&mut hasher, name);
                    hash_value(&mut hasher, value);
                }
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_value(hasher: &mut blake3::Hasher, value: &FieldValue) {
    match value {
        FieldValue::String(s) => {
            hasher.update(&[0]);
            hash_str(hasher, s);
        }
        FieldValue::Number(n) => {
            hasher.update(&[1]);
            hasher.update(&n.to_bits().to_le_bytes());
        }
        FieldValue::Int64(i) => {
            hasher.update(&[2]);
            hasher.update(&i.to_le_bytes());
        }
        FieldValue::Boolean(b) => {
            hasher.update(&[3, u8::from(*b)]);
        }
    }
}

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

/// One difference between two publications.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateChange {
    EntityAdded {
        entity: EntityId,
        components: Vec<ComponentState>,
    },
    EntityRemoved {
        entity: EntityId,
    },
    ComponentAdded {
        entity: EntityId,
        component: ComponentState,
    },
    ComponentRemoved {
        entity: EntityId,
        tag: &'static str,
    },
    FieldChanged {
        entity: EntityId,
        tag: &'static str,
        field: &'static str,
        value: FieldValue,
    },
}

/// Everything that changed in one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatePatch {
    pub tick: u64,
    /// Ascending by entity id.
    pub changes: Vec<StateChange>,
    /// [`SyncState::hash`] of the state after applying this patch.
    pub hash: String,
}

impl StatePatch {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// StateProjector
// ---------------------------------------------------------------------------

/// Keeps the last publication and produces patches against it.
#[derive(Debug, Default)]
pub struct StateProjector {
    state: SyncState,
}

impl StateProjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Project every alive entity of `world`.
    pub fn project(world: &World) -> Vec<EntityState> {
        world
            .alive_entities()
            .filter_map(|id| {
                let components = world.project_entity(id).ok()?;
                Some(EntityState {
                    id,
                    components: components.into_iter().map(ComponentState::from).collect(),
                })
            })
            .collect()
    }

    /// Publish `world` as the state after `tick`, returning what changed.
    pub fn publish(&mut self, world: &World, tick: u64) -> StatePatch {
        let next = SyncState {
            tick,
            entities: Self::project(world),
        };
        let changes = diff(&self.state.entities, &next.entities);
        self.state = next;
        let patch = StatePatch {
            tick,
            changes,
            hash: self.state.hash(),
        };
        tracing::debug!(
            tick,
            entities = self.state.entities.len(),
            changes = patch.changes.len(),
            "state published"
        );
        patch
    }

    /// The last published state.
    pub fn full_state(&self) -> &SyncState {
        &self.state
    }

    pub fn state_hash(&self) -> String {
        self.state.hash()
    }
}

/// Field-level difference between two ordered entity lists.
pub fn diff(prev: &[EntityState], next: &[EntityState]) -> Vec<StateChange> {
    let before: BTreeMap<EntityId, &EntityState> = prev.iter().map(|e| (e.id, e)).collect();
    let after: BTreeMap<EntityId, &EntityState> = next.iter().map(|e| (e.id, e)).collect();

    let mut ids: Vec<EntityId> = before.keys().chain(after.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();

    let mut changes = Vec::new();
    for id in ids {
        match (before.get(&id), after.get(&id)) {
            (None, Some(new)) => changes.push(StateChange::EntityAdded {
                entity: id,
                components: new.components.clone(),
            }),
            (Some(_), None) => changes.push(StateChange::EntityRemoved { entity: id }),
            (Some(old), Some(new)) => diff_entity(id, old, new, &mut changes),
            (None, None) => {}
        }
    }
    changes
}

fn diff_entity(id: EntityId, old: &EntityState, new: &EntityState, out: &mut Vec<StateChange>) {
    for component in &new.components {
        let Some(previous) = old.component(component.tag) else {
            out.push(StateChange::ComponentAdded {
                entity: id,
                component: component.clone(),
            });
            continue;
        };
        for (name, value) in &component.fields {
            let unchanged = previous
                .fields
                .iter()
                .any(|(n, v)| n == name && v == value);
            if !unchanged {
                out.push(StateChange::FieldChanged {
                    entity: id,
                    tag: component.tag,
                    field: *name,
                    value: value.clone(),
                });
            }
        }
    }
    for component in &old.components {
        if new.component(component.tag).is_none() {
            out.push(StateChange::ComponentRemoved {
                entity: id,
                tag: component.tag,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
