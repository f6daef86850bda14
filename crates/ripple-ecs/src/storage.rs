//! Component storage keyed by `(entity, component type)`.
//!
//! One [`Column`] per registered component type, each an ordered map from
//! [`EntityId`] to the typed value. Columns are stored type-erased behind
//! [`ErasedColumn`] so the store can purge, inspect and serialize an entity
//! without knowing its concrete component types; typed access downcasts the
//! column.
//!
//! The store does not know about liveness or queries. [`World`] checks the
//! registry before inserting and keeps the query index in step.
//!
//! [`World`]: crate::world::World

use std::any::Any;
use std::collections::BTreeMap;

use crate::component::{Component, ComponentTypeId};
use crate::entity::EntityId;

/// A boxed component value waiting to be moved into its column.
pub(crate) type BoxedComponent = Box<dyn Any + Send + Sync>;

// ---------------------------------------------------------------------------
// Columns
// ---------------------------------------------------------------------------

/// Type-erased operations over one component column.
trait ErasedColumn: Send + Sync {
    fn contains(&self, entity: EntityId) -> bool;
    fn remove_erased(&mut self, entity: EntityId) -> bool;
    /// Hands the value back if it is not this column's type.
    fn insert_boxed(&mut self, entity: EntityId, value: BoxedComponent)
        -> Result<(), BoxedComponent>;
    fn serialize(&self, entity: EntityId) -> Option<Result<serde_json::Value, serde_json::Error>>;
    fn entity_ids(&self) -> Vec<EntityId>;
    fn len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct Column<T> {
    values: BTreeMap<EntityId, T>,
}

impl<T: Component> ErasedColumn for Column<T> {
    fn contains(&self, entity: EntityId) -> bool {
        self.values.contains_key(&entity)
    }

    fn remove_erased(&mut self, entity: EntityId) -> bool {
        self.values.remove(&entity).is_some()
    }

    fn insert_boxed(
        &mut self,
        entity: EntityId,
        value: BoxedComponent,
    ) -> Result<(), BoxedComponent> {
        let value = value.downcast::<T>()?;
        self.values.insert(entity, *value);
        Ok(())
    }

    fn serialize(&self, entity: EntityId) -> Option<Result<serde_json::Value, serde_json::Error>> {
        self.values.get(&entity).map(serde_json::to_value)
    }

    fn entity_ids(&self) -> Vec<EntityId> {
        self.values.keys().copied().collect()
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// ComponentStore
// ---------------------------------------------------------------------------

/// Storage for every component record in a world.
#[derive(Default)]
pub struct ComponentStore {
    /// Indexed by `ComponentTypeId.0`.
    columns: Vec<Box<dyn ErasedColumn>>,
}

impl std::fmt::Debug for ComponentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentStore")
            .field("columns", &self.columns.len())
            .field("records", &self.record_count())
            .finish()
    }
}

impl ComponentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the column for a freshly registered type.
    pub(crate) fn add_column<T: Component>(&mut self, id: ComponentTypeId) {
        debug_assert_eq!(id.index(), self.columns.len(), "columns follow registration order");
        if id.index() == self.columns.len() {
            self.columns.push(Box::new(Column::<T> {
                values: BTreeMap::new(),
            }));
        }
    }

    fn column<T: Component>(&self, id: ComponentTypeId) -> Option<&Column<T>> {
        self.columns
            .get(id.index())
            .and_then(|c| c.as_any().downcast_ref::<Column<T>>())
    }

    fn column_mut<T: Component>(&mut self, id: ComponentTypeId) -> Option<&mut Column<T>> {
        self.columns
            .get_mut(id.index())
            .and_then(|c| c.as_any_mut().downcast_mut::<Column<T>>())
    }

    /// Whether `entity` carries a component of type `id`.
    pub fn contains(&self, id: ComponentTypeId, entity: EntityId) -> bool {
        self.columns
            .get(id.index())
            .is_some_and(|c| c.contains(entity))
    }

    pub fn get<T: Component>(&self, id: ComponentTypeId, entity: EntityId) -> Option<&T> {
        self.column::<T>(id)?.values.get(&entity)
    }

    pub fn get_mut<T: Component>(&mut self, id: ComponentTypeId, entity: EntityId) -> Option<&mut T> {
        self.column_mut::<T>(id)?.values.get_mut(&entity)
    }

    /// Insert a typed value. Returns `false` if the column does not hold `T`.
    ///
    /// Duplicate detection is the caller's job; an existing value would be
    /// overwritten.
    pub(crate) fn insert<T: Component>(
        &mut self,
        id: ComponentTypeId,
        entity: EntityId,
        value: T,
    ) -> bool {
        match self.column_mut::<T>(id) {
            Some(column) => {
                column.values.insert(entity, value);
                true
            }
            None => false,
        }
    }

    /// Insert a boxed value. Hands it back if no column of that type exists.
    pub(crate) fn insert_boxed(
        &mut self,
        id: ComponentTypeId,
        entity: EntityId,
        value: BoxedComponent,
    ) -> Result<(), BoxedComponent> {
        match self.columns.get_mut(id.index()) {
            Some(column) => column.insert_boxed(entity, value),
            None => Err(value),
        }
    }

    pub(crate) fn remove<T: Component>(&mut self, id: ComponentTypeId, entity: EntityId) -> Option<T> {
        self.column_mut::<T>(id)?.values.remove(&entity)
    }

    pub(crate) fn remove_erased(&mut self, id: ComponentTypeId, entity: EntityId) -> bool {
        self.columns
            .get_mut(id.index())
            .is_some_and(|c| c.remove_erased(entity))
    }

    /// Remove every record of `entity`, returning the types that were removed.
    pub(crate) fn purge(&mut self, entity: EntityId) -> Vec<ComponentTypeId> {
        self.columns
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, column)| {
                column
                    .remove_erased(entity)
                    .then_some(ComponentTypeId(idx as u32))
            })
            .collect()
    }

    /// Typed records of one component type, in ascending entity order.
    pub fn iter<T: Component>(&self, id: ComponentTypeId) -> impl Iterator<Item = (EntityId, &T)> {
        self.column::<T>(id)
            .into_iter()
            .flat_map(|c| c.values.iter().map(|(e, v)| (*e, v)))
    }

    /// Entities carrying a component of type `id`, in ascending order.
    pub fn entities_with(&self, id: ComponentTypeId) -> Vec<EntityId> {
        self.columns
            .get(id.index())
            .map(|c| c.entity_ids())
            .unwrap_or_default()
    }

    /// Component types carried by `entity`, in registration order.
    pub fn component_types_of(&self, entity: EntityId) -> Vec<ComponentTypeId> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.contains(entity))
            .map(|(idx, _)| ComponentTypeId(idx as u32))
            .collect()
    }

    /// Serialize one record through its `Serialize` impl.
    pub fn serialize(
        &self,
        id: ComponentTypeId,
        entity: EntityId,
    ) -> Option<Result<serde_json::Value, serde_json::Error>> {
        self.columns.get(id.index())?.serialize(entity)
    }

    /// Number of records of type `id`.
    pub fn count(&self, id: ComponentTypeId) -> usize {
        self.columns.get(id.index()).map_or(0, |c| c.len())
    }

    /// Total number of component records.
    pub fn record_count(&self) -> usize {
        self.columns.iter().map(|c| c.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
