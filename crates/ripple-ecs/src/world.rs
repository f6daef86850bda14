//! The [`World`] is the top-level container for the ECS. It owns the entity
//! registry, the component registry, the component store and the query index,
//! and is the only place where those four are mutated, so they never drift
//! apart.

use serde::{Deserialize, Serialize};

use crate::component::{Component, ComponentRegistry, ComponentTypeId, FieldValue};
use crate::entity::{EntityId, EntityRegistry};
use crate::query::{Query, QueryId, QueryIndex};
use crate::storage::{BoxedComponent, ComponentStore};
use crate::EcsError;

// ---------------------------------------------------------------------------
// WorldConfig
// ---------------------------------------------------------------------------

/// Simulation bounds, passed in at construction.
///
/// Entities live on a `bound_width` x `bound_height` plane. `half_size` is
/// half the edge of the shapes being simulated; wrap-around lets a shape
/// leave the plane completely before reappearing on the opposite edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldConfig {
    pub bound_width: f64,
    pub bound_height: f64,
    pub half_size: f64,
}

impl Default for WorldConfig {
    /// An 800x600 plane with 50-unit shapes.
    fn default() -> Self {
        Self {
            bound_width: 800.0,
            bound_height: 600.0,
            half_size: 25.0,
        }
    }
}

// ---------------------------------------------------------------------------
// ComponentBundle
// ---------------------------------------------------------------------------

/// A set of component values to attach to one entity in a single step.
///
/// ```
/// # use ripple_ecs::prelude::*;
/// # #[derive(Debug, Clone, serde::Serialize)]
/// # struct Position { x: f64, y: f64 }
/// # impl Component for Position {
/// #     const TAG: &'static str = "Position";
/// #     const FIELDS: &'static [FieldSchema] = &[
/// #         FieldSchema::new("x", FieldKind::Number),
/// #         FieldSchema::new("y", FieldKind::Number),
/// #     ];
/// # }
/// let mut world = World::new();
/// world.register_component::<Position>().unwrap();
///
/// let mut bundle = ComponentBundle::new();
/// bundle.add(world.registry(), Position { x: 0.0, y: 0.0 }).unwrap();
/// let entity = world.spawn(bundle).unwrap();
/// assert!(world.has::<Position>(entity));
/// ```
#[derive(Default)]
pub struct ComponentBundle {
    entries: Vec<(ComponentTypeId, BoxedComponent)>,
}

impl ComponentBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component value.
    ///
    /// # Errors
    ///
    /// - [`EcsError::UnknownComponent`] if `T` is not registered.
    /// - [`EcsError::DuplicateComponent`] if the bundle already holds a `T`.
    pub fn add<T: Component>(
        &mut self,
        registry: &ComponentRegistry,
        value: T,
    ) -> Result<(), EcsError> {
        let id = registry.lookup::<T>().ok_or_else(|| EcsError::UnknownComponent {
            name: T::TAG.to_owned(),
        })?;
        if self.entries.iter().any(|(existing, _)| *existing == id) {
            return Err(EcsError::DuplicateComponent {
                entity: None,
                component: T::TAG.to_owned(),
            });
        }
        self.entries.push((id, Box::new(value)));
        Ok(())
    }

    /// Component types in this bundle, in insertion order.
    pub fn type_ids(&self) -> Vec<ComponentTypeId> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ComponentBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentBundle")
            .field("types", &self.type_ids())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// One component of an entity, reduced to its schema fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedComponent {
    pub tag: &'static str,
    pub fields: Vec<(&'static str, FieldValue)>,
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// The top-level ECS container for one simulation.
#[derive(Debug, Default)]
pub struct World {
    config: WorldConfig,
    entities: EntityRegistry,
    registry: ComponentRegistry,
    store: ComponentStore,
    queries: QueryIndex,
}

impl World {
    /// Create an empty world with the default bounds.
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    /// Create an empty world with explicit bounds.
    ///
    /// # Panics
    ///
    /// Panics if a bound is not positive and finite, or `half_size` is
    /// negative or not finite.
    pub fn with_config(config: WorldConfig) -> Self {
        assert!(
            config.bound_width > 0.0 && config.bound_width.is_finite(),
            "bound_width must be positive and finite, got {}",
            config.bound_width
        );
        assert!(
            config.bound_height > 0.0 && config.bound_height.is_finite(),
            "bound_height must be positive and finite, got {}",
            config.bound_height
        );
        assert!(
            config.half_size >= 0.0 && config.half_size.is_finite(),
            "half_size must be non-negative and finite, got {}",
            config.half_size
        );
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Read-only access to the component registry.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Read-only access to the entity registry.
    pub fn entities(&self) -> &EntityRegistry {
        &self.entities
    }

    /// Read-only access to the query index.
    pub fn queries(&self) -> &QueryIndex {
        &self.queries
    }

    /// Read-only access to the component store.
    pub fn store(&self) -> &ComponentStore {
        &self.store
    }

    // -- registration -------------------------------------------------------

    /// Register a component type and create its storage column.
    pub fn register_component<T: Component>(&mut self) -> Result<ComponentTypeId, EcsError> {
        let before = self.registry.len();
        let id = self.registry.register::<T>()?;
        if self.registry.len() > before {
            self.store.add_column::<T>(id);
        }
        Ok(id)
    }

    /// Id of a registered component type.
    pub fn component_id<T: Component>(&self) -> Option<ComponentTypeId> {
        self.registry.lookup::<T>()
    }

    /// Register a query over the given required component types.
    ///
    /// # Errors
    ///
    /// - [`EcsError::InvalidQuery`] if `required` is empty.
    /// - [`EcsError::UnknownComponent`] if a type id was not issued by this
    ///   world.
    pub fn register_query(&mut self, required: &[ComponentTypeId]) -> Result<QueryId, EcsError> {
        let query = Query::new(required)?;
        if let Some(unknown) = query
            .required()
            .iter()
            .find(|t| self.registry.get_info(**t).is_none())
        {
            return Err(EcsError::UnknownComponent {
                name: format!("{unknown:?}"),
            });
        }
        Ok(self.queries.register(query, &self.store))
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Issue an entity id that becomes alive on [`spawn_reserved`](Self::spawn_reserved).
    pub fn reserve_entity(&mut self) -> EntityId {
        self.entities.reserve()
    }

    /// Drop a reservation that will never be spawned.
    pub fn release_reservation(&mut self, entity: EntityId) -> bool {
        self.entities.release(entity)
    }

    /// Make a reserved id alive with the given components.
    ///
    /// # Errors
    ///
    /// - [`EcsError::IdCollision`] (fatal) if the id is already alive.
    /// - [`EcsError::NotFound`] if the id is not reserved.
    /// - [`EcsError::UnknownComponent`] if the bundle was built against a
    ///   different registry. The entity is destroyed again in that case.
    pub fn spawn_reserved(&mut self, entity: EntityId, bundle: ComponentBundle) -> Result<(), EcsError> {
        self.entities.activate(entity)?;
        if let Err(e) = self.attach_bundle(entity, bundle) {
            self.destroy(entity)?;
            return Err(e);
        }
        Ok(())
    }

    /// Create an entity with the given components.
    pub fn spawn(&mut self, bundle: ComponentBundle) -> Result<EntityId, EcsError> {
        let entity = self.entities.reserve();
        self.spawn_reserved(entity, bundle)?;
        Ok(entity)
    }

    /// Create an entity with no components.
    pub fn create(&mut self) -> Result<EntityId, EcsError> {
        self.entities.create()
    }

    /// Destroy an entity, purging its component records and query
    /// membership before returning.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::NotFound`] if the entity is unknown or already
    /// destroyed.
    pub fn destroy(&mut self, entity: EntityId) -> Result<(), EcsError> {
        self.entities.destroy(entity)?;
        let removed = self.store.purge(entity);
        self.queries.on_destroy(entity, &removed);
        Ok(())
    }

    /// Destroy every alive entity. Returns how many were destroyed.
    pub fn destroy_all(&mut self) -> usize {
        let alive: Vec<EntityId> = self.entities.iter_alive().collect();
        for entity in &alive {
            let removed = self.store.purge(*entity);
            self.queries.on_destroy(*entity, &removed);
            // Cannot fail: the id came from the alive set.
            let _ = self.entities.destroy(*entity);
        }
        alive.len()
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.is_alive(entity)
    }

    /// Number of alive entities.
    pub fn entity_count(&self) -> usize {
        self.entities.alive_count()
    }

    /// Alive entities in ascending id order.
    pub fn alive_entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.iter_alive()
    }

    // -- component access ---------------------------------------------------

    fn lookup<T: Component>(&self) -> Result<ComponentTypeId, EcsError> {
        self.registry
            .lookup::<T>()
            .ok_or_else(|| EcsError::UnknownComponent {
                name: T::TAG.to_owned(),
            })
    }

    /// Attach a component to an alive entity.
    ///
    /// # Errors
    ///
    /// - [`EcsError::NotFound`] if the entity is not alive.
    /// - [`EcsError::DuplicateComponent`] if it already carries a `T`.
    /// - [`EcsError::UnknownComponent`] if `T` is not registered.
    pub fn add<T: Component>(&mut self, entity: EntityId, value: T) -> Result<(), EcsError> {
        let id = self.lookup::<T>()?;
        if !self.entities.is_alive(entity) {
            return Err(EcsError::NotFound { entity });
        }
        if self.store.contains(id, entity) {
            return Err(EcsError::DuplicateComponent {
                entity: Some(entity),
                component: T::TAG.to_owned(),
            });
        }
        self.store.insert(id, entity, value);
        self.queries.on_insert(&self.store, entity, id);
        Ok(())
    }

    /// Attach every component in `bundle` to an alive entity. Nothing is
    /// attached if any type is already present.
    pub fn insert_bundle(&mut self, entity: EntityId, bundle: ComponentBundle) -> Result<(), EcsError> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::NotFound { entity });
        }
        self.attach_bundle(entity, bundle)
    }

    fn attach_bundle(&mut self, entity: EntityId, bundle: ComponentBundle) -> Result<(), EcsError> {
        if let Some((id, _)) = bundle
            .entries
            .iter()
            .find(|(id, _)| self.store.contains(*id, entity))
        {
            return Err(EcsError::DuplicateComponent {
                entity: Some(entity),
                component: self.tag_of(*id),
            });
        }

        let mut attached = Vec::with_capacity(bundle.entries.len());
        for (id, value) in bundle.entries {
            if self.store.insert_boxed(id, entity, value).is_err() {
                for done in attached {
                    self.store.remove_erased(done, entity);
                    self.queries.on_remove(entity, done);
                }
                return Err(EcsError::UnknownComponent {
                    name: self.tag_of(id),
                });
            }
            attached.push(id);
        }
        for id in attached {
            self.queries.on_insert(&self.store, entity, id);
        }
        Ok(())
    }

    fn tag_of(&self, id: ComponentTypeId) -> String {
        self.registry
            .get_info(id)
            .map_or_else(|| format!("{id:?}"), |info| info.tag.to_owned())
    }

    /// Shared access to a component. `None` if absent; never an error.
    pub fn get<T: Component>(&self, entity: EntityId) -> Option<&T> {
        let id = self.registry.lookup::<T>()?;
        self.store.get::<T>(id, entity)
    }

    /// Mutable access to a component. `None` if absent; never an error.
    ///
    /// In-place mutation does not change query membership.
    pub fn get_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        let id = self.registry.lookup::<T>()?;
        self.store.get_mut::<T>(id, entity)
    }

    pub fn has<T: Component>(&self, entity: EntityId) -> bool {
        self.registry
            .lookup::<T>()
            .is_some_and(|id| self.store.contains(id, entity))
    }

    /// Detach and return a component.
    ///
    /// # Errors
    ///
    /// - [`EcsError::NotFound`] if the entity is not alive.
    /// - [`EcsError::ComponentNotFound`] if it carries no `T`.
    pub fn remove<T: Component>(&mut self, entity: EntityId) -> Result<T, EcsError> {
        let id = self.lookup::<T>()?;
        if !self.entities.is_alive(entity) {
            return Err(EcsError::NotFound { entity });
        }
        let value = self
            .store
            .remove::<T>(id, entity)
            .ok_or_else(|| EcsError::ComponentNotFound {
                entity,
                component: T::TAG.to_owned(),
            })?;
        self.queries.on_remove(entity, id);
        Ok(value)
    }

    /// Detach a component by type id, dropping the value.
    pub fn remove_by_id(&mut self, entity: EntityId, component: ComponentTypeId) -> Result<(), EcsError> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::NotFound { entity });
        }
        if !self.store.remove_erased(component, entity) {
            return Err(EcsError::ComponentNotFound {
                entity,
                component: self.tag_of(component),
            });
        }
        self.queries.on_remove(entity, component);
        Ok(())
    }

    /// Every `(entity, &T)` record, in ascending entity order.
    pub fn components_of_type<T: Component>(&self) -> impl Iterator<Item = (EntityId, &T)> {
        let id = self.registry.lookup::<T>();
        id.into_iter().flat_map(move |id| self.store.iter::<T>(id))
    }

    // -- projection ---------------------------------------------------------

    /// Reduce an alive entity to its components' schema fields, in
    /// component registration order.
    ///
    /// Components whose serialized form does not match their schema are
    /// logged and left out.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::NotFound`] if the entity is not alive.
    pub fn project_entity(&self, entity: EntityId) -> Result<Vec<ProjectedComponent>, EcsError> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::NotFound { entity });
        }
        let mut out = Vec::new();
        for id in self.store.component_types_of(entity) {
            let Some(info) = self.registry.get_info(id) else {
                continue;
            };
            let value = match self.store.serialize(id, entity) {
                Some(Ok(value)) => value,
                Some(Err(e)) => {
                    tracing::warn!(
                        entity = %entity,
                        component = info.tag,
                        error = %e,
                        "component failed to serialize -- left out of projection"
                    );
                    continue;
                }
                None => continue,
            };
            match info.project_fields(&value) {
                Ok(fields) => out.push(ProjectedComponent {
                    tag: info.tag,
                    fields,
                }),
                Err(e) => tracing::warn!(
                    entity = %entity,
                    error = %e,
                    "component does not match its schema -- left out of projection"
                ),
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{FieldKind, FieldSchema};

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Pos {
        x: f64,
        y: f64,
    }

    impl Component for Pos {
        const TAG: &'static str = "Pos";
        const FIELDS: &'static [FieldSchema] = &[
            FieldSchema::new("x", FieldKind::Number),
            FieldSchema::new("y", FieldKind::Number),
        ];
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Vel {
        x: f64,
        y: f64,
    }

    impl Component for Vel {
        const TAG: &'static str = "Vel";
        const FIELDS: &'static [FieldSchema] = &[
            FieldSchema::new("x", FieldKind::Number),
            FieldSchema::new("y", FieldKind::Number),
        ];
    }

    /// Declares a field its serializer never writes.
    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Broken {
        a: i64,
    }

    impl Component for Broken {
        const TAG: &'static str = "Broken";
        const FIELDS: &'static [FieldSchema] = &[FieldSchema::new("b", FieldKind::Int64)];
    }

    fn setup_world() -> World {
        let mut world = World::new();
        world.register_component::<Pos>().unwrap();
        world.register_component::<Vel>().unwrap();
        world.register_component::<Broken>().unwrap();
        world
    }

    #[test]
    fn spawn_and_get() {
        let mut world = setup_world();
        let mut bundle = ComponentBundle::new();
        bundle.add(world.registry(), Pos { x: 1.0, y: 2.0 }).unwrap();
        bundle.add(world.registry(), Vel { x: 3.0, y: 4.0 }).unwrap();
        let e = world.spawn(bundle).unwrap();

        assert_eq!(world.get::<Pos>(e), Some(&Pos { x: 1.0, y: 2.0 }));
        assert_eq!(world.get::<Vel>(e), Some(&Vel { x: 3.0, y: 4.0 }));
        assert!(!world.has::<Broken>(e));
    }

    #[test]
    fn bundle_rejects_duplicates() {
        let world = setup_world();
        let mut bundle = ComponentBundle::new();
        bundle.add(world.registry(), Pos { x: 1.0, y: 2.0 }).unwrap();
        let err = bundle.add(world.registry(), Pos { x: 3.0, y: 4.0 }).unwrap_err();
        assert!(matches!(err, EcsError::DuplicateComponent { .. }));
    }

    #[test]
    fn bundle_rejects_unregistered_type() {
        let mut world = World::new();
        world.register_component::<Pos>().unwrap();
        let mut bundle = ComponentBundle::new();
        let err = bundle.add(world.registry(), Vel { x: 0.0, y: 0.0 }).unwrap_err();
        assert!(matches!(err, EcsError::UnknownComponent { ref name } if name == "Vel"));
        assert!(bundle.is_empty());
    }

    #[test]
    fn add_unregistered_type_is_unknown() {
        let mut world = World::new();
        world.register_component::<Pos>().unwrap();
        let e = world.create().unwrap();
        let err = world.add(e, Vel { x: 1.0, y: 1.0 }).unwrap_err();
        assert!(matches!(err, EcsError::UnknownComponent { ref name } if name == "Vel"));
        assert!(!world.has::<Vel>(e));
    }

    #[test]
    fn query_over_foreign_type_id_is_unknown() {
        let mut small = World::new();
        let pos = small.register_component::<Pos>().unwrap();
        let large = setup_world();
        let broken = large.component_id::<Broken>().unwrap();

        let err = small.register_query(&[pos, broken]).unwrap_err();
        assert!(matches!(err, EcsError::UnknownComponent { .. }));
        assert!(small.register_query(&[pos]).is_ok());
    }

    #[test]
    fn add_to_dead_entity_is_not_found() {
        let mut world = setup_world();
        let e = world.create().unwrap();
        world.destroy(e).unwrap();
        let err = world.add(e, Pos { x: 0.0, y: 0.0 }).unwrap_err();
        assert!(matches!(err, EcsError::NotFound { .. }));
    }

    #[test]
    fn add_twice_is_duplicate_not_overwrite() {
        let mut world = setup_world();
        let e = world.create().unwrap();
        world.add(e, Pos { x: 1.0, y: 1.0 }).unwrap();
        let err = world.add(e, Pos { x: 9.0, y: 9.0 }).unwrap_err();
        assert!(matches!(err, EcsError::DuplicateComponent { .. }));
        assert_eq!(world.get::<Pos>(e), Some(&Pos { x: 1.0, y: 1.0 }));
    }

    #[test]
    fn missing_component_reads_as_none() {
        let mut world = setup_world();
        let e = world.create().unwrap();
        assert!(world.get::<Pos>(e).is_none());
        assert!(world.get_mut::<Pos>(e).is_none());
    }

    #[test]
    fn remove_missing_component_is_not_found() {
        let mut world = setup_world();
        let e = world.create().unwrap();
        assert!(matches!(
            world.remove::<Pos>(e),
            Err(EcsError::ComponentNotFound { .. })
        ));
    }

    #[test]
    fn destroy_purges_components() {
        let mut world = setup_world();
        let e = world.create().unwrap();
        world.add(e, Pos { x: 0.0, y: 0.0 }).unwrap();
        world.add(e, Vel { x: 1.0, y: 0.0 }).unwrap();
        world.destroy(e).unwrap();

        assert!(!world.is_alive(e));
        assert_eq!(world.store().record_count(), 0);
        assert!(matches!(world.destroy(e), Err(EcsError::NotFound { .. })));
    }

    #[test]
    fn spawn_reserved_requires_reservation() {
        let mut world = setup_world();
        let e = world.reserve_entity();
        assert!(!world.is_alive(e));
        world.spawn_reserved(e, ComponentBundle::new()).unwrap();
        assert!(world.is_alive(e));
        let err = world.spawn_reserved(e, ComponentBundle::new()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn destroy_all_empties_the_world() {
        let mut world = setup_world();
        for _ in 0..5 {
            let e = world.create().unwrap();
            world.add(e, Pos { x: 0.0, y: 0.0 }).unwrap();
        }
        assert_eq!(world.destroy_all(), 5);
        assert_eq!(world.entity_count(), 0);
        assert_eq!(world.store().record_count(), 0);
    }

    #[test]
    fn components_of_type_in_entity_order() {
        let mut world = setup_world();
        let a = world.create().unwrap();
        let b = world.create().unwrap();
        world.add(b, Pos { x: 2.0, y: 0.0 }).unwrap();
        world.add(a, Pos { x: 1.0, y: 0.0 }).unwrap();
        let xs: Vec<f64> = world.components_of_type::<Pos>().map(|(_, p)| p.x).collect();
        assert_eq!(xs, vec![1.0, 2.0]);
    }

    #[test]
    fn projection_skips_schema_mismatch() {
        let mut world = setup_world();
        let e = world.create().unwrap();
        world.add(e, Pos { x: 1.0, y: 2.0 }).unwrap();
        world.add(e, Broken { a: 1 }).unwrap();

        let projected = world.project_entity(e).unwrap();
        assert_eq!(projected.len(), 1);
        assert_eq!(projected[0].tag, "Pos");
        assert_eq!(
            projected[0].fields,
            vec![("x", FieldValue::Number(1.0)), ("y", FieldValue::Number(2.0))]
        );
    }

    #[test]
    #[should_panic(expected = "bound_width must be positive")]
    fn zero_width_panics() {
        let _ = World::with_config(WorldConfig {
            bound_width: 0.0,
            ..WorldConfig::default()
        });
    }
}
