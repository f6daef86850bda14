//! Incrementally maintained query index.
//!
//! A [`Query`] is a required-component signature. The [`QueryIndex`] keeps,
//! per registered query, the ordered set of alive entities carrying every
//! required type. Membership is updated on each insert, remove and destroy
//! by visiting only the queries that reference the changed component type,
//! so the cost of a structural change does not grow with entity count.
//!
//! Systems never iterate the live sets directly. The scheduler copies a
//! [`QueryIndex::snapshot`] at tick start and hands that to systems.

use std::collections::{BTreeSet, HashMap};

use crate::component::ComponentTypeId;
use crate::entity::EntityId;
use crate::storage::ComponentStore;
use crate::EcsError;

// ---------------------------------------------------------------------------
// QueryId / Query
// ---------------------------------------------------------------------------

/// Identifies a registered query within one world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(u32);

impl QueryId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A required-component signature. Stored sorted and deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    required: Vec<ComponentTypeId>,
}

impl Query {
    /// Build a query from a set of required component types.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidQuery`] if `required` is empty.
    pub fn new(required: &[ComponentTypeId]) -> Result<Self, EcsError> {
        if required.is_empty() {
            return Err(EcsError::InvalidQuery {
                reason: "required component set is empty".to_owned(),
            });
        }
        let mut required = required.to_vec();
        required.sort();
        required.dedup();
        Ok(Self { required })
    }

    pub fn required(&self) -> &[ComponentTypeId] {
        &self.required
    }

    /// Whether `entity` currently carries every required type.
    pub fn matches(&self, store: &ComponentStore, entity: EntityId) -> bool {
        self.required.iter().all(|t| store.contains(*t, entity))
    }
}

// ---------------------------------------------------------------------------
// QueryIndex
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct QueryEntry {
    query: Query,
    matches: BTreeSet<EntityId>,
}

/// Per-query cached match lists.
#[derive(Debug, Default)]
pub struct QueryIndex {
    /// Indexed by `QueryId.0`.
    entries: Vec<QueryEntry>,
    /// Component type -> queries that require it.
    by_type: HashMap<ComponentTypeId, Vec<QueryId>>,
    /// Dedup of identical signatures.
    by_signature: HashMap<Query, QueryId>,
}

impl QueryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `query`, populating it from the current store contents.
    ///
    /// Registering an identical signature returns the existing id.
    pub(crate) fn register(&mut self, query: Query, store: &ComponentStore) -> QueryId {
        if let Some(&existing) = self.by_signature.get(&query) {
            return existing;
        }

        let id = QueryId(self.entries.len() as u32);

        // Seed from the first required column; every match must be in it.
        let matches: BTreeSet<EntityId> = store
            .entities_with(query.required[0])
            .into_iter()
            .filter(|e| query.matches(store, *e))
            .collect();

        for t in &query.required {
            self.by_type.entry(*t).or_default().push(id);
        }
        self.by_signature.insert(query.clone(), id);
        self.entries.push(QueryEntry { query, matches });

        tracing::debug!(
            query = id.index(),
            matched = self.entries[id.index()].matches.len(),
            "registered query"
        );
        id
    }

    /// Called after `component` was inserted on `entity`.
    pub(crate) fn on_insert(
        &mut self,
        store: &ComponentStore,
        entity: EntityId,
        component: ComponentTypeId,
    ) {
        let Some(ids) = self.by_type.get(&component) else {
            return;
        };
        for id in ids {
            let entry = &mut self.entries[id.index()];
            if entry.query.matches(store, entity) {
                entry.matches.insert(entity);
            }
        }
    }

    /// Called after `component` was removed from `entity`.
    pub(crate) fn on_remove(&mut self, entity: EntityId, component: ComponentTypeId) {
        let Some(ids) = self.by_type.get(&component) else {
            return;
        };
        for id in ids {
            self.entries[id.index()].matches.remove(&entity);
        }
    }

    /// Called after `entity` was destroyed and `removed` were purged.
    pub(crate) fn on_destroy(&mut self, entity: EntityId, removed: &[ComponentTypeId]) {
        for component in removed {
            self.on_remove(entity, *component);
        }
    }

    /// The signature of a registered query.
    pub fn query(&self, id: QueryId) -> Option<&Query> {
        self.entries.get(id.index()).map(|e| &e.query)
    }

    /// Live matches of a query, in ascending entity order.
    pub fn matches(&self, id: QueryId) -> impl Iterator<Item = EntityId> + '_ {
        self.entries
            .get(id.index())
            .into_iter()
            .flat_map(|e| e.matches.iter().copied())
    }

    /// Owned copy of a query's current matches.
    pub fn snapshot(&self, id: QueryId) -> Vec<EntityId> {
        self.matches(id).collect()
    }

    pub fn contains(&self, id: QueryId, entity: EntityId) -> bool {
        self.entries
            .get(id.index())
            .is_some_and(|e| e.matches.contains(&entity))
    }

    /// Number of matches of a query (0 for an unknown id).
    pub fn match_count(&self, id: QueryId) -> usize {
        self.entries.get(id.index()).map_or(0, |e| e.matches.len())
    }

    /// Number of registered queries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All registered query ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = QueryId> {
        (0..self.entries.len() as u32).map(QueryId)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
