//! Component types, field schemas and the component registry.
//!
//! Every component type declares a stable wire tag and an ordered field
//! schema through the [`Component`] trait. Registering a type in a
//! [`ComponentRegistry`] assigns it a [`ComponentTypeId`], which keys the
//! component store and query signatures.
//!
//! The tag, not the Rust type name, is what clients see.

use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use crate::EcsError;

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Wire type of a single component field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Int64,
    Boolean,
}

/// One entry of a component's ordered field schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSchema {
    /// Field name, as produced by the component's `Serialize` impl.
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldSchema {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// A field value as published to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Number(f64),
    Int64(i64),
    Boolean(bool),
}

impl FieldValue {
    /// Read a JSON value as the given kind. Returns `None` on a kind mismatch.
    pub fn from_json(kind: FieldKind, value: &serde_json::Value) -> Option<Self> {
        match kind {
            FieldKind::String => value.as_str().map(|s| Self::String(s.to_owned())),
            FieldKind::Number => value.as_f64().map(Self::Number),
            FieldKind::Int64 => value.as_i64().map(Self::Int64),
            FieldKind::Boolean => value.as_bool().map(Self::Boolean),
        }
    }
}

// ---------------------------------------------------------------------------
// Component trait
// ---------------------------------------------------------------------------

/// A plain data record that can be attached to an entity.
///
/// ```
/// use ripple_ecs::component::{Component, FieldKind, FieldSchema};
///
/// #[derive(Debug, Clone, serde::Serialize)]
/// struct Health {
///     hp: i64,
/// }
///
/// impl Component for Health {
///     const TAG: &'static str = "Health";
///     const FIELDS: &'static [FieldSchema] = &[FieldSchema::new("hp", FieldKind::Int64)];
/// }
/// ```
pub trait Component: Serialize + Send + Sync + 'static {
    /// Stable tag identifying this component kind on the wire.
    const TAG: &'static str;
    /// Ordered field schema. Empty for tag-only components.
    const FIELDS: &'static [FieldSchema];
}

// ---------------------------------------------------------------------------
// ComponentTypeId
// ---------------------------------------------------------------------------

/// Opaque identifier for a registered component type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(pub(crate) u32);

impl ComponentTypeId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentInfo
// ---------------------------------------------------------------------------

/// Metadata recorded for a registered component type.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    pub id: ComponentTypeId,
    pub tag: &'static str,
    pub fields: &'static [FieldSchema],
    /// Used only to map typed access back to the id.
    pub type_id: TypeId,
}

impl ComponentInfo {
    /// Pull the schema fields out of a serialized component, in schema order.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::SchemaMismatch`] if a declared field is missing or
    /// has the wrong kind.
    pub fn project_fields(
        &self,
        value: &serde_json::Value,
    ) -> Result<Vec<(&'static str, FieldValue)>, EcsError> {
        self.fields
            .iter()
            .map(|field| {
                value
                    .get(field.name)
                    .and_then(|v| FieldValue::from_json(field.kind, v))
                    .map(|v| (field.name, v))
                    .ok_or_else(|| EcsError::SchemaMismatch {
                        component: self.tag.to_owned(),
                        field: field.name.to_owned(),
                        expected: field.kind,
                    })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Maps component types to ids, tags and schemas.
///
/// Registering the same Rust type twice returns the existing id. Two types
/// may not share a tag.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentTypeId>,
    by_tag: HashMap<&'static str, ComponentTypeId>,
    /// Indexed by `ComponentTypeId.0`.
    infos: Vec<ComponentInfo>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T`, or return its id if it is already registered.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::DuplicateComponentTag`] if another type already
    /// uses `T::TAG`.
    pub fn register<T: Component>(&mut self) -> Result<ComponentTypeId, EcsError> {
        let rust_type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&rust_type_id) {
            return Ok(existing);
        }
        if self.by_tag.contains_key(T::TAG) {
            return Err(EcsError::DuplicateComponentTag {
                tag: T::TAG.to_owned(),
            });
        }

        let id = ComponentTypeId(self.infos.len() as u32);
        self.infos.push(ComponentInfo {
            id,
            tag: T::TAG,
            fields: T::FIELDS,
            type_id: rust_type_id,
        });
        self.by_type.insert(rust_type_id, id);
        self.by_tag.insert(T::TAG, id);
        Ok(id)
    }

    /// Look up a component type by its Rust type.
    pub fn lookup<T: 'static>(&self) -> Option<ComponentTypeId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Look up a component type by its wire tag.
    pub fn lookup_by_tag(&self, tag: &str) -> Option<ComponentTypeId> {
        self.by_tag.get(tag).copied()
    }

    pub fn get_info(&self, id: ComponentTypeId) -> Option<&ComponentInfo> {
        self.infos.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// All registered infos in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.infos.iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, Serialize)]
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

    #[derive(Debug, Clone, Serialize)]
    struct Marker;

    impl Component for Marker {
        const TAG: &'static str = "Marker";
        const FIELDS: &'static [FieldSchema] = &[];
    }

    #[derive(Debug, Clone, Serialize)]
    struct Impostor;

    impl Component for Impostor {
        const TAG: &'static str = "Pos";
        const FIELDS: &'static [FieldSchema] = &[];
    }

    #[test]
    fn register_and_lookup() {
        let mut reg = ComponentRegistry::new();
        let id = reg.register::<Pos>().unwrap();
        assert_eq!(reg.lookup::<Pos>(), Some(id));
        assert_eq!(reg.lookup_by_tag("Pos"), Some(id));
        assert_eq!(reg.get_info(id).unwrap().fields.len(), 2);
    }

    #[test]
    fn same_type_same_id() {
        let mut reg = ComponentRegistry::new();
        let a = reg.register::<Pos>().unwrap();
        let b = reg.register::<Pos>().unwrap();
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn different_types_different_ids() {
        let mut reg = ComponentRegistry::new();
        let p = reg.register::<Pos>().unwrap();
        let m = reg.register::<Marker>().unwrap();
        assert_ne!(p, m);
    }

    #[test]
    fn tag_clash_is_rejected() {
        let mut reg = ComponentRegistry::new();
        reg.register::<Pos>().unwrap();
        let err = reg.register::<Impostor>().unwrap_err();
        assert!(matches!(err, EcsError::DuplicateComponentTag { tag } if tag == "Pos"));
    }

    #[test]
    fn project_fields_follows_schema_order() {
        let mut reg = ComponentRegistry::new();
        let id = reg.register::<Pos>().unwrap();
        let info = reg.get_info(id).unwrap();
        let fields = info.project_fields(&json!({"y": 2.0, "x": 1.0})).unwrap();
        assert_eq!(
            fields,
            vec![("x", FieldValue::Number(1.0)), ("y", FieldValue::Number(2.0))]
        );
    }

    #[test]
    fn project_fields_reports_mismatch() {
        let mut reg = ComponentRegistry::new();
        let id = reg.register::<Pos>().unwrap();
        let info = reg.get_info(id).unwrap();
        let err = info.project_fields(&json!({"x": "one", "y": 2.0})).unwrap_err();
        assert!(matches!(
            err,
            EcsError::SchemaMismatch { ref field, expected: FieldKind::Number, .. } if field == "x"
        ));
    }

    #[test]
    fn tag_only_component_projects_no_fields() {
        let mut reg = ComponentRegistry::new();
        let id = reg.register::<Marker>().unwrap();
        let info = reg.get_info(id).unwrap();
        assert!(info.project_fields(&json!(null)).unwrap().is_empty());
    }
}
