//! Metadata descriptors consumed by the engine.
//!
//! Structural metadata is declared explicitly, once per entity type, and
//! registered up front; nothing is derived from the entities at runtime.
//! The descriptor names the primary-key field, the scalar properties
//! (with index flags) and the relation fields with their direction and
//! traversal flags.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{Result, UmbraError};
use crate::model::{CLASS_PROPERTY, CREATION_DATE_PROPERTY, UPDATE_DATE_PROPERTY};

/// Which endpoint of a relationship the owning entity occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Edges point away from the owner: `(owner)-[:rel]->(target)`.
    #[default]
    From,
    /// Edges point at the owner: `(target)-[:rel]->(owner)`.
    To,
}

/// A scalar property declaration.
#[derive(Debug, Clone)]
pub struct PropertyMeta {
    name: String,
    indexed: bool,
}

impl PropertyMeta {
    /// A plain, unindexed property.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexed: false,
        }
    }

    /// Mark the property as searchable through the per-class index.
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether index entries are maintained for this property.
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }
}

/// A relation field declaration (many-to-one or many-to-many).
#[derive(Debug, Clone)]
pub struct RelationMeta {
    name: String,
    direction: Direction,
    read_only: bool,
    write_only: bool,
}

impl RelationMeta {
    /// A writable relation with the default `From` direction.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::From,
            read_only: false,
            write_only: false,
        }
    }

    /// Set the edge orientation relative to the owning entity.
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Mark the relation read-only: never written, never discovered,
    /// populated only by scanning inbound edges.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Mark the relation write-only: written on flush but never read
    /// back; hydration yields an empty collection.
    pub fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }

    /// Relation (and edge type) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Edge orientation relative to the owner.
    pub fn edge_direction(&self) -> Direction {
        self.direction
    }

    /// Whether this relation participates in discovery and writes.
    pub fn is_traversed(&self) -> bool {
        !self.read_only
    }

    /// Whether this relation is read-only.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether this relation is write-only.
    pub fn is_write_only(&self) -> bool {
        self.write_only
    }
}

/// Resolved descriptor for one entity type.
#[derive(Debug)]
pub struct EntityMeta {
    class: String,
    primary_key: String,
    properties: Vec<PropertyMeta>,
    many_to_one: Vec<RelationMeta>,
    many_to_many: Vec<RelationMeta>,
}

impl EntityMeta {
    /// Start a descriptor for the given entity class.
    pub fn builder(class: impl Into<String>) -> EntityMetaBuilder {
        EntityMetaBuilder {
            class: class.into(),
            primary_key: None,
            properties: Vec::new(),
            many_to_one: Vec::new(),
            many_to_many: Vec::new(),
        }
    }

    /// Entity class name, written as the node discriminator.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Name of the primary-key field.
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Declared scalar properties.
    pub fn properties(&self) -> &[PropertyMeta] {
        &self.properties
    }

    /// Declared scalar properties flagged for indexing.
    pub fn indexed_properties(&self) -> impl Iterator<Item = &PropertyMeta> {
        self.properties.iter().filter(|p| p.is_indexed())
    }

    /// Declared many-to-one relations.
    pub fn many_to_one(&self) -> &[RelationMeta] {
        &self.many_to_one
    }

    /// Declared many-to-many relations.
    pub fn many_to_many(&self) -> &[RelationMeta] {
        &self.many_to_many
    }

    /// Scalar property lookup by field name.
    pub fn find_property(&self, name: &str) -> Option<&PropertyMeta> {
        self.properties.iter().find(|p| p.name() == name)
    }

    /// Singular relation lookup by field name.
    pub fn find_many_to_one(&self, name: &str) -> Option<&RelationMeta> {
        self.many_to_one.iter().find(|r| r.name() == name)
    }

    /// Collection relation lookup by field name.
    pub fn find_many_to_many(&self, name: &str) -> Option<&RelationMeta> {
        self.many_to_many.iter().find(|r| r.name() == name)
    }
}

/// Builder for [`EntityMeta`]; `build` validates the declaration.
#[derive(Debug)]
pub struct EntityMetaBuilder {
    class: String,
    primary_key: Option<String>,
    properties: Vec<PropertyMeta>,
    many_to_one: Vec<RelationMeta>,
    many_to_many: Vec<RelationMeta>,
}

impl EntityMetaBuilder {
    /// Declare the primary-key field.
    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = Some(name.into());
        self
    }

    /// Declare a scalar property.
    pub fn property(mut self, property: PropertyMeta) -> Self {
        self.properties.push(property);
        self
    }

    /// Declare a many-to-one relation field.
    pub fn many_to_one(mut self, relation: RelationMeta) -> Self {
        self.many_to_one.push(relation);
        self
    }

    /// Declare a many-to-many relation field.
    pub fn many_to_many(mut self, relation: RelationMeta) -> Self {
        self.many_to_many.push(relation);
        self
    }

    /// Validate and freeze the descriptor.
    pub fn build(self) -> Result<EntityMeta> {
        let Some(primary_key) = self.primary_key else {
            return Err(UmbraError::mapping(
                &self.class,
                "entity declares no primary key field",
            ));
        };

        let mut seen: Vec<&str> = vec![primary_key.as_str()];
        let names = self
            .properties
            .iter()
            .map(PropertyMeta::name)
            .chain(self.many_to_one.iter().map(RelationMeta::name))
            .chain(self.many_to_many.iter().map(RelationMeta::name));
        for name in names {
            if seen.contains(&name) {
                return Err(UmbraError::mapping(
                    &self.class,
                    format!("duplicate field declaration `{name}`"),
                ));
            }
            seen.push(name);
        }

        for reserved in [CLASS_PROPERTY, CREATION_DATE_PROPERTY, UPDATE_DATE_PROPERTY] {
            if seen.contains(&reserved) {
                return Err(UmbraError::mapping(
                    &self.class,
                    format!("field name `{reserved}` is reserved for the engine"),
                ));
            }
        }

        Ok(EntityMeta {
            class: self.class,
            primary_key,
            properties: self.properties,
            many_to_one: self.many_to_one,
            many_to_many: self.many_to_many,
        })
    }
}

/// Class-name to descriptor registry, shared across a session.
#[derive(Debug, Default)]
pub struct MetaRegistry {
    metas: FxHashMap<String, Arc<EntityMeta>>,
}

impl MetaRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, replacing any previous one for the class.
    pub fn register(&mut self, meta: EntityMeta) -> Arc<EntityMeta> {
        let meta = Arc::new(meta);
        self.metas.insert(meta.class().to_string(), Arc::clone(&meta));
        meta
    }

    /// Resolve the descriptor for a class name.
    pub fn get(&self, class: &str) -> Result<Arc<EntityMeta>> {
        self.metas.get(class).map(Arc::clone).ok_or_else(|| {
            UmbraError::mapping(class, "no metadata registered for this entity class")
        })
    }

    /// Whether the class has a registered descriptor.
    pub fn contains(&self, class: &str) -> bool {
        self.metas.contains_key(class)
    }
}
