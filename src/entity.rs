//! Runtime entities and lazy proxies.
//!
//! An [`Entity`] is a shared handle over interior-mutable state; clones
//! are the same instance, and instance identity (not the primary key,
//! which new entities lack) is what the pending sets and identity map
//! key on. Entities built by [`Entity::new`] are fully local; entities
//! built from a node snapshot act as proxies that hydrate relation
//! fields on first access through their owning session. A per-field
//! hydrated set decides whether an access reads the cached value or
//! triggers a fetch, and setters mark fields hydrated immediately so a
//! freshly assigned value is never clobbered by a later lazy fetch.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{Result, UmbraError};
use crate::meta::{EntityMeta, MetaRegistry, RelationMeta};
use crate::model::{NodeId, NodeRecord, PropertyValue};
use crate::session::{hydrate_relation, SessionInner};

/// Ordered many-to-many collection that records removals since load, so
/// the flush pipeline can diff without re-reading prior remote state.
#[derive(Default)]
pub(crate) struct RelationSet {
    items: Vec<Entity>,
    removed: Vec<Entity>,
}

impl RelationSet {
    pub(crate) fn add(&mut self, member: Entity) {
        self.removed.retain(|r| !r.same_as(&member));
        if !self.items.iter().any(|i| i.same_as(&member)) {
            self.items.push(member);
        }
    }

    pub(crate) fn remove(&mut self, member: &Entity) {
        if let Some(position) = self.items.iter().position(|i| i.same_as(member)) {
            self.items.remove(position);
        }
        if !self.removed.iter().any(|r| r.same_as(member)) {
            self.removed.push(member.clone());
        }
    }

    pub(crate) fn items(&self) -> &[Entity] {
        &self.items
    }

    pub(crate) fn removed(&self) -> &[Entity] {
        &self.removed
    }

    pub(crate) fn replace_items(&mut self, items: Vec<Entity>) {
        self.items = items;
    }

    pub(crate) fn clear_removed(&mut self) {
        self.removed.clear();
    }
}

pub(crate) struct EntityState {
    meta: Arc<EntityMeta>,
    key: Option<NodeId>,
    properties: BTreeMap<String, PropertyValue>,
    ones: BTreeMap<String, Option<Entity>>,
    manys: BTreeMap<String, RelationSet>,
    hydrated: FxHashSet<String>,
    node: Option<NodeId>,
    session: Weak<RefCell<SessionInner>>,
}

/// Identity of an entity instance, independent of its primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EntityKey(*const ());

/// A typed in-memory object corresponding to a remote node.
#[derive(Clone)]
pub struct Entity {
    state: Rc<RefCell<EntityState>>,
}

impl Entity {
    /// A fresh, fully local entity for the given descriptor. It becomes
    /// persistent once a flush assigns its primary key.
    pub fn new(meta: &Arc<EntityMeta>) -> Self {
        let mut hydrated = FxHashSet::default();
        hydrated.insert(meta.primary_key().to_string());
        for property in meta.properties() {
            hydrated.insert(property.name().to_string());
        }
        let mut ones = BTreeMap::new();
        for relation in meta.many_to_one() {
            hydrated.insert(relation.name().to_string());
            ones.insert(relation.name().to_string(), None);
        }
        let mut manys = BTreeMap::new();
        for relation in meta.many_to_many() {
            hydrated.insert(relation.name().to_string());
            manys.insert(relation.name().to_string(), RelationSet::default());
        }
        Self {
            state: Rc::new(RefCell::new(EntityState {
                meta: Arc::clone(meta),
                key: None,
                properties: BTreeMap::new(),
                ones,
                manys,
                hydrated,
                node: None,
                session: Weak::new(),
            })),
        }
    }

    /// Proxy over a node snapshot: primary key and present scalar
    /// properties are copied and marked hydrated, write-only collections
    /// are hydrated empty, everything else defers to the session.
    pub(crate) fn from_record(
        meta: Arc<EntityMeta>,
        record: &NodeRecord,
        session: Weak<RefCell<SessionInner>>,
    ) -> Self {
        let mut hydrated = FxHashSet::default();
        hydrated.insert(meta.primary_key().to_string());
        let mut properties = BTreeMap::new();
        for property in meta.properties() {
            if let Some(value) = record.property(property.name()) {
                properties.insert(property.name().to_string(), value.clone());
                hydrated.insert(property.name().to_string());
            }
        }
        let mut ones = BTreeMap::new();
        for relation in meta.many_to_one() {
            ones.insert(relation.name().to_string(), None);
        }
        let mut manys = BTreeMap::new();
        for relation in meta.many_to_many() {
            if relation.is_write_only() {
                hydrated.insert(relation.name().to_string());
            }
            manys.insert(relation.name().to_string(), RelationSet::default());
        }
        Self {
            state: Rc::new(RefCell::new(EntityState {
                meta,
                key: Some(record.id),
                properties,
                ones,
                manys,
                hydrated,
                node: Some(record.id),
                session,
            })),
        }
    }

    /// Entity class name.
    pub fn class(&self) -> String {
        self.state.borrow().meta.class().to_string()
    }

    /// The descriptor this entity was declared with.
    pub fn meta(&self) -> Arc<EntityMeta> {
        Arc::clone(&self.state.borrow().meta)
    }

    /// The primary key, once assigned by the engine.
    pub fn key(&self) -> Option<NodeId> {
        self.state.borrow().key
    }

    /// Whether `other` is the same in-memory instance.
    pub fn same_as(&self, other: &Entity) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Read a scalar property. Scalars are populated at construction and
    /// never fetched lazily; absent means unset.
    pub fn get(&self, name: &str) -> Result<Option<PropertyValue>> {
        let state = self.state.borrow();
        if state.meta.find_property(name).is_none() {
            return Err(UmbraError::mapping(
                state.meta.class(),
                format!("unknown property `{name}`"),
            ));
        }
        Ok(state.properties.get(name).cloned())
    }

    /// Set a scalar property and mark it hydrated.
    pub fn set(&self, name: &str, value: impl Into<PropertyValue>) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.meta.find_property(name).is_none() {
            return Err(UmbraError::mapping(
                state.meta.class(),
                format!("unknown property `{name}`"),
            ));
        }
        state.properties.insert(name.to_string(), value.into());
        state.hydrated.insert(name.to_string());
        Ok(())
    }

    /// Read a many-to-one relation, hydrating it on first access.
    pub fn one(&self, field: &str) -> Result<Option<Entity>> {
        let relation = self.many_to_one_meta(field)?;
        self.ensure_hydrated(&relation, false)?;
        Ok(self.state.borrow().ones.get(field).cloned().flatten())
    }

    /// Replace a many-to-one relation target.
    pub fn set_one(&self, field: &str, target: Option<Entity>) -> Result<()> {
        self.many_to_one_meta(field)?;
        let mut state = self.state.borrow_mut();
        state.ones.insert(field.to_string(), target);
        state.hydrated.insert(field.to_string());
        Ok(())
    }

    /// Read a many-to-many relation, hydrating it on first access.
    /// Returns handles in insertion order.
    pub fn many(&self, field: &str) -> Result<Vec<Entity>> {
        let relation = self.many_to_many_meta(field)?;
        self.ensure_hydrated(&relation, true)?;
        Ok(self
            .state
            .borrow()
            .manys
            .get(field)
            .map(|set| set.items().to_vec())
            .unwrap_or_default())
    }

    /// Append a member to a many-to-many relation. Re-adding a member
    /// already present is a no-op; re-adding a removed member cancels
    /// the pending removal.
    pub fn push(&self, field: &str, member: Entity) -> Result<()> {
        self.many_to_many_meta(field)?;
        let mut state = self.state.borrow_mut();
        state.hydrated.insert(field.to_string());
        state.manys.entry(field.to_string()).or_default().add(member);
        Ok(())
    }

    /// Remove a member from a many-to-many relation, recording the
    /// removal so the next flush deletes the matching edge.
    pub fn remove_from(&self, field: &str, member: &Entity) -> Result<()> {
        self.many_to_many_meta(field)?;
        let mut state = self.state.borrow_mut();
        state.hydrated.insert(field.to_string());
        state
            .manys
            .entry(field.to_string())
            .or_default()
            .remove(member);
        Ok(())
    }

    /// Plain value snapshot (primary key + scalar properties), suitable
    /// for serialization. The snapshot carries none of the proxy
    /// machinery; see [`DetachedEntity::attach`].
    pub fn detach(&self) -> DetachedEntity {
        let state = self.state.borrow();
        DetachedEntity {
            class: state.meta.class().to_string(),
            id: state.key,
            properties: state.properties.clone(),
        }
    }

    fn many_to_one_meta(&self, field: &str) -> Result<RelationMeta> {
        let state = self.state.borrow();
        state
            .meta
            .find_many_to_one(field)
            .cloned()
            .ok_or_else(|| {
                UmbraError::mapping(
                    state.meta.class(),
                    format!("unknown many-to-one relation `{field}`"),
                )
            })
    }

    fn many_to_many_meta(&self, field: &str) -> Result<RelationMeta> {
        let state = self.state.borrow();
        state
            .meta
            .find_many_to_many(field)
            .cloned()
            .ok_or_else(|| {
                UmbraError::mapping(
                    state.meta.class(),
                    format!("unknown many-to-many relation `{field}`"),
                )
            })
    }

    fn ensure_hydrated(&self, relation: &RelationMeta, many: bool) -> Result<()> {
        let session = {
            let state = self.state.borrow();
            if state.hydrated.contains(relation.name()) {
                return Ok(());
            }
            state.session.clone()
        };
        let Some(session) = session.upgrade() else {
            return Err(UmbraError::UninitializedProxy {
                field: relation.name().to_string(),
            });
        };
        hydrate_relation(&session, self, relation, many)
    }

    // ---- crate-internal surface for the session and flush pipeline ----
    //
    // The peek variants read the current local value without triggering
    // hydration; discovery and diffing must never cause fetches.

    pub(crate) fn entity_key(&self) -> EntityKey {
        EntityKey(Rc::as_ptr(&self.state).cast())
    }

    pub(crate) fn backing_node(&self) -> Option<NodeId> {
        self.state.borrow().node
    }

    pub(crate) fn is_hydrated(&self, field: &str) -> bool {
        self.state.borrow().hydrated.contains(field)
    }

    pub(crate) fn set_key(&self, id: NodeId) {
        let mut state = self.state.borrow_mut();
        state.key = Some(id);
        let primary_key = state.meta.primary_key().to_string();
        state.hydrated.insert(primary_key);
    }

    pub(crate) fn bind(&self, session: Weak<RefCell<SessionInner>>, node: NodeId) {
        let mut state = self.state.borrow_mut();
        state.session = session;
        state.node = Some(node);
    }

    pub(crate) fn peek_property(&self, name: &str) -> Option<PropertyValue> {
        self.state.borrow().properties.get(name).cloned()
    }

    pub(crate) fn peek_one(&self, field: &str) -> Option<Entity> {
        self.state.borrow().ones.get(field).cloned().flatten()
    }

    pub(crate) fn peek_many(&self, field: &str) -> Vec<Entity> {
        self.state
            .borrow()
            .manys
            .get(field)
            .map(|set| set.items().to_vec())
            .unwrap_or_default()
    }

    pub(crate) fn removed_from(&self, field: &str) -> Vec<Entity> {
        self.state
            .borrow()
            .manys
            .get(field)
            .map(|set| set.removed().to_vec())
            .unwrap_or_default()
    }

    pub(crate) fn clear_removed(&self, field: &str) {
        if let Some(set) = self.state.borrow_mut().manys.get_mut(field) {
            set.clear_removed();
        }
    }

    pub(crate) fn assign_relation(
        &self,
        relation: &RelationMeta,
        many: bool,
        loaded: Vec<Entity>,
    ) {
        let mut state = self.state.borrow_mut();
        state.hydrated.insert(relation.name().to_string());
        if many {
            state
                .manys
                .entry(relation.name().to_string())
                .or_default()
                .replace_items(loaded);
        } else if let Some(slot) = state.ones.get_mut(relation.name()) {
            if let Some(first) = loaded.into_iter().next() {
                *slot = Some(first);
            }
        }
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Entity")
            .field("class", &state.meta.class())
            .field("key", &state.key)
            .finish_non_exhaustive()
    }
}

/// Serializable value snapshot of an entity: class, primary key and
/// scalar properties only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetachedEntity {
    /// Entity class name.
    pub class: String,
    /// Primary key, if the entity was ever persisted.
    pub id: Option<NodeId>,
    /// Scalar property values.
    pub properties: BTreeMap<String, PropertyValue>,
}

impl DetachedEntity {
    /// Reconstitute an entity from the snapshot. The result has no
    /// backing node: scalar properties are available, but traversing a
    /// relation fails with an uninitialized-proxy error until the entity
    /// is reloaded through a session.
    pub fn attach(&self, registry: &MetaRegistry) -> Result<Entity> {
        let meta = registry.get(&self.class)?;
        let mut hydrated = FxHashSet::default();
        hydrated.insert(meta.primary_key().to_string());
        let mut properties = BTreeMap::new();
        for property in meta.properties() {
            if let Some(value) = self.properties.get(property.name()) {
                properties.insert(property.name().to_string(), value.clone());
                hydrated.insert(property.name().to_string());
            }
        }
        let mut ones = BTreeMap::new();
        for relation in meta.many_to_one() {
            ones.insert(relation.name().to_string(), None);
        }
        let mut manys = BTreeMap::new();
        for relation in meta.many_to_many() {
            manys.insert(relation.name().to_string(), RelationSet::default());
        }
        Ok(Entity {
            state: Rc::new(RefCell::new(EntityState {
                meta,
                key: self.id,
                properties,
                ones,
                manys,
                hydrated,
                node: None,
                session: Weak::new(),
            })),
        })
    }
}
