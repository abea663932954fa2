//! Sessions: identity map, lazy hydration and the unit of work.
//!
//! A session is the single-writer working context over one graph-client
//! port. It guarantees at most one live entity instance per remote node
//! id, stages `persist`/`remove` intents in pending sets keyed by
//! instance identity, and drains them through the ordered flush pipeline
//! in [`flush`](self::flush). Sessions are deliberately not `Send`: all
//! state is `Rc`/`RefCell`-scoped to one thread, per the synchronous
//! request/response model.

mod flush;

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Instant;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::client::{GraphClient, Row};
use crate::entity::{Entity, EntityKey};
use crate::error::{Result, UmbraError};
use crate::events::{Event, EventListener};
use crate::meta::{Direction, MetaRegistry, RelationMeta};
use crate::model::{NodeId, NodeRecord, PropertyValue};

/// Pending-persist / pending-remove set: insertion-ordered, deduplicated
/// by instance identity.
#[derive(Default)]
pub(crate) struct PendingSet {
    order: Vec<Entity>,
    seen: FxHashSet<EntityKey>,
}

impl PendingSet {
    pub(crate) fn insert(&mut self, entity: &Entity) -> bool {
        if self.seen.insert(entity.entity_key()) {
            self.order.push(entity.clone());
            true
        } else {
            false
        }
    }

    /// Snapshot of the staged entities, in insertion order.
    pub(crate) fn entities(&self) -> Vec<Entity> {
        self.order.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}

pub(crate) struct SessionInner {
    pub(crate) client: Box<dyn GraphClient>,
    pub(crate) registry: Arc<MetaRegistry>,
    pub(crate) identity: FxHashMap<NodeId, Entity>,
    pub(crate) pending_persist: PendingSet,
    pub(crate) pending_remove: PendingSet,
    pub(crate) listeners: Vec<Box<dyn EventListener>>,
    pub(crate) clock: Box<dyn FnMut() -> String>,
    pub(crate) indexes_created: FxHashSet<String>,
}

impl SessionInner {
    pub(crate) fn emit(&mut self, event: &Event) {
        for listener in &mut self.listeners {
            listener.on_event(event);
        }
    }

    pub(crate) fn enlist_persist(&mut self, entity: &Entity) -> Result<()> {
        let class = entity.class();
        if !self.registry.contains(&class) {
            return Err(UmbraError::mapping(
                class,
                "no metadata registered for this entity class",
            ));
        }
        if self.pending_persist.insert(entity) {
            debug!(class = %class, "entity staged for persist");
        }
        Ok(())
    }

    /// Identity-map aware conversion of a node snapshot into an entity.
    pub(crate) fn load_record(
        &mut self,
        record: &NodeRecord,
        weak: &Weak<RefCell<SessionInner>>,
    ) -> Result<Entity> {
        if let Some(existing) = self.identity.get(&record.id) {
            return Ok(existing.clone());
        }
        let class = record.class().ok_or_else(|| {
            UmbraError::mapping(
                "<unknown>",
                format!("node {} carries no class discriminator", record.id),
            )
        })?;
        let meta = self.registry.get(class)?;
        let entity = Entity::from_record(meta, record, weak.clone());
        self.identity.insert(record.id, entity.clone());
        debug!(node_id = record.id, class = %class, "proxy constructed");
        Ok(entity)
    }
}

/// Which far endpoint a relationship record exposes for an owner node,
/// given the relation's orientation and traversal flag. Read-only
/// relations invert the match: they are populated by scanning edges that
/// point at the owner instead of away from it.
fn far_endpoint(
    record: &crate::model::RelationshipRecord,
    owner: NodeId,
    relation: &RelationMeta,
) -> Option<NodeId> {
    if record.type_name != relation.name() {
        return None;
    }
    let owner_at_source = match (relation.is_traversed(), relation.edge_direction()) {
        (true, Direction::From) | (false, Direction::To) => true,
        (true, Direction::To) | (false, Direction::From) => false,
    };
    if owner_at_source {
        (record.from == owner).then_some(record.to)
    } else {
        (record.to == owner).then_some(record.from)
    }
}

/// Populate one relation field of a proxy from its backing node.
///
/// The full relationship list is fetched once per triggering access and
/// not cached across accesses; endpoints resolve through the identity
/// map, so already-loaded neighbors come back as the same instances.
pub(crate) fn hydrate_relation(
    session: &Rc<RefCell<SessionInner>>,
    entity: &Entity,
    relation: &RelationMeta,
    many: bool,
) -> Result<()> {
    let Some(node) = entity.backing_node() else {
        return Err(UmbraError::UninitializedProxy {
            field: relation.name().to_string(),
        });
    };

    let mut inner = session.borrow_mut();
    let records = inner.client.list_relationships(node)?;
    let endpoints: Vec<NodeId> = records
        .iter()
        .filter_map(|record| far_endpoint(record, node, relation))
        .collect();
    debug!(
        node_id = node,
        relation = relation.name(),
        matches = endpoints.len(),
        "hydrating relation"
    );

    let weak = Rc::downgrade(session);
    let mut loaded = Vec::with_capacity(endpoints.len());
    for id in endpoints {
        let record = inner.client.get_node(id)?.ok_or_else(|| {
            UmbraError::write("hydrate", format!("relationship endpoint {id} vanished"))
        })?;
        loaded.push(inner.load_record(&record, &weak)?);
    }
    drop(inner);

    entity.assign_relation(relation, many, loaded);
    Ok(())
}

fn default_timestamp() -> String {
    let format =
        time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    time::OffsetDateTime::now_utc()
        .format(&format)
        .unwrap_or_default()
}

/// A working session over a graph-client port.
pub struct Session {
    inner: Rc<RefCell<SessionInner>>,
}

impl Session {
    /// Open a session over the given port and metadata registry.
    pub fn new(client: Box<dyn GraphClient>, registry: Arc<MetaRegistry>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SessionInner {
                client,
                registry,
                identity: FxHashMap::default(),
                pending_persist: PendingSet::default(),
                pending_remove: PendingSet::default(),
                listeners: Vec::new(),
                clock: Box::new(default_timestamp),
                indexes_created: FxHashSet::default(),
            })),
        }
    }

    /// Stage an entity (and, at flush time, its reachable writable
    /// subgraph) for persistence. Idempotent per instance.
    pub fn persist(&self, entity: &Entity) -> Result<()> {
        self.inner.borrow_mut().enlist_persist(entity)
    }

    /// Stage an entity for removal at the next flush.
    pub fn remove(&self, entity: &Entity) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.pending_remove.insert(entity) {
            debug!(class = %entity.class(), "entity staged for removal");
        }
        Ok(())
    }

    /// Run the flush pipeline over the pending sets; see the module docs
    /// of [`flush`](self::flush) for ordering and failure semantics.
    pub fn flush(&self) -> Result<()> {
        let weak = Rc::downgrade(&self.inner);
        self.inner.borrow_mut().flush(&weak)
    }

    /// Convert a node snapshot into an entity, returning the already
    /// loaded instance when the node id is known to this session.
    pub fn load(&self, record: &NodeRecord) -> Result<Entity> {
        let weak = Rc::downgrade(&self.inner);
        self.inner.borrow_mut().load_record(record, &weak)
    }

    /// Fetch a node by id and load it, regardless of entity class.
    /// Returns `None` when the remote store has no such node.
    pub fn find_any(&self, id: NodeId) -> Result<Option<Entity>> {
        let weak = Rc::downgrade(&self.inner);
        let mut inner = self.inner.borrow_mut();
        match inner.client.get_node(id)? {
            Some(record) => Ok(Some(inner.load_record(&record, &weak)?)),
            None => Ok(None),
        }
    }

    /// Discard the session's view of an entity and load a fresh instance
    /// from the remote node.
    pub fn reload(&self, entity: &Entity) -> Result<Entity> {
        let id = entity.key().ok_or_else(|| {
            UmbraError::mapping(entity.class(), "cannot reload an entity that was never persisted")
        })?;
        let weak = Rc::downgrade(&self.inner);
        let mut inner = self.inner.borrow_mut();
        let record = inner
            .client
            .get_node(id)?
            .ok_or_else(|| UmbraError::write("reload", format!("node {id} is gone")))?;
        inner.identity.remove(&id);
        inner.load_record(&record, &weak)
    }

    /// Empty the identity map. Later loads build fresh instances; there
    /// is no identity guarantee across this boundary. Pending sets are
    /// not touched.
    pub fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        let evicted = inner.identity.len();
        inner.identity.clear();
        debug!(evicted, "identity map cleared");
    }

    /// Number of entities staged for persist and for removal.
    pub fn pending(&self) -> (usize, usize) {
        let inner = self.inner.borrow();
        (inner.pending_persist.len(), inner.pending_remove.len())
    }

    /// Subscribe an event listener; see [`crate::events`].
    pub fn subscribe(&self, listener: Box<dyn EventListener>) {
        self.inner.borrow_mut().listeners.push(listener);
    }

    /// Replace the timestamp source used for `creationDate`/`updateDate`
    /// values. Intended for tests and clock control.
    pub fn set_clock(&self, clock: Box<dyn FnMut() -> String>) {
        self.inner.borrow_mut().clock = clock;
    }

    /// Execute a raw statement through the port, emitting statement
    /// events around the call. Failures surface as query errors carrying
    /// the offending statement.
    pub fn execute(
        &self,
        statement: &str,
        parameters: &[(String, PropertyValue)],
    ) -> Result<Vec<Row>> {
        let started = Instant::now();
        let mut inner = self.inner.borrow_mut();
        inner.emit(&Event::PreStatementExecute {
            statement: statement.to_string(),
            parameters: parameters.to_vec(),
        });
        match inner.client.execute(statement, parameters) {
            Ok(rows) => {
                let elapsed = started.elapsed();
                debug!(statement, rows = rows.len(), ?elapsed, "statement executed");
                inner.emit(&Event::PostStatementExecute {
                    statement: statement.to_string(),
                    parameters: parameters.to_vec(),
                    elapsed,
                });
                Ok(rows)
            }
            Err(error) => {
                warn!(statement, error = %error, "statement execution failed");
                Err(match error {
                    query @ UmbraError::Query { .. } => query,
                    other => UmbraError::Query {
                        statement: statement.to_string(),
                        message: other.to_string(),
                    },
                })
            }
        }
    }
}
