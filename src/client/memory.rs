//! In-memory [`GraphClient`] implementation.
//!
//! Reference backend for the port: the whole store lives in a shared,
//! cheaply clonable handle so tests can keep one clone for inspection
//! while the session owns another. Supports fault injection to exercise
//! mid-pipeline failure behavior.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::debug;

use crate::client::{Cell, GraphClient, IndexKind, Row};
use crate::error::{Result, UmbraError};
use crate::model::{NodeId, NodeRecord, PropertyValue, RelationshipId, RelationshipRecord};

#[derive(Debug)]
struct StoredRelationship {
    record: RelationshipRecord,
    properties: BTreeMap<String, PropertyValue>,
}

#[derive(Debug)]
struct IndexState {
    kind: IndexKind,
    entries: Vec<(NodeId, String, PropertyValue)>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_node_id: NodeId,
    next_relationship_id: RelationshipId,
    nodes: BTreeMap<NodeId, BTreeMap<String, PropertyValue>>,
    relationships: BTreeMap<RelationshipId, StoredRelationship>,
    indexes: BTreeMap<String, IndexState>,
    batch_open: bool,
    writes: usize,
    fail_after_writes: Option<usize>,
}

impl MemoryState {
    fn check_fault(&mut self, step: &'static str) -> Result<()> {
        self.writes += 1;
        if let Some(limit) = self.fail_after_writes {
            if self.writes > limit {
                return Err(UmbraError::write(step, "injected remote fault"));
            }
        }
        Ok(())
    }
}

/// In-memory graph store behind a clonable handle.
#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    state: Rc<RefCell<MemoryState>>,
}

impl MemoryGraph {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every mutating call after the first `limit` have succeeded.
    pub fn fail_after_writes(&self, limit: usize) {
        let mut state = self.state.borrow_mut();
        state.writes = 0;
        state.fail_after_writes = Some(limit);
    }

    /// Lift any injected fault.
    pub fn clear_fault(&self) {
        self.state.borrow_mut().fail_after_writes = None;
    }

    /// Number of stored nodes.
    pub fn node_count(&self) -> usize {
        self.state.borrow().nodes.len()
    }

    /// Number of stored relationships.
    pub fn relationship_count(&self) -> usize {
        self.state.borrow().relationships.len()
    }

    /// Number of `type_name` relationships from `from` to `to`.
    pub fn relationships_between(&self, from: NodeId, to: NodeId, type_name: &str) -> usize {
        self.state
            .borrow()
            .relationships
            .values()
            .filter(|r| {
                r.record.from == from && r.record.to == to && r.record.type_name == type_name
            })
            .count()
    }

    /// One node property, if the node and property exist.
    pub fn node_property(&self, id: NodeId, key: &str) -> Option<PropertyValue> {
        self.state
            .borrow()
            .nodes
            .get(&id)
            .and_then(|props| props.get(key).cloned())
    }

    /// One relationship property, if present.
    pub fn relationship_property(&self, id: RelationshipId, key: &str) -> Option<PropertyValue> {
        self.state
            .borrow()
            .relationships
            .get(&id)
            .and_then(|r| r.properties.get(key).cloned())
    }

    /// The kind a named index was created with, if it exists.
    pub fn index_kind(&self, name: &str) -> Option<IndexKind> {
        self.state.borrow().indexes.get(name).map(|index| index.kind)
    }

    /// All entries of a named index.
    pub fn index_entries(&self, name: &str) -> Vec<(NodeId, String, PropertyValue)> {
        self.state
            .borrow()
            .indexes
            .get(name)
            .map(|index| index.entries.clone())
            .unwrap_or_default()
    }
}

impl GraphClient for MemoryGraph {
    fn create_node(&mut self) -> Result<NodeId> {
        let mut state = self.state.borrow_mut();
        state.check_fault("create_node")?;
        state.next_node_id += 1;
        let id = state.next_node_id;
        state.nodes.insert(id, BTreeMap::new());
        debug!(node_id = id, "node created");
        Ok(id)
    }

    fn get_node(&mut self, id: NodeId) -> Result<Option<NodeRecord>> {
        let state = self.state.borrow();
        Ok(state.nodes.get(&id).map(|props| NodeRecord {
            id,
            properties: props.clone(),
        }))
    }

    fn set_property(&mut self, id: NodeId, key: &str, value: PropertyValue) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check_fault("set_property")?;
        let props = state
            .nodes
            .get_mut(&id)
            .ok_or_else(|| UmbraError::write("set_property", format!("unknown node {id}")))?;
        props.insert(key.to_string(), value);
        Ok(())
    }

    fn delete_node(&mut self, id: NodeId) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check_fault("delete_node")?;
        let incident = state
            .relationships
            .values()
            .any(|r| r.record.from == id || r.record.to == id);
        if incident {
            return Err(UmbraError::write(
                "delete_node",
                format!("node {id} still has relationships"),
            ));
        }
        state
            .nodes
            .remove(&id)
            .ok_or_else(|| UmbraError::write("delete_node", format!("unknown node {id}")))?;
        debug!(node_id = id, "node deleted");
        Ok(())
    }

    fn create_relationship(
        &mut self,
        from: NodeId,
        to: NodeId,
        type_name: &str,
    ) -> Result<RelationshipId> {
        let mut state = self.state.borrow_mut();
        state.check_fault("create_relationship")?;
        for endpoint in [from, to] {
            if !state.nodes.contains_key(&endpoint) {
                return Err(UmbraError::write(
                    "create_relationship",
                    format!("unknown node {endpoint}"),
                ));
            }
        }
        state.next_relationship_id += 1;
        let id = state.next_relationship_id;
        state.relationships.insert(
            id,
            StoredRelationship {
                record: RelationshipRecord {
                    id,
                    type_name: type_name.to_string(),
                    from,
                    to,
                },
                properties: BTreeMap::new(),
            },
        );
        debug!(relationship_id = id, from, to, type_name, "relationship created");
        Ok(id)
    }

    fn set_relationship_property(
        &mut self,
        id: RelationshipId,
        key: &str,
        value: PropertyValue,
    ) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check_fault("set_relationship_property")?;
        let relationship = state.relationships.get_mut(&id).ok_or_else(|| {
            UmbraError::write(
                "set_relationship_property",
                format!("unknown relationship {id}"),
            )
        })?;
        relationship.properties.insert(key.to_string(), value);
        Ok(())
    }

    fn delete_relationship(&mut self, id: RelationshipId) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check_fault("delete_relationship")?;
        state.relationships.remove(&id).ok_or_else(|| {
            UmbraError::write("delete_relationship", format!("unknown relationship {id}"))
        })?;
        debug!(relationship_id = id, "relationship deleted");
        Ok(())
    }

    fn list_relationships(&mut self, id: NodeId) -> Result<Vec<RelationshipRecord>> {
        let state = self.state.borrow();
        Ok(state
            .relationships
            .values()
            .filter(|r| r.record.from == id || r.record.to == id)
            .map(|r| r.record.clone())
            .collect())
    }

    fn create_index(&mut self, name: &str, kind: IndexKind) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check_fault("create_index")?;
        state.indexes.entry(name.to_string()).or_insert(IndexState {
            kind,
            entries: Vec::new(),
        });
        Ok(())
    }

    fn index_add(
        &mut self,
        name: &str,
        id: NodeId,
        key: &str,
        value: PropertyValue,
    ) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check_fault("index_add")?;
        let index = state
            .indexes
            .get_mut(name)
            .ok_or_else(|| UmbraError::write("index_add", format!("unknown index `{name}`")))?;
        index.entries.push((id, key.to_string(), value));
        Ok(())
    }

    fn index_remove(&mut self, name: &str, id: NodeId, key: Option<&str>) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check_fault("index_remove")?;
        if let Some(index) = state.indexes.get_mut(name) {
            index
                .entries
                .retain(|(entry_id, entry_key, _)| {
                    *entry_id != id || key.is_some_and(|k| k != entry_key)
                });
        }
        Ok(())
    }

    fn index_query(
        &mut self,
        name: &str,
        key: &str,
        value: &PropertyValue,
    ) -> Result<Vec<NodeId>> {
        let state = self.state.borrow();
        Ok(state
            .indexes
            .get(name)
            .map(|index| {
                index
                    .entries
                    .iter()
                    .filter(|(_, k, v)| k == key && v == value)
                    .map(|(id, _, _)| *id)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn start_batch(&mut self) -> Result<()> {
        self.state.borrow_mut().batch_open = true;
        Ok(())
    }

    fn commit_batch(&mut self) -> Result<()> {
        self.state.borrow_mut().batch_open = false;
        Ok(())
    }

    fn end_batch(&mut self) -> Result<()> {
        self.state.borrow_mut().batch_open = false;
        Ok(())
    }

    /// Minimal statement surface: `node` with an `id` parameter returns
    /// that node as a one-cell row. Everything else fails, mirroring a
    /// remote rejecting an unknown statement.
    fn execute(&mut self, statement: &str, params: &[(String, PropertyValue)]) -> Result<Vec<Row>> {
        if statement == "node" {
            let id = params
                .iter()
                .find(|(name, _)| name == "id")
                .and_then(|(_, value)| value.as_int())
                .ok_or_else(|| UmbraError::Query {
                    statement: statement.to_string(),
                    message: "missing integer parameter `id`".to_string(),
                })?;
            let id = NodeId::try_from(id).map_err(|_| UmbraError::Query {
                statement: statement.to_string(),
                message: format!("invalid node id {id}"),
            })?;
            let record = self.get_node(id)?.ok_or_else(|| UmbraError::Query {
                statement: statement.to_string(),
                message: format!("no node {id}"),
            })?;
            return Ok(vec![vec![Cell::Node(record)]]);
        }
        Err(UmbraError::Query {
            statement: statement.to_string(),
            message: "unknown statement".to_string(),
        })
    }
}
