//! The unit-of-work flush pipeline.
//!
//! `flush` drains the pending sets in five ordered steps: fixed-point
//! discovery of the reachable writable subgraph, a node write batch, a
//! relation-diff batch, an index batch, then removals. Nodes must exist
//! before relations can reference them, and removals run last so an
//! entity removed and re-persisted in the same cycle is not destroyed
//! mid-pipeline. Each batch commits independently on the remote side;
//! the pipeline as a whole is not atomic. On any port failure the flush
//! aborts immediately and the pending sets are left intact — a re-flush
//! is idempotent for the steps that already committed (ids are only
//! assigned once, duplicate edges are checked before creation).

use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::rc::Weak;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::client::{GraphClient, IndexKind};
use crate::entity::{Entity, EntityKey};
use crate::error::{Result, UmbraError};
use crate::events::Event;
use crate::meta::Direction;
use crate::model::{
    NodeId, PropertyValue, RelationshipRecord, CLASS_PROPERTY, CREATION_DATE_PROPERTY,
    UPDATE_DATE_PROPERTY,
};
use crate::session::SessionInner;

/// Per-flush cache of each owning node's existing relationships, fetched
/// at most once per node and kept in sync with the deletions and
/// creations this flush performs.
type EdgeCache = FxHashMap<NodeId, Vec<RelationshipRecord>>;

fn cached_edges<'a>(
    client: &mut dyn GraphClient,
    cache: &'a mut EdgeCache,
    node: NodeId,
) -> Result<&'a Vec<RelationshipRecord>> {
    match cache.entry(node) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => Ok(entry.insert(client.list_relationships(node)?)),
    }
}

/// The far endpoint of an edge owned by `owner` under `direction`, or
/// `None` if the record is not such an edge.
fn owned_far_endpoint(
    record: &RelationshipRecord,
    owner: NodeId,
    type_name: &str,
    direction: Direction,
) -> Option<NodeId> {
    if record.type_name != type_name {
        return None;
    }
    match direction {
        Direction::From => (record.from == owner).then_some(record.to),
        Direction::To => (record.to == owner).then_some(record.from),
    }
}

impl SessionInner {
    pub(crate) fn flush(&mut self, weak: &Weak<RefCell<SessionInner>>) -> Result<()> {
        debug!(
            persist = self.pending_persist.len(),
            remove = self.pending_remove.len(),
            "flush started"
        );
        self.discover()?;

        let timestamp = (self.clock)();
        let mut nodes: FxHashMap<EntityKey, NodeId> = FxHashMap::default();
        self.write_nodes(weak, &timestamp, &mut nodes)?;
        self.write_relations(&timestamp, &nodes)?;
        self.write_indexes(&nodes)?;
        self.remove_entities()?;

        self.pending_persist.clear();
        self.pending_remove.clear();
        debug!("flush completed");
        Ok(())
    }

    /// Fixed-point pass over the to-persist set: every traversed
    /// relation of a staged entity stages its targets too. Entities
    /// already staged are no-ops, so cycles terminate.
    fn discover(&mut self) -> Result<()> {
        loop {
            let before = self.pending_persist.len();
            for entity in self.pending_persist.entities() {
                let meta = entity.meta();
                for relation in meta.many_to_many().iter().filter(|r| r.is_traversed()) {
                    for member in entity.peek_many(relation.name()) {
                        self.enlist_persist(&member)?;
                    }
                }
                for relation in meta.many_to_one().iter().filter(|r| r.is_traversed()) {
                    if let Some(target) = entity.peek_one(relation.name()) {
                        self.enlist_persist(&target)?;
                    }
                }
            }
            if self.pending_persist.len() == before {
                break;
            }
        }
        debug!(reachable = self.pending_persist.len(), "discovery complete");
        Ok(())
    }

    fn write_nodes(
        &mut self,
        weak: &Weak<RefCell<SessionInner>>,
        timestamp: &str,
        nodes: &mut FxHashMap<EntityKey, NodeId>,
    ) -> Result<()> {
        self.client.start_batch()?;
        let mut operations = 0usize;
        let mut created: Vec<(Entity, NodeId)> = Vec::new();

        for entity in self.pending_persist.entities() {
            self.emit(&Event::PrePersistNode {
                entity: entity.clone(),
            });
            let meta = entity.meta();
            let id = match entity.key() {
                Some(id) => {
                    self.client.get_node(id)?.ok_or_else(|| {
                        UmbraError::write("nodes", format!("node {id} is gone from the remote store"))
                    })?;
                    id
                }
                None => {
                    let id = self.client.create_node()?;
                    self.client
                        .set_property(id, CLASS_PROPERTY, PropertyValue::from(meta.class()))?;
                    self.client.set_property(
                        id,
                        CREATION_DATE_PROPERTY,
                        PropertyValue::from(timestamp),
                    )?;
                    operations += 3;
                    created.push((entity.clone(), id));
                    id
                }
            };

            for property in meta.properties() {
                if let Some(value) = entity.peek_property(property.name()) {
                    self.client.set_property(id, property.name(), value)?;
                    operations += 1;
                }
            }
            self.client
                .set_property(id, UPDATE_DATE_PROPERTY, PropertyValue::from(timestamp))?;
            operations += 1;
            nodes.insert(entity.entity_key(), id);
        }

        if operations > 0 {
            self.client.commit_batch()?;
        } else {
            self.client.end_batch()?;
        }

        for (entity, id) in &created {
            entity.set_key(*id);
            entity.bind(weak.clone(), *id);
            self.identity.insert(*id, entity.clone());
            debug!(node_id = id, class = %entity.class(), "node created for entity");
        }
        for entity in self.pending_persist.entities() {
            self.emit(&Event::PostPersistNode { entity });
        }
        Ok(())
    }

    fn write_relations(
        &mut self,
        timestamp: &str,
        nodes: &FxHashMap<EntityKey, NodeId>,
    ) -> Result<()> {
        self.client.start_batch()?;
        let mut operations = 0usize;
        let mut edges = EdgeCache::default();
        // The cache above is keyed by owning node and does not expose an
        // edge under its far endpoint's key; this set tracks the physical
        // identity of edges created this flush, so a mirrored relation on
        // the other endpoint resolves to the same edge.
        let mut fresh_edges: FxHashSet<(NodeId, NodeId, String)> = FxHashSet::default();
        // Removal tracking is reset only once its deletions committed.
        let mut applied_removals: Vec<(Entity, String)> = Vec::new();

        for entity in self.pending_persist.entities() {
            let meta = entity.meta();
            let Some(&owner) = nodes.get(&entity.entity_key()) else {
                return Err(UmbraError::write(
                    "relations",
                    format!("entity `{}` has no written node", meta.class()),
                ));
            };

            for relation in meta.many_to_one().iter().filter(|r| r.is_traversed()) {
                // An unhydrated field was never read or written locally;
                // there is no intent to diff against the stored edges.
                if !entity.is_hydrated(relation.name()) {
                    continue;
                }
                let target = entity.peek_one(relation.name());
                let target_id = match &target {
                    Some(target) => Some(resolve_node(target, nodes, relation.name())?),
                    None => None,
                };

                // Singular replace: any existing edge of this type that
                // does not point at the new target goes away first.
                let stale: Vec<(u64, NodeId)> =
                    cached_edges(self.client.as_mut(), &mut edges, owner)?
                        .iter()
                        .filter_map(|record| {
                            owned_far_endpoint(
                                record,
                                owner,
                                relation.name(),
                                relation.edge_direction(),
                            )
                            .map(|far| (record.id, far))
                        })
                        .filter(|(_, far)| Some(*far) != target_id)
                        .collect();
                for (edge_id, far) in stale {
                    self.emit(&Event::PreRelationRemove {
                        relation: relation.name().to_string(),
                        from: entity.clone(),
                        target: far,
                    });
                    self.client.delete_relationship(edge_id)?;
                    operations += 1;
                    if let Some(list) = edges.get_mut(&owner) {
                        list.retain(|record| record.id != edge_id);
                    }
                    debug!(relation = relation.name(), target = far, "stale edge removed");
                    self.emit(&Event::PostRelationRemove {
                        relation: relation.name().to_string(),
                        from: entity.clone(),
                        target: far,
                    });
                }

                if let (Some(target), Some(target_id)) = (target, target_id) {
                    operations += self.ensure_edge(
                        &mut edges,
                        &mut fresh_edges,
                        &entity,
                        &target,
                        owner,
                        target_id,
                        relation.name(),
                        relation.edge_direction(),
                        timestamp,
                    )?;
                }
            }

            for relation in meta.many_to_many().iter().filter(|r| r.is_traversed()) {
                if !entity.is_hydrated(relation.name()) {
                    continue;
                }
                for member in entity.peek_many(relation.name()) {
                    let target_id = resolve_node(&member, nodes, relation.name())?;
                    operations += self.ensure_edge(
                        &mut edges,
                        &mut fresh_edges,
                        &entity,
                        &member,
                        owner,
                        target_id,
                        relation.name(),
                        relation.edge_direction(),
                        timestamp,
                    )?;
                }

                let removed = entity.removed_from(relation.name());
                if removed.is_empty() {
                    continue;
                }
                for member in removed {
                    // Never-persisted members have no remote edge.
                    let Some(target_id) = member.key() else { continue };
                    let matching: Vec<u64> =
                        cached_edges(self.client.as_mut(), &mut edges, owner)?
                            .iter()
                            .filter_map(|record| {
                                owned_far_endpoint(
                                    record,
                                    owner,
                                    relation.name(),
                                    relation.edge_direction(),
                                )
                                .filter(|far| *far == target_id)
                                .map(|_| record.id)
                            })
                            .collect();
                    for edge_id in matching {
                        self.emit(&Event::PreRelationRemove {
                            relation: relation.name().to_string(),
                            from: entity.clone(),
                            target: target_id,
                        });
                        self.client.delete_relationship(edge_id)?;
                        operations += 1;
                        if let Some(list) = edges.get_mut(&owner) {
                            list.retain(|record| record.id != edge_id);
                        }
                        self.emit(&Event::PostRelationRemove {
                            relation: relation.name().to_string(),
                            from: entity.clone(),
                            target: target_id,
                        });
                    }
                }
                applied_removals.push((entity.clone(), relation.name().to_string()));
            }
        }

        if operations > 0 {
            self.client.commit_batch()?;
        } else {
            self.client.end_batch()?;
        }
        for (entity, relation) in applied_removals {
            entity.clear_removed(&relation);
        }
        Ok(())
    }

    /// Create the edge `owner --relation--> target` (oriented per the
    /// relation's direction) unless the owner already has one, which is
    /// what keeps repeated flushes from duplicating edges. Returns the
    /// number of port operations performed.
    #[allow(clippy::too_many_arguments)]
    fn ensure_edge(
        &mut self,
        edges: &mut EdgeCache,
        fresh_edges: &mut FxHashSet<(NodeId, NodeId, String)>,
        entity: &Entity,
        target: &Entity,
        owner: NodeId,
        target_id: NodeId,
        relation: &str,
        direction: Direction,
        timestamp: &str,
    ) -> Result<usize> {
        let (from_id, to_id) = match direction {
            Direction::From => (owner, target_id),
            Direction::To => (target_id, owner),
        };
        if fresh_edges.contains(&(from_id, to_id, relation.to_string())) {
            return Ok(0);
        }
        let present = cached_edges(self.client.as_mut(), edges, owner)?
            .iter()
            .any(|record| {
                owned_far_endpoint(record, owner, relation, direction) == Some(target_id)
            });
        if present {
            return Ok(0);
        }

        self.emit(&Event::PreRelationCreate {
            relation: relation.to_string(),
            from: entity.clone(),
            to: target.clone(),
        });
        let edge_id = self.client.create_relationship(from_id, to_id, relation)?;
        self.client.set_relationship_property(
            edge_id,
            CREATION_DATE_PROPERTY,
            PropertyValue::from(timestamp),
        )?;
        edges.entry(owner).or_default().push(RelationshipRecord {
            id: edge_id,
            type_name: relation.to_string(),
            from: from_id,
            to: to_id,
        });
        fresh_edges.insert((from_id, to_id, relation.to_string()));
        debug!(relation, from = from_id, to = to_id, "edge created");
        self.emit(&Event::PostRelationCreate {
            relation: relation.to_string(),
            from: entity.clone(),
            to: target.clone(),
        });
        Ok(2)
    }

    fn write_indexes(&mut self, nodes: &FxHashMap<EntityKey, NodeId>) -> Result<()> {
        self.client.start_batch()?;
        let mut operations = 0usize;

        for entity in self.pending_persist.entities() {
            let meta = entity.meta();
            let Some(&id) = nodes.get(&entity.entity_key()) else {
                return Err(UmbraError::write(
                    "indexes",
                    format!("entity `{}` has no written node", meta.class()),
                ));
            };
            let class = meta.class().to_string();

            if self.indexes_created.insert(class.clone()) {
                self.client.create_index(&class, IndexKind::Exact)?;
                operations += 1;
            }

            // Remove-then-add keeps one entry per key, reflecting value
            // changes instead of accumulating them.
            for property in meta.indexed_properties() {
                self.client.index_remove(&class, id, Some(property.name()))?;
                operations += 1;
                if let Some(value) = entity.peek_property(property.name()) {
                    self.client.index_add(&class, id, property.name(), value)?;
                    operations += 1;
                }
            }

            self.client.index_remove(&class, id, Some(CLASS_PROPERTY))?;
            self.client
                .index_add(&class, id, CLASS_PROPERTY, PropertyValue::from(class.as_str()))?;
            operations += 2;
        }

        if operations > 0 {
            self.client.commit_batch()?;
        } else {
            self.client.end_batch()?;
        }
        Ok(())
    }

    fn remove_entities(&mut self) -> Result<()> {
        for entity in self.pending_remove.entities() {
            // Entities that never reached the store have nothing remote.
            let Some(id) = entity.key() else { continue };
            self.emit(&Event::PreRemoveNode {
                entity: entity.clone(),
            });
            let class = entity.class();
            self.client.index_remove(&class, id, None)?;
            for record in self.client.list_relationships(id)? {
                self.client.delete_relationship(record.id)?;
            }
            self.client.delete_node(id)?;
            self.identity.remove(&id);
            debug!(node_id = id, class = %class, "entity removed");
            self.emit(&Event::PostRemoveNode { entity });
        }
        Ok(())
    }
}

/// The node id a relation target resolves to: assigned this flush, or
/// already persistent from an earlier one.
fn resolve_node(
    target: &Entity,
    nodes: &FxHashMap<EntityKey, NodeId>,
    relation: &str,
) -> Result<NodeId> {
    nodes
        .get(&target.entity_key())
        .copied()
        .or_else(|| target.key())
        .ok_or_else(|| {
            UmbraError::write(
                "relations",
                format!("target of relation `{relation}` has no node id"),
            )
        })
}
