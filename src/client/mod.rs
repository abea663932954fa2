//! The graph-client port.
//!
//! Everything the engine knows about the remote store goes through
//! [`GraphClient`]: a synchronous request/response surface for node,
//! relationship and index maintenance, plus batch markers delimiting
//! server-side atomic groups. Transport, authentication and retry policy
//! live behind implementations of this trait, never in the engine.

pub mod memory;

use crate::error::{Result, UmbraError};
use crate::model::{NodeId, NodeRecord, PropertyValue, RelationshipId, RelationshipRecord};

pub use memory::MemoryGraph;

/// Kind of a named server-side index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Exact-match lookup index.
    Exact,
    /// Fulltext index.
    Fulltext,
}

/// One cell of a statement-result row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// A bare scalar value.
    Value(PropertyValue),
    /// A full node snapshot, convertible to an entity via `Session::load`.
    Node(NodeRecord),
}

/// One row of a statement result.
pub type Row = Vec<Cell>;

/// Synchronous port to the remote graph store.
///
/// Every call blocks until the remote response arrives. Duplicate-edge
/// avoidance is the engine's responsibility; implementations create
/// whatever they are asked to create.
pub trait GraphClient {
    /// Create an empty node and return its id.
    fn create_node(&mut self) -> Result<NodeId>;

    /// Fetch a node snapshot, or `None` if the id is unknown.
    fn get_node(&mut self, id: NodeId) -> Result<Option<NodeRecord>>;

    /// Set one property on a node.
    fn set_property(&mut self, id: NodeId, key: &str, value: PropertyValue) -> Result<()>;

    /// Delete a node. Incident relationships must be deleted first.
    fn delete_node(&mut self, id: NodeId) -> Result<()>;

    /// Create a directed, typed relationship and return its id.
    fn create_relationship(
        &mut self,
        from: NodeId,
        to: NodeId,
        type_name: &str,
    ) -> Result<RelationshipId>;

    /// Set one property on a relationship.
    fn set_relationship_property(
        &mut self,
        id: RelationshipId,
        key: &str,
        value: PropertyValue,
    ) -> Result<()>;

    /// Delete a relationship.
    fn delete_relationship(&mut self, id: RelationshipId) -> Result<()>;

    /// List every relationship incident to a node, inbound and outbound.
    fn list_relationships(&mut self, id: NodeId) -> Result<Vec<RelationshipRecord>>;

    /// Create a named index if it does not exist yet.
    fn create_index(&mut self, name: &str, kind: IndexKind) -> Result<()>;

    /// Add an index entry for a node under `key`/`value`.
    fn index_add(&mut self, name: &str, id: NodeId, key: &str, value: PropertyValue)
        -> Result<()>;

    /// Remove index entries for a node: those under `key`, or all of the
    /// node's entries when `key` is `None`.
    fn index_remove(&mut self, name: &str, id: NodeId, key: Option<&str>) -> Result<()>;

    /// Query an index for node ids matching `key`/`value`.
    fn index_query(
        &mut self,
        name: &str,
        key: &str,
        value: &PropertyValue,
    ) -> Result<Vec<NodeId>>;

    /// Open a server-side write batch.
    fn start_batch(&mut self) -> Result<()>;

    /// Commit the open batch atomically.
    fn commit_batch(&mut self) -> Result<()>;

    /// Discard the open batch without committing (used when it holds no
    /// operations).
    fn end_batch(&mut self) -> Result<()>;

    /// Execute a raw statement against the store.
    ///
    /// Consumed by the external query builders; the engine only wraps
    /// failures and emits statement events around the call.
    fn execute(&mut self, statement: &str, _params: &[(String, PropertyValue)]) -> Result<Vec<Row>> {
        Err(UmbraError::Query {
            statement: statement.to_string(),
            message: "statement execution is not supported by this client".to_string(),
        })
    }
}
