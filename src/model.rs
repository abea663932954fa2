//! Wire-level records and property values exchanged with the port,
//! plus the reserved property names the engine maintains on every node.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identifier of a remote node.
pub type NodeId = u64;
/// Identifier of a remote relationship.
pub type RelationshipId = u64;

/// Reserved node property naming the entity type of a node.
pub const CLASS_PROPERTY: &str = "class";
/// Reserved property set once, when a node or relationship is first created.
pub const CREATION_DATE_PROPERTY: &str = "creationDate";
/// Reserved node property rewritten on every write that touches the node.
pub const UPDATE_DATE_PROPERTY: &str = "updateDate";

/// A scalar or structured property value as stored on the remote graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// UTF-8 string value.
    String(String),
    /// Ordered list of values.
    List(Vec<PropertyValue>),
}

impl PropertyValue {
    /// The string payload, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// The integer payload, if this is an integer value.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int(i64::from(value))
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<Vec<PropertyValue>> for PropertyValue {
    fn from(value: Vec<PropertyValue>) -> Self {
        PropertyValue::List(value)
    }
}

/// Snapshot of a remote node as returned by the graph-client port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Remote node id.
    pub id: NodeId,
    /// Flat property bag, including the reserved properties.
    pub properties: BTreeMap<String, PropertyValue>,
}

impl NodeRecord {
    /// Empty record for the given id.
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            properties: BTreeMap::new(),
        }
    }

    /// A property by name, if present.
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// The entity-type discriminator, if the node carries one.
    pub fn class(&self) -> Option<&str> {
        self.properties.get(CLASS_PROPERTY).and_then(|v| v.as_str())
    }
}

/// One entry of a node's relationship listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    /// Remote relationship id.
    pub id: RelationshipId,
    /// Relation type name.
    pub type_name: String,
    /// Source node id.
    pub from: NodeId,
    /// Target node id.
    pub to: NodeId,
}
