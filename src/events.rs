//! Ordered notification points around engine writes.
//!
//! Listeners are pure observers: they receive the affected entities and
//! relation names but must not call back into the session, which stays
//! borrowed for the duration of the emitting operation. With no listener
//! subscribed, emission is a no-op.

use std::time::Duration;

use crate::entity::Entity;
use crate::model::{NodeId, PropertyValue};

/// Notification payloads emitted by the engine.
#[derive(Debug, Clone)]
pub enum Event {
    /// About to write an entity's node (create or update).
    PrePersistNode {
        /// The entity being written.
        entity: Entity,
    },
    /// The node batch containing this entity committed.
    PostPersistNode {
        /// The entity that was written.
        entity: Entity,
    },
    /// About to delete an entity's node and its incident state.
    PreRemoveNode {
        /// The entity being removed.
        entity: Entity,
    },
    /// The entity's node was deleted.
    PostRemoveNode {
        /// The entity that was removed.
        entity: Entity,
    },
    /// About to create a relationship.
    PreRelationCreate {
        /// Relation (edge type) name.
        relation: String,
        /// Owning entity.
        from: Entity,
        /// Related entity.
        to: Entity,
    },
    /// A relationship was created.
    PostRelationCreate {
        /// Relation (edge type) name.
        relation: String,
        /// Owning entity.
        from: Entity,
        /// Related entity.
        to: Entity,
    },
    /// About to delete a relationship during relation diffing.
    PreRelationRemove {
        /// Relation (edge type) name.
        relation: String,
        /// Owning entity.
        from: Entity,
        /// Far endpoint of the edge being deleted.
        target: NodeId,
    },
    /// A relationship was deleted during relation diffing.
    PostRelationRemove {
        /// Relation (edge type) name.
        relation: String,
        /// Owning entity.
        from: Entity,
        /// Far endpoint of the deleted edge.
        target: NodeId,
    },
    /// About to execute a raw statement.
    PreStatementExecute {
        /// Statement text.
        statement: String,
        /// Statement parameters.
        parameters: Vec<(String, PropertyValue)>,
    },
    /// A raw statement executed successfully.
    PostStatementExecute {
        /// Statement text.
        statement: String,
        /// Statement parameters.
        parameters: Vec<(String, PropertyValue)>,
        /// Wall-clock time the remote call took.
        elapsed: Duration,
    },
}

/// Receiver for engine events; subscribe via `Session::subscribe`.
pub trait EventListener {
    /// Called synchronously, in emission order.
    fn on_event(&mut self, event: &Event);
}

impl<F: FnMut(&Event)> EventListener for F {
    fn on_event(&mut self, event: &Event) {
        self(event)
    }
}
