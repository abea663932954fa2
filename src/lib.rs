//! umbra: an object-graph mapper for remote property-graph stores.
//!
//! The crate maps typed in-memory entities onto nodes and relationships
//! behind a synchronous [`client::GraphClient`] port. A [`Session`] is
//! the working context: it keeps an identity map (one live instance per
//! remote node), hydrates relation fields of loaded entities lazily, and
//! stages writes in a unit of work that a single `flush` call drains in
//! ordered batches with relation diffing and index maintenance.
//!
//! ```no_run
//! use std::sync::Arc;
//! use umbra::meta::{EntityMeta, MetaRegistry, PropertyMeta, RelationMeta};
//! use umbra::{Entity, Session};
//!
//! # fn open_client() -> Box<dyn umbra::client::GraphClient> { unimplemented!() }
//! # fn main() -> umbra::Result<()> {
//! let mut registry = MetaRegistry::new();
//! let movie = registry.register(
//!     EntityMeta::builder("Movie")
//!         .primary_key("id")
//!         .property(PropertyMeta::new("title").indexed())
//!         .many_to_many(RelationMeta::new("actor"))
//!         .build()?,
//! );
//!
//! let session = Session::new(open_client(), Arc::new(registry));
//! let entity = Entity::new(&movie);
//! entity.set("title", "Cube")?;
//! session.persist(&entity)?;
//! session.flush()?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod entity;
pub mod error;
pub mod events;
pub mod meta;
pub mod model;
pub mod session;

pub use entity::{DetachedEntity, Entity};
pub use error::{Result, UmbraError};
pub use session::Session;
