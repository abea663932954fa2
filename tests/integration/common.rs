#![allow(dead_code)]

use std::sync::Arc;

use umbra::client::MemoryGraph;
use umbra::meta::{EntityMeta, MetaRegistry, PropertyMeta, RelationMeta};
use umbra::Session;

/// Movie/Person model: the movie owns an indexed title, a singular
/// `director` relation and an `actor` collection.
pub fn registry() -> Arc<MetaRegistry> {
    let mut registry = MetaRegistry::new();
    registry.register(
        EntityMeta::builder("Movie")
            .primary_key("id")
            .property(PropertyMeta::new("title").indexed())
            .property(PropertyMeta::new("year"))
            .many_to_one(RelationMeta::new("director"))
            .many_to_many(RelationMeta::new("actor"))
            .build()
            .expect("movie meta"),
    );
    registry.register(
        EntityMeta::builder("Person")
            .primary_key("id")
            .property(PropertyMeta::new("name"))
            .build()
            .expect("person meta"),
    );
    Arc::new(registry)
}

/// Session over a fresh in-memory store, with a handle kept for
/// inspecting what actually landed remotely.
pub fn session() -> (Session, MemoryGraph) {
    init_tracing();
    session_with(registry())
}

/// Route engine traces to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn session_with(registry: Arc<MetaRegistry>) -> (Session, MemoryGraph) {
    let graph = MemoryGraph::new();
    let session = Session::new(Box::new(graph.clone()), registry);
    (session, graph)
}

/// Pin the session's timestamp source to a constant.
pub fn fixed_clock(session: &Session, stamp: &str) {
    let stamp = stamp.to_string();
    session.set_clock(Box::new(move || stamp.clone()));
}
