mod common;

use umbra::{Entity, Result};

#[test]
fn removal_deletes_node_edges_and_index_entries() -> Result<()> {
    let (session, graph) = common::session();
    let registry = common::registry();
    let movie = Entity::new(&registry.get("Movie")?);
    movie.set("title", "Cube")?;
    let actor = Entity::new(&registry.get("Person")?);
    actor.set("name", "Hewlett")?;
    movie.push("actor", actor.clone())?;
    session.persist(&movie)?;
    session.flush()?;
    let movie_id = movie.key().expect("movie key");

    session.remove(&movie)?;
    session.flush()?;

    assert!(session.find_any(movie_id)?.is_none(), "node must be gone");
    assert_eq!(graph.relationship_count(), 0, "incident edges must be gone");
    assert!(
        !graph
            .index_entries("Movie")
            .iter()
            .any(|(id, _, _)| *id == movie_id),
        "index entries must be gone"
    );

    // The unrelated endpoint survives.
    let actor_id = actor.key().expect("actor key");
    assert!(session.find_any(actor_id)?.is_some());
    Ok(())
}

#[test]
fn removing_a_never_persisted_entity_is_a_no_op() -> Result<()> {
    let (session, graph) = common::session();
    let movie = Entity::new(&common::registry().get("Movie")?);
    session.remove(&movie)?;
    session.flush()?;
    assert_eq!(graph.node_count(), 0);
    Ok(())
}

#[test]
fn removed_node_is_evicted_from_the_identity_map() -> Result<()> {
    let (session, graph) = common::session();
    let movie = Entity::new(&common::registry().get("Movie")?);
    movie.set("title", "Cube")?;
    session.persist(&movie)?;
    session.flush()?;
    let id = movie.key().expect("key");

    session.remove(&movie)?;
    session.flush()?;

    // A node recreated under the same id must come back as a fresh
    // instance, not the removed one.
    {
        use umbra::client::GraphClient;
        use umbra::model::CLASS_PROPERTY;
        let mut seed = graph.clone();
        let new_id = seed.create_node()?;
        assert_ne!(new_id, id, "ids are never reused by the store");
        seed.set_property(new_id, CLASS_PROPERTY, "Movie".into())?;
        let fresh = session.find_any(new_id)?.expect("seeded node");
        assert!(!fresh.same_as(&movie));
    }
    assert!(session.find_any(id)?.is_none());
    Ok(())
}

#[test]
fn remove_wins_over_persist_in_the_same_cycle() -> Result<()> {
    let (session, graph) = common::session();
    let movie = Entity::new(&common::registry().get("Movie")?);
    movie.set("title", "Cube")?;
    session.persist(&movie)?;
    session.flush()?;

    movie.set("title", "Cube 2")?;
    session.persist(&movie)?;
    session.remove(&movie)?;
    session.flush()?;

    assert_eq!(graph.node_count(), 0, "removal runs after the node write");
    Ok(())
}
