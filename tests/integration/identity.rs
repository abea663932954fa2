mod common;

use umbra::{Entity, Result};

#[test]
fn loads_of_the_same_node_share_one_instance() -> Result<()> {
    let (session, _graph) = common::session();
    let meta = common::registry().get("Movie")?;

    let movie = Entity::new(&meta);
    movie.set("title", "Cube")?;
    session.persist(&movie)?;
    session.flush()?;
    let id = movie.key().expect("key assigned by flush");

    let first = session.find_any(id)?.expect("node exists");
    let second = session.find_any(id)?.expect("node exists");
    assert!(first.same_as(&second), "identity map must deduplicate");
    Ok(())
}

#[test]
fn persisted_entity_joins_the_identity_map() -> Result<()> {
    let (session, _graph) = common::session();
    let meta = common::registry().get("Movie")?;

    let movie = Entity::new(&meta);
    movie.set("title", "Cube")?;
    session.persist(&movie)?;
    session.flush()?;

    let loaded = session
        .find_any(movie.key().expect("key"))?
        .expect("node exists");
    assert!(
        loaded.same_as(&movie),
        "loading a just-persisted node must return the original instance"
    );
    Ok(())
}

#[test]
fn clear_forgets_loaded_instances() -> Result<()> {
    let (session, _graph) = common::session();
    let meta = common::registry().get("Movie")?;

    let movie = Entity::new(&meta);
    movie.set("title", "Cube")?;
    session.persist(&movie)?;
    session.flush()?;
    let id = movie.key().expect("key");

    session.clear();
    let fresh = session.find_any(id)?.expect("node exists");
    assert!(!fresh.same_as(&movie), "clear must drop identity");
    assert_eq!(fresh.get("title")?, Some("Cube".into()));
    Ok(())
}

#[test]
fn reload_replaces_the_tracked_instance() -> Result<()> {
    let (session, graph) = common::session();
    let meta = common::registry().get("Movie")?;

    let movie = Entity::new(&meta);
    movie.set("title", "Cube")?;
    session.persist(&movie)?;
    session.flush()?;
    let id = movie.key().expect("key");

    // Simulate an out-of-band remote change.
    {
        use umbra::client::GraphClient;
        let mut graph = graph.clone();
        graph.set_property(id, "title", "Cube 2".into())?;
    }

    let reloaded = session.reload(&movie)?;
    assert!(!reloaded.same_as(&movie));
    assert_eq!(reloaded.get("title")?, Some("Cube 2".into()));

    // The reloaded instance is now the canonical one.
    let found = session.find_any(id)?.expect("node exists");
    assert!(found.same_as(&reloaded));
    Ok(())
}

#[test]
fn find_any_returns_none_for_unknown_ids() -> Result<()> {
    let (session, _graph) = common::session();
    assert!(session.find_any(42)?.is_none());
    Ok(())
}
