mod common;

use std::sync::Arc;

use umbra::client::GraphClient;
use umbra::meta::{Direction, EntityMeta, MetaRegistry, PropertyMeta, RelationMeta};
use umbra::model::CLASS_PROPERTY;
use umbra::{Entity, Result};

#[test]
fn collection_members_hydrate_in_insertion_order() -> Result<()> {
    let (session, _graph) = common::session();
    let registry = common::registry();
    let movie = Entity::new(&registry.get("Movie")?);
    movie.set("title", "Cube")?;
    for name in ["Hewlett", "Guadagni", "de Boer"] {
        let actor = Entity::new(&registry.get("Person")?);
        actor.set("name", name)?;
        movie.push("actor", actor)?;
    }
    session.persist(&movie)?;
    session.flush()?;
    let id = movie.key().expect("key");

    session.clear();
    let loaded = session.find_any(id)?.expect("node exists");
    let cast = loaded.many("actor")?;
    let names: Vec<_> = cast
        .iter()
        .map(|a| a.get("name").unwrap().unwrap())
        .collect();
    assert_eq!(
        names,
        vec!["Hewlett".into(), "Guadagni".into(), "de Boer".into()]
    );
    Ok(())
}

#[test]
fn hydration_resolves_members_through_the_identity_map() -> Result<()> {
    let (session, _graph) = common::session();
    let registry = common::registry();
    let movie = Entity::new(&registry.get("Movie")?);
    movie.set("title", "Cube")?;
    let actor = Entity::new(&registry.get("Person")?);
    actor.set("name", "Hewlett")?;
    movie.push("actor", actor.clone())?;
    session.persist(&movie)?;
    session.flush()?;
    let movie_id = movie.key().expect("movie key");
    let actor_id = actor.key().expect("actor key");

    session.clear();
    let known_actor = session.find_any(actor_id)?.expect("actor node");
    let loaded_movie = session.find_any(movie_id)?.expect("movie node");
    let cast = loaded_movie.many("actor")?;
    assert_eq!(cast.len(), 1);
    assert!(
        cast[0].same_as(&known_actor),
        "hydration must reuse the already loaded instance"
    );
    Ok(())
}

#[test]
fn singular_relation_replaces_its_edge() -> Result<()> {
    let (session, graph) = common::session();
    let registry = common::registry();
    let movie = Entity::new(&registry.get("Movie")?);
    movie.set("title", "Cube")?;
    let first = Entity::new(&registry.get("Person")?);
    let second = Entity::new(&registry.get("Person")?);
    movie.set_one("director", Some(first.clone()))?;
    session.persist(&movie)?;
    session.flush()?;
    let movie_id = movie.key().expect("movie key");

    movie.set_one("director", Some(second.clone()))?;
    session.persist(&movie)?;
    session.persist(&second)?;
    session.flush()?;

    assert_eq!(
        graph.relationships_between(movie_id, first.key().expect("first"), "director"),
        0,
        "old edge must be gone"
    );
    assert_eq!(
        graph.relationships_between(movie_id, second.key().expect("second"), "director"),
        1
    );
    Ok(())
}

#[test]
fn clearing_a_singular_relation_deletes_its_edge() -> Result<()> {
    let (session, graph) = common::session();
    let registry = common::registry();
    let movie = Entity::new(&registry.get("Movie")?);
    movie.set("title", "Cube")?;
    let director = Entity::new(&registry.get("Person")?);
    movie.set_one("director", Some(director))?;
    session.persist(&movie)?;
    session.flush()?;

    movie.set_one("director", None)?;
    session.persist(&movie)?;
    session.flush()?;
    assert_eq!(graph.relationship_count(), 0);
    Ok(())
}

#[test]
fn removed_members_lose_their_edges() -> Result<()> {
    let (session, graph) = common::session();
    let registry = common::registry();
    let movie = Entity::new(&registry.get("Movie")?);
    movie.set("title", "Cube")?;
    let kept = Entity::new(&registry.get("Person")?);
    let dropped = Entity::new(&registry.get("Person")?);
    movie.push("actor", kept.clone())?;
    movie.push("actor", dropped.clone())?;
    session.persist(&movie)?;
    session.flush()?;
    let movie_id = movie.key().expect("movie key");

    movie.remove_from("actor", &dropped)?;
    session.persist(&movie)?;
    session.flush()?;

    assert_eq!(
        graph.relationships_between(movie_id, kept.key().expect("kept"), "actor"),
        1
    );
    assert_eq!(
        graph.relationships_between(movie_id, dropped.key().expect("dropped"), "actor"),
        0
    );

    // The removal was applied once; flushing again changes nothing.
    session.persist(&movie)?;
    session.flush()?;
    assert_eq!(graph.relationship_count(), 1);
    Ok(())
}

#[test]
fn property_only_flush_keeps_unread_relations() -> Result<()> {
    let (session, graph) = common::session();
    let registry = common::registry();
    let movie = Entity::new(&registry.get("Movie")?);
    movie.set("title", "Cube")?;
    let director = Entity::new(&registry.get("Person")?);
    director.set("name", "Natali")?;
    movie.set_one("director", Some(director.clone()))?;
    let actor = Entity::new(&registry.get("Person")?);
    movie.push("actor", actor.clone())?;
    session.persist(&movie)?;
    session.flush()?;
    let movie_id = movie.key().expect("movie key");

    // A second session sees the node cold, with no relation hydrated.
    let second = umbra::Session::new(Box::new(graph.clone()), common::registry());
    let loaded = second.find_any(movie_id)?.expect("movie node");
    loaded.set("title", "Cube 2")?;
    second.persist(&loaded)?;
    second.flush()?;

    assert_eq!(graph.node_property(movie_id, "title"), Some("Cube 2".into()));
    assert_eq!(
        graph.relationships_between(movie_id, director.key().expect("director"), "director"),
        1,
        "flushing a scalar change must not delete the untouched director edge"
    );
    assert_eq!(
        graph.relationships_between(movie_id, actor.key().expect("actor"), "actor"),
        1,
        "flushing a scalar change must not delete the untouched actor edge"
    );
    Ok(())
}

#[test]
fn loaded_proxy_still_replaces_an_assigned_singular_relation() -> Result<()> {
    let (session, graph) = common::session();
    let registry = common::registry();
    let movie = Entity::new(&registry.get("Movie")?);
    movie.set("title", "Cube")?;
    let first = Entity::new(&registry.get("Person")?);
    movie.set_one("director", Some(first.clone()))?;
    session.persist(&movie)?;
    session.flush()?;
    let movie_id = movie.key().expect("movie key");

    session.clear();
    let loaded = session.find_any(movie_id)?.expect("movie node");
    let replacement = Entity::new(&registry.get("Person")?);
    loaded.set_one("director", Some(replacement.clone()))?;
    session.persist(&loaded)?;
    session.flush()?;

    assert_eq!(
        graph.relationships_between(movie_id, first.key().expect("first"), "director"),
        0,
        "assigning over a loaded proxy must replace the stored edge"
    );
    assert_eq!(
        graph.relationships_between(movie_id, replacement.key().expect("second"), "director"),
        1
    );
    Ok(())
}

#[test]
fn mirrored_relations_resolve_to_one_physical_edge() -> Result<()> {
    let mut registry = MetaRegistry::new();
    registry.register(
        EntityMeta::builder("Author")
            .primary_key("id")
            .many_to_many(RelationMeta::new("wrote"))
            .build()?,
    );
    registry.register(
        EntityMeta::builder("Book")
            .primary_key("id")
            .many_to_many(RelationMeta::new("wrote").direction(Direction::To))
            .build()?,
    );
    let registry = Arc::new(registry);
    let (session, graph) = common::session_with(Arc::clone(&registry));

    // Both sides declare the same edge: (author)-[:wrote]->(book).
    let author = Entity::new(&registry.get("Author")?);
    let book = Entity::new(&registry.get("Book")?);
    author.push("wrote", book.clone())?;
    book.push("wrote", author.clone())?;
    session.persist(&author)?;
    session.persist(&book)?;
    session.flush()?;

    assert_eq!(graph.relationship_count(), 1, "one physical edge expected");
    assert_eq!(
        graph.relationships_between(
            author.key().expect("author key"),
            book.key().expect("book key"),
            "wrote"
        ),
        1
    );
    Ok(())
}

#[test]
fn inverted_direction_orients_edges_at_the_owner() -> Result<()> {
    let mut registry = MetaRegistry::new();
    registry.register(
        EntityMeta::builder("Group")
            .primary_key("id")
            .property(PropertyMeta::new("name"))
            .many_to_many(RelationMeta::new("member").direction(Direction::To))
            .build()?,
    );
    registry.register(
        EntityMeta::builder("Person")
            .primary_key("id")
            .property(PropertyMeta::new("name"))
            .build()?,
    );
    let registry = Arc::new(registry);
    let (session, graph) = common::session_with(Arc::clone(&registry));

    let group = Entity::new(&registry.get("Group")?);
    let person = Entity::new(&registry.get("Person")?);
    group.push("member", person.clone())?;
    session.persist(&group)?;
    session.flush()?;

    // The member points at the group, not the other way around.
    let group_id = group.key().expect("group key");
    let person_id = person.key().expect("person key");
    assert_eq!(graph.relationships_between(person_id, group_id, "member"), 1);
    assert_eq!(graph.relationships_between(group_id, person_id, "member"), 0);

    // Flushing again still recognizes the inverted edge as present.
    session.persist(&group)?;
    session.flush()?;
    assert_eq!(graph.relationship_count(), 1);
    Ok(())
}

#[test]
fn read_only_relations_scan_inbound_edges_and_are_never_written() -> Result<()> {
    let mut registry = MetaRegistry::new();
    registry.register(
        EntityMeta::builder("City")
            .primary_key("id")
            .property(PropertyMeta::new("name"))
            .many_to_many(RelationMeta::new("resident").read_only())
            .build()?,
    );
    registry.register(
        EntityMeta::builder("Person")
            .primary_key("id")
            .property(PropertyMeta::new("name"))
            .build()?,
    );
    let (session, graph) = common::session_with(Arc::new(registry));

    // Seed the store directly: two people pointing at the city.
    let mut seed = graph.clone();
    let city_id = seed.create_node()?;
    seed.set_property(city_id, CLASS_PROPERTY, "City".into())?;
    let a = seed.create_node()?;
    seed.set_property(a, CLASS_PROPERTY, "Person".into())?;
    let b = seed.create_node()?;
    seed.set_property(b, CLASS_PROPERTY, "Person".into())?;
    seed.create_relationship(a, city_id, "resident")?;
    seed.create_relationship(b, city_id, "resident")?;

    let city = session.find_any(city_id)?.expect("city node");
    let residents = city.many("resident")?;
    assert_eq!(residents.len(), 2);

    // Local mutation of a read-only relation never reaches the store.
    let stray = session.find_any(a)?.expect("node");
    city.push("resident", stray)?;
    session.persist(&city)?;
    session.flush()?;
    assert_eq!(graph.relationship_count(), 2);
    Ok(())
}
