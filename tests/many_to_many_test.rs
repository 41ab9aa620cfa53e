//! Integration tests for association-table synchronisation.

mod common;

use common::{seed_blog, TestHarness};
use relmap_db::models::blog::{BlogPost, Keyword};
use relmap_db::{Instance, Session};

#[test]
fn attach_query_detach_round_trip() {
    let h = TestHarness::blog();
    let conn = h.conn();
    let session = Session::new(&conn, &h.registry);
    let seed = seed_blog(&session);

    let mut post = session
        .query("BlogPost")
        .filter_by("id", seed.post)
        .selectin("keywords")
        .one()
        .unwrap();

    let rust = Instance::from_entity(&h.registry, &Keyword::new("rust")).unwrap();
    post.attach(&session, "keywords", rust).unwrap();
    session.save_graph(&mut post).unwrap();

    let tagged = session
        .query("BlogPost")
        .any("keywords", "keyword", "rust")
        .one()
        .unwrap();
    assert_eq!(tagged.id(), Some(seed.post));

    let rust_id = session
        .query("Keyword")
        .filter_by("keyword", "rust")
        .one()
        .unwrap()
        .id()
        .unwrap();
    post.detach(&session, "keywords", rust_id).unwrap().unwrap();
    session.save_graph(&mut post).unwrap();

    assert_eq!(
        session
            .query("BlogPost")
            .any("keywords", "keyword", "rust")
            .count()
            .unwrap(),
        0
    );
    // The keyword row survives its last link
    assert_eq!(session.load_entity::<Keyword>(rust_id).unwrap().keyword, "rust");
    assert_eq!(
        session.linked_ids("BlogPost", "keywords", seed.post).unwrap(),
        vec![seed.jack_keyword, seed.world_keyword]
    );
}

#[test]
fn attaching_an_existing_keyword_twice_links_once() {
    let h = TestHarness::blog();
    let conn = h.conn();
    let session = Session::new(&conn, &h.registry);
    let seed = seed_blog(&session);

    let mut post = session
        .query("BlogPost")
        .filter_by("id", seed.post)
        .one()
        .unwrap();
    let world: Keyword = session.load_entity(seed.world_keyword).unwrap();
    post.attach(&session, "keywords", Instance::from_entity(&h.registry, &world).unwrap())
        .unwrap();
    assert_eq!(post.collection(&session, "keywords").unwrap().len(), 2);

    session.save_graph(&mut post).unwrap();
    assert_eq!(session.linked_ids("BlogPost", "keywords", seed.post).unwrap().len(), 2);
}

#[test]
fn either_side_updates_the_association() {
    let h = TestHarness::blog();
    let conn = h.conn();
    let session = Session::new(&conn, &h.registry);
    let seed = seed_blog(&session);

    let second = session
        .query("BlogPost")
        .filter_by("user_id", seed.andrzej)
        .one()
        .unwrap();
    let mut world = session
        .query("Keyword")
        .filter_by("id", seed.world_keyword)
        .one()
        .unwrap();
    world.attach(&session, "posts", second).unwrap();
    session.save_graph(&mut world).unwrap();

    let posts = session
        .query("BlogPost")
        .any("keywords", "keyword", "world")
        .all()
        .unwrap();
    assert_eq!(posts.len(), 2);

    // Seen from the post side as well
    let andrzej_post = session
        .query("BlogPost")
        .filter_by("user_id", seed.andrzej)
        .selectin("keywords")
        .one()
        .unwrap();
    let words: Vec<String> = andrzej_post
        .collection(&session, "keywords")
        .unwrap()
        .iter()
        .filter_map(|k| k.record().text("keyword"))
        .collect();
    assert_eq!(words, vec!["world"]);
}

#[test]
fn deleting_a_post_keeps_keywords() {
    let h = TestHarness::blog();
    let conn = h.conn();
    let session = Session::new(&conn, &h.registry);
    let seed = seed_blog(&session);

    let post: BlogPost = session.load_entity(seed.post).unwrap();
    assert!(session.delete_entity(&post).unwrap());

    assert_eq!(session.query("Keyword").count().unwrap(), 2);
    assert!(session.linked_ids("Keyword", "posts", seed.world_keyword).unwrap().is_empty());
}
