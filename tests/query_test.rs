//! Integration tests for the query façade.

mod common;

use assert_matches::assert_matches;
use common::{seed_blog, TestHarness};
use relmap_common::Error;
use relmap_db::models::blog::{self, BlogPost};
use relmap_db::Session;

#[test]
fn one_distinguishes_zero_one_and_many() {
    let h = TestHarness::blog();
    let conn = h.conn();
    let session = Session::new(&conn, &h.registry);
    seed_blog(&session);

    assert_matches!(
        session.query("User").filter_by("name", "Mariusz").one(),
        Err(Error::NotFound { ref entity, .. }) if entity == "User"
    );

    let jack = session.query("User").filter_by("name", "Jack").one().unwrap();
    assert_eq!(jack.record().text("nickname").as_deref(), Some("jc123"));

    session
        .insert_entity(&mut blog::User::new("Jack", "Jack Sparrow", "captain"))
        .unwrap();
    assert_matches!(
        session.query("User").filter_by("name", "Jack").one(),
        Err(Error::MultipleResults { count: 2, .. })
    );
}

#[test]
fn not_found_names_the_filters() {
    let h = TestHarness::blog();
    let conn = h.conn();
    let session = Session::new(&conn, &h.registry);

    let err = session
        .query("Keyword")
        .filter_by("keyword", "rust")
        .one()
        .unwrap_err();
    assert!(err.to_string().contains("keyword = 'rust'"), "{err}");
}

#[test]
fn any_over_many_to_many() {
    let h = TestHarness::blog();
    let conn = h.conn();
    let session = Session::new(&conn, &h.registry);
    let seed = seed_blog(&session);

    let tagged = session
        .query("BlogPost")
        .any("keywords", "keyword", "world")
        .all()
        .unwrap();
    assert_eq!(tagged.len(), 1);
    assert_eq!(tagged[0].id(), Some(seed.post));

    assert_eq!(
        session
            .query("BlogPost")
            .any("keywords", "keyword", "rust")
            .count()
            .unwrap(),
        0
    );
}

#[test]
fn join_filter_across_many_to_one() {
    let h = TestHarness::blog();
    let conn = h.conn();
    let session = Session::new(&conn, &h.registry);
    let seed = seed_blog(&session);

    let posts = session
        .query("BlogPost")
        .filter_related("author", "name", "Andrzej")
        .all()
        .unwrap();
    assert_eq!(posts.len(), 1);
    let post: BlogPost = posts[0].as_entity().unwrap();
    assert_eq!(post.user_id, Some(seed.andrzej));
}

#[test]
fn join_filter_across_many_to_many_counts_distinct() {
    let h = TestHarness::blog();
    let conn = h.conn();
    let session = Session::new(&conn, &h.registry);
    seed_blog(&session);

    // Two matching keywords still yield one post
    let query = session.query("BlogPost").join("keywords");
    assert_eq!(query.all().unwrap().len(), 1);
    assert_eq!(query.count().unwrap(), 1);
}

#[test]
fn contains_eager_many_to_one() {
    let h = TestHarness::blog();
    let conn = h.conn();
    let session = Session::new(&conn, &h.registry);
    seed_blog(&session);

    session.reset_fetch_count();
    let posts = session
        .query("BlogPost")
        .filter_related("author", "name", "Jack")
        .contains_eager("author")
        .all()
        .unwrap();
    let author = posts[0].reference(&session, "author").unwrap().unwrap();
    assert_eq!(author.record().text("name").as_deref(), Some("Jack"));
    assert_eq!(session.fetch_count(), 1);
}

#[test]
fn filters_combine() {
    let h = TestHarness::blog();
    let conn = h.conn();
    let session = Session::new(&conn, &h.registry);
    seed_blog(&session);

    let hits = session
        .query("BlogPost")
        .filter_by("headline", "Jack's first post")
        .any("keywords", "keyword", "jack")
        .filter_related("author", "nickname", "jc123")
        .count()
        .unwrap();
    assert_eq!(hits, 1);

    let misses = session
        .query("BlogPost")
        .filter_by("headline", "Andrzej's post")
        .any("keywords", "keyword", "jack")
        .count()
        .unwrap();
    assert_eq!(misses, 0);
}

#[test]
fn unknown_relationship_is_schema_error() {
    let h = TestHarness::blog();
    let conn = h.conn();
    let session = Session::new(&conn, &h.registry);

    assert_matches!(
        session.query("BlogPost").any("tags", "keyword", "x").all(),
        Err(Error::Schema(_))
    );
    assert_matches!(
        session.query("BlogPost").joined("tags").first(),
        Err(Error::Schema(_))
    );
}
