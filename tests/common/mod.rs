//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which owns a schema registry and a pool over a
//! private in-memory database, plus seeding helpers for both scenarios.

#![allow(dead_code)]

use relmap_common::DatabaseConfig;
use relmap_db::models::accounts::{self, Address, User};
use relmap_db::models::blog::{self, BlogPost, Keyword};
use relmap_db::pool::{get_conn, init_pool, DbPool, PooledConnection};
use relmap_db::schema::SchemaRegistry;
use relmap_db::Session;

/// Registry plus pool backed by an in-memory database.
pub struct TestHarness {
    pub registry: SchemaRegistry,
    pub db: DbPool,
}

impl TestHarness {
    pub fn accounts() -> Self {
        Self::with_config(
            accounts::registry().expect("accounts registry"),
            DatabaseConfig::default(),
        )
    }

    pub fn blog() -> Self {
        Self::with_config(
            blog::registry().expect("blog registry"),
            DatabaseConfig::default(),
        )
    }

    pub fn with_config(registry: SchemaRegistry, config: DatabaseConfig) -> Self {
        let db = init_pool(&config, &registry).expect("failed to create pool");
        Self { registry, db }
    }

    pub fn conn(&self) -> PooledConnection {
        get_conn(&self.db).expect("failed to get connection")
    }
}

/// Insert `users` users, each owning `per_user` addresses; returns user ids.
pub fn seed_accounts(session: &Session<'_>, users: usize, per_user: usize) -> Vec<i64> {
    (0..users)
        .map(|u| {
            let name = format!("user{u}");
            let id = session
                .insert_entity(&mut User::new(&name, &name, &name))
                .unwrap();
            for a in 0..per_user {
                session
                    .insert_entity(&mut Address::new(&format!("{name}.{a}@example.com")).with_user_id(id))
                    .unwrap();
            }
            id
        })
        .collect()
}

/// Ids created by [`seed_blog`].
pub struct BlogSeed {
    pub jack: i64,
    pub andrzej: i64,
    pub post: i64,
    pub jack_keyword: i64,
    pub world_keyword: i64,
}

/// Jack's post tagged "jack" and "world", plus Andrzej's untagged post.
pub fn seed_blog(session: &Session<'_>) -> BlogSeed {
    let mut jack = blog::User::new("Jack", "Jack Doe", "jc123");
    let mut andrzej = blog::User::new("Andrzej", "Andrzej Gołota", "Andżej");
    session.insert_entity(&mut jack).unwrap();
    session.insert_entity(&mut andrzej).unwrap();

    let post = session
        .insert_entity(&mut BlogPost::new("Jack's first post", "Hello world", &jack).unwrap())
        .unwrap();
    session
        .insert_entity(&mut BlogPost::new("Andrzej's post", "Cześć", &andrzej).unwrap())
        .unwrap();

    let jack_keyword = session.insert_entity(&mut Keyword::new("jack")).unwrap();
    let world_keyword = session.insert_entity(&mut Keyword::new("world")).unwrap();
    session.link("BlogPost", "keywords", post, jack_keyword).unwrap();
    session.link("BlogPost", "keywords", post, world_keyword).unwrap();

    BlogSeed {
        jack: jack.id.unwrap(),
        andrzej: andrzej.id.unwrap(),
        post,
        jack_keyword,
        world_keyword,
    }
}
