//! relmap-db: relationship mapping over SQLite
//!
//! This crate maps entity types with one-to-many, many-to-one and
//! many-to-many relationships onto SQLite tables using rusqlite with r2d2
//! connection pooling, and loads object graphs with interchangeable loader
//! strategies.
//!
//! # Modules
//!
//! - `schema` - Entity, field, relationship and check declarations
//! - `migrations` - Table creation from a registry
//! - `pool` - Connection pool management
//! - `session` - Persistence context: save, load, delete, links, transactions
//! - `instance` - In-memory object graph with lazily filled relationship slots
//! - `loader` - Lazy, selectin, joined and contains-eager loading
//! - `query` - Filtered retrieval
//! - `models` - Typed models of the bundled scenarios
//! - `value` - Column values and rows
//!
//! # Example
//!
//! ```no_run
//! use relmap_common::DatabaseConfig;
//! use relmap_db::models::blog;
//! use relmap_db::pool::{get_conn, init_pool};
//! use relmap_db::session::Session;
//!
//! let registry = blog::registry().unwrap();
//! let config = DatabaseConfig {
//!     path: Some("/var/lib/relmap/blog.db".into()),
//!     ..DatabaseConfig::default()
//! };
//! let pool = init_pool(&config, &registry).unwrap();
//! let conn = get_conn(&pool).unwrap();
//! let session = Session::new(&conn, &registry);
//!
//! let posts = session
//!     .query("BlogPost")
//!     .any("keywords", "keyword", "world")
//!     .selectin("keywords")
//!     .all()
//!     .unwrap();
//! println!("{} posts tagged 'world'", posts.len());
//! ```

pub mod instance;
pub mod loader;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod query;
pub mod schema;
pub mod session;
pub mod value;

pub use instance::{Instance, Related};
pub use loader::LoadStrategy;
pub use query::Query;
pub use session::Session;
pub use value::{Record, Value};
