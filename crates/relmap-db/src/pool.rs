//! Database connection pool management.
//!
//! This module provides connection pooling for SQLite using r2d2. It handles
//! pool initialization, per-connection pragmas, and creating the tables of a
//! schema registry.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use relmap_common::{DatabaseConfig, Error, Result};

use crate::migrations;
use crate::schema::SchemaRegistry;

/// Type alias for the database connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Type alias for a pooled database connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

fn connection_manager(config: &DatabaseConfig) -> SqliteConnectionManager {
    let manager = match config.path {
        Some(ref path) => SqliteConnectionManager::file(path),
        None => {
            // Each pool gets a uniquely-named shared-cache in-memory database
            // so that parallel pools do not interfere with each other, while
            // all connections within a single pool still share state.
            use std::sync::atomic::{AtomicU64, Ordering};
            static COUNTER: AtomicU64 = AtomicU64::new(0);
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            SqliteConnectionManager::file(format!(
                "file:relmap_mem_{}_{n}?mode=memory&cache=shared",
                std::process::id()
            ))
        }
    };

    let foreign_keys = config.foreign_keys;
    manager.with_init(move |conn| {
        if foreign_keys {
            conn.execute_batch("PRAGMA foreign_keys = ON;")
        } else {
            conn.execute_batch("PRAGMA foreign_keys = OFF;")
        }
    })
}

/// Initialize a database pool and create the tables of `registry`.
///
/// This function will:
/// - Open the SQLite file (or a private in-memory database when no path is set)
/// - Apply the configured `foreign_keys` pragma on every connection
/// - Create every table that does not exist yet
///
/// # Returns
///
/// * `Ok(DbPool)` - Initialized connection pool
/// * `Err(Error)` - If pool creation or table creation fails
pub fn init_pool(config: &DatabaseConfig, registry: &SchemaRegistry) -> Result<DbPool> {
    if config.pool_size == 0 {
        return Err(Error::Config("database.pool_size must be at least 1".into()));
    }

    let pool = Pool::builder()
        .max_size(config.pool_size)
        .build(connection_manager(config))
        .map_err(|e| Error::database(format!("Failed to create connection pool: {e}")))?;

    let conn = get_conn(&pool)?;
    let created = migrations::create_all(&conn, registry)?;
    tracing::debug!(created, "schema ready");

    Ok(pool)
}

/// Initialize an in-memory database pool with default settings (useful for
/// tests).
pub fn init_memory_pool(registry: &SchemaRegistry) -> Result<DbPool> {
    init_pool(&DatabaseConfig::default(), registry)
}

/// Convenience helper to get a connection from the pool.
pub fn get_conn(pool: &DbPool) -> Result<PooledConnection> {
    pool.get()
        .map_err(|e| Error::database(format!("Failed to get connection from pool: {e}")))
}
