//! Table creation from a schema registry.
//!
//! Every entity table and association table becomes one tracked migration.
//! A `schema_migrations` table records which tables were created so running
//! [`create_all`] again applies nothing.

use rusqlite::Connection;
use relmap_common::{Error, Result};

use crate::schema::{EntitySchema, RelationshipDef, SchemaRegistry};

/// Render the `CREATE TABLE` statement for an entity.
pub fn create_table_sql(entity: &EntitySchema) -> String {
    let mut lines = Vec::new();

    for field in &entity.fields {
        let mut line = format!("    {} {}", field.name, field.field_type.sql_type());
        if field.primary_key {
            line.push_str(" PRIMARY KEY");
            if field.generated {
                line.push_str(" AUTOINCREMENT");
            }
        } else if !field.nullable {
            line.push_str(" NOT NULL");
        }
        if field.unique {
            line.push_str(" UNIQUE");
        }
        if let Some(ref default) = field.default {
            line.push_str(&format!(" DEFAULT {default}"));
        }
        if let Some(ref fk) = field.references {
            line.push_str(&format!(" REFERENCES {}({})", fk.table, fk.column));
        }
        lines.push(line);
    }

    for check in &entity.checks {
        lines.push(format!("    CONSTRAINT {} CHECK ({})", check.name(), check.sql()));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
        entity.table,
        lines.join(",\n")
    )
}

/// Render the `CREATE TABLE` statement for the association table of a
/// many-to-many edge declared on `owner`.
pub fn association_table_sql(
    registry: &SchemaRegistry,
    owner: &EntitySchema,
    rel: &RelationshipDef,
) -> Result<String> {
    let assoc = rel.association()?;
    let target = registry.describe(&rel.target)?;

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    {local} INTEGER NOT NULL REFERENCES {owner_table}({owner_pk}),\n    {remote} INTEGER NOT NULL REFERENCES {target_table}({target_pk}),\n    PRIMARY KEY ({local}, {remote})\n)",
        table = assoc.table,
        local = assoc.local_column,
        remote = assoc.remote_column,
        owner_table = owner.table,
        owner_pk = owner.primary_key(),
        target_table = target.table,
        target_pk = target.primary_key(),
    ))
}

fn init_migrations_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            name TEXT PRIMARY KEY NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS relmap_sequences (
            name TEXT PRIMARY KEY NOT NULL,
            value INTEGER NOT NULL
        )",
        [],
    )?;
    Ok(())
}

fn is_applied(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM schema_migrations WHERE name = ?",
        [name],
        |row| row.get::<_, i64>(0),
    )
    .map(|count| count > 0)
}

/// Create every table of `registry` that has not been created yet.
///
/// Entity tables are created in registration order, followed by
/// association tables. All statements run in one transaction.
///
/// # Returns
///
/// * `Ok(usize)` - Number of tables created
/// * `Err(Error)` - If any statement fails (nothing is applied)
pub fn create_all(conn: &Connection, registry: &SchemaRegistry) -> Result<usize> {
    init_migrations_table(conn).map_err(Error::database)?;

    let mut pending: Vec<(String, String)> = Vec::new();
    for entity in registry.entities() {
        pending.push((entity.table.clone(), create_table_sql(entity)));
    }
    for (owner, rel) in registry.association_tables() {
        let assoc = rel.association()?;
        pending.push((
            assoc.table.clone(),
            association_table_sql(registry, owner, rel)?,
        ));
    }

    let tx = conn.unchecked_transaction().map_err(Error::database)?;
    let mut applied = 0;
    for (name, sql) in pending {
        if is_applied(&tx, &name).map_err(Error::database)? {
            continue;
        }
        tx.execute_batch(&sql).map_err(|e| {
            Error::database(format!("creating table {name} failed: {e}"))
        })?;
        tx.execute("INSERT INTO schema_migrations (name) VALUES (?)", [&name])
            .map_err(Error::database)?;
        tracing::info!(table = %name, "created table");
        applied += 1;
    }
    tx.commit().map_err(Error::database)?;

    Ok(applied)
}

/// Names of the tables recorded in `schema_migrations`, oldest first.
pub fn applied_tables(conn: &Connection) -> Result<Vec<String>> {
    init_migrations_table(conn).map_err(Error::database)?;

    let mut stmt = conn
        .prepare("SELECT name FROM schema_migrations ORDER BY rowid")
        .map_err(Error::database)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(Error::database)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::database)?;

    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{accounts, blog};

    #[test]
    fn test_create_all() {
        let conn = Connection::open_in_memory().unwrap();
        let registry = blog::registry().unwrap();

        // First run should create every table
        let applied = create_all(&conn, &registry).unwrap();
        assert_eq!(applied, 6);
        assert_eq!(
            applied_tables(&conn).unwrap(),
            vec!["users", "posts", "keywords", "comments", "reactions", "post_keywords"]
        );

        // Second run should not create anything
        let applied = create_all(&conn, &registry).unwrap();
        assert_eq!(applied, 0);
    }

    #[test]
    fn test_schema_created() {
        let conn = Connection::open_in_memory().unwrap();
        create_all(&conn, &accounts::registry().unwrap()).unwrap();

        for table in ["users", "addresses", "schema_migrations", "relmap_sequences"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_entity_ddl() {
        let registry = blog::registry().unwrap();
        let sql = create_table_sql(registry.describe("Keyword").unwrap());
        assert!(sql.contains("id INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("keyword VARCHAR(50) NOT NULL UNIQUE"));

        let sql = create_table_sql(registry.describe("Reaction").unwrap());
        assert!(sql.contains("post_id INTEGER REFERENCES posts(id)"));
        assert!(sql.contains("CHECK ((post_id IS NOT NULL) + (comment_id IS NOT NULL) = 1)"));
    }

    #[test]
    fn test_association_ddl() {
        let registry = blog::registry().unwrap();
        let (owner, rel) = registry.association_tables()[0];
        let sql = association_table_sql(&registry, owner, rel).unwrap();
        assert!(sql.contains("post_id INTEGER NOT NULL REFERENCES posts(id)"));
        assert!(sql.contains("keyword_id INTEGER NOT NULL REFERENCES keywords(id)"));
        assert!(sql.contains("PRIMARY KEY (post_id, keyword_id)"));
    }

    #[test]
    fn test_check_enforced_by_storage() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = OFF;").unwrap();
        create_all(&conn, &blog::registry().unwrap()).unwrap();

        let result = conn.execute("INSERT INTO reactions (user_id) VALUES (1)", []);
        assert!(result.is_err());
        let result = conn.execute("INSERT INTO reactions (post_id, comment_id) VALUES (1, 1)", []);
        assert!(result.is_err());
        conn.execute("INSERT INTO reactions (post_id) VALUES (1)", [])
            .unwrap();
    }
}
