//! Persistence session.
//!
//! A [`Session`] bundles a connection with the schema registry and is passed
//! explicitly to every operation; there is no global engine. It validates
//! constraints before writing, maps storage constraint failures to
//! [`Error::ConstraintViolation`], and counts the SELECT round trips issued
//! by the loader and query façade.
//!
//! # Example
//!
//! ```
//! use relmap_db::models::accounts::{self, Address, User};
//! use relmap_db::pool::{get_conn, init_memory_pool};
//! use relmap_db::session::Session;
//!
//! let registry = accounts::registry().unwrap();
//! let pool = init_memory_pool(&registry).unwrap();
//! let conn = get_conn(&pool).unwrap();
//! let session = Session::new(&conn, &registry);
//!
//! let mut jack = User::new("Jack", "Jack Doe", "jc123");
//! let id = session.insert_entity(&mut jack).unwrap();
//! session
//!     .insert_entity(&mut Address::new("jack.doe@gmail.com").with_user_id(id))
//!     .unwrap();
//!
//! let user = session.query("User").filter_by("name", "Jack").one().unwrap();
//! assert_eq!(user.collection(&session, "addresses").unwrap().len(), 1);
//! ```

use std::cell::Cell;
use std::collections::HashSet;

use relmap_common::{Error, Result};
use rusqlite::{params_from_iter, Connection};

use crate::instance::{Instance, Related};
use crate::models::Entity;
use crate::query::Query;
use crate::schema::{Cardinality, EntitySchema, SchemaRegistry};
use crate::value::{Record, Value};

/// Explicit persistence context.
pub struct Session<'a> {
    conn: &'a Connection,
    registry: &'a SchemaRegistry,
    echo: bool,
    fetches: Cell<usize>,
    depth: Cell<usize>,
}

/// Map a failed write to the crate error, keeping constraint failures
/// distinguishable.
fn write_error(entity: &str, err: rusqlite::Error) -> Error {
    match err.sqlite_error_code() {
        Some(rusqlite::ErrorCode::ConstraintViolation) => Error::constraint(entity, err.to_string()),
        _ => Error::database(err),
    }
}

impl<'a> Session<'a> {
    pub fn new(conn: &'a Connection, registry: &'a SchemaRegistry) -> Self {
        Self {
            conn,
            registry,
            echo: false,
            fetches: Cell::new(0),
            depth: Cell::new(0),
        }
    }

    /// Log every statement at debug level under the `relmap::sql` target.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn registry(&self) -> &'a SchemaRegistry {
        self.registry
    }

    pub fn connection(&self) -> &'a Connection {
        self.conn
    }

    /// SELECT round trips issued by loads and queries since the last reset.
    pub fn fetch_count(&self) -> usize {
        self.fetches.get()
    }

    pub fn reset_fetch_count(&self) {
        self.fetches.set(0);
    }

    /// Start a query over `entity_type`.
    pub fn query(&self, entity_type: &str) -> Query<'_> {
        Query::new(self, entity_type)
    }

    fn log_sql(&self, sql: &str, params: &[Value]) {
        if self.echo {
            tracing::debug!(target: "relmap::sql", sql, ?params, "execute");
        }
    }

    fn select(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>> {
        self.log_sql(sql, params);
        let mut stmt = self.conn.prepare(sql).map_err(Error::database)?;
        let width = stmt.column_count();
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                (0..width)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })
            .map_err(Error::database)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::database)
    }

    /// Run a counted SELECT and return every row as values in column order.
    pub(crate) fn fetch_rows(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>> {
        self.fetches.set(self.fetches.get() + 1);
        self.select(sql, params)
    }

    fn scalar(&self, sql: &str, params: &[Value]) -> Result<i64> {
        self.log_sql(sql, params);
        self.conn
            .query_row(sql, params_from_iter(params.iter()), |row| row.get(0))
            .map_err(Error::database)
    }

    fn execute(&self, entity: &str, sql: &str, params: &[Value]) -> Result<usize> {
        self.log_sql(sql, params);
        self.conn
            .execute(sql, params_from_iter(params.iter()))
            .map_err(|e| write_error(entity, e))
    }

    /// Run `f` as one unit of work.
    ///
    /// Commits when `f` returns `Ok` and rolls back every write made inside
    /// it otherwise. Calls nest: an inner failure that the outer closure
    /// recovers from only discards the inner writes.
    pub fn transaction<T>(&self, f: impl FnOnce(&Session<'a>) -> Result<T>) -> Result<T> {
        let depth = self.depth.get();
        let name = format!("relmap_sp_{depth}");
        self.conn
            .execute_batch(&format!("SAVEPOINT {name}"))
            .map_err(Error::database)?;

        self.depth.set(depth + 1);
        let result = f(self);
        self.depth.set(depth);

        match result {
            Ok(value) => {
                self.conn
                    .execute_batch(&format!("RELEASE {name}"))
                    .map_err(Error::database)?;
                Ok(value)
            }
            Err(err) => {
                match self
                    .conn
                    .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))
                {
                    Ok(()) => tracing::debug!(error = %err, depth, "transaction rolled back"),
                    Err(rollback) => {
                        tracing::error!(error = %rollback, depth, "rollback failed")
                    }
                }
                Err(err)
            }
        }
    }

    fn stored_row(&self, schema: &EntitySchema, id: i64) -> Result<Option<Record>> {
        let sql = format!(
            "SELECT {} FROM {} t0 WHERE t0.{} = ?",
            schema.select_list("t0"),
            schema.table,
            schema.primary_key()
        );
        let rows = self.select(&sql, &[Value::Integer(id)])?;
        Ok(rows.first().map(|row| schema.record_from_values(row)))
    }

    fn next_sequence_value(&self, sequence: &str) -> Result<i64> {
        self.scalar(
            "INSERT INTO relmap_sequences (name, value) VALUES (?, 1) \
             ON CONFLICT(name) DO UPDATE SET value = value + 1 RETURNING value",
            &[Value::from(sequence)],
        )
    }

    /// Check required fields, unique columns and row checks of `row`.
    fn validate(&self, schema: &EntitySchema, row: &Record) -> Result<()> {
        let pk = schema.primary_key();
        for field in &schema.fields {
            if field.primary_key {
                continue;
            }
            let value = row.value(&field.name);
            if !field.nullable && !field.generated && value.is_null() {
                return Err(Error::constraint(
                    &schema.name,
                    format!("{}.{} is required", schema.name, field.name),
                ));
            }
            if field.unique && !value.is_null() {
                let sql = format!(
                    "SELECT COUNT(*) FROM {} WHERE {} = ? AND {pk} IS NOT ?",
                    schema.table, field.name
                );
                if self.scalar(&sql, &[value.clone(), row.value(pk)])? > 0 {
                    return Err(Error::constraint(
                        &schema.name,
                        format!("{}.{} value {value} already exists", schema.name, field.name),
                    ));
                }
            }
        }
        for check in &schema.checks {
            check
                .evaluate(row)
                .map_err(|message| Error::constraint(&schema.name, message))?;
        }
        Ok(())
    }

    /// Persist `record` as an `entity_type` row and return its id.
    ///
    /// A record without a primary key (or whose key is not stored yet) is
    /// inserted: absent columns take their declared default, and a generated
    /// key is drawn from the field's named sequence or the table's
    /// AUTOINCREMENT counter. A stored key is updated with the record's
    /// columns overlaid on the stored row. Either way the record is replaced
    /// by the full row that was written.
    pub fn save(&self, entity_type: &str, record: &mut Record) -> Result<i64> {
        let schema = self.registry.describe(entity_type)?;
        if let Some(column) = record.columns().find(|c| !schema.has_column(c)) {
            return Err(Error::schema(format!(
                "entity type '{entity_type}' has no column '{column}'"
            )));
        }

        let pk = schema.primary_key();
        let stored = match record.integer(pk) {
            Some(id) => self.stored_row(schema, id)?,
            None => None,
        };

        match stored {
            Some(mut row) => {
                row.merge(record);
                self.validate(schema, &row)?;
                let id = row.require_integer(entity_type, pk)?;
                self.update_row(schema, &row)?;
                tracing::trace!(entity = entity_type, id, "updated");
                *record = row;
                Ok(id)
            }
            None => {
                let mut row = Record::new();
                for field in &schema.fields {
                    let value = match record.get(&field.name) {
                        Some(value) if !(field.primary_key && value.is_null()) => value.clone(),
                        _ => field.default.clone().unwrap_or_default(),
                    };
                    row.set(&field.name, value);
                }
                self.validate(schema, &row)?;

                for field in &schema.fields {
                    if let (Some(sequence), false) = (&field.sequence, row.is_set(&field.name)) {
                        row.set(&field.name, self.next_sequence_value(sequence)?);
                    }
                }
                self.insert_row(schema, &mut row)?;
                let id = row.require_integer(entity_type, pk)?;
                tracing::trace!(entity = entity_type, id, "inserted");
                *record = row;
                Ok(id)
            }
        }
    }

    fn insert_row(&self, schema: &EntitySchema, row: &mut Record) -> Result<()> {
        let pk = schema.primary_key();
        let fields: Vec<&str> = schema
            .columns()
            .filter(|c| *c != pk || row.is_set(pk))
            .collect();
        let values: Vec<Value> = fields.iter().map(|c| row.value(c)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            schema.table,
            fields.join(", "),
            vec!["?"; fields.len()].join(", ")
        );
        self.execute(&schema.name, &sql, &values)?;
        if !row.is_set(pk) {
            row.set(pk, self.conn.last_insert_rowid());
        }
        Ok(())
    }

    fn update_row(&self, schema: &EntitySchema, row: &Record) -> Result<()> {
        let pk = schema.primary_key();
        let fields: Vec<&str> = schema.columns().filter(|c| *c != pk).collect();
        let assignments: Vec<String> = fields.iter().map(|c| format!("{c} = ?")).collect();
        let mut values: Vec<Value> = fields.iter().map(|c| row.value(c)).collect();
        values.push(row.value(pk));
        let sql = format!(
            "UPDATE {} SET {} WHERE {pk} = ?",
            schema.table,
            assignments.join(", ")
        );
        self.execute(&schema.name, &sql, &values)?;
        Ok(())
    }

    /// Load one row by primary key.
    pub fn load(&self, entity_type: &str, id: i64) -> Result<Record> {
        let schema = self.registry.describe(entity_type)?;
        let sql = format!(
            "SELECT {} FROM {} t0 WHERE t0.{} = ?",
            schema.select_list("t0"),
            schema.table,
            schema.primary_key()
        );
        let rows = self.fetch_rows(&sql, &[Value::Integer(id)])?;
        rows.first()
            .map(|row| schema.record_from_values(row))
            .ok_or_else(|| Error::not_found(entity_type, id))
    }

    /// Delete one row. Children referencing it are left in place; association
    /// rows naming it are removed.
    pub fn delete(&self, entity_type: &str, id: i64) -> Result<bool> {
        let schema = self.registry.describe(entity_type)?;
        self.transaction(|session| {
            let mut cleared = HashSet::new();
            for owner in session.registry.entities() {
                for rel in &owner.relationships {
                    let Some(ref assoc) = rel.association else {
                        continue;
                    };
                    let column = if owner.name == entity_type {
                        &assoc.local_column
                    } else if rel.target == entity_type {
                        &assoc.remote_column
                    } else {
                        continue;
                    };
                    if !cleared.insert((assoc.table.clone(), column.clone())) {
                        continue;
                    }
                    let sql = format!("DELETE FROM {} WHERE {column} = ?", assoc.table);
                    session.execute(&assoc.table, &sql, &[Value::Integer(id)])?;
                }
            }

            let sql = format!("DELETE FROM {} WHERE {} = ?", schema.table, schema.primary_key());
            let deleted = session.execute(entity_type, &sql, &[Value::Integer(id)])? > 0;
            if deleted {
                tracing::trace!(entity = entity_type, id, "deleted");
            }
            Ok(deleted)
        })
    }

    /// Insert the association row `left_id -> right_id` of a many-to-many
    /// relationship. Returns `false` when the link already existed.
    pub fn link(&self, entity_type: &str, relationship: &str, left_id: i64, right_id: i64) -> Result<bool> {
        let assoc = self.registry.relationship(entity_type, relationship)?.association()?;
        let sql = format!(
            "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?, ?)",
            assoc.table, assoc.local_column, assoc.remote_column
        );
        let inserted = self.execute(&assoc.table, &sql, &[left_id.into(), right_id.into()])?;
        Ok(inserted > 0)
    }

    /// Remove an association row. The linked entities are untouched.
    pub fn unlink(&self, entity_type: &str, relationship: &str, left_id: i64, right_id: i64) -> Result<bool> {
        let assoc = self.registry.relationship(entity_type, relationship)?.association()?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ? AND {} = ?",
            assoc.table, assoc.local_column, assoc.remote_column
        );
        let removed = self.execute(&assoc.table, &sql, &[left_id.into(), right_id.into()])?;
        Ok(removed > 0)
    }

    /// Ids linked from `left_id`, in link order.
    pub fn linked_ids(&self, entity_type: &str, relationship: &str, left_id: i64) -> Result<Vec<i64>> {
        let assoc = self.registry.relationship(entity_type, relationship)?.association()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ? ORDER BY rowid",
            assoc.remote_column, assoc.table, assoc.local_column
        );
        Ok(self
            .select(&sql, &[left_id.into()])?
            .iter()
            .filter_map(|row| row.first().and_then(Value::as_i64))
            .collect())
    }

    /// Persist `entity` and store the assigned id on it.
    pub fn insert_entity<E: Entity>(&self, entity: &mut E) -> Result<i64> {
        let mut record = entity.to_record();
        let id = self.save(E::ENTITY, &mut record)?;
        entity.set_id(id);
        Ok(id)
    }

    pub fn load_entity<E: Entity>(&self, id: i64) -> Result<E> {
        E::from_record(&self.load(E::ENTITY, id)?)
    }

    /// Delete a saved entity; an unsaved one is a no-op.
    pub fn delete_entity<E: Entity>(&self, entity: &E) -> Result<bool> {
        match entity.id() {
            Some(id) => self.delete(E::ENTITY, id),
            None => Ok(false),
        }
    }

    /// Flush an object graph in one transaction and return the root's id.
    ///
    /// Many-to-one targets are saved first and the local foreign key taken
    /// from them, then the root, then every loaded collection: one-to-many
    /// children receive the root's key, many-to-many targets are saved and
    /// the association rows made to match the collection exactly.
    pub fn save_graph(&self, instance: &mut Instance) -> Result<i64> {
        self.transaction(|session| session.flush(instance, None))
    }

    /// Flush `instance`, leaving out the slot `skip` that points back at the
    /// caller already being flushed.
    fn flush(&self, instance: &mut Instance, skip: Option<&str>) -> Result<i64> {
        let entity_type = instance.entity_type().to_string();
        let schema = self.registry.describe(&entity_type)?;
        let edge = |name: &str| {
            schema.get_relationship(name).ok_or_else(|| {
                Error::Internal(format!("slot {entity_type}.{name} has no relationship"))
            })
        };

        let mut foreign_keys = Vec::new();
        for (name, related) in instance.loaded_mut() {
            if skip == Some(name) {
                continue;
            }
            let rel = edge(name)?;
            if let (Cardinality::ManyToOne, Related::One(Some(target))) = (rel.cardinality, related) {
                self.flush(target, rel.back_populates.as_deref())?;
                foreign_keys.push((rel.local_column.clone(), target.get(&rel.remote_column)));
            }
        }
        for (column, value) in foreign_keys {
            instance.set(&column, value);
        }

        let id = self.save(&entity_type, instance.record_mut())?;
        let record = instance.record().clone();

        // Children detached since the last flush, unless they moved elsewhere
        for (name, child_id) in instance.detached() {
            let rel = edge(name)?;
            let target = self.registry.describe(&rel.target)?;
            let sql = format!(
                "UPDATE {table} SET {fk} = NULL WHERE {pk} = ? AND {fk} = ?",
                table = target.table,
                fk = rel.remote_column,
                pk = target.primary_key()
            );
            self.execute(
                &target.name,
                &sql,
                &[Value::Integer(*child_id), record.value(&rel.local_column)],
            )?;
        }

        let snapshot = instance.snapshot();
        let token = instance.token();
        for (name, related) in instance.loaded_mut() {
            if skip == Some(name) {
                continue;
            }
            let rel = edge(name)?;
            let back = rel.back_populates.as_deref();
            match (rel.cardinality, related) {
                (Cardinality::OneToMany, Related::Many(members)) => {
                    let key = record.value(&rel.local_column);
                    for child in members.iter_mut() {
                        child.set(&rel.remote_column, key.clone());
                        if let Some(back) = back {
                            child.set_related(back, Related::One(Some(Box::new(snapshot.clone()))))?;
                        }
                        self.flush(child, back)?;
                    }
                }
                (Cardinality::ManyToMany, Related::Many(members)) => {
                    let mut wanted = Vec::with_capacity(members.len());
                    for member in members.iter_mut() {
                        wanted.push(self.flush(member, back)?);
                    }
                    let left = record.require_integer(&entity_type, &rel.local_column)?;
                    let current = self.linked_ids(&entity_type, name, left)?;
                    for right in wanted.iter().filter(|id| !current.contains(id)) {
                        self.link(&entity_type, name, left, *right)?;
                    }
                    for right in current.iter().filter(|id| !wanted.contains(id)) {
                        self.unlink(&entity_type, name, left, *right)?;
                    }
                }
                (Cardinality::ManyToOne, Related::One(Some(target))) => {
                    // The target lists this instance as it was before saving
                    let Some(back) = back else {
                        continue;
                    };
                    if let Some(Related::Many(members)) = target.loaded_slot_mut(back) {
                        for member in members.iter_mut().filter(|m| m.token() == token) {
                            *member = snapshot.clone();
                        }
                    }
                }
                _ => {}
            }
        }

        instance.clear_detached();
        Ok(id)
    }
}
