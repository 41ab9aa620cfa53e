//! Rust models matching the database schema.
//!
//! Each scenario module declares its entity types twice over: as plain
//! structs implementing [`Entity`] for typed access, and as an
//! [`EntitySchema`](crate::schema::EntitySchema) batch for the registry.

pub mod accounts;
pub mod blog;

use relmap_common::Result;

use crate::value::Record;

/// A typed view of one entity type's rows.
pub trait Entity: Sized {
    /// Registered entity type name.
    const ENTITY: &'static str;

    /// Primary key, `None` until the entity has been saved.
    fn id(&self) -> Option<i64>;

    fn set_id(&mut self, id: i64);

    fn to_record(&self) -> Record;

    fn from_record(record: &Record) -> Result<Self>;
}
