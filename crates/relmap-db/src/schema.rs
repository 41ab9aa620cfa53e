//! Schema registry: entity types, their fields, relationship edges and
//! row-level checks.
//!
//! Entities are declared with small builders and registered in batches so
//! that mutually referencing types (`User.addresses` / `Address.user`) can be
//! validated together.
//!
//! # Example
//!
//! ```
//! use relmap_db::schema::{EntitySchema, FieldDef, RelationshipDef, SchemaRegistry};
//!
//! let user = EntitySchema::new("User", "users")
//!     .field(FieldDef::integer("id").primary_key())
//!     .field(FieldDef::string("name", 50))
//!     .relationship(
//!         RelationshipDef::one_to_many("addresses", "Address", "user_id")
//!             .order_by("id")
//!             .back_populates("user"),
//!     );
//! let address = EntitySchema::new("Address", "addresses")
//!     .field(FieldDef::integer("id").primary_key())
//!     .field(FieldDef::text("email_address").required())
//!     .field(FieldDef::integer("user_id").references("users", "id"))
//!     .relationship(RelationshipDef::many_to_one("user", "User", "user_id").back_populates("addresses"));
//!
//! let mut registry = SchemaRegistry::new();
//! registry.register_all(vec![user, address]).unwrap();
//! assert_eq!(registry.describe("Address").unwrap().table, "addresses");
//! ```

use std::collections::{HashMap, HashSet};

use relmap_common::{Error, Result};

use crate::value::{Record, Value};

/// Semantic column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    Text,
    /// Text with a declared maximum length.
    String(usize),
}

impl FieldType {
    pub fn sql_type(&self) -> String {
        match self {
            FieldType::Integer => "INTEGER".to_string(),
            FieldType::Text => "TEXT".to_string(),
            FieldType::String(len) => format!("VARCHAR({len})"),
        }
    }
}

/// A foreign-key declaration on a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

/// One column of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
    pub unique: bool,
    pub primary_key: bool,
    /// Assigned from the table's monotonic sequence when absent on insert.
    pub generated: bool,
    /// Named counter the generated value is drawn from instead of the
    /// table's own AUTOINCREMENT sequence.
    pub sequence: Option<String>,
    pub default: Option<Value>,
    pub references: Option<ForeignKey>,
}

impl FieldDef {
    fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            nullable: true,
            unique: false,
            primary_key: false,
            generated: false,
            sequence: None,
            default: None,
            references: None,
        }
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn string(name: &str, max_len: usize) -> Self {
        Self::new(name, FieldType::String(max_len))
    }

    /// Integer primary key generated from a sequence.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.generated = true;
        self.nullable = false;
        self
    }

    /// Draw generated values from the named sequence.
    pub fn sequence(mut self, name: &str) -> Self {
        self.generated = true;
        self.sequence = Some(name.to_string());
        self
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn references(mut self, table: &str, column: &str) -> Self {
        self.references = Some(ForeignKey {
            table: table.to_string(),
            column: column.to_string(),
        });
        self
    }
}

/// Cardinality of a relationship edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    OneToMany,
    ManyToOne,
    ManyToMany,
}

/// Association table backing a many-to-many edge.
///
/// `local_column` holds the owning entity's key, `remote_column` the
/// target's. The pair is the association row's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationTable {
    pub table: String,
    pub local_column: String,
    pub remote_column: String,
}

impl AssociationTable {
    pub fn new(table: &str, local_column: &str, remote_column: &str) -> Self {
        Self {
            table: table.to_string(),
            local_column: local_column.to_string(),
            remote_column: remote_column.to_string(),
        }
    }

    fn is_mirror_of(&self, other: &AssociationTable) -> bool {
        self.table == other.table
            && self.local_column == other.remote_column
            && self.remote_column == other.local_column
    }
}

/// A relationship edge from one entity type to another.
///
/// Column meaning depends on the cardinality:
///
/// | cardinality | `local_column` | `remote_column` |
/// |-------------|----------------|-----------------|
/// | one-to-many | owner key      | child foreign key |
/// | many-to-one | own foreign key | target key |
/// | many-to-many | owner key     | target key (joined through `association`) |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDef {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    pub local_column: String,
    pub remote_column: String,
    pub association: Option<AssociationTable>,
    /// Column of the target entity that orders the collection.
    pub order_by: Option<String>,
    pub back_populates: Option<String>,
}

impl RelationshipDef {
    pub fn one_to_many(name: &str, target: &str, foreign_key: &str) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            cardinality: Cardinality::OneToMany,
            local_column: "id".to_string(),
            remote_column: foreign_key.to_string(),
            association: None,
            order_by: None,
            back_populates: None,
        }
    }

    pub fn many_to_one(name: &str, target: &str, foreign_key: &str) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            cardinality: Cardinality::ManyToOne,
            local_column: foreign_key.to_string(),
            remote_column: "id".to_string(),
            association: None,
            order_by: None,
            back_populates: None,
        }
    }

    pub fn many_to_many(name: &str, target: &str, association: AssociationTable) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            cardinality: Cardinality::ManyToMany,
            local_column: "id".to_string(),
            remote_column: "id".to_string(),
            association: Some(association),
            order_by: None,
            back_populates: None,
        }
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by = Some(column.to_string());
        self
    }

    pub fn back_populates(mut self, name: &str) -> Self {
        self.back_populates = Some(name.to_string());
        self
    }

    pub fn is_collection(&self) -> bool {
        self.cardinality != Cardinality::ManyToOne
    }

    /// The association table of a many-to-many edge.
    pub fn association(&self) -> Result<&AssociationTable> {
        self.association.as_ref().ok_or_else(|| {
            Error::schema(format!(
                "relationship '{}' has no association table",
                self.name
            ))
        })
    }
}

/// Row-level check constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckDef {
    /// Exactly one of the columns must be non-null.
    ExactlyOne { name: String, columns: Vec<String> },
}

impl CheckDef {
    pub fn exactly_one(name: &str, columns: &[&str]) -> Self {
        CheckDef::ExactlyOne {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CheckDef::ExactlyOne { name, .. } => name,
        }
    }

    pub fn columns(&self) -> &[String] {
        match self {
            CheckDef::ExactlyOne { columns, .. } => columns,
        }
    }

    /// Evaluate the check against a full row; `Err` carries the reason.
    pub fn evaluate(&self, record: &Record) -> std::result::Result<(), String> {
        match self {
            CheckDef::ExactlyOne { name, columns } => {
                let set: Vec<&str> = columns
                    .iter()
                    .filter(|c| record.is_set(c))
                    .map(String::as_str)
                    .collect();
                match set.len() {
                    1 => Ok(()),
                    0 => Err(format!(
                        "check '{name}' requires exactly one of [{}] but none is set",
                        columns.join(", ")
                    )),
                    _ => Err(format!(
                        "check '{name}' requires exactly one of [{}] but [{}] are set",
                        columns.join(", "),
                        set.join(", ")
                    )),
                }
            }
        }
    }

    /// SQL expression for the table's `CHECK` clause.
    pub fn sql(&self) -> String {
        match self {
            CheckDef::ExactlyOne { columns, .. } => {
                let terms: Vec<String> = columns
                    .iter()
                    .map(|c| format!("({c} IS NOT NULL)"))
                    .collect();
                format!("{} = 1", terms.join(" + "))
            }
        }
    }
}

/// Everything declared about one entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySchema {
    pub name: String,
    pub table: String,
    pub fields: Vec<FieldDef>,
    pub relationships: Vec<RelationshipDef>,
    pub checks: Vec<CheckDef>,
}

impl EntitySchema {
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            fields: Vec::new(),
            relationships: Vec::new(),
            checks: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn relationship(mut self, relationship: RelationshipDef) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn check(mut self, check: CheckDef) -> Self {
        self.checks.push(check);
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.get_field(name).is_some()
    }

    pub fn get_relationship(&self, name: &str) -> Option<&RelationshipDef> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Name of the primary-key column.
    pub fn primary_key(&self) -> &str {
        self.fields
            .iter()
            .find(|f| f.primary_key)
            .map(|f| f.name.as_str())
            .unwrap_or("id")
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// `alias.col, alias.col, ...` in declaration order.
    pub fn select_list(&self, alias: &str) -> String {
        self.fields
            .iter()
            .map(|f| format!("{alias}.{}", f.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Build a record from a slice of values in declaration order.
    pub fn record_from_values(&self, values: &[Value]) -> Record {
        self.fields
            .iter()
            .zip(values.iter())
            .map(|(f, v)| (f.name.clone(), v.clone()))
            .collect()
    }

    fn ensure_column(&self, column: &str, context: &str) -> Result<()> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(Error::schema(format!(
                "{context} references undeclared column {}.{column}",
                self.name
            )))
        }
    }
}

/// Registry of entity schemas, in registration order.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entities: Vec<EntitySchema>,
    index: HashMap<String, usize>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single entity. Its relationships may only target entities
    /// that are already registered (or itself).
    pub fn register(&mut self, entity: EntitySchema) -> Result<()> {
        self.register_all(vec![entity])
    }

    /// Register a batch of entities validated together, so the batch may
    /// contain mutually referencing types. Nothing is registered on error.
    pub fn register_all(&mut self, batch: Vec<EntitySchema>) -> Result<()> {
        let mut candidate = self.clone();
        for entity in batch {
            if candidate.index.contains_key(&entity.name) {
                return Err(Error::schema(format!(
                    "entity type '{}' is already registered",
                    entity.name
                )));
            }
            if candidate.entities.iter().any(|e| e.table == entity.table) {
                return Err(Error::schema(format!(
                    "table '{}' is already mapped",
                    entity.table
                )));
            }
            candidate
                .index
                .insert(entity.name.clone(), candidate.entities.len());
            candidate.entities.push(entity);
        }

        for entity in &candidate.entities {
            candidate.validate_entity(entity)?;
        }
        candidate.validate_associations()?;

        *self = candidate;
        Ok(())
    }

    /// Look up an entity type.
    pub fn describe(&self, entity_type: &str) -> Result<&EntitySchema> {
        self.index
            .get(entity_type)
            .map(|&i| &self.entities[i])
            .ok_or_else(|| Error::schema(format!("unknown entity type '{entity_type}'")))
    }

    /// Look up a relationship edge of an entity type.
    pub fn relationship(&self, entity_type: &str, name: &str) -> Result<&RelationshipDef> {
        self.describe(entity_type)?
            .get_relationship(name)
            .ok_or_else(|| {
                Error::schema(format!(
                    "entity type '{entity_type}' has no relationship '{name}'"
                ))
            })
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntitySchema> {
        self.entities.iter()
    }

    pub fn by_table(&self, table: &str) -> Option<&EntitySchema> {
        self.entities.iter().find(|e| e.table == table)
    }

    /// Every distinct association table with the entity and edge that first
    /// declared it.
    pub fn association_tables(&self) -> Vec<(&EntitySchema, &RelationshipDef)> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for entity in &self.entities {
            for rel in &entity.relationships {
                if let Some(ref assoc) = rel.association {
                    if seen.insert(assoc.table.clone()) {
                        out.push((entity, rel));
                    }
                }
            }
        }
        out
    }

    fn validate_entity(&self, entity: &EntitySchema) -> Result<()> {
        let mut names = HashSet::new();
        for field in &entity.fields {
            if !names.insert(field.name.as_str()) {
                return Err(Error::schema(format!(
                    "duplicate field {}.{}",
                    entity.name, field.name
                )));
            }
            if let Some(ref fk) = field.references {
                let target = self.by_table(&fk.table).ok_or_else(|| {
                    Error::schema(format!(
                        "{}.{} references undeclared table '{}'",
                        entity.name, field.name, fk.table
                    ))
                })?;
                target.ensure_column(&fk.column, &format!("{}.{}", entity.name, field.name))?;
            }
            if field.sequence.is_some() && field.field_type != FieldType::Integer {
                return Err(Error::schema(format!(
                    "sequence on non-integer field {}.{}",
                    entity.name, field.name
                )));
            }
        }

        let pks: Vec<&FieldDef> = entity.fields.iter().filter(|f| f.primary_key).collect();
        match pks.as_slice() {
            [pk] if pk.field_type == FieldType::Integer => {}
            [_] => {
                return Err(Error::schema(format!(
                    "primary key of '{}' must be an integer",
                    entity.name
                )))
            }
            _ => {
                return Err(Error::schema(format!(
                    "entity type '{}' must declare exactly one primary key",
                    entity.name
                )))
            }
        }

        let mut rel_names = HashSet::new();
        for rel in &entity.relationships {
            if !rel_names.insert(rel.name.as_str()) || entity.has_column(&rel.name) {
                return Err(Error::schema(format!(
                    "relationship name {}.{} collides with another field or relationship",
                    entity.name, rel.name
                )));
            }
            self.validate_relationship(entity, rel)?;
        }

        for check in &entity.checks {
            for column in check.columns() {
                entity.ensure_column(column, &format!("check '{}'", check.name()))?;
            }
        }

        Ok(())
    }

    fn validate_relationship(&self, entity: &EntitySchema, rel: &RelationshipDef) -> Result<()> {
        let context = format!("relationship {}.{}", entity.name, rel.name);
        let target = self.describe(&rel.target).map_err(|_| {
            Error::schema(format!(
                "{context} targets unknown entity type '{}'",
                rel.target
            ))
        })?;

        entity.ensure_column(&rel.local_column, &context)?;
        target.ensure_column(&rel.remote_column, &context)?;

        match rel.cardinality {
            Cardinality::ManyToMany => {
                rel.association()?;
            }
            _ if rel.association.is_some() => {
                return Err(Error::schema(format!(
                    "{context} declares an association table but is not many-to-many"
                )));
            }
            _ => {}
        }

        if let Some(ref order) = rel.order_by {
            target.ensure_column(order, &format!("{context} ordering"))?;
        }

        if let Some(ref back) = rel.back_populates {
            let reverse = target.get_relationship(back).ok_or_else(|| {
                Error::schema(format!(
                    "{context} back-populates undeclared relationship {}.{back}",
                    target.name
                ))
            })?;
            if reverse.target != entity.name {
                return Err(Error::schema(format!(
                    "{context} back-populates {}.{back}, which targets '{}'",
                    target.name, reverse.target
                )));
            }
        }

        Ok(())
    }

    fn validate_associations(&self) -> Result<()> {
        let mut by_table: HashMap<&str, &AssociationTable> = HashMap::new();
        for entity in &self.entities {
            for rel in &entity.relationships {
                let Some(ref assoc) = rel.association else {
                    continue;
                };
                if assoc.local_column == assoc.remote_column {
                    return Err(Error::schema(format!(
                        "association table '{}' uses '{}' for both sides",
                        assoc.table, assoc.local_column
                    )));
                }
                if self.by_table(&assoc.table).is_some() {
                    return Err(Error::schema(format!(
                        "association table '{}' collides with an entity table",
                        assoc.table
                    )));
                }
                match by_table.get(assoc.table.as_str()) {
                    Some(existing) if *existing == assoc || existing.is_mirror_of(assoc) => {}
                    Some(_) => {
                        return Err(Error::schema(format!(
                            "association table '{}' is declared with inconsistent columns",
                            assoc.table
                        )))
                    }
                    None => {
                        by_table.insert(assoc.table.as_str(), assoc);
                    }
                }
            }
        }
        Ok(())
    }
}
