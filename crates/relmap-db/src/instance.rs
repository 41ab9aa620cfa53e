//! In-memory object graph.
//!
//! An [`Instance`] is one entity's row plus a slot per declared relationship.
//! Slots start empty and are filled either by an eager loader strategy or on
//! first access through [`Instance::related`], after which the result is
//! cached for the lifetime of the instance.
//!
//! Back-populated pairs (`User.addresses` / `Address.user`) are two
//! independent pointers: the child's foreign-key column and the parent's
//! collection. [`Instance::attach`] keeps them consistent on mutation and
//! [`Instance::check_back_references`] verifies them.

use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use relmap_common::{Error, Result};

use crate::loader;
use crate::models::Entity;
use crate::query::Query;
use crate::schema::{Cardinality, EntitySchema, SchemaRegistry};
use crate::session::Session;
use crate::value::{Record, Value};

/// Contents of a loaded relationship slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    Many(Vec<Instance>),
    One(Option<Box<Instance>>),
}

impl Related {
    pub fn as_many(&self) -> Option<&[Instance]> {
        match self {
            Related::Many(items) => Some(items),
            Related::One(_) => None,
        }
    }

    pub fn as_one(&self) -> Option<Option<&Instance>> {
        match self {
            Related::One(target) => Some(target.as_deref()),
            Related::Many(_) => None,
        }
    }

    pub(crate) fn empty(cardinality: Cardinality) -> Self {
        match cardinality {
            Cardinality::ManyToOne => Related::One(None),
            _ => Related::Many(Vec::new()),
        }
    }
}

/// One entity row with its relationship slots.
#[derive(Debug, Clone)]
pub struct Instance {
    entity: String,
    primary_key: String,
    record: Record,
    relations: BTreeMap<String, OnceCell<Related>>,
    /// Ids removed from one-to-many collections, cleared on the next flush.
    detached: Vec<(String, i64)>,
    /// Shared by an instance and its back-reference snapshots.
    token: u64,
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.entity == other.entity
            && self.record == other.record
            && self.relations == other.relations
            && self.detached == other.detached
    }
}

fn next_token() -> u64 {
    static TOKENS: AtomicU64 = AtomicU64::new(0);
    TOKENS.fetch_add(1, Ordering::Relaxed)
}

fn no_relationship(entity: &str, name: &str) -> Error {
    Error::schema(format!("entity type '{entity}' has no relationship '{name}'"))
}

impl Instance {
    /// An empty, unsaved instance of `entity_type`.
    pub fn new(registry: &SchemaRegistry, entity_type: &str) -> Result<Self> {
        Ok(Self::from_record(registry.describe(entity_type)?, Record::new()))
    }

    pub fn from_record(schema: &EntitySchema, record: Record) -> Self {
        Self {
            entity: schema.name.clone(),
            primary_key: schema.primary_key().to_string(),
            record,
            relations: schema
                .relationships
                .iter()
                .map(|r| (r.name.clone(), OnceCell::new()))
                .collect(),
            detached: Vec::new(),
            token: next_token(),
        }
    }

    /// The row alone, with every relationship slot unloaded. Used as the
    /// far side of a back-populated pair so graphs stay acyclic.
    pub(crate) fn snapshot(&self) -> Self {
        Self {
            entity: self.entity.clone(),
            primary_key: self.primary_key.clone(),
            record: self.record.clone(),
            relations: self
                .relations
                .keys()
                .map(|name| (name.clone(), OnceCell::new()))
                .collect(),
            detached: Vec::new(),
            token: self.token,
        }
    }

    pub(crate) fn token(&self) -> u64 {
        self.token
    }

    pub fn from_entity<E: Entity>(registry: &SchemaRegistry, entity: &E) -> Result<Self> {
        Ok(Self::from_record(
            registry.describe(E::ENTITY)?,
            entity.to_record(),
        ))
    }

    pub fn entity_type(&self) -> &str {
        &self.entity
    }

    pub fn id(&self) -> Option<i64> {
        self.record.integer(&self.primary_key)
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    pub fn get(&self, column: &str) -> Value {
        self.record.value(column)
    }

    pub fn set(&mut self, column: &str, value: impl Into<Value>) {
        self.record.set(column, value);
    }

    /// Typed view of the row.
    pub fn as_entity<E: Entity>(&self) -> Result<E> {
        if self.entity != E::ENTITY {
            return Err(Error::schema(format!(
                "instance of '{}' cannot be read as '{}'",
                self.entity,
                E::ENTITY
            )));
        }
        E::from_record(&self.record)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.relations.get(name).is_some_and(|slot| slot.get().is_some())
    }

    /// The slot contents if already loaded, without touching storage.
    pub fn loaded(&self, name: &str) -> Option<&Related> {
        self.relations.get(name).and_then(OnceCell::get)
    }

    /// The relationship, fetching it on first access.
    pub fn related(&self, session: &Session<'_>, name: &str) -> Result<&Related> {
        let slot = self
            .relations
            .get(name)
            .ok_or_else(|| no_relationship(&self.entity, name))?;
        if let Some(related) = slot.get() {
            return Ok(related);
        }

        let rel = session.registry().relationship(&self.entity, name)?;
        let related = loader::load_lazy(session, self, rel)?;
        Ok(slot.get_or_init(|| related))
    }

    /// A collection relationship, fetching it on first access.
    pub fn collection(&self, session: &Session<'_>, name: &str) -> Result<&[Instance]> {
        self.related(session, name)?
            .as_many()
            .ok_or_else(|| Error::schema(format!("{}.{name} is not a collection", self.entity)))
    }

    /// A many-to-one relationship, fetching it on first access.
    pub fn reference(&self, session: &Session<'_>, name: &str) -> Result<Option<&Instance>> {
        self.related(session, name)?
            .as_one()
            .ok_or_else(|| Error::schema(format!("{}.{name} is a collection", self.entity)))
    }

    /// Replace a relationship slot.
    pub fn set_related(&mut self, name: &str, related: Related) -> Result<()> {
        let slot = self
            .relations
            .get_mut(name)
            .ok_or_else(|| no_relationship(&self.entity, name))?;
        *slot = OnceCell::from(related);
        Ok(())
    }

    /// The collection of `name`, initialised empty if not loaded yet.
    pub(crate) fn many_slot_mut(&mut self, name: &str) -> Result<&mut Vec<Instance>> {
        let entity = self.entity.clone();
        let slot = self
            .relations
            .get_mut(name)
            .ok_or_else(|| no_relationship(&entity, name))?;
        if slot.get().is_none() {
            let _ = slot.set(Related::Many(Vec::new()));
        }
        match slot.get_mut() {
            Some(Related::Many(items)) => Ok(items),
            _ => Err(Error::schema(format!("{entity}.{name} is not a collection"))),
        }
    }

    /// Loaded slots, mutably.
    pub(crate) fn loaded_mut(&mut self) -> impl Iterator<Item = (&str, &mut Related)> {
        self.relations
            .iter_mut()
            .filter_map(|(name, slot)| slot.get_mut().map(|r| (name.as_str(), r)))
    }

    /// The slot `name` if loaded, mutably.
    pub(crate) fn loaded_slot_mut(&mut self, name: &str) -> Option<&mut Related> {
        self.relations.get_mut(name).and_then(OnceCell::get_mut)
    }

    pub(crate) fn detached(&self) -> &[(String, i64)] {
        &self.detached
    }

    pub(crate) fn clear_detached(&mut self) {
        self.detached.clear();
    }

    /// A query over the targets of `name` restricted to this instance, for
    /// relationships too large to hold in memory.
    ///
    /// The owner must be saved; a many-to-many edge also needs a
    /// back-populated relationship on the target to filter through.
    pub fn related_query<'s>(&self, session: &'s Session<'s>, name: &str) -> Result<Query<'s>> {
        let rel = session.registry().relationship(&self.entity, name)?;
        let key = self.record.value(&rel.local_column);
        if key.is_null() {
            return Err(Error::schema(format!(
                "{}.{name} cannot be queried before {} is set",
                self.entity, rel.local_column
            )));
        }

        match rel.cardinality {
            Cardinality::OneToMany | Cardinality::ManyToOne => {
                Ok(session.query(&rel.target).filter_by(&rel.remote_column, key))
            }
            Cardinality::ManyToMany => {
                let back = rel.back_populates.as_deref().ok_or_else(|| {
                    Error::schema(format!(
                        "{}.{name} has no back-populated relationship to query through",
                        self.entity
                    ))
                })?;
                Ok(session.query(&rel.target).any(back, &rel.local_column, key))
            }
        }
    }

    /// Add `child` to the relationship `name`, keeping both sides consistent.
    ///
    /// * one-to-many: the child's foreign key is set to this instance's key
    ///   (when known) and the child is appended;
    /// * many-to-one: this instance's foreign key is set to the target's key;
    /// * many-to-many: the target is appended unless already present.
    ///
    /// When the edge is back-populated the far side is filled too: the child
    /// of a one-to-many edge points back at a snapshot of this instance, and
    /// the target of a many-to-one edge lists this instance. A persisted
    /// instance loads the existing collection first so that a later flush
    /// sees the full membership.
    pub fn attach(&mut self, session: &Session<'_>, name: &str, mut child: Instance) -> Result<()> {
        let rel = session.registry().relationship(&self.entity, name)?;
        if child.entity != rel.target {
            return Err(Error::schema(format!(
                "{}.{name} holds '{}', not '{}'",
                self.entity, rel.target, child.entity
            )));
        }

        match rel.cardinality {
            Cardinality::OneToMany => {
                self.related(session, name)?;
                let key = self.record.value(&rel.local_column);
                if !key.is_null() {
                    child.record.set(&rel.remote_column, key);
                }
                if let Some(ref back) = rel.back_populates {
                    child.set_related(back, Related::One(Some(Box::new(self.snapshot()))))?;
                }
                self.many_slot_mut(name)?.push(child);
            }
            Cardinality::ManyToOne => {
                let key = child.record.value(&rel.remote_column);
                if !key.is_null() {
                    self.record.set(&rel.local_column, key);
                }
                if let Some(ref back) = rel.back_populates {
                    child.related(session, back)?;
                    let mirror = self.snapshot();
                    let members = child.many_slot_mut(back)?;
                    members.retain(|m| {
                        m.token != mirror.token && (mirror.id().is_none() || m.id() != mirror.id())
                    });
                    members.push(mirror);
                }
                self.set_related(name, Related::One(Some(Box::new(child))))?;
            }
            Cardinality::ManyToMany => {
                self.related(session, name)?;
                let items = self.many_slot_mut(name)?;
                let duplicate = child.id().is_some() && items.iter().any(|i| i.id() == child.id());
                if !duplicate {
                    items.push(child);
                }
            }
        }
        Ok(())
    }

    /// Remove the member with primary key `id` from the collection `name`.
    ///
    /// A removed one-to-many child has its foreign key cleared, here and in
    /// storage on the next flush; a removed many-to-many target loses only
    /// its association row.
    pub fn detach(&mut self, session: &Session<'_>, name: &str, id: i64) -> Result<Option<Instance>> {
        let rel = session.registry().relationship(&self.entity, name)?;
        if !rel.is_collection() {
            return Err(Error::schema(format!("{}.{name} is not a collection", self.entity)));
        }
        self.related(session, name)?;

        let items = self.many_slot_mut(name)?;
        let Some(pos) = items.iter().position(|i| i.id() == Some(id)) else {
            return Ok(None);
        };
        let mut removed = items.remove(pos);
        let owner = self.id();
        match rel.cardinality {
            Cardinality::OneToMany => {
                removed.record.set(&rel.remote_column, Value::Null);
                if let Some(ref back) = rel.back_populates {
                    removed.set_related(back, Related::One(None))?;
                }
                self.detached.push((name.to_string(), id));
            }
            Cardinality::ManyToMany => {
                if let (Some(back), Some(owner)) = (rel.back_populates.as_deref(), owner) {
                    if let Some(Related::Many(members)) = removed.loaded_slot_mut(back) {
                        members.retain(|m| m.id() != Some(owner));
                    }
                }
            }
            Cardinality::ManyToOne => {}
        }
        Ok(Some(removed))
    }

    /// Verify that every loaded relationship agrees with the foreign keys on
    /// both sides, recursively.
    pub fn check_back_references(&self, registry: &SchemaRegistry) -> Result<()> {
        for (name, slot) in &self.relations {
            let Some(related) = slot.get() else {
                continue;
            };
            let rel = registry.relationship(&self.entity, name)?;
            match (rel.cardinality, related) {
                (Cardinality::OneToMany, Related::Many(children)) => {
                    let key = self.record.value(&rel.local_column);
                    for child in children {
                        let fk = child.record.value(&rel.remote_column);
                        if !key.is_null() && fk != key {
                            return Err(Error::constraint(
                                &self.entity,
                                format!(
                                    "{}.{name} holds {} {} whose {} is {fk}, expected {key}",
                                    self.entity,
                                    child.entity,
                                    child.get(&child.primary_key),
                                    rel.remote_column
                                ),
                            ));
                        }
                        child.check_back_references(registry)?;
                    }
                }
                (Cardinality::ManyToOne, Related::One(target)) => {
                    if let Some(target) = target {
                        let key = target.record.value(&rel.remote_column);
                        let fk = self.record.value(&rel.local_column);
                        if !key.is_null() && fk != key {
                            return Err(Error::constraint(
                                &self.entity,
                                format!(
                                    "{}.{name} points at {} {key} but {} is {fk}",
                                    self.entity, target.entity, rel.local_column
                                ),
                            ));
                        }
                        target.check_back_references(registry)?;
                    }
                }
                (Cardinality::ManyToMany, Related::Many(items)) => {
                    for item in items {
                        item.check_back_references(registry)?;
                    }
                }
                _ => {
                    return Err(Error::Internal(format!(
                        "slot {}.{name} does not match its cardinality",
                        self.entity
                    )))
                }
            }
        }
        Ok(())
    }

    /// JSON view of the row and every loaded relationship.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (column, value) in self.record.iter() {
            let json = match value {
                Value::Null => serde_json::Value::Null,
                Value::Integer(i) => serde_json::Value::from(*i),
                Value::Text(s) => serde_json::Value::from(s.as_str()),
            };
            map.insert(column.to_string(), json);
        }
        for (name, slot) in &self.relations {
            let json = match slot.get() {
                None => continue,
                Some(Related::Many(items)) => {
                    serde_json::Value::Array(items.iter().map(Instance::to_json).collect())
                }
                Some(Related::One(Some(target))) => target.to_json(),
                Some(Related::One(None)) => serde_json::Value::Null,
            };
            map.insert(name.clone(), json);
        }
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::accounts::{self, Address, User};
    use crate::models::blog::{self, BlogPost, Keyword};
    use crate::pool::{get_conn, init_memory_pool};

    #[test]
    fn new_instance_has_unloaded_slots() {
        let registry = accounts::registry().unwrap();
        let user = Instance::new(&registry, "User").unwrap();
        assert_eq!(user.entity_type(), "User");
        assert_eq!(user.id(), None);
        assert!(!user.is_loaded("addresses"));
        assert!(Instance::new(&registry, "Ghost").is_err());
    }

    #[test]
    fn transient_collection_is_empty_without_fetch() {
        let registry = accounts::registry().unwrap();
        let pool = init_memory_pool(&registry).unwrap();
        let conn = get_conn(&pool).unwrap();
        let session = Session::new(&conn, &registry);

        let jack = Instance::from_entity(&registry, &User::new("Jack", "Jack Doe", "jc123")).unwrap();
        assert!(jack.collection(&session, "addresses").unwrap().is_empty());
        assert_eq!(session.fetch_count(), 0);
    }

    #[test]
    fn lazy_load_fetches_once() {
        let registry = accounts::registry().unwrap();
        let pool = init_memory_pool(&registry).unwrap();
        let conn = get_conn(&pool).unwrap();
        let session = Session::new(&conn, &registry);

        let mut user = User::new("Jack", "Jack Doe", "jc123");
        session.insert_entity(&mut user).unwrap();
        let user_id = user.id.unwrap();
        session
            .insert_entity(&mut Address::new("jack.doe@gmail.com").with_user_id(user_id))
            .unwrap();

        let jack = Instance::from_entity(&registry, &user).unwrap();
        session.reset_fetch_count();
        assert_eq!(jack.collection(&session, "addresses").unwrap().len(), 1);
        assert_eq!(jack.collection(&session, "addresses").unwrap().len(), 1);
        assert_eq!(session.fetch_count(), 1);
        assert!(jack.is_loaded("addresses"));
    }

    #[test]
    fn attach_sets_foreign_keys_both_ways() {
        let registry = accounts::registry().unwrap();
        let pool = init_memory_pool(&registry).unwrap();
        let conn = get_conn(&pool).unwrap();
        let session = Session::new(&conn, &registry);

        let mut saved = User::new("Jack", "Jack Doe", "jc123");
        session.insert_entity(&mut saved).unwrap();
        let mut jack = Instance::from_entity(&registry, &saved).unwrap();

        let address = Instance::from_entity(&registry, &Address::new("jack.doe@gmail.com")).unwrap();
        jack.attach(&session, "addresses", address).unwrap();
        let child = &jack.loaded("addresses").unwrap().as_many().unwrap()[0];
        assert_eq!(child.get("user_id"), Value::Integer(saved.id.unwrap()));
        jack.check_back_references(&registry).unwrap();

        let mut orphan = Instance::from_entity(&registry, &Address::new("j25@yahoo.com")).unwrap();
        orphan
            .attach(&session, "user", Instance::from_entity(&registry, &saved).unwrap())
            .unwrap();
        assert_eq!(orphan.get("user_id"), Value::Integer(saved.id.unwrap()));
    }

    #[test]
    fn transient_child_points_back_at_parent() {
        let registry = accounts::registry().unwrap();
        let pool = init_memory_pool(&registry).unwrap();
        let conn = get_conn(&pool).unwrap();
        let session = Session::new(&conn, &registry);

        let mut jack = Instance::from_entity(&registry, &User::new("Jack", "Jack Doe", "jc123")).unwrap();
        let address = Instance::from_entity(&registry, &Address::new("jack.doe@gmail.com")).unwrap();
        jack.attach(&session, "addresses", address).unwrap();

        let child = &jack.collection(&session, "addresses").unwrap()[0];
        let owner = child.reference(&session, "user").unwrap().unwrap();
        assert_eq!(owner.record().text("name").as_deref(), Some("Jack"));
        assert!(!owner.is_loaded("addresses"));
        assert_eq!(session.fetch_count(), 0);
        jack.check_back_references(&registry).unwrap();
    }

    #[test]
    fn attach_reference_lists_child_on_target() {
        let registry = accounts::registry().unwrap();
        let pool = init_memory_pool(&registry).unwrap();
        let conn = get_conn(&pool).unwrap();
        let session = Session::new(&conn, &registry);

        let mut address = Instance::from_entity(&registry, &Address::new("j25@yahoo.com")).unwrap();
        let jack = Instance::from_entity(&registry, &User::new("Jack", "Jack Doe", "jc123")).unwrap();
        address.attach(&session, "user", jack).unwrap();

        let owner = address.reference(&session, "user").unwrap().unwrap();
        let listed = owner.loaded("addresses").unwrap().as_many().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(
            listed[0].record().text("email_address").as_deref(),
            Some("j25@yahoo.com")
        );
    }

    #[test]
    fn detach_clears_back_reference() {
        let registry = accounts::registry().unwrap();
        let pool = init_memory_pool(&registry).unwrap();
        let conn = get_conn(&pool).unwrap();
        let session = Session::new(&conn, &registry);

        let mut saved = User::new("Jack", "Jack Doe", "jc123");
        session.insert_entity(&mut saved).unwrap();
        let mut address = Address::new("jack.doe@gmail.com").with_user_id(saved.id.unwrap());
        let address_id = session.insert_entity(&mut address).unwrap();

        let mut jack = Instance::from_entity(&registry, &saved).unwrap();
        let removed = jack.detach(&session, "addresses", address_id).unwrap().unwrap();
        assert_eq!(removed.get("user_id"), Value::Null);
        assert_eq!(removed.loaded("user"), Some(&Related::One(None)));
        assert!(jack.collection(&session, "addresses").unwrap().is_empty());
        assert_eq!(jack.detached(), &[("addresses".to_string(), address_id)]);
    }

    #[test]
    fn related_query_filters_on_owner() {
        let registry = blog::registry().unwrap();
        let pool = init_memory_pool(&registry).unwrap();
        let conn = get_conn(&pool).unwrap();
        let session = Session::new(&conn, &registry);

        let mut jack = blog::User::new("Jack", "Jack Doe", "jc123");
        let mut andrzej = blog::User::new("Andrzej", "Andrzej Gołota", "Andżej");
        session.insert_entity(&mut jack).unwrap();
        session.insert_entity(&mut andrzej).unwrap();
        for headline in ["first", "second"] {
            session
                .insert_entity(&mut BlogPost::new(headline, "", &jack).unwrap())
                .unwrap();
        }
        let other = session
            .insert_entity(&mut BlogPost::new("elsewhere", "", &andrzej).unwrap())
            .unwrap();
        let rust = session.insert_entity(&mut Keyword::new("rust")).unwrap();
        session.link("BlogPost", "keywords", other, rust).unwrap();

        let owner = Instance::from_entity(&registry, &jack).unwrap();
        session.reset_fetch_count();
        let posts = owner.related_query(&session, "posts").unwrap();
        assert_eq!(posts.count().unwrap(), 2);
        let second = posts.filter_by("headline", "second").one().unwrap();
        assert_eq!(second.get("user_id"), Value::Integer(jack.id.unwrap()));
        assert_eq!(session.fetch_count(), 2);
        assert!(!owner.is_loaded("posts"));

        let keyword = session.query("Keyword").filter_by("id", rust).one().unwrap();
        let tagged = keyword.related_query(&session, "posts").unwrap().all().unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].id(), Some(other));

        let unsaved = Instance::from_entity(&registry, &blog::User::new("Ghost", "", "")).unwrap();
        assert!(matches!(
            unsaved.related_query(&session, "posts"),
            Err(Error::Schema(_))
        ));
    }

    #[test]
    fn attach_rejects_wrong_type() {
        let registry = accounts::registry().unwrap();
        let pool = init_memory_pool(&registry).unwrap();
        let conn = get_conn(&pool).unwrap();
        let session = Session::new(&conn, &registry);

        let mut jack = Instance::new(&registry, "User").unwrap();
        let other = Instance::new(&registry, "User").unwrap();
        assert!(matches!(
            jack.attach(&session, "addresses", other),
            Err(Error::Schema(_))
        ));
    }

    #[test]
    fn inconsistent_back_reference_is_reported() {
        let registry = accounts::registry().unwrap();
        let schema = registry.describe("User").unwrap();
        let mut jack = Instance::from_record(schema, Record::new().with("id", 4i64));
        let stray = Instance::from_record(
            registry.describe("Address").unwrap(),
            Record::new().with("id", 1i64).with("user_id", 5i64),
        );
        jack.set_related("addresses", Related::Many(vec![stray])).unwrap();

        let err = jack.check_back_references(&registry).unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn as_entity_checks_type() {
        let registry = accounts::registry().unwrap();
        let schema = registry.describe("Address").unwrap();
        let instance = Instance::from_record(
            schema,
            Record::new().with("id", 1i64).with("email_address", "a@b.c"),
        );
        assert_eq!(instance.as_entity::<Address>().unwrap().email_address, "a@b.c");
        assert!(instance.as_entity::<User>().is_err());
    }

    #[test]
    fn json_includes_loaded_relationships_only() {
        let registry = accounts::registry().unwrap();
        let mut jack = Instance::from_record(
            registry.describe("User").unwrap(),
            Record::new().with("id", 4i64).with("name", "Jack"),
        );
        assert!(jack.to_json().get("addresses").is_none());

        jack.set_related("addresses", Related::Many(Vec::new())).unwrap();
        let json = jack.to_json();
        assert_eq!(json["name"], "Jack");
        assert_eq!(json["addresses"], serde_json::json!([]));
    }
}
