//! Accounts scenario: users owning an ordered list of addresses.

use relmap_common::Result;
use serde::Serialize;

use crate::models::Entity;
use crate::schema::{EntitySchema, FieldDef, RelationshipDef, SchemaRegistry};
use crate::value::Record;

/// Sequence the user ids are drawn from.
pub const USER_ID_SEQ: &str = "user_id_seq";

/// User account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub fullname: Option<String>,
    pub nickname: Option<String>,
}

impl User {
    pub fn new(name: &str, fullname: &str, nickname: &str) -> Self {
        Self {
            id: None,
            name: Some(name.to_string()),
            fullname: Some(fullname.to_string()),
            nickname: Some(nickname.to_string()),
        }
    }
}

impl Entity for User {
    const ENTITY: &'static str = "User";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new()
            .with("name", self.name.clone())
            .with("fullname", self.fullname.clone())
            .with("nickname", self.nickname.clone());
        if let Some(id) = self.id {
            record.set("id", id);
        }
        record
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: Some(record.require_integer(Self::ENTITY, "id")?),
            name: record.text("name"),
            fullname: record.text("fullname"),
            nickname: record.text("nickname"),
        })
    }
}

/// E-mail address, optionally owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Address {
    pub id: Option<i64>,
    pub email_address: String,
    /// Not checked against `users`; dangling owners are accepted.
    pub user_id: Option<i64>,
}

impl Address {
    pub fn new(email_address: &str) -> Self {
        Self {
            id: None,
            email_address: email_address.to_string(),
            user_id: None,
        }
    }

    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

impl Entity for Address {
    const ENTITY: &'static str = "Address";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new()
            .with("email_address", self.email_address.as_str())
            .with("user_id", self.user_id);
        if let Some(id) = self.id {
            record.set("id", id);
        }
        record
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: Some(record.require_integer(Self::ENTITY, "id")?),
            email_address: record.require_text(Self::ENTITY, "email_address")?,
            user_id: record.integer("user_id"),
        })
    }
}

/// Entity declarations of the accounts scenario.
pub fn schema() -> Vec<EntitySchema> {
    vec![
        EntitySchema::new(User::ENTITY, "users")
            .field(FieldDef::integer("id").primary_key().sequence(USER_ID_SEQ))
            .field(FieldDef::string("name", 50))
            .field(FieldDef::string("fullname", 50))
            .field(FieldDef::string("nickname", 50))
            .relationship(
                RelationshipDef::one_to_many("addresses", Address::ENTITY, "user_id")
                    .order_by("id")
                    .back_populates("user"),
            ),
        EntitySchema::new(Address::ENTITY, "addresses")
            .field(FieldDef::integer("id").primary_key())
            .field(FieldDef::text("email_address").required())
            .field(FieldDef::integer("user_id").references("users", "id"))
            .relationship(
                RelationshipDef::many_to_one("user", User::ENTITY, "user_id")
                    .back_populates("addresses"),
            ),
    ]
}

/// A registry holding the accounts scenario.
pub fn registry() -> Result<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    registry.register_all(schema())?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_valid() {
        let registry = registry().unwrap();
        assert_eq!(registry.entities().count(), 2);
        assert_eq!(
            registry.relationship("User", "addresses").unwrap().order_by.as_deref(),
            Some("id")
        );
    }

    #[test]
    fn new_user_has_no_id_column() {
        let record = User::new("Jack", "Jack Doe", "jc123").to_record();
        assert!(record.get("id").is_none());
        assert_eq!(record.text("nickname").as_deref(), Some("jc123"));
    }

    #[test]
    fn address_record_mapping() {
        let record = Address::new("j25@yahoo.com")
            .with_user_id(4)
            .to_record()
            .with("id", 2i64);
        let address = Address::from_record(&record).unwrap();
        assert_eq!(address.id, Some(2));
        assert_eq!(address.user_id, Some(4));
        assert_eq!(address.email_address, "j25@yahoo.com");
    }
}
