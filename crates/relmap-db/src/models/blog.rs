//! Blog scenario: posts tagged with keywords through an association table,
//! comments, and reactions attached to exactly one post or comment.

use relmap_common::{Error, Result};
use serde::Serialize;

use crate::models::Entity;
use crate::schema::{
    AssociationTable, CheckDef, EntitySchema, FieldDef, RelationshipDef, SchemaRegistry,
};
use crate::value::Record;

/// Name of the post/keyword association table.
pub const POST_KEYWORDS: &str = "post_keywords";

/// Blog author.
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

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlogPost {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub headline: String,
    pub body: Option<String>,
}

impl BlogPost {
    /// A new post written by `author`, who must already be saved.
    pub fn new(headline: &str, body: &str, author: &User) -> Result<Self> {
        let user_id = author.id.ok_or_else(|| {
            Error::constraint(Self::ENTITY, "author must be saved before writing a post")
        })?;
        Ok(Self {
            id: None,
            user_id: Some(user_id),
            headline: headline.to_string(),
            body: Some(body.to_string()),
        })
    }
}

impl Entity for BlogPost {
    const ENTITY: &'static str = "BlogPost";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new()
            .with("user_id", self.user_id)
            .with("headline", self.headline.as_str())
            .with("body", self.body.clone());
        if let Some(id) = self.id {
            record.set("id", id);
        }
        record
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: Some(record.require_integer(Self::ENTITY, "id")?),
            user_id: record.integer("user_id"),
            headline: record.require_text(Self::ENTITY, "headline")?,
            body: record.text("body"),
        })
    }
}

/// Globally unique keyword.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Keyword {
    pub id: Option<i64>,
    pub keyword: String,
}

impl Keyword {
    pub fn new(keyword: &str) -> Self {
        Self {
            id: None,
            keyword: keyword.to_string(),
        }
    }
}

impl Entity for Keyword {
    const ENTITY: &'static str = "Keyword";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new().with("keyword", self.keyword.as_str());
        if let Some(id) = self.id {
            record.set("id", id);
        }
        record
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: Some(record.require_integer(Self::ENTITY, "id")?),
            keyword: record.require_text(Self::ENTITY, "keyword")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
    pub id: Option<i64>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub user_id: i64,
    pub post_id: i64,
}

impl Comment {
    pub fn new(title: &str, content: &str, author_id: i64, post_id: i64) -> Self {
        Self {
            id: None,
            title: Some(title.to_string()),
            content: Some(content.to_string()),
            user_id: author_id,
            post_id,
        }
    }
}

impl Entity for Comment {
    const ENTITY: &'static str = "Comment";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new()
            .with("title", self.title.clone())
            .with("content", self.content.clone())
            .with("user_id", self.user_id)
            .with("post_id", self.post_id);
        if let Some(id) = self.id {
            record.set("id", id);
        }
        record
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: Some(record.require_integer(Self::ENTITY, "id")?),
            title: record.text("title"),
            content: record.text("content"),
            user_id: record.require_integer(Self::ENTITY, "user_id")?,
            post_id: record.require_integer(Self::ENTITY, "post_id")?,
        })
    }
}

/// A reaction to exactly one post or one comment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reaction {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub post_id: Option<i64>,
    pub comment_id: Option<i64>,
}

impl Reaction {
    pub fn on_post(user_id: i64, post_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
            post_id: Some(post_id),
            ..Self::default()
        }
    }

    pub fn on_comment(user_id: i64, comment_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
            comment_id: Some(comment_id),
            ..Self::default()
        }
    }
}

impl Entity for Reaction {
    const ENTITY: &'static str = "Reaction";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new()
            .with("user_id", self.user_id)
            .with("post_id", self.post_id)
            .with("comment_id", self.comment_id);
        if let Some(id) = self.id {
            record.set("id", id);
        }
        record
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: Some(record.require_integer(Self::ENTITY, "id")?),
            user_id: record.integer("user_id"),
            post_id: record.integer("post_id"),
            comment_id: record.integer("comment_id"),
        })
    }
}

/// Entity declarations of the blog scenario.
pub fn schema() -> Vec<EntitySchema> {
    vec![
        EntitySchema::new(User::ENTITY, "users")
            .field(FieldDef::integer("id").primary_key())
            .field(FieldDef::string("name", 50))
            .field(FieldDef::string("fullname", 50))
            .field(FieldDef::string("nickname", 50))
            .relationship(
                RelationshipDef::one_to_many("posts", BlogPost::ENTITY, "user_id")
                    .back_populates("author"),
            )
            .relationship(
                RelationshipDef::one_to_many("comments", Comment::ENTITY, "user_id")
                    .back_populates("author"),
            )
            .relationship(
                RelationshipDef::one_to_many("reactions", Reaction::ENTITY, "user_id")
                    .back_populates("user"),
            ),
        EntitySchema::new(BlogPost::ENTITY, "posts")
            .field(FieldDef::integer("id").primary_key())
            .field(FieldDef::integer("user_id").references("users", "id"))
            .field(FieldDef::string("headline", 255).required())
            .field(FieldDef::text("body"))
            .relationship(
                RelationshipDef::many_to_one("author", User::ENTITY, "user_id")
                    .back_populates("posts"),
            )
            .relationship(
                RelationshipDef::many_to_many(
                    "keywords",
                    Keyword::ENTITY,
                    AssociationTable::new(POST_KEYWORDS, "post_id", "keyword_id"),
                )
                .back_populates("posts"),
            )
            .relationship(
                RelationshipDef::one_to_many("comments", Comment::ENTITY, "post_id")
                    .back_populates("post"),
            )
            .relationship(
                RelationshipDef::one_to_many("reactions", Reaction::ENTITY, "post_id")
                    .back_populates("post"),
            ),
        EntitySchema::new(Keyword::ENTITY, "keywords")
            .field(FieldDef::integer("id").primary_key())
            .field(FieldDef::string("keyword", 50).required().unique())
            .relationship(
                RelationshipDef::many_to_many(
                    "posts",
                    BlogPost::ENTITY,
                    AssociationTable::new(POST_KEYWORDS, "keyword_id", "post_id"),
                )
                .back_populates("keywords"),
            ),
        EntitySchema::new(Comment::ENTITY, "comments")
            .field(FieldDef::integer("id").primary_key())
            .field(FieldDef::string("title", 40))
            .field(FieldDef::text("content"))
            .field(FieldDef::integer("user_id").required().references("users", "id"))
            .field(FieldDef::integer("post_id").required().references("posts", "id"))
            .relationship(
                RelationshipDef::many_to_one("post", BlogPost::ENTITY, "post_id")
                    .back_populates("comments"),
            )
            .relationship(
                RelationshipDef::many_to_one("author", User::ENTITY, "user_id")
                    .back_populates("comments"),
            )
            .relationship(
                RelationshipDef::one_to_many("reactions", Reaction::ENTITY, "comment_id")
                    .back_populates("comment"),
            ),
        EntitySchema::new(Reaction::ENTITY, "reactions")
            .field(FieldDef::integer("id").primary_key())
            .field(FieldDef::integer("user_id").references("users", "id"))
            .field(FieldDef::integer("post_id").references("posts", "id"))
            .field(FieldDef::integer("comment_id").references("comments", "id"))
            .check(CheckDef::exactly_one(
                "reaction_single_target",
                &["post_id", "comment_id"],
            ))
            .relationship(
                RelationshipDef::many_to_one("user", User::ENTITY, "user_id")
                    .back_populates("reactions"),
            )
            .relationship(
                RelationshipDef::many_to_one("post", BlogPost::ENTITY, "post_id")
                    .back_populates("reactions"),
            )
            .relationship(
                RelationshipDef::many_to_one("comment", Comment::ENTITY, "comment_id")
                    .back_populates("reactions"),
            ),
    ]
}

/// A registry holding the blog scenario.
pub fn registry() -> Result<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    registry.register_all(schema())?;
    Ok(registry)
}
