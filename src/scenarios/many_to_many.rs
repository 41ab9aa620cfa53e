//! Blog scenario: a post tagged through the `post_keywords` association
//! table, an existence filter over the tags, and reactions attached to
//! exactly one post or comment.

use std::fmt;

use relmap_common::Result;
use relmap_db::models::blog::{BlogPost, Comment, Keyword, Reaction, User};
use relmap_db::models::Entity;
use relmap_db::{Instance, Session};
use serde::Serialize;

/// A post with its author and keywords.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostSummary {
    pub post: BlogPost,
    pub author: Option<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManyToManyReport {
    pub first_user: Option<User>,
    /// Jack's posts, counted through `User.posts` without loading them.
    pub jack_post_count: usize,
    pub posts: Vec<PostSummary>,
    pub keywords: Vec<Keyword>,
    /// Posts with any keyword equal to "world".
    pub tagged_world: Vec<BlogPost>,
    pub comment: Comment,
    pub comment_reactions: Vec<Reaction>,
    pub post_reactions: Vec<Reaction>,
}

fn entities<E: Entity>(items: &[Instance]) -> Result<Vec<E>> {
    items.iter().map(Instance::as_entity).collect()
}

/// Seed the blog tables, tag Jack's post and react to it.
pub fn run(session: &Session<'_>) -> Result<ManyToManyReport> {
    let registry = session.registry();

    let mut jack = User::new("Jack", "Jack Doe", "jc123");
    session.transaction(|s| {
        s.insert_entity(&mut jack)?;
        s.insert_entity(&mut User::new("Andrzej", "Andrzej Gołota", "Andżej"))?;
        s.insert_entity(&mut User::new("Janusz", "Janusz Tracz", "prywaciarz"))?;
        Ok(())
    })?;

    let post = BlogPost::new("Jack's first post", "Hello world", &jack)?;
    let mut post = Instance::from_entity(registry, &post)?;
    session.save_graph(&mut post)?;

    for word in ["jack", "world"] {
        post.attach(
            session,
            "keywords",
            Instance::from_entity(registry, &Keyword::new(word))?,
        )?;
    }
    session.save_graph(&mut post)?;
    tracing::info!(post = ?post.id(), "tagged post");

    let first_user = session
        .query(User::ENTITY)
        .first()?
        .map(|user| user.as_entity())
        .transpose()?;

    let jack_post_count = Instance::from_entity(registry, &jack)?
        .related_query(session, "posts")?
        .count()?;

    let posts = session
        .query(BlogPost::ENTITY)
        .joined("author")
        .selectin("keywords")
        .all()?
        .iter()
        .map(|post| {
            Ok(PostSummary {
                post: post.as_entity()?,
                author: post
                    .reference(session, "author")?
                    .and_then(|author| author.record().text("name")),
                keywords: post
                    .collection(session, "keywords")?
                    .iter()
                    .filter_map(|k| k.record().text("keyword"))
                    .collect(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let keywords = entities(&session.query(Keyword::ENTITY).all()?)?;
    let tagged_world = entities(
        &session
            .query(BlogPost::ENTITY)
            .any("keywords", "keyword", "world")
            .all()?,
    )?;

    let jack_id = jack.id.unwrap_or_default();
    let post_id = post.id().unwrap_or_default();
    let mut comment = Comment::new("Title", "Content", jack_id, post_id);
    session.insert_entity(&mut comment)?;

    let mut commented = Instance::from_entity(registry, &comment)?;
    let reaction = Reaction {
        user_id: Some(jack_id),
        ..Reaction::default()
    };
    commented.attach(session, "reactions", Instance::from_entity(registry, &reaction)?)?;
    post.attach(session, "reactions", Instance::from_entity(registry, &reaction)?)?;
    session.transaction(|s| {
        s.save_graph(&mut commented)?;
        s.save_graph(&mut post)
    })?;

    let reloaded = session
        .query(Comment::ENTITY)
        .filter_by("id", comment.id)
        .selectin("reactions")
        .one()?;
    let comment_reactions = entities(reloaded.collection(session, "reactions")?)?;

    let post_reactions = entities(
        &session
            .query(Reaction::ENTITY)
            .filter_by("post_id", post_id)
            .all()?,
    )?;

    Ok(ManyToManyReport {
        first_user,
        jack_post_count,
        posts,
        keywords,
        tagged_world,
        comment,
        comment_reactions,
        post_reactions,
    })
}

impl fmt::Display for ManyToManyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref user) = self.first_user {
            writeln!(
                f,
                "User(id: {}, name: {})",
                user.id.unwrap_or_default(),
                user.name.as_deref().unwrap_or("-")
            )?;
        }
        writeln!(f, "Jack has {} posts", self.jack_post_count)?;
        for summary in &self.posts {
            writeln!(
                f,
                "BlogPost({}, {}, {}) keywords: [{}]",
                summary.post.headline,
                summary.post.body.as_deref().unwrap_or(""),
                summary.author.as_deref().unwrap_or("-"),
                summary.keywords.join(", ")
            )?;
        }
        let keywords: Vec<String> = self
            .keywords
            .iter()
            .map(|k| format!("Keyword({}, {})", k.id.unwrap_or_default(), k.keyword))
            .collect();
        writeln!(f, "[{}]", keywords.join(", "))?;
        let tagged: Vec<&str> = self.tagged_world.iter().map(|p| p.headline.as_str()).collect();
        writeln!(f, "Tagged 'world': [{}]", tagged.join(", "))?;
        writeln!(f, "REACTION")?;
        writeln!(
            f,
            "Comment(id: {}, author: {})",
            self.comment.id.unwrap_or_default(),
            self.comment.user_id
        )?;
        let reactions: Vec<String> = self
            .comment_reactions
            .iter()
            .map(|r| format!("Reaction(id={})", r.id.unwrap_or_default()))
            .collect();
        writeln!(f, "[{}]", reactions.join(", "))?;
        writeln!(f, "{}", self.comment_reactions.len())?;
        writeln!(f, "Post reactions: {}", self.post_reactions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_db::models::blog;
    use relmap_db::pool::{get_conn, init_memory_pool};

    #[test]
    fn run_tags_and_reacts() {
        let registry = blog::registry().unwrap();
        let pool = init_memory_pool(&registry).unwrap();
        let conn = get_conn(&pool).unwrap();
        let session = Session::new(&conn, &registry);

        let report = run(&session).unwrap();
        assert_eq!(
            report.first_user.as_ref().and_then(|u| u.name.as_deref()),
            Some("Jack")
        );
        assert_eq!(report.jack_post_count, 1);
        assert_eq!(report.posts.len(), 1);
        assert_eq!(report.posts[0].author.as_deref(), Some("Jack"));
        assert_eq!(report.posts[0].keywords, vec!["jack", "world"]);
        assert_eq!(report.keywords.len(), 2);
        assert_eq!(report.tagged_world.len(), 1);

        assert_eq!(report.comment_reactions.len(), 1);
        let on_comment = &report.comment_reactions[0];
        assert_eq!((on_comment.post_id, on_comment.comment_id), (None, report.comment.id));

        assert_eq!(report.post_reactions.len(), 1);
        assert_eq!(report.post_reactions[0].comment_id, None);
    }

    #[test]
    fn report_renders_sections() {
        let registry = blog::registry().unwrap();
        let pool = init_memory_pool(&registry).unwrap();
        let conn = get_conn(&pool).unwrap();
        let session = Session::new(&conn, &registry);

        let text = run(&session).unwrap().to_string();
        assert!(text.contains("BlogPost(Jack's first post, Hello world, Jack) keywords: [jack, world]"));
        assert!(text.contains("Tagged 'world': [Jack's first post]"));
        assert!(text.contains("REACTION"));
    }
}
