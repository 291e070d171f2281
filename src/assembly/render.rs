// Rendering — turning a stored feed item into what a reader sees.
//
// Each item is resolved against the live user and article directories, so a
// rendered feed always shows current titles and names. Any failure to
// resolve (actor gone, article deleted, corrupt content) is an error for that
// item only; the caller drops it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::collab::{Article, ArticleDirectory, UserDirectory, UserProfile};
use crate::events::EventPayload;
use crate::feed::UserFeedItem;
use crate::output::truncate_chars;
use crate::timeout::bounded;

/// Article content kept in a published item's summary, in characters.
pub const ARTICLE_SUMMARY_CHARS: usize = 100;

/// Display-ready projection of a feed item. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedFeedItem {
    pub id: String,
    pub actor_name: String,
    pub actor_id: i64,
    pub verb: String,
    /// `article` or `user`.
    pub object: String,
    pub object_id: i64,
    pub title: String,
    pub summary: String,
    pub link: String,
    pub timestamp: DateTime<Utc>,
}

pub struct Renderer {
    articles: Arc<dyn ArticleDirectory>,
    users: Arc<dyn UserDirectory>,
    io_timeout: Duration,
}

impl Renderer {
    pub fn new(
        articles: Arc<dyn ArticleDirectory>,
        users: Arc<dyn UserDirectory>,
        io_timeout: Duration,
    ) -> Self {
        Self {
            articles,
            users,
            io_timeout,
        }
    }

    /// Render `item` as seen by `viewer`.
    pub async fn render(&self, viewer: i64, item: &UserFeedItem) -> Result<RenderedFeedItem> {
        let payload = item.payload()?;
        let expected = payload.event_type().item_type();
        if expected != item.item_type {
            anyhow::bail!(
                "feed item {} is typed {} but carries a {} payload",
                item.item_id,
                item.item_type,
                expected
            );
        }

        let actor = self.user(item.actor_id).await?;
        let verb = payload.event_type().verb().to_string();

        let mut rendered = RenderedFeedItem {
            id: item.item_id.clone(),
            actor_name: actor.display_name.clone(),
            actor_id: actor.id,
            verb,
            object: String::new(),
            object_id: 0,
            title: String::new(),
            summary: String::new(),
            link: String::new(),
            timestamp: item.timestamp,
        };

        match &payload {
            EventPayload::Followed { followee_id } => {
                let followee = self.user(*followee_id).await?;
                rendered.object = "user".to_string();
                rendered.object_id = followee.id;
                rendered.summary = format!("{} followed {}", actor.display_name, followee.display_name);
                rendered.title = followee.display_name;
                rendered.link = format!("/user/{}", followee.id);
            }
            EventPayload::Published { article_id, .. } => {
                let article = self.article(*article_id, viewer).await?;
                rendered.summary = truncate_chars(&article.content, ARTICLE_SUMMARY_CHARS);
                fill_article(&mut rendered, article);
            }
            EventPayload::Liked { article_id, .. } => {
                let article = self.article(*article_id, viewer).await?;
                rendered.summary = format!(
                    "{} liked the article \"{}\"",
                    actor.display_name, article.title
                );
                fill_article(&mut rendered, article);
            }
            EventPayload::Commented {
                article_id,
                comment_content,
                ..
            } => {
                let article = self.article(*article_id, viewer).await?;
                rendered.summary = format!(
                    "{} commented on \"{}\": {}",
                    actor.display_name, article.title, comment_content
                );
                fill_article(&mut rendered, article);
            }
            EventPayload::Collected { article_id, .. } => {
                let article = self.article(*article_id, viewer).await?;
                rendered.summary = format!(
                    "{} collected the article \"{}\"",
                    actor.display_name, article.title
                );
                fill_article(&mut rendered, article);
            }
        }

        Ok(rendered)
    }

    async fn user(&self, id: i64) -> Result<UserProfile> {
        bounded(self.io_timeout, "user lookup", self.users.get_user(id))
            .await?
            .with_context(|| format!("user {id} not found"))
    }

    async fn article(&self, id: i64, viewer: i64) -> Result<Article> {
        bounded(
            self.io_timeout,
            "article lookup",
            self.articles.get_article(id, viewer),
        )
        .await?
        .with_context(|| format!("article {id} not found"))
    }
}

fn fill_article(rendered: &mut RenderedFeedItem, article: Article) {
    rendered.object = "article".to_string();
    rendered.object_id = article.id;
    rendered.link = format!("/article/{}", article.id);
    rendered.title = article.title;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteDatabase;
    use crate::events::FeedEvent;
    use crate::feed::ItemType;

    async fn setup() -> (Arc<SqliteDatabase>, Renderer) {
        let db = Arc::new(SqliteDatabase::in_memory().unwrap());
        db.upsert_user(1, "alice").await.unwrap();
        db.upsert_user(2, "bob").await.unwrap();
        db.upsert_article(&Article {
            id: 42,
            title: "Ownership".to_string(),
            content: "x".repeat(150),
            author_id: 2,
        })
        .await
        .unwrap();
        let renderer = Renderer::new(db.clone(), db.clone(), Duration::from_secs(1));
        (db, renderer)
    }

    fn item(actor: i64, payload: EventPayload) -> UserFeedItem {
        UserFeedItem::from_event(&FeedEvent::new(actor, payload)).unwrap()
    }

    #[tokio::test]
    async fn test_render_like() {
        let (_db, renderer) = setup().await;
        let rendered = renderer
            .render(
                2,
                &item(
                    1,
                    EventPayload::Liked {
                        article_id: 42,
                        author_id: 2,
                    },
                ),
            )
            .await
            .unwrap();
        assert_eq!(rendered.id, "like:42");
        assert_eq!(rendered.verb, "liked");
        assert_eq!(rendered.object, "article");
        assert_eq!(rendered.title, "Ownership");
        assert_eq!(rendered.summary, "alice liked the article \"Ownership\"");
        assert_eq!(rendered.link, "/article/42");
    }

    #[tokio::test]
    async fn test_render_published_excerpt() {
        let (_db, renderer) = setup().await;
        let rendered = renderer
            .render(
                1,
                &item(
                    2,
                    EventPayload::Published {
                        article_id: 42,
                        title: "Ownership".to_string(),
                        author_id: 2,
                    },
                ),
            )
            .await
            .unwrap();
        assert_eq!(rendered.verb, "published");
        assert_eq!(rendered.summary.chars().count(), ARTICLE_SUMMARY_CHARS + 3);
    }

    #[tokio::test]
    async fn test_render_follow() {
        let (_db, renderer) = setup().await;
        let rendered = renderer
            .render(2, &item(1, EventPayload::Followed { followee_id: 2 }))
            .await
            .unwrap();
        assert_eq!(rendered.object, "user");
        assert_eq!(rendered.object_id, 2);
        assert_eq!(rendered.title, "bob");
        assert_eq!(rendered.summary, "alice followed bob");
        assert_eq!(rendered.link, "/user/2");
    }

    #[tokio::test]
    async fn test_render_comment_uses_snippet() {
        let (_db, renderer) = setup().await;
        let rendered = renderer
            .render(
                2,
                &item(
                    1,
                    EventPayload::Commented {
                        article_id: 42,
                        author_id: 2,
                        comment_id: 9,
                        comment_content: "great read".to_string(),
                    },
                ),
            )
            .await
            .unwrap();
        assert_eq!(rendered.id, "comment:9");
        assert_eq!(rendered.summary, "alice commented on \"Ownership\": great read");
    }

    #[tokio::test]
    async fn test_missing_article_fails_item() {
        let (_db, renderer) = setup().await;
        let result = renderer
            .render(
                2,
                &item(
                    1,
                    EventPayload::Collected {
                        article_id: 404,
                        author_id: 2,
                    },
                ),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_type_mismatch_fails_item() {
        let (_db, renderer) = setup().await;
        let mut bad = item(1, EventPayload::Followed { followee_id: 2 });
        bad.item_type = ItemType::Article;
        assert!(renderer.render(2, &bad).await.is_err());
    }
}
