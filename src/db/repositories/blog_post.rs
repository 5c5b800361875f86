//! Blog post repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::{decode_json, encode_json};
use crate::db::{DynDatabasePool, InsertId};
use crate::models::{BlogPost, BlogPostStatus, ListParams};

#[async_trait]
pub trait BlogPostRepository: Send + Sync {
    async fn create(&self, post: &BlogPost) -> Result<BlogPost>;

    async fn get_by_id(&self, id: i64) -> Result<Option<BlogPost>>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<BlogPost>>;

    /// Persist every mutable column of `post`
    async fn update(&self, post: &BlogPost) -> Result<BlogPost>;

    async fn delete(&self, id: i64) -> Result<()>;

    /// Whether another post (not `exclude_id`) already uses `slug`
    async fn exists_by_slug(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool>;

    /// Admin listing, newest first, optionally restricted to one status
    async fn list(
        &self,
        params: &ListParams,
        status: Option<BlogPostStatus>,
    ) -> Result<(Vec<BlogPost>, i64)>;

    /// Public listing of published posts, most recently published first
    async fn list_published(
        &self,
        params: &ListParams,
        category: Option<&str>,
    ) -> Result<(Vec<BlogPost>, i64)>;

    /// Scheduled posts whose publish time has arrived, oldest first
    async fn list_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<BlogPost>>;
}

pub struct SqlxBlogPostRepository {
    pool: DynDatabasePool,
}

impl SqlxBlogPostRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn BlogPostRepository> {
        Arc::new(Self::new(pool))
    }
}

const POST_COLUMNS: &str = "id, title, slug, excerpt, content, content_html, status, author, \
     category, tags, cover_image, published_at, retry_count, last_error, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct BlogPostRecord {
    id: i64,
    title: String,
    slug: String,
    excerpt: Option<String>,
    content: String,
    content_html: String,
    status: String,
    author: Option<String>,
    category: Option<String>,
    tags: String,
    cover_image: Option<String>,
    published_at: Option<DateTime<Utc>>,
    retry_count: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BlogPostRecord> for BlogPost {
    type Error = anyhow::Error;

    fn try_from(r: BlogPostRecord) -> Result<Self> {
        Ok(BlogPost {
            id: r.id,
            title: r.title,
            slug: r.slug,
            excerpt: r.excerpt,
            content: r.content,
            content_html: r.content_html,
            status: r.status.parse()?,
            author: r.author,
            category: r.category,
            tags: decode_json(&r.tags, "blog_posts.tags")?,
            cover_image: r.cover_image,
            published_at: r.published_at,
            retry_count: r.retry_count,
            last_error: r.last_error,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

fn convert(records: Vec<BlogPostRecord>) -> Result<Vec<BlogPost>> {
    records.into_iter().map(BlogPost::try_from).collect()
}

#[async_trait]
impl BlogPostRepository for SqlxBlogPostRepository {
    async fn create(&self, post: &BlogPost) -> Result<BlogPost> {
        let now = Utc::now();
        let tags = encode_json(&post.tags)?;
        let id = on_pool!(self.pool, |conn| {
            sqlx::query(
                "INSERT INTO blog_posts (title, slug, excerpt, content, content_html, status, \
                 author, category, tags, cover_image, published_at, retry_count, last_error, \
                 created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&post.title)
            .bind(&post.slug)
            .bind(&post.excerpt)
            .bind(&post.content)
            .bind(&post.content_html)
            .bind(post.status.to_string())
            .bind(&post.author)
            .bind(&post.category)
            .bind(&tags)
            .bind(&post.cover_image)
            .bind(post.published_at)
            .bind(post.retry_count)
            .bind(&post.last_error)
            .bind(now)
            .bind(now)
            .execute(conn)
            .await
            .context("Failed to create blog post")?
            .inserted_id()
        });

        Ok(BlogPost {
            id,
            created_at: now,
            updated_at: now,
            ..post.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<BlogPost>> {
        let sql = format!("SELECT {} FROM blog_posts WHERE id = ?", POST_COLUMNS);
        let record = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, BlogPostRecord>(&sql)
                .bind(id)
                .fetch_optional(conn)
                .await
                .context("Failed to get blog post")?
        });
        record.map(BlogPost::try_from).transpose()
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<BlogPost>> {
        let sql = format!("SELECT {} FROM blog_posts WHERE slug = ?", POST_COLUMNS);
        let record = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, BlogPostRecord>(&sql)
                .bind(slug)
                .fetch_optional(conn)
                .await
                .context("Failed to get blog post by slug")?
        });
        record.map(BlogPost::try_from).transpose()
    }

    async fn update(&self, post: &BlogPost) -> Result<BlogPost> {
        let now = Utc::now();
        let tags = encode_json(&post.tags)?;
        on_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE blog_posts SET title = ?, slug = ?, excerpt = ?, content = ?, \
                 content_html = ?, status = ?, author = ?, category = ?, tags = ?, \
                 cover_image = ?, published_at = ?, retry_count = ?, last_error = ?, \
                 updated_at = ? WHERE id = ?",
            )
            .bind(&post.title)
            .bind(&post.slug)
            .bind(&post.excerpt)
            .bind(&post.content)
            .bind(&post.content_html)
            .bind(post.status.to_string())
            .bind(&post.author)
            .bind(&post.category)
            .bind(&tags)
            .bind(&post.cover_image)
            .bind(post.published_at)
            .bind(post.retry_count)
            .bind(&post.last_error)
            .bind(now)
            .bind(post.id)
            .execute(conn)
            .await
            .context("Failed to update blog post")?;
        });

        Ok(BlogPost {
            updated_at: now,
            ..post.clone()
        })
    }

    async fn delete(&self, id: i64) -> Result<()> {
        on_pool!(self.pool, |conn| {
            sqlx::query("DELETE FROM blog_posts WHERE id = ?")
                .bind(id)
                .execute(conn)
                .await
                .context("Failed to delete blog post")?;
        });
        Ok(())
    }

    async fn exists_by_slug(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool> {
        let count = on_pool!(self.pool, |conn| {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM blog_posts WHERE slug = ? AND id <> ?",
            )
            .bind(slug)
            .bind(exclude_id.unwrap_or(0))
            .fetch_one(conn)
            .await
            .context("Failed to check blog post slug")?
        });
        Ok(count > 0)
    }

    async fn list(
        &self,
        params: &ListParams,
        status: Option<BlogPostStatus>,
    ) -> Result<(Vec<BlogPost>, i64)> {
        let filter = if status.is_some() { "WHERE status = ?" } else { "" };
        let count_sql = format!("SELECT COUNT(*) FROM blog_posts {}", filter);
        let list_sql = format!(
            "SELECT {} FROM blog_posts {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            POST_COLUMNS, filter
        );
        let status = status.map(|s| s.to_string());

        let (records, total) = on_pool!(self.pool, |conn| {
            let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
            let mut list_query = sqlx::query_as::<_, BlogPostRecord>(&list_sql);
            if let Some(status) = &status {
                count_query = count_query.bind(status);
                list_query = list_query.bind(status);
            }
            let total = count_query
                .fetch_one(conn)
                .await
                .context("Failed to count blog posts")?;
            let records = list_query
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(conn)
                .await
                .context("Failed to list blog posts")?;
            (records, total)
        });

        Ok((convert(records)?, total))
    }

    async fn list_published(
        &self,
        params: &ListParams,
        category: Option<&str>,
    ) -> Result<(Vec<BlogPost>, i64)> {
        let filter = if category.is_some() {
            "WHERE status = 'published' AND category = ?"
        } else {
            "WHERE status = 'published'"
        };
        let count_sql = format!("SELECT COUNT(*) FROM blog_posts {}", filter);
        let list_sql = format!(
            "SELECT {} FROM blog_posts {} ORDER BY published_at DESC, id DESC LIMIT ? OFFSET ?",
            POST_COLUMNS, filter
        );

        let (records, total) = on_pool!(self.pool, |conn| {
            let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
            let mut list_query = sqlx::query_as::<_, BlogPostRecord>(&list_sql);
            if let Some(category) = category {
                count_query = count_query.bind(category);
                list_query = list_query.bind(category);
            }
            let total = count_query
                .fetch_one(conn)
                .await
                .context("Failed to count published posts")?;
            let records = list_query
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(conn)
                .await
                .context("Failed to list published posts")?;
            (records, total)
        });

        Ok((convert(records)?, total))
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<BlogPost>> {
        let sql = format!(
            "SELECT {} FROM blog_posts WHERE status = 'scheduled' AND published_at <= ? \
             ORDER BY published_at ASC, id ASC LIMIT ?",
            POST_COLUMNS
        );
        let records = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, BlogPostRecord>(&sql)
                .bind(now)
                .bind(limit)
                .fetch_all(conn)
                .await
                .context("Failed to list due blog posts")?
        });
        convert(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::migrated_pool;
    use chrono::Duration;

    fn post(slug: &str) -> BlogPost {
        let mut post = BlogPost::new(
            format!("Title {}", slug),
            slug.to_string(),
            "Body".to_string(),
            "<p>Body</p>".to_string(),
        );
        post.tags = vec!["launch".to_string()];
        post
    }

    #[tokio::test]
    async fn test_create_and_fetch_round_trips_tags() {
        let repo = SqlxBlogPostRepository::new(migrated_pool().await);
        let created = repo.create(&post("hello")).await.expect("create");
        assert!(created.id > 0);

        let found = repo.get_by_slug("hello").await.unwrap().expect("missing");
        assert_eq!(found.tags, vec!["launch".to_string()]);
        assert_eq!(found.status, BlogPostStatus::Draft);
    }

    #[tokio::test]
    async fn test_exists_by_slug_excludes_self() {
        let repo = SqlxBlogPostRepository::new(migrated_pool().await);
        let created = repo.create(&post("taken")).await.unwrap();

        assert!(repo.exists_by_slug("taken", None).await.unwrap());
        assert!(!repo.exists_by_slug("taken", Some(created.id)).await.unwrap());
        assert!(!repo.exists_by_slug("free", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_published_filters_status_and_category() {
        let repo = SqlxBlogPostRepository::new(migrated_pool().await);

        let mut news = post("news");
        news.status = BlogPostStatus::Published;
        news.category = Some("news".into());
        news.published_at = Some(Utc::now());
        repo.create(&news).await.unwrap();

        let mut guide = post("guide");
        guide.status = BlogPostStatus::Published;
        guide.category = Some("guides".into());
        guide.published_at = Some(Utc::now());
        repo.create(&guide).await.unwrap();

        repo.create(&post("draft")).await.unwrap();

        let params = ListParams::default();
        let (all, total) = repo.list_published(&params, None).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(all.len(), 2);

        let (guides, total) = repo.list_published(&params, Some("guides")).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(guides[0].slug, "guide");

        let (drafts, _) = repo
            .list(&params, Some(BlogPostStatus::Draft))
            .await
            .unwrap();
        assert_eq!(drafts.len(), 1);
    }

    #[tokio::test]
    async fn test_list_due_only_returns_past_scheduled_posts() {
        let repo = SqlxBlogPostRepository::new(migrated_pool().await);
        let now = Utc::now();

        let mut due = post("due");
        due.status = BlogPostStatus::Scheduled;
        due.published_at = Some(now - Duration::minutes(5));
        repo.create(&due).await.unwrap();

        let mut later = post("later");
        later.status = BlogPostStatus::Scheduled;
        later.published_at = Some(now + Duration::hours(1));
        repo.create(&later).await.unwrap();

        let found = repo.list_due(now, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].slug, "due");
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let repo = SqlxBlogPostRepository::new(migrated_pool().await);
        let mut created = repo.create(&post("edit-me")).await.unwrap();

        created.title = "Edited".into();
        created.last_error = Some("boom".into());
        repo.update(&created).await.unwrap();

        let found = repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(found.title, "Edited");
        assert_eq!(found.last_error.as_deref(), Some("boom"));

        repo.delete(created.id).await.unwrap();
        assert!(repo.get_by_id(created.id).await.unwrap().is_none());
    }
}
