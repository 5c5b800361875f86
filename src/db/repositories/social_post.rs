//! Social post repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::{decode_json, encode_json};
use crate::db::{DynDatabasePool, InsertId};
use crate::models::{ListParams, SocialPlatform, SocialPost, SocialPostStatus};

/// Filters for the admin listing
#[derive(Debug, Clone, Copy, Default)]
pub struct SocialPostFilter {
    pub status: Option<SocialPostStatus>,
    pub platform: Option<SocialPlatform>,
}

#[async_trait]
pub trait SocialPostRepository: Send + Sync {
    async fn create(&self, post: &SocialPost) -> Result<SocialPost>;

    async fn get_by_id(&self, id: i64) -> Result<Option<SocialPost>>;

    /// Persist every mutable column of `post`
    async fn update(&self, post: &SocialPost) -> Result<SocialPost>;

    async fn delete(&self, id: i64) -> Result<()>;

    async fn list(
        &self,
        params: &ListParams,
        filter: SocialPostFilter,
    ) -> Result<(Vec<SocialPost>, i64)>;

    async fn list_by_blog_post(&self, blog_post_id: i64) -> Result<Vec<SocialPost>>;

    /// Scheduled posts that are due and not waiting out a retry backoff
    async fn list_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<SocialPost>>;
}

pub struct SqlxSocialPostRepository {
    pool: DynDatabasePool,
}

impl SqlxSocialPostRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SocialPostRepository> {
        Arc::new(Self::new(pool))
    }
}

const SOCIAL_COLUMNS: &str = "id, platform, content, media_urls, status, scheduled_at, \
     published_at, external_post_id, retry_count, last_error, next_attempt_at, blog_post_id, \
     created_at, updated_at";

#[derive(sqlx::FromRow)]
struct SocialPostRecord {
    id: i64,
    platform: String,
    content: String,
    media_urls: String,
    status: String,
    scheduled_at: Option<DateTime<Utc>>,
    published_at: Option<DateTime<Utc>>,
    external_post_id: Option<String>,
    retry_count: i32,
    last_error: Option<String>,
    next_attempt_at: Option<DateTime<Utc>>,
    blog_post_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SocialPostRecord> for SocialPost {
    type Error = anyhow::Error;

    fn try_from(r: SocialPostRecord) -> Result<Self> {
        Ok(SocialPost {
            id: r.id,
            platform: r.platform.parse()?,
            content: r.content,
            media_urls: decode_json(&r.media_urls, "social_posts.media_urls")?,
            status: r.status.parse()?,
            scheduled_at: r.scheduled_at,
            published_at: r.published_at,
            external_post_id: r.external_post_id,
            retry_count: r.retry_count,
            last_error: r.last_error,
            next_attempt_at: r.next_attempt_at,
            blog_post_id: r.blog_post_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

fn convert(records: Vec<SocialPostRecord>) -> Result<Vec<SocialPost>> {
    records.into_iter().map(SocialPost::try_from).collect()
}

#[async_trait]
impl SocialPostRepository for SqlxSocialPostRepository {
    async fn create(&self, post: &SocialPost) -> Result<SocialPost> {
        let now = Utc::now();
        let media_urls = encode_json(&post.media_urls)?;
        let id = on_pool!(self.pool, |conn| {
            sqlx::query(
                "INSERT INTO social_posts (platform, content, media_urls, status, scheduled_at, \
                 published_at, external_post_id, retry_count, last_error, next_attempt_at, \
                 blog_post_id, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(post.platform.as_str())
            .bind(&post.content)
            .bind(&media_urls)
            .bind(post.status.to_string())
            .bind(post.scheduled_at)
            .bind(post.published_at)
            .bind(&post.external_post_id)
            .bind(post.retry_count)
            .bind(&post.last_error)
            .bind(post.next_attempt_at)
            .bind(post.blog_post_id)
            .bind(now)
            .bind(now)
            .execute(conn)
            .await
            .context("Failed to create social post")?
            .inserted_id()
        });

        Ok(SocialPost {
            id,
            created_at: now,
            updated_at: now,
            ..post.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<SocialPost>> {
        let sql = format!("SELECT {} FROM social_posts WHERE id = ?", SOCIAL_COLUMNS);
        let record = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, SocialPostRecord>(&sql)
                .bind(id)
                .fetch_optional(conn)
                .await
                .context("Failed to get social post")?
        });
        record.map(SocialPost::try_from).transpose()
    }

    async fn update(&self, post: &SocialPost) -> Result<SocialPost> {
        let now = Utc::now();
        let media_urls = encode_json(&post.media_urls)?;
        on_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE social_posts SET platform = ?, content = ?, media_urls = ?, status = ?, \
                 scheduled_at = ?, published_at = ?, external_post_id = ?, retry_count = ?, \
                 last_error = ?, next_attempt_at = ?, blog_post_id = ?, updated_at = ? \
                 WHERE id = ?",
            )
            .bind(post.platform.as_str())
            .bind(&post.content)
            .bind(&media_urls)
            .bind(post.status.to_string())
            .bind(post.scheduled_at)
            .bind(post.published_at)
            .bind(&post.external_post_id)
            .bind(post.retry_count)
            .bind(&post.last_error)
            .bind(post.next_attempt_at)
            .bind(post.blog_post_id)
            .bind(now)
            .bind(post.id)
            .execute(conn)
            .await
            .context("Failed to update social post")?;
        });

        Ok(SocialPost {
            updated_at: now,
            ..post.clone()
        })
    }

    async fn delete(&self, id: i64) -> Result<()> {
        on_pool!(self.pool, |conn| {
            sqlx::query("DELETE FROM social_posts WHERE id = ?")
                .bind(id)
                .execute(conn)
                .await
                .context("Failed to delete social post")?;
        });
        Ok(())
    }

    async fn list(
        &self,
        params: &ListParams,
        filter: SocialPostFilter,
    ) -> Result<(Vec<SocialPost>, i64)> {
        let mut clauses = Vec::new();
        if filter.status.is_some() {
            clauses.push("status = ?");
        }
        if filter.platform.is_some() {
            clauses.push("platform = ?");
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let count_sql = format!("SELECT COUNT(*) FROM social_posts {}", where_sql);
        let list_sql = format!(
            "SELECT {} FROM social_posts {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            SOCIAL_COLUMNS, where_sql
        );
        let status = filter.status.map(|s| s.to_string());
        let platform = filter.platform.map(SocialPlatform::as_str);

        let (records, total) = on_pool!(self.pool, |conn| {
            let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
            let mut list_query = sqlx::query_as::<_, SocialPostRecord>(&list_sql);
            if let Some(status) = &status {
                count_query = count_query.bind(status);
                list_query = list_query.bind(status);
            }
            if let Some(platform) = platform {
                count_query = count_query.bind(platform);
                list_query = list_query.bind(platform);
            }
            let total = count_query
                .fetch_one(conn)
                .await
                .context("Failed to count social posts")?;
            let records = list_query
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(conn)
                .await
                .context("Failed to list social posts")?;
            (records, total)
        });

        Ok((convert(records)?, total))
    }

    async fn list_by_blog_post(&self, blog_post_id: i64) -> Result<Vec<SocialPost>> {
        let sql = format!(
            "SELECT {} FROM social_posts WHERE blog_post_id = ? ORDER BY id",
            SOCIAL_COLUMNS
        );
        let records = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, SocialPostRecord>(&sql)
                .bind(blog_post_id)
                .fetch_all(conn)
                .await
                .context("Failed to list social posts for blog post")?
        });
        convert(records)
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<SocialPost>> {
        let sql = format!(
            "SELECT {} FROM social_posts WHERE status = 'scheduled' AND scheduled_at <= ? \
             AND (next_attempt_at IS NULL OR next_attempt_at <= ?) \
             ORDER BY scheduled_at ASC, id ASC LIMIT ?",
            SOCIAL_COLUMNS
        );
        let records = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, SocialPostRecord>(&sql)
                .bind(now)
                .bind(now)
                .bind(limit)
                .fetch_all(conn)
                .await
                .context("Failed to list due social posts")?
        });
        convert(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::migrated_pool;
    use chrono::Duration;

    fn scheduled(platform: SocialPlatform, at: DateTime<Utc>) -> SocialPost {
        let mut post = SocialPost::new(platform, "Hello world".into());
        post.status = SocialPostStatus::Scheduled;
        post.scheduled_at = Some(at);
        post
    }

    #[tokio::test]
    async fn test_due_query_respects_backoff() {
        let repo = SqlxSocialPostRepository::new(migrated_pool().await);
        let now = Utc::now();

        let ready = repo
            .create(&scheduled(SocialPlatform::Twitter, now - Duration::minutes(10)))
            .await
            .unwrap();

        let mut backing_off = scheduled(SocialPlatform::Linkedin, now - Duration::minutes(10));
        backing_off.retry_count = 1;
        backing_off.next_attempt_at = Some(now + Duration::minutes(5));
        repo.create(&backing_off).await.unwrap();

        let mut retry_ready = scheduled(SocialPlatform::Facebook, now - Duration::minutes(20));
        retry_ready.next_attempt_at = Some(now - Duration::seconds(1));
        let retry_ready = repo.create(&retry_ready).await.unwrap();

        repo.create(&scheduled(SocialPlatform::Instagram, now + Duration::hours(1)))
            .await
            .unwrap();

        let due = repo.list_due(now, 10).await.unwrap();
        let ids: Vec<i64> = due.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![retry_ready.id, ready.id]);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let repo = SqlxSocialPostRepository::new(migrated_pool().await);
        repo.create(&SocialPost::new(SocialPlatform::Twitter, "a".into()))
            .await
            .unwrap();
        repo.create(&scheduled(SocialPlatform::Twitter, Utc::now()))
            .await
            .unwrap();
        repo.create(&SocialPost::new(SocialPlatform::Linkedin, "b".into()))
            .await
            .unwrap();

        let params = ListParams::default();
        let (_, total) = repo.list(&params, SocialPostFilter::default()).await.unwrap();
        assert_eq!(total, 3);

        let filter = SocialPostFilter {
            status: Some(SocialPostStatus::Draft),
            platform: Some(SocialPlatform::Twitter),
        };
        let (items, total) = repo.list(&params, filter).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].content, "a");
    }

    #[tokio::test]
    async fn test_update_persists_publish_state() {
        let repo = SqlxSocialPostRepository::new(migrated_pool().await);
        let mut post = repo
            .create(&SocialPost::new(SocialPlatform::Twitter, "x".into()))
            .await
            .unwrap();

        post.status = SocialPostStatus::Published;
        post.external_post_id = Some("ext-1".into());
        post.published_at = Some(Utc::now());
        post.media_urls = vec!["https://cdn.example.com/a.png".into()];
        repo.update(&post).await.unwrap();

        let found = repo.get_by_id(post.id).await.unwrap().unwrap();
        assert_eq!(found.status, SocialPostStatus::Published);
        assert_eq!(found.external_post_id.as_deref(), Some("ext-1"));
        assert_eq!(found.media_urls.len(), 1);
    }
}
