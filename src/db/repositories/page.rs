//! Page repository

use crate::db::{DynDatabasePool, InsertId};
use crate::models::{Page, PageStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[async_trait]
pub trait PageRepository: Send + Sync {
    async fn create(&self, page: &Page) -> Result<Page>;
    async fn get_by_id(&self, id: i64) -> Result<Option<Page>>;
    async fn get_by_slug(&self, slug: &str) -> Result<Option<Page>>;
    async fn list(&self, status: Option<PageStatus>) -> Result<Vec<Page>>;
    async fn update(&self, page: &Page) -> Result<Page>;
    async fn delete(&self, id: i64) -> Result<()>;
    async fn exists_by_slug(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool>;
}

pub struct SqlxPageRepository {
    pool: DynDatabasePool,
}

impl SqlxPageRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn PageRepository> {
        Arc::new(Self::new(pool))
    }
}

const PAGE_COLUMNS: &str =
    "id, slug, title, content, content_html, meta_description, status, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct PageRecord {
    id: i64,
    slug: String,
    title: String,
    content: String,
    content_html: String,
    meta_description: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PageRecord> for Page {
    type Error = anyhow::Error;

    fn try_from(r: PageRecord) -> Result<Self> {
        Ok(Page {
            id: r.id,
            slug: r.slug,
            title: r.title,
            content: r.content,
            content_html: r.content_html,
            meta_description: r.meta_description,
            status: r.status.parse()?,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[async_trait]
impl PageRepository for SqlxPageRepository {
    async fn create(&self, page: &Page) -> Result<Page> {
        let now = Utc::now();
        let id = on_pool!(self.pool, |conn| {
            sqlx::query(
                "INSERT INTO pages (slug, title, content, content_html, meta_description, status, \
                 created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&page.slug)
            .bind(&page.title)
            .bind(&page.content)
            .bind(&page.content_html)
            .bind(&page.meta_description)
            .bind(page.status.to_string())
            .bind(now)
            .bind(now)
            .execute(conn)
            .await
            .context("Failed to create page")?
            .inserted_id()
        });

        Ok(Page {
            id,
            created_at: now,
            updated_at: now,
            ..page.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Page>> {
        let sql = format!("SELECT {} FROM pages WHERE id = ?", PAGE_COLUMNS);
        let record = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, PageRecord>(&sql)
                .bind(id)
                .fetch_optional(conn)
                .await
                .context("Failed to get page")?
        });
        record.map(Page::try_from).transpose()
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Page>> {
        let sql = format!("SELECT {} FROM pages WHERE slug = ?", PAGE_COLUMNS);
        let record = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, PageRecord>(&sql)
                .bind(slug)
                .fetch_optional(conn)
                .await
                .context("Failed to get page")?
        });
        record.map(Page::try_from).transpose()
    }

    async fn list(&self, status: Option<PageStatus>) -> Result<Vec<Page>> {
        let filter = if status.is_some() { "WHERE status = ?" } else { "" };
        let sql = format!("SELECT {} FROM pages {} ORDER BY title, id", PAGE_COLUMNS, filter);
        let status = status.map(|s| s.to_string());
        let records = on_pool!(self.pool, |conn| {
            let mut query = sqlx::query_as::<_, PageRecord>(&sql);
            if let Some(status) = &status {
                query = query.bind(status);
            }
            query.fetch_all(conn).await.context("Failed to list pages")?
        });
        records.into_iter().map(Page::try_from).collect()
    }

    async fn update(&self, page: &Page) -> Result<Page> {
        let now = Utc::now();
        on_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE pages SET slug = ?, title = ?, content = ?, content_html = ?, \
                 meta_description = ?, status = ?, updated_at = ? WHERE id = ?",
            )
            .bind(&page.slug)
            .bind(&page.title)
            .bind(&page.content)
            .bind(&page.content_html)
            .bind(&page.meta_description)
            .bind(page.status.to_string())
            .bind(now)
            .bind(page.id)
            .execute(conn)
            .await
            .context("Failed to update page")?;
        });

        Ok(Page {
            updated_at: now,
            ..page.clone()
        })
    }

    async fn delete(&self, id: i64) -> Result<()> {
        on_pool!(self.pool, |conn| {
            sqlx::query("DELETE FROM pages WHERE id = ?")
                .bind(id)
                .execute(conn)
                .await
                .context("Failed to delete page")?;
        });
        Ok(())
    }

    async fn exists_by_slug(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool> {
        let count = on_pool!(self.pool, |conn| {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM pages WHERE slug = ? AND id <> ?")
                .bind(slug)
                .bind(exclude_id.unwrap_or(0))
                .fetch_one(conn)
                .await
                .context("Failed to check page slug")?
        });
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::migrated_pool;

    fn page(slug: &str, status: PageStatus) -> Page {
        let now = Utc::now();
        Page {
            id: 0,
            slug: slug.into(),
            title: slug.to_uppercase(),
            content: "# Hi".into(),
            content_html: "<h1>Hi</h1>".into(),
            meta_description: Some("About us".into()),
            status,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_page_crud() {
        let repo = SqlxPageRepository::new(migrated_pool().await);
        let mut created = repo.create(&page("about", PageStatus::Draft)).await.unwrap();

        created.status = PageStatus::Published;
        repo.update(&created).await.unwrap();

        let found = repo.get_by_slug("about").await.unwrap().unwrap();
        assert_eq!(found.status, PageStatus::Published);
        assert_eq!(found.meta_description.as_deref(), Some("About us"));

        repo.delete(created.id).await.unwrap();
        assert!(repo.get_by_id(created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_status() {
        let repo = SqlxPageRepository::new(migrated_pool().await);
        repo.create(&page("about", PageStatus::Published)).await.unwrap();
        repo.create(&page("secret", PageStatus::Draft)).await.unwrap();

        assert_eq!(repo.list(None).await.unwrap().len(), 2);
        let published = repo.list(Some(PageStatus::Published)).await.unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].slug, "about");
        assert!(repo.exists_by_slug("secret", None).await.unwrap());
    }
}
