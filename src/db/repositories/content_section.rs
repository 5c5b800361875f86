//! Content section repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::{decode_json, encode_json};
use crate::db::{DynDatabasePool, InsertId};
use crate::models::ContentSection;

#[async_trait]
pub trait ContentSectionRepository: Send + Sync {
    async fn create(&self, section: &ContentSection) -> Result<ContentSection>;
    async fn get_by_id(&self, id: i64) -> Result<Option<ContentSection>>;
    async fn get_by_slug(&self, slug: &str) -> Result<Option<ContentSection>>;
    /// Sections ordered by `sort_order`, then id
    async fn list(&self, page_slug: Option<&str>, active_only: bool)
        -> Result<Vec<ContentSection>>;
    async fn update(&self, section: &ContentSection) -> Result<ContentSection>;
    async fn delete(&self, id: i64) -> Result<()>;
    async fn exists_by_slug(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool>;
}

pub struct SqlxContentSectionRepository {
    pool: DynDatabasePool,
}

impl SqlxContentSectionRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ContentSectionRepository> {
        Arc::new(Self::new(pool))
    }
}

const SECTION_COLUMNS: &str =
    "id, slug, page_slug, title, body, data, sort_order, is_active, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct SectionRecord {
    id: i64,
    slug: String,
    page_slug: String,
    title: Option<String>,
    body: Option<String>,
    data: String,
    sort_order: i32,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SectionRecord> for ContentSection {
    type Error = anyhow::Error;

    fn try_from(r: SectionRecord) -> Result<Self> {
        Ok(ContentSection {
            id: r.id,
            slug: r.slug,
            page_slug: r.page_slug,
            title: r.title,
            body: r.body,
            data: decode_json(&r.data, "content_sections.data")?,
            sort_order: r.sort_order,
            is_active: r.is_active,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[async_trait]
impl ContentSectionRepository for SqlxContentSectionRepository {
    async fn create(&self, section: &ContentSection) -> Result<ContentSection> {
        let now = Utc::now();
        let data = encode_json(&section.data)?;
        let id = on_pool!(self.pool, |conn| {
            sqlx::query(
                "INSERT INTO content_sections (slug, page_slug, title, body, data, sort_order, \
                 is_active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&section.slug)
            .bind(&section.page_slug)
            .bind(&section.title)
            .bind(&section.body)
            .bind(&data)
            .bind(section.sort_order)
            .bind(section.is_active)
            .bind(now)
            .bind(now)
            .execute(conn)
            .await
            .context("Failed to create content section")?
            .inserted_id()
        });
        Ok(ContentSection {
            id,
            created_at: now,
            updated_at: now,
            ..section.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<ContentSection>> {
        let sql = format!("SELECT {} FROM content_sections WHERE id = ?", SECTION_COLUMNS);
        let record = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, SectionRecord>(&sql)
                .bind(id)
                .fetch_optional(conn)
                .await
                .context("Failed to get content section")?
        });
        record.map(ContentSection::try_from).transpose()
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<ContentSection>> {
        let sql = format!("SELECT {} FROM content_sections WHERE slug = ?", SECTION_COLUMNS);
        let record = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, SectionRecord>(&sql)
                .bind(slug)
                .fetch_optional(conn)
                .await
                .context("Failed to get content section by slug")?
        });
        record.map(ContentSection::try_from).transpose()
    }

    async fn list(
        &self,
        page_slug: Option<&str>,
        active_only: bool,
    ) -> Result<Vec<ContentSection>> {
        let mut clauses = Vec::new();
        if page_slug.is_some() {
            clauses.push("page_slug = ?");
        }
        if active_only {
            clauses.push("is_active = ?");
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM content_sections {} ORDER BY page_slug, sort_order ASC, id ASC",
            SECTION_COLUMNS, where_sql
        );

        let records = on_pool!(self.pool, |conn| {
            let mut query = sqlx::query_as::<_, SectionRecord>(&sql);
            if let Some(page_slug) = page_slug {
                query = query.bind(page_slug);
            }
            if active_only {
                query = query.bind(true);
            }
            query
                .fetch_all(conn)
                .await
                .context("Failed to list content sections")?
        });
        records.into_iter().map(ContentSection::try_from).collect()
    }

    async fn update(&self, section: &ContentSection) -> Result<ContentSection> {
        let now = Utc::now();
        let data = encode_json(&section.data)?;
        on_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE content_sections SET slug = ?, page_slug = ?, title = ?, body = ?, \
                 data = ?, sort_order = ?, is_active = ?, updated_at = ? WHERE id = ?",
            )
            .bind(&section.slug)
            .bind(&section.page_slug)
            .bind(&section.title)
            .bind(&section.body)
            .bind(&data)
            .bind(section.sort_order)
            .bind(section.is_active)
            .bind(now)
            .bind(section.id)
            .execute(conn)
            .await
            .context("Failed to update content section")?;
        });
        Ok(ContentSection {
            updated_at: now,
            ..section.clone()
        })
    }

    async fn delete(&self, id: i64) -> Result<()> {
        on_pool!(self.pool, |conn| {
            sqlx::query("DELETE FROM content_sections WHERE id = ?")
                .bind(id)
                .execute(conn)
                .await
                .context("Failed to delete content section")?;
        });
        Ok(())
    }

    async fn exists_by_slug(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool> {
        let count = on_pool!(self.pool, |conn| {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM content_sections WHERE slug = ? AND id <> ?",
            )
            .bind(slug)
            .bind(exclude_id.unwrap_or(0))
            .fetch_one(conn)
            .await
            .context("Failed to check content section slug")?
        });
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::migrated_pool;
    use serde_json::json;

    fn section(slug: &str, page: &str, order: i32, active: bool) -> ContentSection {
        let now = Utc::now();
        ContentSection {
            id: 0,
            slug: slug.into(),
            page_slug: page.into(),
            title: Some(slug.into()),
            body: None,
            data: json!({"cta": {"label": "Start", "href": "/signup"}}),
            sort_order: order,
            is_active: active,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_list_active_sections_for_page() {
        let repo = SqlxContentSectionRepository::new(migrated_pool().await);
        repo.create(&section("home-features", "home", 2, true)).await.unwrap();
        repo.create(&section("home-hero", "home", 1, true)).await.unwrap();
        repo.create(&section("home-old", "home", 0, false)).await.unwrap();
        repo.create(&section("pricing-hero", "pricing", 0, true)).await.unwrap();

        let home: Vec<String> = repo
            .list(Some("home"), true)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.slug)
            .collect();
        assert_eq!(home, vec!["home-hero", "home-features"]);
        assert_eq!(repo.list(None, false).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_data_round_trips() {
        let repo = SqlxContentSectionRepository::new(migrated_pool().await);
        let created = repo.create(&section("hero", "home", 0, true)).await.unwrap();
        let found = repo.get_by_slug("hero").await.unwrap().unwrap();
        assert_eq!(found.data["cta"]["href"], "/signup");
        assert!(repo.exists_by_slug("hero", None).await.unwrap());
        assert!(!repo.exists_by_slug("hero", Some(created.id)).await.unwrap());
    }
}
