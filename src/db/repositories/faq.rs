//! FAQ repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::db::{DynDatabasePool, InsertId};
use crate::models::Faq;

#[async_trait]
pub trait FaqRepository: Send + Sync {
    async fn create(&self, faq: &Faq) -> Result<Faq>;
    async fn get_by_id(&self, id: i64) -> Result<Option<Faq>>;
    async fn get_by_slug(&self, slug: &str) -> Result<Option<Faq>>;
    /// Ordered by `sort_order`, then id
    async fn list(&self, published_only: bool, category: Option<&str>) -> Result<Vec<Faq>>;
    async fn update(&self, faq: &Faq) -> Result<Faq>;
    async fn delete(&self, id: i64) -> Result<()>;
    async fn exists_by_slug(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool>;
}

pub struct SqlxFaqRepository {
    pool: DynDatabasePool,
}

impl SqlxFaqRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn FaqRepository> {
        Arc::new(Self::new(pool))
    }
}

const FAQ_COLUMNS: &str =
    "id, slug, question, answer, category, sort_order, is_published, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct FaqRecord {
    id: i64,
    slug: String,
    question: String,
    answer: String,
    category: Option<String>,
    sort_order: i32,
    is_published: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<FaqRecord> for Faq {
    fn from(r: FaqRecord) -> Self {
        Faq {
            id: r.id,
            slug: r.slug,
            question: r.question,
            answer: r.answer,
            category: r.category,
            sort_order: r.sort_order,
            is_published: r.is_published,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[async_trait]
impl FaqRepository for SqlxFaqRepository {
    async fn create(&self, faq: &Faq) -> Result<Faq> {
        let now = Utc::now();
        let id = on_pool!(self.pool, |conn| {
            sqlx::query(
                "INSERT INTO faqs (slug, question, answer, category, sort_order, is_published, \
                 created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&faq.slug)
            .bind(&faq.question)
            .bind(&faq.answer)
            .bind(&faq.category)
            .bind(faq.sort_order)
            .bind(faq.is_published)
            .bind(now)
            .bind(now)
            .execute(conn)
            .await
            .context("Failed to create FAQ")?
            .inserted_id()
        });
        Ok(Faq {
            id,
            created_at: now,
            updated_at: now,
            ..faq.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Faq>> {
        let sql = format!("SELECT {} FROM faqs WHERE id = ?", FAQ_COLUMNS);
        let record = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, FaqRecord>(&sql)
                .bind(id)
                .fetch_optional(conn)
                .await
                .context("Failed to get FAQ")?
        });
        Ok(record.map(Faq::from))
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Faq>> {
        let sql = format!("SELECT {} FROM faqs WHERE slug = ?", FAQ_COLUMNS);
        let record = on_pool!(self.pool, |conn| {
            sqlx::query_as::<_, FaqRecord>(&sql)
                .bind(slug)
                .fetch_optional(conn)
                .await
                .context("Failed to get FAQ by slug")?
        });
        Ok(record.map(Faq::from))
    }

    async fn list(&self, published_only: bool, category: Option<&str>) -> Result<Vec<Faq>> {
        let mut clauses = Vec::new();
        if published_only {
            clauses.push("is_published = ?");
        }
        if category.is_some() {
            clauses.push("category = ?");
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM faqs {} ORDER BY sort_order ASC, id ASC",
            FAQ_COLUMNS, where_sql
        );

        let records = on_pool!(self.pool, |conn| {
            let mut query = sqlx::query_as::<_, FaqRecord>(&sql);
            if published_only {
                query = query.bind(true);
            }
            if let Some(category) = category {
                query = query.bind(category);
            }
            query.fetch_all(conn).await.context("Failed to list FAQs")?
        });
        Ok(records.into_iter().map(Faq::from).collect())
    }

    async fn update(&self, faq: &Faq) -> Result<Faq> {
        let now = Utc::now();
        on_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE faqs SET slug = ?, question = ?, answer = ?, category = ?, \
                 sort_order = ?, is_published = ?, updated_at = ? WHERE id = ?",
            )
            .bind(&faq.slug)
            .bind(&faq.question)
            .bind(&faq.answer)
            .bind(&faq.category)
            .bind(faq.sort_order)
            .bind(faq.is_published)
            .bind(now)
            .bind(faq.id)
            .execute(conn)
            .await
            .context("Failed to update FAQ")?;
        });
        Ok(Faq {
            updated_at: now,
            ..faq.clone()
        })
    }

    async fn delete(&self, id: i64) -> Result<()> {
        on_pool!(self.pool, |conn| {
            sqlx::query("DELETE FROM faqs WHERE id = ?")
                .bind(id)
                .execute(conn)
                .await
                .context("Failed to delete FAQ")?;
        });
        Ok(())
    }

    async fn exists_by_slug(&self, slug: &str, exclude_id: Option<i64>) -> Result<bool> {
        let count = on_pool!(self.pool, |conn| {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM faqs WHERE slug = ? AND id <> ?")
                .bind(slug)
                .bind(exclude_id.unwrap_or(0))
                .fetch_one(conn)
                .await
                .context("Failed to check FAQ slug")?
        });
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::migrated_pool;

    fn faq(slug: &str, order: i32, published: bool, category: Option<&str>) -> Faq {
        let now = Utc::now();
        Faq {
            id: 0,
            slug: slug.into(),
            question: format!("{}?", slug),
            answer: "Yes.".into(),
            category: category.map(str::to_string),
            sort_order: order,
            is_published: published,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_list_orders_by_sort_order_then_id() {
        let repo = SqlxFaqRepository::new(migrated_pool().await);
        repo.create(&faq("b", 2, true, None)).await.unwrap();
        repo.create(&faq("a1", 1, true, None)).await.unwrap();
        repo.create(&faq("a2", 1, true, None)).await.unwrap();
        repo.create(&faq("hidden", 0, false, None)).await.unwrap();

        let public: Vec<String> = repo
            .list(true, None)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.slug)
            .collect();
        assert_eq!(public, vec!["a1", "a2", "b"]);
        assert_eq!(repo.list(false, None).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_category_filter_and_slug_lookup() {
        let repo = SqlxFaqRepository::new(migrated_pool().await);
        repo.create(&faq("billing", 0, true, Some("billing"))).await.unwrap();
        let general = repo.create(&faq("general", 0, true, Some("general"))).await.unwrap();

        let billing = repo.list(true, Some("billing")).await.unwrap();
        assert_eq!(billing.len(), 1);
        assert!(repo.get_by_slug("general").await.unwrap().is_some());
        assert!(repo.exists_by_slug("general", None).await.unwrap());
        assert!(!repo.exists_by_slug("general", Some(general.id)).await.unwrap());
    }
}
