//! Site content services: FAQ entries, static pages and page sections.
//!
//! All three are keyed by slug. Public reads only see published FAQs and
//! pages and active sections, and are cached until the next edit.

use crate::cache::{CacheLayer, SharedCache};
use crate::db::repositories::{ContentSectionRepository, FaqRepository, PageRepository};
use crate::models::{
    ContentSection, CreateContentSectionInput, CreateFaqInput, CreatePageInput, Faq, Page,
    PageStatus, UpdateContentSectionInput, UpdateFaqInput, UpdatePageInput,
};
use crate::services::markdown::{slugify, MarkdownRenderer};
use anyhow::Context;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const CONTENT_CACHE_TTL_SECS: u64 = 600;

const FAQ_CACHE_PREFIX: &str = "faq:";
const PAGE_CACHE_PREFIX: &str = "page:";
const SECTION_CACHE_PREFIX: &str = "section:";

#[derive(Debug, thiserror::Error)]
pub enum ContentServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Slug already exists: {0}")]
    DuplicateSlug(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

fn required(field: &str, value: &str) -> Result<(), ContentServiceError> {
    if value.trim().is_empty() {
        return Err(ContentServiceError::ValidationError(format!(
            "{} cannot be empty",
            field
        )));
    }
    Ok(())
}

/// Slugify `raw`, rejecting input that has nothing slug-worthy in it
fn clean_slug(raw: &str) -> Result<String, ContentServiceError> {
    let slug = slugify(raw);
    if slug.is_empty() {
        return Err(ContentServiceError::ValidationError(
            "Slug cannot be empty".to_string(),
        ));
    }
    Ok(slug)
}

async fn invalidate(cache: &SharedCache, prefix: &str) {
    if let Err(e) = cache.delete_prefix(prefix).await {
        tracing::warn!(prefix, "Failed to invalidate cache: {}", e);
    }
}

// ----------------------------------------------------------------------
// FAQ
// ----------------------------------------------------------------------

pub struct FaqService {
    repo: Arc<dyn FaqRepository>,
    cache: SharedCache,
}

impl FaqService {
    pub fn new(repo: Arc<dyn FaqRepository>, cache: SharedCache) -> Self {
        Self { repo, cache }
    }

    pub async fn create(&self, input: CreateFaqInput) -> Result<Faq, ContentServiceError> {
        required("Question", &input.question)?;
        required("Answer", &input.answer)?;

        let slug = clean_slug(input.slug.as_deref().unwrap_or(&input.question))?;
        self.ensure_slug_free(&slug, None).await?;

        let now = Utc::now();
        let faq = Faq {
            id: 0,
            slug,
            question: input.question.trim().to_string(),
            answer: input.answer,
            category: input.category.filter(|c| !c.trim().is_empty()),
            sort_order: input.sort_order,
            is_published: input.is_published,
            created_at: now,
            updated_at: now,
        };
        let created = self.repo.create(&faq).await.context("Failed to create FAQ")?;
        invalidate(&self.cache, FAQ_CACHE_PREFIX).await;
        Ok(created)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Faq, ContentServiceError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get FAQ")?
            .ok_or_else(|| ContentServiceError::NotFound(format!("FAQ {}", id)))
    }

    /// Every FAQ, for the admin
    pub async fn list(&self, category: Option<&str>) -> Result<Vec<Faq>, ContentServiceError> {
        Ok(self.repo.list(false, category).await.context("Failed to list FAQs")?)
    }

    /// Published FAQs ordered for display
    pub async fn list_published(&self, category: Option<&str>) -> Result<Vec<Faq>, ContentServiceError> {
        let key = format!("{}list:{}", FAQ_CACHE_PREFIX, category.unwrap_or(""));
        if let Ok(Some(cached)) = self.cache.get::<Vec<Faq>>(&key).await {
            return Ok(cached);
        }
        let faqs = self
            .repo
            .list(true, category)
            .await
            .context("Failed to list FAQs")?;
        let _ = self
            .cache
            .set(&key, &faqs, Duration::from_secs(CONTENT_CACHE_TTL_SECS))
            .await;
        Ok(faqs)
    }

    pub async fn update(&self, id: i64, input: UpdateFaqInput) -> Result<Faq, ContentServiceError> {
        let mut faq = self.get_by_id(id).await?;

        if let Some(question) = input.question {
            required("Question", &question)?;
            faq.question = question.trim().to_string();
        }
        if let Some(answer) = input.answer {
            required("Answer", &answer)?;
            faq.answer = answer;
        }
        if let Some(slug) = input.slug {
            let slug = clean_slug(&slug)?;
            if slug != faq.slug {
                self.ensure_slug_free(&slug, Some(id)).await?;
                faq.slug = slug;
            }
        }
        if let Some(category) = input.category {
            faq.category = Some(category).filter(|c| !c.trim().is_empty());
        }
        if let Some(order) = input.sort_order {
            faq.sort_order = order;
        }
        if let Some(published) = input.is_published {
            faq.is_published = published;
        }

        let updated = self.repo.update(&faq).await.context("Failed to update FAQ")?;
        invalidate(&self.cache, FAQ_CACHE_PREFIX).await;
        Ok(updated)
    }

    pub async fn delete(&self, id: i64) -> Result<(), ContentServiceError> {
        self.get_by_id(id).await?;
        self.repo.delete(id).await.context("Failed to delete FAQ")?;
        invalidate(&self.cache, FAQ_CACHE_PREFIX).await;
        Ok(())
    }

    async fn ensure_slug_free(&self, slug: &str, exclude: Option<i64>) -> Result<(), ContentServiceError> {
        if self
            .repo
            .exists_by_slug(slug, exclude)
            .await
            .context("Failed to check FAQ slug")?
        {
            return Err(ContentServiceError::DuplicateSlug(slug.to_string()));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Pages
// ----------------------------------------------------------------------

pub struct PageService {
    repo: Arc<dyn PageRepository>,
    cache: SharedCache,
    markdown: MarkdownRenderer,
}

impl PageService {
    pub fn new(repo: Arc<dyn PageRepository>, cache: SharedCache, markdown: MarkdownRenderer) -> Self {
        Self {
            repo,
            cache,
            markdown,
        }
    }

    pub async fn create(&self, input: CreatePageInput) -> Result<Page, ContentServiceError> {
        required("Title", &input.title)?;
        let slug = clean_slug(&input.slug)?;
        if self
            .repo
            .exists_by_slug(&slug, None)
            .await
            .context("Failed to check page slug")?
        {
            return Err(ContentServiceError::DuplicateSlug(slug));
        }

        let now = Utc::now();
        let page = Page {
            id: 0,
            slug,
            title: input.title.trim().to_string(),
            content_html: self.markdown.render(&input.content),
            content: input.content,
            meta_description: input.meta_description.filter(|d| !d.trim().is_empty()),
            status: input.status,
            created_at: now,
            updated_at: now,
        };
        let created = self.repo.create(&page).await.context("Failed to create page")?;
        invalidate(&self.cache, PAGE_CACHE_PREFIX).await;
        Ok(created)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Page, ContentServiceError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get page")?
            .ok_or_else(|| ContentServiceError::NotFound(format!("page {}", id)))
    }

    pub async fn list(&self, status: Option<PageStatus>) -> Result<Vec<Page>, ContentServiceError> {
        Ok(self.repo.list(status).await.context("Failed to list pages")?)
    }

    pub async fn get_published_by_slug(&self, slug: &str) -> Result<Page, ContentServiceError> {
        let key = format!("{}{}", PAGE_CACHE_PREFIX, slug);
        if let Ok(Some(cached)) = self.cache.get::<Page>(&key).await {
            return Ok(cached);
        }
        let page = self
            .repo
            .get_by_slug(slug)
            .await
            .context("Failed to get page")?
            .filter(|p| p.status == PageStatus::Published)
            .ok_or_else(|| ContentServiceError::NotFound(format!("page {}", slug)))?;
        let _ = self
            .cache
            .set(&key, &page, Duration::from_secs(CONTENT_CACHE_TTL_SECS))
            .await;
        Ok(page)
    }

    pub async fn update(&self, id: i64, input: UpdatePageInput) -> Result<Page, ContentServiceError> {
        let mut page = self.get_by_id(id).await?;

        if let Some(slug) = input.slug {
            let slug = clean_slug(&slug)?;
            if slug != page.slug {
                if self
                    .repo
                    .exists_by_slug(&slug, Some(id))
                    .await
                    .context("Failed to check page slug")?
                {
                    return Err(ContentServiceError::DuplicateSlug(slug));
                }
                page.slug = slug;
            }
        }
        if let Some(title) = input.title {
            required("Title", &title)?;
            page.title = title.trim().to_string();
        }
        if let Some(content) = input.content {
            page.content_html = self.markdown.render(&content);
            page.content = content;
        }
        if let Some(description) = input.meta_description {
            page.meta_description = Some(description).filter(|d| !d.trim().is_empty());
        }
        if let Some(status) = input.status {
            page.status = status;
        }

        let updated = self.repo.update(&page).await.context("Failed to update page")?;
        invalidate(&self.cache, PAGE_CACHE_PREFIX).await;
        Ok(updated)
    }

    pub async fn delete(&self, id: i64) -> Result<(), ContentServiceError> {
        self.get_by_id(id).await?;
        self.repo.delete(id).await.context("Failed to delete page")?;
        invalidate(&self.cache, PAGE_CACHE_PREFIX).await;
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Content sections
// ----------------------------------------------------------------------

pub struct ContentSectionService {
    repo: Arc<dyn ContentSectionRepository>,
    cache: SharedCache,
}

impl ContentSectionService {
    pub fn new(repo: Arc<dyn ContentSectionRepository>, cache: SharedCache) -> Self {
        Self { repo, cache }
    }

    pub async fn create(
        &self,
        input: CreateContentSectionInput,
    ) -> Result<ContentSection, ContentServiceError> {
        let slug = clean_slug(&input.slug)?;
        let page_slug = clean_slug(&input.page_slug)?;
        if self
            .repo
            .exists_by_slug(&slug, None)
            .await
            .context("Failed to check section slug")?
        {
            return Err(ContentServiceError::DuplicateSlug(slug));
        }

        let now = Utc::now();
        let section = ContentSection {
            id: 0,
            slug,
            page_slug,
            title: input.title,
            body: input.body,
            data: input.data.unwrap_or_else(|| Value::Object(Default::default())),
            sort_order: input.sort_order,
            is_active: input.is_active.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };
        let created = self
            .repo
            .create(&section)
            .await
            .context("Failed to create content section")?;
        invalidate(&self.cache, SECTION_CACHE_PREFIX).await;
        Ok(created)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<ContentSection, ContentServiceError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get content section")?
            .ok_or_else(|| ContentServiceError::NotFound(format!("content section {}", id)))
    }

    /// Admin listing, optionally for one page
    pub async fn list(&self, page_slug: Option<&str>) -> Result<Vec<ContentSection>, ContentServiceError> {
        Ok(self
            .repo
            .list(page_slug, false)
            .await
            .context("Failed to list content sections")?)
    }

    /// Active sections of a page in display order
    pub async fn list_for_page(&self, page_slug: &str) -> Result<Vec<ContentSection>, ContentServiceError> {
        let key = format!("{}{}", SECTION_CACHE_PREFIX, page_slug);
        if let Ok(Some(cached)) = self.cache.get::<Vec<ContentSection>>(&key).await {
            return Ok(cached);
        }
        let sections = self
            .repo
            .list(Some(page_slug), true)
            .await
            .context("Failed to list content sections")?;
        let _ = self
            .cache
            .set(&key, &sections, Duration::from_secs(CONTENT_CACHE_TTL_SECS))
            .await;
        Ok(sections)
    }

    pub async fn update(
        &self,
        id: i64,
        input: UpdateContentSectionInput,
    ) -> Result<ContentSection, ContentServiceError> {
        let mut section = self.get_by_id(id).await?;

        if let Some(slug) = input.slug {
            let slug = clean_slug(&slug)?;
            if slug != section.slug {
                if self
                    .repo
                    .exists_by_slug(&slug, Some(id))
                    .await
                    .context("Failed to check section slug")?
                {
                    return Err(ContentServiceError::DuplicateSlug(slug));
                }
                section.slug = slug;
            }
        }
        if let Some(page_slug) = input.page_slug {
            section.page_slug = clean_slug(&page_slug)?;
        }
        if let Some(title) = input.title {
            section.title = Some(title).filter(|t| !t.is_empty());
        }
        if let Some(body) = input.body {
            section.body = Some(body).filter(|b| !b.is_empty());
        }
        if let Some(data) = input.data {
            section.data = data;
        }
        if let Some(order) = input.sort_order {
            section.sort_order = order;
        }
        if let Some(active) = input.is_active {
            section.is_active = active;
        }

        let updated = self
            .repo
            .update(&section)
            .await
            .context("Failed to update content section")?;
        invalidate(&self.cache, SECTION_CACHE_PREFIX).await;
        Ok(updated)
    }

    pub async fn delete(&self, id: i64) -> Result<(), ContentServiceError> {
        self.get_by_id(id).await?;
        self.repo
            .delete(id)
            .await
            .context("Failed to delete content section")?;
        invalidate(&self.cache, SECTION_CACHE_PREFIX).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::repositories::test_support::migrated_pool;
    use crate::db::repositories::{
        SqlxContentSectionRepository, SqlxFaqRepository, SqlxPageRepository,
    };
    use serde_json::json;

    fn faq_input(question: &str, order: i32, published: bool) -> CreateFaqInput {
        CreateFaqInput {
            question: question.into(),
            answer: "Yes.".into(),
            slug: None,
            category: Some("general".into()),
            sort_order: order,
            is_published: published,
        }
    }

    #[tokio::test]
    async fn test_faq_public_listing_and_cache_invalidation() {
        let service = FaqService::new(
            SqlxFaqRepository::boxed(migrated_pool().await),
            Arc::new(MemoryCache::new()),
        );
        service.create(faq_input("Second?", 2, true)).await.unwrap();
        let first = service.create(faq_input("First?", 1, true)).await.unwrap();
        service.create(faq_input("Hidden?", 0, false)).await.unwrap();
        assert_eq!(first.slug, "first");

        let public = service.list_published(None).await.unwrap();
        let questions: Vec<_> = public.iter().map(|f| f.question.as_str()).collect();
        assert_eq!(questions, vec!["First?", "Second?"]);

        service
            .update(first.id, UpdateFaqInput { is_published: Some(false), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(service.list_published(None).await.unwrap().len(), 1);
        assert_eq!(service.list(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_faq_validation_and_duplicates() {
        let service = FaqService::new(
            SqlxFaqRepository::boxed(migrated_pool().await),
            Arc::new(MemoryCache::new()),
        );
        assert!(matches!(
            service.create(faq_input("  ", 0, true)).await,
            Err(ContentServiceError::ValidationError(_))
        ));
        service.create(faq_input("Pricing?", 0, true)).await.unwrap();
        assert!(matches!(
            service.create(faq_input("Pricing?", 1, true)).await,
            Err(ContentServiceError::DuplicateSlug(_))
        ));
    }

    #[tokio::test]
    async fn test_page_publication_controls_visibility() {
        let service = PageService::new(
            SqlxPageRepository::boxed(migrated_pool().await),
            Arc::new(MemoryCache::new()),
            MarkdownRenderer::new(),
        );
        let page = service
            .create(CreatePageInput {
                slug: "About Us".into(),
                title: "About".into(),
                content: "We **build** things.".into(),
                meta_description: None,
                status: PageStatus::Draft,
            })
            .await
            .unwrap();
        assert_eq!(page.slug, "about-us");
        assert!(page.content_html.contains("<strong>build</strong>"));
        assert!(service.get_published_by_slug("about-us").await.is_err());

        service
            .update(page.id, UpdatePageInput { status: Some(PageStatus::Published), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(service.get_published_by_slug("about-us").await.unwrap().id, page.id);

        service.delete(page.id).await.unwrap();
        assert!(matches!(
            service.get_published_by_slug("about-us").await,
            Err(ContentServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sections_for_page() {
        let service = ContentSectionService::new(
            SqlxContentSectionRepository::boxed(migrated_pool().await),
            Arc::new(MemoryCache::new()),
        );
        let section_input = |slug: &str, order: i32| CreateContentSectionInput {
            slug: slug.into(),
            page_slug: "home".into(),
            title: Some(slug.into()),
            body: None,
            data: Some(json!({"items": [1, 2, 3]})),
            sort_order: order,
            is_active: None,
        };
        service.create(section_input("features", 2)).await.unwrap();
        let hero = service.create(section_input("hero", 1)).await.unwrap();
        assert!(hero.is_active);

        let slugs: Vec<_> = service
            .list_for_page("home")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.slug)
            .collect();
        assert_eq!(slugs, vec!["hero", "features"]);

        service
            .update(hero.id, UpdateContentSectionInput { is_active: Some(false), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(service.list_for_page("home").await.unwrap().len(), 1);
        assert_eq!(service.list(Some("home")).await.unwrap().len(), 2);
    }
}
