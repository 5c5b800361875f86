//! Blog service
//!
//! Business logic for blog posts:
//! - Create, read, update, delete with slug generation and validation
//! - Markdown rendering into `content_html`
//! - Publish, schedule and unpublish transitions
//! - Cached public reads, invalidated on every mutation
//! - Import of drafts from Sanity

use crate::cache::{CacheLayer, SharedCache};
use crate::db::repositories::BlogPostRepository;
use crate::integrations::{IntegrationError, SanityClient, SanityPost};
use crate::models::{
    AutomationEvent, BlogPost, BlogPostStatus, CreateBlogPostInput, ListParams, PagedResult,
    TriggerType, UpdateBlogPostInput,
};
use crate::services::automation::EventDispatcher;
use crate::services::markdown::{slugify, MarkdownRenderer};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Cache TTL for a single published post
const POST_CACHE_TTL_SECS: u64 = 3600;

/// Cache TTL for published listings
const LIST_CACHE_TTL_SECS: u64 = 300;

const CACHE_PREFIX: &str = "blog:";
const CACHE_KEY_BY_SLUG: &str = "blog:slug:";
const CACHE_KEY_LIST: &str = "blog:list:";

/// Length of generated excerpts
const EXCERPT_CHARS: usize = 200;

/// Error types for blog service operations
#[derive(Debug, thiserror::Error)]
pub enum BlogServiceError {
    #[error("Blog post not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Blog post slug already exists: {0}")]
    DuplicateSlug(String),

    #[error("External service error: {0}")]
    External(#[from] IntegrationError),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Outcome of a Sanity import
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    /// Slugs left alone because the local post is already live
    pub skipped: Vec<String>,
}

pub struct BlogService {
    repo: Arc<dyn BlogPostRepository>,
    cache: SharedCache,
    renderer: MarkdownRenderer,
    events: Arc<dyn EventDispatcher>,
    base_url: String,
}

impl BlogService {
    pub fn new(
        repo: Arc<dyn BlogPostRepository>,
        cache: SharedCache,
        renderer: MarkdownRenderer,
        events: Arc<dyn EventDispatcher>,
        base_url: &str,
    ) -> Self {
        Self {
            repo,
            cache,
            renderer,
            events,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Public URL of a post
    pub fn post_url(&self, slug: &str) -> String {
        format!("{}/blog/{}", self.base_url, slug)
    }

    /// Create a draft post
    ///
    /// # Errors
    /// - `ValidationError` if title or content is empty
    /// - `DuplicateSlug` if the slug is taken
    pub async fn create(&self, input: CreateBlogPostInput) -> Result<BlogPost, BlogServiceError> {
        validate_text("Title", &input.title)?;
        validate_text("Content", &input.content)?;

        let slug = match input.slug.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(slug) => slugify(slug),
            None => slugify(&input.title),
        };
        if slug.is_empty() {
            return Err(BlogServiceError::ValidationError(
                "Slug cannot be derived from the title".to_string(),
            ));
        }
        self.ensure_slug_free(&slug, None).await?;

        let content_html = self.renderer.render(&input.content);
        let mut post = BlogPost::new(input.title.trim().to_string(), slug, input.content, content_html);
        post.excerpt = non_empty(input.excerpt)
            .or_else(|| Some(self.renderer.excerpt(&post.content, EXCERPT_CHARS)));
        post.author = non_empty(input.author);
        post.category = non_empty(input.category);
        post.tags = clean_tags(input.tags);
        post.cover_image = non_empty(input.cover_image);

        let created = self
            .repo
            .create(&post)
            .await
            .context("Failed to create blog post")?;
        tracing::info!(id = created.id, slug = %created.slug, "Blog post created");
        Ok(created)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<BlogPost, BlogServiceError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get blog post")?
            .ok_or_else(|| BlogServiceError::NotFound(id.to_string()))
    }

    pub async fn update(
        &self,
        id: i64,
        input: UpdateBlogPostInput,
    ) -> Result<BlogPost, BlogServiceError> {
        let mut post = self.get_by_id(id).await?;

        if let Some(title) = input.title {
            validate_text("Title", &title)?;
            post.title = title.trim().to_string();
        }
        if let Some(slug) = input.slug {
            let slug = slugify(&slug);
            if slug.is_empty() {
                return Err(BlogServiceError::ValidationError("Slug cannot be empty".to_string()));
            }
            if slug != post.slug {
                self.ensure_slug_free(&slug, Some(id)).await?;
                post.slug = slug;
            }
        }
        if let Some(content) = input.content {
            validate_text("Content", &content)?;
            post.content_html = self.renderer.render(&content);
            post.content = content;
        }
        if let Some(excerpt) = input.excerpt {
            post.excerpt = non_empty(Some(excerpt));
        }
        if post.excerpt.is_none() {
            post.excerpt = Some(self.renderer.excerpt(&post.content, EXCERPT_CHARS));
        }
        if let Some(author) = input.author {
            post.author = non_empty(Some(author));
        }
        if let Some(category) = input.category {
            post.category = non_empty(Some(category));
        }
        if let Some(tags) = input.tags {
            post.tags = clean_tags(tags);
        }
        if let Some(cover) = input.cover_image {
            post.cover_image = non_empty(Some(cover));
        }

        let updated = self
            .repo
            .update(&post)
            .await
            .context("Failed to update blog post")?;
        self.invalidate_cache().await;
        Ok(updated)
    }

    pub async fn delete(&self, id: i64) -> Result<(), BlogServiceError> {
        self.get_by_id(id).await?;
        self.repo
            .delete(id)
            .await
            .context("Failed to delete blog post")?;
        self.invalidate_cache().await;
        Ok(())
    }

    /// Publish immediately
    pub async fn publish(&self, id: i64) -> Result<BlogPost, BlogServiceError> {
        let post = self.get_by_id(id).await?;
        if post.is_published() {
            return Ok(post);
        }
        self.make_live(post, Utc::now()).await
    }

    /// Queue a post for the scheduler
    pub async fn schedule(&self, id: i64, at: DateTime<Utc>) -> Result<BlogPost, BlogServiceError> {
        if at <= Utc::now() {
            return Err(BlogServiceError::ValidationError(
                "Scheduled time must be in the future".to_string(),
            ));
        }
        let mut post = self.get_by_id(id).await?;
        if post.is_published() {
            return Err(BlogServiceError::ValidationError(
                "Post is already published".to_string(),
            ));
        }
        post.status = BlogPostStatus::Scheduled;
        post.published_at = Some(at);
        post.retry_count = 0;
        post.last_error = None;

        let updated = self
            .repo
            .update(&post)
            .await
            .context("Failed to schedule blog post")?;
        tracing::info!(id, at = %at, "Blog post scheduled");
        Ok(updated)
    }

    /// Move a post back to draft
    pub async fn unpublish(&self, id: i64) -> Result<BlogPost, BlogServiceError> {
        let mut post = self.get_by_id(id).await?;
        post.status = BlogPostStatus::Draft;
        post.published_at = None;

        let updated = self
            .repo
            .update(&post)
            .await
            .context("Failed to unpublish blog post")?;
        self.invalidate_cache().await;
        Ok(updated)
    }

    /// Publish a post the scheduler found due
    pub async fn publish_scheduled(&self, post: BlogPost) -> Result<BlogPost, BlogServiceError> {
        let at = post.published_at.unwrap_or_else(Utc::now);
        self.make_live(post, at).await
    }

    /// Store a failed scheduled publish. Exhausted posts go back to draft
    /// with the error kept for the editor.
    pub async fn record_scheduled_failure(
        &self,
        mut post: BlogPost,
        error: String,
        give_up: bool,
    ) -> Result<BlogPost, BlogServiceError> {
        post.retry_count += 1;
        post.last_error = Some(error);
        if give_up {
            post.status = BlogPostStatus::Draft;
        }
        Ok(self
            .repo
            .update(&post)
            .await
            .context("Failed to record blog publish failure")?)
    }

    pub async fn list_due(&self, limit: i64) -> Result<Vec<BlogPost>, BlogServiceError> {
        Ok(self
            .repo
            .list_due(Utc::now(), limit)
            .await
            .context("Failed to list due blog posts")?)
    }

    /// Admin listing across every status
    pub async fn list(
        &self,
        params: ListParams,
        status: Option<BlogPostStatus>,
    ) -> Result<PagedResult<BlogPost>, BlogServiceError> {
        let (items, total) = self
            .repo
            .list(&params, status)
            .await
            .context("Failed to list blog posts")?;
        Ok(PagedResult::new(items, total, &params))
    }

    /// Public listing, served from cache when possible
    pub async fn list_published(
        &self,
        params: ListParams,
        category: Option<&str>,
    ) -> Result<PagedResult<BlogPost>, BlogServiceError> {
        let cache_key = format!(
            "{}{}:{}:{}",
            CACHE_KEY_LIST,
            params.page,
            params.per_page,
            category.unwrap_or("")
        );
        if let Ok(Some(cached)) = self.cache.get::<PagedResult<BlogPost>>(&cache_key).await {
            return Ok(cached);
        }

        let (items, total) = self
            .repo
            .list_published(&params, category)
            .await
            .context("Failed to list published blog posts")?;
        let result = PagedResult::new(items, total, &params);

        let _ = self
            .cache
            .set(&cache_key, &result, Duration::from_secs(LIST_CACHE_TTL_SECS))
            .await;
        Ok(result)
    }

    /// A published post by slug; drafts and scheduled posts are not found
    pub async fn get_published_by_slug(&self, slug: &str) -> Result<BlogPost, BlogServiceError> {
        let cache_key = format!("{}{}", CACHE_KEY_BY_SLUG, slug);
        if let Ok(Some(cached)) = self.cache.get::<BlogPost>(&cache_key).await {
            return Ok(cached);
        }

        let post = self
            .repo
            .get_by_slug(slug)
            .await
            .context("Failed to get blog post by slug")?
            .filter(BlogPost::is_published)
            .ok_or_else(|| BlogServiceError::NotFound(slug.to_string()))?;

        let _ = self
            .cache
            .set(&cache_key, &post, Duration::from_secs(POST_CACHE_TTL_SECS))
            .await;
        Ok(post)
    }

    /// Pull every post from Sanity and upsert it locally
    pub async fn import_from_sanity(
        &self,
        sanity: &SanityClient,
    ) -> Result<ImportReport, BlogServiceError> {
        let posts = sanity.fetch_posts().await?;
        tracing::info!(count = posts.len(), "Fetched posts from Sanity");
        self.import_posts(posts).await
    }

    /// Upsert imported posts as drafts keyed by slug. Published local posts
    /// are never overwritten.
    pub async fn import_posts(
        &self,
        posts: Vec<SanityPost>,
    ) -> Result<ImportReport, BlogServiceError> {
        let mut report = ImportReport::default();

        for source in posts {
            let slug = slugify(&source.slug);
            if slug.is_empty() || source.title.trim().is_empty() {
                continue;
            }
            let content = source.markdown();
            let existing = self
                .repo
                .get_by_slug(&slug)
                .await
                .context("Failed to look up imported post")?;

            match existing {
                Some(post) if post.status != BlogPostStatus::Draft => {
                    report.skipped.push(slug);
                }
                Some(mut post) => {
                    post.title = source.title.trim().to_string();
                    post.content_html = self.renderer.render(&content);
                    post.excerpt = non_empty(source.excerpt)
                        .or_else(|| Some(self.renderer.excerpt(&content, EXCERPT_CHARS)));
                    post.content = content;
                    post.author = non_empty(source.author);
                    post.category = source.categories.as_ref().and_then(|c| c.first().cloned());
                    post.tags = clean_tags(source.categories.unwrap_or_default());
                    post.cover_image = non_empty(source.cover_image);
                    self.repo
                        .update(&post)
                        .await
                        .context("Failed to update imported post")?;
                    report.updated += 1;
                }
                None => {
                    let content_html = self.renderer.render(&content);
                    let mut post = BlogPost::new(
                        source.title.trim().to_string(),
                        slug,
                        content,
                        content_html,
                    );
                    post.excerpt = non_empty(source.excerpt)
                        .or_else(|| Some(self.renderer.excerpt(&post.content, EXCERPT_CHARS)));
                    post.author = non_empty(source.author);
                    post.category = source.categories.as_ref().and_then(|c| c.first().cloned());
                    post.tags = clean_tags(source.categories.unwrap_or_default());
                    post.cover_image = non_empty(source.cover_image);
                    self.repo
                        .create(&post)
                        .await
                        .context("Failed to create imported post")?;
                    report.created += 1;
                }
            }
        }

        tracing::info!(
            created = report.created,
            updated = report.updated,
            skipped = report.skipped.len(),
            "Sanity import finished"
        );
        Ok(report)
    }

    /// Payload handed to automation rules for `blog_published`
    pub fn event_payload(&self, post: &BlogPost) -> Value {
        json!({
            "id": post.id,
            "title": post.title,
            "slug": post.slug,
            "excerpt": post.excerpt,
            "url": self.post_url(&post.slug),
            "category": post.category,
            "tags": post.tags,
            "author": post.author,
            "published_at": post.published_at,
        })
    }

    async fn make_live(
        &self,
        mut post: BlogPost,
        at: DateTime<Utc>,
    ) -> Result<BlogPost, BlogServiceError> {
        post.status = BlogPostStatus::Published;
        post.published_at = Some(at);
        post.content_html = self.renderer.render(&post.content);
        post.last_error = None;

        let published = self
            .repo
            .update(&post)
            .await
            .context("Failed to publish blog post")?;
        self.invalidate_cache().await;

        tracing::info!(id = published.id, slug = %published.slug, "Blog post published");
        self.events.dispatch(AutomationEvent::new(
            TriggerType::BlogPublished,
            self.event_payload(&published),
        ));
        Ok(published)
    }

    async fn ensure_slug_free(&self, slug: &str, exclude: Option<i64>) -> Result<(), BlogServiceError> {
        let taken = self
            .repo
            .exists_by_slug(slug, exclude)
            .await
            .context("Failed to check slug")?;
        if taken {
            return Err(BlogServiceError::DuplicateSlug(slug.to_string()));
        }
        Ok(())
    }

    async fn invalidate_cache(&self) {
        if let Err(e) = self.cache.delete_prefix(CACHE_PREFIX).await {
            tracing::warn!("Failed to invalidate blog cache: {}", e);
        }
    }
}

fn validate_text(field: &str, value: &str) -> Result<(), BlogServiceError> {
    if value.trim().is_empty() {
        return Err(BlogServiceError::ValidationError(format!(
            "{} cannot be empty",
            field
        )));
    }
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_string();
        if !tag.is_empty() && !cleaned.contains(&tag) {
            cleaned.push(tag);
        }
    }
    cleaned
}
