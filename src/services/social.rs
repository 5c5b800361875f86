//! Social service
//!
//! Social post CRUD, immediate and scheduled publishing, teaser generation
//! from blog posts and the LinkedIn OAuth connection.

use crate::db::repositories::settings::{
    LINKEDIN_ACCESS_TOKEN, LINKEDIN_MEMBER_URN, LINKEDIN_OAUTH_STATE, LINKEDIN_TOKEN_EXPIRES_AT,
};
use crate::db::repositories::{
    BlogPostRepository, SettingsRepository, SocialPostFilter, SocialPostRepository,
};
use crate::integrations::{IntegrationError, LinkedInClient, SocialPublisher};
use crate::models::{
    AutomationEvent, CreateSocialPostInput, ListParams, PagedResult, PublishReceipt,
    SocialPlatform, SocialPost, SocialPostStatus, TriggerType, UpdateSocialPostInput,
};
use crate::services::automation::EventDispatcher;
use crate::services::markdown::truncate_words;
use crate::services::random_hex;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Error types for social service operations
#[derive(Debug, thiserror::Error)]
pub enum SocialServiceError {
    #[error("Social post not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Publish failed: {0}")]
    External(#[from] IntegrationError),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Routes each post to the right publisher.
///
/// LinkedIn posts go straight to LinkedIn when an access token is stored
/// in settings; everything else goes through the fallback (Ayrshare).
pub struct PublisherRouter {
    fallback: Arc<dyn SocialPublisher>,
    linkedin: Option<Arc<LinkedInClient>>,
    settings: Arc<dyn SettingsRepository>,
}

impl PublisherRouter {
    pub fn new(
        fallback: Arc<dyn SocialPublisher>,
        linkedin: Option<Arc<LinkedInClient>>,
        settings: Arc<dyn SettingsRepository>,
    ) -> Self {
        Self {
            fallback,
            linkedin,
            settings,
        }
    }

    /// Stored LinkedIn token and author URN, when connected and unexpired
    async fn linkedin_credentials(&self) -> anyhow::Result<Option<(String, String)>> {
        let token = self.settings.get(LINKEDIN_ACCESS_TOKEN).await?;
        let urn = self.settings.get(LINKEDIN_MEMBER_URN).await?;
        let expires_at = self.settings.get(LINKEDIN_TOKEN_EXPIRES_AT).await?;

        let expired = expires_at
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .is_some_and(|at| at <= Utc::now());
        match (token, urn) {
            (Some(token), Some(urn)) if !token.is_empty() && !expired => Ok(Some((token, urn))),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl SocialPublisher for PublisherRouter {
    async fn publish(&self, post: &SocialPost) -> Result<PublishReceipt, IntegrationError> {
        if post.platform == SocialPlatform::Linkedin {
            if let Some(client) = &self.linkedin {
                let credentials = self.linkedin_credentials().await.unwrap_or_else(|e| {
                    tracing::warn!("Failed to read LinkedIn settings: {:#}", e);
                    None
                });
                if let Some((token, urn)) = credentials {
                    return client.publish_text(&token, &urn, &post.content).await;
                }
            }
        }
        self.fallback.publish(post).await
    }
}

/// LinkedIn connection state for the admin UI
#[derive(Debug, Clone, Serialize)]
pub struct LinkedInStatus {
    pub connected: bool,
    pub member_urn: Option<String>,
    pub expires_at: Option<String>,
}

pub struct SocialService {
    repo: Arc<dyn SocialPostRepository>,
    blog_repo: Arc<dyn BlogPostRepository>,
    settings: Arc<dyn SettingsRepository>,
    publisher: Arc<dyn SocialPublisher>,
    linkedin: Option<Arc<LinkedInClient>>,
    events: Arc<dyn EventDispatcher>,
    base_url: String,
}

impl SocialService {
    pub fn new(
        repo: Arc<dyn SocialPostRepository>,
        blog_repo: Arc<dyn BlogPostRepository>,
        settings: Arc<dyn SettingsRepository>,
        publisher: Arc<dyn SocialPublisher>,
        linkedin: Option<Arc<LinkedInClient>>,
        events: Arc<dyn EventDispatcher>,
        base_url: &str,
    ) -> Self {
        Self {
            repo,
            blog_repo,
            settings,
            publisher,
            linkedin,
            events,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn create(&self, input: CreateSocialPostInput) -> Result<SocialPost, SocialServiceError> {
        validate_content(input.platform, &input.content)?;

        let mut post = SocialPost::new(input.platform, input.content.trim().to_string());
        post.media_urls = input.media_urls;
        post.blog_post_id = input.blog_post_id;
        if let Some(at) = input.scheduled_at {
            ensure_future(at)?;
            post.status = SocialPostStatus::Scheduled;
            post.scheduled_at = Some(at);
        }

        Ok(self
            .repo
            .create(&post)
            .await
            .context("Failed to create social post")?)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<SocialPost, SocialServiceError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get social post")?
            .ok_or_else(|| SocialServiceError::NotFound(id.to_string()))
    }

    pub async fn list(
        &self,
        params: ListParams,
        filter: SocialPostFilter,
    ) -> Result<PagedResult<SocialPost>, SocialServiceError> {
        let (items, total) = self
            .repo
            .list(&params, filter)
            .await
            .context("Failed to list social posts")?;
        Ok(PagedResult::new(items, total, &params))
    }

    pub async fn update(
        &self,
        id: i64,
        input: UpdateSocialPostInput,
    ) -> Result<SocialPost, SocialServiceError> {
        let mut post = self.get_by_id(id).await?;
        if !post.is_editable() {
            return Err(SocialServiceError::ValidationError(
                "Published posts cannot be edited".to_string(),
            ));
        }

        if let Some(platform) = input.platform {
            post.platform = platform;
        }
        if let Some(content) = input.content {
            post.content = content.trim().to_string();
        }
        if let Some(media) = input.media_urls {
            post.media_urls = media;
        }
        validate_content(post.platform, &post.content)?;

        Ok(self
            .repo
            .update(&post)
            .await
            .context("Failed to update social post")?)
    }

    pub async fn delete(&self, id: i64) -> Result<(), SocialServiceError> {
        self.get_by_id(id).await?;
        self.repo
            .delete(id)
            .await
            .context("Failed to delete social post")?;
        Ok(())
    }

    /// Queue a post for the scheduler, resetting any earlier retries
    pub async fn schedule(&self, id: i64, at: DateTime<Utc>) -> Result<SocialPost, SocialServiceError> {
        ensure_future(at)?;
        let mut post = self.get_by_id(id).await?;
        if !post.is_editable() {
            return Err(SocialServiceError::ValidationError(
                "Post is already published".to_string(),
            ));
        }
        post.status = SocialPostStatus::Scheduled;
        post.scheduled_at = Some(at);
        post.retry_count = 0;
        post.last_error = None;
        post.next_attempt_at = None;

        Ok(self
            .repo
            .update(&post)
            .await
            .context("Failed to schedule social post")?)
    }

    /// Publish right away. Failures mark the post failed and are returned
    /// to the caller; nothing is retried.
    pub async fn publish_now(&self, id: i64) -> Result<SocialPost, SocialServiceError> {
        let post = self.get_by_id(id).await?;
        if post.status == SocialPostStatus::Published {
            return Err(SocialServiceError::ValidationError(
                "Post is already published".to_string(),
            ));
        }

        match self.deliver(&post).await {
            Ok(receipt) => self.mark_published(post, receipt).await,
            Err(e) => {
                self.mark_failed(post, e.to_string()).await?;
                Err(SocialServiceError::External(e))
            }
        }
    }

    /// Hand a post to its publisher without touching the database
    pub async fn deliver(&self, post: &SocialPost) -> Result<PublishReceipt, IntegrationError> {
        self.publisher.publish(post).await
    }

    pub async fn mark_published(
        &self,
        mut post: SocialPost,
        receipt: PublishReceipt,
    ) -> Result<SocialPost, SocialServiceError> {
        post.status = SocialPostStatus::Published;
        post.published_at = Some(Utc::now());
        post.external_post_id = Some(receipt.external_id.clone());
        post.last_error = None;
        post.next_attempt_at = None;

        let updated = self
            .repo
            .update(&post)
            .await
            .context("Failed to mark social post published")?;
        tracing::info!(id = updated.id, platform = %updated.platform, external_id = %receipt.external_id, "Social post published");

        self.events.dispatch(AutomationEvent::new(
            TriggerType::SocialPostPublished,
            json!({
                "id": updated.id,
                "platform": updated.platform,
                "content": updated.content,
                "external_id": receipt.external_id,
                "url": receipt.url,
                "blog_post_id": updated.blog_post_id,
            }),
        ));
        Ok(updated)
    }

    pub async fn mark_failed(
        &self,
        mut post: SocialPost,
        error: String,
    ) -> Result<SocialPost, SocialServiceError> {
        post.status = SocialPostStatus::Failed;
        post.last_error = Some(error);
        post.next_attempt_at = None;

        let updated = self
            .repo
            .update(&post)
            .await
            .context("Failed to mark social post failed")?;
        tracing::warn!(id = updated.id, platform = %updated.platform, "Social post failed");

        self.events.dispatch(AutomationEvent::new(
            TriggerType::SocialPostFailed,
            json!({
                "id": updated.id,
                "platform": updated.platform,
                "content": updated.content,
                "error": updated.last_error,
                "retry_count": updated.retry_count,
                "blog_post_id": updated.blog_post_id,
            }),
        ));
        Ok(updated)
    }

    /// Keep a failed post scheduled until `next_attempt_at`
    pub async fn requeue(
        &self,
        mut post: SocialPost,
        error: String,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<SocialPost, SocialServiceError> {
        post.status = SocialPostStatus::Scheduled;
        post.last_error = Some(error);
        post.next_attempt_at = Some(next_attempt_at);
        Ok(self
            .repo
            .update(&post)
            .await
            .context("Failed to requeue social post")?)
    }

    pub async fn list_due(&self, limit: i64) -> Result<Vec<SocialPost>, SocialServiceError> {
        Ok(self
            .repo
            .list_due(Utc::now(), limit)
            .await
            .context("Failed to list due social posts")?)
    }

    /// One draft per platform announcing a blog post
    pub async fn create_from_blog_post(
        &self,
        blog_post_id: i64,
        platforms: &[SocialPlatform],
    ) -> Result<Vec<SocialPost>, SocialServiceError> {
        let blog = self
            .blog_repo
            .get_by_id(blog_post_id)
            .await
            .context("Failed to get blog post")?
            .ok_or_else(|| SocialServiceError::NotFound(format!("blog post {}", blog_post_id)))?;

        let platforms = if platforms.is_empty() {
            &SocialPlatform::ALL[..]
        } else {
            platforms
        };
        let url = format!("{}/blog/{}", self.base_url, blog.slug);
        let summary = blog.excerpt.as_deref().unwrap_or_default();

        let mut created = Vec::with_capacity(platforms.len());
        for &platform in platforms {
            let mut post = SocialPost::new(platform, teaser(&blog.title, summary, &url, platform));
            post.blog_post_id = Some(blog.id);
            if let Some(cover) = &blog.cover_image {
                post.media_urls = vec![cover.clone()];
            }
            created.push(
                self.repo
                    .create(&post)
                    .await
                    .context("Failed to create social post")?,
            );
        }
        Ok(created)
    }

    pub async fn list_for_blog_post(&self, blog_post_id: i64) -> Result<Vec<SocialPost>, SocialServiceError> {
        Ok(self
            .repo
            .list_by_blog_post(blog_post_id)
            .await
            .context("Failed to list social posts for blog post")?)
    }

    // ------------------------------------------------------------------
    // LinkedIn OAuth
    // ------------------------------------------------------------------

    fn linkedin(&self) -> Result<&LinkedInClient, SocialServiceError> {
        self.linkedin
            .as_deref()
            .ok_or(SocialServiceError::External(IntegrationError::NotConfigured(
                "LinkedIn OAuth",
            )))
    }

    /// Consent URL; the random `state` is remembered for the callback
    pub async fn linkedin_auth_url(&self) -> Result<String, SocialServiceError> {
        let client = self.linkedin()?;
        let state = random_hex(16)?;
        let url = client.authorization_url(&state)?;
        self.settings
            .set(LINKEDIN_OAUTH_STATE, &state)
            .await
            .context("Failed to store OAuth state")?;
        Ok(url)
    }

    /// Finish the OAuth flow and store the token for direct posting
    pub async fn linkedin_callback(
        &self,
        code: &str,
        state: &str,
    ) -> Result<LinkedInStatus, SocialServiceError> {
        let client = self.linkedin()?;
        let expected = self
            .settings
            .get(LINKEDIN_OAUTH_STATE)
            .await
            .context("Failed to read OAuth state")?;
        if expected.as_deref() != Some(state) || state.is_empty() {
            return Err(SocialServiceError::ValidationError(
                "OAuth state mismatch".to_string(),
            ));
        }

        let token = client.exchange_code(code).await?;
        let urn = client.member_urn(&token.access_token).await?;
        let expires_at = (Utc::now() + Duration::seconds(token.expires_in.max(0))).to_rfc3339();

        self.settings
            .set(LINKEDIN_ACCESS_TOKEN, &token.access_token)
            .await
            .context("Failed to store LinkedIn token")?;
        self.settings
            .set(LINKEDIN_MEMBER_URN, &urn)
            .await
            .context("Failed to store LinkedIn URN")?;
        self.settings
            .set(LINKEDIN_TOKEN_EXPIRES_AT, &expires_at)
            .await
            .context("Failed to store LinkedIn expiry")?;
        self.settings
            .delete(LINKEDIN_OAUTH_STATE)
            .await
            .context("Failed to clear OAuth state")?;

        tracing::info!(member = %urn, "LinkedIn account connected");
        self.linkedin_status().await
    }

    pub async fn linkedin_status(&self) -> Result<LinkedInStatus, SocialServiceError> {
        let token = self.settings.get(LINKEDIN_ACCESS_TOKEN).await.context("Failed to read settings")?;
        Ok(LinkedInStatus {
            connected: token.is_some_and(|t| !t.is_empty()),
            member_urn: self.settings.get(LINKEDIN_MEMBER_URN).await.context("Failed to read settings")?,
            expires_at: self
                .settings
                .get(LINKEDIN_TOKEN_EXPIRES_AT)
                .await
                .context("Failed to read settings")?,
        })
    }
}

fn validate_content(platform: SocialPlatform, content: &str) -> Result<(), SocialServiceError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(SocialServiceError::ValidationError(
            "Content cannot be empty".to_string(),
        ));
    }
    let length = trimmed.chars().count();
    if length > platform.char_limit() {
        return Err(SocialServiceError::ValidationError(format!(
            "Content is {} characters; {} allows {}",
            length,
            platform,
            platform.char_limit()
        )));
    }
    Ok(())
}

fn ensure_future(at: DateTime<Utc>) -> Result<(), SocialServiceError> {
    if at <= Utc::now() {
        return Err(SocialServiceError::ValidationError(
            "Scheduled time must be in the future".to_string(),
        ));
    }
    Ok(())
}

/// Announcement text for a blog post that fits the platform limit with
/// the URL intact
pub fn teaser(title: &str, summary: &str, url: &str, platform: SocialPlatform) -> String {
    let limit = platform.char_limit();
    let reserved = url.chars().count() + 2;
    let body = if summary.is_empty() {
        title.to_string()
    } else {
        format!("{}\n\n{}", title, summary)
    };
    let room = limit.saturating_sub(reserved);
    format!("{}\n\n{}", truncate_words(&body, room), url)
}
