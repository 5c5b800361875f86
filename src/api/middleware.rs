//! API middleware and shared state
//!
//! Contains:
//! - `AppState`, built once at startup and cloned into every handler
//! - `ApiError`, the JSON error envelope every handler returns
//! - Authentication (session token via Bearer header or `session` cookie)
//! - Per-IP request rate limiting

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use crate::cache::{create_cache, SharedCache};
use crate::config::Config;
use crate::db::repositories::{
    SqlxAutomationRepository, SqlxBlogPostRepository, SqlxCampaignRepository,
    SqlxContentSectionRepository, SqlxFaqRepository, SqlxPageRepository, SqlxSessionRepository,
    SqlxSettingsRepository, SqlxSocialPostRepository, SqlxSubscriberRepository, SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::integrations::{
    AyrshareClient, BrevoClient, IntegrationError, LinkedInClient, Mailer, OpenAiClient,
    SanityClient,
};
use crate::models::User;
use crate::services::ai::{AiService, AiServiceError};
use crate::services::auth::{AuthService, AuthServiceError};
use crate::services::automation::{AutomationEngine, AutomationError};
use crate::services::blog::{BlogService, BlogServiceError};
use crate::services::content::{
    ContentSectionService, ContentServiceError, FaqService, PageService,
};
use crate::services::markdown::MarkdownRenderer;
use crate::services::newsletter::{NewsletterService, NewsletterServiceError};
use crate::services::rate_limiter::{RateDecision, RequestRateLimiter};
use crate::services::scheduler::Scheduler;
use crate::services::social::{PublisherRouter, SocialService, SocialServiceError};
use crate::theme::ThemeEngine;

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub config: Arc<Config>,
    pub cache: SharedCache,
    pub auth_service: Arc<AuthService>,
    pub blog_service: Arc<BlogService>,
    pub social_service: Arc<SocialService>,
    pub newsletter_service: Arc<NewsletterService>,
    pub faq_service: Arc<FaqService>,
    pub page_service: Arc<PageService>,
    pub section_service: Arc<ContentSectionService>,
    pub automation: AutomationEngine,
    pub scheduler: Scheduler,
    pub ai_service: Arc<AiService>,
    pub sanity: Arc<SanityClient>,
    pub rate_limiter: Arc<RequestRateLimiter>,
    pub theme: Arc<ThemeEngine>,
}

impl AppState {
    /// Wire repositories, integration clients and services together.
    ///
    /// Clients with missing credentials are still built; they fail with
    /// `NotConfigured` when used.
    pub fn new(config: Config, pool: DynDatabasePool) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let cache = create_cache(&config.cache);
        let renderer = MarkdownRenderer::new();

        let settings_repo = SqlxSettingsRepository::boxed(pool.clone());
        let blog_repo = SqlxBlogPostRepository::boxed(pool.clone());
        let social_repo = SqlxSocialPostRepository::boxed(pool.clone());
        let campaign_repo = SqlxCampaignRepository::boxed(pool.clone());

        let mailer = Arc::new(Mailer::new(&config.smtp)?);
        let linkedin = LinkedInClient::new(&config.linkedin)?;
        let linkedin = linkedin.is_configured().then(|| Arc::new(linkedin));
        let ayrshare = Arc::new(AyrshareClient::new(&config.ayrshare)?);
        let brevo = Arc::new(BrevoClient::new(&config.brevo)?);

        let automation = AutomationEngine::new(
            SqlxAutomationRepository::boxed(pool.clone()),
            social_repo.clone(),
            mailer.clone(),
        );
        let events = Arc::new(automation.clone());

        let auth_service = Arc::new(AuthService::new(
            SqlxUserRepository::boxed(pool.clone()),
            SqlxSessionRepository::boxed(pool.clone()),
        ));
        let blog_service = Arc::new(BlogService::new(
            blog_repo.clone(),
            cache.clone(),
            renderer.clone(),
            events.clone(),
            &config.site.base_url,
        ));
        let social_service = Arc::new(SocialService::new(
            social_repo,
            blog_repo,
            settings_repo.clone(),
            Arc::new(PublisherRouter::new(
                ayrshare,
                linkedin.clone(),
                settings_repo,
            )),
            linkedin,
            events.clone(),
            &config.site.base_url,
        ));
        let newsletter_service = Arc::new(NewsletterService::new(
            SqlxSubscriberRepository::boxed(pool.clone()),
            campaign_repo,
            brevo,
            mailer,
            events,
            renderer.clone(),
            config.site.clone(),
        ));
        let scheduler = Scheduler::new(
            &config.scheduler,
            blog_service.clone(),
            social_service.clone(),
            newsletter_service.clone(),
        );

        Ok(Self {
            faq_service: Arc::new(FaqService::new(
                SqlxFaqRepository::boxed(pool.clone()),
                cache.clone(),
            )),
            page_service: Arc::new(PageService::new(
                SqlxPageRepository::boxed(pool.clone()),
                cache.clone(),
                renderer,
            )),
            section_service: Arc::new(ContentSectionService::new(
                SqlxContentSectionRepository::boxed(pool.clone()),
                cache.clone(),
            )),
            ai_service: Arc::new(AiService::new(OpenAiClient::new(&config.openai)?)),
            sanity: Arc::new(SanityClient::new(&config.sanity)?),
            rate_limiter: Arc::new(RequestRateLimiter::from_config(&config.rate_limit)),
            theme: Arc::new(ThemeEngine::new(
                config.site.clone(),
                config.theme.override_path.as_deref(),
            )?),
            pool,
            cache,
            auth_service,
            blog_service,
            social_service,
            newsletter_service,
            automation,
            scheduler,
            config,
        })
    }
}

/// Authenticated user extracted from request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

/// Session token of the current request, stored next to the user
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

/// Error response for API errors.
///
/// Serialized as `{"success": false, "error": "<CODE>", "message": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
    retry_after: Option<i64>,
}

impl ApiError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn rate_limited(retry_after_secs: i64) -> Self {
        Self {
            retry_after: Some(retry_after_secs),
            ..Self::new("RATE_LIMITED", "Too many requests, slow down")
        }
    }

    /// Logs the real cause; clients only see a generic message
    pub fn internal_error(cause: impl std::fmt::Display) -> Self {
        tracing::error!("Internal error: {}", cause);
        Self::new("INTERNAL_ERROR", "An internal error occurred")
    }

    pub fn status(&self) -> StatusCode {
        match self.code {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
            "EXTERNAL_SERVICE_ERROR" => StatusCode::BAD_GATEWAY,
            "NOT_CONFIGURED" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": self.code,
            "message": self.message,
        });
        let mut response = (self.status(), Json(body)).into_response();
        if let Some(secs) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<IntegrationError> for ApiError {
    fn from(e: IntegrationError) -> Self {
        match e {
            IntegrationError::NotConfigured(service) => {
                Self::new("NOT_CONFIGURED", format!("{} is not configured", service))
            }
            other => {
                tracing::warn!("External service error: {}", other);
                Self::new("EXTERNAL_SERVICE_ERROR", other.to_string())
            }
        }
    }
}

impl From<AuthServiceError> for ApiError {
    fn from(e: AuthServiceError) -> Self {
        match e {
            AuthServiceError::InvalidCredentials => Self::unauthorized(e.to_string()),
            AuthServiceError::TooManyAttempts => Self::new("RATE_LIMITED", e.to_string()),
            AuthServiceError::ValidationError(msg) => Self::validation_error(msg),
            AuthServiceError::UserExists(msg) => Self::conflict(msg),
            AuthServiceError::InternalError(e) => Self::internal_error(e),
        }
    }
}

impl From<BlogServiceError> for ApiError {
    fn from(e: BlogServiceError) -> Self {
        match e {
            BlogServiceError::NotFound(_) => Self::not_found(e.to_string()),
            BlogServiceError::ValidationError(msg) => Self::validation_error(msg),
            BlogServiceError::DuplicateSlug(_) => Self::conflict(e.to_string()),
            BlogServiceError::External(e) => e.into(),
            BlogServiceError::InternalError(e) => Self::internal_error(e),
        }
    }
}

impl From<SocialServiceError> for ApiError {
    fn from(e: SocialServiceError) -> Self {
        match e {
            SocialServiceError::NotFound(_) => Self::not_found(e.to_string()),
            SocialServiceError::ValidationError(msg) => Self::validation_error(msg),
            SocialServiceError::External(e) => e.into(),
            SocialServiceError::InternalError(e) => Self::internal_error(e),
        }
    }
}

impl From<NewsletterServiceError> for ApiError {
    fn from(e: NewsletterServiceError) -> Self {
        match e {
            NewsletterServiceError::NotFound(_) => Self::not_found(e.to_string()),
            NewsletterServiceError::ValidationError(msg) => Self::validation_error(msg),
            NewsletterServiceError::Conflict(msg) => Self::conflict(msg),
            NewsletterServiceError::External(e) => e.into(),
            NewsletterServiceError::InternalError(e) => Self::internal_error(e),
        }
    }
}

impl From<ContentServiceError> for ApiError {
    fn from(e: ContentServiceError) -> Self {
        match e {
            ContentServiceError::NotFound(_) => Self::not_found(e.to_string()),
            ContentServiceError::ValidationError(msg) => Self::validation_error(msg),
            ContentServiceError::DuplicateSlug(_) => Self::conflict(e.to_string()),
            ContentServiceError::InternalError(e) => Self::internal_error(e),
        }
    }
}

impl From<AutomationError> for ApiError {
    fn from(e: AutomationError) -> Self {
        match e {
            AutomationError::NotFound(_) => Self::not_found(e.to_string()),
            AutomationError::ValidationError(msg) => Self::validation_error(msg),
            AutomationError::InternalError(e) => Self::internal_error(e),
        }
    }
}

impl From<AiServiceError> for ApiError {
    fn from(e: AiServiceError) -> Self {
        match e {
            AiServiceError::ValidationError(msg) => Self::validation_error(msg),
            AiServiceError::External(e) => e.into(),
        }
    }
}

/// Extract session token from request
pub(crate) fn extract_session_token(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    if let Some(cookie_header) = headers.get(header::COOKIE) {
        if let Ok(cookie_str) = cookie_header.to_str() {
            for cookie in cookie_str.split(';') {
                let cookie = cookie.trim();
                if let Some(token) = cookie.strip_prefix("session=") {
                    return Some(token.to_string());
                }
            }
        }
    }

    None
}

/// Authentication middleware for `/api/admin/**`
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_session_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;

    let user = state
        .auth_service
        .validate_session(&token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    request.extensions_mut().insert(AuthenticatedUser(user));
    request.extensions_mut().insert(SessionToken(token));
    Ok(next.run(request).await)
}

/// Admin role check, layered inside `require_auth`
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if !user.0.is_admin() {
        return Err(ApiError::forbidden("Admin privileges required"));
    }

    Ok(next.run(request).await)
}

/// Best-effort client address: first `X-Forwarded-For` hop, then the
/// socket peer.
fn client_ip(request: &Request) -> IpAddr {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok());

    forwarded
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Per-IP rate limiting for the JSON API
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.config.rate_limit.enabled {
        return Ok(next.run(request).await);
    }

    let ip = client_ip(&request);
    match state.rate_limiter.check(ip).await {
        RateDecision::Allowed { .. } => Ok(next.run(request).await),
        RateDecision::Limited { retry_after_secs } => {
            tracing::debug!(%ip, "Request rate limited");
            Err(ApiError::rate_limited(retry_after_secs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    #[test]
    fn test_extract_token_prefers_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(header::COOKIE, HeaderValue::from_static("session=xyz"));
        assert_eq!(extract_session_token(&headers).as_deref(), Some("abc"));
    }

    #[test]
    fn test_extract_token_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session=xyz; other=1"),
        );
        assert_eq!(extract_session_token(&headers).as_deref(), Some("xyz"));
        assert!(extract_session_token(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(ApiError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::rate_limited(5).status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ApiError::from(IntegrationError::NotConfigured("Brevo")).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(IntegrationError::Unauthorized).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_internal_error_hides_cause() {
        let err = ApiError::from(BlogServiceError::InternalError(anyhow::anyhow!(
            "disk on fire"
        )));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("disk"));
    }
}
