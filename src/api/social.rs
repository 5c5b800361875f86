//! Social post API endpoints (admin only)
//!
//! - CRUD under /api/admin/social
//! - POST /api/admin/social/{id}/publish - Publish now
//! - POST /api/admin/social/{id}/schedule - Queue for the scheduler
//! - POST /api/admin/social/from-blog/{id} - Teasers for a blog post
//! - GET /api/admin/social/linkedin/auth-url, /callback, /status

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, AppState};
use crate::api::responses::{ApiResponse, ScheduleRequest};
use crate::db::repositories::SocialPostFilter;
use crate::models::{
    CreateSocialPostInput, ListParams, SocialPlatform, SocialPostStatus, UpdateSocialPostInput,
};

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    #[serde(alias = "per_page")]
    pub page_size: Option<u32>,
    pub status: Option<SocialPostStatus>,
    pub platform: Option<SocialPlatform>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FromBlogRequest {
    /// Empty means every platform
    #[serde(default)]
    pub platforms: Vec<SocialPlatform>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
}

#[derive(Debug, Serialize)]
struct AuthUrlResponse {
    url: String,
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_posts).post(create_post))
        .route("/from-blog/{id}", post(create_from_blog).get(list_for_blog))
        .route("/linkedin/auth-url", get(linkedin_auth_url))
        .route("/linkedin/callback", get(linkedin_callback))
        .route("/linkedin/status", get(linkedin_status))
        .route("/{id}", get(get_post).put(update_post).delete(delete_post))
        .route("/{id}/publish", post(publish_post))
        .route("/{id}/schedule", post(schedule_post))
}

async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = SocialPostFilter {
        status: query.status,
        platform: query.platform,
    };
    let posts = state
        .social_service
        .list(ListParams::from_query(query.page, query.page_size), filter)
        .await?;
    Ok(ApiResponse::ok(posts))
}

async fn create_post(
    State(state): State<AppState>,
    Json(input): Json<CreateSocialPostInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::created(state.social_service.create(input).await?))
}

async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.social_service.get_by_id(id).await?))
}

async fn update_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<UpdateSocialPostInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.social_service.update(id, input).await?))
}

async fn delete_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.social_service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn publish_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.social_service.publish_now(id).await?))
}

async fn schedule_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ScheduleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(
        state.social_service.schedule(id, body.scheduled_at).await?,
    ))
}

/// POST /api/admin/social/from-blog/{id}
async fn create_from_blog(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<FromBlogRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let platforms = body.map(|Json(b)| b.platforms).unwrap_or_default();
    let posts = state
        .social_service
        .create_from_blog_post(id, &platforms)
        .await?;
    Ok(ApiResponse::created(posts))
}

async fn list_for_blog(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(
        state.social_service.list_for_blog_post(id).await?,
    ))
}

async fn linkedin_auth_url(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let url = state.social_service.linkedin_auth_url().await?;
    Ok(ApiResponse::ok(AuthUrlResponse { url }))
}

async fn linkedin_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(
        state
            .social_service
            .linkedin_callback(&query.code, &query.state)
            .await?,
    ))
}

async fn linkedin_status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.social_service.linkedin_status().await?))
}
