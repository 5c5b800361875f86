//! Blog API endpoints
//!
//! Public:
//! - GET /api/blog - Published posts (page, page_size, category)
//! - GET /api/blog/{slug} - Published post by slug
//!
//! Admin:
//! - CRUD under /api/admin/blog
//! - POST /api/admin/blog/{id}/publish|schedule|unpublish
//! - POST /api/admin/blog/import/sanity

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState};
use crate::api::responses::{ApiResponse, ScheduleRequest};
use crate::models::{BlogPostStatus, CreateBlogPostInput, ListParams, UpdateBlogPostInput};

#[derive(Debug, Default, Deserialize)]
pub struct PublicListQuery {
    pub page: Option<u32>,
    #[serde(alias = "per_page")]
    pub page_size: Option<u32>,
    pub category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AdminListQuery {
    pub page: Option<u32>,
    #[serde(alias = "per_page")]
    pub page_size: Option<u32>,
    pub status: Option<BlogPostStatus>,
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_published))
        .route("/{slug}", get(get_published))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_posts).post(create_post))
        .route("/import/sanity", post(import_sanity))
        .route("/{id}", get(get_post).put(update_post).delete(delete_post))
        .route("/{id}/publish", post(publish_post))
        .route("/{id}/schedule", post(schedule_post))
        .route("/{id}/unpublish", post(unpublish_post))
}

/// GET /api/blog
async fn list_published(
    State(state): State<AppState>,
    Query(query): Query<PublicListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let posts = state
        .blog_service
        .list_published(
            ListParams::from_query(query.page, query.page_size),
            query.category.as_deref(),
        )
        .await?;
    Ok(ApiResponse::ok(posts))
}

/// GET /api/blog/{slug}
async fn get_published(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(
        state.blog_service.get_published_by_slug(&slug).await?,
    ))
}

async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<AdminListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let posts = state
        .blog_service
        .list(ListParams::from_query(query.page, query.page_size), query.status)
        .await?;
    Ok(ApiResponse::ok(posts))
}

async fn create_post(
    State(state): State<AppState>,
    Json(input): Json<CreateBlogPostInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::created(state.blog_service.create(input).await?))
}

async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.blog_service.get_by_id(id).await?))
}

async fn update_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<UpdateBlogPostInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.blog_service.update(id, input).await?))
}

async fn delete_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.blog_service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn publish_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.blog_service.publish(id).await?))
}

async fn schedule_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ScheduleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(
        state.blog_service.schedule(id, body.scheduled_at).await?,
    ))
}

async fn unpublish_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.blog_service.unpublish(id).await?))
}

/// POST /api/admin/blog/import/sanity
async fn import_sanity(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let report = state.blog_service.import_from_sanity(&state.sanity).await?;
    tracing::info!(
        created = report.created,
        updated = report.updated,
        skipped = report.skipped.len(),
        "Sanity import finished"
    );
    Ok(ApiResponse::ok(report))
}
