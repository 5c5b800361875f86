//! FAQ, page and content section endpoints
//!
//! Public:
//! - GET /api/faqs?category=
//! - GET /api/pages/{slug}
//! - GET /api/content/{page_slug}
//!
//! Admin: CRUD under /api/admin/faqs, /api/admin/pages, /api/admin/content-sections

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState};
use crate::api::responses::ApiResponse;
use crate::models::{
    CreateContentSectionInput, CreateFaqInput, CreatePageInput, PageStatus,
    UpdateContentSectionInput, UpdateFaqInput, UpdatePageInput,
};

#[derive(Debug, Default, Deserialize)]
pub struct FaqQuery {
    pub category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub status: Option<PageStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SectionQuery {
    pub page_slug: Option<String>,
}

pub fn faq_public_router() -> Router<AppState> {
    Router::new().route("/", get(list_published_faqs))
}

pub fn page_public_router() -> Router<AppState> {
    Router::new().route("/{slug}", get(get_published_page))
}

pub fn section_public_router() -> Router<AppState> {
    Router::new().route("/{page_slug}", get(list_sections_for_page))
}

pub fn faq_admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_faqs).post(create_faq))
        .route("/{id}", get(get_faq).put(update_faq).delete(delete_faq))
}

pub fn page_admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_pages).post(create_page))
        .route("/{id}", get(get_page).put(update_page).delete(delete_page))
}

pub fn section_admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sections).post(create_section))
        .route(
            "/{id}",
            get(get_section).put(update_section).delete(delete_section),
        )
}

// ============================================================================
// FAQs
// ============================================================================

async fn list_published_faqs(
    State(state): State<AppState>,
    Query(query): Query<FaqQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(
        state
            .faq_service
            .list_published(query.category.as_deref())
            .await?,
    ))
}

async fn list_faqs(
    State(state): State<AppState>,
    Query(query): Query<FaqQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(
        state.faq_service.list(query.category.as_deref()).await?,
    ))
}

async fn create_faq(
    State(state): State<AppState>,
    Json(input): Json<CreateFaqInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::created(state.faq_service.create(input).await?))
}

async fn get_faq(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.faq_service.get_by_id(id).await?))
}

async fn update_faq(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<UpdateFaqInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.faq_service.update(id, input).await?))
}

async fn delete_faq(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.faq_service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Pages
// ============================================================================

async fn get_published_page(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(
        state.page_service.get_published_by_slug(&slug).await?,
    ))
}

async fn list_pages(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.page_service.list(query.status).await?))
}

async fn create_page(
    State(state): State<AppState>,
    Json(input): Json<CreatePageInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::created(state.page_service.create(input).await?))
}

async fn get_page(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.page_service.get_by_id(id).await?))
}

async fn update_page(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<UpdatePageInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.page_service.update(id, input).await?))
}

async fn delete_page(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.page_service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Content sections
// ============================================================================

async fn list_sections_for_page(
    State(state): State<AppState>,
    Path(page_slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(
        state.section_service.list_for_page(&page_slug).await?,
    ))
}

async fn list_sections(
    State(state): State<AppState>,
    Query(query): Query<SectionQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(
        state
            .section_service
            .list(query.page_slug.as_deref())
            .await?,
    ))
}

async fn create_section(
    State(state): State<AppState>,
    Json(input): Json<CreateContentSectionInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::created(
        state.section_service.create(input).await?,
    ))
}

async fn get_section(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.section_service.get_by_id(id).await?))
}

async fn update_section(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<UpdateContentSectionInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(
        state.section_service.update(id, input).await?,
    ))
}

async fn delete_section(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.section_service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
