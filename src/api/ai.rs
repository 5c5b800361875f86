//! AI content endpoints (admin only)
//!
//! - POST /api/admin/ai/blog-draft
//! - POST /api/admin/ai/social-copy

use axum::{extract::State, response::IntoResponse, routing::post, Json, Router};

use crate::api::middleware::{ApiError, AppState};
use crate::api::responses::ApiResponse;
use crate::services::ai::{BlogDraftRequest, SocialCopyRequest};

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/blog-draft", post(blog_draft))
        .route("/social-copy", post(social_copy))
}

async fn blog_draft(
    State(state): State<AppState>,
    Json(request): Json<BlogDraftRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(
        state.ai_service.generate_blog_draft(request).await?,
    ))
}

async fn social_copy(
    State(state): State<AppState>,
    Json(request): Json<SocialCopyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(
        state.ai_service.generate_social_copy(request).await?,
    ))
}
