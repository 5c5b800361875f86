//! Authentication API endpoints
//!
//! - POST /api/auth/login - Admin login, sets the `session` cookie
//! - POST /api/admin/auth/logout - End the current session
//! - GET /api/admin/auth/me - Current user

use axum::{
    extract::State,
    http::{header, HeaderValue},
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Serialize;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser, SessionToken};
use crate::api::responses::{ApiResponse, Message};
use crate::models::{User, SESSION_TTL_DAYS};
use crate::services::auth::LoginInput;

/// Response for successful authentication
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
    pub expires_at: String,
}

/// Routes reachable without a session
pub fn public_router() -> Router<AppState> {
    Router::new().route("/login", post(login))
}

/// Routes mounted under the authenticated admin tree
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/me", get(me))
}

fn session_cookie(token: &str, max_age_secs: i64) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(&format!(
        "session={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        token, max_age_secs
    ))
    .map_err(ApiError::internal_error)
}

/// POST /api/auth/login
async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginInput>,
) -> Result<impl IntoResponse, ApiError> {
    let (session, user) = state.auth_service.login(input).await?;

    let cookie = session_cookie(&session.id, SESSION_TTL_DAYS * 24 * 3600)?;
    let body = ApiResponse::ok(AuthResponse {
        user,
        token: session.id,
        expires_at: session.expires_at.to_rfc3339(),
    });
    Ok(([(header::SET_COOKIE, cookie)], body))
}

/// POST /api/admin/auth/logout
async fn logout(
    State(state): State<AppState>,
    Extension(SessionToken(token)): Extension<SessionToken>,
) -> Result<impl IntoResponse, ApiError> {
    state.auth_service.logout(&token).await?;
    let cookie = session_cookie("", 0)?;
    Ok(([(header::SET_COOKIE, cookie)], Message::new("Logged out")))
}

/// GET /api/admin/auth/me
async fn me(Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>) -> ApiResponse<User> {
    ApiResponse::ok(user)
}
