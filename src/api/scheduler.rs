//! Scheduler control endpoints
//!
//! - POST /api/cron/scheduler - External trigger, `Authorization: Bearer <cron_secret>`
//! - GET /api/admin/scheduler/status
//! - POST /api/admin/scheduler/start|stop|process

use axum::{
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Serialize;

use crate::api::middleware::{ApiError, AppState};
use crate::api::responses::ApiResponse;
use crate::services::scheduler::{SchedulerStatus, TickReport};

#[derive(Debug, Serialize)]
struct ToggleResponse {
    running: bool,
    changed: bool,
}

pub fn cron_router() -> Router<AppState> {
    Router::new().route("/scheduler", post(cron_tick))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/process", post(process))
}

/// POST /api/cron/scheduler
///
/// Disabled (404) unless `scheduler.cron_secret` is configured.
async fn cron_tick(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let secret = state
        .config
        .scheduler
        .cron_secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::not_found("Cron trigger is disabled"))?;

    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    if presented != Some(secret) {
        return Err(ApiError::unauthorized("Invalid cron secret"));
    }

    Ok(ApiResponse::ok(run_tick(&state).await?))
}

/// Run a tick on its own task so a dropped request cannot cut it short
async fn run_tick(state: &AppState) -> Result<TickReport, ApiError> {
    let scheduler = state.scheduler.clone();
    tokio::spawn(async move { scheduler.process_due().await })
        .await
        .map_err(|e| ApiError::internal_error(format!("Scheduler tick failed: {}", e)))
}

async fn status(State(state): State<AppState>) -> ApiResponse<SchedulerStatus> {
    ApiResponse::ok(state.scheduler.status())
}

async fn start(State(state): State<AppState>) -> impl IntoResponse {
    let changed = state.scheduler.start();
    ApiResponse::ok(ToggleResponse {
        running: state.scheduler.is_running(),
        changed,
    })
}

async fn stop(State(state): State<AppState>) -> impl IntoResponse {
    let changed = state.scheduler.stop();
    ApiResponse::ok(ToggleResponse {
        running: state.scheduler.is_running(),
        changed,
    })
}

/// Run one tick now, whether or not the timer is running
async fn process(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(run_tick(&state).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::repositories::test_support::migrated_pool;
    use crate::db::repositories::{BlogPostRepository, SqlxBlogPostRepository};
    use crate::models::{BlogPost, BlogPostStatus};
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_dropped_request_does_not_cancel_tick() {
        let pool = migrated_pool().await;
        let state = AppState::new(Config::default(), pool.clone()).unwrap();
        let repo = SqlxBlogPostRepository::new(pool);
        let mut post = BlogPost::new("Queued".into(), "queued".into(), "Body".into(), String::new());
        post.status = BlogPostStatus::Scheduled;
        post.published_at = Some(Utc::now() - Duration::minutes(5));
        let post = repo.create(&post).await.unwrap();

        // The handler future is dropped as soon as it has started
        let request = tokio::spawn({
            let state = state.clone();
            async move { run_tick(&state).await }
        });
        tokio::task::yield_now().await;
        request.abort();

        for _ in 0..200 {
            if state.scheduler.status().totals.ticks > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(state.scheduler.status().totals.ticks, 1);
        let stored = repo.get_by_id(post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BlogPostStatus::Published);
    }
}
