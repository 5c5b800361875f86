//! Newsletter API endpoints
//!
//! Public:
//! - POST /api/newsletter/subscribe
//! - POST /api/newsletter/unsubscribe
//!
//! Admin (/api/admin/newsletter):
//! - GET /subscribers, GET /subscribers/counts, DELETE /subscribers/{id}
//! - POST /subscribers/sync - Push unsynced subscribers to the ESP
//! - CRUD /campaigns, POST /campaigns/{id}/send|schedule
//! - POST /campaigns/{id}/analytics - Refresh engagement numbers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, AppState};
use crate::api::responses::{ApiResponse, Message, ScheduleRequest};
use crate::models::{
    CampaignStatus, CreateCampaignInput, ListParams, SubscribeInput, Subscriber, SubscriberStatus,
    UpdateCampaignInput,
};
use crate::services::newsletter::SubscribeOutcome;

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
struct SubscribeResponse {
    subscriber: Subscriber,
    outcome: SubscribeOutcome,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubscriberQuery {
    pub page: Option<u32>,
    #[serde(alias = "per_page")]
    pub page_size: Option<u32>,
    pub status: Option<SubscriberStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CampaignQuery {
    pub page: Option<u32>,
    #[serde(alias = "per_page")]
    pub page_size: Option<u32>,
    pub status: Option<CampaignStatus>,
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/subscribe", post(subscribe))
        .route("/unsubscribe", post(unsubscribe))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/subscribers", get(list_subscribers))
        .route("/subscribers/counts", get(subscriber_counts))
        .route("/subscribers/sync", post(sync_subscribers))
        .route("/subscribers/{id}", delete(delete_subscriber))
        .route("/campaigns", get(list_campaigns).post(create_campaign))
        .route(
            "/campaigns/{id}",
            get(get_campaign).put(update_campaign).delete(delete_campaign),
        )
        .route("/campaigns/{id}/send", post(send_campaign))
        .route("/campaigns/{id}/schedule", post(schedule_campaign))
        .route("/campaigns/{id}/analytics", post(refresh_analytics))
}

/// POST /api/newsletter/subscribe
async fn subscribe(
    State(state): State<AppState>,
    Json(input): Json<SubscribeInput>,
) -> Result<impl IntoResponse, ApiError> {
    let (subscriber, outcome) = state.newsletter_service.subscribe(input).await?;
    let body = SubscribeResponse {
        subscriber,
        outcome,
    };
    Ok(match outcome {
        SubscribeOutcome::Created => ApiResponse::created(body),
        _ => ApiResponse::ok(body),
    })
}

/// POST /api/newsletter/unsubscribe
async fn unsubscribe(
    State(state): State<AppState>,
    Json(body): Json<UnsubscribeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.newsletter_service.unsubscribe(&body.token).await?;
    Ok(Message::new("You have been unsubscribed"))
}

async fn list_subscribers(
    State(state): State<AppState>,
    Query(query): Query<SubscriberQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let subscribers = state
        .newsletter_service
        .list_subscribers(ListParams::from_query(query.page, query.page_size), query.status)
        .await?;
    Ok(ApiResponse::ok(subscribers))
}

async fn subscriber_counts(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.newsletter_service.counts().await?))
}

async fn sync_subscribers(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.newsletter_service.sync_pending().await?))
}

async fn delete_subscriber(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.newsletter_service.delete_subscriber(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_campaigns(
    State(state): State<AppState>,
    Query(query): Query<CampaignQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let campaigns = state
        .newsletter_service
        .list_campaigns(ListParams::from_query(query.page, query.page_size), query.status)
        .await?;
    Ok(ApiResponse::ok(campaigns))
}

async fn create_campaign(
    State(state): State<AppState>,
    Json(input): Json<CreateCampaignInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::created(
        state.newsletter_service.create_campaign(input).await?,
    ))
}

async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.newsletter_service.get_campaign(id).await?))
}

async fn update_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<UpdateCampaignInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(
        state.newsletter_service.update_campaign(id, input).await?,
    ))
}

async fn delete_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.newsletter_service.delete_campaign(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn send_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.newsletter_service.send_now(id).await?))
}

async fn schedule_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ScheduleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(
        state
            .newsletter_service
            .schedule_campaign(id, body.scheduled_at)
            .await?,
    ))
}

async fn refresh_analytics(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(
        state.newsletter_service.refresh_analytics(id).await?,
    ))
}
