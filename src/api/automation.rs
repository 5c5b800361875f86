//! Automation API endpoints (admin only)
//!
//! - CRUD under /api/admin/automation/rules
//! - POST /api/admin/automation/rules/{id}/toggle
//! - POST /api/admin/automation/trigger - Run rules for an event now
//! - GET /api/admin/automation/logs?rule_id=

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;

use crate::api::middleware::{ApiError, AppState};
use crate::api::responses::ApiResponse;
use crate::models::{AutomationEvent, CreateRuleInput, ListParams, TriggerType, UpdateRuleInput};

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    #[serde(default = "default_trigger")]
    pub trigger: TriggerType,
    #[serde(default)]
    pub payload: Value,
}

fn default_trigger() -> TriggerType {
    TriggerType::Manual
}

#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    pub page: Option<u32>,
    #[serde(alias = "per_page")]
    pub page_size: Option<u32>,
    pub rule_id: Option<i64>,
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/rules", get(list_rules).post(create_rule))
        .route("/rules/{id}", get(get_rule).put(update_rule).delete(delete_rule))
        .route("/rules/{id}/toggle", post(toggle_rule))
        .route("/trigger", post(trigger))
        .route("/logs", get(list_logs))
}

async fn list_rules(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.automation.list_rules().await?))
}

async fn create_rule(
    State(state): State<AppState>,
    Json(input): Json<CreateRuleInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::created(state.automation.create_rule(input).await?))
}

async fn get_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.automation.get_rule(id).await?))
}

async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<UpdateRuleInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.automation.update_rule(id, input).await?))
}

async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.automation.delete_rule(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.automation.toggle_rule(id).await?))
}

/// POST /api/admin/automation/trigger
///
/// Runs inline, unlike service events, so the caller sees the report.
async fn trigger(
    State(state): State<AppState>,
    Json(body): Json<TriggerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let event = AutomationEvent::new(body.trigger, body.payload);
    let report = state.automation.run(&event).await?;
    tracing::info!(trigger = %event.trigger, matched = report.matched, "Manual automation trigger");
    Ok(ApiResponse::ok(report))
}

async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(
        state
            .automation
            .list_logs(ListParams::from_query(query.page, query.page_size), query.rule_id)
            .await?,
    ))
}
