//! Shared API response types
//!
//! Every successful JSON response is wrapped as `{"success": true, "data": ...}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::models::ListParams;

/// Success envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip)]
    status: StatusCode,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            status: StatusCode::OK,
        }
    }

    pub fn created(data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            ..Self::ok(data)
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

/// Body for endpoints that only confirm an action
#[derive(Debug, Serialize)]
pub struct Message {
    pub message: String,
}

impl Message {
    pub fn new(message: impl Into<String>) -> ApiResponse<Self> {
        ApiResponse::ok(Self {
            message: message.into(),
        })
    }
}

/// `?page=&page_size=` query parameters
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    #[serde(alias = "per_page")]
    pub page_size: Option<u32>,
}

impl PageQuery {
    pub fn params(&self) -> ListParams {
        ListParams::from_query(self.page, self.page_size)
    }
}

/// Body for schedule endpoints
#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub scheduled_at: chrono::DateTime<chrono::Utc>,
}
