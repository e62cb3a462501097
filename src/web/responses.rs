//! HTTP response types and utilities
//!
//! Every endpoint answers with the `ApiResponse` envelope.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::errors::SchedulerError;

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the operation was successful
    pub success: bool,
    /// Response data (present on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error message (present on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiResponse<T>
where
    T: Serialize,
{
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn error(message: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now(),
        }
    }
}

impl<T> IntoResponse for ApiResponse<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        let status = if self.success {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        (status, Json(self)).into_response()
    }
}

/// Helper function to convert a scheduler result to an HTTP response
pub fn handle_result<T>(result: Result<T, SchedulerError>) -> Response
where
    T: Serialize,
{
    match result {
        Ok(data) => ok(data).into_response(),
        Err(error) => handle_error(error).into_response(),
    }
}

/// Map a scheduler error to a status code and envelope
pub fn handle_error(error: SchedulerError) -> impl IntoResponse {
    let (status, message) = match &error {
        SchedulerError::ScheduleNotFound { .. } => (StatusCode::NOT_FOUND, error.to_string()),
        SchedulerError::UnknownJobType(_) => (StatusCode::BAD_REQUEST, error.to_string()),
        SchedulerError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
        SchedulerError::Database(_) | SchedulerError::Repository(_) => {
            tracing::error!("Data access failed: {}", error);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Data access failed".to_string(),
            )
        }
        SchedulerError::Serialization(_) | SchedulerError::Internal(_) => {
            tracing::error!("Request failed: {:#}", error);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal error: {}", error),
            )
        }
    };

    (status, Json(ApiResponse::<()>::error(message)))
}

pub fn ok<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

pub fn bad_request(message: &str) -> impl IntoResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()>::error(message.to_string())),
    )
}

/// Service health payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub mode: String,
    pub scheduler_enabled: bool,
    pub uptime_seconds: i64,
}
