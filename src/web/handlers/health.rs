//! Health check HTTP handler

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::warn;

use crate::web::{
    AppState,
    responses::{ApiResponse, HealthResponse},
};

/// Health check endpoint
///
/// Reports database connectivity and the roles this process performs.
/// Answers 503 when the database cannot be reached.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match state.database.connection().ping().await {
        Ok(()) => "connected",
        Err(e) => {
            warn!("Health check database ping failed: {}", e);
            "unreachable"
        }
    };
    let healthy = database == "connected";

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        database: database.to_string(),
        mode: state.mode.to_string(),
        scheduler_enabled: state.engine.runs_scheduler(),
        uptime_seconds: (chrono::Utc::now() - state.start_time).num_seconds(),
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ApiResponse::success(response)))
}
