//! Queue statistics

use axum::{extract::State, response::Response};

use crate::errors::SchedulerError;
use crate::web::{AppState, responses::handle_result};

/// `GET /api/v1/queue/stats`
///
/// Serves the latest telemetry snapshot, computing one when no pass has run
/// yet in this process.
pub async fn queue_stats(State(state): State<AppState>) -> Response {
    let telemetry = state.engine.telemetry();
    let result = match telemetry.latest().await {
        Some(snapshot) => Ok(snapshot),
        None => telemetry
            .update_queue_metrics()
            .await
            .map_err(SchedulerError::from),
    };
    handle_result(result)
}
