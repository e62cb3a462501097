//! Schedule inspection and operator controls

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::info;

use crate::database::repositories::ScheduleFilter;
use crate::errors::{SchedulerError, SchedulerResult};
use crate::job_scheduling::types::{JobType, ScheduleRow};
use crate::web::{
    AppState,
    responses::{bad_request, handle_result},
};

#[derive(Debug, Default, Deserialize)]
pub struct ScheduleQuery {
    pub job_type: Option<String>,
    pub paused: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TargetQuery {
    /// Provider address; omitted for global job types
    pub target_key: Option<String>,
}

fn parse_job_type(name: &str) -> SchedulerResult<JobType> {
    name.parse::<JobType>()
        .map_err(|_| SchedulerError::UnknownJobType(name.to_string()))
}

/// `GET /api/v1/schedules`
pub async fn list_schedules(
    State(state): State<AppState>,
    Query(query): Query<ScheduleQuery>,
) -> Response {
    let result = async {
        let filter = ScheduleFilter {
            job_type: query.job_type.as_deref().map(parse_job_type).transpose()?,
            paused: query.paused,
        };
        Ok::<_, SchedulerError>(state.engine.schedules().list(&filter).await?)
    }
    .await;

    handle_result(result)
}

/// `POST /api/v1/schedules/{job_type}/pause`
pub async fn pause_schedule(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
    Query(query): Query<TargetQuery>,
) -> Response {
    set_paused(state, job_type, query, true).await
}

/// `POST /api/v1/schedules/{job_type}/resume`
pub async fn resume_schedule(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
    Query(query): Query<TargetQuery>,
) -> Response {
    set_paused(state, job_type, query, false).await
}

async fn set_paused(state: AppState, job_type: String, query: TargetQuery, paused: bool) -> Response {
    let job_type = match parse_job_type(&job_type) {
        Ok(job_type) => job_type,
        Err(e) => return bad_request(&e.to_string()).into_response(),
    };
    let target_key = query.target_key.unwrap_or_default();
    if job_type.is_per_provider() && target_key.is_empty() {
        return bad_request("target_key is required for per-provider job types").into_response();
    }

    let result = async {
        let schedules = state.engine.schedules();
        let not_found = || SchedulerError::ScheduleNotFound {
            job_type: job_type.to_string(),
            target_key: target_key.clone(),
        };

        if !schedules.set_paused(job_type, &target_key, paused).await? {
            return Err(not_found());
        }
        info!(
            "Schedule {} '{}' {}",
            job_type,
            target_key,
            if paused { "paused" } else { "resumed" }
        );
        let row: ScheduleRow = schedules
            .find(job_type, &target_key)
            .await?
            .ok_or_else(not_found)?;
        Ok::<_, SchedulerError>(row)
    }
    .await;

    handle_result(result)
}

/// `POST /api/v1/reconcile`
pub async fn reconcile(State(state): State<AppState>) -> Response {
    let result = state
        .engine
        .reconciler()
        .reconcile()
        .await
        .map_err(SchedulerError::from);
    handle_result(result)
}
