//! Execution recording around job handlers

use anyhow::Result;
use chrono::Utc;
use std::future::Future;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::types::{JobExecutionOutcome, JobResult, JobType, RunOutcome};
use crate::observability::MetricsRecorder;

/// Run `run` and record its execution.
///
/// Emits `jobs_started` before the call. Once it returns, emits the
/// `job_duration_seconds` observation and `jobs_completed` labeled `success`,
/// `aborted` or `error`. Handler errors are returned unchanged after recording.
pub async fn record_job_execution<F, Fut>(
    metrics: &dyn MetricsRecorder,
    job_type: JobType,
    run: F,
) -> Result<JobExecutionOutcome>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<RunOutcome>>,
{
    metrics.job_started(job_type);
    let started_at = Utc::now();
    let started = Instant::now();

    let result = run().await;

    let duration_seconds = started.elapsed().as_secs_f64();
    metrics.job_duration(job_type, duration_seconds);

    match result {
        Ok(outcome) => {
            let result = JobResult::from(outcome);
            metrics.job_completed(job_type, result);
            match outcome {
                RunOutcome::Completed => {
                    debug!("Job {} completed in {:.3}s", job_type, duration_seconds)
                }
                RunOutcome::Aborted => {
                    info!("Job {} aborted after {:.3}s", job_type, duration_seconds)
                }
            }
            Ok(JobExecutionOutcome {
                job_type,
                started_at,
                duration_seconds,
                result,
            })
        }
        Err(e) => {
            metrics.job_completed(job_type, JobResult::Error);
            warn!(
                "Job {} failed after {:.3}s: {:#}",
                job_type, duration_seconds, e
            );
            Err(e)
        }
    }
}
