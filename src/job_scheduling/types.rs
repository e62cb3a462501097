//! Job scheduling type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};

/// Queue shared by every per-provider job type; the payload carries `jobType`
pub const PROVIDER_CHECK_QUEUE: &str = "provider.check";
pub const METRICS_QUEUE: &str = "metrics.run";
pub const METRICS_CLEANUP_QUEUE: &str = "metrics.cleanup";
pub const PROVIDERS_REFRESH_QUEUE: &str = "providers.refresh";
pub const EXTERNAL_POLL_QUEUE: &str = "external.poll";

/// Label used for queue rows that cannot be mapped to a job type
pub const UNKNOWN_JOB_TYPE: &str = "unknown";

/// Every kind of schedulable work
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobType {
    /// Per-provider upload check
    UploadCheck,
    /// Per-provider retrieval check
    RetrievalCheck,
    /// Network-wide metrics aggregation
    Metrics,
    /// Retention cleanup for aggregated metrics
    MetricsCleanup,
    /// Refresh of the monitored provider roster
    ProvidersRefresh,
    /// Poll of an external data source
    ExternalPoll,
}

impl JobType {
    const ALL: [JobType; 6] = [
        JobType::UploadCheck,
        JobType::RetrievalCheck,
        JobType::Metrics,
        JobType::MetricsCleanup,
        JobType::ProvidersRefresh,
        JobType::ExternalPoll,
    ];

    pub fn all() -> impl Iterator<Item = JobType> {
        Self::ALL.into_iter()
    }

    /// Job types with one schedule row per provider
    pub fn per_provider() -> impl Iterator<Item = JobType> {
        Self::all().filter(|job_type| job_type.is_per_provider())
    }

    /// Job types with a single row keyed by the empty string
    pub fn global() -> impl Iterator<Item = JobType> {
        Self::all().filter(|job_type| !job_type.is_per_provider())
    }

    pub fn is_per_provider(&self) -> bool {
        matches!(self, JobType::UploadCheck | JobType::RetrievalCheck)
    }

    /// Name of the queue this job type is published to
    pub fn queue_name(&self) -> &'static str {
        match self {
            JobType::UploadCheck | JobType::RetrievalCheck => PROVIDER_CHECK_QUEUE,
            JobType::Metrics => METRICS_QUEUE,
            JobType::MetricsCleanup => METRICS_CLEANUP_QUEUE,
            JobType::ProvidersRefresh => PROVIDERS_REFRESH_QUEUE,
            JobType::ExternalPoll => EXTERNAL_POLL_QUEUE,
        }
    }

    /// Queue-level singleton key.
    ///
    /// Per-provider jobs are keyed by `<job_type>:<target_key>`, so a provider
    /// never has two pending checks of the same kind while the upload and
    /// retrieval checks stay independent on the shared queue. Global jobs use
    /// a fixed key.
    pub fn dedup_key(&self, target_key: &str) -> String {
        if self.is_per_provider() {
            format!("{}:{}", self.as_ref(), target_key)
        } else {
            self.as_ref().to_string()
        }
    }

    /// Fixed mapping from a dedicated queue back to its job type
    pub fn from_dedicated_queue(queue_name: &str) -> Option<JobType> {
        match queue_name {
            METRICS_QUEUE => Some(JobType::Metrics),
            METRICS_CLEANUP_QUEUE => Some(JobType::MetricsCleanup),
            PROVIDERS_REFRESH_QUEUE => Some(JobType::ProvidersRefresh),
            EXTERNAL_POLL_QUEUE => Some(JobType::ExternalPoll),
            _ => None,
        }
    }

    /// Every distinct queue name, in job type order
    pub fn queue_names() -> Vec<&'static str> {
        let mut names: Vec<&'static str> = Vec::new();
        for job_type in Self::all() {
            let name = job_type.queue_name();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

/// Map a queue row back to the job type vocabulary used by telemetry.
///
/// Rows on the shared queue are resolved through the payload's `jobType`
/// field; dedicated queues use a fixed mapping; anything else is `unknown`.
pub fn job_type_label_for_queue(queue_name: &str, payload: &str) -> String {
    if queue_name == PROVIDER_CHECK_QUEUE {
        return serde_json::from_str::<QueueMessage>(payload)
            .ok()
            .filter(|message| message.job_type.is_per_provider())
            .map(|message| message.job_type.to_string())
            .unwrap_or_else(|| UNKNOWN_JOB_TYPE.to_string());
    }

    JobType::from_dedicated_queue(queue_name)
        .map(|job_type| job_type.to_string())
        .unwrap_or_else(|| UNKNOWN_JOB_TYPE.to_string())
}

/// Payload published by the dispatcher and consumed by workers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub job_type: JobType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_key: Option<String>,
    pub interval_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_start_after: Option<DateTime<Utc>>,
}

impl QueueMessage {
    /// Build the message for a schedule row
    pub fn for_schedule(
        job_type: JobType,
        target_key: &str,
        interval_seconds: u64,
        scheduled_start_after: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            job_type,
            target_key: if job_type.is_per_provider() {
                Some(target_key.to_string())
            } else {
                None
            },
            interval_seconds,
            scheduled_start_after,
        }
    }

    pub fn dedup_key(&self) -> String {
        self.job_type
            .dedup_key(self.target_key.as_deref().unwrap_or_default())
    }
}

/// A durable schedule row, one per `(job_type, target_key)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRow {
    pub id: String,
    pub job_type: JobType,
    pub target_key: String,
    pub interval_seconds: u64,
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub paused: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Value returned by a job handler that finished without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// The job gave up early (timeout, cancellation or lock contention)
    Aborted,
}

/// Result label on `jobs_completed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobResult {
    Success,
    Error,
    Aborted,
}

impl From<RunOutcome> for JobResult {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Completed => JobResult::Success,
            RunOutcome::Aborted => JobResult::Aborted,
        }
    }
}

/// Summary of one wrapped execution; logged, never persisted
#[derive(Debug, Clone, PartialEq)]
pub struct JobExecutionOutcome {
    pub job_type: JobType,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub result: JobResult,
}
