//! Queue-health telemetry
//!
//! Every pass reports all six gauges for every known job type, zero when the
//! type has no rows, so a drained queue never keeps showing its last non-zero
//! value. Rows that cannot be mapped to a job type are reported as `unknown`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::job_queue::{JobQueue, QueueState};
use super::types::{JobType, job_type_label_for_queue};
use crate::database::repositories::ScheduleSeaOrmRepository;
use crate::observability::{MetricsRecorder, QueueGauge};

/// Gauge values for one job type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTypeQueueMetrics {
    pub queued: u64,
    pub retry_scheduled: u64,
    pub in_flight: u64,
    pub oldest_queued_age_seconds: u64,
    pub oldest_in_flight_age_seconds: u64,
    pub paused: u64,
}

impl JobTypeQueueMetrics {
    fn value(&self, gauge: QueueGauge) -> u64 {
        match gauge {
            QueueGauge::Queued => self.queued,
            QueueGauge::RetryScheduled => self.retry_scheduled,
            QueueGauge::InFlight => self.in_flight,
            QueueGauge::OldestQueuedAgeSeconds => self.oldest_queued_age_seconds,
            QueueGauge::OldestInFlightAgeSeconds => self.oldest_in_flight_age_seconds,
            QueueGauge::Paused => self.paused,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetricsSnapshot {
    pub captured_at: DateTime<Utc>,
    /// Keyed by job type label
    pub job_types: BTreeMap<String, JobTypeQueueMetrics>,
}

impl QueueMetricsSnapshot {
    pub fn get(&self, job_type: &str) -> JobTypeQueueMetrics {
        self.job_types.get(job_type).copied().unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct QueueTelemetry {
    queue: JobQueue,
    schedules: ScheduleSeaOrmRepository,
    metrics: Arc<dyn MetricsRecorder>,
    latest: Arc<RwLock<Option<QueueMetricsSnapshot>>>,
}

impl QueueTelemetry {
    pub fn new(
        queue: JobQueue,
        schedules: ScheduleSeaOrmRepository,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            queue,
            schedules,
            metrics,
            latest: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn update_queue_metrics(&self) -> Result<QueueMetricsSnapshot> {
        self.update_queue_metrics_at(Utc::now()).await
    }

    /// Compute the gauges as of `now`, publish them and keep the snapshot
    pub async fn update_queue_metrics_at(&self, now: DateTime<Utc>) -> Result<QueueMetricsSnapshot> {
        let pending = self.queue.snapshot_pending().await?;
        let paused = self.schedules.count_paused_by_type().await?;

        let mut job_types: BTreeMap<String, JobTypeQueueMetrics> = JobType::all()
            .map(|job_type| (job_type.to_string(), JobTypeQueueMetrics::default()))
            .collect();

        for job in &pending {
            let label = job_type_label_for_queue(&job.name, &job.data);
            let entry = job_types.entry(label).or_default();
            match job.state {
                QueueState::Created => {
                    entry.queued += 1;
                    // Deferred jobs only start aging once they become eligible
                    if job.start_after <= now {
                        let waiting_since = job.created_on.max(job.start_after);
                        entry.oldest_queued_age_seconds =
                            entry.oldest_queued_age_seconds.max(age_seconds(now, waiting_since));
                    }
                }
                QueueState::Retry => entry.retry_scheduled += 1,
                QueueState::Active => {
                    entry.in_flight += 1;
                    let started = job.started_on.unwrap_or(job.created_on);
                    entry.oldest_in_flight_age_seconds =
                        entry.oldest_in_flight_age_seconds.max(age_seconds(now, started));
                }
                QueueState::Completed | QueueState::Failed => {}
            }
        }

        for (job_type, count) in paused {
            job_types.entry(job_type).or_default().paused = count;
        }

        for (label, values) in &job_types {
            for gauge in QueueGauge::ALL {
                self.metrics.set_queue_gauge(gauge, label, values.value(gauge));
            }
        }

        debug!("Published queue telemetry for {} pending jobs", pending.len());

        let snapshot = QueueMetricsSnapshot {
            captured_at: now,
            job_types,
        };
        *self.latest.write().await = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Last published snapshot, if a pass has run
    pub async fn latest(&self) -> Option<QueueMetricsSnapshot> {
        self.latest.read().await.clone()
    }
}

fn age_seconds(now: DateTime<Utc>, since: DateTime<Utc>) -> u64 {
    u64::try_from((now - since).num_seconds()).unwrap_or(0)
}
