//! Due-job dispatcher
//!
//! Each tick claims due schedule rows, advances them and publishes one queue
//! message per row, all in a single transaction. PostgreSQL and MySQL read
//! the rows with `FOR UPDATE SKIP LOCKED`; SQLite has a single writer, and the
//! compare-and-swap on `next_run_at` keeps a row from being claimed twice.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::job_queue::{JobQueue, PublishOptions, PublishResult};
use super::maintenance_window::MaintenanceSchedule;
use super::types::QueueMessage;
use crate::database::repositories::ScheduleSeaOrmRepository;
use crate::database::{Database, DatabaseType};

/// Counters for one dispatch tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    /// Due rows read under the catch-up cap
    pub selected: usize,
    /// Messages written to the queue
    pub published: usize,
    /// Published messages held back until a maintenance window ends
    pub deferred: usize,
    /// Rows whose message was dropped because one is already pending
    pub deduped: usize,
    /// Rows claimed by another dispatcher between read and update
    pub skipped: usize,
    /// Rows left untouched because their next run time is not representable
    pub invalid: usize,
}

pub struct DueJobDispatcher {
    connection: Arc<DatabaseConnection>,
    database_type: DatabaseType,
    windows: MaintenanceSchedule,
    catchup_max_enqueue: u64,
}

impl DueJobDispatcher {
    pub fn new(database: &Database, windows: MaintenanceSchedule, catchup_max_enqueue: u64) -> Self {
        Self {
            connection: database.connection(),
            database_type: database.database_type(),
            windows,
            catchup_max_enqueue,
        }
    }

    pub async fn dispatch_due_jobs(&self) -> Result<DispatchReport> {
        self.dispatch_due_jobs_at(Utc::now()).await
    }

    /// Dispatch every row due at `tick`, oldest first, up to the catch-up cap.
    ///
    /// Rows inside a maintenance window are still advanced; their message
    /// carries `start_after` set to the end of the window.
    pub async fn dispatch_due_jobs_at(&self, tick: DateTime<Utc>) -> Result<DispatchReport> {
        let txn = self.connection.begin().await?;

        let due = ScheduleSeaOrmRepository::find_due(
            &txn,
            tick,
            self.catchup_max_enqueue,
            self.database_type.supports_skip_locked(),
        )
        .await?;

        let mut report = DispatchReport {
            selected: due.len(),
            ..DispatchReport::default()
        };

        if due.is_empty() {
            txn.commit().await?;
            return Ok(report);
        }

        let window = self.windows.status(tick);
        if window.in_window {
            debug!(
                "Tick {} is inside a maintenance window, deferring to {:?}",
                tick, window.resume_at
            );
        }

        for row in due {
            let Some(next_run_at) = next_run_after(tick, row.interval_seconds) else {
                error!(
                    "Schedule {} '{}' has an out-of-range interval of {}s, skipping",
                    row.job_type, row.target_key, row.interval_seconds
                );
                report.invalid += 1;
                continue;
            };
            let claimed =
                ScheduleSeaOrmRepository::advance(&txn, &row.id, row.next_run_at, next_run_at, tick)
                    .await?;
            if !claimed {
                debug!(
                    "Schedule {} {} was claimed elsewhere",
                    row.job_type, row.target_key
                );
                report.skipped += 1;
                continue;
            }

            let message = QueueMessage::for_schedule(
                row.job_type,
                &row.target_key,
                row.interval_seconds,
                window.resume_at,
            );
            let options = PublishOptions {
                singleton_key: Some(message.dedup_key()),
                retry_limit: 0,
                start_after: window.resume_at,
            };

            match JobQueue::publish(&txn, row.job_type.queue_name(), &message, &options, tick).await? {
                PublishResult::Enqueued(id) => {
                    debug!(
                        "Dispatched {} for '{}' as job {}",
                        row.job_type, row.target_key, id
                    );
                    report.published += 1;
                    if window.in_window {
                        report.deferred += 1;
                    }
                }
                PublishResult::Deduped => report.deduped += 1,
            }
        }

        txn.commit().await?;

        if report.published > 0 || report.deduped > 0 {
            info!(
                "Dispatched {} of {} due jobs ({} deferred, {} already pending, {} skipped)",
                report.published, report.selected, report.deferred, report.deduped, report.skipped
            );
        }
        Ok(report)
    }
}

/// `tick + interval`, or `None` when it overflows the timestamp range
fn next_run_after(tick: DateTime<Utc>, interval_seconds: u64) -> Option<DateTime<Utc>> {
    let seconds = i64::try_from(interval_seconds).ok()?;
    tick.checked_add_signed(Duration::try_seconds(seconds)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_scheduling::maintenance_window::MaintenanceWindow;
    use crate::job_scheduling::types::{JobType, METRICS_QUEUE, PROVIDER_CHECK_QUEUE};
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, minute, 0).unwrap()
    }

    struct Fixture {
        dispatcher: DueJobDispatcher,
        schedules: ScheduleSeaOrmRepository,
        queue: JobQueue,
    }

    async fn fixture(windows: &[MaintenanceWindow], cap: u64) -> Fixture {
        let database = Database::in_memory().await.unwrap();
        let schedule = MaintenanceSchedule::new(windows).unwrap();
        Fixture {
            dispatcher: DueJobDispatcher::new(&database, schedule, cap),
            schedules: ScheduleSeaOrmRepository::new(database.connection()),
            queue: JobQueue::new(database.connection(), std::time::Duration::from_secs(30)),
        }
    }

    #[tokio::test]
    async fn catch_up_cap_bounds_one_tick() {
        let fx = fixture(&[], 3).await;
        for i in 0..10 {
            let first_run = at(10, 6, i);
            fx.schedules
                .upsert_preserving(JobType::UploadCheck, &format!("f{i:02}"), 300, first_run, first_run)
                .await
                .unwrap();
        }

        let report = fx.dispatcher.dispatch_due_jobs_at(at(10, 7, 0)).await.unwrap();
        assert_eq!(report.selected, 3);
        assert_eq!(report.published, 3);

        let jobs = fx.queue.list(Some(PROVIDER_CHECK_QUEUE)).await.unwrap();
        assert_eq!(jobs.len(), 3);
        let mut targets: Vec<_> = jobs
            .iter()
            .map(|job| job.message().unwrap().target_key.unwrap())
            .collect();
        targets.sort();
        assert_eq!(targets, vec!["f00", "f01", "f02"]);
        for job in &jobs {
            assert_eq!(job.retry_limit, 0);
            assert_eq!(job.start_after, at(10, 7, 0));
            assert_eq!(job.message().unwrap().scheduled_start_after, None);
        }

        let next = fx.dispatcher.dispatch_due_jobs_at(at(10, 7, 0)).await.unwrap();
        assert_eq!(next.published, 3);
    }

    #[tokio::test]
    async fn dispatched_rows_are_advanced_from_the_tick() {
        let fx = fixture(&[], 50).await;
        fx.schedules
            .upsert_preserving(JobType::Metrics, "", 600, at(10, 6, 0), at(10, 6, 0))
            .await
            .unwrap();

        fx.dispatcher.dispatch_due_jobs_at(at(10, 7, 0)).await.unwrap();

        let row = fx.schedules.find(JobType::Metrics, "").await.unwrap().unwrap();
        assert_eq!(row.next_run_at, at(10, 7, 10));
        assert_eq!(row.last_run_at, Some(at(10, 7, 0)));

        let jobs = fx.queue.list(Some(METRICS_QUEUE)).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].singleton_key.as_deref(), Some("metrics"));

        // Not due again until 07:10
        let idle = fx.dispatcher.dispatch_due_jobs_at(at(10, 7, 5)).await.unwrap();
        assert_eq!(idle, DispatchReport::default());
    }

    #[tokio::test]
    async fn maintenance_window_defers_to_window_end() {
        let fx = fixture(&[MaintenanceWindow::new("07:00", 20)], 50).await;
        fx.schedules
            .upsert_preserving(JobType::UploadCheck, "f01", 300, at(10, 7, 0), at(10, 7, 0))
            .await
            .unwrap();

        let report = fx.dispatcher.dispatch_due_jobs_at(at(10, 7, 5)).await.unwrap();
        assert_eq!(report.deferred, 1);

        let job = fx.queue.list(Some(PROVIDER_CHECK_QUEUE)).await.unwrap().remove(0);
        assert_eq!(job.start_after, at(10, 7, 20));
        assert_eq!(job.message().unwrap().scheduled_start_after, Some(at(10, 7, 20)));

        // The row advances even though the work is deferred
        let row = fx.schedules.find(JobType::UploadCheck, "f01").await.unwrap().unwrap();
        assert_eq!(row.next_run_at, at(10, 7, 10));

        assert!(fx.queue.fetch_at(PROVIDER_CHECK_QUEUE, 10, at(10, 7, 19)).await.unwrap().is_empty());
        assert_eq!(fx.queue.fetch_at(PROVIDER_CHECK_QUEUE, 10, at(10, 7, 20)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn window_crossing_midnight_resumes_next_day() {
        let fx = fixture(&[MaintenanceWindow::new("23:50", 20)], 50).await;
        fx.schedules
            .upsert_preserving(JobType::ExternalPoll, "", 300, at(10, 23, 0), at(10, 23, 0))
            .await
            .unwrap();

        fx.dispatcher.dispatch_due_jobs_at(at(10, 23, 55)).await.unwrap();

        let job = fx.queue.list(None).await.unwrap().remove(0);
        assert_eq!(job.start_after, at(11, 0, 10));
    }

    #[tokio::test]
    async fn paused_rows_are_not_dispatched() {
        let fx = fixture(&[], 50).await;
        fx.schedules
            .upsert_preserving(JobType::UploadCheck, "f01", 300, at(10, 6, 0), at(10, 6, 0))
            .await
            .unwrap();
        fx.schedules.set_paused(JobType::UploadCheck, "f01", true).await.unwrap();

        let report = fx.dispatcher.dispatch_due_jobs_at(at(10, 7, 0)).await.unwrap();
        assert_eq!(report.selected, 0);
        assert!(fx.queue.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_job_dedups_the_next_occurrence() {
        let fx = fixture(&[], 50).await;
        fx.schedules
            .upsert_preserving(JobType::RetrievalCheck, "f01", 60, at(10, 6, 0), at(10, 6, 0))
            .await
            .unwrap();

        let first = fx.dispatcher.dispatch_due_jobs_at(at(10, 7, 0)).await.unwrap();
        assert_eq!(first.published, 1);

        let second = fx.dispatcher.dispatch_due_jobs_at(at(10, 7, 1)).await.unwrap();
        assert_eq!(second.selected, 1);
        assert_eq!(second.deduped, 1);
        assert_eq!(second.published, 0);
        assert_eq!(fx.queue.list(None).await.unwrap().len(), 1);

        let row = fx.schedules.find(JobType::RetrievalCheck, "f01").await.unwrap().unwrap();
        assert_eq!(row.next_run_at, at(10, 7, 2));
    }

    #[tokio::test]
    async fn both_checks_for_one_provider_dispatch_in_the_same_tick() {
        let fx = fixture(&[], 50).await;
        for job_type in JobType::per_provider() {
            fx.schedules
                .upsert_preserving(job_type, "f01", 3600, at(10, 6, 0), at(10, 6, 0))
                .await
                .unwrap();
        }

        let report = fx.dispatcher.dispatch_due_jobs_at(at(10, 6, 0)).await.unwrap();
        assert_eq!(report.published, 2);
        assert_eq!(report.deduped, 0);

        let mut kinds: Vec<JobType> = fx
            .queue
            .list(Some(PROVIDER_CHECK_QUEUE))
            .await
            .unwrap()
            .iter()
            .map(|job| job.message().unwrap().job_type)
            .collect();
        kinds.sort();
        assert_eq!(kinds, vec![JobType::UploadCheck, JobType::RetrievalCheck]);
    }

    #[tokio::test]
    async fn colliding_checks_keep_running_every_interval() {
        let fx = fixture(&[], 50).await;
        for job_type in JobType::per_provider() {
            fx.schedules
                .upsert_preserving(job_type, "f01", 3600, at(10, 0, 0), at(10, 0, 0))
                .await
                .unwrap();
        }

        let mut runs: HashMap<JobType, usize> = HashMap::new();
        for hour in 0..10 {
            let tick = at(10, hour, 0);
            fx.dispatcher.dispatch_due_jobs_at(tick).await.unwrap();
            for job in fx.queue.fetch_at(PROVIDER_CHECK_QUEUE, 10, tick).await.unwrap() {
                *runs.entry(job.message().unwrap().job_type).or_default() += 1;
                fx.queue.complete(&job.id, None).await.unwrap();
            }
        }

        assert_eq!(runs.get(&JobType::UploadCheck), Some(&10));
        assert_eq!(runs.get(&JobType::RetrievalCheck), Some(&10));
    }

    #[tokio::test]
    async fn out_of_range_interval_is_skipped_without_panicking() {
        let fx = fixture(&[], 50).await;
        fx.schedules
            .upsert_preserving(JobType::UploadCheck, "f01", 10_000_000_000_000_000, at(10, 6, 0), at(10, 6, 0))
            .await
            .unwrap();
        fx.schedules
            .upsert_preserving(JobType::Metrics, "", 600, at(10, 6, 0), at(10, 6, 0))
            .await
            .unwrap();

        let report = fx.dispatcher.dispatch_due_jobs_at(at(10, 7, 0)).await.unwrap();
        assert_eq!(report.invalid, 1);
        assert_eq!(report.published, 1);

        let row = fx.schedules.find(JobType::UploadCheck, "f01").await.unwrap().unwrap();
        assert_eq!(row.next_run_at, at(10, 6, 0));
        assert!(fx.queue.list(Some(PROVIDER_CHECK_QUEUE)).await.unwrap().is_empty());
    }

    #[test]
    fn next_run_after_rejects_unrepresentable_times() {
        assert_eq!(next_run_after(at(10, 7, 0), 600), Some(at(10, 7, 10)));
        assert_eq!(next_run_after(at(10, 7, 0), 10_000_000_000_000_000), None);
        assert_eq!(next_run_after(at(10, 7, 0), u64::MAX), None);
    }
}
