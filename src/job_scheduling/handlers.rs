//! Job handlers: map a queue message to the collaborator that does the work

use anyhow::{Result, anyhow};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::advisory_lock::{ProviderLock, with_provider_lock};
use super::reconciler::ScheduleReconciler;
use super::types::{JobType, QueueMessage, RunOutcome};
use crate::config::JobTimeouts;
use crate::providers::{MaintenanceTask, ProviderRoster, RetrievalCheck, UploadCheck};

/// How long a cancelled check may take to unwind before it is dropped
const CANCELLATION_GRACE: Duration = Duration::from_secs(5);

/// The two per-provider checks
#[derive(Clone)]
pub struct ProviderChecks {
    pub upload: Arc<dyn UploadCheck>,
    pub retrieval: Arc<dyn RetrievalCheck>,
}

/// Global jobs whose logic lives outside the scheduler
#[derive(Clone)]
pub struct GlobalTasks {
    pub metrics: Arc<dyn MaintenanceTask>,
    pub metrics_cleanup: Arc<dyn MaintenanceTask>,
    pub external_poll: Arc<dyn MaintenanceTask>,
}

#[derive(Clone)]
struct LockSettings {
    lock: ProviderLock,
    ttl: Duration,
}

#[derive(Clone)]
pub struct JobHandlers {
    roster: Arc<dyn ProviderRoster>,
    checks: ProviderChecks,
    tasks: GlobalTasks,
    reconciler: Arc<ScheduleReconciler>,
    timeouts: JobTimeouts,
    lock: Option<LockSettings>,
}

impl JobHandlers {
    pub fn new(
        roster: Arc<dyn ProviderRoster>,
        checks: ProviderChecks,
        tasks: GlobalTasks,
        reconciler: Arc<ScheduleReconciler>,
        timeouts: JobTimeouts,
    ) -> Self {
        Self {
            roster,
            checks,
            tasks,
            reconciler,
            timeouts,
            lock: None,
        }
    }

    /// Serialize per-provider checks through the advisory lock
    pub fn with_provider_lock(mut self, lock: ProviderLock, ttl: Duration) -> Self {
        self.lock = Some(LockSettings { lock, ttl });
        self
    }

    /// Run the work a message describes
    pub async fn handle(&self, message: &QueueMessage) -> Result<RunOutcome> {
        match message.job_type {
            JobType::UploadCheck => self.handle_upload_check(message).await,
            JobType::RetrievalCheck => self.handle_retrieval_check(message).await,
            JobType::Metrics => run_task(self.tasks.metrics.as_ref()).await,
            JobType::MetricsCleanup => run_task(self.tasks.metrics_cleanup.as_ref()).await,
            JobType::ExternalPoll => run_task(self.tasks.external_poll.as_ref()).await,
            JobType::ProvidersRefresh => {
                let report = self.reconciler.reconcile().await?;
                info!(
                    "Provider refresh reconciled {} providers, removed {}",
                    report.providers,
                    report.deleted.len()
                );
                Ok(RunOutcome::Completed)
            }
        }
    }

    async fn handle_upload_check(&self, message: &QueueMessage) -> Result<RunOutcome> {
        let address = target_of(message)?;
        let Some(provider) = self.roster.get_provider(address).await? else {
            warn!("Upload check for unknown provider {}, skipping", address);
            return Ok(RunOutcome::Completed);
        };

        let upload = self.checks.upload.clone();
        self.run_provider_check(JobType::UploadCheck, address, move |token| async move {
            upload.run(&provider, token).await
        })
        .await
    }

    async fn handle_retrieval_check(&self, message: &QueueMessage) -> Result<RunOutcome> {
        let address = target_of(message)?;
        if self.roster.get_provider(address).await?.is_none() {
            warn!("Retrieval check for unknown provider {}, skipping", address);
            return Ok(RunOutcome::Completed);
        }

        let retrieval = self.checks.retrieval.clone();
        let target = address.to_string();
        self.run_provider_check(JobType::RetrievalCheck, address, move |token| async move {
            retrieval.run(&target, token).await
        })
        .await
    }

    async fn run_provider_check<F, Fut>(
        &self,
        job_type: JobType,
        address: &str,
        check: F,
    ) -> Result<RunOutcome>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let timeout = self
            .timeouts
            .for_job_type(job_type)
            .ok_or_else(|| anyhow!("No timeout configured for {job_type}"))?;

        let Some(settings) = &self.lock else {
            return run_with_deadline(job_type, address, timeout, check).await;
        };

        let outcome = with_provider_lock(&settings.lock, address, settings.ttl, || {
            run_with_deadline(job_type, address, timeout, check)
        })
        .await?;

        match outcome {
            Some(outcome) => Ok(outcome),
            None => {
                info!("Provider {} is locked, aborting {}", address, job_type);
                Ok(RunOutcome::Aborted)
            }
        }
    }
}

fn target_of(message: &QueueMessage) -> Result<&str> {
    message
        .target_key
        .as_deref()
        .filter(|target| !target.is_empty())
        .ok_or_else(|| anyhow!("{} message without a target provider", message.job_type))
}

async fn run_task(task: &dyn MaintenanceTask) -> Result<RunOutcome> {
    task.run().await?;
    Ok(RunOutcome::Completed)
}

/// Run `check` with a token that cancels itself after `timeout`.
///
/// A failure after the token fired is an abort, not an error. A check that
/// ignores the token is dropped once the grace period runs out.
async fn run_with_deadline<F, Fut>(
    job_type: JobType,
    address: &str,
    timeout: Duration,
    check: F,
) -> Result<RunOutcome>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let token = CancellationToken::new();
    let run = check(token.clone());
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::time::sleep(timeout) => {
            debug!("{} for {} hit its {:?} timeout", job_type, address, timeout);
            token.cancel();
            match tokio::time::timeout(CANCELLATION_GRACE, &mut run).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        "{} for {} ignored cancellation, dropping it",
                        job_type, address
                    );
                    return Ok(RunOutcome::Aborted);
                }
            }
        }
    };

    match result {
        Ok(()) => Ok(RunOutcome::Completed),
        Err(e) if token.is_cancelled() => {
            debug!("{} for {} aborted: {:#}", job_type, address, e);
            Ok(RunOutcome::Aborted)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulingConfig;
    use crate::database::Database;
    use crate::database::repositories::ScheduleSeaOrmRepository;
    use crate::providers::{
        MockMaintenanceTask, MockProviderRoster, MockRetrievalCheck, MockUploadCheck, Provider,
    };
    use async_trait::async_trait;

    fn provider(address: &str) -> Provider {
        Provider {
            address: address.to_string(),
            service_url: format!("http://{address}.example"),
            active: true,
            approved: true,
        }
    }

    fn known_roster() -> MockProviderRoster {
        let mut roster = MockProviderRoster::new();
        roster
            .expect_get_provider()
            .returning(|address| Ok((address != "gone").then(|| provider(address))));
        roster
            .expect_list_active_providers()
            .returning(|_| Ok(vec![provider("f01")]));
        roster
    }

    fn idle_task() -> Arc<dyn MaintenanceTask> {
        let mut task = MockMaintenanceTask::new();
        task.expect_run().returning(|| Ok(()));
        Arc::new(task)
    }

    /// Waits for cancellation and reports it as a failure
    struct HangingUpload;

    #[async_trait]
    impl UploadCheck for HangingUpload {
        async fn run(&self, _provider: &Provider, token: CancellationToken) -> Result<()> {
            token.cancelled().await;
            anyhow::bail!("upload cancelled")
        }
    }

    /// Never looks at its token
    struct StuckRetrieval;

    #[async_trait]
    impl RetrievalCheck for StuckRetrieval {
        async fn run(&self, _provider_address: &str, _token: CancellationToken) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    async fn handlers_with(
        upload: Arc<dyn UploadCheck>,
        retrieval: Arc<dyn RetrievalCheck>,
        metrics: Arc<dyn MaintenanceTask>,
    ) -> (JobHandlers, Database) {
        let database = Database::in_memory().await.unwrap();
        let roster: Arc<dyn ProviderRoster> = Arc::new(known_roster());
        let config = SchedulingConfig::default();
        let reconciler = Arc::new(ScheduleReconciler::new(
            ScheduleSeaOrmRepository::new(database.connection()),
            roster.clone(),
            &config,
        ));
        let handlers = JobHandlers::new(
            roster,
            ProviderChecks { upload, retrieval },
            GlobalTasks {
                metrics,
                metrics_cleanup: idle_task(),
                external_poll: idle_task(),
            },
            reconciler,
            config.timeouts.clone(),
        );
        (handlers, database)
    }

    fn upload_message(target: &str) -> QueueMessage {
        QueueMessage::for_schedule(JobType::UploadCheck, target, 60, None)
    }

    fn retrieval_message(target: &str) -> QueueMessage {
        QueueMessage::for_schedule(JobType::RetrievalCheck, target, 60, None)
    }

    #[tokio::test]
    async fn upload_check_runs_against_the_provider() {
        let mut upload = MockUploadCheck::new();
        upload
            .expect_run()
            .withf(|provider, token| provider.address == "f01" && !token.is_cancelled())
            .times(1)
            .returning(|_, _| Ok(()));

        let (handlers, _db) =
            handlers_with(Arc::new(upload), Arc::new(MockRetrievalCheck::new()), idle_task()).await;
        let outcome = handlers.handle(&upload_message("f01")).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
    }

    #[tokio::test]
    async fn unknown_provider_completes_without_running() {
        let mut retrieval = MockRetrievalCheck::new();
        retrieval.expect_run().times(0);

        let (handlers, _db) =
            handlers_with(Arc::new(MockUploadCheck::new()), Arc::new(retrieval), idle_task()).await;
        let outcome = handlers.handle(&retrieval_message("gone")).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
    }

    #[tokio::test]
    async fn check_failure_is_an_error() {
        let mut retrieval = MockRetrievalCheck::new();
        retrieval
            .expect_run()
            .returning(|_, _| Err(anyhow::anyhow!("piece not found")));

        let (handlers, _db) =
            handlers_with(Arc::new(MockUploadCheck::new()), Arc::new(retrieval), idle_task()).await;
        let error = handlers.handle(&retrieval_message("f01")).await.unwrap_err();
        assert_eq!(error.to_string(), "piece not found");
    }

    #[tokio::test]
    async fn timeout_cancels_and_aborts() {
        let (handlers, _db) =
            handlers_with(Arc::new(HangingUpload), Arc::new(MockRetrievalCheck::new()), idle_task())
                .await;
        tokio::time::pause();
        let outcome = handlers.handle(&upload_message("f01")).await.unwrap();
        assert_eq!(outcome, RunOutcome::Aborted);
    }

    #[tokio::test]
    async fn check_ignoring_cancellation_is_dropped() {
        let (handlers, _db) =
            handlers_with(Arc::new(MockUploadCheck::new()), Arc::new(StuckRetrieval), idle_task())
                .await;
        tokio::time::pause();
        let outcome = handlers.handle(&retrieval_message("f01")).await.unwrap();
        assert_eq!(outcome, RunOutcome::Aborted);
    }

    #[tokio::test]
    async fn held_provider_lock_aborts() {
        let mut upload = MockUploadCheck::new();
        upload.expect_run().times(0);

        let (handlers, db) =
            handlers_with(Arc::new(upload), Arc::new(MockRetrievalCheck::new()), idle_task()).await;
        let lock = ProviderLock::new(db.connection());
        let handlers = handlers.with_provider_lock(lock.clone(), Duration::from_secs(60));

        let _held = lock
            .try_acquire("f01", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        let outcome = handlers.handle(&upload_message("f01")).await.unwrap();
        assert_eq!(outcome, RunOutcome::Aborted);
    }

    #[tokio::test]
    async fn lock_is_free_after_a_locked_check() {
        let mut upload = MockUploadCheck::new();
        upload.expect_run().times(1).returning(|_, _| Ok(()));

        let (handlers, db) =
            handlers_with(Arc::new(upload), Arc::new(MockRetrievalCheck::new()), idle_task()).await;
        let lock = ProviderLock::new(db.connection());
        let handlers = handlers.with_provider_lock(lock.clone(), Duration::from_secs(60));

        assert_eq!(
            handlers.handle(&upload_message("f01")).await.unwrap(),
            RunOutcome::Completed
        );
        assert!(!lock.is_locked("f01").await.unwrap());
    }

    #[tokio::test]
    async fn global_jobs_run_their_task() {
        let mut metrics = MockMaintenanceTask::new();
        metrics.expect_run().times(1).returning(|| Ok(()));

        let (handlers, _db) = handlers_with(
            Arc::new(MockUploadCheck::new()),
            Arc::new(MockRetrievalCheck::new()),
            Arc::new(metrics),
        )
        .await;
        let message = QueueMessage::for_schedule(JobType::Metrics, "", 3600, None);
        assert_eq!(handlers.handle(&message).await.unwrap(), RunOutcome::Completed);
    }

    #[tokio::test]
    async fn providers_refresh_reconciles() {
        let (handlers, db) = handlers_with(
            Arc::new(MockUploadCheck::new()),
            Arc::new(MockRetrievalCheck::new()),
            idle_task(),
        )
        .await;
        let message = QueueMessage::for_schedule(JobType::ProvidersRefresh, "", 3600, None);
        assert_eq!(handlers.handle(&message).await.unwrap(), RunOutcome::Completed);

        let schedules = ScheduleSeaOrmRepository::new(db.connection());
        assert!(schedules.find(JobType::UploadCheck, "f01").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn per_provider_message_needs_a_target() {
        let (handlers, _db) = handlers_with(
            Arc::new(MockUploadCheck::new()),
            Arc::new(MockRetrievalCheck::new()),
            idle_task(),
        )
        .await;
        let message = QueueMessage {
            job_type: JobType::UploadCheck,
            target_key: None,
            interval_seconds: 60,
            scheduled_start_after: None,
        };
        assert!(handlers.handle(&message).await.is_err());
    }
}
