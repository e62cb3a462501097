//! Scheduler engine: owns every scheduling component and runs the loops the
//! configured run mode asks for

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::advisory_lock::ProviderLock;
use super::dispatcher::DueJobDispatcher;
use super::handlers::{GlobalTasks, JobHandlers, ProviderChecks};
use super::job_queue::JobQueue;
use super::queue_telemetry::QueueTelemetry;
use super::reconciler::ScheduleReconciler;
use super::worker_runtime::WorkerRuntime;
use crate::config::{Config, QueueConfig, SchedulingConfig};
use crate::database::Database;
use crate::database::repositories::ScheduleSeaOrmRepository;
use crate::observability::MetricsRecorder;
use crate::providers::ProviderRoster;

/// External collaborators the handlers call into
#[derive(Clone)]
pub struct Collaborators {
    pub roster: Arc<dyn ProviderRoster>,
    pub checks: ProviderChecks,
    pub tasks: GlobalTasks,
}

pub struct SchedulerEngine {
    scheduling: SchedulingConfig,
    queue_config: QueueConfig,
    queue: JobQueue,
    schedules: ScheduleSeaOrmRepository,
    dispatcher: Arc<DueJobDispatcher>,
    reconciler: Arc<ScheduleReconciler>,
    telemetry: QueueTelemetry,
    workers: WorkerRuntime,
}

impl SchedulerEngine {
    pub fn new(
        config: &Config,
        database: &Database,
        collaborators: Collaborators,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Result<Self> {
        let connection = database.connection();
        let scheduling = config.scheduling.clone();

        let queue = JobQueue::new(connection.clone(), config.queue.retry_delay);
        let schedules = ScheduleSeaOrmRepository::new(connection.clone());
        let dispatcher = Arc::new(DueJobDispatcher::new(
            database,
            scheduling.maintenance_schedule()?,
            scheduling.catchup_max_enqueue,
        ));
        let reconciler = Arc::new(ScheduleReconciler::new(
            schedules.clone(),
            collaborators.roster.clone(),
            &scheduling,
        ));
        let telemetry = QueueTelemetry::new(queue.clone(), schedules.clone(), metrics.clone());

        let mut handlers = JobHandlers::new(
            collaborators.roster,
            collaborators.checks,
            collaborators.tasks,
            reconciler.clone(),
            scheduling.timeouts.clone(),
        );
        if config.advisory_lock.enabled {
            handlers = handlers
                .with_provider_lock(ProviderLock::new(connection), config.advisory_lock.ttl);
        }
        let workers = WorkerRuntime::new(
            queue.clone(),
            Arc::new(handlers),
            metrics,
            config.workers.clone(),
        );

        Ok(Self {
            scheduling,
            queue_config: config.queue.clone(),
            queue,
            schedules,
            dispatcher,
            reconciler,
            telemetry,
            workers,
        })
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn schedules(&self) -> &ScheduleSeaOrmRepository {
        &self.schedules
    }

    pub fn dispatcher(&self) -> Arc<DueJobDispatcher> {
        self.dispatcher.clone()
    }

    pub fn reconciler(&self) -> Arc<ScheduleReconciler> {
        self.reconciler.clone()
    }

    pub fn telemetry(&self) -> &QueueTelemetry {
        &self.telemetry
    }

    pub fn workers(&self) -> &WorkerRuntime {
        &self.workers
    }

    /// Whether this process dispatches due jobs
    pub fn runs_scheduler(&self) -> bool {
        self.scheduling
            .mode
            .runs_scheduler(self.scheduling.scheduler_enabled)
    }

    /// Run until `token` is cancelled
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        let mode = self.scheduling.mode;
        let ticks = self.runs_scheduler();
        info!(
            "Starting scheduler engine (mode: {}, dispatch: {}, workers: {})",
            mode,
            ticks,
            mode.runs_workers()
        );

        if ticks {
            match self.reconciler.reconcile().await {
                Ok(report) => info!(
                    "Startup reconciliation: {} providers, {} stale removed",
                    report.providers,
                    report.deleted.len()
                ),
                Err(e) => error!("Startup reconciliation failed: {:#}", e),
            }
        }

        let worker_handles = if mode.runs_workers() {
            self.workers.register_workers(token.clone())
        } else {
            Vec::new()
        };

        tokio::join!(
            self.dispatch_loop(ticks, token.clone()),
            self.telemetry_loop(token.clone()),
            self.maintenance_loop(token.clone()),
        );

        for handle in worker_handles {
            if let Err(e) = handle.await {
                error!("Worker task ended abnormally: {}", e);
            }
        }

        info!("Scheduler engine stopped");
        Ok(())
    }

    async fn dispatch_loop(&self, enabled: bool, token: CancellationToken) {
        if !enabled {
            debug!("Dispatch tick disabled for this process");
            return;
        }

        let mut tick = ticker(self.scheduling.tick_interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.dispatcher.dispatch_due_jobs().await {
                        error!("Error dispatching due jobs: {:#}", e);
                    }
                }
                _ = token.cancelled() => {
                    info!("Dispatcher received cancellation signal, shutting down");
                    break;
                }
            }
        }
    }

    async fn telemetry_loop(&self, token: CancellationToken) {
        let mut tick = ticker(self.scheduling.telemetry_interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.telemetry.update_queue_metrics().await {
                        error!("Error updating queue metrics: {:#}", e);
                    }
                }
                _ = token.cancelled() => break,
            }
        }
    }

    async fn maintenance_loop(&self, token: CancellationToken) {
        let mut tick = ticker(self.queue_config.maintenance_interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self
                        .queue
                        .maintain(self.queue_config.retention, self.queue_config.active_expiry)
                        .await
                    {
                        error!("Error maintaining job queue: {:#}", e);
                    }
                }
                _ = token.cancelled() => break,
            }
        }
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tick
}
