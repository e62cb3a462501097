//! Queue consumers
//!
//! One polling loop per queue. Every loop claims at most as many jobs as it
//! has free permits, runs each through the execution recorder and settles the
//! queue row afterwards: completed on a normal return (aborted included),
//! failed on an error. Dispatched messages carry no retries, so a failure is
//! final and the next scheduled run is the retry.

use anyhow::Result;
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::execution_recorder::record_job_execution;
use super::handlers::JobHandlers;
use super::job_queue::{JobQueue, QueueJob};
use super::types::JobType;
use crate::config::{QueueWorkerConfig, WorkerConfig};
use crate::observability::MetricsRecorder;

#[derive(Clone)]
pub struct WorkerRuntime {
    queue: JobQueue,
    handlers: Arc<JobHandlers>,
    metrics: Arc<dyn MetricsRecorder>,
    config: WorkerConfig,
}

impl WorkerRuntime {
    pub fn new(
        queue: JobQueue,
        handlers: Arc<JobHandlers>,
        metrics: Arc<dyn MetricsRecorder>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            handlers,
            metrics,
            config,
        }
    }

    /// Consumer settings for a queue; the shared check queue uses the
    /// provider check settings
    pub fn queue_config(&self, queue_name: &str) -> Option<&QueueWorkerConfig> {
        JobType::all()
            .find(|job_type| job_type.queue_name() == queue_name)
            .map(|job_type| self.config.for_job_type(job_type))
    }

    /// Spawn a consumer loop for every queue. The loops stop when `token` is
    /// cancelled, after the jobs they already claimed have finished.
    pub fn register_workers(&self, token: CancellationToken) -> Vec<JoinHandle<()>> {
        JobType::queue_names()
            .into_iter()
            .filter_map(|queue_name| {
                let config = self.queue_config(queue_name)?.clone();
                let runtime = self.clone();
                let token = token.clone();
                info!(
                    "Registering worker for {} (batch {}, concurrency {}, poll {:?})",
                    queue_name, config.batch_size, config.concurrency, config.poll_interval
                );
                Some(tokio::spawn(async move {
                    runtime.consume(queue_name, config, token).await;
                }))
            })
            .collect()
    }

    async fn consume(&self, queue_name: &'static str, config: QueueWorkerConfig, token: CancellationToken) {
        let concurrency = config.concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        let mut poll = interval(config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if let Err(e) = self.poll_queue(queue_name, config.batch_size, &permits).await {
                        error!("Worker for {} failed to poll: {:#}", queue_name, e);
                    }
                }
                _ = token.cancelled() => {
                    debug!("Worker for {} received cancellation signal", queue_name);
                    break;
                }
            }
        }

        // Wait for claimed jobs to settle
        let all = u32::try_from(concurrency).unwrap_or(u32::MAX);
        if permits.acquire_many(all).await.is_err() {
            warn!("Worker for {} lost its permits while draining", queue_name);
        }
        info!("Worker for {} stopped", queue_name);
    }

    async fn poll_queue(&self, queue_name: &str, batch_size: u64, permits: &Arc<Semaphore>) -> Result<()> {
        let free = permits.available_permits() as u64;
        if free == 0 {
            return Ok(());
        }

        let jobs = self.queue.fetch(queue_name, batch_size.min(free)).await?;
        if !jobs.is_empty() {
            debug!("Claimed {} jobs from {}", jobs.len(), queue_name);
        }

        for job in jobs {
            let permit = permits.clone().acquire_owned().await?;
            let runtime = self.clone();
            tokio::spawn(async move {
                runtime.process_job(job).await;
                drop(permit);
            });
        }
        Ok(())
    }

    /// Claim one batch from `queue_name` and process it to completion.
    /// Returns the number of jobs processed.
    pub async fn run_once(&self, queue_name: &str) -> Result<usize> {
        let batch_size = self
            .queue_config(queue_name)
            .map(|config| config.batch_size)
            .unwrap_or(1);
        let jobs = self.queue.fetch(queue_name, batch_size).await?;
        let processed = jobs.len();
        join_all(jobs.into_iter().map(|job| self.process_job(job))).await;
        Ok(processed)
    }

    async fn process_job(&self, job: QueueJob) {
        let message = match job.message() {
            Ok(message) if message.job_type.queue_name() == job.name => message,
            Ok(message) => {
                warn!(
                    "Job {} carries {} but arrived on {}",
                    job.id, message.job_type, job.name
                );
                self.settle_failed(&job, "job type does not belong on this queue").await;
                return;
            }
            Err(e) => {
                warn!("Job {} on {} has an unreadable payload: {}", job.id, job.name, e);
                self.settle_failed(&job, &format!("invalid payload: {e}")).await;
                return;
            }
        };

        let handlers = self.handlers.clone();
        let result = record_job_execution(self.metrics.as_ref(), message.job_type, || {
            handlers.handle(&message)
        })
        .await;

        match result {
            Ok(outcome) => {
                let output = json!({
                    "result": outcome.result,
                    "durationSeconds": outcome.duration_seconds,
                });
                if let Err(e) = self.queue.complete(&job.id, Some(output)).await {
                    error!("Failed to complete job {}: {:#}", job.id, e);
                }
            }
            Err(e) => self.settle_failed(&job, &format!("{e:#}")).await,
        }
    }

    async fn settle_failed(&self, job: &QueueJob, reason: &str) {
        if let Err(e) = self.queue.fail(&job.id, reason).await {
            error!("Failed to record failure of job {}: {:#}", job.id, e);
        }
    }
}
