//! Job scheduling subsystem
//!
//! Durable schedule rows are turned into queue messages by the dispatcher,
//! and queue workers run them against the provider collaborators:
//! - `ScheduleReconciler`: keeps schedule rows in line with the provider roster
//! - `DueJobDispatcher`: publishes due rows, honoring the catch-up cap and
//!   maintenance windows
//! - `JobQueue`: SQL-backed queue with singleton deduplication
//! - `WorkerRuntime`: per-queue consumers wrapped by the execution recorder
//! - `QueueTelemetry`: queue-health gauges
//! - `SchedulerEngine`: owns the components and runs the loops

pub mod advisory_lock;
pub mod dispatcher;
pub mod engine;
pub mod execution_recorder;
pub mod handlers;
pub mod job_queue;
pub mod maintenance_window;
pub mod queue_telemetry;
pub mod reconciler;
pub mod types;
pub mod worker_runtime;

pub use advisory_lock::{ProviderLock, ProviderLockGuard, with_provider_lock};
pub use dispatcher::{DispatchReport, DueJobDispatcher};
pub use engine::{Collaborators, SchedulerEngine};
pub use execution_recorder::record_job_execution;
pub use handlers::{GlobalTasks, JobHandlers, ProviderChecks};
pub use job_queue::{JobQueue, PublishOptions, PublishResult, QueueJob, QueueState};
pub use maintenance_window::{MaintenanceSchedule, MaintenanceWindow, WindowStatus};
pub use queue_telemetry::{JobTypeQueueMetrics, QueueMetricsSnapshot, QueueTelemetry};
pub use reconciler::{ReconcileReport, ScheduleReconciler};
pub use types::*;
pub use worker_runtime::WorkerRuntime;
