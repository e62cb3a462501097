use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use strum::{Display, EnumString};
use tracing::{info, warn};

pub mod defaults;
pub mod duration_serde;

use defaults::*;
use duration_serde::parse_default;

use crate::errors::ConfigError;
use crate::job_scheduling::maintenance_window::{MaintenanceSchedule, MaintenanceWindow};
use crate::job_scheduling::types::JobType;

/// Environment variable prefix; nested keys are separated by `__`
pub const ENV_PREFIX: &str = "PROBE_SCHEDULER_";

/// Which roles this process performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunMode {
    /// Dispatch tick active, no workers registered
    Api,
    /// Workers registered, no dispatch tick
    Worker,
    /// Workers registered; dispatch tick only when `scheduler_enabled` is set
    Both,
}

impl RunMode {
    /// Whether the due-job tick runs in this process
    pub fn runs_scheduler(&self, scheduler_enabled: bool) -> bool {
        match self {
            RunMode::Api => true,
            RunMode::Worker => false,
            RunMode::Both => scheduler_enabled,
        }
    }

    /// Whether queue workers are registered in this process
    pub fn runs_workers(&self) -> bool {
        matches!(self, RunMode::Worker | RunMode::Both)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub advisory_lock: AdvisoryLockConfig,
    #[serde(default)]
    pub probes: ProbeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Dispatch, reconciliation and cadence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    #[serde(default = "default_run_mode")]
    pub mode: RunMode,
    /// Gate for the dispatch tick when running in `both` mode
    #[serde(default = "default_true")]
    pub scheduler_enabled: bool,
    #[serde(default = "default_tick_interval", with = "duration_serde::duration")]
    pub tick_interval: Duration,
    #[serde(default = "default_telemetry_interval", with = "duration_serde::duration")]
    pub telemetry_interval: Duration,
    /// Maximum schedule rows dispatched by one tick
    #[serde(default = "default_catchup_max_enqueue")]
    pub catchup_max_enqueue: u64,
    /// Only schedule providers that are both active and approved
    #[serde(default)]
    pub approved_only: bool,
    /// Upper bound of the random offset applied to a new row's first run
    #[serde(default = "default_stagger_seconds")]
    pub stagger_seconds: u64,
    #[serde(default)]
    pub intervals: JobIntervals,
    #[serde(default)]
    pub timeouts: JobTimeouts,
    #[serde(default)]
    pub maintenance_windows: Vec<MaintenanceWindow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobIntervals {
    #[serde(default = "default_upload_check_interval")]
    pub upload_check_seconds: u64,
    #[serde(default = "default_retrieval_check_interval")]
    pub retrieval_check_seconds: u64,
    #[serde(default = "default_metrics_interval")]
    pub metrics_seconds: u64,
    #[serde(default = "default_metrics_cleanup_interval")]
    pub metrics_cleanup_seconds: u64,
    #[serde(default = "default_providers_refresh_interval")]
    pub providers_refresh_seconds: u64,
    #[serde(default = "default_external_poll_interval")]
    pub external_poll_seconds: u64,
}

impl JobIntervals {
    pub fn for_job_type(&self, job_type: JobType) -> u64 {
        match job_type {
            JobType::UploadCheck => self.upload_check_seconds,
            JobType::RetrievalCheck => self.retrieval_check_seconds,
            JobType::Metrics => self.metrics_seconds,
            JobType::MetricsCleanup => self.metrics_cleanup_seconds,
            JobType::ProvidersRefresh => self.providers_refresh_seconds,
            JobType::ExternalPoll => self.external_poll_seconds,
        }
    }
}

/// Execution timeouts for the per-provider checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTimeouts {
    #[serde(default = "default_upload_check_timeout")]
    pub upload_check_seconds: u64,
    #[serde(default = "default_retrieval_check_timeout")]
    pub retrieval_check_seconds: u64,
}

impl JobTimeouts {
    /// Timeout for a per-provider job type, `None` for global jobs
    pub fn for_job_type(&self, job_type: JobType) -> Option<Duration> {
        match job_type {
            JobType::UploadCheck => Some(Duration::from_secs(self.upload_check_seconds)),
            JobType::RetrievalCheck => Some(Duration::from_secs(self.retrieval_check_seconds)),
            _ => None,
        }
    }
}

/// Consumer settings for a single queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueWorkerConfig {
    pub batch_size: u64,
    pub concurrency: usize,
    #[serde(default = "default_poll_interval", with = "duration_serde::duration")]
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Shared by the upload and retrieval checks
    #[serde(default = "default_provider_check_worker")]
    pub provider_checks: QueueWorkerConfig,
    #[serde(default = "default_global_worker")]
    pub metrics: QueueWorkerConfig,
    #[serde(default = "default_global_worker")]
    pub metrics_cleanup: QueueWorkerConfig,
    #[serde(default = "default_global_worker")]
    pub providers_refresh: QueueWorkerConfig,
    #[serde(default = "default_global_worker")]
    pub external_poll: QueueWorkerConfig,
}

impl WorkerConfig {
    pub fn for_job_type(&self, job_type: JobType) -> &QueueWorkerConfig {
        match job_type {
            JobType::UploadCheck | JobType::RetrievalCheck => &self.provider_checks,
            JobType::Metrics => &self.metrics,
            JobType::MetricsCleanup => &self.metrics_cleanup,
            JobType::ProvidersRefresh => &self.providers_refresh,
            JobType::ExternalPoll => &self.external_poll,
        }
    }
}

/// Durable queue housekeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long completed and failed rows are kept
    #[serde(default = "default_queue_retention", with = "duration_serde::duration")]
    pub retention: Duration,
    /// Active rows older than this are considered abandoned and failed
    #[serde(default = "default_active_expiry", with = "duration_serde::duration")]
    pub active_expiry: Duration,
    #[serde(default = "default_queue_maintenance_interval", with = "duration_serde::duration")]
    pub maintenance_interval: Duration,
    /// Delay before a failed job with retries left becomes eligible again
    #[serde(default = "default_retry_delay", with = "duration_serde::duration")]
    pub retry_delay: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisoryLockConfig {
    #[serde(default = "default_advisory_lock_enabled")]
    pub enabled: bool,
    /// Locks older than this can be taken over by another holder
    #[serde(default = "default_advisory_lock_ttl", with = "duration_serde::duration")]
    pub ttl: Duration,
}

/// HTTP probe settings for the bundled check implementations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_upload_path")]
    pub upload_path: String,
    #[serde(default = "default_retrieval_path")]
    pub retrieval_path: String,
    #[serde(default = "default_upload_payload_bytes")]
    pub upload_payload_bytes: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.to_string()
}
fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_run_mode() -> RunMode {
    RunMode::Both
}
fn default_true() -> bool {
    true
}
fn default_tick_interval() -> Duration {
    parse_default(DEFAULT_TICK_INTERVAL)
}
fn default_telemetry_interval() -> Duration {
    parse_default(DEFAULT_TELEMETRY_INTERVAL)
}
fn default_catchup_max_enqueue() -> u64 {
    DEFAULT_CATCHUP_MAX_ENQUEUE
}
fn default_stagger_seconds() -> u64 {
    DEFAULT_STAGGER_SECONDS
}
fn default_upload_check_interval() -> u64 {
    DEFAULT_UPLOAD_CHECK_INTERVAL_SECONDS
}
fn default_retrieval_check_interval() -> u64 {
    DEFAULT_RETRIEVAL_CHECK_INTERVAL_SECONDS
}
fn default_metrics_interval() -> u64 {
    DEFAULT_METRICS_INTERVAL_SECONDS
}
fn default_metrics_cleanup_interval() -> u64 {
    DEFAULT_METRICS_CLEANUP_INTERVAL_SECONDS
}
fn default_providers_refresh_interval() -> u64 {
    DEFAULT_PROVIDERS_REFRESH_INTERVAL_SECONDS
}
fn default_external_poll_interval() -> u64 {
    DEFAULT_EXTERNAL_POLL_INTERVAL_SECONDS
}
fn default_upload_check_timeout() -> u64 {
    DEFAULT_UPLOAD_CHECK_TIMEOUT_SECONDS
}
fn default_retrieval_check_timeout() -> u64 {
    DEFAULT_RETRIEVAL_CHECK_TIMEOUT_SECONDS
}
fn default_poll_interval() -> Duration {
    parse_default(DEFAULT_POLL_INTERVAL)
}
fn default_provider_check_worker() -> QueueWorkerConfig {
    QueueWorkerConfig {
        batch_size: DEFAULT_PROVIDER_CHECK_BATCH_SIZE,
        concurrency: DEFAULT_PROVIDER_CHECK_CONCURRENCY,
        poll_interval: default_poll_interval(),
    }
}
fn default_global_worker() -> QueueWorkerConfig {
    QueueWorkerConfig {
        batch_size: DEFAULT_GLOBAL_BATCH_SIZE,
        concurrency: DEFAULT_GLOBAL_CONCURRENCY,
        poll_interval: default_poll_interval(),
    }
}
fn default_queue_retention() -> Duration {
    parse_default(DEFAULT_QUEUE_RETENTION)
}
fn default_active_expiry() -> Duration {
    parse_default(DEFAULT_ACTIVE_EXPIRY)
}
fn default_queue_maintenance_interval() -> Duration {
    parse_default(DEFAULT_QUEUE_MAINTENANCE_INTERVAL)
}
fn default_retry_delay() -> Duration {
    parse_default(DEFAULT_RETRY_DELAY)
}
fn default_advisory_lock_enabled() -> bool {
    DEFAULT_ADVISORY_LOCK_ENABLED
}
fn default_advisory_lock_ttl() -> Duration {
    parse_default(DEFAULT_ADVISORY_LOCK_TTL)
}
fn default_upload_path() -> String {
    DEFAULT_UPLOAD_PATH.to_string()
}
fn default_retrieval_path() -> String {
    DEFAULT_RETRIEVAL_PATH.to_string()
}
fn default_upload_payload_bytes() -> usize {
    DEFAULT_UPLOAD_PAYLOAD_BYTES
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            web: WebConfig::default(),
            scheduling: SchedulingConfig::default(),
            workers: WorkerConfig::default(),
            queue: QueueConfig::default(),
            advisory_lock: AdvisoryLockConfig::default(),
            probes: ProbeConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: Some(DEFAULT_MAX_CONNECTIONS),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            mode: default_run_mode(),
            scheduler_enabled: true,
            tick_interval: default_tick_interval(),
            telemetry_interval: default_telemetry_interval(),
            catchup_max_enqueue: default_catchup_max_enqueue(),
            approved_only: false,
            stagger_seconds: default_stagger_seconds(),
            intervals: JobIntervals::default(),
            timeouts: JobTimeouts::default(),
            maintenance_windows: Vec::new(),
        }
    }
}

impl Default for JobIntervals {
    fn default() -> Self {
        Self {
            upload_check_seconds: default_upload_check_interval(),
            retrieval_check_seconds: default_retrieval_check_interval(),
            metrics_seconds: default_metrics_interval(),
            metrics_cleanup_seconds: default_metrics_cleanup_interval(),
            providers_refresh_seconds: default_providers_refresh_interval(),
            external_poll_seconds: default_external_poll_interval(),
        }
    }
}

impl Default for JobTimeouts {
    fn default() -> Self {
        Self {
            upload_check_seconds: default_upload_check_timeout(),
            retrieval_check_seconds: default_retrieval_check_timeout(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            provider_checks: default_provider_check_worker(),
            metrics: default_global_worker(),
            metrics_cleanup: default_global_worker(),
            providers_refresh: default_global_worker(),
            external_poll: default_global_worker(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retention: default_queue_retention(),
            active_expiry: default_active_expiry(),
            maintenance_interval: default_queue_maintenance_interval(),
            retry_delay: default_retry_delay(),
        }
    }
}

impl Default for AdvisoryLockConfig {
    fn default() -> Self {
        Self {
            enabled: default_advisory_lock_enabled(),
            ttl: default_advisory_lock_ttl(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            upload_path: default_upload_path(),
            retrieval_path: default_retrieval_path(),
            upload_payload_bytes: default_upload_payload_bytes(),
            user_agent: default_user_agent(),
        }
    }
}

impl Config {
    /// Load configuration: built-in defaults, then the TOML file (if present),
    /// then `PROBE_SCHEDULER_*` environment variables.
    pub fn load_from_file(config_file: &str) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        if Path::new(config_file).exists() {
            info!("Loading configuration from {}", config_file);
            figment = figment.merge(Toml::file(config_file));
        } else {
            warn!(
                "Configuration file {} not found, using defaults and environment",
                config_file
            );
        }

        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as a TOML document
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check values that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduling.maintenance_schedule()?;

        if self.scheduling.catchup_max_enqueue == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scheduling.catchup_max_enqueue".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.scheduling.tick_interval.is_zero() || self.scheduling.telemetry_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "scheduling.tick_interval".to_string(),
                message: "tick and telemetry intervals must be non-zero".to_string(),
            });
        }

        if self.scheduling.stagger_seconds > MAX_STAGGER_SECONDS {
            return Err(ConfigError::InvalidValue {
                field: "scheduling.stagger_seconds".to_string(),
                message: format!("must be at most {MAX_STAGGER_SECONDS}"),
            });
        }

        for job_type in JobType::all() {
            let interval = self.scheduling.intervals.for_job_type(job_type);
            if interval == 0 || interval > MAX_INTERVAL_SECONDS {
                return Err(ConfigError::InvalidValue {
                    field: format!("scheduling.intervals.{job_type}_seconds"),
                    message: format!("must be between 1 and {MAX_INTERVAL_SECONDS} seconds"),
                });
            }

            let worker = self.workers.for_job_type(job_type);
            if worker.batch_size == 0 || worker.concurrency == 0 || worker.poll_interval.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: format!("workers.{}", job_type.queue_name()),
                    message: "batch_size, concurrency and poll_interval must be non-zero".to_string(),
                });
            }

            if let Some(timeout) = self.scheduling.timeouts.for_job_type(job_type) {
                if timeout.is_zero() {
                    return Err(ConfigError::InvalidValue {
                        field: format!("scheduling.timeouts.{job_type}_seconds"),
                        message: "must be at least 1 second".to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

impl SchedulingConfig {
    /// Parse the configured windows into an evaluator
    pub fn maintenance_schedule(&self) -> Result<MaintenanceSchedule, ConfigError> {
        MaintenanceSchedule::new(&self.maintenance_windows)
    }
}
