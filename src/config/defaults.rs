/// Configuration default values
///
/// Central location for every tunable that ships with a default.
// Database defaults
pub const DEFAULT_DATABASE_URL: &str = "sqlite://./data/probe-scheduler.db";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

// Web server defaults
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8090;

// Scheduling defaults
pub const DEFAULT_TICK_INTERVAL: &str = "5s";
pub const DEFAULT_TELEMETRY_INTERVAL: &str = "15s";
pub const DEFAULT_CATCHUP_MAX_ENQUEUE: u64 = 50;
pub const DEFAULT_STAGGER_SECONDS: u64 = 0;

// Job cadence defaults (seconds)
pub const DEFAULT_UPLOAD_CHECK_INTERVAL_SECONDS: u64 = 4 * 60 * 60;
pub const DEFAULT_RETRIEVAL_CHECK_INTERVAL_SECONDS: u64 = 60 * 60;
pub const DEFAULT_METRICS_INTERVAL_SECONDS: u64 = 30 * 60;
pub const DEFAULT_METRICS_CLEANUP_INTERVAL_SECONDS: u64 = 24 * 60 * 60;
pub const DEFAULT_PROVIDERS_REFRESH_INTERVAL_SECONDS: u64 = 10 * 60;
pub const DEFAULT_EXTERNAL_POLL_INTERVAL_SECONDS: u64 = 5 * 60;

// Per-provider job timeouts (seconds)
pub const DEFAULT_UPLOAD_CHECK_TIMEOUT_SECONDS: u64 = 10 * 60;
pub const DEFAULT_RETRIEVAL_CHECK_TIMEOUT_SECONDS: u64 = 5 * 60;

// Worker defaults
pub const DEFAULT_PROVIDER_CHECK_BATCH_SIZE: u64 = 10;
pub const DEFAULT_PROVIDER_CHECK_CONCURRENCY: usize = 10;
pub const DEFAULT_GLOBAL_BATCH_SIZE: u64 = 1;
pub const DEFAULT_GLOBAL_CONCURRENCY: usize = 1;
pub const DEFAULT_POLL_INTERVAL: &str = "2s";

// Queue defaults
pub const DEFAULT_QUEUE_RETENTION: &str = "7days";
pub const DEFAULT_ACTIVE_EXPIRY: &str = "1h";
pub const DEFAULT_QUEUE_MAINTENANCE_INTERVAL: &str = "5m";
pub const DEFAULT_RETRY_DELAY: &str = "30s";

// Advisory lock defaults
pub const DEFAULT_ADVISORY_LOCK_ENABLED: bool = false;
pub const DEFAULT_ADVISORY_LOCK_TTL: &str = "30m";

// Probe defaults
pub const DEFAULT_UPLOAD_PATH: &str = "/upload";
pub const DEFAULT_RETRIEVAL_PATH: &str = "/retrieve";
pub const DEFAULT_UPLOAD_PAYLOAD_BYTES: usize = 64 * 1024;
pub const DEFAULT_USER_AGENT: &str = "probe-scheduler";

// Upper bounds for job cadence and first-run stagger (one year)
pub const MAX_INTERVAL_SECONDS: u64 = 366 * 24 * 60 * 60;
pub const MAX_STAGGER_SECONDS: u64 = 366 * 24 * 60 * 60;

// Upper bound for a single maintenance window
pub const MAX_WINDOW_DURATION_MINUTES: u32 = 24 * 60;
