//! Scheduler metrics
//!
//! `MetricsRecorder` is the seam between the scheduling core and the metrics
//! backend. `SchedulerMetrics` records to OpenTelemetry instruments and
//! exports over OTLP/HTTP when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
//! `InMemoryMetrics` keeps the last values in memory for inspection.

use anyhow::Result;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Gauge, Histogram, Meter, MeterProvider},
};
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

use crate::job_scheduling::types::{JobResult, JobType};

/// Queue-health gauges, each labeled by `job_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueGauge {
    Queued,
    RetryScheduled,
    InFlight,
    OldestQueuedAgeSeconds,
    OldestInFlightAgeSeconds,
    Paused,
}

impl QueueGauge {
    pub const ALL: [QueueGauge; 6] = [
        QueueGauge::Queued,
        QueueGauge::RetryScheduled,
        QueueGauge::InFlight,
        QueueGauge::OldestQueuedAgeSeconds,
        QueueGauge::OldestInFlightAgeSeconds,
        QueueGauge::Paused,
    ];

    pub fn metric_name(&self) -> &'static str {
        match self {
            QueueGauge::Queued => "jobs_queued",
            QueueGauge::RetryScheduled => "jobs_retry_scheduled",
            QueueGauge::InFlight => "jobs_in_flight",
            QueueGauge::OldestQueuedAgeSeconds => "oldest_queued_age_seconds",
            QueueGauge::OldestInFlightAgeSeconds => "oldest_in_flight_age_seconds",
            QueueGauge::Paused => "jobs_paused",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            QueueGauge::Queued => "Jobs waiting to be claimed",
            QueueGauge::RetryScheduled => "Failed jobs waiting for a retry",
            QueueGauge::InFlight => "Jobs currently being processed",
            QueueGauge::OldestQueuedAgeSeconds => "Age of the oldest eligible queued job",
            QueueGauge::OldestInFlightAgeSeconds => "Age of the oldest in-flight job",
            QueueGauge::Paused => "Schedule rows paused by an operator",
        }
    }
}

/// Sink for job execution and queue-health measurements
pub trait MetricsRecorder: Send + Sync {
    fn job_started(&self, job_type: JobType);
    fn job_duration(&self, job_type: JobType, seconds: f64);
    fn job_completed(&self, job_type: JobType, result: JobResult);
    fn set_queue_gauge(&self, gauge: QueueGauge, job_type: &str, value: u64);
}

/// OpenTelemetry-backed metrics
#[derive(Clone)]
pub struct SchedulerMetrics {
    pub meter: Meter,
    jobs_started: Counter<u64>,
    jobs_completed: Counter<u64>,
    job_duration: Histogram<f64>,
    gauges: HashMap<QueueGauge, Gauge<u64>>,
}

impl SchedulerMetrics {
    /// Build the meter provider, install it globally and create the instruments
    pub fn init(service_name: &'static str) -> Result<(Self, SdkMeterProvider)> {
        let resource = Resource::builder().with_service_name(service_name).build();
        let mut builder = SdkMeterProvider::builder().with_resource(resource);

        if let Ok(otlp_endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            let exporter = opentelemetry_otlp::MetricExporter::builder()
                .with_http()
                .build()?;
            builder = builder.with_reader(PeriodicReader::builder(exporter).build());
            info!("OpenTelemetry configured: OTLP metrics to {}", otlp_endpoint);
        } else {
            info!("OpenTelemetry configured: local metrics only (OTLP endpoint not configured)");
        }

        let provider = builder.build();
        global::set_meter_provider(provider.clone());

        let meter = provider.meter(service_name);
        Ok((Self::build_with_instruments(meter), provider))
    }

    /// Build instruments on an existing meter
    pub fn build_with_instruments(meter: Meter) -> Self {
        let jobs_started = meter
            .u64_counter("jobs_started")
            .with_description("Jobs handed to a handler")
            .build();
        let jobs_completed = meter
            .u64_counter("jobs_completed")
            .with_description("Jobs finished, labeled by result")
            .build();
        let job_duration = meter
            .f64_histogram("job_duration_seconds")
            .with_description("Wall time of a job execution")
            .with_unit("s")
            .build();

        let gauges = QueueGauge::ALL
            .into_iter()
            .map(|gauge| {
                let instrument = meter
                    .u64_gauge(gauge.metric_name())
                    .with_description(gauge.description())
                    .build();
                (gauge, instrument)
            })
            .collect();

        Self {
            meter,
            jobs_started,
            jobs_completed,
            job_duration,
            gauges,
        }
    }
}

impl MetricsRecorder for SchedulerMetrics {
    fn job_started(&self, job_type: JobType) {
        self.jobs_started
            .add(1, &[KeyValue::new("job_type", job_type.to_string())]);
    }

    fn job_duration(&self, job_type: JobType, seconds: f64) {
        self.job_duration
            .record(seconds, &[KeyValue::new("job_type", job_type.to_string())]);
    }

    fn job_completed(&self, job_type: JobType, result: JobResult) {
        self.jobs_completed.add(
            1,
            &[
                KeyValue::new("job_type", job_type.to_string()),
                KeyValue::new("result", result.to_string()),
            ],
        );
    }

    fn set_queue_gauge(&self, gauge: QueueGauge, job_type: &str, value: u64) {
        if let Some(instrument) = self.gauges.get(&gauge) {
            instrument.record(value, &[KeyValue::new("job_type", job_type.to_string())]);
        }
    }
}

#[derive(Debug, Default)]
struct InMemoryState {
    started: HashMap<JobType, u64>,
    completed: HashMap<(JobType, JobResult), u64>,
    durations: Vec<(JobType, f64)>,
    gauges: HashMap<(QueueGauge, String), u64>,
}

/// Metrics kept in process memory; counters accumulate, gauges keep the last value
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    state: Mutex<InMemoryState>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut InMemoryState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    pub fn started(&self, job_type: JobType) -> u64 {
        self.with_state(|state| state.started.get(&job_type).copied().unwrap_or(0))
    }

    pub fn completed(&self, job_type: JobType, result: JobResult) -> u64 {
        self.with_state(|state| {
            state
                .completed
                .get(&(job_type, result))
                .copied()
                .unwrap_or(0)
        })
    }

    pub fn durations(&self, job_type: JobType) -> Vec<f64> {
        self.with_state(|state| {
            state
                .durations
                .iter()
                .filter(|(recorded, _)| *recorded == job_type)
                .map(|(_, seconds)| *seconds)
                .collect()
        })
    }

    pub fn gauge(&self, gauge: QueueGauge, job_type: &str) -> Option<u64> {
        self.with_state(|state| state.gauges.get(&(gauge, job_type.to_string())).copied())
    }
}

impl MetricsRecorder for InMemoryMetrics {
    fn job_started(&self, job_type: JobType) {
        self.with_state(|state| *state.started.entry(job_type).or_default() += 1);
    }

    fn job_duration(&self, job_type: JobType, seconds: f64) {
        self.with_state(|state| state.durations.push((job_type, seconds)));
    }

    fn job_completed(&self, job_type: JobType, result: JobResult) {
        self.with_state(|state| *state.completed.entry((job_type, result)).or_default() += 1);
    }

    fn set_queue_gauge(&self, gauge: QueueGauge, job_type: &str, value: u64) {
        self.with_state(|state| {
            state.gauges.insert((gauge, job_type.to_string()), value);
        });
    }
}
