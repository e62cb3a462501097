//! Schedule reconciliation against the provider roster

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::JobType;
use crate::config::{JobIntervals, SchedulingConfig};
use crate::database::repositories::ScheduleSeaOrmRepository;
use crate::providers::ProviderRoster;

/// What one reconciliation pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Active providers returned by the roster
    pub providers: usize,
    /// Per-provider rows inserted or refreshed
    pub upserted: usize,
    /// Global rows inserted or refreshed
    pub globals: usize,
    /// Providers whose per-provider rows were removed
    pub deleted: Vec<String>,
    /// Deletion was skipped because the roster came back empty
    pub skipped_deletion: bool,
}

/// Keeps schedule rows in line with the monitored provider set
pub struct ScheduleReconciler {
    schedules: ScheduleSeaOrmRepository,
    roster: Arc<dyn ProviderRoster>,
    intervals: JobIntervals,
    approved_only: bool,
    stagger_seconds: u64,
}

impl ScheduleReconciler {
    pub fn new(
        schedules: ScheduleSeaOrmRepository,
        roster: Arc<dyn ProviderRoster>,
        config: &SchedulingConfig,
    ) -> Self {
        Self {
            schedules,
            roster,
            intervals: config.intervals.clone(),
            approved_only: config.approved_only,
            stagger_seconds: config.stagger_seconds,
        }
    }

    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.reconcile_at(Utc::now()).await
    }

    /// One pass. A roster or write failure aborts the pass; every step is an
    /// upsert or a keyed delete, so the next pass simply repeats it.
    pub async fn reconcile_at(&self, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let providers = self
            .roster
            .list_active_providers(self.approved_only)
            .await
            .context("Failed to fetch provider roster")?;

        let active_keys: HashSet<String> = providers
            .iter()
            .map(|provider| provider.address.trim().to_string())
            .filter(|address| !address.is_empty())
            .collect();

        let mut report = ReconcileReport {
            providers: active_keys.len(),
            ..ReconcileReport::default()
        };

        let mut sorted_keys: Vec<&String> = active_keys.iter().collect();
        sorted_keys.sort();

        for address in sorted_keys {
            for job_type in JobType::per_provider() {
                let first_run_at = now.checked_add_signed(self.stagger_offset()).unwrap_or(now);
                self.schedules
                    .upsert_preserving(
                        job_type,
                        address,
                        self.intervals.for_job_type(job_type),
                        first_run_at,
                        now,
                    )
                    .await
                    .with_context(|| format!("Failed to upsert {job_type} schedule for {address}"))?;
                report.upserted += 1;
            }
        }

        for job_type in JobType::global() {
            self.schedules
                .upsert_preserving(job_type, "", self.intervals.for_job_type(job_type), now, now)
                .await
                .with_context(|| format!("Failed to upsert {job_type} schedule"))?;
            report.globals += 1;
        }

        if active_keys.is_empty() {
            warn!(
                "Provider roster returned no active providers; refusing to delete per-provider schedules"
            );
            report.skipped_deletion = true;
        } else {
            report.deleted = self
                .schedules
                .delete_per_provider_except(&active_keys)
                .await
                .context("Failed to delete stale provider schedules")?;
            if !report.deleted.is_empty() {
                info!(
                    "Removed schedules for {} providers no longer monitored: {}",
                    report.deleted.len(),
                    report.deleted.join(", ")
                );
            }
        }

        debug!(
            "Reconciled {} providers ({} per-provider rows, {} global rows)",
            report.providers, report.upserted, report.globals
        );
        Ok(report)
    }

    fn stagger_offset(&self) -> Duration {
        if self.stagger_seconds == 0 {
            return Duration::zero();
        }
        let seconds = rand::rng().random_range(0..=self.stagger_seconds);
        i64::try_from(seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or_else(Duration::zero)
    }
}
