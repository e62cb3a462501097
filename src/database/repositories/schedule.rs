//! SeaORM-based Schedule Store repository
//!
//! One row per `(job_type, target_key)`. The reconciler is the only creator
//! and deleter, the dispatcher the only writer of `next_run_at` and
//! `last_run_at`, and operators the only writers of `paused`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, LockBehavior, LockType, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::{prelude::Schedules, schedules};
use crate::errors::RepositoryError;
use crate::job_scheduling::types::{JobType, ScheduleRow};

/// Optional filters for listing schedule rows
#[derive(Debug, Clone, Default)]
pub struct ScheduleFilter {
    pub job_type: Option<JobType>,
    pub paused: Option<bool>,
}

/// SeaORM-based repository for schedule rows
#[derive(Clone)]
pub struct ScheduleSeaOrmRepository {
    connection: Arc<DatabaseConnection>,
}

impl ScheduleSeaOrmRepository {
    /// Create a new repository instance
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }

    /// Get database connection for direct operations
    pub fn get_connection(&self) -> &Arc<DatabaseConnection> {
        &self.connection
    }

    /// List rows ordered by job type, then target key
    pub async fn list(&self, filter: &ScheduleFilter) -> Result<Vec<ScheduleRow>> {
        let mut query = Schedules::find();
        if let Some(job_type) = filter.job_type {
            query = query.filter(schedules::Column::JobType.eq(job_type.as_ref()));
        }
        if let Some(paused) = filter.paused {
            query = query.filter(schedules::Column::Paused.eq(paused));
        }

        let models = query
            .order_by_asc(schedules::Column::JobType)
            .order_by_asc(schedules::Column::TargetKey)
            .all(&*self.connection)
            .await?;

        models
            .into_iter()
            .map(|model| Self::to_row(model).map_err(anyhow::Error::from))
            .collect()
    }

    /// Find the row for a key
    pub async fn find(&self, job_type: JobType, target_key: &str) -> Result<Option<ScheduleRow>> {
        let model = Schedules::find()
            .filter(schedules::Column::JobType.eq(job_type.as_ref()))
            .filter(schedules::Column::TargetKey.eq(target_key))
            .one(&*self.connection)
            .await?;

        match model {
            Some(m) => Ok(Some(Self::to_row(m)?)),
            None => Ok(None),
        }
    }

    /// Operational override; returns false when no row matched
    pub async fn set_paused(&self, job_type: JobType, target_key: &str, paused: bool) -> Result<bool> {
        let result = Schedules::update_many()
            .col_expr(schedules::Column::Paused, Expr::value(paused))
            .col_expr(schedules::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(schedules::Column::JobType.eq(job_type.as_ref()))
            .filter(schedules::Column::TargetKey.eq(target_key))
            .exec(&*self.connection)
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Insert a row, or on conflict update only `interval_seconds` and
    /// `updated_at`. `paused` and `next_run_at` of an existing row survive.
    pub async fn upsert_preserving(
        &self,
        job_type: JobType,
        target_key: &str,
        interval_seconds: u64,
        first_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let active_model = schedules::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            job_type: Set(job_type.to_string()),
            target_key: Set(target_key.to_string()),
            interval_seconds: Set(i64::try_from(interval_seconds)?),
            next_run_at: Set(first_run_at),
            last_run_at: Set(None),
            paused: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Schedules::insert(active_model)
            .on_conflict(
                OnConflict::columns([schedules::Column::JobType, schedules::Column::TargetKey])
                    .update_columns([
                        schedules::Column::IntervalSeconds,
                        schedules::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&*self.connection)
            .await?;

        Ok(())
    }

    /// Delete per-provider rows whose target is not in `active_keys`;
    /// returns the distinct deleted target keys, sorted
    pub async fn delete_per_provider_except(
        &self,
        active_keys: &HashSet<String>,
    ) -> Result<Vec<String>> {
        let per_provider: Vec<String> = JobType::per_provider().map(|t| t.to_string()).collect();

        let stale: Vec<schedules::Model> = Schedules::find()
            .filter(schedules::Column::JobType.is_in(per_provider))
            .all(&*self.connection)
            .await?
            .into_iter()
            .filter(|model| !active_keys.contains(&model.target_key))
            .collect();

        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = stale.iter().map(|model| model.id.clone()).collect();
        let keys: BTreeSet<String> = stale.into_iter().map(|model| model.target_key).collect();

        Schedules::delete_many()
            .filter(schedules::Column::Id.is_in(ids))
            .exec(&*self.connection)
            .await?;

        Ok(keys.into_iter().collect())
    }

    /// Number of paused rows per job type name; types without paused rows are absent
    pub async fn count_paused_by_type(&self) -> Result<HashMap<String, u64>> {
        let rows: Vec<(String, i64)> = Schedules::find()
            .select_only()
            .column(schedules::Column::JobType)
            .column_as(Expr::col(schedules::Column::Id).count(), "paused_count")
            .filter(schedules::Column::Paused.eq(true))
            .group_by(schedules::Column::JobType)
            .into_tuple()
            .all(&*self.connection)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(job_type, count)| (job_type, count.max(0) as u64))
            .collect())
    }

    /// Due rows (`paused = false`, `next_run_at <= now`), oldest first.
    ///
    /// With `skip_locked` the rows are read `FOR UPDATE SKIP LOCKED`, so
    /// concurrent dispatchers never block on or double-claim the same row.
    pub async fn find_due<C: ConnectionTrait>(
        conn: &C,
        now: DateTime<Utc>,
        limit: u64,
        skip_locked: bool,
    ) -> Result<Vec<ScheduleRow>> {
        let mut query = Schedules::find()
            .filter(schedules::Column::Paused.eq(false))
            .filter(schedules::Column::NextRunAt.lte(now))
            .order_by_asc(schedules::Column::NextRunAt)
            .limit(limit);

        if skip_locked {
            query = query.lock_with_behavior(LockType::Update, LockBehavior::SkipLocked);
        }

        let models = query.all(conn).await?;
        models
            .into_iter()
            .map(|model| Self::to_row(model).map_err(anyhow::Error::from))
            .collect()
    }

    /// Compare-and-swap advance of a row's run times. Succeeds only if
    /// `next_run_at` still holds the value the caller read, so a row is
    /// claimed by exactly one dispatch even without row locks.
    pub async fn advance<C: ConnectionTrait>(
        conn: &C,
        id: &str,
        expected_next_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
        last_run_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = Schedules::update_many()
            .col_expr(schedules::Column::NextRunAt, Expr::value(next_run_at))
            .col_expr(schedules::Column::LastRunAt, Expr::value(Some(last_run_at)))
            .col_expr(schedules::Column::UpdatedAt, Expr::value(last_run_at))
            .filter(schedules::Column::Id.eq(id))
            .filter(schedules::Column::NextRunAt.eq(expected_next_run_at))
            .filter(schedules::Column::Paused.eq(false))
            .exec(conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    fn to_row(model: schedules::Model) -> Result<ScheduleRow, RepositoryError> {
        let job_type =
            JobType::from_str(&model.job_type).map_err(|_| RepositoryError::InvalidValue {
                table: "schedules".to_string(),
                field: "job_type".to_string(),
                value: model.job_type.clone(),
            })?;

        Ok(ScheduleRow {
            id: model.id,
            job_type,
            target_key: model.target_key,
            interval_seconds: model.interval_seconds.max(0) as u64,
            next_run_at: model.next_run_at,
            last_run_at: model.last_run_at,
            paused: model.paused,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use chrono::{Duration, TimeZone};

    async fn repository() -> ScheduleSeaOrmRepository {
        let database = Database::in_memory().await.unwrap();
        ScheduleSeaOrmRepository::new(database.connection())
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, hour, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn upsert_preserves_paused_and_next_run() {
        let repo = repository().await;
        repo.upsert_preserving(JobType::UploadCheck, "f01", 3600, at(7, 0), at(7, 0))
            .await
            .unwrap();
        assert!(repo.set_paused(JobType::UploadCheck, "f01", true).await.unwrap());

        repo.upsert_preserving(JobType::UploadCheck, "f01", 600, at(9, 0), at(9, 0))
            .await
            .unwrap();

        let row = repo.find(JobType::UploadCheck, "f01").await.unwrap().unwrap();
        assert_eq!(row.interval_seconds, 600);
        assert_eq!(row.next_run_at, at(7, 0));
        assert!(row.paused);
        assert_eq!(repo.list(&ScheduleFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn set_paused_reports_missing_rows() {
        let repo = repository().await;
        assert!(!repo.set_paused(JobType::Metrics, "", true).await.unwrap());
    }

    #[tokio::test]
    async fn list_filters_by_type_and_paused() {
        let repo = repository().await;
        for key in ["f01", "f02"] {
            repo.upsert_preserving(JobType::UploadCheck, key, 60, at(7, 0), at(7, 0))
                .await
                .unwrap();
        }
        repo.upsert_preserving(JobType::Metrics, "", 60, at(7, 0), at(7, 0))
            .await
            .unwrap();
        repo.set_paused(JobType::UploadCheck, "f02", true).await.unwrap();

        let uploads = repo
            .list(&ScheduleFilter {
                job_type: Some(JobType::UploadCheck),
                paused: None,
            })
            .await
            .unwrap();
        assert_eq!(uploads.len(), 2);

        let paused = repo
            .list(&ScheduleFilter {
                job_type: None,
                paused: Some(true),
            })
            .await
            .unwrap();
        assert_eq!(paused.len(), 1);
        assert_eq!(paused[0].target_key, "f02");

        let counts = repo.count_paused_by_type().await.unwrap();
        assert_eq!(counts.get("upload_check"), Some(&1));
        assert_eq!(counts.get("metrics"), None);
    }

    #[tokio::test]
    async fn delete_keeps_active_and_global_rows() {
        let repo = repository().await;
        for key in ["f01", "f02", "f03"] {
            repo.upsert_preserving(JobType::RetrievalCheck, key, 60, at(7, 0), at(7, 0))
                .await
                .unwrap();
        }
        repo.upsert_preserving(JobType::ExternalPoll, "", 60, at(7, 0), at(7, 0))
            .await
            .unwrap();

        let active: HashSet<String> = ["f02".to_string()].into_iter().collect();
        let deleted = repo.delete_per_provider_except(&active).await.unwrap();

        assert_eq!(deleted, vec!["f01".to_string(), "f03".to_string()]);
        let remaining = repo.list(&ScheduleFilter::default()).await.unwrap();
        assert_eq!(remaining.len(), 2);
    }

    #[tokio::test]
    async fn advance_is_compare_and_swap() {
        let repo = repository().await;
        repo.upsert_preserving(JobType::Metrics, "", 60, at(7, 0), at(7, 0))
            .await
            .unwrap();

        let conn = repo.get_connection().clone();
        let due = ScheduleSeaOrmRepository::find_due(&*conn, at(7, 5), 10, false)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);

        let row = &due[0];
        let next = at(7, 5) + Duration::seconds(60);
        assert!(
            ScheduleSeaOrmRepository::advance(&*conn, &row.id, row.next_run_at, next, at(7, 5))
                .await
                .unwrap()
        );
        // A second claimer holding the stale value loses
        assert!(
            !ScheduleSeaOrmRepository::advance(&*conn, &row.id, row.next_run_at, next, at(7, 5))
                .await
                .unwrap()
        );

        let row = repo.find(JobType::Metrics, "").await.unwrap().unwrap();
        assert_eq!(row.next_run_at, next);
        assert_eq!(row.last_run_at, Some(at(7, 5)));
    }

    #[tokio::test]
    async fn find_due_skips_paused_and_future_rows() {
        let repo = repository().await;
        repo.upsert_preserving(JobType::UploadCheck, "due", 60, at(7, 0), at(7, 0))
            .await
            .unwrap();
        repo.upsert_preserving(JobType::UploadCheck, "future", 60, at(8, 0), at(7, 0))
            .await
            .unwrap();
        repo.upsert_preserving(JobType::UploadCheck, "paused", 60, at(6, 0), at(7, 0))
            .await
            .unwrap();
        repo.set_paused(JobType::UploadCheck, "paused", true).await.unwrap();

        let conn = repo.get_connection().clone();
        let due = ScheduleSeaOrmRepository::find_due(&*conn, at(7, 30), 10, false)
            .await
            .unwrap();
        let keys: Vec<_> = due.iter().map(|row| row.target_key.as_str()).collect();
        assert_eq!(keys, vec!["due"]);
    }
}
