//! Durable SQL-backed job queue with singleton deduplication
//!
//! Rows move `created -> active -> completed | failed`, with `retry` as the
//! waiting state of a failed job that still has retries left. A row with a
//! singleton key blocks any other row with the same `(name, singleton_key)`
//! while it is `created`, `retry` or `active`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, SqlErr,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use strum::{AsRefStr, Display, EnumString};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::QueueMessage;
use crate::entities::{prelude::QueueJobs, queue_jobs};
use crate::errors::RepositoryError;

/// Lifecycle state of a queue row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum QueueState {
    Created,
    Retry,
    Active,
    Completed,
    Failed,
}

impl QueueState {
    /// States that hold the singleton key
    pub const PENDING: [QueueState; 3] = [QueueState::Created, QueueState::Retry, QueueState::Active];
    /// States a worker may claim from
    pub const CLAIMABLE: [QueueState; 2] = [QueueState::Created, QueueState::Retry];

    fn names(states: &[QueueState]) -> Vec<String> {
        states.iter().map(|state| state.to_string()).collect()
    }
}

/// Delivery options for a published message
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub singleton_key: Option<String>,
    /// Automatic redeliveries after a failure; the dispatcher always uses 0
    pub retry_limit: u32,
    /// Earliest time a worker may claim the job; `None` means immediately
    pub start_after: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishResult {
    Enqueued(String),
    /// Another pending row already holds the singleton key
    Deduped,
}

/// A queue row as seen by workers, telemetry and the API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueJob {
    pub id: String,
    pub name: String,
    pub data: String,
    pub state: QueueState,
    pub singleton_key: Option<String>,
    pub retry_limit: u32,
    pub retry_count: u32,
    pub start_after: DateTime<Utc>,
    pub created_on: DateTime<Utc>,
    pub started_on: Option<DateTime<Utc>>,
    pub completed_on: Option<DateTime<Utc>>,
    pub output: Option<String>,
}

impl QueueJob {
    /// Decode the payload
    pub fn message(&self) -> Result<QueueMessage, RepositoryError> {
        Ok(serde_json::from_str(&self.data)?)
    }

    fn from_model(model: queue_jobs::Model) -> Result<Self, RepositoryError> {
        let state = QueueState::from_str(&model.state).map_err(|_| RepositoryError::InvalidValue {
            table: "queue_jobs".to_string(),
            field: "state".to_string(),
            value: model.state.clone(),
        })?;

        Ok(Self {
            id: model.id,
            name: model.name,
            data: model.data,
            state,
            singleton_key: model.singleton_key,
            retry_limit: model.retry_limit.max(0) as u32,
            retry_count: model.retry_count.max(0) as u32,
            start_after: model.start_after,
            created_on: model.created_on,
            started_on: model.started_on,
            completed_on: model.completed_on,
            output: model.output,
        })
    }
}

/// Rows removed or recovered by one maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueMaintenanceReport {
    pub purged: u64,
    pub expired: u64,
}

/// Durable job queue over the `queue_jobs` table
#[derive(Clone)]
pub struct JobQueue {
    connection: Arc<DatabaseConnection>,
    retry_delay: Duration,
}

impl JobQueue {
    pub fn new(connection: Arc<DatabaseConnection>, retry_delay: Duration) -> Self {
        Self {
            connection,
            retry_delay,
        }
    }

    /// Publish on the queue's own connection
    pub async fn send(
        &self,
        name: &str,
        message: &QueueMessage,
        options: &PublishOptions,
    ) -> Result<PublishResult> {
        Self::publish(&*self.connection, name, message, options, Utc::now()).await
    }

    /// Publish on any connection, so callers can enqueue inside their own
    /// transaction. A pending row with the same singleton key wins and the
    /// new message is dropped.
    pub async fn publish<C: ConnectionTrait>(
        conn: &C,
        name: &str,
        message: &QueueMessage,
        options: &PublishOptions,
        now: DateTime<Utc>,
    ) -> Result<PublishResult> {
        if let Some(key) = &options.singleton_key {
            let existing = QueueJobs::find()
                .filter(queue_jobs::Column::Name.eq(name))
                .filter(queue_jobs::Column::SingletonKey.eq(key.as_str()))
                .filter(queue_jobs::Column::State.is_in(QueueState::names(&QueueState::PENDING)))
                .one(conn)
                .await?;

            if let Some(existing) = existing {
                debug!(
                    "Skipping duplicate job on {} for key {} (pending job {})",
                    name, key, existing.id
                );
                return Ok(PublishResult::Deduped);
            }
        }

        let id = Uuid::new_v4().to_string();
        let active_model = queue_jobs::ActiveModel {
            id: Set(id.clone()),
            name: Set(name.to_string()),
            data: Set(serde_json::to_string(message)?),
            state: Set(QueueState::Created.to_string()),
            singleton_key: Set(options.singleton_key.clone()),
            retry_limit: Set(i32::try_from(options.retry_limit)?),
            retry_count: Set(0),
            start_after: Set(options.start_after.unwrap_or(now)),
            created_on: Set(now),
            started_on: Set(None),
            completed_on: Set(None),
            output: Set(None),
        };

        match QueueJobs::insert(active_model).exec_without_returning(conn).await {
            Ok(_) => {
                debug!("Enqueued job {} on {}", id, name);
                Ok(PublishResult::Enqueued(id))
            }
            Err(e) if is_unique_violation(&e) => {
                debug!("Singleton index rejected duplicate job on {}", name);
                Ok(PublishResult::Deduped)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Claim up to `batch_size` eligible jobs from a queue
    pub async fn fetch(&self, name: &str, batch_size: u64) -> Result<Vec<QueueJob>> {
        self.fetch_at(name, batch_size, Utc::now()).await
    }

    /// Claim eligible jobs (FIFO by creation) as of `now`. Each claim is a
    /// compare-and-swap on the state, so concurrent workers never share a job.
    pub async fn fetch_at(
        &self,
        name: &str,
        batch_size: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueJob>> {
        let claimable = QueueState::names(&QueueState::CLAIMABLE);

        let candidates = QueueJobs::find()
            .filter(queue_jobs::Column::Name.eq(name))
            .filter(queue_jobs::Column::State.is_in(claimable.clone()))
            .filter(queue_jobs::Column::StartAfter.lte(now))
            .order_by_asc(queue_jobs::Column::CreatedOn)
            .limit(batch_size)
            .all(&*self.connection)
            .await?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let result = QueueJobs::update_many()
                .col_expr(queue_jobs::Column::State, Expr::value(QueueState::Active.to_string()))
                .col_expr(queue_jobs::Column::StartedOn, Expr::value(Some(now)))
                .filter(queue_jobs::Column::Id.eq(candidate.id.as_str()))
                .filter(queue_jobs::Column::State.is_in(claimable.clone()))
                .exec(&*self.connection)
                .await?;

            if result.rows_affected == 1 {
                let mut job = QueueJob::from_model(candidate)?;
                job.state = QueueState::Active;
                job.started_on = Some(now);
                claimed.push(job);
            }
        }

        Ok(claimed)
    }

    /// Mark an active job completed
    pub async fn complete(&self, id: &str, output: Option<serde_json::Value>) -> Result<()> {
        let output = output.map(|value| value.to_string());
        let result = QueueJobs::update_many()
            .col_expr(queue_jobs::Column::State, Expr::value(QueueState::Completed.to_string()))
            .col_expr(queue_jobs::Column::CompletedOn, Expr::value(Some(Utc::now())))
            .col_expr(queue_jobs::Column::Output, Expr::value(output))
            .filter(queue_jobs::Column::Id.eq(id))
            .filter(queue_jobs::Column::State.eq(QueueState::Active.to_string()))
            .exec(&*self.connection)
            .await?;

        if result.rows_affected == 0 {
            warn!("Job {} was no longer active when completing", id);
        }
        Ok(())
    }

    /// Record a failure. Jobs with retries left move to `retry` after the
    /// configured delay; everything else is `failed`.
    pub async fn fail(&self, id: &str, error: &str) -> Result<QueueState> {
        let now = Utc::now();
        let model = QueueJobs::find_by_id(id.to_string())
            .one(&*self.connection)
            .await?
            .ok_or_else(|| RepositoryError::not_found("queue_jobs", "id", id))?;
        let output = serde_json::json!({ "error": error }).to_string();

        let next_state = if model.retry_count < model.retry_limit {
            QueueState::Retry
        } else {
            QueueState::Failed
        };

        let mut update = QueueJobs::update_many()
            .col_expr(queue_jobs::Column::State, Expr::value(next_state.to_string()))
            .col_expr(queue_jobs::Column::Output, Expr::value(Some(output)));

        update = match next_state {
            QueueState::Retry => update
                .col_expr(
                    queue_jobs::Column::RetryCount,
                    Expr::value(model.retry_count + 1),
                )
                .col_expr(
                    queue_jobs::Column::StartAfter,
                    Expr::value(now + chrono::Duration::from_std(self.retry_delay)?),
                )
                .col_expr(
                    queue_jobs::Column::StartedOn,
                    Expr::value(Option::<DateTime<Utc>>::None),
                ),
            _ => update.col_expr(queue_jobs::Column::CompletedOn, Expr::value(Some(now))),
        };

        update
            .filter(queue_jobs::Column::Id.eq(id))
            .filter(queue_jobs::Column::State.eq(QueueState::Active.to_string()))
            .exec(&*self.connection)
            .await?;

        Ok(next_state)
    }

    /// Rows that have not reached a terminal state
    pub async fn snapshot_pending(&self) -> Result<Vec<QueueJob>> {
        let models = QueueJobs::find()
            .filter(queue_jobs::Column::State.is_in(QueueState::names(&QueueState::PENDING)))
            .all(&*self.connection)
            .await?;

        models
            .into_iter()
            .map(|model| QueueJob::from_model(model).map_err(anyhow::Error::from))
            .collect()
    }

    /// Jobs on one queue (or every queue), oldest first
    pub async fn list(&self, name: Option<&str>) -> Result<Vec<QueueJob>> {
        let mut query = QueueJobs::find();
        if let Some(name) = name {
            query = query.filter(queue_jobs::Column::Name.eq(name));
        }

        let models = query
            .order_by_asc(queue_jobs::Column::CreatedOn)
            .all(&*self.connection)
            .await?;

        models
            .into_iter()
            .map(|model| QueueJob::from_model(model).map_err(anyhow::Error::from))
            .collect()
    }

    pub async fn get(&self, id: &str) -> Result<Option<QueueJob>> {
        let model = QueueJobs::find_by_id(id.to_string())
            .one(&*self.connection)
            .await?;
        match model {
            Some(m) => Ok(Some(QueueJob::from_model(m)?)),
            None => Ok(None),
        }
    }

    /// Purge terminal rows past retention and fail abandoned active rows
    pub async fn maintain(
        &self,
        retention: Duration,
        active_expiry: Duration,
    ) -> Result<QueueMaintenanceReport> {
        self.maintain_at(Utc::now(), retention, active_expiry).await
    }

    pub async fn maintain_at(
        &self,
        now: DateTime<Utc>,
        retention: Duration,
        active_expiry: Duration,
    ) -> Result<QueueMaintenanceReport> {
        let expired_before = now - chrono::Duration::from_std(active_expiry)?;
        let expired = QueueJobs::update_many()
            .col_expr(queue_jobs::Column::State, Expr::value(QueueState::Failed.to_string()))
            .col_expr(queue_jobs::Column::CompletedOn, Expr::value(Some(now)))
            .col_expr(
                queue_jobs::Column::Output,
                Expr::value(Some(r#"{"error":"expired"}"#.to_string())),
            )
            .filter(queue_jobs::Column::State.eq(QueueState::Active.to_string()))
            .filter(queue_jobs::Column::StartedOn.lt(expired_before))
            .exec(&*self.connection)
            .await?
            .rows_affected;

        let purge_before = now - chrono::Duration::from_std(retention)?;
        let purged = QueueJobs::delete_many()
            .filter(
                queue_jobs::Column::State.is_in(QueueState::names(&[
                    QueueState::Completed,
                    QueueState::Failed,
                ])),
            )
            .filter(queue_jobs::Column::CompletedOn.lt(purge_before))
            .exec(&*self.connection)
            .await?
            .rows_affected;

        if expired > 0 || purged > 0 {
            info!(
                "Queue maintenance expired {} active jobs and purged {} finished jobs",
                expired, purged
            );
        }

        Ok(QueueMaintenanceReport { purged, expired })
    }
}

fn is_unique_violation(error: &DbErr) -> bool {
    matches!(error.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::job_scheduling::types::{JobType, PROVIDER_CHECK_QUEUE};
    use chrono::TimeZone;

    async fn queue() -> JobQueue {
        let database = Database::in_memory().await.unwrap();
        JobQueue::new(database.connection(), Duration::from_secs(30))
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, hour, minute, 0).unwrap()
    }

    fn check(target: &str) -> QueueMessage {
        QueueMessage::for_schedule(JobType::UploadCheck, target, 60, None)
    }

    fn singleton(key: &str) -> PublishOptions {
        PublishOptions {
            singleton_key: Some(key.to_string()),
            ..PublishOptions::default()
        }
    }

    #[tokio::test]
    async fn singleton_key_dedups_until_terminal() {
        let queue = queue().await;
        let conn = queue.connection.clone();

        let first = JobQueue::publish(&*conn, PROVIDER_CHECK_QUEUE, &check("f01"), &singleton("f01"), at(7, 0))
            .await
            .unwrap();
        assert!(matches!(first, PublishResult::Enqueued(_)));

        let second = JobQueue::publish(&*conn, PROVIDER_CHECK_QUEUE, &check("f01"), &singleton("f01"), at(7, 0))
            .await
            .unwrap();
        assert_eq!(second, PublishResult::Deduped);

        // Claimed and still running: still deduped
        let claimed = queue.fetch_at(PROVIDER_CHECK_QUEUE, 10, at(7, 1)).await.unwrap();
        assert_eq!(claimed.len(), 1);
        let third = JobQueue::publish(&*conn, PROVIDER_CHECK_QUEUE, &check("f01"), &singleton("f01"), at(7, 1))
            .await
            .unwrap();
        assert_eq!(third, PublishResult::Deduped);

        queue.complete(&claimed[0].id, None).await.unwrap();
        let fourth = JobQueue::publish(&*conn, PROVIDER_CHECK_QUEUE, &check("f01"), &singleton("f01"), at(7, 2))
            .await
            .unwrap();
        assert!(matches!(fourth, PublishResult::Enqueued(_)));
    }

    #[tokio::test]
    async fn different_keys_do_not_collide() {
        let queue = queue().await;
        for key in ["f01", "f02"] {
            let result = queue
                .send(PROVIDER_CHECK_QUEUE, &check(key), &singleton(key))
                .await
                .unwrap();
            assert!(matches!(result, PublishResult::Enqueued(_)));
        }
        assert_eq!(queue.list(Some(PROVIDER_CHECK_QUEUE)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fetch_respects_start_after_and_batch_size() {
        let queue = queue().await;
        let conn = queue.connection.clone();

        let deferred = PublishOptions {
            start_after: Some(at(8, 0)),
            ..PublishOptions::default()
        };
        JobQueue::publish(&*conn, PROVIDER_CHECK_QUEUE, &check("late"), &deferred, at(7, 0))
            .await
            .unwrap();
        for key in ["a", "b", "c"] {
            JobQueue::publish(&*conn, PROVIDER_CHECK_QUEUE, &check(key), &PublishOptions::default(), at(7, 0))
                .await
                .unwrap();
        }

        let first = queue.fetch_at(PROVIDER_CHECK_QUEUE, 2, at(7, 30)).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|job| job.state == QueueState::Active));

        let second = queue.fetch_at(PROVIDER_CHECK_QUEUE, 10, at(7, 30)).await.unwrap();
        assert_eq!(second.len(), 1);

        let after_window = queue.fetch_at(PROVIDER_CHECK_QUEUE, 10, at(8, 0)).await.unwrap();
        assert_eq!(after_window.len(), 1);
        assert_eq!(after_window[0].message().unwrap().target_key.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn failure_without_retries_is_terminal() {
        let queue = queue().await;
        queue
            .send(PROVIDER_CHECK_QUEUE, &check("f01"), &PublishOptions::default())
            .await
            .unwrap();
        let job = queue.fetch(PROVIDER_CHECK_QUEUE, 1).await.unwrap().remove(0);

        let state = queue.fail(&job.id, "boom").await.unwrap();
        assert_eq!(state, QueueState::Failed);

        let stored = queue.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, QueueState::Failed);
        assert!(stored.output.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn failure_with_retries_left_is_rescheduled() {
        let queue = queue().await;
        let options = PublishOptions {
            retry_limit: 1,
            ..PublishOptions::default()
        };
        queue.send(PROVIDER_CHECK_QUEUE, &check("f01"), &options).await.unwrap();
        let job = queue.fetch(PROVIDER_CHECK_QUEUE, 1).await.unwrap().remove(0);

        assert_eq!(queue.fail(&job.id, "boom").await.unwrap(), QueueState::Retry);
        let stored = queue.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 1);
        assert!(stored.start_after > Utc::now());
    }

    #[tokio::test]
    async fn maintenance_expires_and_purges() {
        let queue = queue().await;
        let conn = queue.connection.clone();
        JobQueue::publish(&*conn, PROVIDER_CHECK_QUEUE, &check("stuck"), &PublishOptions::default(), at(6, 0))
            .await
            .unwrap();
        let stuck = queue.fetch_at(PROVIDER_CHECK_QUEUE, 1, at(6, 0)).await.unwrap();
        assert_eq!(stuck.len(), 1);

        let report = queue
            .maintain_at(at(8, 0), Duration::from_secs(3600), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.purged, 0);

        let report = queue
            .maintain_at(at(10, 0), Duration::from_secs(3600), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(report.purged, 1);
        assert!(queue.list(None).await.unwrap().is_empty());
    }
}
