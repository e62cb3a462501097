use sea_orm::ConnectionTrait;
use sea_orm_migration::prelude::*;

/// Migration: partial unique index enforcing the queue's singleton window.
///
/// At most one non-terminal row (`created`, `retry`, `active`) may exist per
/// `(name, singleton_key)`. SQLite and PostgreSQL support partial indexes;
/// MySQL does not, so there the publish-time existence check inside the
/// caller's transaction is the only guard.
pub struct Migration;
folder_migration_name!();

const INDEX_NAME: &str = "idx_queue_jobs_singleton_pending";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        match manager.get_database_backend() {
            sea_orm::DatabaseBackend::Sqlite | sea_orm::DatabaseBackend::Postgres => {
                manager
                    .get_connection()
                    .execute_unprepared(&format!(
                        "CREATE UNIQUE INDEX IF NOT EXISTS {INDEX_NAME} \
                         ON queue_jobs (name, singleton_key) \
                         WHERE singleton_key IS NOT NULL \
                         AND state IN ('created', 'retry', 'active')"
                    ))
                    .await?;
            }
            sea_orm::DatabaseBackend::MySql => {}
        }
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        match manager.get_database_backend() {
            sea_orm::DatabaseBackend::Sqlite | sea_orm::DatabaseBackend::Postgres => {
                manager
                    .get_connection()
                    .execute_unprepared(&format!("DROP INDEX IF EXISTS {INDEX_NAME}"))
                    .await?;
            }
            sea_orm::DatabaseBackend::MySql => {}
        }
        Ok(())
    }
}
