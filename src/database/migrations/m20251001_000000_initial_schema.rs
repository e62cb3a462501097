use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.create_schedules_table(manager).await?;
        self.create_queue_jobs_table(manager).await?;
        self.create_provider_locks_table(manager).await?;
        self.create_providers_table(manager).await?;

        self.create_indexes(manager).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Providers::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ProviderLocks::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(QueueJobs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Schedules::Table).to_owned())
            .await?;

        Ok(())
    }
}

impl Migration {
    // Timestamps are native on PostgreSQL and MySQL, RFC 3339 text on SQLite
    fn create_timestamp_column(&self, manager: &SchemaManager, column: impl IntoIden) -> ColumnDef {
        let mut col = self.create_nullable_timestamp_column(manager, column);
        col.not_null();
        col
    }

    fn create_nullable_timestamp_column(
        &self,
        manager: &SchemaManager,
        column: impl IntoIden,
    ) -> ColumnDef {
        let mut col = ColumnDef::new(column);
        match manager.get_database_backend() {
            sea_orm::DatabaseBackend::Postgres => col.timestamp_with_time_zone(),
            sea_orm::DatabaseBackend::MySql => col.date_time(),
            _ => col.string(),
        };
        col
    }

    async fn create_schedules_table(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Schedules::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Schedules::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(Schedules::JobType).string().not_null())
                    .col(
                        ColumnDef::new(Schedules::TargetKey)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Schedules::IntervalSeconds)
                            .big_integer()
                            .not_null(),
                    )
                    .col(self.create_timestamp_column(manager, Schedules::NextRunAt))
                    .col(self.create_nullable_timestamp_column(manager, Schedules::LastRunAt))
                    .col(
                        ColumnDef::new(Schedules::Paused)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(self.create_timestamp_column(manager, Schedules::CreatedAt))
                    .col(self.create_timestamp_column(manager, Schedules::UpdatedAt))
                    .to_owned(),
            )
            .await
    }

    async fn create_queue_jobs_table(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(QueueJobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(QueueJobs::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(QueueJobs::Name).string().not_null())
                    .col(ColumnDef::new(QueueJobs::Data).text().not_null())
                    .col(
                        ColumnDef::new(QueueJobs::State)
                            .string()
                            .not_null()
                            .default("created"),
                    )
                    .col(ColumnDef::new(QueueJobs::SingletonKey).string())
                    .col(
                        ColumnDef::new(QueueJobs::RetryLimit)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(QueueJobs::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(self.create_timestamp_column(manager, QueueJobs::StartAfter))
                    .col(self.create_timestamp_column(manager, QueueJobs::CreatedOn))
                    .col(self.create_nullable_timestamp_column(manager, QueueJobs::StartedOn))
                    .col(self.create_nullable_timestamp_column(manager, QueueJobs::CompletedOn))
                    .col(ColumnDef::new(QueueJobs::Output).text())
                    .to_owned(),
            )
            .await
    }

    async fn create_provider_locks_table(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ProviderLocks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProviderLocks::Key)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ProviderLocks::Holder).string().not_null())
                    .col(self.create_timestamp_column(manager, ProviderLocks::AcquiredAt))
                    .col(self.create_timestamp_column(manager, ProviderLocks::ExpiresAt))
                    .to_owned(),
            )
            .await
    }

    async fn create_providers_table(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Providers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Providers::Address)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Providers::ServiceUrl).string().not_null())
                    .col(
                        ColumnDef::new(Providers::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Providers::IsApproved)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(self.create_timestamp_column(manager, Providers::CreatedAt))
                    .col(self.create_timestamp_column(manager, Providers::UpdatedAt))
                    .to_owned(),
            )
            .await
    }

    async fn create_indexes(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_schedules_job_type_target_key")
                    .table(Schedules::Table)
                    .col(Schedules::JobType)
                    .col(Schedules::TargetKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_schedules_paused_next_run_at")
                    .table(Schedules::Table)
                    .col(Schedules::Paused)
                    .col(Schedules::NextRunAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_queue_jobs_name_state_start_after")
                    .table(QueueJobs::Table)
                    .col(QueueJobs::Name)
                    .col(QueueJobs::State)
                    .col(QueueJobs::StartAfter)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_providers_active_approved")
                    .table(Providers::Table)
                    .col(Providers::IsActive)
                    .col(Providers::IsApproved)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Schedules {
    Table,
    Id,
    JobType,
    TargetKey,
    IntervalSeconds,
    NextRunAt,
    LastRunAt,
    Paused,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum QueueJobs {
    Table,
    Id,
    Name,
    Data,
    State,
    SingletonKey,
    RetryLimit,
    RetryCount,
    StartAfter,
    CreatedOn,
    StartedOn,
    CompletedOn,
    Output,
}

#[derive(DeriveIden)]
enum ProviderLocks {
    Table,
    Key,
    Holder,
    AcquiredAt,
    ExpiresAt,
}

#[derive(DeriveIden)]
enum Providers {
    Table,
    Address,
    ServiceUrl,
    IsActive,
    IsApproved,
    CreatedAt,
    UpdatedAt,
}
