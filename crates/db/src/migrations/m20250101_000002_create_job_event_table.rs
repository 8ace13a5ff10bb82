//! Create `job_event` table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(JobEvent::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(JobEvent::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(JobEvent::JobId).big_integer().not_null())
                    .col(ColumnDef::new(JobEvent::TenantId).string_len(128).not_null())
                    .col(ColumnDef::new(JobEvent::EventType).string_len(64).not_null())
                    .col(ColumnDef::new(JobEvent::Message).text().not_null())
                    .col(
                        ColumnDef::new(JobEvent::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_job_event_job")
                            .from(JobEvent::Table, JobEvent::JobId)
                            .to(Job::Table, Job::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_job_event_job_id")
                    .table(JobEvent::Table)
                    .col(JobEvent::JobId)
                    .to_owned(),
            )
            .await?;

        // Recent-events feed
        manager
            .create_index(
                Index::create()
                    .name("idx_job_event_timestamp")
                    .table(JobEvent::Table)
                    .col(JobEvent::Timestamp)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(JobEvent::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum JobEvent {
    Table,
    Id,
    JobId,
    TenantId,
    EventType,
    Message,
    Timestamp,
}

#[derive(Iden)]
enum Job {
    Table,
    Id,
}
