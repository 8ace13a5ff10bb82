//! Create `job` table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Job::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Job::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Job::TenantId).string_len(128).not_null())
                    .col(ColumnDef::new(Job::IdempotencyKey).string_len(256))
                    .col(
                        ColumnDef::new(Job::Status)
                            .string_len(16)
                            .not_null()
                            .default("PENDING"),
                    )
                    .col(ColumnDef::new(Job::Payload).text().not_null())
                    .col(
                        ColumnDef::new(Job::AttemptCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Job::MaxRetries)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(ColumnDef::new(Job::LeaseExpiry).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Job::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Job::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Job::CompletedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Job::LastError).text())
                    .to_owned(),
            )
            .await?;

        // NULL keys are distinct in PostgreSQL, so only supplied keys collide
        manager
            .create_index(
                Index::create()
                    .name("idx_job_tenant_idempotency_key")
                    .table(Job::Table)
                    .col(Job::TenantId)
                    .col(Job::IdempotencyKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Concurrency cap and per-tenant listing
        manager
            .create_index(
                Index::create()
                    .name("idx_job_tenant_status")
                    .table(Job::Table)
                    .col(Job::TenantId)
                    .col(Job::Status)
                    .to_owned(),
            )
            .await?;

        // Claim scan: eligible rows oldest first
        manager
            .create_index(
                Index::create()
                    .name("idx_job_status_created_at")
                    .table(Job::Table)
                    .col(Job::Status)
                    .col(Job::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Job::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Job {
    Table,
    Id,
    TenantId,
    IdempotencyKey,
    Status,
    Payload,
    AttemptCount,
    MaxRetries,
    LeaseExpiry,
    CreatedAt,
    UpdatedAt,
    CompletedAt,
    LastError,
}
