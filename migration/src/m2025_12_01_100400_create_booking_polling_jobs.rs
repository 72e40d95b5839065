//! Migration to create the booking_polling_jobs table.
//!
//! Append-only execution records, one per poll attempt per credential.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(BookingPollingJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BookingPollingJobs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(BookingPollingJobs::WorkspaceId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BookingPollingJobs::OauthCredentialId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BookingPollingJobs::Status)
                            .text()
                            .not_null()
                            .default("RUNNING"),
                    )
                    .col(
                        ColumnDef::new(BookingPollingJobs::EventsFetched)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(BookingPollingJobs::EventsCreated)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(BookingPollingJobs::EventsUpdated)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(BookingPollingJobs::EventsSkipped)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(BookingPollingJobs::DurationMs)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(BookingPollingJobs::ErrorMessage)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(BookingPollingJobs::ErrorDetails)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(BookingPollingJobs::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(BookingPollingJobs::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Index for history queries and age-based pruning
        manager
            .create_index(
                Index::create()
                    .name("idx_booking_polling_jobs_started_at")
                    .table(BookingPollingJobs::Table)
                    .col(BookingPollingJobs::StartedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_booking_polling_jobs_credential")
                    .table(BookingPollingJobs::Table)
                    .col(BookingPollingJobs::OauthCredentialId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_booking_polling_jobs_started_at")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_booking_polling_jobs_credential")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(BookingPollingJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum BookingPollingJobs {
    Table,
    Id,
    WorkspaceId,
    OauthCredentialId,
    Status,
    EventsFetched,
    EventsCreated,
    EventsUpdated,
    EventsSkipped,
    DurationMs,
    ErrorMessage,
    ErrorDetails,
    StartedAt,
    CompletedAt,
}
