//! Migration to create the bookings table.
//!
//! One row per (provider_event_id, provider_type); that pair is the
//! domain-level idempotency key, enforced by a unique index.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Bookings::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Bookings::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Bookings::WorkspaceId).uuid().not_null())
                    .col(ColumnDef::new(Bookings::LeadId).uuid().not_null())
                    .col(ColumnDef::new(Bookings::WorkflowId).uuid().null())
                    .col(
                        ColumnDef::new(Bookings::OauthCredentialId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Bookings::ProviderType).text().not_null())
                    .col(ColumnDef::new(Bookings::ProviderEventId).text().not_null())
                    .col(ColumnDef::new(Bookings::ProviderEventUri).text().null())
                    .col(ColumnDef::new(Bookings::EventName).text().not_null())
                    .col(
                        ColumnDef::new(Bookings::EventStartTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Bookings::EventEndTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Bookings::EventDurationMinutes)
                            .integer()
                            .null(),
                    )
                    .col(ColumnDef::new(Bookings::EventTimezone).text().null())
                    .col(ColumnDef::new(Bookings::InviteeEmail).text().not_null())
                    .col(ColumnDef::new(Bookings::InviteeName).text().null())
                    .col(ColumnDef::new(Bookings::InviteeTimezone).text().null())
                    .col(
                        ColumnDef::new(Bookings::BookingStatus)
                            .text()
                            .not_null()
                            .default("new"),
                    )
                    .col(ColumnDef::new(Bookings::AttributionMethod).text().null())
                    .col(ColumnDef::new(Bookings::CancellationReason).text().null())
                    .col(
                        ColumnDef::new(Bookings::RescheduledFromBookingId)
                            .uuid()
                            .null(),
                    )
                    .col(ColumnDef::new(Bookings::MeetingLocation).text().null())
                    .col(ColumnDef::new(Bookings::MeetingUrl).text().null())
                    .col(ColumnDef::new(Bookings::MeetingNotes).text().null())
                    .col(ColumnDef::new(Bookings::Responses).json_binary().null())
                    .col(ColumnDef::new(Bookings::ReceivedVia).text().not_null())
                    .col(ColumnDef::new(Bookings::RawPayload).json_binary().null())
                    .col(
                        ColumnDef::new(Bookings::SyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Bookings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Bookings::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_bookings_lead_id")
                            .from(Bookings::Table, Bookings::LeadId)
                            .to(Leads::Table, Leads::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Composite unique index: the domain idempotency key
        manager
            .create_index(
                Index::create()
                    .name("idx_bookings_provider_event")
                    .table(Bookings::Table)
                    .col(Bookings::ProviderEventId)
                    .col(Bookings::ProviderType)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index for per-workspace listings and stats
        manager
            .create_index(
                Index::create()
                    .name("idx_bookings_workspace_id")
                    .table(Bookings::Table)
                    .col(Bookings::WorkspaceId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_bookings_provider_event").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_bookings_workspace_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Bookings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Bookings {
    Table,
    Id,
    WorkspaceId,
    LeadId,
    WorkflowId,
    OauthCredentialId,
    ProviderType,
    ProviderEventId,
    ProviderEventUri,
    EventName,
    EventStartTime,
    EventEndTime,
    EventDurationMinutes,
    EventTimezone,
    InviteeEmail,
    InviteeName,
    InviteeTimezone,
    BookingStatus,
    AttributionMethod,
    CancellationReason,
    RescheduledFromBookingId,
    MeetingLocation,
    MeetingUrl,
    MeetingNotes,
    Responses,
    ReceivedVia,
    RawPayload,
    SyncedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Leads {
    Table,
    Id,
}
