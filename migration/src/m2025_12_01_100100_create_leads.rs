//! Migration to create the leads table.
//!
//! Leads are the CRM records bookings are attributed to. The booking core
//! creates leads only through the unmatched-booking fallback and otherwise
//! updates the meeting pointer/status fields.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Leads::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Leads::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Leads::WorkspaceId).uuid().not_null())
                    .col(ColumnDef::new(Leads::WorkflowId).uuid().not_null())
                    .col(ColumnDef::new(Leads::Email).text().not_null())
                    .col(ColumnDef::new(Leads::Name).text().null())
                    .col(
                        ColumnDef::new(Leads::Status)
                            .text()
                            .not_null()
                            .default("NEW"),
                    )
                    .col(
                        ColumnDef::new(Leads::Source)
                            .text()
                            .not_null()
                            .default("MANUAL"),
                    )
                    .col(ColumnDef::new(Leads::MeetingEventId).text().null())
                    .col(ColumnDef::new(Leads::MeetingStatus).text().null())
                    .col(
                        ColumnDef::new(Leads::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Leads::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_leads_workflow_id")
                            .from(Leads::Table, Leads::WorkflowId)
                            .to(Workflows::Table, Workflows::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Index for email-based attribution lookups
        manager
            .create_index(
                Index::create()
                    .name("idx_leads_workspace_email")
                    .table(Leads::Table)
                    .col(Leads::WorkspaceId)
                    .col(Leads::Email)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_leads_workspace_email").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Leads::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Leads {
    Table,
    Id,
    WorkspaceId,
    WorkflowId,
    Email,
    Name,
    Status,
    Source,
    MeetingEventId,
    MeetingStatus,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Workflows {
    Table,
    Id,
}
