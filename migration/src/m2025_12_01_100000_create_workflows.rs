//! Migration to create the workflows table.
//!
//! Workflows are the CRM container leads belong to; the booking core only
//! reads them to pick a default workflow for unmatched bookings.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Workflows::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Workflows::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Workflows::WorkspaceId).uuid().not_null())
                    .col(ColumnDef::new(Workflows::Name).text().not_null())
                    .col(
                        ColumnDef::new(Workflows::Status)
                            .text()
                            .not_null()
                            .default("draft"),
                    )
                    .col(
                        ColumnDef::new(Workflows::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Workflows::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Index for default-workflow lookup (workspace + status, newest first)
        manager
            .create_index(
                Index::create()
                    .name("idx_workflows_workspace_status")
                    .table(Workflows::Table)
                    .col(Workflows::WorkspaceId)
                    .col(Workflows::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_workflows_workspace_status")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Workflows::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Workflows {
    Table,
    Id,
    WorkspaceId,
    Name,
    Status,
    CreatedAt,
    UpdatedAt,
}
