//! Migration to create the webhook_idempotency_keys table.
//!
//! A row here means the event has been applied; the unique index on the key
//! makes the insert the commit point for webhook processing.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WebhookIdempotencyKeys::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WebhookIdempotencyKeys::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(WebhookIdempotencyKeys::Key).text().not_null())
                    .col(
                        ColumnDef::new(WebhookIdempotencyKeys::ProviderType)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookIdempotencyKeys::EventId)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookIdempotencyKeys::WorkspaceId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookIdempotencyKeys::Metadata)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WebhookIdempotencyKeys::ProcessedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_webhook_idempotency_keys_key")
                    .table(WebhookIdempotencyKeys::Table)
                    .col(WebhookIdempotencyKeys::Key)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_webhook_idempotency_keys_key")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(
                Table::drop()
                    .table(WebhookIdempotencyKeys::Table)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum WebhookIdempotencyKeys {
    Table,
    Id,
    Key,
    ProviderType,
    EventId,
    WorkspaceId,
    Metadata,
    ProcessedAt,
}
