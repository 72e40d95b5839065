//! Migration to create the webhook_dead_letters table.
//!
//! Failed webhook events with full context, kept for inspection and bounded
//! manual retry.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WebhookDeadLetters::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WebhookDeadLetters::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WebhookDeadLetters::WorkspaceId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookDeadLetters::OauthCredentialId)
                            .uuid()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WebhookDeadLetters::ProviderType)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WebhookDeadLetters::EventType).text().not_null())
                    .col(ColumnDef::new(WebhookDeadLetters::EventId).text().null())
                    .col(
                        ColumnDef::new(WebhookDeadLetters::Payload)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookDeadLetters::ErrorMessage)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookDeadLetters::Status)
                            .text()
                            .not_null()
                            .default("PENDING"),
                    )
                    .col(
                        ColumnDef::new(WebhookDeadLetters::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WebhookDeadLetters::FailedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WebhookDeadLetters::ResolvedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Index for "pending for retry" queries
        manager
            .create_index(
                Index::create()
                    .name("idx_webhook_dead_letters_status")
                    .table(WebhookDeadLetters::Table)
                    .col(WebhookDeadLetters::Status)
                    .col(WebhookDeadLetters::RetryCount)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_webhook_dead_letters_status")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(WebhookDeadLetters::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WebhookDeadLetters {
    Table,
    Id,
    WorkspaceId,
    OauthCredentialId,
    ProviderType,
    EventType,
    EventId,
    ErrorMessage,
    Payload,
    Status,
    RetryCount,
    FailedAt,
    ResolvedAt,
}
