//! Migration to create the oauth_credentials table.
//!
//! One row per (workspace, provider): OAuth tokens, plan tier, webhook
//! registration state, polling registration state, and a rate-limit snapshot.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OauthCredentials::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OauthCredentials::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(OauthCredentials::WorkspaceId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OauthCredentials::ProviderType)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OauthCredentials::ProviderEmail).text().null())
                    .col(ColumnDef::new(OauthCredentials::ProviderPlan).text().null())
                    .col(ColumnDef::new(OauthCredentials::AccessToken).text().null())
                    .col(ColumnDef::new(OauthCredentials::RefreshToken).text().null())
                    .col(
                        ColumnDef::new(OauthCredentials::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(OauthCredentials::WebhookUrl).text().null())
                    .col(
                        ColumnDef::new(OauthCredentials::WebhookSigningKey)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OauthCredentials::WebhookEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(OauthCredentials::WebhookFailedAttempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(OauthCredentials::WebhookLastVerifiedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OauthCredentials::PollingEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(OauthCredentials::PollingLastRunAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(OauthCredentials::PollingCursor).text().null())
                    .col(
                        ColumnDef::new(OauthCredentials::ApiRateLimitRemaining)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OauthCredentials::ApiRateLimitResetAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OauthCredentials::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(OauthCredentials::Metadata)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OauthCredentials::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(OauthCredentials::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // One credential per (workspace, provider)
        manager
            .create_index(
                Index::create()
                    .name("idx_oauth_credentials_workspace_provider")
                    .table(OauthCredentials::Table)
                    .col(OauthCredentials::WorkspaceId)
                    .col(OauthCredentials::ProviderType)
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
                    .name("idx_oauth_credentials_workspace_provider")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(OauthCredentials::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum OauthCredentials {
    Table,
    Id,
    WorkspaceId,
    ProviderType,
    ProviderEmail,
    ProviderPlan,
    AccessToken,
    RefreshToken,
    ExpiresAt,
    WebhookUrl,
    WebhookSigningKey,
    WebhookEnabled,
    WebhookFailedAttempts,
    WebhookLastVerifiedAt,
    PollingEnabled,
    PollingLastRunAt,
    PollingCursor,
    ApiRateLimitRemaining,
    ApiRateLimitResetAt,
    IsActive,
    Metadata,
    CreatedAt,
    UpdatedAt,
}
