//! # Credential Repository
//!
//! Database operations for provider OAuth credentials, including webhook
//! health counters and polling bookkeeping.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::oauth_credential::{
    ActiveModel, Column, Entity, Model, PlanTier, ProviderType,
};

/// Consecutive webhook verification failures after which delivery is disabled.
pub const WEBHOOK_DISABLE_THRESHOLD: i32 = 10;

/// Token material written on connect and refresh
#[derive(Debug, Clone)]
pub struct TokenUpdate {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Repository for OAuth credential database operations
pub struct CredentialRepository {
    db: Arc<DatabaseConnection>,
}

impl CredentialRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a credential by primary key.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find_by_id(id).one(&*self.db).await
    }

    /// Find the Calendly credential for a workspace, active or not.
    pub async fn find_by_workspace(
        &self,
        workspace_id: Uuid,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(Column::WorkspaceId.eq(workspace_id))
            .filter(Column::ProviderType.eq(ProviderType::Calendly.as_str()))
            .one(&*self.db)
            .await
    }

    /// All active FREE-plan credentials with polling enabled.
    pub async fn find_pollable(&self) -> Result<Vec<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(Column::ProviderType.eq(ProviderType::Calendly.as_str()))
            .filter(Column::IsActive.eq(true))
            .filter(Column::PollingEnabled.eq(true))
            .filter(Column::ProviderPlan.eq(PlanTier::Free.as_str()))
            .all(&*self.db)
            .await
    }

    /// Insert or update the workspace's Calendly credential from a completed
    /// OAuth flow. Reconnecting reuses the existing row so bookings keep
    /// their credential reference.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_from_oauth(
        &self,
        workspace_id: Uuid,
        tokens: TokenUpdate,
        provider_email: Option<String>,
        plan: PlanTier,
        metadata: Option<serde_json::Value>,
    ) -> Result<Model, sea_orm::DbErr> {
        let now = Utc::now();

        if let Some(existing) = self.find_by_workspace(workspace_id).await? {
            let mut active: ActiveModel = existing.into();
            active.access_token = Set(Some(tokens.access_token));
            active.refresh_token = Set(Some(tokens.refresh_token));
            active.expires_at = Set(Some(tokens.expires_at.into()));
            active.provider_email = Set(provider_email);
            active.provider_plan = Set(Some(plan.as_str().to_string()));
            active.is_active = Set(true);
            if let Some(metadata) = metadata {
                active.metadata = Set(Some(metadata));
            }
            active.updated_at = Set(now.into());
            return active.update(&*self.db).await;
        }

        let model = Model {
            id: Uuid::new_v4(),
            workspace_id,
            provider_type: ProviderType::Calendly.as_str().to_string(),
            provider_email,
            provider_plan: Some(plan.as_str().to_string()),
            access_token: Some(tokens.access_token),
            refresh_token: Some(tokens.refresh_token),
            expires_at: Some(tokens.expires_at.into()),
            webhook_url: None,
            webhook_signing_key: None,
            webhook_enabled: false,
            webhook_failed_attempts: 0,
            webhook_last_verified_at: None,
            polling_enabled: false,
            polling_last_run_at: None,
            polling_cursor: None,
            api_rate_limit_remaining: None,
            api_rate_limit_reset_at: None,
            is_active: true,
            metadata,
            created_at: now.into(),
            updated_at: now.into(),
        };

        Entity::insert(ActiveModel::from(model.clone()))
            .exec_without_returning(&*self.db)
            .await?;
        Ok(model)
    }

    /// Replace token material after a refresh.
    pub async fn update_tokens(
        &self,
        id: Uuid,
        tokens: TokenUpdate,
    ) -> Result<(), sea_orm::DbErr> {
        let mut active = ActiveModel {
            id: Set(id),
            ..Default::default()
        };
        active.access_token = Set(Some(tokens.access_token));
        active.refresh_token = Set(Some(tokens.refresh_token));
        active.expires_at = Set(Some(tokens.expires_at.into()));
        active.updated_at = Set(Utc::now().into());
        Entity::update(active).exec(&*self.db).await?;
        Ok(())
    }

    /// Deactivate a credential. Rows are never deleted so booking references
    /// stay intact.
    pub async fn deactivate(&self, id: Uuid) -> Result<(), sea_orm::DbErr> {
        let mut active = ActiveModel {
            id: Set(id),
            ..Default::default()
        };
        active.is_active = Set(false);
        active.updated_at = Set(Utc::now().into());
        Entity::update(active).exec(&*self.db).await?;
        Ok(())
    }

    /// Record webhook registration details for a PRO credential.
    ///
    /// Exactly one ingestion mode may be enabled, so switching to webhooks
    /// turns polling off and discards any stored cursor: a workspace that
    /// later drops back to FREE starts with a fresh look-back scan.
    pub async fn set_webhook_registration(
        &self,
        id: Uuid,
        webhook_url: &str,
        signing_key: Option<String>,
    ) -> Result<(), sea_orm::DbErr> {
        let mut active = ActiveModel {
            id: Set(id),
            ..Default::default()
        };
        active.webhook_url = Set(Some(webhook_url.to_string()));
        active.webhook_signing_key = Set(signing_key);
        active.webhook_enabled = Set(true);
        active.webhook_failed_attempts = Set(0);
        active.polling_enabled = Set(false);
        active.polling_cursor = Set(None);
        active.updated_at = Set(Utc::now().into());
        Entity::update(active).exec(&*self.db).await?;
        Ok(())
    }

    /// Enable polling for a FREE credential, turning webhook delivery off.
    pub async fn enable_polling(&self, id: Uuid) -> Result<(), sea_orm::DbErr> {
        let mut active = ActiveModel {
            id: Set(id),
            ..Default::default()
        };
        active.polling_enabled = Set(true);
        active.webhook_enabled = Set(false);
        active.updated_at = Set(Utc::now().into());
        Entity::update(active).exec(&*self.db).await?;
        Ok(())
    }

    /// Record a successful webhook verification: the failure streak resets.
    pub async fn record_webhook_success(&self, id: Uuid) -> Result<(), sea_orm::DbErr> {
        let now = Utc::now();
        let mut active = ActiveModel {
            id: Set(id),
            ..Default::default()
        };
        active.webhook_failed_attempts = Set(0);
        active.webhook_last_verified_at = Set(Some(now.into()));
        active.updated_at = Set(now.into());
        Entity::update(active).exec(&*self.db).await?;
        Ok(())
    }

    /// Record a failed webhook verification. Crossing the threshold disables
    /// webhook delivery for the credential; returns whether it did.
    pub async fn record_webhook_failure(&self, id: Uuid) -> Result<bool, sea_orm::DbErr> {
        let Some(credential) = self.find_by_id(id).await? else {
            return Ok(false);
        };

        let failed_attempts = credential.webhook_failed_attempts + 1;
        let disable = failed_attempts >= WEBHOOK_DISABLE_THRESHOLD;

        let mut active: ActiveModel = credential.into();
        active.webhook_failed_attempts = Set(failed_attempts);
        if disable {
            active.webhook_enabled = Set(false);
        }
        active.updated_at = Set(Utc::now().into());
        active.update(&*self.db).await?;

        Ok(disable)
    }

    /// Persist polling progress: the cursor for the next run (None after the
    /// last page) and the completion stamp.
    pub async fn update_polling_state(
        &self,
        id: Uuid,
        cursor: Option<String>,
        last_run_at: DateTime<Utc>,
    ) -> Result<(), sea_orm::DbErr> {
        let mut active = ActiveModel {
            id: Set(id),
            ..Default::default()
        };
        active.polling_cursor = Set(cursor);
        active.polling_last_run_at = Set(Some(last_run_at.into()));
        active.updated_at = Set(Utc::now().into());
        Entity::update(active).exec(&*self.db).await?;
        Ok(())
    }

    /// Store the latest rate-limit snapshot from provider response headers.
    pub async fn update_rate_limit(
        &self,
        id: Uuid,
        remaining: Option<i32>,
        reset_at: Option<DateTime<Utc>>,
    ) -> Result<(), sea_orm::DbErr> {
        let mut active = ActiveModel {
            id: Set(id),
            ..Default::default()
        };
        active.api_rate_limit_remaining = Set(remaining);
        active.api_rate_limit_reset_at = Set(reset_at.map(Into::into));
        active.updated_at = Set(Utc::now().into());
        Entity::update(active).exec(&*self.db).await?;
        Ok(())
    }
}

/// Local budget check against the last stored rate-limit snapshot.
///
/// Missing snapshot data is treated as permission to call: the provider is
/// the authority and will answer 429 if we are wrong.
pub fn has_rate_limit_budget(credential: &Model) -> bool {
    let Some(remaining) = credential.api_rate_limit_remaining else {
        return true;
    };
    if let Some(reset_at) = credential.api_rate_limit_reset_at
        && reset_at < Utc::now()
    {
        return true;
    }
    remaining > 0
}
