//! # Webhook Repository
//!
//! Database operations for webhook idempotency keys and the dead letter
//! queue.

use chrono::{Duration, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::is_duplicate_key;
use crate::models::dead_letter::{self, DlqStatus, MAX_DLQ_RETRIES};
use crate::models::idempotency_key::{self, idempotency_key};

/// Dead letter queue counts for the admin surface
#[derive(Debug, Clone, Default, serde::Serialize, utoipa::ToSchema)]
pub struct DlqStats {
    pub total: u64,
    pub pending: u64,
    pub resolved: u64,
    pub failed: u64,
}

/// Repository for webhook idempotency and dead letter operations
pub struct WebhookRepository {
    db: Arc<DatabaseConnection>,
}

impl WebhookRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Claim a provider event for processing.
    ///
    /// Inserts the `{provider}:{event_id}` key before any side effects run.
    /// Returns `false` when the key already exists, meaning another delivery
    /// of the same event won the race and this one must be dropped.
    pub async fn claim_event(
        &self,
        provider_type: &str,
        event_id: &str,
        workspace_id: Uuid,
        metadata: Option<serde_json::Value>,
    ) -> Result<bool, sea_orm::DbErr> {
        let model = idempotency_key::Model {
            id: Uuid::new_v4(),
            key: idempotency_key(provider_type, event_id),
            provider_type: provider_type.to_string(),
            event_id: event_id.to_string(),
            workspace_id,
            metadata,
            processed_at: Utc::now().into(),
        };

        match idempotency_key::Entity::insert(idempotency_key::ActiveModel::from(model))
            .exec_without_returning(&*self.db)
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_duplicate_key(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Whether an event was already processed.
    pub async fn is_processed(
        &self,
        provider_type: &str,
        event_id: &str,
    ) -> Result<bool, sea_orm::DbErr> {
        let count = idempotency_key::Entity::find()
            .filter(idempotency_key::Column::Key.eq(idempotency_key(provider_type, event_id)))
            .count(&*self.db)
            .await?;
        Ok(count > 0)
    }

    /// Release a claimed event so a later delivery can retry it. Used when
    /// processing fails after the claim.
    pub async fn release_event(
        &self,
        provider_type: &str,
        event_id: &str,
    ) -> Result<(), sea_orm::DbErr> {
        idempotency_key::Entity::delete_many()
            .filter(idempotency_key::Column::Key.eq(idempotency_key(provider_type, event_id)))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// Delete idempotency keys older than the retention window.
    pub async fn delete_keys_older_than(&self, days: u32) -> Result<u64, sea_orm::DbErr> {
        let cutoff = Utc::now() - Duration::days(days as i64);
        let result = idempotency_key::Entity::delete_many()
            .filter(idempotency_key::Column::ProcessedAt.lt(cutoff))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Park a failed webhook delivery in the dead letter queue.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_dead_letter(
        &self,
        workspace_id: Uuid,
        oauth_credential_id: Option<Uuid>,
        provider_type: &str,
        event_type: &str,
        event_id: Option<String>,
        payload: serde_json::Value,
        error_message: &str,
    ) -> Result<dead_letter::Model, sea_orm::DbErr> {
        let model = dead_letter::Model {
            id: Uuid::new_v4(),
            workspace_id,
            oauth_credential_id,
            provider_type: provider_type.to_string(),
            event_type: event_type.to_string(),
            event_id,
            payload,
            error_message: error_message.to_string(),
            status: DlqStatus::Pending.as_str().to_string(),
            retry_count: 0,
            failed_at: Utc::now().into(),
            resolved_at: None,
        };

        dead_letter::Entity::insert(dead_letter::ActiveModel::from(model.clone()))
            .exec_without_returning(&*self.db)
            .await?;
        Ok(model)
    }

    pub async fn find_dead_letter(
        &self,
        id: Uuid,
    ) -> Result<Option<dead_letter::Model>, sea_orm::DbErr> {
        dead_letter::Entity::find_by_id(id).one(&*self.db).await
    }

    /// PENDING entries still under the retry cap, oldest first.
    pub async fn list_retryable(
        &self,
        limit: u64,
    ) -> Result<Vec<dead_letter::Model>, sea_orm::DbErr> {
        dead_letter::Entity::find()
            .filter(dead_letter::Column::Status.eq(DlqStatus::Pending.as_str()))
            .filter(dead_letter::Column::RetryCount.lt(MAX_DLQ_RETRIES))
            .order_by_asc(dead_letter::Column::FailedAt)
            .limit(limit)
            .all(&*self.db)
            .await
    }

    /// Count a replay attempt. Reaching the retry cap moves the entry to
    /// FAILED; it then needs an operator to resolve it.
    pub async fn record_retry(&self, id: Uuid) -> Result<(), sea_orm::DbErr> {
        let Some(entry) = self.find_dead_letter(id).await? else {
            return Ok(());
        };

        let retry_count = entry.retry_count + 1;
        let mut active = dead_letter::ActiveModel {
            id: Set(id),
            ..Default::default()
        };
        active.retry_count = Set(retry_count);
        if retry_count >= MAX_DLQ_RETRIES {
            active.status = Set(DlqStatus::Failed.as_str().to_string());
        }
        dead_letter::Entity::update(active).exec(&*self.db).await?;
        Ok(())
    }

    /// Mark a dead letter RESOLVED and stamp the resolution time.
    pub async fn mark_resolved(&self, id: Uuid) -> Result<(), sea_orm::DbErr> {
        let mut active = dead_letter::ActiveModel {
            id: Set(id),
            ..Default::default()
        };
        active.status = Set(DlqStatus::Resolved.as_str().to_string());
        active.resolved_at = Set(Some(Utc::now().into()));
        dead_letter::Entity::update(active).exec(&*self.db).await?;
        Ok(())
    }

    /// Dead letter counts by status.
    pub async fn dlq_stats(&self) -> Result<DlqStats, sea_orm::DbErr> {
        let count_status = |status: DlqStatus| {
            dead_letter::Entity::find()
                .filter(dead_letter::Column::Status.eq(status.as_str()))
                .count(&*self.db)
        };

        Ok(DlqStats {
            total: dead_letter::Entity::find().count(&*self.db).await?,
            pending: count_status(DlqStatus::Pending).await?,
            resolved: count_status(DlqStatus::Resolved).await?,
            failed: count_status(DlqStatus::Failed).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn setup() -> Arc<DatabaseConnection> {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        Arc::new(db)
    }

    #[tokio::test]
    async fn second_claim_of_same_event_loses() {
        let db = setup().await;
        let repo = WebhookRepository::new(db);
        let workspace_id = Uuid::new_v4();

        assert!(
            repo.claim_event("CALENDLY", "evt-1", workspace_id, None)
                .await
                .unwrap()
        );
        assert!(
            !repo
                .claim_event("CALENDLY", "evt-1", workspace_id, None)
                .await
                .unwrap()
        );
        assert!(repo.is_processed("CALENDLY", "evt-1").await.unwrap());

        // A different event id claims fine.
        assert!(
            repo.claim_event("CALENDLY", "evt-2", workspace_id, None)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn released_event_can_be_claimed_again() {
        let db = setup().await;
        let repo = WebhookRepository::new(db);
        let workspace_id = Uuid::new_v4();

        assert!(
            repo.claim_event("CALENDLY", "evt-1", workspace_id, None)
                .await
                .unwrap()
        );
        repo.release_event("CALENDLY", "evt-1").await.unwrap();
        assert!(
            repo.claim_event("CALENDLY", "evt-1", workspace_id, None)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn retry_cap_moves_entry_to_failed() {
        let db = setup().await;
        let repo = WebhookRepository::new(db);

        let entry = repo
            .insert_dead_letter(
                Uuid::new_v4(),
                None,
                "CALENDLY",
                "invitee.created",
                Some("evt-1".to_string()),
                serde_json::json!({"event": "invitee.created"}),
                "boom",
            )
            .await
            .unwrap();

        for _ in 0..MAX_DLQ_RETRIES {
            assert_eq!(repo.list_retryable(10).await.unwrap().len(), 1);
            repo.record_retry(entry.id).await.unwrap();
        }

        // Cap reached: no longer retryable, status FAILED.
        assert!(repo.list_retryable(10).await.unwrap().is_empty());
        let reloaded = repo.find_dead_letter(entry.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, "FAILED");
        assert_eq!(reloaded.retry_count, MAX_DLQ_RETRIES);
    }

    #[tokio::test]
    async fn resolving_sets_timestamp_and_removes_from_queue() {
        let db = setup().await;
        let repo = WebhookRepository::new(db);

        let entry = repo
            .insert_dead_letter(
                Uuid::new_v4(),
                None,
                "CALENDLY",
                "invitee.canceled",
                None,
                serde_json::json!({}),
                "boom",
            )
            .await
            .unwrap();

        repo.mark_resolved(entry.id).await.unwrap();
        let reloaded = repo.find_dead_letter(entry.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, "RESOLVED");
        assert!(reloaded.resolved_at.is_some());
        assert!(repo.list_retryable(10).await.unwrap().is_empty());

        let stats = repo.dlq_stats().await.unwrap();
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn key_retention_deletes_old_rows() {
        let db = setup().await;
        let repo = WebhookRepository::new(Arc::clone(&db));
        let workspace_id = Uuid::new_v4();

        repo.claim_event("CALENDLY", "old-evt", workspace_id, None)
            .await
            .unwrap();
        repo.claim_event("CALENDLY", "new-evt", workspace_id, None)
            .await
            .unwrap();

        // Age one key past the cutoff.
        let old = idempotency_key::Entity::find()
            .filter(idempotency_key::Column::EventId.eq("old-evt"))
            .one(&*db)
            .await
            .unwrap()
            .unwrap();
        let mut active = idempotency_key::ActiveModel {
            id: Set(old.id),
            ..Default::default()
        };
        active.processed_at = Set((Utc::now() - Duration::days(10)).into());
        idempotency_key::Entity::update(active)
            .exec(&*db)
            .await
            .unwrap();

        let removed = repo.delete_keys_older_than(7).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!repo.is_processed("CALENDLY", "old-evt").await.unwrap());
        assert!(repo.is_processed("CALENDLY", "new-evt").await.unwrap());
    }
}
