//! # Booking Repository
//!
//! Database operations for bookings. Uniqueness on
//! (provider_event_id, provider_type) is enforced by the schema; callers
//! treat duplicate inserts as already-ingested events.

use chrono::Utc;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::booking::{ActiveModel, BookingStatus, Column, Entity, Model};

/// Booking counts grouped by lifecycle status
#[derive(Debug, Clone, Default, serde::Serialize, utoipa::ToSchema)]
pub struct BookingStats {
    pub total: u64,
    pub scheduled: u64,
    pub canceled: u64,
    pub rescheduled: u64,
    pub completed: u64,
    pub no_show: u64,
}

/// Repository for booking database operations
pub struct BookingRepository {
    db: Arc<DatabaseConnection>,
}

impl BookingRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find_by_id(id).one(&*self.db).await
    }

    /// Look up a booking by its provider identity.
    pub async fn find_by_provider_event(
        &self,
        provider_type: &str,
        provider_event_id: &str,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(Column::ProviderType.eq(provider_type))
            .filter(Column::ProviderEventId.eq(provider_event_id))
            .one(&*self.db)
            .await
    }

    /// Insert a fully-populated booking row.
    pub async fn insert(&self, model: Model) -> Result<Model, sea_orm::DbErr> {
        Entity::insert(ActiveModel::from(model.clone()))
            .exec_without_returning(&*self.db)
            .await?;
        Ok(model)
    }

    /// Write a new lifecycle status, with optional cancellation detail.
    pub async fn update_status(
        &self,
        id: Uuid,
        status: BookingStatus,
        cancellation_reason: Option<String>,
    ) -> Result<(), sea_orm::DbErr> {
        let now = Utc::now();
        let mut active = ActiveModel {
            id: Set(id),
            ..Default::default()
        };
        active.booking_status = Set(status.as_str().to_string());
        if cancellation_reason.is_some() {
            active.cancellation_reason = Set(cancellation_reason);
        }
        active.synced_at = Set(Some(now.into()));
        active.updated_at = Set(now.into());
        Entity::update(active).exec(&*self.db).await?;
        Ok(())
    }

    /// Stamp a booking as reconciled without changing its status.
    pub async fn touch_synced(&self, id: Uuid) -> Result<(), sea_orm::DbErr> {
        let now = Utc::now();
        let mut active = ActiveModel {
            id: Set(id),
            ..Default::default()
        };
        active.synced_at = Set(Some(now.into()));
        active.updated_at = Set(now.into());
        Entity::update(active).exec(&*self.db).await?;
        Ok(())
    }

    /// Most recent bookings for a workspace.
    pub async fn list_recent(
        &self,
        workspace_id: Uuid,
        limit: u64,
    ) -> Result<Vec<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(Column::WorkspaceId.eq(workspace_id))
            .order_by_desc(Column::CreatedAt)
            .limit(limit)
            .all(&*self.db)
            .await
    }

    /// Booking counts by status for one workspace.
    pub async fn stats_for_workspace(
        &self,
        workspace_id: Uuid,
    ) -> Result<BookingStats, sea_orm::DbErr> {
        let count_status = |status: BookingStatus| {
            Entity::find()
                .filter(Column::WorkspaceId.eq(workspace_id))
                .filter(Column::BookingStatus.eq(status.as_str()))
                .count(&*self.db)
        };

        Ok(BookingStats {
            total: Entity::find()
                .filter(Column::WorkspaceId.eq(workspace_id))
                .count(&*self.db)
                .await?,
            scheduled: count_status(BookingStatus::Scheduled).await?,
            canceled: count_status(BookingStatus::Canceled).await?,
            rescheduled: count_status(BookingStatus::Rescheduled).await?,
            completed: count_status(BookingStatus::Completed).await?,
            no_show: count_status(BookingStatus::NoShow).await?,
        })
    }

    /// Booking counts by status across all workspaces.
    pub async fn stats(&self) -> Result<BookingStats, sea_orm::DbErr> {
        let count_status = |status: BookingStatus| {
            Entity::find()
                .filter(Column::BookingStatus.eq(status.as_str()))
                .count(&*self.db)
        };

        Ok(BookingStats {
            total: Entity::find().count(&*self.db).await?,
            scheduled: count_status(BookingStatus::Scheduled).await?,
            canceled: count_status(BookingStatus::Canceled).await?,
            rescheduled: count_status(BookingStatus::Rescheduled).await?,
            completed: count_status(BookingStatus::Completed).await?,
            no_show: count_status(BookingStatus::NoShow).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_duplicate_key;
    use crate::models::booking::ReceivedVia;
    use crate::models::oauth_credential::ProviderType;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn setup() -> Arc<DatabaseConnection> {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        Arc::new(db)
    }

    fn booking(provider_event_id: &str, lead_id: Uuid) -> Model {
        let now = Utc::now();
        Model {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            lead_id,
            workflow_id: None,
            oauth_credential_id: Uuid::new_v4(),
            provider_type: ProviderType::Calendly.as_str().to_string(),
            provider_event_id: provider_event_id.to_string(),
            provider_event_uri: None,
            event_name: "Intro call".to_string(),
            event_start_time: now.into(),
            event_end_time: (now + chrono::Duration::minutes(30)).into(),
            event_duration_minutes: Some(30),
            event_timezone: None,
            invitee_email: "jane@example.com".to_string(),
            invitee_name: Some("Jane".to_string()),
            invitee_timezone: None,
            booking_status: BookingStatus::Scheduled.as_str().to_string(),
            attribution_method: None,
            cancellation_reason: None,
            rescheduled_from_booking_id: None,
            meeting_location: None,
            meeting_url: None,
            meeting_notes: None,
            responses: None,
            received_via: ReceivedVia::Webhook.as_str().to_string(),
            raw_payload: None,
            synced_at: None,
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    async fn insert_lead(db: &DatabaseConnection) -> Uuid {
        use crate::models::{lead, workflow};
        let now = Utc::now();

        let workflow_id = Uuid::new_v4();
        let workflow = workflow::Model {
            id: workflow_id,
            workspace_id: Uuid::new_v4(),
            name: "Default".to_string(),
            status: "active".to_string(),
            created_at: now.into(),
            updated_at: now.into(),
        };
        workflow::Entity::insert(workflow::ActiveModel::from(workflow))
            .exec_without_returning(db)
            .await
            .unwrap();

        let id = Uuid::new_v4();
        let model = lead::Model {
            id,
            workspace_id: Uuid::new_v4(),
            workflow_id,
            email: "jane@example.com".to_string(),
            name: None,
            status: "NEW".to_string(),
            source: "MANUAL".to_string(),
            meeting_event_id: None,
            meeting_status: None,
            created_at: now.into(),
            updated_at: now.into(),
        };
        lead::Entity::insert(lead::ActiveModel::from(model))
            .exec_without_returning(db)
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn duplicate_provider_event_is_a_unique_violation() {
        let db = setup().await;
        let lead_id = insert_lead(&db).await;
        let repo = BookingRepository::new(Arc::clone(&db));

        repo.insert(booking("EV1", lead_id)).await.unwrap();
        let err = repo.insert(booking("EV1", lead_id)).await.unwrap_err();
        assert!(is_duplicate_key(&err));
    }

    #[tokio::test]
    async fn status_update_persists_cancellation_detail() {
        let db = setup().await;
        let lead_id = insert_lead(&db).await;
        let repo = BookingRepository::new(Arc::clone(&db));

        let created = repo.insert(booking("EV2", lead_id)).await.unwrap();
        repo.update_status(
            created.id,
            BookingStatus::Canceled,
            Some("invitee canceled".to_string()),
        )
        .await
        .unwrap();

        let reloaded = repo.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(reloaded.booking_status, "canceled");
        assert_eq!(
            reloaded.cancellation_reason.as_deref(),
            Some("invitee canceled")
        );
        assert!(reloaded.synced_at.is_some());
    }

    #[tokio::test]
    async fn stats_count_by_status() {
        let db = setup().await;
        let lead_id = insert_lead(&db).await;
        let repo = BookingRepository::new(Arc::clone(&db));

        let first = repo.insert(booking("EV3", lead_id)).await.unwrap();
        repo.insert(booking("EV4", lead_id)).await.unwrap();
        repo.update_status(first.id, BookingStatus::Canceled, None)
            .await
            .unwrap();

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.scheduled, 1);
        assert_eq!(stats.canceled, 1);
    }
}
