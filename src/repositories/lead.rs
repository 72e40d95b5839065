//! # Lead Repository
//!
//! Database operations for CRM leads as seen by the booking core:
//! attribution lookups, meeting-pointer updates, and the unmatched-booking
//! fallback insert.

use chrono::Utc;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::booking::BookingStatus;
use crate::models::lead::{
    ActiveModel, Column, Entity, LEAD_SOURCE_MANUAL, LEAD_STATUS_BOOKED, LEAD_STATUS_NEW, Model,
};

/// Repository for lead database operations
pub struct LeadRepository {
    db: Arc<DatabaseConnection>,
}

impl LeadRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find_by_id(id).one(&*self.db).await
    }

    /// Find a lead by id within a workspace. Used by UTM attribution, where
    /// the id came from an untrusted tracking field.
    pub async fn find_in_workspace(
        &self,
        workspace_id: Uuid,
        lead_id: Uuid,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find_by_id(lead_id)
            .filter(Column::WorkspaceId.eq(workspace_id))
            .one(&*self.db)
            .await
    }

    /// Most recently created lead matching the email (exact, caller
    /// lowercases) within a workspace.
    pub async fn find_most_recent_by_email(
        &self,
        workspace_id: Uuid,
        email: &str,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(Column::WorkspaceId.eq(workspace_id))
            .filter(Column::Email.eq(email))
            .order_by_desc(Column::CreatedAt)
            .one(&*self.db)
            .await
    }

    /// Create a lead for a booking that matched nothing, parked under the
    /// workspace's default workflow.
    pub async fn create_unmatched(
        &self,
        workspace_id: Uuid,
        workflow_id: Uuid,
        email: &str,
        name: Option<String>,
    ) -> Result<Model, sea_orm::DbErr> {
        let now = Utc::now();
        let model = Model {
            id: Uuid::new_v4(),
            workspace_id,
            workflow_id,
            email: email.to_lowercase(),
            name,
            status: LEAD_STATUS_NEW.to_string(),
            source: LEAD_SOURCE_MANUAL.to_string(),
            meeting_event_id: None,
            meeting_status: None,
            created_at: now.into(),
            updated_at: now.into(),
        };

        Entity::insert(ActiveModel::from(model.clone()))
            .exec_without_returning(&*self.db)
            .await?;
        Ok(model)
    }

    /// Point the lead at a booking's provider event and mirror the booking
    /// status. The lead is promoted to BOOKED only while the meeting is
    /// scheduled.
    pub async fn update_meeting(
        &self,
        lead_id: Uuid,
        provider_event_id: &str,
        booking_status: BookingStatus,
    ) -> Result<(), sea_orm::DbErr> {
        let mut active = ActiveModel {
            id: Set(lead_id),
            ..Default::default()
        };
        active.meeting_event_id = Set(Some(provider_event_id.to_string()));
        active.meeting_status = Set(Some(booking_status.as_str().to_string()));
        if booking_status == BookingStatus::Scheduled {
            active.status = Set(LEAD_STATUS_BOOKED.to_string());
        }
        active.updated_at = Set(Utc::now().into());
        Entity::update(active).exec(&*self.db).await?;
        Ok(())
    }
}
