//! # Workflow Repository
//!
//! Read-only access to workflows for the unmatched-booking fallback.

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::workflow::{Column, ELIGIBLE_WORKFLOW_STATUSES, Entity, Model};

/// Repository for workflow database operations
pub struct WorkflowRepository {
    db: Arc<DatabaseConnection>,
}

impl WorkflowRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Most recently created active-or-draft workflow for a workspace.
    ///
    /// `None` means the workspace cannot receive unmatched bookings and the
    /// caller must fail the event.
    pub async fn find_default_for_workspace(
        &self,
        workspace_id: Uuid,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(Column::WorkspaceId.eq(workspace_id))
            .filter(Column::Status.is_in(ELIGIBLE_WORKFLOW_STATUSES.iter().copied()))
            .order_by_desc(Column::CreatedAt)
            .one(&*self.db)
            .await
    }
}
