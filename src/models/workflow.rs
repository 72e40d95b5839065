//! Workflow entity model
//!
//! Collaborator table: the booking core only reads workflows to find a
//! default for unmatched bookings (most recent active-or-draft).

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Workflow statuses eligible to receive unmatched-booking leads.
pub const ELIGIBLE_WORKFLOW_STATUSES: &[&str] = &["active", "draft"];

/// Workflow entity
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "workflows")]
pub struct Model {
    /// Unique identifier for the workflow (primary key)
    #[sea_orm(primary_key)]
    pub id: Uuid,

    /// Workspace the workflow belongs to
    pub workspace_id: Uuid,

    /// Workflow name
    pub name: String,

    /// Workflow status (active, draft, archived)
    pub status: String,

    /// Timestamp when the workflow was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the workflow was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
