//! Lead entity model
//!
//! CRM lead record. The booking core only touches the meeting pointer and
//! status fields, or creates a lead through the unmatched-booking fallback.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Lead status values written by the booking core. Other CRM statuses exist
/// but are owned elsewhere; the core only sets these two.
pub const LEAD_STATUS_NEW: &str = "NEW";
pub const LEAD_STATUS_BOOKED: &str = "BOOKED";

/// Lead source used for leads materialized from unmatched bookings.
pub const LEAD_SOURCE_MANUAL: &str = "MANUAL";

/// Lead entity representing a CRM contact
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "leads")]
pub struct Model {
    /// Unique identifier for the lead (primary key)
    #[sea_orm(primary_key)]
    pub id: Uuid,

    /// Workspace the lead belongs to
    pub workspace_id: Uuid,

    /// Workflow the lead was created under
    pub workflow_id: Uuid,

    /// Normalized (lowercased) email address
    pub email: String,

    /// Display name
    pub name: Option<String>,

    /// CRM status (e.g. NEW, BOOKED)
    pub status: String,

    /// Acquisition source
    pub source: String,

    /// Provider event id of the lead's current meeting
    pub meeting_event_id: Option<String>,

    /// Status of the lead's current meeting (booking status string)
    pub meeting_status: Option<String>,

    /// Timestamp when the lead was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the lead was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::booking::Entity")]
    Booking,
}

impl Related<super::booking::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Booking.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
