//! Booking entity model
//!
//! This module contains the SeaORM entity model for the bookings table and
//! the booking status state machine. A booking row exists once per
//! (provider_event_id, provider_type); after creation only status and
//! metadata fields are mutated.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::lead::Entity as Lead;

/// Booking lifecycle status.
///
/// Transitions are explicit; `can_transition_to` is the single source of
/// truth and callers must not write a status that it rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    New,
    Scheduled,
    Canceled,
    Rescheduled,
    Completed,
    NoShow,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::New => "new",
            BookingStatus::Scheduled => "scheduled",
            BookingStatus::Canceled => "canceled",
            BookingStatus::Rescheduled => "rescheduled",
            BookingStatus::Completed => "completed",
            BookingStatus::NoShow => "no_show",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Same-state writes are allowed (idempotent reconciliation);
    /// canceled/completed/no_show are terminal.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        if *self == next {
            return true;
        }

        match self {
            BookingStatus::New => matches!(next, BookingStatus::Scheduled),
            BookingStatus::Scheduled => matches!(
                next,
                BookingStatus::Canceled
                    | BookingStatus::Rescheduled
                    | BookingStatus::Completed
                    | BookingStatus::NoShow
            ),
            BookingStatus::Rescheduled => {
                matches!(next, BookingStatus::Scheduled | BookingStatus::Canceled)
            }
            BookingStatus::Canceled | BookingStatus::Completed | BookingStatus::NoShow => false,
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "new" => Ok(BookingStatus::New),
            "scheduled" => Ok(BookingStatus::Scheduled),
            "canceled" => Ok(BookingStatus::Canceled),
            "rescheduled" => Ok(BookingStatus::Rescheduled),
            "completed" => Ok(BookingStatus::Completed),
            "no_show" => Ok(BookingStatus::NoShow),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

/// Ingestion channel a booking arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceivedVia {
    Webhook,
    Polling,
}

impl ReceivedVia {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceivedVia::Webhook => "WEBHOOK",
            ReceivedVia::Polling => "POLLING",
        }
    }
}

impl std::fmt::Display for ReceivedVia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the booking was attributed to a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributionMethod {
    Utm,
    HiddenField,
    Manual,
}

impl AttributionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributionMethod::Utm => "UTM",
            AttributionMethod::HiddenField => "HIDDEN_FIELD",
            AttributionMethod::Manual => "MANUAL",
        }
    }
}

/// Booking entity representing one provider scheduling event
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "bookings")]
pub struct Model {
    /// Unique identifier for the booking (primary key)
    #[sea_orm(primary_key)]
    pub id: Uuid,

    /// Workspace the booking belongs to
    pub workspace_id: Uuid,

    /// Lead this booking is attributed to
    pub lead_id: Uuid,

    /// Workflow context, if any
    pub workflow_id: Option<Uuid>,

    /// Credential that ingested this booking
    pub oauth_credential_id: Uuid,

    /// Provider identifier; with provider_event_id forms the idempotency key
    pub provider_type: String,

    /// Provider-assigned event identifier
    pub provider_event_id: String,

    /// Provider event URI
    pub provider_event_uri: Option<String>,

    /// Event type name as shown to invitees
    pub event_name: String,

    /// Scheduled start time
    pub event_start_time: DateTimeWithTimeZone,

    /// Scheduled end time
    pub event_end_time: DateTimeWithTimeZone,

    /// Duration in minutes
    pub event_duration_minutes: Option<i32>,

    /// Event timezone name
    pub event_timezone: Option<String>,

    /// Invitee email as provided
    pub invitee_email: String,

    /// Invitee display name
    pub invitee_name: Option<String>,

    /// Invitee timezone name
    pub invitee_timezone: Option<String>,

    /// Lifecycle status (see [`BookingStatus`])
    pub booking_status: String,

    /// Attribution method used, if attributed (see [`AttributionMethod`])
    pub attribution_method: Option<String>,

    /// Reason supplied with a cancellation
    pub cancellation_reason: Option<String>,

    /// Booking this one was rescheduled from
    pub rescheduled_from_booking_id: Option<Uuid>,

    /// Meeting location description
    pub meeting_location: Option<String>,

    /// Meeting join URL
    pub meeting_url: Option<String>,

    /// Free-form notes
    pub meeting_notes: Option<String>,

    /// Invitee questionnaire responses
    #[sea_orm(column_type = "JsonBinary")]
    pub responses: Option<JsonValue>,

    /// Ingestion channel (see [`ReceivedVia`])
    pub received_via: String,

    /// Raw provider payload for auditing
    #[sea_orm(column_type = "JsonBinary")]
    pub raw_payload: Option<JsonValue>,

    /// When the booking was last synchronized from the provider
    pub synced_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the booking was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the booking was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Lead",
        from = "Column::LeadId",
        to = "super::lead::Column::Id"
    )]
    Lead,
}

impl Related<Lead> for Entity {
    fn to() -> RelationDef {
        Relation::Lead.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            BookingStatus::New,
            BookingStatus::Scheduled,
            BookingStatus::Canceled,
            BookingStatus::Rescheduled,
            BookingStatus::Completed,
            BookingStatus::NoShow,
        ] {
            assert_eq!(BookingStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(BookingStatus::from_str("pending").is_err());
    }

    #[test]
    fn scheduled_allows_all_outcomes() {
        let from = BookingStatus::Scheduled;
        assert!(from.can_transition_to(BookingStatus::Canceled));
        assert!(from.can_transition_to(BookingStatus::Rescheduled));
        assert!(from.can_transition_to(BookingStatus::Completed));
        assert!(from.can_transition_to(BookingStatus::NoShow));
        assert!(!from.can_transition_to(BookingStatus::New));
    }

    #[test]
    fn terminal_states_reject_reopening() {
        assert!(!BookingStatus::Completed.can_transition_to(BookingStatus::Scheduled));
        assert!(!BookingStatus::Canceled.can_transition_to(BookingStatus::Scheduled));
        assert!(!BookingStatus::NoShow.can_transition_to(BookingStatus::Scheduled));
    }

    #[test]
    fn same_state_writes_are_allowed() {
        assert!(BookingStatus::Canceled.can_transition_to(BookingStatus::Canceled));
        assert!(BookingStatus::Scheduled.can_transition_to(BookingStatus::Scheduled));
    }

    #[test]
    fn rescheduled_can_return_to_scheduled() {
        assert!(BookingStatus::Rescheduled.can_transition_to(BookingStatus::Scheduled));
        assert!(BookingStatus::Rescheduled.can_transition_to(BookingStatus::Canceled));
        assert!(!BookingStatus::Rescheduled.can_transition_to(BookingStatus::Completed));
    }
}
