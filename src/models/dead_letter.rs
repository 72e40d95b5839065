//! WebhookDeadLetter entity model
//!
//! Failed webhook deliveries land here with their full payload so they can
//! be replayed. Automatic retries stop after [`MAX_DLQ_RETRIES`]; anything
//! past that needs an operator.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Retry cap for dead-lettered events.
pub const MAX_DLQ_RETRIES: i32 = 3;

/// Dead letter lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DlqStatus {
    Pending,
    Resolved,
    Failed,
}

impl DlqStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DlqStatus::Pending => "PENDING",
            DlqStatus::Resolved => "RESOLVED",
            DlqStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for DlqStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DlqStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PENDING" => Ok(DlqStatus::Pending),
            "RESOLVED" => Ok(DlqStatus::Resolved),
            "FAILED" => Ok(DlqStatus::Failed),
            other => Err(format!("unknown dead letter status: {other}")),
        }
    }
}

/// WebhookDeadLetter entity holding a failed webhook delivery
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "webhook_dead_letters")]
pub struct Model {
    /// Unique identifier for the dead letter (primary key)
    #[sea_orm(primary_key)]
    pub id: Uuid,

    /// Workspace the delivery targeted
    pub workspace_id: Uuid,

    /// Credential the delivery arrived on
    pub oauth_credential_id: Option<Uuid>,

    /// Provider identifier
    pub provider_type: String,

    /// Provider event name (e.g. invitee.created)
    pub event_type: String,

    /// Provider-assigned event identifier, if one could be extracted
    pub event_id: Option<String>,

    /// Full webhook payload as received
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: JsonValue,

    /// Error message from the failed processing attempt
    pub error_message: String,

    /// Lifecycle status (see [`DlqStatus`])
    pub status: String,

    /// Replay attempts so far
    pub retry_count: i32,

    /// When the original processing attempt failed
    pub failed_at: DateTimeWithTimeZone,

    /// When an operator resolved the entry
    pub resolved_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
