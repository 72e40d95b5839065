//! BookingPollingJob entity model
//!
//! Append-only execution records for poll runs. Rows are finalized exactly
//! once and pruned after 30 days.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Poll job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollJobStatus {
    Running,
    Completed,
    Failed,
}

impl PollJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollJobStatus::Running => "RUNNING",
            PollJobStatus::Completed => "COMPLETED",
            PollJobStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for PollJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PollJobStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "RUNNING" => Ok(PollJobStatus::Running),
            "COMPLETED" => Ok(PollJobStatus::Completed),
            "FAILED" => Ok(PollJobStatus::Failed),
            other => Err(format!("unknown poll job status: {other}")),
        }
    }
}

/// BookingPollingJob entity representing a single poll attempt
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "booking_polling_jobs")]
pub struct Model {
    /// Unique identifier for the job (primary key)
    #[sea_orm(primary_key)]
    pub id: Uuid,

    /// Workspace the polled credential belongs to
    pub workspace_id: Uuid,

    /// Credential that was polled
    pub oauth_credential_id: Uuid,

    /// Job status (see [`PollJobStatus`])
    pub status: String,

    /// Events returned by the provider
    pub events_fetched: i32,

    /// Bookings created during the run
    pub events_created: i32,

    /// Bookings whose status was reconciled
    pub events_updated: i32,

    /// Events skipped (e.g. rate-limited)
    pub events_skipped: i32,

    /// Wall-clock duration of the run
    pub duration_ms: Option<i64>,

    /// Error message if the run failed
    pub error_message: Option<String>,

    /// Structured error detail if the run failed
    #[sea_orm(column_type = "JsonBinary")]
    pub error_details: Option<JsonValue>,

    /// When the run started
    pub started_at: DateTimeWithTimeZone,

    /// When the run finished
    pub completed_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
