//! WebhookIdempotencyKey entity model
//!
//! One row per processed provider event. Insertion happens before any side
//! effects; a unique-key conflict means the event was already handled.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Builds the canonical idempotency key for a provider event.
pub fn idempotency_key(provider_type: &str, event_id: &str) -> String {
    format!("{provider_type}:{event_id}")
}

/// WebhookIdempotencyKey entity marking a provider event as processed
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "webhook_idempotency_keys")]
pub struct Model {
    /// Unique identifier for the record (primary key)
    #[sea_orm(primary_key)]
    pub id: Uuid,

    /// Canonical key, `{provider}:{event_id}` (unique)
    pub key: String,

    /// Provider identifier
    pub provider_type: String,

    /// Provider-assigned event identifier
    pub event_id: String,

    /// Workspace the event was processed for
    pub workspace_id: Uuid,

    /// Optional context captured at processing time
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: Option<JsonValue>,

    /// When the event was processed
    pub processed_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format_is_provider_colon_event() {
        assert_eq!(
            idempotency_key("CALENDLY", "evt-123"),
            "CALENDLY:evt-123".to_string()
        );
    }
}
