//! OAuthCredential entity model
//!
//! This module contains the SeaORM entity model for the oauth_credentials
//! table, which stores one provider authorization per workspace, including
//! webhook and polling registration state.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Provider identifier for booking credentials.
///
/// Calendly is the only provider today; the enum keeps dispatch on provider
/// names closed rather than stringly-typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    Calendly,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Calendly => "CALENDLY",
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "CALENDLY" => Ok(ProviderType::Calendly),
            other => Err(format!("unknown provider type: {other}")),
        }
    }
}

/// Provider-side account class that decides the ingestion channel.
///
/// PRO accounts can receive webhooks; FREE accounts fall back to polling.
/// A credential is always exactly one of the two, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanTier {
    Pro,
    Free,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Pro => "PRO",
            PlanTier::Free => "FREE",
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PlanTier {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PRO" => Ok(PlanTier::Pro),
            "FREE" => Ok(PlanTier::Free),
            other => Err(format!("unknown plan tier: {other}")),
        }
    }
}

/// OAuthCredential entity representing a workspace's provider authorization
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "oauth_credentials")]
pub struct Model {
    /// Unique identifier for the credential (primary key)
    #[sea_orm(primary_key)]
    pub id: Uuid,

    /// Workspace that owns this credential
    pub workspace_id: Uuid,

    /// Provider identifier (see [`ProviderType`])
    pub provider_type: String,

    /// Email reported by the provider account
    pub provider_email: Option<String>,

    /// Plan tier reported by the provider (see [`PlanTier`])
    pub provider_plan: Option<String>,

    /// Current OAuth access token
    pub access_token: Option<String>,

    /// OAuth refresh token, if the provider issued one
    pub refresh_token: Option<String>,

    /// Access token expiry
    pub expires_at: Option<DateTimeWithTimeZone>,

    /// Registered webhook callback URL (PRO accounts)
    pub webhook_url: Option<String>,

    /// Signing key returned by the webhook subscription
    pub webhook_signing_key: Option<String>,

    /// Whether webhook delivery is currently enabled
    pub webhook_enabled: bool,

    /// Consecutive webhook verification failures
    pub webhook_failed_attempts: i32,

    /// Last successful webhook verification
    pub webhook_last_verified_at: Option<DateTimeWithTimeZone>,

    /// Whether polling ingestion is enabled (FREE accounts)
    pub polling_enabled: bool,

    /// Last completed poll run
    pub polling_last_run_at: Option<DateTimeWithTimeZone>,

    /// Opaque provider pagination cursor; None means start from look-back
    pub polling_cursor: Option<String>,

    /// Remaining request quota from the last rate-limit snapshot
    pub api_rate_limit_remaining: Option<i32>,

    /// When the provider's rate-limit window resets
    pub api_rate_limit_reset_at: Option<DateTimeWithTimeZone>,

    /// Active flag; credentials are deactivated, never deleted
    pub is_active: bool,

    /// Provider-specific opaque metadata (e.g. scheduling link)
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: Option<JsonValue>,

    /// Timestamp when the credential was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the credential was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn plan_tier_round_trips() {
        assert_eq!(PlanTier::from_str("PRO").unwrap(), PlanTier::Pro);
        assert_eq!(PlanTier::from_str("FREE").unwrap(), PlanTier::Free);
        assert_eq!(PlanTier::Pro.as_str(), "PRO");
        assert!(PlanTier::from_str("ENTERPRISE").is_err());
    }

    #[test]
    fn provider_type_rejects_unknown_names() {
        assert_eq!(
            ProviderType::from_str("CALENDLY").unwrap(),
            ProviderType::Calendly
        );
        assert!(ProviderType::from_str("calendly").is_err());
    }
}
