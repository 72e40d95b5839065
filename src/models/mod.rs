//! # Data Models
//!
//! This module contains all the data models used throughout the Booksync API.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod booking;
pub mod dead_letter;
pub mod idempotency_key;
pub mod lead;
pub mod oauth_credential;
pub mod polling_job;
pub mod workflow;

pub use booking::Entity as Booking;
pub use dead_letter::Entity as WebhookDeadLetter;
pub use idempotency_key::Entity as WebhookIdempotencyKey;
pub use lead::Entity as Lead;
pub use oauth_credential::Entity as OauthCredential;
pub use polling_job::Entity as BookingPollingJob;
pub use workflow::Entity as Workflow;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "booksync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
