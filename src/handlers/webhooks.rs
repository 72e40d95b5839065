//! # Webhook Handlers
//!
//! Public ingestion endpoint for Calendly webhook deliveries. The route is
//! unauthenticated by design; the HMAC signature header is the only proof
//! of origin, so the raw body must reach the verifier byte-for-byte.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::ApiError;
use crate::orchestrator::WebhookOutcome;
use crate::server::AppState;

/// Header carrying the `v1,<timestamp>,<hex>` delivery signature.
pub const SIGNATURE_HEADER: &str = "calendly-webhook-signature";

/// Path parameter for the webhook route
#[derive(Debug, Deserialize, IntoParams)]
pub struct WebhookPath {
    /// Credential the delivery is addressed to
    pub credential_id: Uuid,
}

/// Webhook acknowledgement body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    /// Human-readable processing outcome
    pub message: String,
}

/// Accept one Calendly webhook delivery
#[utoipa::path(
    post,
    path = "/calendly/webhooks/{credential_id}",
    params(WebhookPath),
    request_body = String,
    responses(
        (status = 200, description = "Delivery processed or already processed", body = WebhookAck),
        (status = 400, description = "Invalid signature or malformed payload", body = ApiError),
        (status = 404, description = "Unknown credential", body = ApiError),
        (status = 500, description = "Dispatch failed; payload parked in the dead letter queue", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn receive(
    State(state): State<AppState>,
    Path(path): Path<WebhookPath>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookAck>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    let outcome = state
        .orchestrator
        .process_webhook(path.credential_id, signature, &body)
        .await?;

    let message = match outcome {
        WebhookOutcome::Processed => "Webhook processed successfully",
        WebhookOutcome::AlreadyProcessed => "Event already processed",
    };
    Ok(Json(WebhookAck {
        message: message.to_string(),
    }))
}
