//! # Polling and Connection Handlers
//!
//! Operator-facing endpoints for on-demand polling of a single credential,
//! for inspecting or disconnecting a workspace's Calendly connection, and
//! for generating attributed booking links.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, not_found};
use crate::repositories::CredentialRepository;
use crate::repositories::polling_job::PollCounters;
use crate::server::AppState;

/// Path parameter for credential-scoped routes
#[derive(Debug, Deserialize, IntoParams)]
pub struct CredentialPath {
    /// Credential to poll
    pub credential_id: Uuid,
}

/// Path parameter for workspace-scoped routes
#[derive(Debug, Deserialize, IntoParams)]
pub struct WorkspacePath {
    /// Workspace owning the connection
    pub workspace_id: Uuid,
}

/// Counters from one poll run
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PollRunResponse {
    /// Events returned by the provider page
    pub fetched: i32,
    /// Bookings created
    pub created: i32,
    /// Bookings whose status changed
    pub updated: i32,
    /// Events skipped (no change, or duplicate)
    pub skipped: i32,
}

impl From<PollCounters> for PollRunResponse {
    fn from(counters: PollCounters) -> Self {
        Self {
            fetched: counters.fetched,
            created: counters.created,
            updated: counters.updated,
            skipped: counters.skipped,
        }
    }
}

/// Connection status for a workspace
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionStatusResponse {
    /// Whether an active credential exists for the workspace
    pub connected: bool,
    /// Credential identifier, when connected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_id: Option<Uuid>,
    /// Plan tier detected at connection time ("PRO" or "FREE")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    /// Email of the connected Calendly account
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_email: Option<String>,
    /// Whether webhook ingestion is active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_enabled: Option<bool>,
    /// Whether polling fallback is active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polling_enabled: Option<bool>,
    /// Last completed poll for this credential
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polling_last_run_at: Option<DateTime<Utc>>,
    /// Scheduling link of the connected account, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduling_url: Option<String>,
}

/// Disconnect acknowledgement
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DisconnectResponse {
    /// Human-readable outcome
    pub message: String,
}

/// Path parameters for the booking link route
#[derive(Debug, Deserialize, IntoParams)]
pub struct BookingLinkPath {
    /// Workspace whose connection provides the scheduling URL
    pub workspace_id: Uuid,
    /// Lead the link should attribute bookings to
    pub lead_id: Uuid,
}

/// Attributed booking link for a lead
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BookingLinkResponse {
    /// Provider the link points at, when one is connected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Scheduling URL carrying the lead attribution marker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// Poll one credential on demand
#[utoipa::path(
    post,
    path = "/calendly/poll/{credential_id}",
    params(CredentialPath),
    responses(
        (status = 200, description = "Poll completed", body = PollRunResponse),
        (status = 404, description = "Unknown credential", body = ApiError),
        (status = 409, description = "Polling not enabled for this credential", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "polling"
)]
pub async fn poll_credential(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(path): Path<CredentialPath>,
) -> Result<Json<PollRunResponse>, ApiError> {
    let counters = state.orchestrator.poll_events(path.credential_id).await?;
    Ok(Json(counters.into()))
}

/// Connection status for a workspace
#[utoipa::path(
    get,
    path = "/calendly/connection/{workspace_id}",
    params(WorkspacePath),
    responses(
        (status = 200, description = "Connection status", body = ConnectionStatusResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "polling"
)]
pub async fn connection_status(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(path): Path<WorkspacePath>,
) -> Result<Json<ConnectionStatusResponse>, ApiError> {
    let credentials = CredentialRepository::new(Arc::clone(&state.db));
    let Some(credential) = credentials.find_by_workspace(path.workspace_id).await? else {
        return Ok(Json(ConnectionStatusResponse {
            connected: false,
            credential_id: None,
            plan: None,
            provider_email: None,
            webhook_enabled: None,
            polling_enabled: None,
            polling_last_run_at: None,
            scheduling_url: None,
        }));
    };

    let scheduling_url = credential
        .metadata
        .as_ref()
        .and_then(|meta| meta.get("scheduling_url"))
        .and_then(|value| value.as_str())
        .map(str::to_string);

    Ok(Json(ConnectionStatusResponse {
        connected: credential.is_active,
        credential_id: Some(credential.id),
        plan: credential.provider_plan.clone(),
        provider_email: credential.provider_email.clone(),
        webhook_enabled: Some(credential.webhook_enabled),
        polling_enabled: Some(credential.polling_enabled),
        polling_last_run_at: credential.polling_last_run_at.map(Into::into),
        scheduling_url,
    }))
}

/// Attributed booking link for a lead
///
/// Bookings made through the returned link carry a `utm_content` marker that
/// attributes them back to the lead with high confidence. Both fields are
/// null when the workspace has no usable connection.
#[utoipa::path(
    get,
    path = "/calendly/link/{workspace_id}/{lead_id}",
    params(BookingLinkPath),
    responses(
        (status = 200, description = "Attributed link, or nulls when unavailable", body = BookingLinkResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "polling"
)]
pub async fn booking_link(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(path): Path<BookingLinkPath>,
) -> Result<Json<BookingLinkResponse>, ApiError> {
    let link = state
        .orchestrator
        .booking_link(path.workspace_id, path.lead_id)
        .await?;

    Ok(Json(match link {
        Some(url) => BookingLinkResponse {
            provider: Some("CALENDLY".to_string()),
            link: Some(url.to_string()),
        },
        None => BookingLinkResponse {
            provider: None,
            link: None,
        },
    }))
}

/// Disconnect a workspace's Calendly connection
#[utoipa::path(
    delete,
    path = "/calendly/connection/{workspace_id}",
    params(WorkspacePath),
    responses(
        (status = 200, description = "Connection deactivated", body = DisconnectResponse),
        (status = 404, description = "No connection for this workspace", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "polling"
)]
pub async fn disconnect(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(path): Path<WorkspacePath>,
) -> Result<Json<DisconnectResponse>, ApiError> {
    let credentials = CredentialRepository::new(Arc::clone(&state.db));
    let Some(credential) = credentials.find_by_workspace(path.workspace_id).await? else {
        return Err(not_found("No Calendly connection for this workspace"));
    };

    credentials.deactivate(credential.id).await?;
    info!(
        workspace_id = %path.workspace_id,
        credential_id = %credential.id,
        "Calendly connection deactivated"
    );

    Ok(Json(DisconnectResponse {
        message: "Calendly connection deactivated".to_string(),
    }))
}
