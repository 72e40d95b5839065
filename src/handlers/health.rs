//! # Booking Health Handlers
//!
//! Operator admin surface over the sync pipeline: dead letter inspection and
//! replay, polling state per workspace, booking statistics, webhook delivery
//! health, and manual retention cleanup.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, not_found};
use crate::models::dead_letter::DlqStatus;
use crate::models::polling_job;
use crate::orchestrator::WebhookOutcome;
use crate::repositories::booking::BookingStats;
use crate::repositories::polling_job::PollJobStats;
use crate::repositories::webhook::DlqStats;
use crate::repositories::{
    BookingRepository, CredentialRepository, PollingJobRepository, WebhookRepository,
};
use crate::server::AppState;

/// Path parameter for dead letter routes
#[derive(Debug, Deserialize, IntoParams)]
pub struct DeadLetterPath {
    /// Dead letter entry identifier
    pub id: Uuid,
}

/// Path parameter for workspace-scoped health routes
#[derive(Debug, Deserialize, IntoParams)]
pub struct WorkspacePath {
    /// Workspace to inspect
    pub workspace_id: Uuid,
}

/// Query parameters for listing dead letters
#[derive(Debug, Deserialize, IntoParams)]
pub struct DlqListQuery {
    /// Maximum entries to return (default 50)
    pub limit: Option<u64>,
}

/// Overall pipeline health
#[derive(Debug, Serialize, ToSchema)]
pub struct BookingHealthResponse {
    /// Dead letter queue counts by status
    pub dead_letters: DlqStats,
    /// Poll job counts by status
    pub poll_jobs: PollJobStats,
    /// Live OAuth state entries awaiting callback
    pub pending_oauth_states: usize,
}

/// One dead letter entry as exposed to operators
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub status: String,
    pub retry_count: i32,
    pub error_message: String,
    pub failed_at: DateTime<Utc>,
}

impl From<crate::models::dead_letter::Model> for DeadLetterEntry {
    fn from(model: crate::models::dead_letter::Model) -> Self {
        Self {
            id: model.id,
            workspace_id: model.workspace_id,
            event_type: model.event_type,
            event_id: model.event_id,
            status: model.status,
            retry_count: model.retry_count,
            error_message: model.error_message,
            failed_at: model.failed_at.into(),
        }
    }
}

/// Outcome of a dead letter replay
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DlqActionResponse {
    /// Human-readable outcome
    pub message: String,
}

/// Polling state for one workspace
#[derive(Debug, Serialize, ToSchema)]
pub struct PollingStateResponse {
    /// Whether polling is enabled on the workspace credential
    pub polling_enabled: bool,
    /// Last completed poll
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    /// Whether a pagination cursor is stored (mid-scan)
    pub has_cursor: bool,
    /// Remaining provider rate limit budget, if a snapshot exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_remaining: Option<i32>,
    /// Recent poll jobs for the workspace, newest first
    pub recent_jobs: Vec<PollJobSummary>,
}

/// One poll job row, summarized
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PollJobSummary {
    pub id: Uuid,
    pub status: String,
    pub events_fetched: i32,
    pub events_created: i32,
    pub events_updated: i32,
    pub events_skipped: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl From<polling_job::Model> for PollJobSummary {
    fn from(model: polling_job::Model) -> Self {
        Self {
            id: model.id,
            status: model.status,
            events_fetched: model.events_fetched,
            events_created: model.events_created,
            events_updated: model.events_updated,
            events_skipped: model.events_skipped,
            duration_ms: model.duration_ms,
            error_message: model.error_message,
            started_at: model.started_at.into(),
        }
    }
}

/// Webhook delivery health for one workspace
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookHealthResponse {
    /// Whether webhook ingestion is active
    pub webhook_enabled: bool,
    /// Registered callback URL, when webhooks were set up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Consecutive failed signature verifications
    pub failed_attempts: i32,
    /// Last successful signature verification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_verified_at: Option<DateTime<Utc>>,
}

/// Manual polling trigger outcome
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TriggerResponse {
    /// False when a batch request was already queued
    pub triggered: bool,
}

/// Retention cleanup outcome
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CleanupResponse {
    /// Rows removed
    pub removed: u64,
}

/// Overall sync pipeline health
#[utoipa::path(
    get,
    path = "/booking/health",
    responses(
        (status = 200, description = "Pipeline health", body = BookingHealthResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "booking-health"
)]
pub async fn overview(
    State(state): State<AppState>,
    _auth: OperatorAuth,
) -> Result<Json<BookingHealthResponse>, ApiError> {
    let webhooks = WebhookRepository::new(Arc::clone(&state.db));
    let jobs = PollingJobRepository::new(Arc::clone(&state.db));

    Ok(Json(BookingHealthResponse {
        dead_letters: webhooks.dlq_stats().await?,
        poll_jobs: jobs.stats().await?,
        pending_oauth_states: state.oauth_state.len().await,
    }))
}

/// List dead letter entries eligible for replay
#[utoipa::path(
    get,
    path = "/booking/health/dlq",
    params(DlqListQuery),
    responses(
        (status = 200, description = "Retryable dead letters, oldest first", body = [DeadLetterEntry])
    ),
    security(("bearer_auth" = [])),
    tag = "booking-health"
)]
pub async fn list_dlq(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Query(query): Query<DlqListQuery>,
) -> Result<Json<Vec<DeadLetterEntry>>, ApiError> {
    let webhooks = WebhookRepository::new(Arc::clone(&state.db));
    let entries = webhooks
        .list_retryable(query.limit.unwrap_or(50))
        .await?
        .into_iter()
        .map(DeadLetterEntry::from)
        .collect();
    Ok(Json(entries))
}

/// Replay a dead letter entry
#[utoipa::path(
    post,
    path = "/booking/health/dlq/{id}/retry",
    params(DeadLetterPath),
    responses(
        (status = 200, description = "Replay succeeded or the event was already processed", body = DlqActionResponse),
        (status = 404, description = "Unknown dead letter entry", body = ApiError),
        (status = 409, description = "Entry is already resolved", body = ApiError),
        (status = 500, description = "Replay failed; retry counted", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "booking-health"
)]
pub async fn retry_dlq(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(path): Path<DeadLetterPath>,
) -> Result<Json<DlqActionResponse>, ApiError> {
    let webhooks = WebhookRepository::new(Arc::clone(&state.db));
    let Some(entry) = webhooks.find_dead_letter(path.id).await? else {
        return Err(not_found("Dead letter entry not found"));
    };
    if entry.status == DlqStatus::Resolved.as_str() {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "CONFLICT",
            "Dead letter entry is already resolved",
        ));
    }

    let outcome = state.orchestrator.replay_dead_letter(&entry).await?;
    let message = match outcome {
        WebhookOutcome::Processed => "Dead letter replayed successfully",
        WebhookOutcome::AlreadyProcessed => "Event was already processed, entry resolved",
    };
    info!(dead_letter_id = %path.id, message, "Dead letter replay finished");
    Ok(Json(DlqActionResponse {
        message: message.to_string(),
    }))
}

/// Resolve a dead letter entry without replaying it
#[utoipa::path(
    post,
    path = "/booking/health/dlq/{id}/resolve",
    params(DeadLetterPath),
    responses(
        (status = 200, description = "Entry marked resolved", body = DlqActionResponse),
        (status = 404, description = "Unknown dead letter entry", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "booking-health"
)]
pub async fn resolve_dlq(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(path): Path<DeadLetterPath>,
) -> Result<Json<DlqActionResponse>, ApiError> {
    let webhooks = WebhookRepository::new(Arc::clone(&state.db));
    if webhooks.find_dead_letter(path.id).await?.is_none() {
        return Err(not_found("Dead letter entry not found"));
    }

    webhooks.mark_resolved(path.id).await?;
    info!(dead_letter_id = %path.id, "Dead letter entry resolved by operator");
    Ok(Json(DlqActionResponse {
        message: "Dead letter entry resolved".to_string(),
    }))
}

/// Polling state for a workspace
#[utoipa::path(
    get,
    path = "/booking/health/polling/{workspace_id}",
    params(WorkspacePath),
    responses(
        (status = 200, description = "Polling state", body = PollingStateResponse),
        (status = 404, description = "No connection for this workspace", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "booking-health"
)]
pub async fn polling_state(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(path): Path<WorkspacePath>,
) -> Result<Json<PollingStateResponse>, ApiError> {
    let credentials = CredentialRepository::new(Arc::clone(&state.db));
    let Some(credential) = credentials.find_by_workspace(path.workspace_id).await? else {
        return Err(not_found("No Calendly connection for this workspace"));
    };

    let jobs = PollingJobRepository::new(Arc::clone(&state.db));
    let recent_jobs = jobs
        .list_recent_for_workspace(path.workspace_id, 10)
        .await?
        .into_iter()
        .map(PollJobSummary::from)
        .collect();

    Ok(Json(PollingStateResponse {
        polling_enabled: credential.polling_enabled,
        last_run_at: credential.polling_last_run_at.map(Into::into),
        has_cursor: credential.polling_cursor.is_some(),
        rate_limit_remaining: credential.api_rate_limit_remaining,
        recent_jobs,
    }))
}

/// Trigger a polling batch ahead of schedule
#[utoipa::path(
    post,
    path = "/booking/health/polling/trigger",
    responses(
        (status = 202, description = "Trigger accepted", body = TriggerResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "booking-health"
)]
pub async fn trigger_polling(
    State(state): State<AppState>,
    _auth: OperatorAuth,
) -> (StatusCode, Json<TriggerResponse>) {
    let triggered = state.poll_trigger.request();
    info!(triggered, "Manual polling batch requested");
    (StatusCode::ACCEPTED, Json(TriggerResponse { triggered }))
}

/// Booking statistics for a workspace
#[utoipa::path(
    get,
    path = "/booking/health/stats/{workspace_id}",
    params(WorkspacePath),
    responses(
        (status = 200, description = "Booking counts by status", body = BookingStats)
    ),
    security(("bearer_auth" = [])),
    tag = "booking-health"
)]
pub async fn booking_stats(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(path): Path<WorkspacePath>,
) -> Result<Json<BookingStats>, ApiError> {
    let bookings = BookingRepository::new(Arc::clone(&state.db));
    Ok(Json(bookings.stats_for_workspace(path.workspace_id).await?))
}

/// Webhook delivery health for a workspace
#[utoipa::path(
    get,
    path = "/booking/health/webhooks/{workspace_id}",
    params(WorkspacePath),
    responses(
        (status = 200, description = "Webhook health", body = WebhookHealthResponse),
        (status = 404, description = "No connection for this workspace", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "booking-health"
)]
pub async fn webhook_health(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(path): Path<WorkspacePath>,
) -> Result<Json<WebhookHealthResponse>, ApiError> {
    let credentials = CredentialRepository::new(Arc::clone(&state.db));
    let Some(credential) = credentials.find_by_workspace(path.workspace_id).await? else {
        return Err(not_found("No Calendly connection for this workspace"));
    };

    Ok(Json(WebhookHealthResponse {
        webhook_enabled: credential.webhook_enabled,
        webhook_url: credential.webhook_url,
        failed_attempts: credential.webhook_failed_attempts,
        last_verified_at: credential.webhook_last_verified_at.map(Into::into),
    }))
}

/// Prune idempotency keys past retention
#[utoipa::path(
    post,
    path = "/booking/health/cleanup/idempotency",
    responses(
        (status = 200, description = "Cleanup finished", body = CleanupResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "booking-health"
)]
pub async fn cleanup_idempotency(
    State(state): State<AppState>,
    _auth: OperatorAuth,
) -> Result<Json<CleanupResponse>, ApiError> {
    let webhooks = WebhookRepository::new(Arc::clone(&state.db));
    let removed = webhooks
        .delete_keys_older_than(state.config.retention.idempotency_days)
        .await?;
    info!(removed, "Idempotency keys pruned by operator");
    Ok(Json(CleanupResponse { removed }))
}

/// Prune finished poll job rows past retention
#[utoipa::path(
    post,
    path = "/booking/health/cleanup/polling-jobs",
    responses(
        (status = 200, description = "Cleanup finished", body = CleanupResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "booking-health"
)]
pub async fn cleanup_polling_jobs(
    State(state): State<AppState>,
    _auth: OperatorAuth,
) -> Result<Json<CleanupResponse>, ApiError> {
    let jobs = PollingJobRepository::new(Arc::clone(&state.db));
    let removed = jobs
        .delete_older_than(state.config.retention.poll_jobs_days)
        .await?;
    info!(removed, "Poll job rows pruned by operator");
    Ok(Json(CleanupResponse { removed }))
}
