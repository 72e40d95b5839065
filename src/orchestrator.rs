//! # Sync Orchestrator
//!
//! Ties the provider integration together: completes the OAuth connection
//! (token exchange, plan detection, webhook registration or polling
//! enablement), processes signed webhook deliveries through the idempotency
//! gate, and runs one page of pull-sync per poll invocation. Failed webhook
//! dispatches are parked in the dead letter queue and re-raised so the
//! provider retries delivery.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::attribution::{
    Attribution, AttributionError, AttributionMatcher, InviteeDetails, UTM_LEAD_PREFIX,
};
use crate::calendly::{
    CalendlyClient, CalendlyError, CalendlyUser, InviteeTracking, ScheduledEvent,
};
use crate::models::booking::{self, BookingStatus, ReceivedVia};
use crate::models::dead_letter;
use crate::models::oauth_credential::{Model as Credential, PlanTier, ProviderType};
use crate::repositories::credential::TokenUpdate;
use crate::repositories::polling_job::PollCounters;
use crate::repositories::{
    BookingRepository, CredentialRepository, LeadRepository, WebhookRepository,
};
use crate::token_manager::{TokenError, TokenManager};
use crate::webhook_verifier::{DeliveryVerdict, WebhookVerifier};

/// Events the provider delivers to our webhook endpoint.
///
/// The enum is closed: an unknown event name fails deserialization and the
/// delivery is rejected as malformed instead of silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookEvent {
    #[serde(rename = "invitee.created")]
    InviteeCreated,
    #[serde(rename = "invitee.canceled")]
    InviteeCanceled,
}

impl WebhookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEvent::InviteeCreated => "invitee.created",
            WebhookEvent::InviteeCanceled => "invitee.canceled",
        }
    }
}

/// Top-level webhook delivery body
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub event: WebhookEvent,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub payload: EventPayload,
}

/// The scheduling event block inside a webhook delivery
#[derive(Debug, Clone, Deserialize)]
pub struct EventPayload {
    /// Provider URI of the scheduled event; its last segment is the
    /// provider event id shared with the polling path.
    pub uri: String,
    /// Scheduled start time
    pub time: DateTime<Utc>,
    pub invitee: WebhookInvitee,
    pub event_type: WebhookEventType,
    #[serde(default)]
    pub tracking: Option<InviteeTracking>,
    #[serde(default)]
    pub questions_and_answers: Option<serde_json::Value>,
    #[serde(default)]
    pub cancellation: Option<Cancellation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookInvitee {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventType {
    #[serde(default)]
    pub name: Option<String>,
    /// Duration in minutes
    #[serde(default)]
    pub duration: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cancellation {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub canceled_by: Option<String>,
}

/// Result of accepting one webhook delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    AlreadyProcessed,
}

/// Result of completing an OAuth connection
#[derive(Debug, Clone)]
pub struct ConnectionOutcome {
    pub credential: Credential,
    pub plan: PlanTier,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("credential {0} not found")]
    CredentialNotFound(Uuid),

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("webhook payload could not be parsed: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("polling is not enabled for credential {0}")]
    PollingDisabled(Uuid),

    #[error("stored booking carries invalid status: {0}")]
    StoredStatus(String),

    #[error(transparent)]
    Attribution(#[from] AttributionError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Provider(#[from] CalendlyError),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

/// Orchestrates the provider integration end to end
pub struct SyncOrchestrator {
    client: CalendlyClient,
    tokens: Arc<TokenManager>,
    credentials: Arc<CredentialRepository>,
    bookings: Arc<BookingRepository>,
    leads: Arc<LeadRepository>,
    webhooks: Arc<WebhookRepository>,
    verifier: WebhookVerifier,
    matcher: AttributionMatcher,
    app_base_url: String,
    lookback_days: u32,
    page_size: u32,
}

impl SyncOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: CalendlyClient,
        tokens: Arc<TokenManager>,
        credentials: Arc<CredentialRepository>,
        bookings: Arc<BookingRepository>,
        leads: Arc<LeadRepository>,
        webhooks: Arc<WebhookRepository>,
        verifier: WebhookVerifier,
        matcher: AttributionMatcher,
        app_base_url: String,
        lookback_days: u32,
        page_size: u32,
    ) -> Self {
        Self {
            client,
            tokens,
            credentials,
            bookings,
            leads,
            webhooks,
            verifier,
            matcher,
            app_base_url: app_base_url.trim_end_matches('/').to_string(),
            lookback_days,
            page_size,
        }
    }

    /// Provider authorize URL carrying the opaque state token.
    pub fn authorize_url(&self, state: &str) -> Result<url::Url, OrchestratorError> {
        Ok(self.client.build_authorize_url(state)?)
    }

    /// Complete the OAuth flow for a workspace: exchange the code, detect
    /// the plan tier, persist the credential, and wire up exactly one of
    /// webhooks (PRO) or polling (FREE).
    #[instrument(skip(self, code))]
    pub async fn complete_connection(
        &self,
        workspace_id: Uuid,
        code: &str,
    ) -> Result<ConnectionOutcome, OrchestratorError> {
        let token_response = self.client.exchange_code(code).await?;
        let user = self
            .client
            .get_current_user(&token_response.access_token)
            .await?;
        let plan = self
            .detect_plan(&token_response.access_token, &user)
            .await;

        let metadata = user
            .scheduling_url
            .as_ref()
            .map(|link| serde_json::json!({ "scheduling_url": link }));

        let credential = self
            .credentials
            .upsert_from_oauth(
                workspace_id,
                TokenUpdate {
                    access_token: token_response.access_token.clone(),
                    refresh_token: token_response.refresh_token.clone(),
                    expires_at: Utc::now() + Duration::seconds(token_response.expires_in),
                },
                Some(user.email.clone()),
                plan,
                metadata,
            )
            .await?;

        match plan {
            PlanTier::Pro => {
                self.register_webhook(&credential, &token_response.access_token, &user)
                    .await?;
            }
            PlanTier::Free => {
                self.credentials.enable_polling(credential.id).await?;
            }
        }

        counter!("calendly_connections_total", "plan" => plan.as_str()).increment(1);
        info!(workspace_id = %workspace_id, plan = %plan, "Completed Calendly connection");

        let credential = self
            .credentials
            .find_by_id(credential.id)
            .await?
            .ok_or(OrchestratorError::CredentialNotFound(credential.id))?;
        Ok(ConnectionOutcome { credential, plan })
    }

    /// Attributed scheduling link for a lead.
    ///
    /// Takes the workspace's cached Calendly scheduling URL and stamps
    /// `utm_content=lead_<id>` onto it, replacing any marker already present.
    /// A booking made through the link comes back with the marker in the
    /// invitee tracking block and attributes with high confidence. Returns
    /// `None` when the workspace has no active connection or no cached link.
    pub async fn booking_link(
        &self,
        workspace_id: Uuid,
        lead_id: Uuid,
    ) -> Result<Option<url::Url>, OrchestratorError> {
        let Some(credential) = self.credentials.find_by_workspace(workspace_id).await? else {
            return Ok(None);
        };
        if !credential.is_active {
            return Ok(None);
        }
        let Some(base) = credential
            .metadata
            .as_ref()
            .and_then(|meta| meta.get("scheduling_url"))
            .and_then(|value| value.as_str())
        else {
            warn!(workspace_id = %workspace_id, "No scheduling link cached for workspace");
            return Ok(None);
        };

        let mut link = url::Url::parse(base).map_err(CalendlyError::from)?;
        let retained: Vec<(String, String)> = link
            .query_pairs()
            .filter(|(key, _)| key != "utm_content")
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        {
            let mut pairs = link.query_pairs_mut();
            pairs.clear();
            for (key, value) in &retained {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("utm_content", &format!("{UTM_LEAD_PREFIX}{lead_id}"));
        }

        debug!(workspace_id = %workspace_id, lead_id = %lead_id, "Generated attributed booking link");
        Ok(Some(link))
    }

    /// Probe the PRO-only webhook subscription API to classify the account.
    /// 402/403 means FREE; any other failure defaults to FREE with a warning
    /// so a flaky probe never blocks connection.
    async fn detect_plan(&self, access_token: &str, user: &CalendlyUser) -> PlanTier {
        match self
            .client
            .list_webhook_subscriptions(access_token, &user.current_organization, &user.uri)
            .await
        {
            Ok(_) => PlanTier::Pro,
            Err(err) if matches!(err.status(), Some(402) | Some(403)) => PlanTier::Free,
            Err(err) => {
                warn!(error = %err, "Plan probe failed, defaulting to FREE");
                PlanTier::Free
            }
        }
    }

    /// Register the webhook subscription for a PRO credential. Safe to call
    /// again: an existing subscription for our callback is reused when its
    /// signing key is already stored, and recreated otherwise (the key is
    /// only returned at creation time). Registration failure is non-fatal;
    /// the credential simply stays without webhooks.
    async fn register_webhook(
        &self,
        credential: &Credential,
        access_token: &str,
        user: &CalendlyUser,
    ) -> Result<(), OrchestratorError> {
        let callback_url = format!("{}/calendly/webhooks/{}", self.app_base_url, credential.id);

        let existing = self
            .client
            .list_webhook_subscriptions(access_token, &user.current_organization, &user.uri)
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, "Could not list webhook subscriptions");
                Vec::new()
            });

        if let Some(subscription) = existing.iter().find(|s| s.callback_url == callback_url) {
            if credential.webhook_signing_key.is_some() {
                self.credentials
                    .set_webhook_registration(
                        credential.id,
                        &callback_url,
                        credential.webhook_signing_key.clone(),
                    )
                    .await?;
                return Ok(());
            }
            // Subscription exists but the key is gone; recreate for a fresh one.
            if let Err(err) = self
                .client
                .delete_webhook_subscription(access_token, &subscription.uri)
                .await
            {
                warn!(error = %err, "Could not delete stale webhook subscription");
            }
        }

        match self
            .client
            .create_webhook_subscription(
                access_token,
                &callback_url,
                &["invitee.created", "invitee.canceled"],
                &user.current_organization,
                &user.uri,
            )
            .await
        {
            Ok(subscription) => {
                self.credentials
                    .set_webhook_registration(credential.id, &callback_url, subscription.signing_key)
                    .await?;
                info!(credential_id = %credential.id, "Registered Calendly webhook");
                Ok(())
            }
            Err(err) => {
                warn!(credential_id = %credential.id, error = %err, "Webhook registration failed");
                Ok(())
            }
        }
    }

    /// Process one signed webhook delivery.
    ///
    /// Order matters: signature first, then the idempotency claim, then side
    /// effects. A dispatch failure releases the claim (so the provider's
    /// redelivery can retry), parks the payload in the dead letter queue,
    /// and re-raises.
    #[instrument(skip(self, signature_header, raw_body))]
    pub async fn process_webhook(
        &self,
        credential_id: Uuid,
        signature_header: &str,
        raw_body: &str,
    ) -> Result<WebhookOutcome, OrchestratorError> {
        let credential = self
            .credentials
            .find_by_id(credential_id)
            .await?
            .ok_or(OrchestratorError::CredentialNotFound(credential_id))?;

        let verdict = self
            .verifier
            .verify_delivery(&credential, signature_header, raw_body)
            .await?;
        if verdict != DeliveryVerdict::Valid {
            return Err(OrchestratorError::InvalidSignature);
        }

        let raw_value: serde_json::Value = serde_json::from_str(raw_body)?;
        let envelope: WebhookEnvelope = serde_json::from_value(raw_value.clone())?;
        let event_id = provider_event_id(&envelope.payload.uri);

        // The claim scopes the provider event id by event type so a
        // cancellation is never shadowed by the earlier creation delivery.
        let claim_id = format!("{}:{}", event_id, envelope.event.as_str());
        let claimed = self
            .webhooks
            .claim_event(
                ProviderType::Calendly.as_str(),
                &claim_id,
                credential.workspace_id,
                Some(serde_json::json!({
                    "event_type": envelope.event.as_str(),
                    "processed_at": Utc::now().to_rfc3339(),
                })),
            )
            .await?;
        if !claimed {
            info!(event_id, "Event already processed, skipping");
            counter!("webhook_events_total", "outcome" => "duplicate").increment(1);
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        let dispatch = match envelope.event {
            WebhookEvent::InviteeCreated => {
                self.handle_invitee_created(&credential, &envelope.payload, &raw_value)
                    .await
            }
            WebhookEvent::InviteeCanceled => {
                self.handle_invitee_canceled(&envelope.payload).await
            }
        };

        match dispatch {
            Ok(()) => {
                counter!("webhook_events_total", "outcome" => "processed").increment(1);
                Ok(WebhookOutcome::Processed)
            }
            Err(err) => {
                counter!("webhook_events_total", "outcome" => "failed").increment(1);
                self.webhooks
                    .release_event(ProviderType::Calendly.as_str(), &claim_id)
                    .await?;
                self.webhooks
                    .insert_dead_letter(
                        credential.workspace_id,
                        Some(credential.id),
                        ProviderType::Calendly.as_str(),
                        envelope.event.as_str(),
                        Some(event_id.to_string()),
                        raw_value,
                        &err.to_string(),
                    )
                    .await?;
                Err(err)
            }
        }
    }

    /// Replay a parked dead letter entry.
    ///
    /// The delivery's signature was verified before the entry was parked, so
    /// the replay goes straight through the idempotency gate to dispatch. A
    /// claim that already exists means a provider redelivery got there
    /// first; the entry is resolved without side effects. Success resolves
    /// the entry, failure counts a retry against the cap.
    #[instrument(skip(self, entry), fields(dead_letter_id = %entry.id))]
    pub async fn replay_dead_letter(
        &self,
        entry: &dead_letter::Model,
    ) -> Result<WebhookOutcome, OrchestratorError> {
        let envelope: WebhookEnvelope = serde_json::from_value(entry.payload.clone())?;
        let event_id = provider_event_id(&envelope.payload.uri);

        let claim_id = format!("{}:{}", event_id, envelope.event.as_str());
        let claimed = self
            .webhooks
            .claim_event(
                ProviderType::Calendly.as_str(),
                &claim_id,
                entry.workspace_id,
                Some(serde_json::json!({
                    "event_type": envelope.event.as_str(),
                    "replayed_at": Utc::now().to_rfc3339(),
                })),
            )
            .await?;
        if !claimed {
            info!(event_id, "Event was processed since parking, resolving entry");
            self.webhooks.mark_resolved(entry.id).await?;
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        let dispatch = match envelope.event {
            WebhookEvent::InviteeCreated => {
                let credential_id = entry.oauth_credential_id.unwrap_or_default();
                match self.credentials.find_by_id(credential_id).await? {
                    Some(credential) => {
                        self.handle_invitee_created(&credential, &envelope.payload, &entry.payload)
                            .await
                    }
                    None => Err(OrchestratorError::CredentialNotFound(credential_id)),
                }
            }
            WebhookEvent::InviteeCanceled => self.handle_invitee_canceled(&envelope.payload).await,
        };

        match dispatch {
            Ok(()) => {
                counter!("dlq_replays_total", "outcome" => "resolved").increment(1);
                self.webhooks.mark_resolved(entry.id).await?;
                Ok(WebhookOutcome::Processed)
            }
            Err(err) => {
                counter!("dlq_replays_total", "outcome" => "failed").increment(1);
                self.webhooks
                    .release_event(ProviderType::Calendly.as_str(), &claim_id)
                    .await?;
                self.webhooks.record_retry(entry.id).await?;
                Err(err)
            }
        }
    }

    async fn handle_invitee_created(
        &self,
        credential: &Credential,
        payload: &EventPayload,
        raw_value: &serde_json::Value,
    ) -> Result<(), OrchestratorError> {
        let event_id = provider_event_id(&payload.uri);
        let utm_content = payload
            .tracking
            .as_ref()
            .and_then(|t| t.utm_content.clone());

        let attribution = self
            .matcher
            .attribute(
                credential.workspace_id,
                &InviteeDetails {
                    email: payload.invitee.email.clone(),
                    name: payload.invitee.name.clone(),
                    utm_content,
                },
            )
            .await?;

        let duration = payload.event_type.duration.unwrap_or(30);
        let now = Utc::now();
        let model = booking::Model {
            id: Uuid::new_v4(),
            workspace_id: credential.workspace_id,
            lead_id: attribution.lead.id,
            workflow_id: Some(attribution.lead.workflow_id),
            oauth_credential_id: credential.id,
            provider_type: ProviderType::Calendly.as_str().to_string(),
            provider_event_id: event_id.to_string(),
            provider_event_uri: Some(payload.uri.clone()),
            event_name: payload
                .event_type
                .name
                .clone()
                .unwrap_or_else(|| "Meeting".to_string()),
            event_start_time: payload.time.into(),
            event_end_time: (payload.time + Duration::minutes(duration as i64)).into(),
            event_duration_minutes: Some(duration),
            event_timezone: payload.invitee.timezone.clone(),
            invitee_email: payload.invitee.email.clone(),
            invitee_name: payload.invitee.name.clone(),
            invitee_timezone: payload.invitee.timezone.clone(),
            booking_status: BookingStatus::Scheduled.as_str().to_string(),
            attribution_method: Some(attribution.method.as_str().to_string()),
            cancellation_reason: None,
            rescheduled_from_booking_id: None,
            meeting_location: None,
            meeting_url: Some(payload.uri.clone()),
            meeting_notes: None,
            responses: payload.questions_and_answers.clone(),
            received_via: ReceivedVia::Webhook.as_str().to_string(),
            raw_payload: Some(raw_value.clone()),
            synced_at: Some(now.into()),
            created_at: now.into(),
            updated_at: now.into(),
        };

        self.insert_booking(model, &attribution, BookingStatus::Scheduled)
            .await
    }

    async fn handle_invitee_canceled(
        &self,
        payload: &EventPayload,
    ) -> Result<(), OrchestratorError> {
        let event_id = provider_event_id(&payload.uri);
        let Some(existing) = self
            .bookings
            .find_by_provider_event(ProviderType::Calendly.as_str(), event_id)
            .await?
        else {
            // No local booking to cancel; the poll path never saw it either.
            warn!(event_id, "Dropping cancellation for unknown booking");
            counter!("webhook_unknown_cancellations_total").increment(1);
            return Ok(());
        };

        let current = BookingStatus::from_str(&existing.booking_status)
            .map_err(OrchestratorError::StoredStatus)?;
        if !current.can_transition_to(BookingStatus::Canceled) {
            warn!(
                booking_id = %existing.id,
                current = %current,
                "Ignoring cancellation for booking in terminal state"
            );
            return Ok(());
        }

        let reason = payload.cancellation.as_ref().and_then(|c| c.reason.clone());
        self.bookings
            .update_status(existing.id, BookingStatus::Canceled, reason)
            .await?;
        self.leads
            .update_meeting(existing.lead_id, event_id, BookingStatus::Canceled)
            .await?;
        info!(booking_id = %existing.id, "Canceled booking");
        Ok(())
    }

    /// Run one page of pull-sync for a credential.
    #[instrument(skip(self))]
    pub async fn poll_events(
        &self,
        credential_id: Uuid,
    ) -> Result<PollCounters, OrchestratorError> {
        let credential = self
            .credentials
            .find_by_id(credential_id)
            .await?
            .ok_or(OrchestratorError::CredentialNotFound(credential_id))?;
        if !credential.polling_enabled || !credential.is_active {
            return Err(OrchestratorError::PollingDisabled(credential_id));
        }

        let access_token = self.tokens.get_access_token(credential_id).await?;
        let user = self.client.get_current_user(&access_token).await?;

        // A stored cursor resumes pagination; otherwise scan the look-back
        // window from scratch.
        let min_start_time = credential
            .polling_cursor
            .is_none()
            .then(|| Utc::now() - Duration::days(self.lookback_days as i64));
        let page = self
            .client
            .list_scheduled_events(
                &access_token,
                &user.uri,
                credential.polling_cursor.as_deref(),
                min_start_time,
                self.page_size,
            )
            .await?;

        if let Some(rate_limit) = page.rate_limit {
            self.credentials
                .update_rate_limit(credential.id, rate_limit.remaining, rate_limit.reset)
                .await?;
        }

        let mut counters = PollCounters {
            fetched: page.events.len() as i32,
            ..Default::default()
        };
        for event in &page.events {
            self.process_polled_event(&credential, &access_token, event, &mut counters)
                .await?;
        }

        self.credentials
            .update_polling_state(credential.id, page.next_page_token.clone(), Utc::now())
            .await?;

        info!(
            credential_id = %credential.id,
            fetched = counters.fetched,
            created = counters.created,
            updated = counters.updated,
            skipped = counters.skipped,
            "Poll page complete"
        );
        Ok(counters)
    }

    async fn process_polled_event(
        &self,
        credential: &Credential,
        access_token: &str,
        event: &ScheduledEvent,
        counters: &mut PollCounters,
    ) -> Result<(), OrchestratorError> {
        let event_id = event.event_id();
        let desired = if event.status == "canceled" {
            BookingStatus::Canceled
        } else {
            BookingStatus::Scheduled
        };

        if let Some(existing) = self
            .bookings
            .find_by_provider_event(ProviderType::Calendly.as_str(), event_id)
            .await?
        {
            // Already ingested (webhook or earlier poll): reconcile status only.
            let current = BookingStatus::from_str(&existing.booking_status)
                .map_err(OrchestratorError::StoredStatus)?;
            if current == desired {
                self.bookings.touch_synced(existing.id).await?;
                counters.skipped += 1;
            } else if current.can_transition_to(desired) {
                self.bookings.update_status(existing.id, desired, None).await?;
                self.leads
                    .update_meeting(existing.lead_id, event_id, desired)
                    .await?;
                counters.updated += 1;
            } else {
                warn!(
                    booking_id = %existing.id,
                    current = %current,
                    desired = %desired,
                    "Poll reconcile skipped: illegal transition"
                );
                self.bookings.touch_synced(existing.id).await?;
                counters.skipped += 1;
            }
            return Ok(());
        }

        let invitees = self.client.list_event_invitees(access_token, event_id).await?;
        for invitee in &invitees {
            let attribution = self
                .matcher
                .attribute(
                    credential.workspace_id,
                    &InviteeDetails {
                        email: invitee.email.clone(),
                        name: invitee.name.clone(),
                        utm_content: invitee
                            .tracking
                            .as_ref()
                            .and_then(|t| t.utm_content.clone()),
                    },
                )
                .await?;

            let now = Utc::now();
            let model = booking::Model {
                id: Uuid::new_v4(),
                workspace_id: credential.workspace_id,
                lead_id: attribution.lead.id,
                workflow_id: Some(attribution.lead.workflow_id),
                oauth_credential_id: credential.id,
                provider_type: ProviderType::Calendly.as_str().to_string(),
                provider_event_id: event_id.to_string(),
                provider_event_uri: Some(event.uri.clone()),
                event_name: event.name.clone().unwrap_or_else(|| "Meeting".to_string()),
                event_start_time: event.start_time.into(),
                event_end_time: event.end_time.into(),
                event_duration_minutes: Some(
                    (event.end_time - event.start_time).num_minutes() as i32
                ),
                event_timezone: invitee.timezone.clone(),
                invitee_email: invitee.email.clone(),
                invitee_name: invitee.name.clone(),
                invitee_timezone: invitee.timezone.clone(),
                booking_status: desired.as_str().to_string(),
                attribution_method: Some(attribution.method.as_str().to_string()),
                cancellation_reason: None,
                rescheduled_from_booking_id: None,
                meeting_location: event.location.as_ref().and_then(|l| l.location.clone()),
                meeting_url: event.location.as_ref().and_then(|l| l.join_url.clone()),
                meeting_notes: None,
                responses: serde_json::to_value(&invitee.questions_and_answers).ok(),
                received_via: ReceivedVia::Polling.as_str().to_string(),
                raw_payload: serde_json::to_value(event).ok(),
                synced_at: Some(now.into()),
                created_at: now.into(),
                updated_at: now.into(),
            };

            match self.insert_booking(model, &attribution, desired).await {
                Ok(()) => counters.created += 1,
                // Two invitees on one event race into the same unique key;
                // the first one wins and the rest are duplicates.
                Err(OrchestratorError::Database(err))
                    if crate::error::is_duplicate_key(&err) =>
                {
                    warn!(event_id, "Duplicate booking insert during poll, skipping");
                    counters.skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn insert_booking(
        &self,
        model: booking::Model,
        attribution: &Attribution,
        status: BookingStatus,
    ) -> Result<(), OrchestratorError> {
        let event_id = model.provider_event_id.clone();
        let booking = self.bookings.insert(model).await?;
        self.leads
            .update_meeting(attribution.lead.id, &event_id, status)
            .await?;
        info!(
            booking_id = %booking.id,
            lead_id = %attribution.lead.id,
            method = attribution.method.as_str(),
            "Created booking"
        );
        Ok(())
    }
}

/// Provider event id: the last path segment of the event URI.
fn provider_event_id(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}
