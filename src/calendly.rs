//! Calendly API client
//!
//! Thin HTTP client for the Calendly OAuth and REST APIs: token exchange and
//! refresh, current-user lookup, webhook subscription management, scheduled
//! event listing with cursor pagination, and invitee retrieval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Calendly client specific errors
#[derive(Debug, Error)]
pub enum CalendlyError {
    #[error("OAuth request failed: {0}")]
    OAuthError(String),

    #[error("API request failed with status {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),
}

impl CalendlyError {
    /// Upstream HTTP status, if this error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            CalendlyError::ApiError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Rate limit snapshot extracted from Calendly response headers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitInfo {
    pub remaining: Option<i32>,
    pub reset: Option<DateTime<Utc>>,
}

/// OAuth token response from Calendly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    /// URI of the resource owner (the Calendly user)
    #[serde(default)]
    pub owner: Option<String>,
    /// URI of the owner's organization
    #[serde(default)]
    pub organization: Option<String>,
}

/// Calendly user resource (from `/users/me`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendlyUser {
    pub uri: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    pub current_organization: String,
    #[serde(default)]
    pub scheduling_url: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    resource: CalendlyUser,
}

/// Webhook subscription resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub uri: String,
    pub callback_url: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub events: Vec<String>,
    /// Signing key, present on creation responses
    #[serde(default)]
    pub signing_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookSubscriptionEnvelope {
    resource: WebhookSubscription,
}

#[derive(Debug, Deserialize)]
struct WebhookSubscriptionList {
    collection: Vec<WebhookSubscription>,
}

/// Pagination block returned by Calendly list endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub next_page: Option<String>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Scheduled event resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub uri: String,
    pub name: Option<String>,
    /// "active" or "canceled"
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<EventLocation>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ScheduledEvent {
    /// Provider event id: the last path segment of the event URI.
    pub fn event_id(&self) -> &str {
        self.uri.rsplit('/').next().unwrap_or(self.uri.as_str())
    }
}

/// Event location block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLocation {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub join_url: Option<String>,
}

/// A page of scheduled events plus the rate-limit snapshot from the response
#[derive(Debug, Clone)]
pub struct ScheduledEventsPage {
    pub events: Vec<ScheduledEvent>,
    pub next_page_token: Option<String>,
    pub rate_limit: Option<RateLimitInfo>,
}

#[derive(Debug, Deserialize)]
struct ScheduledEventList {
    collection: Vec<ScheduledEvent>,
    #[serde(default)]
    pagination: Pagination,
}

/// UTM tracking block attached to an invitee
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InviteeTracking {
    #[serde(default)]
    pub utm_campaign: Option<String>,
    #[serde(default)]
    pub utm_source: Option<String>,
    #[serde(default)]
    pub utm_medium: Option<String>,
    #[serde(default)]
    pub utm_content: Option<String>,
    #[serde(default)]
    pub utm_term: Option<String>,
}

/// Invitee questionnaire answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionAndAnswer {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub position: Option<u32>,
}

/// Invitee resource for a scheduled event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitee {
    pub uri: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub tracking: Option<InviteeTracking>,
    #[serde(default)]
    pub questions_and_answers: Vec<QuestionAndAnswer>,
}

#[derive(Debug, Deserialize)]
struct InviteeList {
    collection: Vec<Invitee>,
}

/// Calendly OAuth and API configuration
#[derive(Debug, Clone)]
pub struct CalendlyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_base_url: String,
    pub api_base_url: String,
}

/// Timeout applied to every outbound Calendly request.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Calendly API client
#[derive(Clone)]
pub struct CalendlyClient {
    config: CalendlyConfig,
    http: reqwest::Client,
}

impl CalendlyClient {
    pub fn new(config: CalendlyConfig) -> Self {
        Self::with_timeout(
            config,
            std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS),
        )
    }

    /// Client with a custom request timeout.
    pub fn with_timeout(config: CalendlyConfig, timeout: std::time::Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self { config, http }
    }

    /// Build the Calendly OAuth authorize URL for the given state value
    pub fn build_authorize_url(&self, state: &str) -> Result<Url, CalendlyError> {
        let mut url = Url::parse(&format!("{}/oauth/authorize", self.config.auth_base_url))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("state", state);
        Ok(url)
    }

    /// Exchange an authorization code for tokens
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, CalendlyError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];

        let response = self.http
            .post(format!("{}/oauth/token", self.config.auth_base_url))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&params)
            .send()
            .await?;

        if response.status().is_success() {
            let token_response: TokenResponse = response.json().await?;
            Ok(token_response)
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(CalendlyError::OAuthError(format!(
                "Token exchange failed: {} - {}",
                status, body
            )))
        }
    }

    /// Refresh an access token using a refresh token
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, CalendlyError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let response = self.http
            .post(format!("{}/oauth/token", self.config.auth_base_url))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&params)
            .send()
            .await?;

        if response.status().is_success() {
            let token_response: TokenResponse = response.json().await?;
            Ok(token_response)
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(status, "Calendly token refresh rejected");
            Err(CalendlyError::OAuthError(format!(
                "Token refresh failed: {} - {}",
                status, body
            )))
        }
    }

    /// Fetch the authenticated user
    pub async fn get_current_user(&self, access_token: &str) -> Result<CalendlyUser, CalendlyError> {
        let response = self.http
            .get(format!("{}/users/me", self.config.api_base_url))
            .bearer_auth(access_token)
            .send()
            .await?;

        if response.status().is_success() {
            let envelope: UserEnvelope = response.json().await?;
            Ok(envelope.resource)
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(CalendlyError::ApiError {
                status,
                message: format!("Failed to get user info: {}", body),
            })
        }
    }

    /// List webhook subscriptions scoped to a user.
    ///
    /// Also used as the plan probe: FREE accounts cannot use the webhook API
    /// and answer 402/403 here.
    pub async fn list_webhook_subscriptions(
        &self,
        access_token: &str,
        organization_uri: &str,
        user_uri: &str,
    ) -> Result<Vec<WebhookSubscription>, CalendlyError> {
        let mut url = Url::parse(&format!(
            "{}/webhook_subscriptions",
            self.config.api_base_url
        ))?;
        url.query_pairs_mut()
            .append_pair("organization", organization_uri)
            .append_pair("user", user_uri)
            .append_pair("scope", "user");

        let response = self.http.get(url).bearer_auth(access_token).send().await?;

        if response.status().is_success() {
            let list: WebhookSubscriptionList = response.json().await?;
            Ok(list.collection)
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(CalendlyError::ApiError {
                status,
                message: format!("Failed to list webhook subscriptions: {}", body),
            })
        }
    }

    /// Create a user-scoped webhook subscription
    pub async fn create_webhook_subscription(
        &self,
        access_token: &str,
        callback_url: &str,
        events: &[&str],
        organization_uri: &str,
        user_uri: &str,
    ) -> Result<WebhookSubscription, CalendlyError> {
        let body = serde_json::json!({
            "url": callback_url,
            "events": events,
            "organization": organization_uri,
            "user": user_uri,
            "scope": "user",
        });

        let response = self.http
            .post(format!(
                "{}/webhook_subscriptions",
                self.config.api_base_url
            ))
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() {
            let envelope: WebhookSubscriptionEnvelope = response.json().await?;
            Ok(envelope.resource)
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(CalendlyError::ApiError {
                status,
                message: format!("Failed to create webhook subscription: {}", body),
            })
        }
    }

    /// Delete a webhook subscription by its resource URI
    pub async fn delete_webhook_subscription(
        &self,
        access_token: &str,
        subscription_uri: &str,
    ) -> Result<(), CalendlyError> {
        let response = self.http
            .delete(subscription_uri)
            .bearer_auth(access_token)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(CalendlyError::ApiError {
                status,
                message: format!("Failed to delete webhook subscription: {}", body),
            })
        }
    }

    /// List active scheduled events for a user.
    ///
    /// Exactly one of `page_token` or `min_start_time` drives the query: a
    /// stored cursor resumes pagination, otherwise the look-back window
    /// starts a fresh scan.
    pub async fn list_scheduled_events(
        &self,
        access_token: &str,
        user_uri: &str,
        page_token: Option<&str>,
        min_start_time: Option<DateTime<Utc>>,
        count: u32,
    ) -> Result<ScheduledEventsPage, CalendlyError> {
        let mut url = Url::parse(&format!("{}/scheduled_events", self.config.api_base_url))?;
        url.query_pairs_mut()
            .append_pair("user", user_uri)
            .append_pair("status", "active")
            .append_pair("count", &count.to_string());

        if let Some(token) = page_token {
            url.query_pairs_mut().append_pair("page_token", token);
        } else if let Some(min_start) = min_start_time {
            url.query_pairs_mut()
                .append_pair("min_start_time", &min_start.to_rfc3339());
        }

        let response = self.http.get(url).bearer_auth(access_token).send().await?;
        let rate_limit = extract_rate_limit_info(&response);

        if response.status().is_success() {
            let list: ScheduledEventList = response.json().await?;
            debug!(
                events = list.collection.len(),
                has_next = list.pagination.next_page_token.is_some(),
                "Fetched scheduled events page"
            );
            Ok(ScheduledEventsPage {
                events: list.collection,
                next_page_token: list.pagination.next_page_token,
                rate_limit,
            })
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(CalendlyError::ApiError {
                status,
                message: format!("Failed to list scheduled events: {}", body),
            })
        }
    }

    /// List invitees for a scheduled event
    pub async fn list_event_invitees(
        &self,
        access_token: &str,
        event_id: &str,
    ) -> Result<Vec<Invitee>, CalendlyError> {
        let response = self.http
            .get(format!(
                "{}/scheduled_events/{}/invitees",
                self.config.api_base_url, event_id
            ))
            .bearer_auth(access_token)
            .send()
            .await?;

        if response.status().is_success() {
            let list: InviteeList = response.json().await?;
            Ok(list.collection)
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(CalendlyError::ApiError {
                status,
                message: format!("Failed to list invitees: {}", body),
            })
        }
    }
}

fn extract_rate_limit_info(response: &reqwest::Response) -> Option<RateLimitInfo> {
    Some(RateLimitInfo {
        remaining: response
            .headers()
            .get("X-RateLimit-Remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok()),
        reset: response
            .headers()
            .get("X-RateLimit-Reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .and_then(|timestamp| DateTime::from_timestamp(timestamp, 0)),
    })
}
