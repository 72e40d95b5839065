//! # OAuth Connection Handlers
//!
//! Entry and exit of the Calendly OAuth flow. The authorize endpoint is
//! operator-initiated and binds an opaque state value to the workspace; the
//! callback is hit by the provider and always answers with a redirect back
//! to the frontend, carrying the outcome in query parameters.

use axum::extract::{Query, State};
use axum::response::Redirect;
use serde::Deserialize;
use tracing::{info, warn};
use utoipa::IntoParams;
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::server::AppState;

/// Query parameters for starting the OAuth flow
#[derive(Debug, Deserialize, IntoParams)]
pub struct AuthorizeQuery {
    /// Workspace the connection belongs to
    pub workspace_id: Uuid,
}

/// Query parameters Calendly sends to the callback
#[derive(Debug, Deserialize, IntoParams)]
pub struct CallbackQuery {
    /// Authorization code, absent when the user denied access
    pub code: Option<String>,
    /// Opaque state issued by the authorize endpoint
    pub state: Option<String>,
    /// Provider-side error code, e.g. "access_denied"
    pub error: Option<String>,
}

/// Start the OAuth flow for a workspace
#[utoipa::path(
    get,
    path = "/calendly/oauth/authorize",
    params(AuthorizeQuery),
    responses(
        (status = 307, description = "Redirect to the Calendly consent screen"),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "oauth"
)]
pub async fn authorize(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Redirect, ApiError> {
    let oauth_state = state.oauth_state.issue(query.workspace_id).await;
    let url = state.orchestrator.authorize_url(&oauth_state)?;

    info!(workspace_id = %query.workspace_id, "Issued OAuth state, redirecting to provider");
    Ok(Redirect::temporary(url.as_str()))
}

/// Complete the OAuth flow
///
/// Always redirects to the frontend integrations page; failures are encoded
/// as `calendly=error&reason=...` so the provider never sees an error page.
#[utoipa::path(
    get,
    path = "/calendly/oauth/callback",
    params(CallbackQuery),
    responses(
        (status = 307, description = "Redirect to the frontend with the connection outcome")
    ),
    tag = "oauth"
)]
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Redirect {
    let frontend = format!(
        "{}/onboarding/integrations",
        state.config.frontend_url.trim_end_matches('/')
    );

    if let Some(provider_error) = query.error.as_deref() {
        warn!(provider_error, "Provider returned an OAuth error");
        return Redirect::temporary(&format!(
            "{frontend}?calendly=error&reason={provider_error}"
        ));
    }

    let workspace_id = match query.state.as_deref() {
        Some(value) => state.oauth_state.consume(value).await,
        None => None,
    };
    let Some(workspace_id) = workspace_id else {
        warn!("OAuth callback carried an unknown or expired state");
        return Redirect::temporary(&format!("{frontend}?calendly=error&reason=state_expired"));
    };

    let Some(code) = query.code.as_deref() else {
        warn!(workspace_id = %workspace_id, "OAuth callback arrived without a code");
        return Redirect::temporary(&format!("{frontend}?calendly=error&reason=missing_code"));
    };

    match state
        .orchestrator
        .complete_connection(workspace_id, code)
        .await
    {
        Ok(outcome) => {
            info!(
                workspace_id = %workspace_id,
                plan = %outcome.plan,
                "Calendly connection completed"
            );
            Redirect::temporary(&format!(
                "{frontend}?calendly=success&plan={}",
                outcome.plan.as_str().to_lowercase()
            ))
        }
        Err(err) => {
            warn!(workspace_id = %workspace_id, error = %err, "Calendly connection failed");
            Redirect::temporary(&format!("{frontend}?calendly=error&reason=connection_failed"))
        }
    }
}
