//! # Server Configuration
//!
//! Wires the service graph (provider client, token manager, orchestrator,
//! state bridge, poll scheduler) into the Axum application, and runs the
//! HTTP server alongside the background tasks under one shutdown token.

use std::sync::Arc;

use axum::Router;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::attribution::AttributionMatcher;
use crate::auth::auth_middleware;
use crate::calendly::{CalendlyClient, CalendlyConfig};
use crate::config::AppConfig;
use crate::handlers;
use crate::oauth_state::OauthStateBridge;
use crate::orchestrator::SyncOrchestrator;
use crate::poll_scheduler::{PollScheduler, PollTrigger};
use crate::repositories::{
    BookingRepository, CredentialRepository, LeadRepository, PollingJobRepository,
    WebhookRepository, WorkflowRepository,
};
use crate::telemetry::{self, TraceContext};
use crate::token_manager::TokenManager;
use crate::webhook_verifier::WebhookVerifier;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub oauth_state: OauthStateBridge,
    pub poll_trigger: PollTrigger,
}

fn calendly_config(config: &AppConfig) -> CalendlyConfig {
    CalendlyConfig {
        client_id: config.calendly_client_id.clone().unwrap_or_default(),
        client_secret: config.calendly_client_secret.clone().unwrap_or_default(),
        redirect_uri: format!(
            "{}/calendly/oauth/callback",
            config.app_base_url.trim_end_matches('/')
        ),
        auth_base_url: config.calendly_auth_base.clone(),
        api_base_url: config.calendly_api_base.clone(),
    }
}

/// Build the shared application state and the poll scheduler it feeds.
pub fn build_state(
    config: Arc<AppConfig>,
    db: Arc<DatabaseConnection>,
) -> (AppState, PollScheduler) {
    let credentials = Arc::new(CredentialRepository::new(Arc::clone(&db)));
    let bookings = Arc::new(BookingRepository::new(Arc::clone(&db)));
    let leads = Arc::new(LeadRepository::new(Arc::clone(&db)));
    let workflows = Arc::new(WorkflowRepository::new(Arc::clone(&db)));
    let webhooks = Arc::new(WebhookRepository::new(Arc::clone(&db)));
    let jobs = Arc::new(PollingJobRepository::new(Arc::clone(&db)));

    let client = CalendlyClient::new(calendly_config(&config));
    let tokens = Arc::new(TokenManager::new(
        Arc::clone(&credentials),
        client.clone(),
        &config.token_manager,
    ));
    let verifier = WebhookVerifier::new(Arc::clone(&credentials));
    let matcher = AttributionMatcher::new(Arc::clone(&leads), Arc::clone(&workflows));

    let orchestrator = Arc::new(SyncOrchestrator::new(
        client,
        tokens,
        Arc::clone(&credentials),
        bookings,
        leads,
        Arc::clone(&webhooks),
        verifier,
        matcher,
        config.app_base_url.clone(),
        config.polling.lookback_days,
        config.polling.page_size,
    ));

    let (scheduler, poll_trigger) = PollScheduler::new(
        Arc::clone(&orchestrator),
        credentials,
        jobs,
        webhooks,
        config.polling.clone(),
        config.retention.clone(),
    );

    let oauth_state = OauthStateBridge::new(&config.oauth_state);

    (
        AppState {
            config,
            db,
            orchestrator,
            oauth_state,
            poll_trigger,
        },
        scheduler,
    )
}

/// Attach a per-request trace context so errors and logs carry one ID.
async fn trace_context_middleware(mut request: Request, next: Next) -> Response {
    let context = TraceContext::new();
    request.extensions_mut().insert(context.clone());
    telemetry::with_trace_context(context, next.run(request)).await
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    // Webhook and OAuth callback routes are public: the provider cannot send
    // operator tokens. Everything else sits behind bearer auth.
    let public = Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/calendly/oauth/callback", get(handlers::oauth::callback))
        .route(
            "/calendly/webhooks/{credential_id}",
            post(handlers::webhooks::receive),
        );

    let protected = Router::new()
        .route("/calendly/oauth/authorize", get(handlers::oauth::authorize))
        .route(
            "/calendly/poll/{credential_id}",
            post(handlers::polling::poll_credential),
        )
        .route(
            "/calendly/connection/{workspace_id}",
            get(handlers::polling::connection_status).delete(handlers::polling::disconnect),
        )
        .route(
            "/calendly/link/{workspace_id}/{lead_id}",
            get(handlers::polling::booking_link),
        )
        .route("/booking/health", get(handlers::health::overview))
        .route("/booking/health/dlq", get(handlers::health::list_dlq))
        .route(
            "/booking/health/dlq/{id}/retry",
            post(handlers::health::retry_dlq),
        )
        .route(
            "/booking/health/dlq/{id}/resolve",
            post(handlers::health::resolve_dlq),
        )
        .route(
            "/booking/health/polling/trigger",
            post(handlers::health::trigger_polling),
        )
        .route(
            "/booking/health/polling/{workspace_id}",
            get(handlers::health::polling_state),
        )
        .route(
            "/booking/health/stats/{workspace_id}",
            get(handlers::health::booking_stats),
        )
        .route(
            "/booking/health/webhooks/{workspace_id}",
            get(handlers::health::webhook_health),
        )
        .route(
            "/booking/health/cleanup/idempotency",
            post(handlers::health::cleanup_idempotency),
        )
        .route(
            "/booking/health/cleanup/polling-jobs",
            post(handlers::health::cleanup_polling_jobs),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    public
        .merge(protected)
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Starts the server and background services with the given configuration
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(config);
    let db = Arc::new(db);
    let (state, scheduler) = build_state(Arc::clone(&config), db);

    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(state.oauth_state.clone().run(shutdown.clone()));
    let poller = tokio::spawn(scheduler.run(shutdown.clone()));

    let app = create_app(state);
    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    let _ = sweeper.await;
    let _ = poller.await;
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
    shutdown.cancel();
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::oauth::authorize,
        crate::handlers::oauth::callback,
        crate::handlers::webhooks::receive,
        crate::handlers::polling::poll_credential,
        crate::handlers::polling::connection_status,
        crate::handlers::polling::disconnect,
        crate::handlers::polling::booking_link,
        crate::handlers::health::overview,
        crate::handlers::health::list_dlq,
        crate::handlers::health::retry_dlq,
        crate::handlers::health::resolve_dlq,
        crate::handlers::health::polling_state,
        crate::handlers::health::trigger_polling,
        crate::handlers::health::booking_stats,
        crate::handlers::health::webhook_health,
        crate::handlers::health::cleanup_idempotency,
        crate::handlers::health::cleanup_polling_jobs,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthzResponse,
            crate::handlers::webhooks::WebhookAck,
            crate::handlers::polling::PollRunResponse,
            crate::handlers::polling::ConnectionStatusResponse,
            crate::handlers::polling::DisconnectResponse,
            crate::handlers::polling::BookingLinkResponse,
            crate::handlers::health::BookingHealthResponse,
            crate::handlers::health::DeadLetterEntry,
            crate::handlers::health::DlqActionResponse,
            crate::handlers::health::PollingStateResponse,
            crate::handlers::health::PollJobSummary,
            crate::handlers::health::WebhookHealthResponse,
            crate::handlers::health::TriggerResponse,
            crate::handlers::health::CleanupResponse,
            crate::repositories::booking::BookingStats,
            crate::repositories::webhook::DlqStats,
            crate::repositories::polling_job::PollJobStats,
            crate::error::ApiError,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Booksync API",
        description = "Calendly booking sync for the CRM",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
